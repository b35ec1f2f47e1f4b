//! The Provider: owner of client sessions, reconnection policy, the
//! heartbeat watchdog, encryption/decryption, and listener dispatch.
//!
//! Supervises a single [`Gateway`]; (re)connection is driven by the shared
//! retry engine rather than an identify rate limiter.

use crate::config::{ConnectionOptions, ProviderOpenOptions, SendOptions, DEFAULT_TTL_SECONDS};
use crate::heartbeat::{self, Heartbeat};
use crate::metrics::ProviderMetrics;
use parking_lot::{Mutex, RwLock};
use relay_bridge_gateway::{retry, Gateway, GatewayFrame, GatewayOptions, RetryOptions};
use relay_bridge_model::{
    session::anonymous_open, BridgeError, ClientConnection, ConnectSource, IncomingEnvelope, ProviderEvent,
    RawRequestSource, RequestSource, Session,
};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, warn, Instrument};

type Listener = Arc<dyn Fn(ProviderEvent) + Send + Sync>;
type ErrorListener = Arc<dyn Fn(BridgeError) + Send + Sync>;
type OnConnecting = Arc<dyn Fn() + Send + Sync>;

struct Inner {
    bridge_url: String,
    http: reqwest::Client,
    clients: RwLock<Vec<ClientConnection>>,
    last_event_id: RwLock<Option<String>>,
    generation: Mutex<CancellationToken>,
    gateway: RwLock<Option<Arc<Gateway>>>,
    connection_options: Mutex<ConnectionOptions>,
    heartbeat: Arc<Heartbeat>,
    heartbeat_reconnect_interval: Mutex<Option<std::time::Duration>>,
    heartbeat_task: Mutex<Option<JoinHandle<()>>>,
    listener: RwLock<Option<Listener>>,
    errors_listener: RwLock<Option<ErrorListener>>,
    on_connecting: RwLock<Option<OnConnecting>>,
    metrics: ProviderMetrics,
    /// Monotonic counter stamped onto each generation's `restore_connection`
    /// span so log lines from overlapping reconnect attempts can be told
    /// apart.
    generation_seq: AtomicU64,
}

/// The duplex relay bridge session owner. Cheap to clone (wraps an `Arc`);
/// all state is shared across clones.
#[derive(Clone)]
pub struct Provider(Arc<Inner>);

impl Provider {
    /// Construct with the caller's callbacks and run the first
    /// [`restore_connection`](Self::restore_connection). On failure the
    /// Provider is closed and the error propagated.
    pub async fn open(options: ProviderOpenOptions) -> Result<Self, BridgeError> {
        let inner = Arc::new(Inner {
            bridge_url: options.bridge_url,
            http: reqwest::Client::new(),
            clients: RwLock::new(Vec::new()),
            last_event_id: RwLock::new(None),
            generation: Mutex::new(CancellationToken::new()),
            gateway: RwLock::new(None),
            connection_options: Mutex::new(options.connection_options),
            heartbeat: Arc::new(Heartbeat::new()),
            heartbeat_reconnect_interval: Mutex::new(options.heartbeat_reconnect_interval),
            heartbeat_task: Mutex::new(None),
            listener: RwLock::new(None),
            errors_listener: RwLock::new(None),
            on_connecting: RwLock::new(None),
            metrics: ProviderMetrics::new(),
            generation_seq: AtomicU64::new(0),
        });
        let provider = Self(inner);

        if let Err(err) = provider
            .restore_connection(options.clients, options.last_event_id, None)
            .await
        {
            provider.close().await;
            return Err(err);
        }

        Ok(provider)
    }

    /// Replace the client set and `last_event_id`, cancel the current
    /// generation, and drive a fresh connect through the retry engine.
    pub async fn restore_connection(
        &self,
        clients: Vec<ClientConnection>,
        last_event_id: Option<String>,
        cancel: Option<&CancellationToken>,
    ) -> Result<(), BridgeError> {
        if clients.is_empty() {
            debug!("restore_connection called with an empty client set, ignoring");
            return Ok(());
        }

        *self.0.clients.write() = clients;
        *self.0.last_event_id.write() = last_event_id;

        let outer = cancel.cloned().unwrap_or_default();
        let generation = outer.child_token();
        let generation_id = self.0.generation_seq.fetch_add(1, Ordering::Relaxed) + 1;
        {
            let mut current = self.0.generation.lock();
            current.cancel();
            *current = generation.clone();
        }

        if generation.is_cancelled() {
            return Err(BridgeError::Cancelled);
        }

        let span = info_span!("provider.restore_connection", generation = generation_id);
        async move {
            self.stop_heartbeat_watchdog();
            if let Some(gateway) = self.0.gateway.write().take() {
                gateway.close().await;
            }

            let options = self.0.connection_options.lock().clone();
            let retry_options = RetryOptions {
                attempts: u32::MAX,
                delay: options.delay,
                exponential: options.exponential,
                max_delay: options.max_delay,
            };

            info!("restoring relay bridge connection");
            let this = self.clone();
            let deadline = options.connecting_deadline;
            retry(&generation, &retry_options, move |attempt_token| {
                let this = this.clone();
                async move { this.open_gateway(&attempt_token, deadline).await }
            })
            .await?;

            info!("relay bridge connection restored");
            self.arm_heartbeat_watchdog(generation);
            Ok(())
        }
        .instrument(span)
        .await
    }

    /// No-op if `clients`' session ids are unchanged; otherwise reconnects
    /// with the previously captured connection policy.
    pub async fn update_clients(
        &self,
        clients: Vec<ClientConnection>,
        cancel: Option<&CancellationToken>,
    ) -> Result<(), BridgeError> {
        let unchanged = {
            let current = self.0.clients.read();
            relay_bridge_model::session_id_sets_equal(&current, &clients)
        };
        if unchanged {
            return Ok(());
        }

        let last_event_id = self.0.last_event_id.read().clone();
        self.restore_connection(clients, last_event_id, cancel).await
    }

    /// Encrypt `message` for `client_session_id` with `session`, and send it
    /// through the retry engine via [`Gateway::send_request`].
    pub async fn send(
        &self,
        message: &serde_json::Value,
        session: &Session,
        client_session_id: &str,
        options: SendOptions,
        cancel: Option<&CancellationToken>,
    ) -> Result<(), BridgeError> {
        let generation = self.0.generation.lock().clone();
        let outer = match cancel {
            Some(c) => c.child_token(),
            None => generation.child_token(),
        };
        if outer.is_cancelled() {
            return Ok(());
        }

        let plaintext = serde_json::to_vec(message)?;
        let receiver_bytes = hex::decode(client_session_id)
            .map_err(|e| BridgeError::Decode(format!("client_session_id is not valid hex: {e}")))?;
        let ciphertext = session.encrypt(&plaintext, &receiver_bytes)?;

        let topic = options.topic.clone().or_else(|| {
            message
                .get("method")
                .and_then(|m| m.as_str())
                .map(|m| m.to_string())
        });

        let retry_options = RetryOptions {
            attempts: u32::MAX,
            delay: options.delay.unwrap_or(crate::config::DEFAULT_RETRY_DELAY),
            exponential: options.exponential.unwrap_or(true),
            max_delay: Some(options.max_delay.unwrap_or(crate::config::DEFAULT_MAX_DELAY)),
        };

        let http = self.0.http.clone();
        let bridge_url = self.0.bridge_url.clone();
        let from = session.session_id().to_string();
        let to = client_session_id.to_string();
        let ttl = options.ttl.unwrap_or(DEFAULT_TTL_SECONDS);
        let trace_id = options.trace_id.clone();

        let metrics = &self.0.metrics;
        let result = retry(&outer, &retry_options, move |attempt_token| {
            let http = http.clone();
            let bridge_url = bridge_url.clone();
            let ciphertext = ciphertext.clone();
            let from = from.clone();
            let to = to.clone();
            let topic = topic.clone();
            let trace_id = trace_id.clone();
            async move {
                Gateway::send_request(
                    &http,
                    &bridge_url,
                    &ciphertext,
                    &from,
                    &to,
                    topic.as_deref(),
                    Some(ttl),
                    trace_id.as_deref(),
                    &attempt_token,
                )
                .await
            }
        })
        .await;

        match &result {
            Ok(()) => metrics.inc_sends_ok(),
            Err(_) => metrics.inc_sends_failed(),
        }
        result
    }

    /// Close the gateway, stop the heartbeat watchdog, and clear
    /// `last_event_id`/`clients`. Idempotent.
    pub async fn close(&self) {
        self.0.generation.lock().cancel();
        self.stop_heartbeat_watchdog();
        if let Some(gateway) = self.0.gateway.write().take() {
            gateway.close().await;
        }
        *self.0.last_event_id.write() = None;
        self.0.clients.write().clear();
        info!("relay bridge provider closed");
    }

    pub fn listen(&self, cb: impl Fn(ProviderEvent) + Send + Sync + 'static) {
        *self.0.listener.write() = Some(Arc::new(cb));
    }

    pub fn on_connecting(&self, cb: impl Fn() + Send + Sync + 'static) {
        *self.0.on_connecting.write() = Some(Arc::new(cb));
    }

    pub fn set_error_listener(&self, cb: impl Fn(BridgeError) + Send + Sync + 'static) {
        *self.0.errors_listener.write() = Some(Arc::new(cb));
    }

    /// Deprecated no-op kept for callers migrating off an older
    /// pause/unpause pair; use [`Provider::close`] and
    /// [`Provider::restore_connection`] instead.
    #[deprecated(note = "prefer close()/restore_connection()")]
    pub async fn pause(&self) {
        warn!("Provider::pause is deprecated and does nothing");
    }

    #[deprecated(note = "prefer close()/restore_connection()")]
    pub async fn unpause(&self) {
        warn!("Provider::unpause is deprecated and does nothing");
    }

    /// Look up a client's session by the remote peer's hex public key
    /// (`client_id`), not by the local session's own id.
    pub fn get_crypto_session(&self, client_id: &str) -> Result<Arc<Session>, BridgeError> {
        self.0
            .clients
            .read()
            .iter()
            .find(|c| c.client_id == client_id)
            .map(|c| c.session.clone())
            .ok_or_else(|| BridgeError::MissingClient(client_id.to_string()))
    }

    pub fn is_ready(&self) -> bool {
        self.0.gateway.read().as_ref().is_some_and(|g| g.is_ready())
    }

    pub fn is_connecting(&self) -> bool {
        self.0.gateway.read().as_ref().is_some_and(|g| g.is_connecting())
    }

    pub fn is_closed(&self) -> bool {
        self.0.gateway.read().is_none()
    }

    pub fn metrics(&self) -> &ProviderMetrics {
        &self.0.metrics
    }

    /// Build a fresh Gateway around the de-duplicated session ids and
    /// install it as current. Does not arm the heartbeat watchdog — that's
    /// `restore_connection`'s job.
    async fn open_gateway(&self, cancel: &CancellationToken, deadline: std::time::Duration) -> Result<(), BridgeError> {
        let generation_id = self.0.generation_seq.load(Ordering::Relaxed);
        let span = info_span!("provider.open_gateway", generation = generation_id);
        async move {
            if cancel.is_cancelled() {
                return Err(BridgeError::Cancelled);
            }

            if let Some(previous) = self.0.gateway.write().take() {
                previous.close().await;
            }

            let session_ids = {
                let clients = self.0.clients.read();
                relay_bridge_model::dedup_session_ids(&clients)
            };
            let last_event_id = self.0.last_event_id.read().clone();

            self.0.metrics.inc_connect_attempts();
            info!(clients = session_ids.len(), "connecting to relay bridge gateway");
            if let Some(cb) = self.0.on_connecting.read().clone() {
                cb();
            }

            let this = self.clone();
            let this_for_errors = self.clone();
            let gateway = Gateway::open(
                cancel,
                GatewayOptions {
                    bridge_url: self.0.bridge_url.clone(),
                    session_ids,
                    listener: Arc::new(move |frame| this.handle_incoming_frame(frame)),
                    errors_listener: Arc::new(move |err| this_for_errors.handle_gateway_error(err)),
                    last_event_id,
                    heartbeat_format: Some("message".to_string()),
                    enable_queue_done_event: false,
                    connecting_deadline: Some(deadline),
                    http: self.0.http.clone(),
                },
            )
            .await?;

            *self.0.gateway.write() = Some(gateway);
            self.0.metrics.inc_reconnects();
            info!("relay bridge gateway open");
            Ok(())
        }
        .instrument(span)
        .await
    }

    /// Reconnect without disturbing `clients`/`last_event_id`, used by the
    /// heartbeat watchdog and the gateway error handler. Returns whether it
    /// succeeded (watchdog uses this to decide whether to reset its clock).
    async fn reconnect(&self, cancel: CancellationToken) -> bool {
        let options = self.0.connection_options.lock().clone();
        let retry_options = RetryOptions {
            attempts: u32::MAX,
            delay: options.delay,
            exponential: options.exponential,
            max_delay: options.max_delay,
        };

        let this = self.clone();
        let deadline = options.connecting_deadline;
        let result = retry(&cancel, &retry_options, move |attempt_token| {
            let this = this.clone();
            async move { this.open_gateway(&attempt_token, deadline).await }
        })
        .await;

        match result {
            Ok(()) => true,
            Err(err) => {
                if !err.is_cancelled() {
                    self.emit_error(err);
                }
                false
            }
        }
    }

    fn arm_heartbeat_watchdog(&self, generation: CancellationToken) {
        let interval = *self.0.heartbeat_reconnect_interval.lock();
        let Some(interval) = interval else { return };

        self.0.heartbeat.mark();
        let heartbeat = self.0.heartbeat.clone();
        let this = self.clone();
        let task = heartbeat::spawn(heartbeat, generation, interval, move || {
            let this = this.clone();
            async move {
                this.0.metrics.inc_watchdog_reconnects();
                this.reconnect(this.0.generation.lock().clone()).await
            }
        });
        *self.0.heartbeat_task.lock() = Some(task);
    }

    fn stop_heartbeat_watchdog(&self) {
        if let Some(task) = self.0.heartbeat_task.lock().take() {
            task.abort();
        }
    }

    /// The Gateway's message handler: interpret the raw frame (heartbeat vs
    /// JSON), decrypt, and dispatch to the user listener.
    fn handle_incoming_frame(&self, frame: GatewayFrame) {
        if frame.data == "heartbeat" {
            self.0.heartbeat.mark();
            self.0.metrics.inc_heartbeats_received();
            return;
        }

        let envelope: IncomingEnvelope = match serde_json::from_str(&frame.data) {
            Ok(envelope) => envelope,
            Err(err) => {
                self.0.metrics.inc_decode_failures();
                self.emit_error(BridgeError::Decode(err.to_string()));
                return;
            }
        };

        if let Err(err) = self.dispatch_envelope(envelope, frame.id) {
            self.0.metrics.inc_decode_failures();
            self.emit_error(err);
        }
    }

    fn dispatch_envelope(&self, envelope: IncomingEnvelope, frame_id: Option<String>) -> Result<(), BridgeError> {
        let session = self.get_crypto_session(&envelope.from)?;

        let sender_bytes = hex::decode(&envelope.from)
            .map_err(|e| BridgeError::Decode(format!("from is not valid hex: {e}")))?;
        let ciphertext = base64::Engine::decode(&base64::engine::general_purpose::STANDARD, &envelope.message)
            .map_err(|e| BridgeError::Decode(format!("message is not valid base64: {e}")))?;
        let plaintext = session.decrypt(&ciphertext, &sender_bytes)?;
        let payload: serde_json::Value = serde_json::from_slice(&plaintext)?;

        let request_source = envelope
            .request_source
            .map(|sealed| open_request_source(&sealed, &session))
            .transpose()?;

        if let Some(id) = frame_id {
            self.advance_last_event_id(&id);
        }
        let last_event_id = self.0.last_event_id.read().clone().unwrap_or_default();

        let connect_source: Option<ConnectSource> = envelope.connect_source;

        self.0.metrics.inc_receives();
        if let Some(listener) = self.0.listener.read().clone() {
            listener(ProviderEvent {
                last_event_id,
                from: envelope.from,
                trace_id: envelope.trace_id,
                request_source,
                connect_source,
                payload,
            });
        }

        Ok(())
    }

    /// `last_event_id` only moves forward; a reconnect redelivering an
    /// already-seen id must not regress it.
    fn advance_last_event_id(&self, candidate: &str) {
        let mut current = self.0.last_event_id.write();
        let should_advance = match current.as_deref().and_then(|c| c.parse::<u128>().ok()) {
            Some(existing) => candidate.parse::<u128>().map(|c| c > existing).unwrap_or(true),
            None => true,
        };
        if should_advance {
            *current = Some(candidate.to_string());
        }
    }

    /// The Gateway's error handler: if the subscription is closed or mid
    /// reconnect, trigger an internal reconnect; otherwise forward as a
    /// regular error.
    fn handle_gateway_error(&self, err: BridgeError) {
        let is_closed_or_connecting = self
            .0
            .gateway
            .read()
            .as_ref()
            .map(|g| g.is_closed() || g.is_connecting())
            .unwrap_or(true);

        if !is_closed_or_connecting {
            self.emit_error(err);
            return;
        }

        info!(error = %err, "gateway error while closed/connecting, triggering reconnect");
        let generation = self.0.generation.lock().clone();
        if generation.is_cancelled() {
            return;
        }
        let child = generation.child_token();
        if let Some(cb) = self.0.on_connecting.read().clone() {
            cb();
        }

        let this = self.clone();
        tokio::spawn(async move {
            if !this.reconnect(child).await {
                error!("reconnect triggered by gateway error handler failed");
            }
        });
    }

    fn emit_error(&self, err: BridgeError) {
        if err.is_cancelled() {
            return;
        }
        if let Some(listener) = self.0.errors_listener.read().clone() {
            listener(err);
        } else {
            warn!(%err, "unhandled relay bridge error (no errorsListener installed)");
        }
    }
}

fn open_request_source(sealed_b64: &str, session: &Session) -> Result<RequestSource, BridgeError> {
    let sealed = base64::Engine::decode(&base64::engine::general_purpose::STANDARD, sealed_b64)
        .map_err(|e| BridgeError::Decode(format!("requestSource is not valid base64: {e}")))?;
    let opened = anonymous_open(&sealed, session)?;
    let raw: RawRequestSource = serde_json::from_slice(&opened)?;
    Ok(raw.into())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_provider() -> Provider {
        let inner = Arc::new(Inner {
            bridge_url: "https://bridge.example.com".into(),
            http: reqwest::Client::new(),
            clients: RwLock::new(Vec::new()),
            last_event_id: RwLock::new(None),
            generation: Mutex::new(CancellationToken::new()),
            gateway: RwLock::new(None),
            connection_options: Mutex::new(ConnectionOptions::default()),
            heartbeat: Arc::new(Heartbeat::new()),
            heartbeat_reconnect_interval: Mutex::new(None),
            heartbeat_task: Mutex::new(None),
            listener: RwLock::new(None),
            errors_listener: RwLock::new(None),
            on_connecting: RwLock::new(None),
            metrics: ProviderMetrics::new(),
            generation_seq: AtomicU64::new(0),
        });
        Provider(inner)
    }

    #[test]
    fn get_crypto_session_looks_up_by_client_id_not_session_id() {
        let provider = test_provider();
        let session = Arc::new(Session::generate());
        let client_id = "deadbeef";
        *provider.0.clients.write() = vec![ClientConnection::new(session.clone(), client_id)];

        let found = provider.get_crypto_session(client_id).unwrap();
        assert_eq!(found.session_id(), session.session_id());

        let missing = provider.get_crypto_session(session.session_id());
        assert!(matches!(missing, Err(BridgeError::MissingClient(_))));
    }

    #[test]
    fn advance_last_event_id_never_regresses() {
        let provider = test_provider();
        provider.advance_last_event_id("5");
        assert_eq!(provider.0.last_event_id.read().as_deref(), Some("5"));

        provider.advance_last_event_id("3");
        assert_eq!(provider.0.last_event_id.read().as_deref(), Some("5"));

        provider.advance_last_event_id("9");
        assert_eq!(provider.0.last_event_id.read().as_deref(), Some("9"));
    }

    #[test]
    fn heartbeat_frame_updates_heartbeat_at_without_invoking_listener() {
        let provider = test_provider();
        let invoked = Arc::new(std::sync::atomic::AtomicBool::new(false));
        let invoked2 = invoked.clone();
        provider.listen(move |_| invoked2.store(true, std::sync::atomic::Ordering::SeqCst));

        provider.handle_incoming_frame(GatewayFrame {
            id: None,
            data: "heartbeat".to_string(),
        });

        assert!(!invoked.load(std::sync::atomic::Ordering::SeqCst));
        assert_eq!(provider.0.metrics.snapshot().heartbeats_received, 1);
    }

    #[test]
    fn malformed_frame_reports_decode_failure_to_error_listener() {
        let provider = test_provider();
        let errors: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
        let errors2 = errors.clone();
        provider.set_error_listener(move |err| errors2.lock().push(err.to_string()));

        provider.handle_incoming_frame(GatewayFrame {
            id: Some("1".into()),
            data: "not json".to_string(),
        });

        assert_eq!(errors.lock().len(), 1);
        assert_eq!(provider.0.metrics.snapshot().decode_failures, 1);
    }

    #[tokio::test]
    async fn restore_connection_with_empty_clients_is_a_noop() {
        let provider = test_provider();
        let result = provider.restore_connection(Vec::new(), None, None).await;
        assert!(result.is_ok());
        assert!(provider.0.clients.read().is_empty());
    }

    #[tokio::test]
    async fn update_clients_with_same_session_ids_does_not_bump_connect_attempts() {
        let provider = test_provider();
        let session = Arc::new(Session::generate());
        let clients = vec![ClientConnection::new(session, "aa")];
        *provider.0.clients.write() = clients.clone();

        provider.update_clients(clients, None).await.unwrap();

        assert_eq!(provider.0.metrics.snapshot().connect_attempts, 0);
    }
}
