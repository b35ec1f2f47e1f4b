//! The Gateway: one SSE subscription plus an HTTP POST sender.
//!
//! `Arc`-shared, interior mutability via `parking_lot` and atomics, a
//! resource cell owning the one thing that can only have a single live
//! instance — here an SSE subscription rather than a socket. A Gateway is
//! addressed by its de-duplicated session id list rather than a shard id.

use crate::metrics::GatewayMetrics;
use crate::resource::ResourceCell;
use crate::sse::{GatewayFrame, SseSubscription, SubscriptionParams, SubscriptionState};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use relay_bridge_model::{util::join_path, BridgeError, VerifyRequest, VerifyResponse};
use std::fmt::Write as _;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

const PATH_EVENTS: &str = "events";
const PATH_MESSAGE: &str = "message";
const PATH_VERIFY: &str = "verify";
const DEFAULT_TTL_SECONDS: u64 = 300;

/// Construction parameters for [`Gateway::open`].
pub struct GatewayOptions {
    pub bridge_url: String,
    pub session_ids: Vec<String>,
    pub listener: Arc<dyn Fn(GatewayFrame) + Send + Sync>,
    pub errors_listener: Arc<dyn Fn(BridgeError) + Send + Sync>,
    pub last_event_id: Option<String>,
    pub heartbeat_format: Option<String>,
    pub enable_queue_done_event: bool,
    pub connecting_deadline: Option<Duration>,
    pub http: reqwest::Client,
}

/// One SSE subscription plus the HTTP POST sender for the same relay.
///
/// `Send + Sync`; intended to be held behind an `Arc` by its owner (a
/// Provider) and shared cheaply across clones.
pub struct Gateway {
    bridge_url: String,
    session_ids: Vec<String>,
    heartbeat_format: Option<String>,
    enable_queue_done_event: bool,
    listener: Arc<dyn Fn(GatewayFrame) + Send + Sync>,
    errors_listener: Arc<dyn Fn(BridgeError) + Send + Sync>,
    subscription: ResourceCell<SseSubscription>,
    http: reqwest::Client,
    metrics: Arc<GatewayMetrics>,
}

impl Gateway {
    /// Construct and immediately [`Gateway::register_session`]. On failure
    /// the partially-built gateway is disposed and the error propagated.
    pub async fn open(
        cancel: &CancellationToken,
        options: GatewayOptions,
    ) -> Result<Arc<Self>, BridgeError> {
        let gateway = Arc::new(Self {
            bridge_url: options.bridge_url,
            session_ids: options.session_ids,
            heartbeat_format: options.heartbeat_format,
            enable_queue_done_event: options.enable_queue_done_event,
            listener: options.listener,
            errors_listener: options.errors_listener,
            subscription: ResourceCell::new(),
            http: options.http,
            metrics: Arc::new(GatewayMetrics::new()),
        });

        if let Err(err) = gateway
            .register_session(cancel, options.last_event_id, options.connecting_deadline)
            .await
        {
            gateway.close().await;
            return Err(err);
        }

        Ok(gateway)
    }

    /// Open the SSE subscription, bounded by `connecting_deadline`. Returns
    /// once the relay emits its `open`/`Connected` signal.
    pub async fn register_session(
        &self,
        cancel: &CancellationToken,
        last_event_id: Option<String>,
        connecting_deadline: Option<Duration>,
    ) -> Result<(), BridgeError> {
        let url = self.subscription_url(last_event_id.as_deref());
        let errors_listener = self.errors_listener.clone();

        let metrics = self.metrics.clone();
        let inner_listener = self.listener.clone();
        let listener: Arc<dyn Fn(GatewayFrame) + Send + Sync> = Arc::new(move |frame: GatewayFrame| {
            metrics.inc_frames_received();
            if frame.data == "heartbeat" {
                metrics.inc_heartbeats_received();
            }
            inner_listener(frame);
        });

        let attempt = crate::deferred::with_timeout(
            cancel,
            connecting_deadline.unwrap_or(Duration::ZERO),
            move |composed| {
                let url = url.clone();
                let listener = listener.clone();
                let errors_listener = errors_listener.clone();
                async move {
                    self_create(&self.subscription, &composed, url, listener, errors_listener).await
                }
            },
        )
        .await;

        match attempt {
            Ok(()) => {
                self.metrics.inc_opens();
                info!(sessions = self.session_ids.len(), "SSE subscription open");
                Ok(())
            }
            Err(err) => {
                self.metrics.inc_errors();
                Err(err)
            }
        }
    }

    /// Issue one HTTP POST to `join(bridgeUrl,"message")`.
    pub async fn send(
        &self,
        message: &[u8],
        from: &str,
        to: &str,
        topic: Option<&str>,
        ttl: Option<u64>,
        trace_id: Option<&str>,
        cancel: &CancellationToken,
    ) -> Result<(), BridgeError> {
        let result = Self::send_request(
            &self.http,
            &self.bridge_url,
            message,
            from,
            to,
            topic,
            ttl,
            trace_id,
            cancel,
        )
        .await;

        match &result {
            Ok(()) => self.metrics.inc_sends_ok(),
            Err(_) => self.metrics.inc_sends_failed(),
        }
        result
    }

    /// Static send, usable without an open subscription (the Provider calls
    /// this directly from its retry engine).
    pub async fn send_request(
        http: &reqwest::Client,
        bridge_url: &str,
        message: &[u8],
        from: &str,
        to: &str,
        topic: Option<&str>,
        ttl: Option<u64>,
        trace_id: Option<&str>,
        cancel: &CancellationToken,
    ) -> Result<(), BridgeError> {
        if cancel.is_cancelled() {
            return Err(BridgeError::Cancelled);
        }

        let url = join_path(bridge_url, PATH_MESSAGE);
        let body = BASE64.encode(message);
        let ttl = ttl.unwrap_or(DEFAULT_TTL_SECONDS).to_string();

        let mut query: Vec<(&str, &str)> = vec![("client_id", from), ("to", to), ("ttl", &ttl)];
        if let Some(topic) = topic {
            query.push(("topic", topic));
        }
        if let Some(trace_id) = trace_id {
            query.push(("trace_id", trace_id));
        }

        let response = http
            .post(&url)
            .query(&query)
            .body(body)
            .send()
            .await
            .map_err(BridgeError::from)?;

        ensure_success(response).await.map(|_| ())
    }

    /// Issue one HTTP POST to `join(bridgeUrl,"verify")`.
    pub async fn verify(
        &self,
        client_id: &str,
        verify_url: &str,
        kind: &str,
        cancel: &CancellationToken,
    ) -> Result<VerifyResponse, BridgeError> {
        Self::verify_request(&self.http, &self.bridge_url, client_id, verify_url, kind, cancel).await
    }

    /// Static verify, mirroring [`Gateway::send_request`].
    pub async fn verify_request(
        http: &reqwest::Client,
        bridge_url: &str,
        client_id: &str,
        verify_url: &str,
        kind: &str,
        cancel: &CancellationToken,
    ) -> Result<VerifyResponse, BridgeError> {
        if cancel.is_cancelled() {
            return Err(BridgeError::Cancelled);
        }

        let url = join_path(bridge_url, PATH_VERIFY);
        let body = VerifyRequest {
            client_id,
            url: verify_url,
            kind,
        };

        let response = http
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(BridgeError::from)?;

        let response = ensure_success(response).await?;
        let decoded: VerifyResponse = response.json().await.map_err(BridgeError::from)?;
        Ok(decoded)
    }

    /// Disposes the subscription resource.
    pub async fn close(&self) {
        self.subscription.dispose().await;
        info!("SSE subscription closed");
    }

    pub fn is_ready(&self) -> bool {
        matches!(self.subscription_state(), Some(SubscriptionState::Open))
    }

    pub fn is_connecting(&self) -> bool {
        matches!(self.subscription_state(), Some(SubscriptionState::Connecting))
    }

    pub fn is_closed(&self) -> bool {
        !matches!(self.subscription_state(), Some(SubscriptionState::Open) | Some(SubscriptionState::Connecting))
    }

    pub fn metrics(&self) -> &GatewayMetrics {
        &self.metrics
    }

    fn subscription_state(&self) -> Option<SubscriptionState> {
        self.subscription.current().map(|s| s.state())
    }

    /// Built by hand rather than via `url::Url::query_pairs_mut`: the relay's
    /// `client_id` parameter is a literal comma-separated id list, and the
    /// form-urlencoded serializer `query_pairs_mut` uses would percent-encode
    /// the commas.
    fn subscription_url(&self, last_event_id: Option<&str>) -> String {
        let mut url = format!(
            "{}?client_id={}",
            join_path(&self.bridge_url, PATH_EVENTS),
            self.session_ids.join(",")
        );
        if let Some(id) = last_event_id {
            let _ = write!(url, "&last_event_id={id}");
        }
        if let Some(format) = &self.heartbeat_format {
            let _ = write!(url, "&heartbeat={format}");
        }
        if self.enable_queue_done_event {
            url.push_str("&enable_queue_done_event=true");
        }
        url
    }
}

async fn self_create(
    cell: &ResourceCell<SseSubscription>,
    cancel: &CancellationToken,
    url: String,
    listener: Arc<dyn Fn(GatewayFrame) + Send + Sync>,
    errors_listener: Arc<dyn Fn(BridgeError) + Send + Sync>,
) -> Result<(), BridgeError> {
    cell.create(cancel, move |token| {
        let url = url.clone();
        let on_frame = listener.clone();
        let on_error = errors_listener.clone();
        async move {
            SseSubscription::open(SubscriptionParams {
                url,
                cancel: token,
                on_frame,
                on_error,
            })
            .await
        }
    })
    .await
    .map(|_| ())
}

async fn ensure_success(response: reqwest::Response) -> Result<reqwest::Response, BridgeError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    let body = if body.len() > 512 { body[..512].to_string() } else { body };
    warn!(status = status.as_u16(), "relay returned a non-2xx response");
    Err(BridgeError::Http {
        status: status.as_u16(),
        body,
    })
}
