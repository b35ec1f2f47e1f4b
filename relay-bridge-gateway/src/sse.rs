//! The SSE subscription handle held inside a Gateway's [`ResourceCell`].
//!
//! This is the factory the resource cell drives: it builds the
//! subscription URL, opens the stream, and spawns a background task that
//! forwards frames to the Gateway's message/error handlers until disposed.

use crate::resource::Disposable;
use eventsource_client::{Client, ClientBuilder, SSE};
use futures_util::StreamExt;
use parking_lot::RwLock;
use relay_bridge_model::BridgeError;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

/// Observable connection state of one SSE subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionState {
    Connecting,
    Open,
    Closed,
}

/// One frame delivered by the relay over SSE.
#[derive(Debug, Clone)]
pub struct GatewayFrame {
    /// The relay-assigned monotone event id, if present on this frame.
    pub id: Option<String>,
    /// Raw `data` field — either the literal `"heartbeat"` or a JSON blob.
    /// Interpretation is the Provider's job, not the Gateway's.
    pub data: String,
}

pub(crate) struct SubscriptionParams {
    pub url: String,
    pub cancel: CancellationToken,
    pub on_frame: Arc<dyn Fn(GatewayFrame) + Send + Sync>,
    pub on_error: Arc<dyn Fn(BridgeError) + Send + Sync>,
}

/// The live SSE subscription resource. Implements [`Disposable`] so the
/// gateway's [`ResourceCell`](crate::resource::ResourceCell) can manage its
/// lifetime under racing reconnects.
pub struct SseSubscription {
    state: Arc<RwLock<SubscriptionState>>,
    reader: JoinHandle<()>,
    disposed: AtomicBool,
}

impl SseSubscription {
    pub fn state(&self) -> SubscriptionState {
        *self.state.read()
    }

    /// Open the subscription and wait for the relay to accept it (the SSE
    /// `open`/`Connected` signal), or fail if the stream errors first or
    /// `cancel` fires first.
    pub(crate) async fn open(params: SubscriptionParams) -> Result<Self, BridgeError> {
        if params.cancel.is_cancelled() {
            return Err(BridgeError::ConnectBeforeOpen("aborted before connection".into()));
        }

        let client = ClientBuilder::for_url(&params.url)
            .map_err(|e| BridgeError::Transport(format!("invalid SSE url: {e}")))?
            .build();

        let state = Arc::new(RwLock::new(SubscriptionState::Connecting));
        let (opened_tx, opened_rx) = oneshot::channel::<Result<(), BridgeError>>();

        let task_state = state.clone();
        let cancel = params.cancel.clone();
        let on_frame = params.on_frame.clone();
        let on_error = params.on_error.clone();

        let reader = tokio::spawn(async move {
            run_reader(client, task_state, cancel, on_frame, on_error, opened_tx).await;
        });

        tokio::select! {
            biased;
            _ = params.cancel.cancelled() => {
                reader.abort();
                Err(BridgeError::Cancelled)
            }
            result = opened_rx => {
                match result {
                    Ok(Ok(())) => Ok(SseSubscription { state, reader, disposed: AtomicBool::new(false) }),
                    Ok(Err(err)) => {
                        reader.abort();
                        Err(err)
                    }
                    Err(_) => {
                        reader.abort();
                        Err(BridgeError::ConnectBeforeOpen("subscription reader dropped before opening".into()))
                    }
                }
            }
        }
    }
}

async fn run_reader(
    client: impl Client,
    state: Arc<RwLock<SubscriptionState>>,
    cancel: CancellationToken,
    on_frame: Arc<dyn Fn(GatewayFrame) + Send + Sync>,
    on_error: Arc<dyn Fn(BridgeError) + Send + Sync>,
    opened_tx: oneshot::Sender<Result<(), BridgeError>>,
) {
    let mut stream = client.stream();
    let mut opened_tx = Some(opened_tx);
    let mut was_previously_opened = false;

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                *state.write() = SubscriptionState::Closed;
                if let Some(tx) = opened_tx.take() {
                    let _ = tx.send(Err(BridgeError::Cancelled));
                }
                return;
            }
            next = stream.next() => {
                match next {
                    Some(Ok(SSE::Connected(_))) => {
                        if cancel.is_cancelled() {
                            *state.write() = SubscriptionState::Closed;
                            if let Some(tx) = opened_tx.take() {
                                let _ = tx.send(Err(BridgeError::Cancelled));
                            }
                            return;
                        }
                        was_previously_opened = true;
                        *state.write() = SubscriptionState::Open;
                        if let Some(tx) = opened_tx.take() {
                            let _ = tx.send(Ok(()));
                        }
                    }
                    Some(Ok(SSE::Event(ev))) => {
                        if cancel.is_cancelled() {
                            *state.write() = SubscriptionState::Closed;
                            return;
                        }
                        trace!(id = ?ev.id, "sse frame received");
                        on_frame(GatewayFrame { id: ev.id, data: ev.data });
                    }
                    Some(Ok(SSE::Comment(comment))) => {
                        trace!(%comment, "sse comment (keep-alive)");
                    }
                    Some(Err(err)) => {
                        *state.write() = SubscriptionState::Closed;
                        if !was_previously_opened {
                            let bridge_err = BridgeError::ConnectBeforeOpen(err.to_string());
                            if let Some(tx) = opened_tx.take() {
                                let _ = tx.send(Err(bridge_err));
                            }
                        } else {
                            warn!(error = %err, "sse subscription errored after opening");
                            on_error(BridgeError::ConnectAfterOpen(err.to_string()));
                        }
                        return;
                    }
                    None => {
                        *state.write() = SubscriptionState::Closed;
                        if !was_previously_opened {
                            let bridge_err = BridgeError::ConnectBeforeOpen("stream ended before opening".into());
                            if let Some(tx) = opened_tx.take() {
                                let _ = tx.send(Err(bridge_err));
                            }
                        } else {
                            on_error(BridgeError::ConnectAfterOpen("stream ended".into()));
                        }
                        return;
                    }
                }
            }
        }
    }
}

#[async_trait::async_trait]
impl Disposable for SseSubscription {
    async fn dispose(&self) {
        if self.disposed.swap(true, Ordering::SeqCst) {
            return;
        }
        debug!("disposing sse subscription");
        self.reader.abort();
        *self.state.write() = SubscriptionState::Closed;
    }
}
