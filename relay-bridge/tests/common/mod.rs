//! A loopback HTTP+SSE relay standing in for the real relay in integration
//! tests: `GET /events` (SSE, filtered by the `client_id` query list),
//! `POST /message`, `POST /verify`.

use axum::extract::{Query, State};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use futures_util::stream::Stream;
use serde::Deserialize;
use std::collections::HashSet;
use std::convert::Infallible;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone)]
struct RelayFrame {
    to: String,
    id: Option<String>,
    data: String,
}

#[derive(Clone)]
struct RelayState {
    tx: broadcast::Sender<RelayFrame>,
    next_id: Arc<AtomicU64>,
}

/// A relay bound to an ephemeral loopback port, torn down at the end of one test.
pub struct TestRelay {
    pub url: String,
    tx: broadcast::Sender<RelayFrame>,
    shutdown: CancellationToken,
    server: JoinHandle<()>,
}

impl TestRelay {
    pub async fn start() -> Self {
        let (tx, _rx) = broadcast::channel(256);
        let state = RelayState {
            tx: tx.clone(),
            next_id: Arc::new(AtomicU64::new(1)),
        };

        let app = Router::new()
            .route("/events", get(events))
            .route("/message", post(message))
            .route("/verify", post(verify))
            .with_state(state);

        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind loopback relay listener");
        let addr = listener.local_addr().expect("loopback relay local addr");

        let shutdown = CancellationToken::new();
        let signal = shutdown.clone();
        let server = tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async move { signal.cancelled().await })
                .await
                .expect("loopback relay server");
        });

        Self {
            url: format!("http://{addr}"),
            tx,
            shutdown,
            server,
        }
    }

    /// Push a frame addressed to `to` (a subscriber's own `client_id`) to
    /// every currently-open subscription that asked for it.
    pub fn push_frame(&self, to: impl Into<String>, data: impl Into<String>) {
        let _ = self.tx.send(RelayFrame {
            to: to.into(),
            id: None,
            data: data.into(),
        });
    }

    pub async fn shutdown(self) {
        self.shutdown.cancel();
        let _ = self.server.await;
    }
}

#[derive(Debug, Deserialize)]
struct EventsQuery {
    client_id: String,
}

async fn events(
    State(state): State<RelayState>,
    Query(query): Query<EventsQuery>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let subscribed: HashSet<String> = query.client_id.split(',').map(str::to_string).collect();
    let rx = state.tx.subscribe();

    let stream = futures_util::stream::unfold((rx, subscribed), |(mut rx, subscribed)| async move {
        loop {
            match rx.recv().await {
                Ok(frame) if subscribed.contains(&frame.to) => {
                    let mut event = Event::default().data(frame.data);
                    if let Some(id) = frame.id {
                        event = event.id(id);
                    }
                    return Some((Ok(event), (rx, subscribed)));
                }
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    });

    Sse::new(stream).keep_alive(KeepAlive::default())
}

#[derive(Debug, Deserialize)]
struct MessageQuery {
    client_id: String,
    to: String,
    #[allow(dead_code)]
    ttl: Option<String>,
    trace_id: Option<String>,
}

async fn message(
    State(state): State<RelayState>,
    Query(query): Query<MessageQuery>,
    body: String,
) -> impl IntoResponse {
    let id = state.next_id.fetch_add(1, Ordering::Relaxed).to_string();
    let envelope = serde_json::json!({
        "from": query.client_id,
        "message": body,
        "trace_id": query.trace_id,
    });
    let _ = state.tx.send(RelayFrame {
        to: query.to,
        id: Some(id),
        data: envelope.to_string(),
    });
    axum::http::StatusCode::OK
}

#[derive(Debug, Deserialize)]
struct VerifyBody {
    #[allow(dead_code)]
    client_id: String,
    #[allow(dead_code)]
    url: String,
    #[serde(rename = "type")]
    #[allow(dead_code)]
    kind: String,
}

async fn verify(Json(_body): Json<VerifyBody>) -> impl IntoResponse {
    Json(serde_json::json!({ "status": "ok" }))
}
