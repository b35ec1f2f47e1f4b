//! Configuration structs for opening and driving a [`Provider`](crate::provider::Provider).
//!
//! Builder-style (`new` + `with_*`).

use relay_bridge_model::ClientConnection;
use std::time::Duration;

/// Default bound on a single SSE open attempt (not the whole reconnect).
pub const DEFAULT_CONNECTING_DEADLINE: Duration = Duration::from_millis(14_000);
/// Default retry base delay for (re)connect and send.
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_millis(1_000);
/// Default retry delay ceiling under exponential backoff.
pub const DEFAULT_MAX_DELAY: Duration = Duration::from_millis(7_000);
/// Default relay message TTL.
pub const DEFAULT_TTL_SECONDS: u64 = 300;
/// Grace period the heartbeat watchdog allows before re-checking a stall.
pub const HEARTBEAT_GRACE_DELAY: Duration = Duration::from_millis(100);

/// Retry/deadline policy captured at the last `restore_connection` call and
/// reused by watchdog- and error-handler-triggered reconnects.
#[derive(Debug, Clone)]
pub struct ConnectionOptions {
    pub connecting_deadline: Duration,
    pub delay: Duration,
    pub max_delay: Option<Duration>,
    pub exponential: bool,
}

impl Default for ConnectionOptions {
    fn default() -> Self {
        Self {
            connecting_deadline: DEFAULT_CONNECTING_DEADLINE,
            delay: DEFAULT_RETRY_DELAY,
            max_delay: Some(DEFAULT_MAX_DELAY),
            exponential: true,
        }
    }
}

impl ConnectionOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_connecting_deadline(mut self, deadline: Duration) -> Self {
        self.connecting_deadline = deadline;
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn with_max_delay(mut self, max_delay: Option<Duration>) -> Self {
        self.max_delay = max_delay;
        self
    }

    pub fn with_exponential(mut self, exponential: bool) -> Self {
        self.exponential = exponential;
        self
    }
}

/// Parameters for [`Provider::open`](crate::provider::Provider::open).
pub struct ProviderOpenOptions {
    pub bridge_url: String,
    pub clients: Vec<ClientConnection>,
    pub heartbeat_reconnect_interval: Option<Duration>,
    pub connection_options: ConnectionOptions,
    pub last_event_id: Option<String>,
}

impl ProviderOpenOptions {
    pub fn new(bridge_url: impl Into<String>, clients: Vec<ClientConnection>) -> Self {
        Self {
            bridge_url: bridge_url.into(),
            clients,
            heartbeat_reconnect_interval: None,
            connection_options: ConnectionOptions::default(),
            last_event_id: None,
        }
    }

    pub fn with_heartbeat_reconnect_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_reconnect_interval = Some(interval);
        self
    }

    pub fn with_connection_options(mut self, options: ConnectionOptions) -> Self {
        self.connection_options = options;
        self
    }

    pub fn with_last_event_id(mut self, id: impl Into<String>) -> Self {
        self.last_event_id = Some(id.into());
        self
    }
}

/// Per-send overrides; anything left `None` falls back to
/// [`ConnectionOptions`]'s reconnect/send defaults or [`DEFAULT_TTL_SECONDS`].
#[derive(Debug, Clone, Default)]
pub struct SendOptions {
    pub ttl: Option<u64>,
    pub topic: Option<String>,
    pub trace_id: Option<String>,
    pub delay: Option<Duration>,
    pub max_delay: Option<Duration>,
    pub exponential: Option<bool>,
}
