//! The single error kind surfaced to callers of relay-bridge.
//!
//! Every failure that originates inside the bridge core — gateway, provider,
//! retry engine, resource cell, session cryptography — is wrapped in
//! [`BridgeError`]. No `.unwrap()`/`.expect()` is used outside tests.

use thiserror::Error;

/// Errors that can occur while operating a relay bridge gateway or provider.
#[derive(Debug, Error)]
pub enum BridgeError {
    /// The current generation's cancellation token fired. Not surfaced to
    /// an error listener — only returned or propagated up the call chain.
    #[error("operation cancelled")]
    Cancelled,

    /// The SSE subscription raised an error before ever emitting `open`.
    /// Non-retryable at the Gateway layer; the Provider's retry engine
    /// retries the whole `register_session` attempt.
    #[error("bridge error before connecting: {0}")]
    ConnectBeforeOpen(String),

    /// The SSE subscription raised an error after having emitted `open`.
    /// Forwarded to the Provider, which treats it like a missed heartbeat.
    #[error("bridge connection error: {0}")]
    ConnectAfterOpen(String),

    /// An HTTP POST (send/verify) returned a non-2xx status.
    #[error("relay returned HTTP {status}: {body}")]
    Http {
        /// HTTP status code.
        status: u16,
        /// Response body, truncated to a reasonable diagnostic length.
        body: String,
    },

    /// The underlying HTTP/SSE transport failed outright (DNS, TLS, I/O).
    #[error("transport error: {0}")]
    Transport(String),

    /// An incoming frame could not be parsed or decrypted. Reported to the
    /// error listener but does not tear down the subscription.
    #[error("failed to decode incoming frame: {0}")]
    Decode(String),

    /// `get_crypto_session` was called with an unknown `client_id`.
    #[error("no client session registered for client_id {0}")]
    MissingClient(String),

    /// The resource cell disposed a freshly created resource because
    /// another creation superseded it. Not user-facing; an internal signal
    /// that the caller's attempt lost a race and should stop.
    #[error("resource creation superseded by a newer create()")]
    ResourceSuperseded,

    /// `restore_connection`/`send`/`register_session` timed out before the
    /// configured deadline elapsed.
    #[error("operation timed out after {0:?}")]
    Timeout(std::time::Duration),
}

impl BridgeError {
    /// True for [`BridgeError::Cancelled`] — callers use this to decide
    /// whether to suppress a log line or silently stop instead of
    /// forwarding to an error listener.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, BridgeError::Cancelled)
    }
}

impl From<reqwest::Error> for BridgeError {
    fn from(err: reqwest::Error) -> Self {
        BridgeError::Transport(err.to_string())
    }
}

impl From<serde_json::Error> for BridgeError {
    fn from(err: serde_json::Error) -> Self {
        BridgeError::Decode(err.to_string())
    }
}
