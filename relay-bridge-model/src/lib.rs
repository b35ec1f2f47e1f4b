//! Shared types, wire schema and session cryptography for `relay-bridge`.
//!
//! This crate has no knowledge of HTTP or SSE; it is the foundation that
//! both `relay-bridge-gateway` and `relay-bridge` build on.

pub mod client;
pub mod error;
pub mod session;
pub mod util;
pub mod wire;

pub use client::{dedup_session_ids, session_id_sets_equal, ClientConnection};
pub use error::BridgeError;
pub use session::Session;
pub use wire::{ConnectSource, IncomingEnvelope, ProviderEvent, RawRequestSource, RequestSource, VerifyRequest, VerifyResponse};
