//! Encrypted relay bridge SDK core.
//!
//! A long-lived, duplex message channel between two peers (an application
//! and a wallet) that communicate through a third-party HTTP+SSE relay.
//! [`Provider`] is the top-level entry point: it owns a set of client
//! sessions, drives [`relay_bridge_gateway::Gateway`] (re)connection with
//! retry and backoff, supervises a heartbeat watchdog, encrypts/decrypts
//! payloads, and dispatches events to a user listener.
//!
//! `Provider` is intentionally narrow: this crate's whole surface is the
//! connection-and-crypto core, the "hard part" the rest of an integration
//! is built on.

pub mod config;
pub mod heartbeat;
pub mod metrics;
pub mod provider;

pub use config::{ConnectionOptions, ProviderOpenOptions, SendOptions};
pub use metrics::{ProviderMetrics, ProviderMetricsSnapshot};
pub use provider::Provider;

pub use relay_bridge_gateway::{Gateway, GatewayFrame, GatewayMetrics, GatewayOptions};
pub use relay_bridge_model::{
    session, BridgeError, ClientConnection, ConnectSource, ProviderEvent, RequestSource, Session,
};
