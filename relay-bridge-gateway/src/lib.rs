//! The Gateway half of the relay bridge: SSE subscription management plus
//! the HTTP POST sender, and the generic async building blocks (retry
//! engine, deferred-with-timeout, resource cell) it's built from.
//!
//! The one live resource per instance is an SSE subscription rather than a
//! socket; everything above it (retry, timeout, resource lifecycle) is
//! transport-agnostic.

pub mod deferred;
pub mod gateway;
pub mod metrics;
pub mod resource;
pub mod retry;
pub mod sse;

pub use deferred::with_timeout;
pub use gateway::{Gateway, GatewayOptions};
pub use metrics::{GatewayMetrics, GatewayMetricsSnapshot};
pub use resource::{Disposable, ResourceCell};
pub use retry::{retry, RetryOptions};
pub use sse::{GatewayFrame, SseSubscription, SubscriptionState};
