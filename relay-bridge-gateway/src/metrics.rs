//! Gateway metrics collection.
//!
//! Read-only observability counters; never gate behaviour.

use std::sync::atomic::{AtomicU64, Ordering};

/// Metrics for a single Gateway's SSE subscription and HTTP sends.
#[derive(Debug, Default)]
pub struct GatewayMetrics {
    /// Frames received over the SSE subscription, including heartbeats.
    pub frames_received: AtomicU64,
    /// Heartbeat frames observed.
    pub heartbeats_received: AtomicU64,
    /// Successful HTTP POST sends.
    pub sends_ok: AtomicU64,
    /// Failed HTTP POST sends (non-2xx or transport error).
    pub sends_failed: AtomicU64,
    /// Times the SSE subscription was (re)opened.
    pub opens: AtomicU64,
    /// Times the SSE subscription errored.
    pub errors: AtomicU64,
}

impl GatewayMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn inc_frames_received(&self) {
        self.frames_received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_heartbeats_received(&self) {
        self.heartbeats_received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_sends_ok(&self) {
        self.sends_ok.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_sends_failed(&self) {
        self.sends_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_opens(&self) {
        self.opens.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_errors(&self) {
        self.errors.fetch_add(1, Ordering::Relaxed);
    }

    /// A point-in-time snapshot, for logging/exposition.
    pub fn snapshot(&self) -> GatewayMetricsSnapshot {
        GatewayMetricsSnapshot {
            frames_received: self.frames_received.load(Ordering::Relaxed),
            heartbeats_received: self.heartbeats_received.load(Ordering::Relaxed),
            sends_ok: self.sends_ok.load(Ordering::Relaxed),
            sends_failed: self.sends_failed.load(Ordering::Relaxed),
            opens: self.opens.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
        }
    }
}

/// Immutable snapshot of [`GatewayMetrics`] at a point in time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GatewayMetricsSnapshot {
    pub frames_received: u64,
    pub heartbeats_received: u64,
    pub sends_ok: u64,
    pub sends_failed: u64,
    pub opens: u64,
    pub errors: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_start_at_zero_and_increment() {
        let metrics = GatewayMetrics::new();
        assert_eq!(metrics.snapshot(), GatewayMetricsSnapshot::default());

        metrics.inc_frames_received();
        metrics.inc_heartbeats_received();
        let snap = metrics.snapshot();
        assert_eq!(snap.frames_received, 1);
        assert_eq!(snap.heartbeats_received, 1);
    }
}
