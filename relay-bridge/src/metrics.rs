//! Provider-level metrics: reconnects, connect attempts, decode failures,
//! and sends, on top of the Gateway's own frame/send counters.
//!
//! Read-only; never gates behaviour.

use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Default)]
pub struct ProviderMetrics {
    /// Every successful (re)connect, including the very first `open`.
    pub reconnects: AtomicU64,
    /// Every time the `on_connecting` callback fires (one per connect attempt).
    pub connect_attempts: AtomicU64,
    /// Incoming frames that failed to parse or decrypt.
    pub decode_failures: AtomicU64,
    /// Heartbeat frames observed.
    pub heartbeats_received: AtomicU64,
    /// Watchdog-triggered reconnects specifically (subset of `reconnects`).
    pub watchdog_reconnects: AtomicU64,
    pub sends_ok: AtomicU64,
    pub sends_failed: AtomicU64,
    /// Incoming envelopes successfully decrypted and dispatched to the listener.
    pub receives: AtomicU64,
}

impl ProviderMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn inc_reconnects(&self) {
        self.reconnects.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_connect_attempts(&self) {
        self.connect_attempts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_decode_failures(&self) {
        self.decode_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_heartbeats_received(&self) {
        self.heartbeats_received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_watchdog_reconnects(&self) {
        self.watchdog_reconnects.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_sends_ok(&self) {
        self.sends_ok.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_sends_failed(&self) {
        self.sends_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_receives(&self) {
        self.receives.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> ProviderMetricsSnapshot {
        ProviderMetricsSnapshot {
            reconnects: self.reconnects.load(Ordering::Relaxed),
            connect_attempts: self.connect_attempts.load(Ordering::Relaxed),
            decode_failures: self.decode_failures.load(Ordering::Relaxed),
            heartbeats_received: self.heartbeats_received.load(Ordering::Relaxed),
            watchdog_reconnects: self.watchdog_reconnects.load(Ordering::Relaxed),
            sends_ok: self.sends_ok.load(Ordering::Relaxed),
            sends_failed: self.sends_failed.load(Ordering::Relaxed),
            receives: self.receives.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProviderMetricsSnapshot {
    pub reconnects: u64,
    pub connect_attempts: u64,
    pub decode_failures: u64,
    pub heartbeats_received: u64,
    pub watchdog_reconnects: u64,
    pub sends_ok: u64,
    pub sends_failed: u64,
    pub receives: u64,
}
