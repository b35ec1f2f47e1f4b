//! Heartbeat watchdog.
//!
//! An `Instant` under a lock plus atomics tracking the relay bridge's
//! stall-detection clock: the mark is advanced on every `heartbeat` frame,
//! and a background task periodically checks whether too much time has
//! passed without one.

use parking_lot::RwLock;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Tracks the last time a heartbeat frame was observed, and the interval
/// past which the watchdog considers the connection stalled.
#[derive(Debug)]
pub struct Heartbeat {
    at: RwLock<Instant>,
    armed: AtomicBool,
}

impl Heartbeat {
    pub fn new() -> Self {
        Self {
            at: RwLock::new(Instant::now()),
            armed: AtomicBool::new(false),
        }
    }

    pub fn mark(&self) {
        *self.at.write() = Instant::now();
    }

    pub fn elapsed(&self) -> Duration {
        self.at.read().elapsed()
    }

    pub fn is_armed(&self) -> bool {
        self.armed.load(Ordering::Acquire)
    }

    fn set_armed(&self, armed: bool) {
        self.armed.store(armed, Ordering::Release);
    }
}

impl Default for Heartbeat {
    fn default() -> Self {
        Self::new()
    }
}

/// Spawn the watchdog loop. Only one should run per generation; the caller
/// is expected to abort the returned handle (or cancel `cancel`) before
/// spawning another.
///
/// `reconnect` is invoked when a stall survives the grace re-check; it
/// should perform the actual reconnect and return whether it succeeded.
pub fn spawn<F, Fut>(
    heartbeat: Arc<Heartbeat>,
    cancel: CancellationToken,
    interval: Duration,
    mut reconnect: F,
) -> JoinHandle<()>
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = bool> + Send,
{
    heartbeat.set_armed(true);
    tokio::spawn(async move {
        loop {
            let elapsed = heartbeat.elapsed();
            if elapsed < interval {
                let wait = (interval - elapsed).max(Duration::from_millis(1)) / 2;
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(wait) => continue,
                }
            }

            // Grace period: the host loop may have been blocked and a
            // message could already be waiting to be processed.
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(super::config::HEARTBEAT_GRACE_DELAY) => {}
            }

            if cancel.is_cancelled() {
                break;
            }

            if heartbeat.elapsed() < interval {
                continue;
            }

            warn!(?elapsed, "heartbeat watchdog detected a stall, reconnecting");
            if reconnect().await {
                heartbeat.mark();
            } else {
                debug!("heartbeat-triggered reconnect failed, watchdog will re-check next tick");
            }
        }
        heartbeat.set_armed(false);
    })
}
