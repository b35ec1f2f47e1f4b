//! Retry engine.
//!
//! Runs a fallible async operation up to `attempts` times with fixed or
//! exponential delay, honouring cancellation. The Provider uses
//! `attempts = u32::MAX` for (re)connect loops, where failure means only
//! cancellation ever stops the loop.

use relay_bridge_model::BridgeError;
use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Configuration for [`retry`].
#[derive(Debug, Clone)]
pub struct RetryOptions {
    /// Maximum number of attempts.
    pub attempts: u32,
    /// Delay between failed attempts.
    pub delay: Duration,
    /// Double the delay after each failed attempt.
    pub exponential: bool,
    /// Ceiling for the delay when `exponential` is set.
    pub max_delay: Option<Duration>,
}

impl Default for RetryOptions {
    fn default() -> Self {
        Self {
            attempts: 10,
            delay: Duration::from_millis(100),
            exponential: false,
            max_delay: None,
        }
    }
}

impl RetryOptions {
    /// The Provider's reconnect/send policy: unbounded attempts,
    /// exponential backoff from 1s capped at 7s.
    pub fn reconnect_default() -> Self {
        Self {
            attempts: u32::MAX,
            delay: Duration::from_millis(1000),
            exponential: true,
            max_delay: Some(Duration::from_millis(7000)),
        }
    }
}

/// Run `op` up to `options.attempts` times, sleeping between failures.
///
/// `op` receives a [`CancellationToken`] derived from `cancel` for this
/// attempt. If `cancel` fires — between attempts or during the inter-attempt
/// sleep — the engine stops immediately with [`BridgeError::Cancelled`].
/// If every attempt fails, the final attempt's error is returned.
pub async fn retry<T, F, Fut>(
    cancel: &CancellationToken,
    options: &RetryOptions,
    mut op: F,
) -> Result<T, BridgeError>
where
    F: FnMut(CancellationToken) -> Fut,
    Fut: Future<Output = Result<T, BridgeError>>,
{
    let mut delay = options.delay;
    let mut last_err = BridgeError::Cancelled;

    for attempt in 1..=options.attempts {
        if cancel.is_cancelled() {
            return Err(BridgeError::Cancelled);
        }

        let attempt_token = cancel.child_token();
        match op(attempt_token).await {
            Ok(value) => return Ok(value),
            Err(err) if err.is_cancelled() => return Err(BridgeError::Cancelled),
            Err(err) => {
                debug!(attempt, error = %err, "retry attempt failed");
                last_err = err;
            }
        }

        if attempt == options.attempts {
            break;
        }

        tokio::select! {
            _ = cancel.cancelled() => return Err(BridgeError::Cancelled),
            _ = tokio::time::sleep(delay) => {}
        }

        if options.exponential {
            delay = match options.max_delay {
                Some(max) => (delay * 2).min(max),
                None => delay * 2,
            };
        }
    }

    warn!(attempts = options.attempts, error = %last_err, "retry exhausted all attempts");
    Err(last_err)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn succeeds_on_first_attempt() {
        let cancel = CancellationToken::new();
        let calls = Arc::new(AtomicU32::new(0));
        let calls2 = calls.clone();

        let result = retry(&cancel, &RetryOptions::default(), move |_| {
            let calls = calls2.clone();
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok::<_, BridgeError>(42)
            }
        })
        .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn retries_until_success_with_exponential_backoff() {
        let cancel = CancellationToken::new();
        let calls = Arc::new(AtomicU32::new(0));
        let calls2 = calls.clone();

        let options = RetryOptions {
            attempts: 5,
            delay: Duration::from_millis(10),
            exponential: true,
            max_delay: Some(Duration::from_millis(40)),
        };

        let result = retry(&cancel, &options, move |_| {
            let calls = calls2.clone();
            async move {
                let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
                if n < 3 {
                    Err(BridgeError::Transport("not yet".into()))
                } else {
                    Ok(n)
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn exhausts_attempts_and_propagates_final_error() {
        let cancel = CancellationToken::new();
        let options = RetryOptions {
            attempts: 3,
            delay: Duration::from_millis(1),
            exponential: false,
            max_delay: None,
        };

        let result: Result<(), _> = retry(&cancel, &options, |_| async {
            Err(BridgeError::Transport("nope".into()))
        })
        .await;

        assert!(matches!(result, Err(BridgeError::Transport(_))));
    }

    #[tokio::test]
    async fn cancellation_stops_retry_immediately() {
        let cancel = CancellationToken::new();
        cancel.cancel();

        let result: Result<(), _> = retry(&cancel, &RetryOptions::default(), |_| async {
            Err(BridgeError::Transport("should not run".into()))
        })
        .await;

        assert!(matches!(result, Err(BridgeError::Cancelled)));
    }
}
