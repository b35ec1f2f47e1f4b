//! Deferred-with-timeout.
//!
//! Bounds a user-provided async action by an overall deadline and an
//! external cancellation signal, composing the two into a single "abort
//! when any of {outer, timer} fires" token the action observes.

use relay_bridge_model::BridgeError;
use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Await `action` bounded by `timeout` (if non-zero) and `cancel`.
///
/// `action` receives the composed token; it is expected to observe
/// `composed.is_cancelled()` and bail out promptly. If `cancel` is already
/// cancelled on entry, this returns [`BridgeError::Cancelled`] without
/// invoking `action` at all.
pub async fn with_timeout<T, F, Fut>(
    cancel: &CancellationToken,
    timeout: Duration,
    action: F,
) -> Result<T, BridgeError>
where
    F: FnOnce(CancellationToken) -> Fut,
    Fut: Future<Output = Result<T, BridgeError>>,
{
    if cancel.is_cancelled() {
        return Err(BridgeError::Cancelled);
    }

    let composed = cancel.child_token();

    if timeout.is_zero() {
        return action(composed).await;
    }

    let timer_guard = composed.clone();
    tokio::select! {
        result = action(composed) => result,
        _ = tokio::time::sleep(timeout) => {
            timer_guard.cancel();
            Err(BridgeError::Timeout(timeout))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn pre_cancelled_signal_rejects_immediately() {
        let cancel = CancellationToken::new();
        cancel.cancel();

        let result: Result<(), _> =
            with_timeout(&cancel, Duration::from_secs(1), |_| async { Ok(()) }).await;

        assert!(matches!(result, Err(BridgeError::Cancelled)));
    }

    #[tokio::test(start_paused = true)]
    async fn deadline_elapses_before_action_resolves() {
        let cancel = CancellationToken::new();

        let result: Result<(), _> = with_timeout(&cancel, Duration::from_millis(50), |_| async {
            tokio::time::sleep(Duration::from_secs(10)).await;
            Ok(())
        })
        .await;

        assert!(matches!(result, Err(BridgeError::Timeout(_))));
    }

    #[tokio::test]
    async fn action_completes_before_deadline() {
        let cancel = CancellationToken::new();

        let result = with_timeout(&cancel, Duration::from_secs(5), |_| async { Ok(7) }).await;

        assert_eq!(result.unwrap(), 7);
    }

    #[tokio::test]
    async fn zero_timeout_means_no_deadline() {
        let cancel = CancellationToken::new();

        let result = with_timeout(&cancel, Duration::ZERO, |_| async { Ok(1) }).await;

        assert_eq!(result.unwrap(), 1);
    }
}
