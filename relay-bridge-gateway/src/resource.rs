//! Resource cell.
//!
//! Holds at most one owned resource. `create` atomically replaces/disposes
//! the previous resource and guarantees at-most-one live instance under
//! racing creates: if a second `create` starts while the first is still
//! building, the first's result — if it ever arrives — is disposed instead
//! of becoming `current`.

use parking_lot::Mutex;
use relay_bridge_model::BridgeError;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// A resource that can be torn down asynchronously. The Gateway's SSE
/// subscription handle implements this.
#[async_trait::async_trait]
pub trait Disposable: Send + Sync {
    async fn dispose(&self);
}

/// A single-slot cell for a [`Disposable`] resource of type `T`.
pub struct ResourceCell<T: Disposable> {
    current: Mutex<Option<Arc<T>>>,
    in_flight_token: Mutex<Option<CancellationToken>>,
    generation: AtomicU64,
}

impl<T: Disposable + 'static> ResourceCell<T> {
    pub fn new() -> Self {
        Self {
            current: Mutex::new(None),
            in_flight_token: Mutex::new(None),
            generation: AtomicU64::new(0),
        }
    }

    /// The currently held resource, if any.
    pub fn current(&self) -> Option<Arc<T>> {
        self.current.lock().clone()
    }

    /// Aborts any prior in-flight creation and any currently held resource,
    /// then awaits `factory(token)`. If another `create` supersedes this
    /// one before `factory` resolves, the just-created instance is disposed
    /// and [`BridgeError::ResourceSuperseded`] is returned instead of
    /// installing it.
    pub async fn create<F, Fut>(
        &self,
        outer: &CancellationToken,
        factory: F,
    ) -> Result<Arc<T>, BridgeError>
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = Result<T, BridgeError>>,
    {
        let my_generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let my_token = outer.child_token();

        let previous = {
            let mut in_flight = self.in_flight_token.lock();
            if let Some(prev_token) = in_flight.replace(my_token.clone()) {
                prev_token.cancel();
            }
            self.current.lock().take()
        };
        if let Some(previous) = previous {
            previous.dispose().await;
        }

        let built = factory(my_token.clone()).await?;
        let built = Arc::new(built);

        if my_token.is_cancelled() || self.generation.load(Ordering::SeqCst) != my_generation {
            debug!("resource create() superseded by a newer create()");
            built.dispose().await;
            return Err(BridgeError::ResourceSuperseded);
        }

        *self.current.lock() = Some(built.clone());
        Ok(built)
    }

    /// Cancels any in-flight creation and disposes the current resource.
    /// Idempotent: disposing an already-empty cell is a no-op.
    pub async fn dispose(&self) {
        self.generation.fetch_add(1, Ordering::SeqCst);
        let current = {
            if let Some(token) = self.in_flight_token.lock().take() {
                token.cancel();
            }
            self.current.lock().take()
        };
        if let Some(current) = current {
            current.dispose().await;
        }
    }
}

impl<T: Disposable + 'static> Default for ResourceCell<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering as StdOrdering};

    struct CountingResource {
        disposed: Arc<AtomicU32>,
    }

    #[async_trait::async_trait]
    impl Disposable for CountingResource {
        async fn dispose(&self) {
            self.disposed.fetch_add(1, StdOrdering::SeqCst);
        }
    }

    #[tokio::test]
    async fn create_then_dispose_is_idempotent() {
        let cell: ResourceCell<CountingResource> = ResourceCell::new();
        let disposed = Arc::new(AtomicU32::new(0));
        let outer = CancellationToken::new();

        let d = disposed.clone();
        cell.create(&outer, move |_| {
            let disposed = d.clone();
            async move { Ok(CountingResource { disposed }) }
        })
        .await
        .unwrap();

        assert!(cell.current().is_some());

        cell.dispose().await;
        cell.dispose().await;

        assert_eq!(disposed.load(StdOrdering::SeqCst), 1);
        assert!(cell.current().is_none());
    }

    #[tokio::test]
    async fn second_create_disposes_the_first_resource() {
        let cell: ResourceCell<CountingResource> = ResourceCell::new();
        let disposed = Arc::new(AtomicU32::new(0));
        let outer = CancellationToken::new();

        let d1 = disposed.clone();
        cell.create(&outer, move |_| {
            let disposed = d1.clone();
            async move { Ok(CountingResource { disposed }) }
        })
        .await
        .unwrap();

        let d2 = disposed.clone();
        cell.create(&outer, move |_| {
            let disposed = d2.clone();
            async move { Ok(CountingResource { disposed }) }
        })
        .await
        .unwrap();

        assert_eq!(disposed.load(StdOrdering::SeqCst), 1);
        assert!(cell.current().is_some());
    }

    #[tokio::test]
    async fn a_late_arriving_creation_that_lost_the_race_is_disposed() {
        let cell: ResourceCell<CountingResource> = ResourceCell::new();
        let disposed = Arc::new(AtomicU32::new(0));
        let outer = CancellationToken::new();

        // Simulate a slow first create by manually bumping the generation
        // counter mid-factory, mimicking a second create() starting while
        // the first is still in flight.
        let d = disposed.clone();
        let result = cell
            .create(&outer, move |token| {
                let disposed = d.clone();
                async move {
                    token.cancel();
                    Ok(CountingResource { disposed })
                }
            })
            .await;

        assert!(matches!(result, Err(BridgeError::ResourceSuperseded)));
        assert_eq!(disposed.load(StdOrdering::SeqCst), 1);
        assert!(cell.current().is_none());
    }
}
