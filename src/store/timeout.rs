//! Deadline enforcement for store calls.
//!
//! Every store operation sits on the request path, so a slow backend must
//! surface as `StoreError::Timeout` and be resolved by the stage's failure
//! policy instead of stalling the request.

use async_trait::async_trait;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use crate::store::{SharedStore, StoreError};

/// Wraps another store and bounds each call by `deadline`.
#[derive(Clone)]
pub struct TimeoutStore {
    inner: Arc<dyn SharedStore>,
    deadline: Duration,
}

impl TimeoutStore {
    pub fn new(inner: Arc<dyn SharedStore>, deadline: Duration) -> Self {
        Self { inner, deadline }
    }

    async fn bounded<T>(
        &self,
        op: impl Future<Output = Result<T, StoreError>>,
    ) -> Result<T, StoreError> {
        tokio::time::timeout(self.deadline, op)
            .await
            .map_err(|_| StoreError::Timeout(self.deadline))?
    }
}

#[async_trait]
impl SharedStore for TimeoutStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        self.bounded(self.inner.get(key)).await
    }

    async fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> Result<(), StoreError> {
        self.bounded(self.inner.set_ex(key, value, ttl)).await
    }

    async fn incr_ex(&self, key: &str, ttl: Duration) -> Result<u64, StoreError> {
        self.bounded(self.inner.incr_ex(key, ttl)).await
    }

    async fn ttl(&self, key: &str) -> Result<Option<Duration>, StoreError> {
        self.bounded(self.inner.ttl(key)).await
    }

    async fn delete(&self, key: &str) -> Result<bool, StoreError> {
        self.bounded(self.inner.delete(key)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    /// A backend that never answers.
    struct Stalled;

    #[async_trait]
    impl SharedStore for Stalled {
        async fn get(&self, _key: &str) -> Result<Option<String>, StoreError> {
            std::future::pending().await
        }
        async fn set_ex(&self, _key: &str, _value: &str, _ttl: Duration) -> Result<(), StoreError> {
            std::future::pending().await
        }
        async fn incr_ex(&self, _key: &str, _ttl: Duration) -> Result<u64, StoreError> {
            std::future::pending().await
        }
        async fn ttl(&self, _key: &str) -> Result<Option<Duration>, StoreError> {
            std::future::pending().await
        }
        async fn delete(&self, _key: &str) -> Result<bool, StoreError> {
            std::future::pending().await
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_stalled_backend_times_out() {
        let store = TimeoutStore::new(Arc::new(Stalled), Duration::from_millis(50));
        let err = store.get("k").await.unwrap_err();
        assert!(matches!(err, StoreError::Timeout(d) if d == Duration::from_millis(50)));
    }

    #[tokio::test]
    async fn test_healthy_backend_passes_through() {
        let store = TimeoutStore::new(Arc::new(MemoryStore::new()), Duration::from_secs(1));
        store.set_ex("k", "v", Duration::from_secs(5)).await.unwrap();
        assert_eq!(store.get("k").await.unwrap().as_deref(), Some("v"));
        assert_eq!(store.incr_ex("n", Duration::from_secs(5)).await.unwrap(), 1);
    }
}
