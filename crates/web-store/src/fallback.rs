//! Degrading store wrapper.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tracing::warn;

use crate::{MemoryStore, ScopedStore, StorageError, StorageUsage, StoreScope};

/// Wraps a real backend and falls back to process memory the first time it
/// reports [`StorageError::Unavailable`]. Private browsing modes and quota
/// rejections land here: the engine keeps personalizing, it just stops
/// remembering past the current page lifetime.
///
/// Degradation is one-way. A backend that starts failing mid-session is
/// not trusted again until the next page load builds a fresh store.
pub struct FallbackStore {
    inner: Arc<dyn ScopedStore>,
    memory: MemoryStore,
    degraded: AtomicBool,
}

impl FallbackStore {
    pub fn new(inner: Arc<dyn ScopedStore>) -> Self {
        Self {
            inner,
            memory: MemoryStore::new(),
            degraded: AtomicBool::new(false),
        }
    }

    pub fn is_degraded(&self) -> bool {
        self.degraded.load(Ordering::SeqCst)
    }

    fn degrade(&self, op: &str, err: &StorageError) {
        if !self.degraded.swap(true, Ordering::SeqCst) {
            warn!(%err, op, "storage backend unavailable; continuing in memory");
        }
    }
}

macro_rules! with_fallback {
    ($self:ident, $op:literal, $call:expr, $fallback:expr) => {
        if $self.is_degraded() {
            $fallback
        } else {
            match $call {
                Err(err @ StorageError::Unavailable(_)) => {
                    $self.degrade($op, &err);
                    $fallback
                }
                other => other,
            }
        }
    };
}

#[async_trait]
impl ScopedStore for FallbackStore {
    async fn get(&self, scope: StoreScope, key: &str) -> Result<Option<String>, StorageError> {
        with_fallback!(
            self,
            "get",
            self.inner.get(scope, key).await,
            self.memory.get(scope, key).await
        )
    }

    async fn set(&self, scope: StoreScope, key: &str, value: &str) -> Result<(), StorageError> {
        with_fallback!(
            self,
            "set",
            self.inner.set(scope, key, value).await,
            self.memory.set(scope, key, value).await
        )
    }

    async fn remove(&self, scope: StoreScope, key: &str) -> Result<(), StorageError> {
        with_fallback!(
            self,
            "remove",
            self.inner.remove(scope, key).await,
            self.memory.remove(scope, key).await
        )
    }

    async fn keys(&self, scope: StoreScope) -> Result<Vec<String>, StorageError> {
        with_fallback!(
            self,
            "keys",
            self.inner.keys(scope).await,
            self.memory.keys(scope).await
        )
    }

    async fn usage(&self, scope: StoreScope) -> Result<StorageUsage, StorageError> {
        with_fallback!(
            self,
            "usage",
            self.inner.usage(scope).await,
            self.memory.usage(scope).await
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_passes_through_while_healthy() {
        let inner = Arc::new(MemoryStore::new());
        let store = FallbackStore::new(inner.clone());

        store.set(StoreScope::Durable, "k", "v").await.unwrap();
        assert!(!store.is_degraded());
        assert_eq!(
            inner.get(StoreScope::Durable, "k").await.unwrap().as_deref(),
            Some("v")
        );
    }

    #[tokio::test]
    async fn test_degrades_once_and_stays_in_memory() {
        let inner = Arc::new(MemoryStore::new());
        inner.set(StoreScope::Durable, "old", "1").await.unwrap();
        let store = FallbackStore::new(inner.clone());

        inner.set_unavailable(true);
        assert!(store.get(StoreScope::Durable, "old").await.unwrap().is_none());
        assert!(store.is_degraded());

        // Writes now land in memory, and stay there even after the backend
        // comes back.
        store.set(StoreScope::Session, "k", "v").await.unwrap();
        inner.set_unavailable(false);
        assert_eq!(
            store.get(StoreScope::Session, "k").await.unwrap().as_deref(),
            Some("v")
        );
        assert!(inner.get(StoreScope::Session, "k").await.unwrap().is_none());
    }
}
