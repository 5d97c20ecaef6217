//! In-memory store backend.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use parking_lot::RwLock;
use tracing::debug;

use crate::{ScopedStore, StorageError, StorageUsage, StoreScope};

/// Process-local [`ScopedStore`]. Backs tests and scenario simulation, and
/// doubles as the degraded target inside [`crate::FallbackStore`].
///
/// `set_unavailable(true)` makes every call fail, which is how scenarios
/// exercise private-mode and quota-denied paths.
#[derive(Default)]
pub struct MemoryStore {
    session: RwLock<HashMap<String, String>>,
    durable: RwLock<HashMap<String, String>>,
    unavailable: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Flip the simulated backend on or off.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Drop every key in one scope. Session end clears `Session`.
    pub fn clear_scope(&self, scope: StoreScope) {
        self.map(scope).write().clear();
        debug!(scope = scope.name(), "store scope cleared");
    }

    fn map(&self, scope: StoreScope) -> &RwLock<HashMap<String, String>> {
        match scope {
            StoreScope::Session => &self.session,
            StoreScope::Durable => &self.durable,
        }
    }

    fn check_available(&self) -> Result<(), StorageError> {
        if self.unavailable.load(Ordering::SeqCst) {
            Err(StorageError::Unavailable("backend disabled".into()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl ScopedStore for MemoryStore {
    async fn get(&self, scope: StoreScope, key: &str) -> Result<Option<String>, StorageError> {
        self.check_available()?;
        Ok(self.map(scope).read().get(key).cloned())
    }

    async fn set(&self, scope: StoreScope, key: &str, value: &str) -> Result<(), StorageError> {
        self.check_available()?;
        self.map(scope).write().insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn remove(&self, scope: StoreScope, key: &str) -> Result<(), StorageError> {
        self.check_available()?;
        self.map(scope).write().remove(key);
        Ok(())
    }

    async fn keys(&self, scope: StoreScope) -> Result<Vec<String>, StorageError> {
        self.check_available()?;
        Ok(self.map(scope).read().keys().cloned().collect())
    }

    async fn usage(&self, scope: StoreScope) -> Result<StorageUsage, StorageError> {
        self.check_available()?;
        let map = self.map(scope).read();
        let bytes = map.iter().map(|(k, v)| k.len() + v.len()).sum();
        Ok(StorageUsage {
            entries: map.len(),
            bytes,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_scopes_are_isolated() {
        let store = MemoryStore::new();
        store.set(StoreScope::Session, "k", "session").await.unwrap();
        store.set(StoreScope::Durable, "k", "durable").await.unwrap();

        assert_eq!(
            store.get(StoreScope::Session, "k").await.unwrap().as_deref(),
            Some("session")
        );
        assert_eq!(
            store.get(StoreScope::Durable, "k").await.unwrap().as_deref(),
            Some("durable")
        );

        store.clear_scope(StoreScope::Session);
        assert!(store.get(StoreScope::Session, "k").await.unwrap().is_none());
        assert!(store.get(StoreScope::Durable, "k").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_unavailable_fails_every_call() {
        let store = MemoryStore::new();
        store.set_unavailable(true);
        assert!(matches!(
            store.get(StoreScope::Session, "k").await,
            Err(StorageError::Unavailable(_))
        ));
        assert!(store.set(StoreScope::Durable, "k", "v").await.is_err());
    }

    #[tokio::test]
    async fn test_usage_counts_bytes() {
        let store = MemoryStore::new();
        store.set(StoreScope::Durable, "ab", "cdef").await.unwrap();
        let usage = store.usage(StoreScope::Durable).await.unwrap();
        assert_eq!(usage.entries, 1);
        assert_eq!(usage.bytes, 6);
    }
}
