//! Scoped key-value storage.
//!
//! Every durable byte the engine keeps lives behind [`ScopedStore`]: a
//! string-only map split into a session scope (gone when the browsing
//! session ends) and a durable scope (survives across visits). Hosts plug
//! in whatever backs those scopes; the crate ships [`MemoryStore`] for
//! tests and simulation, and [`FallbackStore`] for degrading to memory
//! when the real backend refuses writes.

mod fallback;
pub mod keys;
mod memory;

pub use fallback::FallbackStore;
pub use memory::MemoryStore;

use async_trait::async_trait;
use thiserror::Error;

/// Which lifetime bucket a key belongs to.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum StoreScope {
    /// Cleared when the browsing session ends.
    Session,
    /// Survives across sessions and visits.
    Durable,
}

impl StoreScope {
    pub fn name(&self) -> &'static str {
        match self {
            StoreScope::Session => "session",
            StoreScope::Durable => "durable",
        }
    }
}

#[derive(Debug, Error)]
pub enum StorageError {
    /// The backend cannot be reached or refuses reads/writes.
    #[error("storage unavailable: {0}")]
    Unavailable(String),
    /// A value could not be encoded or decoded.
    #[error("storage serialization: {0}")]
    Serialization(String),
}

/// Entry count and payload size for one scope, reported by backends that
/// can measure themselves.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct StorageUsage {
    pub entries: usize,
    pub bytes: usize,
}

/// Port over the host's scoped storage. Values are strings; callers own
/// any serialization on top.
#[async_trait]
pub trait ScopedStore: Send + Sync {
    async fn get(&self, scope: StoreScope, key: &str) -> Result<Option<String>, StorageError>;

    async fn set(&self, scope: StoreScope, key: &str, value: &str) -> Result<(), StorageError>;

    async fn remove(&self, scope: StoreScope, key: &str) -> Result<(), StorageError>;

    /// All keys currently present in a scope, unordered.
    async fn keys(&self, scope: StoreScope) -> Result<Vec<String>, StorageError>;

    /// Rough footprint of a scope. Backends that cannot measure return zeros.
    async fn usage(&self, scope: StoreScope) -> Result<StorageUsage, StorageError> {
        let _ = scope;
        Ok(StorageUsage::default())
    }
}
