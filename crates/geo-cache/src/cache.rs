//! Once-per-session resolution.

use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{debug, warn};

use pagetailor_web_store::{keys, ScopedStore, StoreScope};

use crate::{CountryInfo, GeoLookup};

/// Wraps a [`GeoLookup`] so the session performs at most one real lookup.
///
/// The cached value lives in the session scope, so every page load of the
/// session reuses it. Failures are cached as [`CountryInfo::unknown`] and
/// never retried within the session; geography-gated rules simply stop
/// matching instead of hammering the endpoint.
pub struct SessionGeoCache {
    lookup: Arc<dyn GeoLookup>,
    store: Arc<dyn ScopedStore>,
    flight: Mutex<()>,
}

impl SessionGeoCache {
    pub fn new(lookup: Arc<dyn GeoLookup>, store: Arc<dyn ScopedStore>) -> Self {
        Self {
            lookup,
            store,
            flight: Mutex::new(()),
        }
    }

    /// Resolve the visitor's country, from cache when possible. Infallible:
    /// the worst case is `unknown`.
    pub async fn resolve(&self) -> CountryInfo {
        if let Some(cached) = self.read_cached().await {
            return cached;
        }

        // Single flight: the first caller does the lookup, everyone else
        // queues here and then finds the cache populated.
        let _guard = self.flight.lock().await;
        if let Some(cached) = self.read_cached().await {
            return cached;
        }

        let info = match self.lookup.lookup().await {
            Ok(info) => {
                debug!(country = %info.country_code, "country resolved");
                info
            }
            Err(err) => {
                warn!(%err, "geo lookup failed; caching unknown for this session");
                CountryInfo::unknown()
            }
        };
        self.write_cached(&info).await;
        info
    }

    async fn read_cached(&self) -> Option<CountryInfo> {
        match self.store.get(StoreScope::Session, keys::GEO).await {
            Ok(Some(raw)) => serde_json::from_str(&raw).ok(),
            _ => None,
        }
    }

    async fn write_cached(&self, info: &CountryInfo) {
        let raw = match serde_json::to_string(info) {
            Ok(raw) => raw,
            Err(_) => return,
        };
        if let Err(err) = self.store.set(StoreScope::Session, keys::GEO, &raw).await {
            warn!(%err, "geo result not cached");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::FixedGeoLookup;
    use pagetailor_web_store::MemoryStore;

    #[tokio::test]
    async fn test_lookup_happens_once_per_session() {
        let lookup = Arc::new(FixedGeoLookup::returning(CountryInfo::new("DE", "Germany")));
        let store = Arc::new(MemoryStore::new());
        let cache = SessionGeoCache::new(lookup.clone(), store.clone());

        assert_eq!(cache.resolve().await.country_code, "DE");
        assert_eq!(cache.resolve().await.country_code, "DE");
        assert_eq!(lookup.calls(), 1);

        // A second cache over the same session store reuses the entry too.
        let second = SessionGeoCache::new(lookup.clone(), store);
        assert_eq!(second.resolve().await.country_code, "DE");
        assert_eq!(lookup.calls(), 1);
    }

    #[tokio::test]
    async fn test_failure_cached_as_unknown_without_retry() {
        let lookup = Arc::new(FixedGeoLookup::failing());
        let store = Arc::new(MemoryStore::new());
        let cache = SessionGeoCache::new(lookup.clone(), store);

        assert!(!cache.resolve().await.is_known());
        assert!(!cache.resolve().await.is_known());
        assert_eq!(lookup.calls(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_resolvers_share_one_flight() {
        let lookup = Arc::new(FixedGeoLookup::returning(CountryInfo::new("FR", "France")));
        let store = Arc::new(MemoryStore::new());
        let cache = Arc::new(SessionGeoCache::new(lookup.clone(), store));

        let a = tokio::spawn({
            let cache = cache.clone();
            async move { cache.resolve().await }
        });
        let b = tokio::spawn({
            let cache = cache.clone();
            async move { cache.resolve().await }
        });

        assert_eq!(a.await.unwrap().country_code, "FR");
        assert_eq!(b.await.unwrap().country_code, "FR");
        assert_eq!(lookup.calls(), 1);
    }
}
