//! Storage-backed identity provider.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use pagetailor_core_types::{Clock, DeviceSnapshot, SessionId, VisitorId};
use pagetailor_web_store::{keys, ScopedStore, StoreScope};

use crate::{names, IdentityProvider};

/// Session state kept in the ephemeral scope.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SessionRecord {
    pub id: SessionId,
    pub started_at_ms: i64,
    pub last_activity_ms: i64,
}

#[derive(Debug, Serialize, Deserialize)]
struct VisitorRecord {
    id: String,
    first_seen_ms: i64,
}

/// Default [`IdentityProvider`]: visitor id and visit counter in the
/// durable scope, session record in the session scope. Establishing never
/// fails; a dead store just means this page load gets a throwaway identity.
pub struct LocalIdentityProvider {
    store: Arc<dyn ScopedStore>,
    clock: Arc<dyn Clock>,
    visitor: VisitorId,
    first_seen_ms: i64,
    visit_count: u32,
    new_session: bool,
    device: DeviceSnapshot,
    session: RwLock<SessionRecord>,
}

impl LocalIdentityProvider {
    /// Load or create identity state for this page load. Rotates the
    /// session (and bumps the visit counter) when the previous one idled
    /// past `session_timeout`.
    pub async fn establish(
        store: Arc<dyn ScopedStore>,
        clock: Arc<dyn Clock>,
        session_timeout: Duration,
        device: DeviceSnapshot,
    ) -> Self {
        let now_ms = clock.now_ms();

        let (visitor, first_seen_ms) =
            match read_json::<VisitorRecord>(&store, StoreScope::Durable, keys::VISITOR_ID).await {
                Some(record) => (VisitorId(record.id), record.first_seen_ms),
                None => {
                    let visitor = VisitorId::new();
                    write_json(
                        &store,
                        StoreScope::Durable,
                        keys::VISITOR_ID,
                        &VisitorRecord {
                            id: visitor.as_str().to_string(),
                            first_seen_ms: now_ms,
                        },
                    )
                    .await;
                    debug!(visitor = %visitor, "new visitor id minted");
                    (visitor, now_ms)
                }
            };

        let stored_count = match store.get(StoreScope::Durable, keys::VISIT_COUNT).await {
            Ok(Some(raw)) => raw.parse::<u32>().unwrap_or(0),
            Ok(None) => 0,
            Err(err) => {
                warn!(%err, "visit counter unreadable; assuming zero");
                0
            }
        };

        let timeout_ms = session_timeout.as_millis() as i64;
        let previous =
            read_json::<SessionRecord>(&store, StoreScope::Session, keys::SESSION).await;

        let (session, visit_count, new_session) = match previous {
            Some(mut record) if now_ms.saturating_sub(record.last_activity_ms) <= timeout_ms => {
                record.last_activity_ms = now_ms;
                (record, stored_count.max(1), false)
            }
            stale => {
                if stale.is_some() {
                    debug!("session idled out; rotating");
                }
                let count = stored_count.saturating_add(1);
                if let Err(err) = store
                    .set(StoreScope::Durable, keys::VISIT_COUNT, &count.to_string())
                    .await
                {
                    warn!(%err, "visit counter not persisted");
                }
                let record = SessionRecord {
                    id: SessionId::new(),
                    started_at_ms: now_ms,
                    last_activity_ms: now_ms,
                };
                (record, count, true)
            }
        };

        write_json(&store, StoreScope::Session, keys::SESSION, &session).await;

        Self {
            store,
            clock,
            visitor,
            first_seen_ms,
            visit_count,
            new_session,
            device,
            session: RwLock::new(session),
        }
    }

    /// True when this page load started a fresh session.
    pub fn is_new_session(&self) -> bool {
        self.new_session
    }

    pub fn session_record(&self) -> SessionRecord {
        self.session.read().clone()
    }
}

#[async_trait]
impl IdentityProvider for LocalIdentityProvider {
    fn visitor_id(&self) -> VisitorId {
        self.visitor.clone()
    }

    fn session_id(&self) -> SessionId {
        self.session.read().id.clone()
    }

    fn anonymous_name(&self) -> String {
        names::anonymous_name(self.visitor.as_str())
    }

    fn visit_count(&self) -> u32 {
        self.visit_count
    }

    fn days_since_first_visit(&self) -> u32 {
        let elapsed = self.clock.now_ms().saturating_sub(self.first_seen_ms);
        (elapsed / 86_400_000).max(0) as u32
    }

    fn device(&self) -> DeviceSnapshot {
        self.device.clone()
    }

    async fn touch(&self) {
        let record = {
            let mut session = self.session.write();
            session.last_activity_ms = self.clock.now_ms();
            session.clone()
        };
        write_json(&self.store, StoreScope::Session, keys::SESSION, &record).await;
    }
}

async fn read_json<T: DeserializeOwned>(
    store: &Arc<dyn ScopedStore>,
    scope: StoreScope,
    key: &str,
) -> Option<T> {
    match store.get(scope, key).await {
        Ok(Some(raw)) => match serde_json::from_str(&raw) {
            Ok(value) => Some(value),
            Err(err) => {
                warn!(%err, key, "stored record unparseable; discarding");
                None
            }
        },
        Ok(None) => None,
        Err(err) => {
            warn!(%err, key, "storage read failed");
            None
        }
    }
}

async fn write_json<T: Serialize>(
    store: &Arc<dyn ScopedStore>,
    scope: StoreScope,
    key: &str,
    value: &T,
) {
    let raw = match serde_json::to_string(value) {
        Ok(raw) => raw,
        Err(err) => {
            warn!(%err, key, "record not serializable");
            return;
        }
    };
    if let Err(err) = store.set(scope, key, &raw).await {
        warn!(%err, key, "storage write failed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pagetailor_core_types::ManualClock;
    use pagetailor_web_store::MemoryStore;

    const TIMEOUT: Duration = Duration::from_secs(30 * 60);

    async fn provider(
        store: Arc<MemoryStore>,
        clock: Arc<ManualClock>,
    ) -> LocalIdentityProvider {
        LocalIdentityProvider::establish(store, clock, TIMEOUT, DeviceSnapshot::default()).await
    }

    #[tokio::test]
    async fn test_visitor_id_survives_page_loads() {
        let store = Arc::new(MemoryStore::new());
        let clock = Arc::new(ManualClock::starting_at(1_000));

        let first = provider(store.clone(), clock.clone()).await;
        let second = provider(store.clone(), clock.clone()).await;

        assert_eq!(first.visitor_id(), second.visitor_id());
        assert_eq!(first.anonymous_name(), second.anonymous_name());
    }

    #[tokio::test]
    async fn test_session_resumes_within_timeout() {
        let store = Arc::new(MemoryStore::new());
        let clock = Arc::new(ManualClock::starting_at(1_000));

        let first = provider(store.clone(), clock.clone()).await;
        clock.advance_ms(5 * 60 * 1_000);
        let second = provider(store.clone(), clock.clone()).await;

        assert_eq!(first.session_id(), second.session_id());
        assert!(!second.is_new_session());
        assert_eq!(second.visit_count(), 1);
    }

    #[tokio::test]
    async fn test_session_rotates_after_idle_timeout() {
        let store = Arc::new(MemoryStore::new());
        let clock = Arc::new(ManualClock::starting_at(1_000));

        let first = provider(store.clone(), clock.clone()).await;
        clock.advance_ms(31 * 60 * 1_000);
        let second = provider(store.clone(), clock.clone()).await;

        assert_ne!(first.session_id(), second.session_id());
        assert!(second.is_new_session());
        assert_eq!(second.visit_count(), 2);
        assert!(!second.is_new_visitor());
    }

    #[tokio::test]
    async fn test_touch_keeps_session_alive() {
        let store = Arc::new(MemoryStore::new());
        let clock = Arc::new(ManualClock::starting_at(1_000));

        let first = provider(store.clone(), clock.clone()).await;
        // Activity at minute 20 resets the idle window, so minute 40 still
        // falls inside it.
        clock.advance_ms(20 * 60 * 1_000);
        first.touch().await;
        clock.advance_ms(20 * 60 * 1_000);

        let second = provider(store.clone(), clock.clone()).await;
        assert_eq!(first.session_id(), second.session_id());
    }

    #[tokio::test]
    async fn test_dead_storage_still_yields_identity() {
        let store = Arc::new(MemoryStore::new());
        store.set_unavailable(true);
        let clock = Arc::new(ManualClock::starting_at(1_000));

        let provider = provider(store, clock).await;
        assert!(!provider.visitor_id().as_str().is_empty());
        assert_eq!(provider.visit_count(), 1);
        assert!(provider.is_new_visitor());
    }

    #[tokio::test]
    async fn test_days_since_first_visit() {
        let store = Arc::new(MemoryStore::new());
        let clock = Arc::new(ManualClock::starting_at(1_000));

        let first = provider(store.clone(), clock.clone()).await;
        assert_eq!(first.days_since_first_visit(), 0);

        clock.advance_ms(3 * 86_400_000 + 5_000);
        assert_eq!(first.days_since_first_visit(), 3);
    }
}
