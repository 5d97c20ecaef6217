//! The stateful journey recorder.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use serde_json::Value;
use tracing::{debug, warn};

use pagetailor_core_types::{Clock, DeviceSnapshot, SessionId, Viewport, VisitorId};
use pagetailor_event_bus::{EventBus, InMemoryBus, JourneyUpdated, PageNavigation};
use pagetailor_web_store::{keys, ScopedStore, StoreScope};

use crate::intent::{classify_event, is_high_intent_path, IntentWeights, ScoreInputs};
use crate::model::{
    IntentLevel, IntentSignal, IntentSignalKind, InteractionEvent, Journey, JourneyAnalytics,
    PageVisit,
};
use crate::pattern::PagePattern;

/// Identity facts the journey is born with.
#[derive(Clone, Debug)]
pub struct JourneySeed {
    pub visitor_id: VisitorId,
    pub session_id: SessionId,
    pub visit_number: u32,
    pub device: DeviceSnapshot,
}

#[derive(Clone, Debug)]
pub struct RecorderConfig {
    /// Oldest pages are dropped beyond this length.
    pub max_pages: usize,
    pub weights: IntentWeights,
}

impl Default for RecorderConfig {
    fn default() -> Self {
        Self {
            max_pages: 50,
            weights: IntentWeights::default(),
        }
    }
}

/// Owns the journey for the lifetime of the browsing session.
///
/// Every mutation recomputes the intent score, serializes the whole
/// journey to the session scope, bumps a version marker in the durable
/// scope and announces the new version on the bus. Peers holding the same
/// stores reload wholesale when they observe a version above their own;
/// nothing ever merges.
pub struct JourneyRecorder {
    store: Arc<dyn ScopedStore>,
    bus: Arc<InMemoryBus<JourneyUpdated>>,
    clock: Arc<dyn Clock>,
    weights: IntentWeights,
    max_pages: usize,
    journey: RwLock<Journey>,
    version: AtomicU64,
}

impl JourneyRecorder {
    /// Fresh journey for a brand-new session.
    pub fn start(
        store: Arc<dyn ScopedStore>,
        bus: Arc<InMemoryBus<JourneyUpdated>>,
        clock: Arc<dyn Clock>,
        config: RecorderConfig,
        seed: JourneySeed,
    ) -> Self {
        let journey = Journey::start(
            seed.visitor_id,
            seed.session_id,
            seed.visit_number,
            seed.device,
            clock.now_ms(),
        );
        Self {
            store,
            bus,
            clock,
            weights: config.weights,
            max_pages: config.max_pages.max(1),
            journey: RwLock::new(journey),
            version: AtomicU64::new(0),
        }
    }

    /// Resume the persisted journey when it belongs to `seed`'s session,
    /// otherwise start fresh. This is what every page load after the first
    /// goes through.
    pub async fn resume_or_start(
        store: Arc<dyn ScopedStore>,
        bus: Arc<InMemoryBus<JourneyUpdated>>,
        clock: Arc<dyn Clock>,
        config: RecorderConfig,
        seed: JourneySeed,
    ) -> Self {
        let stored: Option<Journey> = match store.get(StoreScope::Session, keys::JOURNEY).await {
            Ok(Some(raw)) => match serde_json::from_str(&raw) {
                Ok(journey) => Some(journey),
                Err(err) => {
                    warn!(%err, "persisted journey unparseable; starting fresh");
                    None
                }
            },
            Ok(None) => None,
            Err(err) => {
                warn!(%err, "journey not readable; starting fresh");
                None
            }
        };

        match stored {
            Some(journey) if journey.session_id == seed.session_id && !journey.ended => {
                let version = match store.get(StoreScope::Durable, keys::JOURNEY_VERSION).await {
                    Ok(Some(raw)) => raw.parse::<u64>().unwrap_or(0),
                    _ => 0,
                };
                debug!(pages = journey.pages.len(), version, "journey resumed");
                Self {
                    store,
                    bus,
                    clock,
                    weights: config.weights,
                    max_pages: config.max_pages.max(1),
                    journey: RwLock::new(journey),
                    version: AtomicU64::new(version),
                }
            }
            _ => Self::start(store, bus, clock, config, seed),
        }
    }

    /// Called once per navigation. Finalizes the open page visit, then
    /// appends the new one and trims past the length bound.
    pub async fn record_page_visit(&self, nav: &PageNavigation, viewport: Viewport) {
        let now_ms = self.clock.now_ms();
        let persist = {
            let mut journey = self.journey.write();
            finalize_open_page(&mut journey, now_ms);

            let index = journey.next_page_index;
            journey.next_page_index += 1;
            if journey.landing_page.is_none() {
                journey.landing_page = Some(nav.path.clone());
            }
            if journey.utm.is_none() {
                journey.utm = crate::model::UtmAttribution::from_query(&nav.query);
            }

            journey.pages.push(PageVisit {
                index,
                path: nav.path.clone(),
                url: nav.url.clone(),
                title: nav.title.clone(),
                referrer: nav.referrer.clone(),
                entered_at_ms: now_ms,
                exited_at_ms: None,
                duration_ms: None,
                max_scroll_pct: 0,
                interactions: Vec::new(),
                viewport,
            });
            journey.distinct_paths.insert(nav.path.clone());

            if is_high_intent_path(&nav.path) {
                journey.high_intent_visits += 1;
                journey.signals.push(IntentSignal {
                    kind: IntentSignalKind::HighIntentPage,
                    detail: nav.path.clone(),
                    at_ms: now_ms,
                });
            }

            while journey.pages.len() > self.max_pages {
                journey.pages.remove(0);
                journey.dropped_pages += 1;
            }

            self.recompute(&mut journey, now_ms);
            self.stage_persist(&journey)
        };
        self.flush(persist).await;
    }

    /// Record one interaction on the currently open page. Events arriving
    /// before the first navigation have no page to live on and are dropped.
    pub async fn record_event(&self, event_type: &str, target: &str, payload: Option<Value>) {
        let now_ms = self.clock.now_ms();
        let persist = {
            let mut journey = self.journey.write();
            let Some(page) = journey.current_page_mut() else {
                debug!(event_type, "interaction before first page visit dropped");
                return;
            };
            let page_index = page.index;
            let page_path = page.path.clone();
            let event = InteractionEvent {
                event_type: event_type.to_string(),
                target: target.to_string(),
                payload,
                at_ms: now_ms,
                page_index,
            };
            let form_related = event.is_form_related();
            let classified = classify_event(&event, &page_path);
            page.interactions.push(event);

            journey.events_total += 1;
            if form_related {
                journey.form_events += 1;
            }
            if let Some(kind) = classified {
                journey.signals.push(IntentSignal {
                    kind,
                    detail: target.to_string(),
                    at_ms: now_ms,
                });
            }

            self.recompute(&mut journey, now_ms);
            self.stage_persist(&journey)
        };
        self.flush(persist).await;
    }

    /// Scroll depth is monotonic within a page; lower samples are ignored
    /// and cause no write.
    pub async fn update_scroll_depth(&self, pct: u8) {
        let pct = pct.min(100);
        let now_ms = self.clock.now_ms();
        let persist = {
            let mut journey = self.journey.write();
            let Some(page) = journey.current_page_mut() else {
                return;
            };
            if pct <= page.max_scroll_pct {
                return;
            }
            page.max_scroll_pct = pct;
            self.recompute(&mut journey, now_ms);
            self.stage_persist(&journey)
        };
        self.flush(persist).await;
    }

    /// Mark the journey final on unload.
    pub async fn end(&self, reason: &str) {
        let now_ms = self.clock.now_ms();
        let persist = {
            let mut journey = self.journey.write();
            if journey.ended {
                return;
            }
            finalize_open_page(&mut journey, now_ms);
            journey.ended = true;
            journey.ended_at_ms = Some(now_ms);
            journey.end_reason = Some(reason.to_string());
            self.recompute(&mut journey, now_ms);
            self.stage_persist(&journey)
        };
        self.flush(persist).await;
    }

    /// Throw the journey away and start over under the same identity.
    pub async fn clear(&self) {
        let persist = {
            let mut journey = self.journey.write();
            let fresh = Journey::start(
                journey.visitor_id.clone(),
                journey.session_id.clone(),
                journey.visit_number,
                journey.device.clone(),
                self.clock.now_ms(),
            );
            *journey = fresh;
            self.stage_persist(&journey)
        };
        self.flush(persist).await;
    }

    pub fn analytics(&self) -> JourneyAnalytics {
        self.journey.read().analytics(self.clock.now_ms())
    }

    pub fn matches_pattern(&self, pattern: &PagePattern) -> bool {
        let journey = self.journey.read();
        pattern.matches(&journey.visited_paths())
    }

    pub fn intent_score(&self) -> f64 {
        self.journey.read().intent_score
    }

    pub fn intent_level(&self) -> IntentLevel {
        self.journey.read().intent_level
    }

    pub fn visited_paths(&self) -> Vec<String> {
        self.journey
            .read()
            .pages
            .iter()
            .map(|page| page.path.clone())
            .collect()
    }

    /// Full copy of the journey for introspection surfaces.
    pub fn snapshot(&self) -> Journey {
        self.journey.read().clone()
    }

    pub fn version(&self) -> u64 {
        self.version.load(Ordering::SeqCst)
    }

    /// Adopt the persisted journey when a peer announced a version above
    /// our own. Returns true when state was replaced.
    pub async fn reload_if_newer(&self, announced: u64) -> bool {
        if announced <= self.version() {
            return false;
        }
        let raw = match self.store.get(StoreScope::Session, keys::JOURNEY).await {
            Ok(Some(raw)) => raw,
            Ok(None) => return false,
            Err(err) => {
                warn!(%err, "peer journey not readable");
                return false;
            }
        };
        let incoming: Journey = match serde_json::from_str(&raw) {
            Ok(journey) => journey,
            Err(err) => {
                warn!(%err, "peer journey unparseable");
                return false;
            }
        };
        {
            let mut journey = self.journey.write();
            if incoming.session_id != journey.session_id {
                debug!("peer journey belongs to another session; ignored");
                return false;
            }
            *journey = incoming;
        }
        self.version.store(announced, Ordering::SeqCst);
        debug!(version = announced, "journey reloaded from peer update");
        true
    }

    fn recompute(&self, journey: &mut Journey, now_ms: i64) {
        let avg_scroll_pct = if journey.pages.is_empty() {
            0.0
        } else {
            journey
                .pages
                .iter()
                .map(|page| f64::from(page.max_scroll_pct))
                .sum::<f64>()
                / journey.pages.len() as f64
        };
        let inputs = ScoreInputs {
            high_intent_pages: journey.high_intent_visits,
            form_interactions: journey.form_events,
            session_minutes: journey.session_duration_ms(now_ms) as f64 / 60_000.0,
            distinct_pages: journey.distinct_paths.len() as u32,
            visit_number: journey.visit_number,
            signal_count: journey.signals.len() as u32,
            avg_scroll_pct,
        };
        journey.intent_score = crate::intent::compute_score(&inputs, &self.weights);
        journey.intent_level = IntentLevel::from_score(journey.intent_score);
    }

    /// Serialize under the lock so the JSON/version pair stays consistent.
    fn stage_persist(&self, journey: &Journey) -> Option<(String, SessionId, u64)> {
        let version = self.version.fetch_add(1, Ordering::SeqCst) + 1;
        match serde_json::to_string(journey) {
            Ok(raw) => Some((raw, journey.session_id.clone(), version)),
            Err(err) => {
                warn!(%err, "journey not serializable");
                None
            }
        }
    }

    async fn flush(&self, staged: Option<(String, SessionId, u64)>) {
        let Some((raw, session, version)) = staged else {
            return;
        };
        if let Err(err) = self
            .store
            .set(StoreScope::Session, keys::JOURNEY, &raw)
            .await
        {
            warn!(%err, "journey not persisted");
        }
        if let Err(err) = self
            .store
            .set(StoreScope::Durable, keys::JOURNEY_VERSION, &version.to_string())
            .await
        {
            warn!(%err, "journey version marker not written");
        }
        let _ = self.bus.publish(JourneyUpdated { session, version }).await;
    }
}

fn finalize_open_page(journey: &mut Journey, now_ms: i64) {
    if let Some(page) = journey.current_page_mut() {
        page.exited_at_ms = Some(now_ms);
        page.duration_ms = Some((now_ms - page.entered_at_ms).max(0));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pagetailor_core_types::ManualClock;
    use pagetailor_web_store::MemoryStore;

    fn seed() -> JourneySeed {
        JourneySeed {
            visitor_id: VisitorId::new(),
            session_id: SessionId::new(),
            visit_number: 1,
            device: DeviceSnapshot::default(),
        }
    }

    fn recorder_with(
        store: Arc<MemoryStore>,
        clock: Arc<ManualClock>,
        config: RecorderConfig,
        seed: JourneySeed,
    ) -> JourneyRecorder {
        let bus = InMemoryBus::new(16);
        JourneyRecorder::start(store, bus, clock, config, seed)
    }

    fn nav(path: &str) -> PageNavigation {
        PageNavigation::new(path, format!("https://shop.test{path}"), path.trim_matches('/'))
    }

    #[tokio::test]
    async fn test_navigation_finalizes_previous_page() {
        let clock = Arc::new(ManualClock::starting_at(1_000));
        let recorder = recorder_with(
            Arc::new(MemoryStore::new()),
            clock.clone(),
            RecorderConfig::default(),
            seed(),
        );

        recorder.record_page_visit(&nav("/"), Viewport::default()).await;
        clock.advance_ms(8_000);
        recorder.record_page_visit(&nav("/products"), Viewport::default()).await;

        let snapshot = recorder.snapshot();
        assert_eq!(snapshot.pages.len(), 2);
        assert_eq!(snapshot.pages[0].duration_ms, Some(8_000));
        assert!(snapshot.pages[0].exited_at_ms.is_some());
        assert!(snapshot.pages[1].is_open());
        assert_eq!(snapshot.landing_page.as_deref(), Some("/"));
    }

    #[tokio::test]
    async fn test_trim_keeps_counts_and_indices() {
        let clock = Arc::new(ManualClock::starting_at(0));
        let recorder = recorder_with(
            Arc::new(MemoryStore::new()),
            clock.clone(),
            RecorderConfig {
                max_pages: 3,
                ..Default::default()
            },
            seed(),
        );

        for step in 0..5 {
            recorder
                .record_page_visit(&nav(&format!("/page-{step}")), Viewport::default())
                .await;
            clock.advance_ms(1_000);
        }

        let snapshot = recorder.snapshot();
        assert_eq!(snapshot.pages.len(), 3);
        assert_eq!(snapshot.dropped_pages, 2);
        assert_eq!(snapshot.pages[0].index, 2);
        assert_eq!(recorder.analytics().page_count, 5);
        assert_eq!(snapshot.distinct_paths.len(), 5);
    }

    #[tokio::test]
    async fn test_scroll_depth_is_monotonic_per_page() {
        let clock = Arc::new(ManualClock::starting_at(0));
        let recorder = recorder_with(
            Arc::new(MemoryStore::new()),
            clock,
            RecorderConfig::default(),
            seed(),
        );

        recorder.record_page_visit(&nav("/"), Viewport::default()).await;
        recorder.update_scroll_depth(40).await;
        recorder.update_scroll_depth(25).await;
        recorder.update_scroll_depth(80).await;
        recorder.update_scroll_depth(200).await;

        assert_eq!(recorder.snapshot().pages[0].max_scroll_pct, 100);

        recorder.record_page_visit(&nav("/next"), Viewport::default()).await;
        assert_eq!(recorder.snapshot().pages[1].max_scroll_pct, 0);
    }

    #[tokio::test]
    async fn test_events_classify_and_raise_score() {
        let clock = Arc::new(ManualClock::starting_at(0));
        let recorder = recorder_with(
            Arc::new(MemoryStore::new()),
            clock,
            RecorderConfig::default(),
            seed(),
        );

        recorder.record_page_visit(&nav("/pricing"), Viewport::default()).await;
        let after_nav = recorder.intent_score();
        assert!(after_nav > 0.0);

        recorder
            .record_event("form-input", "work-email", None)
            .await;
        let snapshot = recorder.snapshot();
        assert!(recorder.intent_score() > after_nav);
        assert_eq!(snapshot.form_events, 1);
        assert!(snapshot
            .signals
            .iter()
            .any(|signal| signal.kind == IntentSignalKind::ContactField));
        assert_eq!(snapshot.pages[0].interactions.len(), 1);
    }

    #[tokio::test]
    async fn test_event_before_first_page_is_dropped() {
        let clock = Arc::new(ManualClock::starting_at(0));
        let recorder = recorder_with(
            Arc::new(MemoryStore::new()),
            clock,
            RecorderConfig::default(),
            seed(),
        );
        recorder.record_event("click", "#cta", None).await;
        assert_eq!(recorder.snapshot().events_total, 0);
    }

    #[tokio::test]
    async fn test_end_marks_final_and_closes_page() {
        let clock = Arc::new(ManualClock::starting_at(0));
        let recorder = recorder_with(
            Arc::new(MemoryStore::new()),
            clock.clone(),
            RecorderConfig::default(),
            seed(),
        );
        recorder.record_page_visit(&nav("/"), Viewport::default()).await;
        clock.advance_ms(2_500);
        recorder.end("unload").await;

        let analytics = recorder.analytics();
        assert!(analytics.is_final);
        let snapshot = recorder.snapshot();
        assert_eq!(snapshot.pages[0].duration_ms, Some(2_500));
        assert_eq!(snapshot.end_reason.as_deref(), Some("unload"));
    }

    #[tokio::test]
    async fn test_round_trip_resume_reproduces_analytics() {
        let store = Arc::new(MemoryStore::new());
        let clock = Arc::new(ManualClock::starting_at(0));
        let bus = InMemoryBus::new(16);
        let seed = seed();

        let first = JourneyRecorder::start(
            store.clone(),
            bus.clone(),
            clock.clone(),
            RecorderConfig::default(),
            seed.clone(),
        );
        first.record_page_visit(&nav("/pricing"), Viewport::default()).await;
        first.record_event("click", "start-trial", None).await;
        first.update_scroll_depth(60).await;
        let before = first.analytics();

        let resumed = JourneyRecorder::resume_or_start(
            store,
            bus,
            clock,
            RecorderConfig::default(),
            seed,
        )
        .await;
        let after = resumed.analytics();

        assert_eq!(after.page_count, before.page_count);
        assert_eq!(after.event_count, before.event_count);
        assert_eq!(after.signal_count, before.signal_count);
        assert!((after.intent_score - before.intent_score).abs() < 1e-9);
        assert_eq!(resumed.version(), first.version());
    }

    #[tokio::test]
    async fn test_peer_update_reloads_state() {
        let store = Arc::new(MemoryStore::new());
        let clock = Arc::new(ManualClock::starting_at(0));
        let bus = InMemoryBus::new(16);
        let seed = seed();

        let writer = JourneyRecorder::start(
            store.clone(),
            bus.clone(),
            clock.clone(),
            RecorderConfig::default(),
            seed.clone(),
        );
        let reader = JourneyRecorder::start(
            store,
            bus.clone(),
            clock,
            RecorderConfig::default(),
            seed,
        );
        let mut updates = bus.subscribe();

        writer.record_page_visit(&nav("/products"), Viewport::default()).await;
        let announced = updates.recv().await.unwrap();

        assert!(reader.reload_if_newer(announced.version).await);
        assert_eq!(reader.visited_paths(), vec!["/products".to_string()]);
        // Replaying the same version is a no-op.
        assert!(!reader.reload_if_newer(announced.version).await);
    }

    #[tokio::test]
    async fn test_clear_resets_journey() {
        let clock = Arc::new(ManualClock::starting_at(0));
        let recorder = recorder_with(
            Arc::new(MemoryStore::new()),
            clock,
            RecorderConfig::default(),
            seed(),
        );
        recorder.record_page_visit(&nav("/pricing"), Viewport::default()).await;
        recorder.clear().await;

        let snapshot = recorder.snapshot();
        assert!(snapshot.pages.is_empty());
        assert_eq!(snapshot.events_total, 0);
        assert_eq!(recorder.intent_score(), 0.0);
    }

    #[tokio::test]
    async fn test_storage_failure_does_not_break_recording() {
        let store = Arc::new(MemoryStore::new());
        store.set_unavailable(true);
        let clock = Arc::new(ManualClock::starting_at(0));
        let recorder = recorder_with(store, clock, RecorderConfig::default(), seed());

        recorder.record_page_visit(&nav("/pricing"), Viewport::default()).await;
        assert_eq!(recorder.snapshot().pages.len(), 1);
        assert!(recorder.intent_score() > 0.0);
    }
}
