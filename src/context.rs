//! Wiring of the runtime components for one page load.

use std::sync::Arc;

use tracing::{info, warn};

use pagetailor_action_runner::ActionExecutor;
use pagetailor_beacon_sink::{BeaconSink, HttpBeaconSink};
use pagetailor_core_types::{Clock, SystemClock, Viewport};
use pagetailor_dom_bridge::PageDom;
use pagetailor_event_bus::{InMemoryBus, JourneyUpdated, RuntimeSignalEvent};
use pagetailor_geo_cache::{CountryInfo, FixedGeoLookup, GeoLookup, HttpGeoLookup, SessionGeoCache};
use pagetailor_journey_recorder::{JourneyRecorder, JourneySeed};
use pagetailor_trigger_engine::{Rule, RuleEngine};
use pagetailor_visitor_identity::{snapshot_from_user_agent, IdentityProvider, LocalIdentityProvider};
use pagetailor_web_store::{FallbackStore, ScopedStore};

use crate::config::RuntimeConfig;

/// What the embedding host hands over: the live document, its storage,
/// and what it knows about the browser. Optional fields have working
/// defaults and exist as seams for tests and embedders.
pub struct HostEnvironment {
    pub dom: Arc<dyn PageDom>,
    pub store: Arc<dyn ScopedStore>,
    pub user_agent: String,
    pub viewport: Viewport,
    pub clock: Option<Arc<dyn Clock>>,
    pub geo_lookup: Option<Arc<dyn GeoLookup>>,
    pub beacon_sink: Option<Arc<dyn BeaconSink>>,
    /// Channel carrying journey-updated markers between tabs sharing the
    /// store. Each tab gets its own bus unless the host bridges one in.
    pub journey_bus: Option<Arc<InMemoryBus<JourneyUpdated>>>,
}

impl HostEnvironment {
    pub fn new(dom: Arc<dyn PageDom>, store: Arc<dyn ScopedStore>) -> Self {
        Self {
            dom,
            store,
            user_agent: String::new(),
            viewport: Viewport::default(),
            clock: None,
            geo_lookup: None,
            beacon_sink: None,
            journey_bus: None,
        }
    }

    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }

    pub fn with_viewport(mut self, viewport: Viewport) -> Self {
        self.viewport = viewport;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn with_geo_lookup(mut self, lookup: Arc<dyn GeoLookup>) -> Self {
        self.geo_lookup = Some(lookup);
        self
    }

    pub fn with_beacon_sink(mut self, sink: Arc<dyn BeaconSink>) -> Self {
        self.beacon_sink = Some(sink);
        self
    }

    pub fn with_journey_bus(mut self, bus: Arc<InMemoryBus<JourneyUpdated>>) -> Self {
        self.journey_bus = Some(bus);
        self
    }
}

/// Everything the page runtime needs, wired once per page load.
pub struct RuntimeContext {
    config: RuntimeConfig,
    store: Arc<FallbackStore>,
    identity: Arc<LocalIdentityProvider>,
    geo: Arc<SessionGeoCache>,
    recorder: Arc<JourneyRecorder>,
    executor: Arc<ActionExecutor>,
    engine: Arc<RuleEngine>,
    beacons: Option<Arc<dyn BeaconSink>>,
    signals: Arc<InMemoryBus<RuntimeSignalEvent>>,
    journey_bus: Arc<InMemoryBus<JourneyUpdated>>,
    clock: Arc<dyn Clock>,
}

impl RuntimeContext {
    /// Build the full component graph. Infallible by design: a component
    /// that cannot come up (geo client, beacon client) degrades to its
    /// inert form instead of failing the page.
    pub async fn initialize(
        config: RuntimeConfig,
        rules: Vec<Rule>,
        host: HostEnvironment,
    ) -> Arc<Self> {
        let clock: Arc<dyn Clock> = host.clock.unwrap_or_else(|| Arc::new(SystemClock));
        let store = Arc::new(FallbackStore::new(host.store));
        let store_dyn: Arc<dyn ScopedStore> = store.clone();

        let device = snapshot_from_user_agent(&host.user_agent, host.viewport);
        let identity = Arc::new(
            LocalIdentityProvider::establish(
                store_dyn.clone(),
                clock.clone(),
                config.session.timeout(),
                device.clone(),
            )
            .await,
        );

        let geo_lookup: Arc<dyn GeoLookup> = match host.geo_lookup {
            Some(lookup) => lookup,
            None if config.geo.enabled => match HttpGeoLookup::new(&config.geo.endpoint) {
                Ok(lookup) => Arc::new(lookup),
                Err(err) => {
                    warn!(%err, "geo client unavailable, country stays unknown");
                    Arc::new(FixedGeoLookup::returning(CountryInfo::unknown()))
                }
            },
            None => Arc::new(FixedGeoLookup::returning(CountryInfo::unknown())),
        };
        let geo = Arc::new(SessionGeoCache::new(geo_lookup, store_dyn.clone()));

        let journey_bus = host.journey_bus.unwrap_or_else(|| InMemoryBus::new(16));
        let recorder = Arc::new(
            JourneyRecorder::resume_or_start(
                store_dyn.clone(),
                journey_bus.clone(),
                clock.clone(),
                config.journey.recorder_config(),
                JourneySeed {
                    visitor_id: identity.visitor_id(),
                    session_id: identity.session_id(),
                    visit_number: identity.visit_count(),
                    device,
                },
            )
            .await,
        );

        let executor = Arc::new(ActionExecutor::new(host.dom));
        let signals = InMemoryBus::new(64);
        let engine = Arc::new(RuleEngine::new(
            rules,
            executor.clone(),
            recorder.clone(),
            clock.clone(),
            signals.clone(),
        ));

        let beacons: Option<Arc<dyn BeaconSink>> = match host.beacon_sink {
            Some(sink) => Some(sink),
            None if config.beacons.enabled => {
                match HttpBeaconSink::new(
                    &config.beacons.journey_endpoint,
                    &config.beacons.page_view_endpoint,
                ) {
                    Ok(sink) => Some(Arc::new(sink)),
                    Err(err) => {
                        warn!(%err, "beacon client unavailable, analytics stay local");
                        None
                    }
                }
            }
            None => None,
        };

        info!(
            visitor = identity.visitor_id().as_str(),
            session = identity.session_id().as_str(),
            visit = identity.visit_count(),
            rules = engine.rules().len(),
            "runtime context initialized"
        );

        Arc::new(Self {
            config,
            store,
            identity,
            geo,
            recorder,
            executor,
            engine,
            beacons,
            signals,
            journey_bus,
            clock,
        })
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<FallbackStore> {
        &self.store
    }

    pub fn identity(&self) -> &Arc<LocalIdentityProvider> {
        &self.identity
    }

    pub fn geo(&self) -> &Arc<SessionGeoCache> {
        &self.geo
    }

    pub fn recorder(&self) -> &Arc<JourneyRecorder> {
        &self.recorder
    }

    pub fn executor(&self) -> &Arc<ActionExecutor> {
        &self.executor
    }

    pub fn engine(&self) -> &Arc<RuleEngine> {
        &self.engine
    }

    pub fn beacons(&self) -> Option<&Arc<dyn BeaconSink>> {
        self.beacons.as_ref()
    }

    pub fn signals(&self) -> &Arc<InMemoryBus<RuntimeSignalEvent>> {
        &self.signals
    }

    pub fn journey_bus(&self) -> &Arc<InMemoryBus<JourneyUpdated>> {
        &self.journey_bus
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }
}
