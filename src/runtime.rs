//! The page runtime: host signals in, personalization out.

use std::sync::Arc;

use parking_lot::Mutex;
use serde::Serialize;
use serde_json::json;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use pagetailor_beacon_sink::{JourneyUpdateBeacon, PageViewBeacon};
use pagetailor_event_bus::{EventBus, RuntimeSignalEvent};
use pagetailor_journey_recorder::JourneyAnalytics;
use pagetailor_trigger_engine::RuleFiring;
use pagetailor_visitor_identity::IdentityProvider;
use pagetailor_web_store::{ScopedStore, StorageUsage, StoreScope};

use crate::context::RuntimeContext;

/// Per-scope slice of the storage compliance report.
#[derive(Clone, Debug, Serialize)]
pub struct ScopeReport {
    pub entries: usize,
    pub bytes: usize,
    /// Keys this runtime owns, `pt_` prefixed.
    pub engine_keys: Vec<String>,
    /// Keys belonging to the host page, counted but never touched.
    pub foreign_keys: usize,
}

/// What lives in web storage right now, for compliance review.
#[derive(Clone, Debug, Serialize)]
pub struct StorageReport {
    pub degraded: bool,
    pub session: ScopeReport,
    pub durable: ScopeReport,
}

/// Single-dispatch front door. The host feeds every signal through
/// [`PageRuntime::handle`]; background pumps feed armed timer ticks and
/// cross-tab journey reloads back through the same path.
pub struct PageRuntime {
    ctx: Arc<RuntimeContext>,
    beaconed_page_index: Mutex<Option<usize>>,
    pumps: Mutex<Vec<JoinHandle<()>>>,
}

impl PageRuntime {
    pub fn start(ctx: Arc<RuntimeContext>) -> Arc<Self> {
        let runtime = Arc::new(Self {
            ctx,
            beaconed_page_index: Mutex::new(None),
            pumps: Mutex::new(Vec::new()),
        });
        runtime.spawn_timer_pump();
        runtime.spawn_reload_pump();
        runtime
    }

    pub fn context(&self) -> &Arc<RuntimeContext> {
        &self.ctx
    }

    /// Dispatch one signal: record it, evaluate rules, emit beacons.
    /// Never fails; a runtime that cannot keep up simply personalizes less.
    pub async fn handle(&self, event: RuntimeSignalEvent) -> Vec<RuleFiring> {
        let ctx = &self.ctx;

        // Armed timer ticks are self-generated, not visitor activity.
        if !matches!(event, RuntimeSignalEvent::TimerTick { .. }) {
            ctx.identity().touch().await;
        }

        let version_before = ctx.recorder().version();
        match &event {
            RuntimeSignalEvent::PageLoad(nav) => {
                let viewport = ctx.identity().device().viewport;
                ctx.recorder().record_page_visit(nav, viewport).await;
                self.emit_page_view_beacon(&nav.url);
            }
            RuntimeSignalEvent::ScrollTick { depth_percent } => {
                ctx.recorder().update_scroll_depth(*depth_percent).await;
            }
            RuntimeSignalEvent::Click { selector, text } => {
                let payload = text.as_ref().map(|text| json!({ "text": text }));
                ctx.recorder().record_event("click", selector, payload).await;
            }
            RuntimeSignalEvent::FormInput {
                field,
                value_present,
            } => {
                ctx.recorder()
                    .record_event("form_input", field, Some(json!({ "filled": value_present })))
                    .await;
            }
            RuntimeSignalEvent::Unload => {
                ctx.recorder().end("unload").await;
            }
            RuntimeSignalEvent::TimerTick { .. }
            | RuntimeSignalEvent::ExitIntent
            | RuntimeSignalEvent::VisibilityChange { .. } => {}
        }

        let firings = ctx.engine().handle(&event).await;

        if matches!(event, RuntimeSignalEvent::Unload) {
            self.emit_journey_beacon().await;
        } else if ctx.recorder().version() != version_before {
            self.emit_journey_beacon().await;
        }
        firings
    }

    /// Current journey analytics, computed on demand.
    pub fn analytics_snapshot(&self) -> JourneyAnalytics {
        self.ctx.recorder().analytics()
    }

    /// Wipe the journey and its persisted state ("forget me").
    pub async fn clear_journey(&self) {
        self.ctx.recorder().clear().await;
        *self.beaconed_page_index.lock() = None;
    }

    /// Inventory of what the runtime keeps in web storage.
    pub async fn storage_usage(&self) -> StorageReport {
        StorageReport {
            degraded: self.ctx.store().is_degraded(),
            session: self.scope_report(StoreScope::Session).await,
            durable: self.scope_report(StoreScope::Durable).await,
        }
    }

    async fn scope_report(&self, scope: StoreScope) -> ScopeReport {
        let store = self.ctx.store();
        let usage = store
            .usage(scope)
            .await
            .unwrap_or(StorageUsage { entries: 0, bytes: 0 });
        let keys = store.keys(scope).await.unwrap_or_default();
        let (engine_keys, foreign): (Vec<String>, Vec<String>) = keys
            .into_iter()
            .partition(|key| pagetailor_web_store::keys::is_engine_key(key));
        ScopeReport {
            entries: usage.entries,
            bytes: usage.bytes,
            engine_keys,
            foreign_keys: foreign.len(),
        }
    }

    /// Stop background pumps. Idempotent; dropping the runtime does the
    /// same.
    pub fn shutdown(&self) {
        for pump in self.pumps.lock().drain(..) {
            pump.abort();
        }
    }

    /// One page-view beacon per recorded navigation.
    fn emit_page_view_beacon(&self, url: &str) {
        let Some(sink) = self.ctx.beacons().cloned() else {
            return;
        };
        let page_index = self.ctx.recorder().snapshot().next_page_index;
        {
            let mut beaconed = self.beaconed_page_index.lock();
            if *beaconed == Some(page_index) {
                debug!(url, "page view already beaconed");
                return;
            }
            *beaconed = Some(page_index);
        }

        let identity = self.ctx.identity().clone();
        let geo = self.ctx.geo().clone();
        let timestamp_ms = self.ctx.clock().now_ms();
        let url = url.to_string();
        tokio::spawn(async move {
            let country = geo.resolve().await;
            let device = identity.device();
            let beacon = PageViewBeacon::new(
                identity.visitor_id(),
                identity.session_id(),
                identity.anonymous_name(),
                url,
                timestamp_ms,
                &device,
                country.country_code,
            );
            sink.send_page_view(beacon).await;
        });
    }

    async fn emit_journey_beacon(&self) {
        let Some(sink) = self.ctx.beacons() else {
            return;
        };
        let beacon = JourneyUpdateBeacon::new(
            self.ctx.identity().anonymous_name(),
            self.ctx.recorder().analytics(),
        );
        sink.send_journey_update(beacon).await;
    }

    /// Armed time-on-page timers publish ticks onto the signal bus; this
    /// pump feeds them back through the normal dispatch path.
    fn spawn_timer_pump(self: &Arc<Self>) {
        let mut rx = self.ctx.signals().subscribe();
        let weak = Arc::downgrade(self);
        let pump = tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(event @ RuntimeSignalEvent::TimerTick { .. }) => {
                        let Some(runtime) = weak.upgrade() else { break };
                        runtime.handle(event).await;
                    }
                    Ok(_) => {}
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(skipped, "timer pump lagged");
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        });
        self.pumps.lock().push(pump);
    }

    /// Another tab persisted a newer journey snapshot; adopt it.
    fn spawn_reload_pump(self: &Arc<Self>) {
        let mut rx = self.ctx.journey_bus().subscribe();
        let weak = Arc::downgrade(self);
        let pump = tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(update) => {
                        let Some(runtime) = weak.upgrade() else { break };
                        runtime
                            .ctx
                            .recorder()
                            .reload_if_newer(update.version)
                            .await;
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(skipped, "journey reload pump lagged");
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        });
        self.pumps.lock().push(pump);
    }
}

impl Drop for PageRuntime {
    fn drop(&mut self) {
        self.shutdown();
    }
}
