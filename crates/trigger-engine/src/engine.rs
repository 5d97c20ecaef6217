//! Rule evaluation engine.

use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use pagetailor_action_runner::{ActionExecutor, ExecOutcome};
use pagetailor_core_types::Clock;
use pagetailor_event_bus::{EventBus, InMemoryBus, RuntimeSignalEvent};
use pagetailor_journey_recorder::JourneyRecorder;

use crate::rule::Rule;
use crate::trigger::{EvalContext, Trigger};

/// One rule that fired, with the outcome of each of its actions.
#[derive(Clone, Debug)]
pub struct RuleFiring {
    pub rule_id: String,
    pub outcomes: Vec<ExecOutcome>,
}

/// Evaluates the installed rules against incoming signals and fires their
/// actions.
///
/// The engine owns the page-view boundary: a page load resets per-view
/// firing state and the executor's dedup set, re-arms time-on-page timers,
/// and unload cancels everything still pending.
pub struct RuleEngine {
    rules: Vec<Rule>,
    fired: Mutex<HashSet<usize>>,
    executor: Arc<ActionExecutor>,
    recorder: Arc<JourneyRecorder>,
    clock: Arc<dyn Clock>,
    signals: Arc<InMemoryBus<RuntimeSignalEvent>>,
    page_token: RwLock<CancellationToken>,
}

impl RuleEngine {
    pub fn new(
        rules: Vec<Rule>,
        executor: Arc<ActionExecutor>,
        recorder: Arc<JourneyRecorder>,
        clock: Arc<dyn Clock>,
        signals: Arc<InMemoryBus<RuntimeSignalEvent>>,
    ) -> Self {
        Self {
            rules,
            fired: Mutex::new(HashSet::new()),
            executor,
            recorder,
            clock,
            signals,
            page_token: RwLock::new(CancellationToken::new()),
        }
    }

    pub fn rules(&self) -> &[Rule] {
        &self.rules
    }

    /// Evaluate one signal. Returns the rules that fired on it.
    pub async fn handle(&self, event: &RuntimeSignalEvent) -> Vec<RuleFiring> {
        match event {
            RuntimeSignalEvent::PageLoad(_) => {
                self.fired.lock().clear();
                self.executor.reset_page_view();
                self.arm_page_timers();
            }
            RuntimeSignalEvent::Unload => {
                self.page_token.read().cancel();
                self.executor.cancel_all();
                return Vec::new();
            }
            _ => {}
        }

        let kind = event.kind();
        let now_ms = self.clock.now_ms();
        let snapshot = self.recorder.snapshot();
        let analytics = snapshot.analytics(now_ms);
        let (entered_at_ms, recorded_scroll) = snapshot
            .current_page()
            .map(|page| (page.entered_at_ms, page.max_scroll_pct))
            .unwrap_or((now_ms, 0));

        let mut page_elapsed_ms = now_ms.saturating_sub(entered_at_ms).max(0) as u64;
        if let RuntimeSignalEvent::TimerTick { elapsed_on_page_ms } = event {
            // Armed timers carry their own measurement; trust whichever
            // clock has advanced further.
            page_elapsed_ms = page_elapsed_ms.max(*elapsed_on_page_ms);
        }
        let mut page_scroll_pct = recorded_scroll;
        if let RuntimeSignalEvent::ScrollTick { depth_percent } = event {
            page_scroll_pct = page_scroll_pct.max((*depth_percent).min(100));
        }
        let visited_paths: Vec<String> = snapshot
            .pages
            .iter()
            .map(|page| page.path.clone())
            .collect();

        let ctx = EvalContext {
            event,
            journey: &analytics,
            page_elapsed_ms,
            page_scroll_pct,
            visited_paths: &visited_paths,
        };

        let mut firings = Vec::new();
        for (index, rule) in self.rules.iter().enumerate() {
            if !rule.interested_in(kind) {
                continue;
            }
            if !rule.refire && self.fired.lock().contains(&index) {
                continue;
            }
            if !rule.evaluate(&ctx) {
                continue;
            }
            self.fired.lock().insert(index);

            let mut outcomes = Vec::with_capacity(rule.actions.len());
            for action in &rule.actions {
                outcomes.push(self.executor.execute(action).await);
            }
            info!(rule = %rule.id, signal = kind.name(), "rule fired");
            firings.push(RuleFiring {
                rule_id: rule.id.clone(),
                outcomes,
            });
        }
        firings
    }

    /// One timer per distinct time-on-page threshold; each publishes a
    /// tick back onto the signal bus when it elapses, unless the page
    /// view ends first.
    fn arm_page_timers(&self) {
        let fresh = CancellationToken::new();
        let old = {
            let mut token = self.page_token.write();
            std::mem::replace(&mut *token, fresh.clone())
        };
        old.cancel();

        let thresholds: BTreeSet<u64> = self
            .rules
            .iter()
            .flat_map(|rule| rule.triggers.iter())
            .filter_map(|trigger| match trigger {
                Trigger::TimeOnPage { ms } => Some(*ms),
                _ => None,
            })
            .collect();

        for ms in thresholds {
            let bus = self.signals.clone();
            let token = fresh.clone();
            tokio::spawn(async move {
                tokio::select! {
                    _ = token.cancelled() => {}
                    _ = tokio::time::sleep(Duration::from_millis(ms)) => {
                        debug!(ms, "time-on-page threshold reached");
                        let _ = bus
                            .publish(RuntimeSignalEvent::TimerTick { elapsed_on_page_ms: ms })
                            .await;
                    }
                }
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pagetailor_action_runner::{ActionDescriptor, ActionKind, ActionSpec, ActionTarget};
    use pagetailor_core_types::{
        DeviceSnapshot, ManualClock, SessionId, Viewport, VisitorId,
    };
    use pagetailor_dom_bridge::{ElementSpec, MemoryDom};
    use pagetailor_element_locator::{SelectorStrategy, StrategyKind};
    use pagetailor_event_bus::PageNavigation;
    use pagetailor_journey_recorder::{JourneySeed, PagePattern, RecorderConfig};
    use pagetailor_web_store::MemoryStore;

    struct Stack {
        dom: Arc<MemoryDom>,
        clock: Arc<ManualClock>,
        recorder: Arc<JourneyRecorder>,
        signals: Arc<InMemoryBus<RuntimeSignalEvent>>,
        executor: Arc<ActionExecutor>,
    }

    fn stack() -> Stack {
        let dom = Arc::new(MemoryDom::new());
        dom.insert(ElementSpec::new("h1").with_id("headline").with_text("Hello"));
        let clock = Arc::new(ManualClock::starting_at(0));
        let recorder = Arc::new(JourneyRecorder::start(
            Arc::new(MemoryStore::new()),
            InMemoryBus::new(16),
            clock.clone(),
            RecorderConfig::default(),
            JourneySeed {
                visitor_id: VisitorId::new(),
                session_id: SessionId::new(),
                visit_number: 1,
                device: DeviceSnapshot::default(),
            },
        ));
        Stack {
            executor: Arc::new(ActionExecutor::new(dom.clone())),
            dom,
            clock,
            recorder,
            signals: InMemoryBus::new(16),
        }
    }

    fn engine_with(stack: &Stack, rules: Vec<Rule>) -> RuleEngine {
        RuleEngine::new(
            rules,
            stack.executor.clone(),
            stack.recorder.clone(),
            stack.clock.clone(),
            stack.signals.clone(),
        )
    }

    fn overlay_rule(id: &str, triggers: Vec<Trigger>, refire: bool) -> Rule {
        Rule {
            id: id.into(),
            description: None,
            triggers,
            actions: vec![ActionSpec::new(ActionDescriptor::new(
                ActionKind::ShowOverlay {
                    html: "<p>offer</p>".into(),
                    position: Default::default(),
                },
            ))],
            refire,
        }
    }

    async fn load_page(stack: &Stack, engine: &RuleEngine, path: &str) -> Vec<RuleFiring> {
        let nav = PageNavigation::new(path, format!("https://shop.test{path}"), path);
        stack
            .recorder
            .record_page_visit(&nav, Viewport::default())
            .await;
        engine.handle(&RuntimeSignalEvent::PageLoad(nav)).await
    }

    #[tokio::test]
    async fn test_scroll_rule_fires_once_per_page_view() {
        let stack = stack();
        let engine = engine_with(
            &stack,
            vec![overlay_rule(
                "scroll-offer",
                vec![Trigger::ScrollDepth { percent: 50 }],
                false,
            )],
        );

        load_page(&stack, &engine, "/").await;
        stack.recorder.update_scroll_depth(30).await;
        assert!(engine
            .handle(&RuntimeSignalEvent::ScrollTick { depth_percent: 30 })
            .await
            .is_empty());

        stack.recorder.update_scroll_depth(60).await;
        let firings = engine
            .handle(&RuntimeSignalEvent::ScrollTick { depth_percent: 60 })
            .await;
        assert_eq!(firings.len(), 1);
        assert_eq!(firings[0].rule_id, "scroll-offer");
        assert!(matches!(firings[0].outcomes[0], ExecOutcome::Applied { .. }));

        // Deeper scrolling on the same page view stays quiet.
        stack.recorder.update_scroll_depth(90).await;
        assert!(engine
            .handle(&RuntimeSignalEvent::ScrollTick { depth_percent: 90 })
            .await
            .is_empty());
        assert_eq!(stack.dom.overlays().len(), 1);
    }

    #[tokio::test]
    async fn test_refire_reaches_executor_dedup() {
        let stack = stack();
        let engine = engine_with(
            &stack,
            vec![overlay_rule(
                "eager",
                vec![Trigger::ScrollDepth { percent: 10 }],
                true,
            )],
        );

        load_page(&stack, &engine, "/").await;
        stack.recorder.update_scroll_depth(20).await;
        let first = engine
            .handle(&RuntimeSignalEvent::ScrollTick { depth_percent: 20 })
            .await;
        assert!(matches!(first[0].outcomes[0], ExecOutcome::Applied { .. }));

        stack.recorder.update_scroll_depth(40).await;
        let second = engine
            .handle(&RuntimeSignalEvent::ScrollTick { depth_percent: 40 })
            .await;
        // The rule re-fires, and the executor's dedup absorbs the repeat.
        assert_eq!(second[0].outcomes[0], ExecOutcome::Duplicate);
    }

    #[tokio::test]
    async fn test_conjunction_waits_for_both_conditions() {
        let stack = stack();
        let engine = engine_with(
            &stack,
            vec![overlay_rule(
                "engaged",
                vec![
                    Trigger::TimeOnPage { ms: 5_000 },
                    Trigger::ScrollDepth { percent: 50 },
                ],
                false,
            )],
        );

        load_page(&stack, &engine, "/").await;
        stack.recorder.update_scroll_depth(70).await;
        stack.clock.advance_ms(1_000);
        assert!(engine
            .handle(&RuntimeSignalEvent::ScrollTick { depth_percent: 70 })
            .await
            .is_empty());

        stack.clock.advance_ms(5_000);
        let firings = engine
            .handle(&RuntimeSignalEvent::TimerTick {
                elapsed_on_page_ms: 6_000,
            })
            .await;
        assert_eq!(firings.len(), 1);
    }

    #[tokio::test]
    async fn test_utm_and_device_fire_on_page_load() {
        let stack = stack();
        let engine = engine_with(
            &stack,
            vec![overlay_rule(
                "campaign",
                vec![
                    Trigger::UtmMatch {
                        param: "utm_source".into(),
                        value: "newsletter".into(),
                    },
                    Trigger::DeviceType {
                        device: pagetailor_core_types::DeviceType::Desktop,
                    },
                ],
                false,
            )],
        );

        let nav = PageNavigation::new("/landing", "https://shop.test/landing", "Landing")
            .with_query("utm_source", "Newsletter");
        stack
            .recorder
            .record_page_visit(&nav, Viewport::default())
            .await;
        let firings = engine.handle(&RuntimeSignalEvent::PageLoad(nav)).await;
        assert_eq!(firings.len(), 1);
    }

    #[tokio::test]
    async fn test_user_journey_rule_completes_on_navigation() {
        let stack = stack();
        let engine = engine_with(
            &stack,
            vec![overlay_rule(
                "funnel",
                vec![Trigger::UserJourney {
                    pattern: PagePattern::sequence(["/products", "/pricing"]),
                    min_intent: None,
                }],
                false,
            )],
        );

        assert!(load_page(&stack, &engine, "/products").await.is_empty());
        let firings = load_page(&stack, &engine, "/pricing").await;
        assert_eq!(firings.len(), 1);
    }

    #[tokio::test]
    async fn test_click_rule_targets_matching_selector() {
        let stack = stack();
        let engine = engine_with(
            &stack,
            vec![overlay_rule(
                "cta-click",
                vec![Trigger::ElementClick {
                    selector: ".cta".into(),
                }],
                false,
            )],
        );

        load_page(&stack, &engine, "/").await;
        assert!(engine
            .handle(&RuntimeSignalEvent::Click {
                selector: "a.nav".into(),
                text: None,
            })
            .await
            .is_empty());
        let firings = engine
            .handle(&RuntimeSignalEvent::Click {
                selector: "button.cta".into(),
                text: Some("Buy".into()),
            })
            .await;
        assert_eq!(firings.len(), 1);
    }

    #[tokio::test]
    async fn test_navigation_resets_rule_and_dedup_state() {
        let stack = stack();
        let engine = engine_with(
            &stack,
            vec![overlay_rule(
                "exit",
                vec![Trigger::ExitIntent],
                false,
            )],
        );

        load_page(&stack, &engine, "/").await;
        let first = engine.handle(&RuntimeSignalEvent::ExitIntent).await;
        assert!(matches!(first[0].outcomes[0], ExecOutcome::Applied { .. }));

        load_page(&stack, &engine, "/pricing").await;
        let second = engine.handle(&RuntimeSignalEvent::ExitIntent).await;
        assert!(
            matches!(second[0].outcomes[0], ExecOutcome::Applied { .. }),
            "fresh page view fires and mutates again"
        );
        assert_eq!(stack.dom.overlays().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_page_load_arms_time_on_page_timer() {
        let stack = stack();
        let engine = engine_with(
            &stack,
            vec![overlay_rule(
                "dwell",
                vec![Trigger::TimeOnPage { ms: 3_000 }],
                false,
            )],
        );
        let mut ticks = stack.signals.subscribe();

        load_page(&stack, &engine, "/").await;
        // Let the spawned timer task register its sleep before the paused
        // clock moves.
        for _ in 0..20 {
            tokio::task::yield_now().await;
        }
        tokio::time::advance(Duration::from_millis(3_000)).await;
        for _ in 0..20 {
            tokio::task::yield_now().await;
        }

        let tick = ticks.try_recv().expect("armed timer publishes a tick");
        assert!(matches!(
            tick,
            RuntimeSignalEvent::TimerTick {
                elapsed_on_page_ms: 3_000
            }
        ));

        // Feeding the tick back through the engine fires the rule even
        // though the wall clock stood still.
        let firings = engine.handle(&tick).await;
        assert_eq!(firings.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unload_cancels_armed_timers() {
        let stack = stack();
        let engine = engine_with(
            &stack,
            vec![overlay_rule(
                "dwell",
                vec![Trigger::TimeOnPage { ms: 2_000 }],
                false,
            )],
        );
        let mut ticks = stack.signals.subscribe();

        load_page(&stack, &engine, "/").await;
        engine.handle(&RuntimeSignalEvent::Unload).await;
        tokio::time::advance(Duration::from_millis(2_000)).await;
        for _ in 0..20 {
            tokio::task::yield_now().await;
        }
        assert!(ticks.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_targeted_action_runs_against_dom() {
        let stack = stack();
        let rule = Rule {
            id: "headline-swap".into(),
            description: None,
            triggers: vec![Trigger::PageVisitCount { at_least: 1 }],
            actions: vec![ActionSpec::new(ActionDescriptor::new(
                ActionKind::ReplaceText {
                    new_text: "Welcome back".into(),
                    original_text: Some("Hello".into()),
                },
            ))
            .with_target(ActionTarget::new(vec![SelectorStrategy::new(
                "#headline",
                StrategyKind::Id,
            )]))],
            refire: false,
        };
        let engine = engine_with(&stack, vec![rule]);

        let firings = load_page(&stack, &engine, "/").await;
        assert_eq!(firings.len(), 1);
        assert_eq!(stack.dom.text_of(1).as_deref(), Some("Welcome back"));
    }
}
