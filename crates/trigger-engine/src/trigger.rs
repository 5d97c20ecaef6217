//! Trigger kinds.
//!
//! Every kind answers the same question against the same inputs: given
//! the signal that just happened and the journey as it stands, does this
//! condition hold? Momentary kinds (click, form, exit intent) are true
//! only for their own event; stateful kinds read accumulated journey
//! state and can be satisfied by any event they subscribe to.

use serde::{Deserialize, Serialize};

use pagetailor_core_types::DeviceType;
use pagetailor_event_bus::{RuntimeSignalEvent, SignalKind};
use pagetailor_journey_recorder::{JourneyAnalytics, PagePattern};

/// Everything a trigger may inspect during one evaluation.
pub struct EvalContext<'a> {
    pub event: &'a RuntimeSignalEvent,
    pub journey: &'a JourneyAnalytics,
    /// Time spent on the current page so far.
    pub page_elapsed_ms: u64,
    /// Max scroll depth reached on the current page.
    pub page_scroll_pct: u8,
    /// Paths visited this session, oldest first.
    pub visited_paths: &'a [String],
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum Trigger {
    PageVisitCount {
        at_least: u32,
    },
    TimeOnPage {
        ms: u64,
    },
    ScrollDepth {
        percent: u8,
    },
    UtmMatch {
        param: String,
        value: String,
    },
    DeviceType {
        device: DeviceType,
    },
    ElementClick {
        selector: String,
    },
    ExitIntent,
    FormInteraction {
        /// Substring of the field descriptor; `None` matches any form event.
        #[serde(default)]
        field_pattern: Option<String>,
    },
    UserJourney {
        pattern: PagePattern,
        #[serde(default)]
        min_intent: Option<f64>,
    },
}

impl Trigger {
    pub fn name(&self) -> &'static str {
        match self {
            Trigger::PageVisitCount { .. } => "page-visit-count",
            Trigger::TimeOnPage { .. } => "time-on-page",
            Trigger::ScrollDepth { .. } => "scroll-depth",
            Trigger::UtmMatch { .. } => "utm-match",
            Trigger::DeviceType { .. } => "device-type",
            Trigger::ElementClick { .. } => "element-click",
            Trigger::ExitIntent => "exit-intent",
            Trigger::FormInteraction { .. } => "form-interaction",
            Trigger::UserJourney { .. } => "user-journey",
        }
    }

    /// The signals whose arrival makes re-evaluating this kind worthwhile.
    pub fn interests(&self) -> &'static [SignalKind] {
        match self {
            Trigger::PageVisitCount { .. }
            | Trigger::UtmMatch { .. }
            | Trigger::DeviceType { .. } => &[SignalKind::PageLoad],
            Trigger::TimeOnPage { .. } => &[SignalKind::Timer],
            Trigger::ScrollDepth { .. } => &[SignalKind::Scroll],
            Trigger::ElementClick { .. } => &[SignalKind::Click],
            Trigger::ExitIntent => &[SignalKind::ExitIntent],
            Trigger::FormInteraction { .. } => &[SignalKind::Form],
            // Patterns complete on navigation, but the intent floor can be
            // crossed by interaction and scroll events too.
            Trigger::UserJourney { .. } => &[
                SignalKind::PageLoad,
                SignalKind::Click,
                SignalKind::Form,
                SignalKind::Scroll,
            ],
        }
    }

    pub fn evaluate(&self, ctx: &EvalContext<'_>) -> bool {
        match self {
            Trigger::PageVisitCount { at_least } => ctx.journey.page_count >= *at_least,
            Trigger::TimeOnPage { ms } => ctx.page_elapsed_ms >= *ms,
            Trigger::ScrollDepth { percent } => ctx.page_scroll_pct >= *percent,
            Trigger::UtmMatch { param, value } => ctx
                .journey
                .utm
                .as_ref()
                .and_then(|utm| utm.get(param))
                .is_some_and(|actual| actual.eq_ignore_ascii_case(value)),
            Trigger::DeviceType { device } => ctx.journey.device.device_type == *device,
            Trigger::ElementClick { selector } => matches!(
                ctx.event,
                RuntimeSignalEvent::Click { selector: clicked, .. }
                    if clicked.contains(selector.as_str())
            ),
            Trigger::ExitIntent => matches!(ctx.event, RuntimeSignalEvent::ExitIntent),
            Trigger::FormInteraction { field_pattern } => match ctx.event {
                RuntimeSignalEvent::FormInput { field, .. } => field_pattern
                    .as_ref()
                    .map_or(true, |pattern| {
                        field.to_ascii_lowercase().contains(&pattern.to_ascii_lowercase())
                    }),
                _ => false,
            },
            Trigger::UserJourney { pattern, min_intent } => {
                pattern.matches(ctx.visited_paths)
                    && min_intent.map_or(true, |floor| ctx.journey.intent_score >= floor)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pagetailor_core_types::{SessionId, VisitorId};
    use pagetailor_journey_recorder::Journey;

    fn analytics() -> JourneyAnalytics {
        Journey::start(
            VisitorId::new(),
            SessionId::new(),
            1,
            Default::default(),
            0,
        )
        .analytics(10_000)
    }

    fn ctx<'a>(
        event: &'a RuntimeSignalEvent,
        journey: &'a JourneyAnalytics,
        paths: &'a [String],
    ) -> EvalContext<'a> {
        EvalContext {
            event,
            journey,
            page_elapsed_ms: 0,
            page_scroll_pct: 0,
            visited_paths: paths,
        }
    }

    #[test]
    fn test_element_click_matches_selector_fragment() {
        let journey = analytics();
        let event = RuntimeSignalEvent::Click {
            selector: "button.cta.primary".into(),
            text: None,
        };
        let trigger = Trigger::ElementClick {
            selector: ".cta".into(),
        };
        assert!(trigger.evaluate(&ctx(&event, &journey, &[])));

        let other = RuntimeSignalEvent::Click {
            selector: "a.nav-link".into(),
            text: None,
        };
        assert!(!trigger.evaluate(&ctx(&other, &journey, &[])));
    }

    #[test]
    fn test_form_interaction_pattern_is_optional() {
        let journey = analytics();
        let event = RuntimeSignalEvent::FormInput {
            field: "Billing-Email".into(),
            value_present: true,
        };
        let any = Trigger::FormInteraction {
            field_pattern: None,
        };
        let email = Trigger::FormInteraction {
            field_pattern: Some("email".into()),
        };
        let phone = Trigger::FormInteraction {
            field_pattern: Some("phone".into()),
        };
        assert!(any.evaluate(&ctx(&event, &journey, &[])));
        assert!(email.evaluate(&ctx(&event, &journey, &[])));
        assert!(!phone.evaluate(&ctx(&event, &journey, &[])));
    }

    #[test]
    fn test_user_journey_requires_pattern_and_intent_floor() {
        let mut journey = analytics();
        journey.intent_score = 0.5;
        let paths = vec!["/products".to_string(), "/pricing".to_string()];
        let event = RuntimeSignalEvent::PageLoad(Default::default());

        let trigger = Trigger::UserJourney {
            pattern: PagePattern::sequence(["/products", "/pricing"]),
            min_intent: Some(0.4),
        };
        assert!(trigger.evaluate(&ctx(&event, &journey, &paths)));

        let strict = Trigger::UserJourney {
            pattern: PagePattern::sequence(["/products", "/pricing"]),
            min_intent: Some(0.9),
        };
        assert!(!strict.evaluate(&ctx(&event, &journey, &paths)));
    }

    #[test]
    fn test_trigger_json_shape() {
        let raw = r#"{"type":"scroll-depth","percent":50}"#;
        let trigger: Trigger = serde_json::from_str(raw).unwrap();
        assert_eq!(trigger.name(), "scroll-depth");
        assert_eq!(trigger.interests(), &[SignalKind::Scroll]);
    }
}
