//! Intent classification and scoring.
//!
//! The weights and caps are hand-tuned heuristics carried over as-is.
//! Nobody has validated them against conversion data, which is exactly
//! why they live in config instead of being buried as constants.

use serde::{Deserialize, Serialize};

use crate::model::{IntentSignalKind, InteractionEvent};

/// Page-path fragments that mark buying-stage pages.
pub const HIGH_INTENT_PATHS: &[&str] = &[
    "pricing", "checkout", "cart", "purchase", "signup", "trial", "demo", "contact",
];

/// Target/type fragments that mark conversion actions.
pub const ACTION_INTENT_PATTERNS: &[&str] = &[
    "add-to-cart",
    "start-trial",
    "request-demo",
    "contact-sales",
    "checkout",
];

/// Form-field fragments that mark contact-detail collection.
pub const CONTACT_FIELD_PATTERNS: &[&str] = &["email", "phone", "company", "name", "address"];

/// Weighted-sum parameters. Each component contributes
/// `weight * min(value, cap) / cap`; the clamped total is the score.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IntentWeights {
    pub high_intent_pages: f64,
    pub high_intent_pages_cap: u32,
    pub form_interactions: f64,
    pub form_interactions_cap: u32,
    pub session_minutes: f64,
    pub session_minutes_cap: u32,
    pub page_depth: f64,
    pub page_depth_cap: u32,
    pub return_visit: f64,
    pub return_visit_cap: u32,
    pub signal_count: f64,
    pub signal_count_cap: u32,
    pub scroll_depth: f64,
}

impl Default for IntentWeights {
    fn default() -> Self {
        Self {
            high_intent_pages: 0.25,
            high_intent_pages_cap: 2,
            form_interactions: 0.20,
            form_interactions_cap: 3,
            session_minutes: 0.15,
            session_minutes_cap: 10,
            page_depth: 0.10,
            page_depth_cap: 10,
            return_visit: 0.15,
            return_visit_cap: 5,
            signal_count: 0.20,
            signal_count_cap: 3,
            scroll_depth: 0.10,
        }
    }
}

/// Raw counters the score is computed from.
#[derive(Clone, Copy, Debug, Default)]
pub struct ScoreInputs {
    pub high_intent_pages: u32,
    pub form_interactions: u32,
    pub session_minutes: f64,
    pub distinct_pages: u32,
    pub visit_number: u32,
    pub signal_count: u32,
    /// Mean of per-page max scroll depth, 0..=100.
    pub avg_scroll_pct: f64,
}

fn capped(value: f64, cap: f64, weight: f64) -> f64 {
    if cap <= 0.0 {
        return 0.0;
    }
    weight * (value.min(cap).max(0.0) / cap)
}

/// Weighted capped sum, clamped to [0, 1].
pub fn compute_score(inputs: &ScoreInputs, weights: &IntentWeights) -> f64 {
    let return_visits = inputs.visit_number.saturating_sub(1);
    let score = capped(
        f64::from(inputs.high_intent_pages),
        f64::from(weights.high_intent_pages_cap),
        weights.high_intent_pages,
    ) + capped(
        f64::from(inputs.form_interactions),
        f64::from(weights.form_interactions_cap),
        weights.form_interactions,
    ) + capped(
        inputs.session_minutes,
        f64::from(weights.session_minutes_cap),
        weights.session_minutes,
    ) + capped(
        f64::from(inputs.distinct_pages),
        f64::from(weights.page_depth_cap),
        weights.page_depth,
    ) + capped(
        f64::from(return_visits),
        f64::from(weights.return_visit_cap),
        weights.return_visit,
    ) + capped(
        f64::from(inputs.signal_count),
        f64::from(weights.signal_count_cap),
        weights.signal_count,
    ) + capped(inputs.avg_scroll_pct, 100.0, weights.scroll_depth);

    score.clamp(0.0, 1.0)
}

fn contains_any(haystack: &str, patterns: &[&str]) -> bool {
    let lowered = haystack.to_ascii_lowercase();
    patterns.iter().any(|pattern| lowered.contains(pattern))
}

/// True when the path names a buying-stage page.
pub fn is_high_intent_path(path: &str) -> bool {
    contains_any(path, HIGH_INTENT_PATHS)
}

/// Classify an interaction against the page it happened on. `None` means
/// the event carries no intent weight.
pub fn classify_event(event: &InteractionEvent, page_path: &str) -> Option<IntentSignalKind> {
    if event.is_form_related() && contains_any(&event.target, CONTACT_FIELD_PATTERNS) {
        return Some(IntentSignalKind::ContactField);
    }
    if contains_any(&event.target, ACTION_INTENT_PATTERNS)
        || contains_any(&event.event_type, ACTION_INTENT_PATTERNS)
    {
        return Some(IntentSignalKind::ActionIntent);
    }
    if is_high_intent_path(page_path) {
        return Some(IntentSignalKind::HighIntentPage);
    }
    None
}
