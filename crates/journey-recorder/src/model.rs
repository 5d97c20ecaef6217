//! Journey data model.

use std::collections::{BTreeSet, HashMap};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use pagetailor_core_types::{DeviceSnapshot, SessionId, Viewport, VisitorId};

/// Bucketed view of the intent score.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IntentLevel {
    #[default]
    Low,
    Medium,
    High,
}

impl IntentLevel {
    pub const HIGH_FLOOR: f64 = 0.70;
    pub const MEDIUM_FLOOR: f64 = 0.40;

    pub fn from_score(score: f64) -> Self {
        if score >= Self::HIGH_FLOOR {
            IntentLevel::High
        } else if score >= Self::MEDIUM_FLOOR {
            IntentLevel::Medium
        } else {
            IntentLevel::Low
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            IntentLevel::Low => "low",
            IntentLevel::Medium => "medium",
            IntentLevel::High => "high",
        }
    }
}

/// One interaction reported by the host page.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct InteractionEvent {
    /// Open-ended type tag ("click", "form-input", host-defined kinds).
    pub event_type: String,
    /// Descriptor of the event target (selector, field name, link text).
    pub target: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,
    pub at_ms: i64,
    /// Sequence index of the page the event happened on.
    pub page_index: usize,
}

impl InteractionEvent {
    pub fn click(target: impl Into<String>, at_ms: i64) -> Self {
        Self {
            event_type: "click".to_string(),
            target: target.into(),
            payload: None,
            at_ms,
            page_index: 0,
        }
    }

    pub fn form_input(field: impl Into<String>, at_ms: i64) -> Self {
        Self {
            event_type: "form-input".to_string(),
            target: field.into(),
            payload: None,
            at_ms,
            page_index: 0,
        }
    }

    pub fn is_form_related(&self) -> bool {
        self.event_type.starts_with("form") || self.event_type == "submit"
    }
}

/// Why an interaction (or page view) counted toward purchase intent.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum IntentSignalKind {
    /// The page itself is a buying-stage page.
    HighIntentPage,
    /// The event target/type names a conversion action.
    ActionIntent,
    /// A form field that collects contact details was touched.
    ContactField,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct IntentSignal {
    pub kind: IntentSignalKind,
    /// The path, target or field that triggered the classification.
    pub detail: String,
    pub at_ms: i64,
}

/// First-touch campaign attribution captured from landing query parameters.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UtmAttribution {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub medium: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub campaign: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub term: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
}

impl UtmAttribution {
    /// Extract `utm_*` parameters; `None` when the query carries none.
    pub fn from_query(query: &HashMap<String, String>) -> Option<Self> {
        let pick = |key: &str| query.get(key).filter(|v| !v.is_empty()).cloned();
        let utm = Self {
            source: pick("utm_source"),
            medium: pick("utm_medium"),
            campaign: pick("utm_campaign"),
            term: pick("utm_term"),
            content: pick("utm_content"),
        };
        if utm == Self::default() {
            None
        } else {
            Some(utm)
        }
    }

    pub fn get(&self, parameter: &str) -> Option<&str> {
        match parameter {
            "utm_source" | "source" => self.source.as_deref(),
            "utm_medium" | "medium" => self.medium.as_deref(),
            "utm_campaign" | "campaign" => self.campaign.as_deref(),
            "utm_term" | "term" => self.term.as_deref(),
            "utm_content" | "content" => self.content.as_deref(),
            _ => None,
        }
    }
}

/// One navigation within the journey.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PageVisit {
    /// Monotonic sequence index, stable across trimming.
    pub index: usize,
    pub path: String,
    pub url: String,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub referrer: Option<String>,
    pub entered_at_ms: i64,
    /// Set when the visit is finalized by the next navigation or unload.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exited_at_ms: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<i64>,
    /// Monotonic within the page, 0..=100.
    pub max_scroll_pct: u8,
    #[serde(default)]
    pub interactions: Vec<InteractionEvent>,
    pub viewport: Viewport,
}

impl PageVisit {
    pub fn is_open(&self) -> bool {
        self.exited_at_ms.is_none()
    }
}

/// The full per-session record. Mutated only through the recorder;
/// serialized wholesale for persistence and cross-tab reloads.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Journey {
    pub visitor_id: VisitorId,
    pub session_id: SessionId,
    /// Lifetime session number for this visitor (1 = first visit).
    pub visit_number: u32,
    pub started_at_ms: i64,
    pub landing_page: Option<String>,
    pub device: DeviceSnapshot,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub utm: Option<UtmAttribution>,
    pub pages: Vec<PageVisit>,
    pub signals: Vec<IntentSignal>,
    pub intent_score: f64,
    pub intent_level: IntentLevel,
    /// Counters that survive trimming, so the score never regresses when
    /// old pages fall off the front of the list.
    pub events_total: u32,
    pub form_events: u32,
    pub high_intent_visits: u32,
    pub distinct_paths: BTreeSet<String>,
    pub next_page_index: usize,
    pub dropped_pages: u32,
    pub ended: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ended_at_ms: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_reason: Option<String>,
}

impl Journey {
    pub fn start(
        visitor_id: VisitorId,
        session_id: SessionId,
        visit_number: u32,
        device: DeviceSnapshot,
        started_at_ms: i64,
    ) -> Self {
        Self {
            visitor_id,
            session_id,
            visit_number,
            started_at_ms,
            landing_page: None,
            device,
            utm: None,
            pages: Vec::new(),
            signals: Vec::new(),
            intent_score: 0.0,
            intent_level: IntentLevel::Low,
            events_total: 0,
            form_events: 0,
            high_intent_visits: 0,
            distinct_paths: BTreeSet::new(),
            next_page_index: 0,
            dropped_pages: 0,
            ended: false,
            ended_at_ms: None,
            end_reason: None,
        }
    }

    pub fn current_page(&self) -> Option<&PageVisit> {
        self.pages.last().filter(|page| page.is_open())
    }

    pub fn current_page_mut(&mut self) -> Option<&mut PageVisit> {
        self.pages.last_mut().filter(|page| page.is_open())
    }

    /// Visited paths in order, oldest first. Pattern matching walks this.
    pub fn visited_paths(&self) -> Vec<&str> {
        self.pages.iter().map(|page| page.path.as_str()).collect()
    }

    pub fn session_duration_ms(&self, now_ms: i64) -> i64 {
        let end = self.ended_at_ms.unwrap_or(now_ms);
        (end - self.started_at_ms).max(0)
    }

    /// Read-only snapshot handed to triggers and beacons.
    pub fn analytics(&self, now_ms: i64) -> JourneyAnalytics {
        let closed_durations: Vec<i64> = self
            .pages
            .iter()
            .filter_map(|page| page.duration_ms)
            .collect();
        let avg_time_per_page_ms = if closed_durations.is_empty() {
            0
        } else {
            closed_durations.iter().sum::<i64>() / closed_durations.len() as i64
        };
        let avg_scroll_depth = if self.pages.is_empty() {
            0.0
        } else {
            self.pages
                .iter()
                .map(|page| f64::from(page.max_scroll_pct))
                .sum::<f64>()
                / self.pages.len() as f64
        };

        JourneyAnalytics {
            visitor_id: self.visitor_id.clone(),
            session_id: self.session_id.clone(),
            visit_number: self.visit_number,
            page_count: self.pages.len() as u32 + self.dropped_pages,
            event_count: self.events_total,
            signal_count: self.signals.len() as u32,
            intent_score: self.intent_score,
            intent_level: self.intent_level,
            session_duration_ms: self.session_duration_ms(now_ms),
            avg_time_per_page_ms,
            avg_scroll_depth,
            utm: self.utm.clone(),
            device: self.device.clone(),
            landing_page: self.landing_page.clone(),
            pages: self
                .pages
                .iter()
                .map(|page| PageSummary {
                    index: page.index,
                    path: page.path.clone(),
                    title: page.title.clone(),
                    duration_ms: page.duration_ms,
                    max_scroll_pct: page.max_scroll_pct,
                    interaction_count: page.interactions.len() as u32,
                })
                .collect(),
            is_final: self.ended,
        }
    }
}

/// Per-page line inside the analytics snapshot.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PageSummary {
    pub index: usize,
    pub path: String,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<i64>,
    pub max_scroll_pct: u8,
    pub interaction_count: u32,
}

/// Aggregated journey view: what triggers evaluate against and what the
/// outbound journey beacon carries.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct JourneyAnalytics {
    pub visitor_id: VisitorId,
    pub session_id: SessionId,
    pub visit_number: u32,
    pub page_count: u32,
    pub event_count: u32,
    pub signal_count: u32,
    pub intent_score: f64,
    pub intent_level: IntentLevel,
    pub session_duration_ms: i64,
    pub avg_time_per_page_ms: i64,
    pub avg_scroll_depth: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub utm: Option<UtmAttribution>,
    pub device: DeviceSnapshot,
    pub landing_page: Option<String>,
    pub pages: Vec<PageSummary>,
    pub is_final: bool,
}
