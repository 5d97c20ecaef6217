//! Canonical runtime signals.
//!
//! Everything the host page reports to the engine flows through these
//! payloads: navigations, interaction events, timer ticks and lifecycle
//! transitions. Trigger kinds subscribe to the [`SignalKind`]s they care
//! about instead of polling.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use pagetailor_core_types::SessionId;

/// Discriminant used by trigger kinds to declare which signals they
/// re-evaluate on.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SignalKind {
    PageLoad,
    Scroll,
    Timer,
    Click,
    Form,
    ExitIntent,
    Visibility,
    Unload,
}

impl SignalKind {
    pub fn name(&self) -> &'static str {
        match self {
            SignalKind::PageLoad => "page-load",
            SignalKind::Scroll => "scroll",
            SignalKind::Timer => "timer",
            SignalKind::Click => "click",
            SignalKind::Form => "form",
            SignalKind::ExitIntent => "exit-intent",
            SignalKind::Visibility => "visibility",
            SignalKind::Unload => "unload",
        }
    }
}

/// Navigation payload captured when a page load is reported.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct PageNavigation {
    pub path: String,
    pub url: String,
    pub title: String,
    pub referrer: Option<String>,
    /// Query parameters already split out of the URL (UTM capture reads these).
    #[serde(default)]
    pub query: HashMap<String, String>,
}

impl PageNavigation {
    pub fn new(path: impl Into<String>, url: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            url: url.into(),
            title: title.into(),
            referrer: None,
            query: HashMap::new(),
        }
    }

    pub fn with_referrer(mut self, referrer: impl Into<String>) -> Self {
        self.referrer = Some(referrer.into());
        self
    }

    pub fn with_query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.insert(key.into(), value.into());
        self
    }
}

/// One signal from the host page, dispatched through the page runtime and
/// broadcast on the bus for rule evaluation.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum RuntimeSignalEvent {
    PageLoad(PageNavigation),
    ScrollTick {
        depth_percent: u8,
    },
    TimerTick {
        elapsed_on_page_ms: u64,
    },
    Click {
        selector: String,
        #[serde(default)]
        text: Option<String>,
    },
    FormInput {
        field: String,
        #[serde(default)]
        value_present: bool,
    },
    ExitIntent,
    VisibilityChange {
        hidden: bool,
    },
    Unload,
}

impl RuntimeSignalEvent {
    pub fn kind(&self) -> SignalKind {
        match self {
            RuntimeSignalEvent::PageLoad(_) => SignalKind::PageLoad,
            RuntimeSignalEvent::ScrollTick { .. } => SignalKind::Scroll,
            RuntimeSignalEvent::TimerTick { .. } => SignalKind::Timer,
            RuntimeSignalEvent::Click { .. } => SignalKind::Click,
            RuntimeSignalEvent::FormInput { .. } => SignalKind::Form,
            RuntimeSignalEvent::ExitIntent => SignalKind::ExitIntent,
            RuntimeSignalEvent::VisibilityChange { .. } => SignalKind::Visibility,
            RuntimeSignalEvent::Unload => SignalKind::Unload,
        }
    }
}

/// Cross-tab notification: the journey serialized under `session` moved to
/// `version`. Subscribers reload the full state; the marker carries no data.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct JourneyUpdated {
    pub session: SessionId,
    pub version: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signal_kind_mapping() {
        let nav = RuntimeSignalEvent::PageLoad(PageNavigation::new("/", "https://x.test/", "Home"));
        assert_eq!(nav.kind(), SignalKind::PageLoad);
        assert_eq!(RuntimeSignalEvent::ExitIntent.kind(), SignalKind::ExitIntent);
        assert_eq!(
            RuntimeSignalEvent::ScrollTick { depth_percent: 40 }.kind(),
            SignalKind::Scroll
        );
    }

    #[test]
    fn test_navigation_builder_collects_query() {
        let nav = PageNavigation::new("/pricing", "https://x.test/pricing?utm_source=ad", "Pricing")
            .with_query("utm_source", "ad")
            .with_referrer("https://google.com");
        assert_eq!(nav.query.get("utm_source").map(String::as_str), Some("ad"));
        assert_eq!(nav.referrer.as_deref(), Some("https://google.com"));
    }

    #[test]
    fn test_signal_serde_tagged() {
        let json = serde_json::to_string(&RuntimeSignalEvent::ScrollTick { depth_percent: 55 })
            .unwrap();
        assert!(json.contains("\"type\":\"scroll-tick\""));
        let back: RuntimeSignalEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(back.kind(), SignalKind::Scroll);
    }
}
