//! Outbound analytics beacons.
//!
//! Beacons are best-effort by contract: the page never waits on one and a
//! failed send costs nothing but a debug line. [`HttpBeaconSink`] posts from
//! a detached task; [`MemoryBeaconSink`] captures beacons for assertions.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use pagetailor_core_types::{DeviceSnapshot, DeviceType, SessionId, VisitorId};
use pagetailor_journey_recorder::JourneyAnalytics;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(4);

#[derive(Debug, Error)]
pub enum BeaconError {
    #[error("network send failed: {0}")]
    NetworkSendFailed(#[from] reqwest::Error),
}

/// Journey snapshot pushed on every meaningful journey mutation, and once
/// more on unload with `is_final` set.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct JourneyUpdateBeacon {
    pub visitor_id: VisitorId,
    pub session_id: SessionId,
    pub anonymous_name: String,
    pub is_final: bool,
    pub analytics: JourneyAnalytics,
}

impl JourneyUpdateBeacon {
    pub fn new(anonymous_name: impl Into<String>, analytics: JourneyAnalytics) -> Self {
        Self {
            visitor_id: analytics.visitor_id.clone(),
            session_id: analytics.session_id.clone(),
            anonymous_name: anonymous_name.into(),
            is_final: analytics.is_final,
            analytics,
        }
    }
}

/// One row per navigation.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PageViewBeacon {
    pub visitor_id: VisitorId,
    pub session_id: SessionId,
    pub anonymous_name: String,
    pub url: String,
    pub timestamp_ms: i64,
    pub device_type: DeviceType,
    pub country_code: String,
    pub browser: String,
}

impl PageViewBeacon {
    pub fn new(
        visitor_id: VisitorId,
        session_id: SessionId,
        anonymous_name: impl Into<String>,
        url: impl Into<String>,
        timestamp_ms: i64,
        device: &DeviceSnapshot,
        country_code: impl Into<String>,
    ) -> Self {
        Self {
            visitor_id,
            session_id,
            anonymous_name: anonymous_name.into(),
            url: url.into(),
            timestamp_ms,
            device_type: device.device_type,
            country_code: country_code.into(),
            browser: device.browser.clone(),
        }
    }
}

/// Outbound transport. Implementations must return promptly; delivery is
/// not guaranteed and is never retried.
#[async_trait]
pub trait BeaconSink: Send + Sync {
    async fn send_journey_update(&self, beacon: JourneyUpdateBeacon);

    async fn send_page_view(&self, beacon: PageViewBeacon);
}

/// POSTs beacons from detached tasks so the caller resumes immediately.
pub struct HttpBeaconSink {
    client: Client,
    journey_endpoint: String,
    page_view_endpoint: String,
}

impl HttpBeaconSink {
    pub fn new(
        journey_endpoint: impl Into<String>,
        page_view_endpoint: impl Into<String>,
    ) -> Result<Self, BeaconError> {
        let client = Client::builder().timeout(DEFAULT_TIMEOUT).build()?;
        Ok(Self {
            client,
            journey_endpoint: journey_endpoint.into(),
            page_view_endpoint: page_view_endpoint.into(),
        })
    }

    fn post_detached<B: Serialize>(&self, endpoint: &str, label: &'static str, body: &B) {
        let request = self.client.post(endpoint).json(body);
        tokio::spawn(async move {
            match request.send().await {
                Ok(response) if response.status().is_success() => {}
                Ok(response) => {
                    debug!(beacon = label, status = %response.status(), "beacon rejected");
                }
                Err(err) => {
                    debug!(beacon = label, error = %err, "beacon send failed");
                }
            }
        });
    }
}

#[async_trait]
impl BeaconSink for HttpBeaconSink {
    async fn send_journey_update(&self, beacon: JourneyUpdateBeacon) {
        self.post_detached(&self.journey_endpoint, "journey-update", &beacon);
    }

    async fn send_page_view(&self, beacon: PageViewBeacon) {
        self.post_detached(&self.page_view_endpoint, "page-view", &beacon);
    }
}

/// Captures beacons in memory.
#[derive(Default)]
pub struct MemoryBeaconSink {
    journey_updates: Mutex<Vec<JourneyUpdateBeacon>>,
    page_views: Mutex<Vec<PageViewBeacon>>,
}

impl MemoryBeaconSink {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn journey_updates(&self) -> Vec<JourneyUpdateBeacon> {
        self.journey_updates.lock().clone()
    }

    pub fn page_views(&self) -> Vec<PageViewBeacon> {
        self.page_views.lock().clone()
    }
}

#[async_trait]
impl BeaconSink for MemoryBeaconSink {
    async fn send_journey_update(&self, beacon: JourneyUpdateBeacon) {
        self.journey_updates.lock().push(beacon);
    }

    async fn send_page_view(&self, beacon: PageViewBeacon) {
        self.page_views.lock().push(beacon);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pagetailor_journey_recorder::Journey;

    fn analytics(is_final: bool) -> JourneyAnalytics {
        let mut journey = Journey::start(
            VisitorId::new(),
            SessionId::new(),
            2,
            DeviceSnapshot::default(),
            1_000,
        );
        if is_final {
            journey.ended = true;
        }
        journey.analytics(31_000)
    }

    #[tokio::test]
    async fn test_memory_sink_captures_in_order() {
        let sink = MemoryBeaconSink::new();
        sink.send_journey_update(JourneyUpdateBeacon::new("brave-otter", analytics(false)))
            .await;
        sink.send_journey_update(JourneyUpdateBeacon::new("brave-otter", analytics(true)))
            .await;

        let updates = sink.journey_updates();
        assert_eq!(updates.len(), 2);
        assert!(!updates[0].is_final);
        assert!(updates[1].is_final);
        assert_eq!(updates[1].anonymous_name, "brave-otter");
    }

    #[tokio::test]
    async fn test_page_view_copies_device_fields() {
        let device = DeviceSnapshot {
            device_type: DeviceType::Mobile,
            browser: "Firefox".into(),
            ..DeviceSnapshot::default()
        };
        let beacon = PageViewBeacon::new(
            VisitorId::new(),
            SessionId::new(),
            "calm-heron",
            "https://shop.test/pricing",
            5_000,
            &device,
            "DE",
        );
        assert_eq!(beacon.device_type, DeviceType::Mobile);
        assert_eq!(beacon.browser, "Firefox");
        assert_eq!(beacon.country_code, "DE");
    }

    #[test]
    fn test_journey_update_wire_shape() {
        let beacon = JourneyUpdateBeacon::new("brave-otter", analytics(false));
        let json = serde_json::to_value(&beacon).unwrap();
        assert_eq!(json["anonymous_name"], "brave-otter");
        assert_eq!(json["is_final"], false);
        assert_eq!(json["analytics"]["visit_number"], 2);
    }

    #[test]
    fn test_http_sink_builds() {
        assert!(HttpBeaconSink::new(
            "https://collect.test/journey",
            "https://collect.test/page-view"
        )
        .is_ok());
    }
}
