//! Runtime configuration.
//!
//! Every section deserializes with full defaults so an empty document (or a
//! missing file) yields a working runtime. Environment variables override
//! file values last.

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use pagetailor_journey_recorder::{IntentWeights, RecorderConfig};

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    pub session: SessionConfig,
    pub journey: JourneyConfig,
    pub geo: GeoConfig,
    pub beacons: BeaconConfig,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Idle minutes before a returning visitor gets a fresh session.
    pub timeout_minutes: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self { timeout_minutes: 30 }
    }
}

impl SessionConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_minutes.max(1) * 60)
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct JourneyConfig {
    /// Oldest page visits are dropped beyond this length.
    pub max_pages: usize,
    pub weights: IntentWeights,
}

impl Default for JourneyConfig {
    fn default() -> Self {
        let recorder = RecorderConfig::default();
        Self {
            max_pages: recorder.max_pages,
            weights: recorder.weights,
        }
    }
}

impl JourneyConfig {
    pub fn recorder_config(&self) -> RecorderConfig {
        RecorderConfig {
            max_pages: self.max_pages,
            weights: self.weights.clone(),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct GeoConfig {
    pub enabled: bool,
    /// IP-geolocation endpoint answering JSON for the caller's address.
    pub endpoint: String,
}

impl Default for GeoConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            endpoint: "https://ipapi.co/json/".to_string(),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct BeaconConfig {
    pub enabled: bool,
    pub journey_endpoint: String,
    pub page_view_endpoint: String,
}

impl Default for BeaconConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            journey_endpoint: "https://collect.pagetailor.dev/v1/journey".to_string(),
            page_view_endpoint: "https://collect.pagetailor.dev/v1/page-view".to_string(),
        }
    }
}

impl RuntimeConfig {
    pub fn from_yaml(content: &str) -> Result<Self> {
        serde_yaml::from_str(content).context("failed to parse runtime config")
    }

    /// Load from `path`, falling back to defaults when the file is absent.
    pub async fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) if path.exists() => {
                let content = tokio::fs::read_to_string(path)
                    .await
                    .with_context(|| format!("failed to read config file {}", path.display()))?;
                let config = Self::from_yaml(&content)?;
                info!(path = %path.display(), "loaded configuration");
                config
            }
            Some(path) => {
                warn!(path = %path.display(), "config file not found, using defaults");
                Self::default()
            }
            None => Self::default(),
        };
        config.apply_env_overrides();
        Ok(config)
    }

    /// `PAGETAILOR_*` variables win over file values.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(endpoint) = std::env::var("PAGETAILOR_GEO_ENDPOINT") {
            self.geo.endpoint = endpoint;
        }
        if let Ok(endpoint) = std::env::var("PAGETAILOR_JOURNEY_ENDPOINT") {
            self.beacons.journey_endpoint = endpoint;
        }
        if let Ok(endpoint) = std::env::var("PAGETAILOR_PAGE_VIEW_ENDPOINT") {
            self.beacons.page_view_endpoint = endpoint;
        }
        if let Ok(raw) = std::env::var("PAGETAILOR_BEACONS") {
            self.beacons.enabled = parse_switch(&raw).unwrap_or(self.beacons.enabled);
        }
        if let Ok(raw) = std::env::var("PAGETAILOR_GEO") {
            self.geo.enabled = parse_switch(&raw).unwrap_or(self.geo.enabled);
        }
    }
}

fn parse_switch(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "on" | "yes" => Some(true),
        "0" | "false" | "off" | "no" => Some(false),
        other => {
            warn!(value = other, "unrecognized boolean switch, keeping previous value");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_document_yields_defaults() {
        let config = RuntimeConfig::from_yaml("{}").unwrap();
        assert_eq!(config.session.timeout_minutes, 30);
        assert_eq!(config.journey.max_pages, 50);
        assert!(config.geo.enabled);
        assert!(config.beacons.enabled);
    }

    #[test]
    fn test_partial_section_keeps_other_defaults() {
        let config =
            RuntimeConfig::from_yaml("session:\n  timeout_minutes: 5\ngeo:\n  enabled: false\n")
                .unwrap();
        assert_eq!(config.session.timeout(), Duration::from_secs(300));
        assert!(!config.geo.enabled);
        assert_eq!(config.journey.max_pages, 50);
    }

    #[test]
    fn test_weights_overridable_from_yaml() {
        let config = RuntimeConfig::from_yaml(
            "journey:\n  max_pages: 10\n  weights:\n    page_depth: 0.5\n",
        )
        .unwrap();
        assert_eq!(config.journey.max_pages, 10);
        assert!((config.journey.weights.page_depth - 0.5).abs() < f64::EPSILON);
    }

    #[test]
    fn test_switch_parsing() {
        assert_eq!(parse_switch("on"), Some(true));
        assert_eq!(parse_switch("FALSE"), Some(false));
        assert_eq!(parse_switch("maybe"), None);
    }
}
