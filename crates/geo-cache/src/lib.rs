//! Country-level geolocation with a per-session cache.
//!
//! One lookup per session, ever. The result (including a failed lookup,
//! normalized to unknown) is cached in the session scope so later page
//! loads and concurrent callers never hit the network again.

mod cache;
mod http;

pub use cache::SessionGeoCache;
pub use http::HttpGeoLookup;

use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Sentinel country code for lookups that failed or returned nothing.
pub const UNKNOWN_COUNTRY: &str = "??";

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CountryInfo {
    pub country_code: String,
    pub country_name: String,
    #[serde(default)]
    pub region: Option<String>,
    #[serde(default)]
    pub city: Option<String>,
}

impl CountryInfo {
    pub fn new(code: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            country_code: code.into(),
            country_name: name.into(),
            region: None,
            city: None,
        }
    }

    /// Negative-result value cached when a lookup fails.
    pub fn unknown() -> Self {
        Self::new(UNKNOWN_COUNTRY, "Unknown")
    }

    pub fn is_known(&self) -> bool {
        self.country_code != UNKNOWN_COUNTRY && !self.country_code.is_empty()
    }
}

#[derive(Debug, Error)]
pub enum GeoError {
    #[error("geo request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("geo response malformed: {0}")]
    Decode(String),
}

/// Port over whatever resolves the visitor's country.
#[async_trait]
pub trait GeoLookup: Send + Sync {
    async fn lookup(&self) -> Result<CountryInfo, GeoError>;
}

/// Canned lookup for tests and offline simulation. Counts calls so the
/// once-per-session guarantee is checkable.
pub struct FixedGeoLookup {
    info: Option<CountryInfo>,
    calls: AtomicUsize,
}

impl FixedGeoLookup {
    pub fn returning(info: CountryInfo) -> Self {
        Self {
            info: Some(info),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn failing() -> Self {
        Self {
            info: None,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl GeoLookup for FixedGeoLookup {
    async fn lookup(&self) -> Result<CountryInfo, GeoError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match &self.info {
            Some(info) => Ok(info.clone()),
            None => Err(GeoError::Decode("no data configured".into())),
        }
    }
}
