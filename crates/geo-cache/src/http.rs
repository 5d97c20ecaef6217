//! HTTP-backed country lookup.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use tracing::debug;

use crate::{CountryInfo, GeoError, GeoLookup};

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(4);

/// Wire shape of the geo endpoint. Fields the service omits stay `None`
/// rather than failing the decode.
#[derive(Debug, Deserialize)]
struct GeoResponse {
    #[serde(default)]
    country_code: Option<String>,
    #[serde(default)]
    country_name: Option<String>,
    #[serde(default)]
    region: Option<String>,
    #[serde(default)]
    city: Option<String>,
}

/// Looks the country up from an IP-geolocation endpoint that answers with
/// JSON for the caller's own address.
pub struct HttpGeoLookup {
    client: Client,
    endpoint: String,
}

impl HttpGeoLookup {
    pub fn new(endpoint: impl Into<String>) -> Result<Self, GeoError> {
        let client = Client::builder().timeout(DEFAULT_TIMEOUT).build()?;
        Ok(Self {
            client,
            endpoint: endpoint.into(),
        })
    }

    pub fn with_timeout(endpoint: impl Into<String>, timeout: Duration) -> Result<Self, GeoError> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            endpoint: endpoint.into(),
        })
    }
}

#[async_trait]
impl GeoLookup for HttpGeoLookup {
    async fn lookup(&self) -> Result<CountryInfo, GeoError> {
        let response = self
            .client
            .get(&self.endpoint)
            .send()
            .await?
            .error_for_status()?;
        let body: GeoResponse = response.json().await?;

        let code = body
            .country_code
            .filter(|code| !code.is_empty())
            .ok_or_else(|| GeoError::Decode("response carried no country code".into()))?;
        let name = body.country_name.unwrap_or_else(|| code.clone());

        debug!(country = %code, "geo lookup resolved");
        Ok(CountryInfo {
            country_code: code.to_uppercase(),
            country_name: name,
            region: body.region,
            city: body.city,
        })
    }
}
