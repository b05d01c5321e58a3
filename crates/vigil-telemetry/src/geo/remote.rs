use std::net::IpAddr;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;

use super::{Location, LocationProvider};
use crate::config::GeoConfig;
use crate::TelemetryError;

const IP_API_FIELDS: &str = "status,message,country,countryCode,region,regionName,city,zip,lat,lon";

fn http_client(config: &GeoConfig) -> Result<Client, TelemetryError> {
    Client::builder()
        .timeout(Duration::from_millis(config.timeout_ms))
        .build()
        .map_err(|e| TelemetryError::Config(format!("geo http client: {e}")))
}

async fn fetch<T: for<'de> Deserialize<'de>>(
    client: &Client,
    service: &'static str,
    url: &str,
) -> Result<T, TelemetryError> {
    let response = client
        .get(url)
        .send()
        .await
        .map_err(|e| TelemetryError::external(service, e.to_string()))?;

    if !response.status().is_success() {
        return Err(TelemetryError::external(
            service,
            format!("status {}", response.status()),
        ));
    }

    response
        .json()
        .await
        .map_err(|e| TelemetryError::external(service, format!("malformed body: {e}")))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct IpApiBody {
    status: String,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    country: String,
    #[serde(default)]
    country_code: String,
    /// Region code, e.g. `CA`.
    #[serde(default)]
    region: String,
    #[serde(default)]
    region_name: String,
    #[serde(default)]
    city: String,
    #[serde(default)]
    zip: String,
    #[serde(default)]
    lat: Option<f64>,
    #[serde(default)]
    lon: Option<f64>,
}

/// `ip-api.com` JSON endpoint.
#[derive(Debug, Clone)]
pub struct IpApiProvider {
    client: Client,
    base_url: String,
}

impl IpApiProvider {
    pub fn new(config: &GeoConfig) -> Result<Self, TelemetryError> {
        Ok(Self {
            client: http_client(config)?,
            base_url: config.ip_api_url.trim_end_matches('/').to_owned(),
        })
    }
}

#[async_trait]
impl LocationProvider for IpApiProvider {
    fn name(&self) -> &'static str {
        "ip-api"
    }

    async fn locate(&self, ip: IpAddr) -> Result<Location, TelemetryError> {
        let url = format!("{}/{ip}?fields={IP_API_FIELDS}", self.base_url);
        let body: IpApiBody = fetch(&self.client, self.name(), &url).await?;

        if body.status != "success" {
            return Err(TelemetryError::external(
                self.name(),
                body.message.unwrap_or(body.status),
            ));
        }

        Ok(Location {
            country: body.country,
            country_code: body.country_code,
            region: body.region_name,
            region_code: body.region,
            city: body.city,
            zip: body.zip,
            latitude: body.lat,
            longitude: body.lon,
            source: self.name().to_string(),
        })
    }
}

#[derive(Debug, Deserialize)]
struct IpApiCoBody {
    /// Present (and `true`) when the lookup failed.
    #[serde(default)]
    error: Option<serde_json::Value>,
    #[serde(default)]
    reason: Option<String>,
    #[serde(default)]
    country_name: String,
    #[serde(default)]
    country_code: String,
    #[serde(default)]
    region: String,
    #[serde(default)]
    region_code: String,
    #[serde(default)]
    city: String,
    #[serde(default)]
    postal: Option<String>,
    #[serde(default)]
    latitude: Option<f64>,
    #[serde(default)]
    longitude: Option<f64>,
}

/// `ipapi.co` JSON endpoint.
#[derive(Debug, Clone)]
pub struct IpApiCoProvider {
    client: Client,
    base_url: String,
}

impl IpApiCoProvider {
    pub fn new(config: &GeoConfig) -> Result<Self, TelemetryError> {
        Ok(Self {
            client: http_client(config)?,
            base_url: config.ipapi_co_url.trim_end_matches('/').to_owned(),
        })
    }
}

#[async_trait]
impl LocationProvider for IpApiCoProvider {
    fn name(&self) -> &'static str {
        "ipapi.co"
    }

    async fn locate(&self, ip: IpAddr) -> Result<Location, TelemetryError> {
        let url = format!("{}/{ip}/json/", self.base_url);
        let body: IpApiCoBody = fetch(&self.client, self.name(), &url).await?;

        if body.error.as_ref().is_some_and(|e| !matches!(e, serde_json::Value::Bool(false))) {
            return Err(TelemetryError::external(
                self.name(),
                body.reason.unwrap_or_else(|| "lookup failed".to_string()),
            ));
        }

        Ok(Location {
            country: body.country_name,
            country_code: body.country_code,
            region: body.region,
            region_code: body.region_code,
            city: body.city,
            zip: body.postal.unwrap_or_default(),
            latitude: body.latitude,
            longitude: body.longitude,
            source: self.name().to_string(),
        })
    }
}
