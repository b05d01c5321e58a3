//! IP geolocation with a provider fallback chain.
//!
//! Remote providers are tried in order; the embedded [`LocalTable`] answers
//! when all of them fail, so a parseable address always resolves to
//! something. Nothing is cached here.

mod local;
mod remote;

use std::net::IpAddr;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub use local::LocalTable;
pub use remote::{IpApiCoProvider, IpApiProvider};

use crate::config::GeoConfig;
use crate::TelemetryError;

/// Resolved location of an IP address.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Location {
    pub country: String,
    pub country_code: String,
    pub region: String,
    pub region_code: String,
    pub city: String,
    pub zip: String,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    /// Name of the provider that answered.
    pub source: String,
}

impl Location {
    pub(crate) fn unknown(source: &str) -> Self {
        Self {
            country: "unknown".to_string(),
            source: source.to_string(),
            ..Self::default()
        }
    }
}

#[async_trait]
pub trait LocationProvider: Send + Sync {
    fn name(&self) -> &'static str;

    async fn locate(&self, ip: IpAddr) -> Result<Location, TelemetryError>;
}

/// Fallback chain over remote providers and the local table.
#[derive(Clone)]
pub struct GeoResolver {
    providers: Vec<Arc<dyn LocationProvider>>,
    fallback: LocalTable,
}

impl GeoResolver {
    pub fn new(providers: Vec<Arc<dyn LocationProvider>>) -> Self {
        Self {
            providers,
            fallback: LocalTable::builtin(),
        }
    }

    /// Local table only; never leaves the process.
    pub fn offline() -> Self {
        Self::new(Vec::new())
    }

    pub fn from_config(config: &GeoConfig) -> Result<Self, TelemetryError> {
        if !config.remote_enabled {
            return Ok(Self::offline());
        }
        Ok(Self::new(vec![
            Arc::new(IpApiProvider::new(config)?),
            Arc::new(IpApiCoProvider::new(config)?),
        ]))
    }

    /// Resolve `ip`. Returns `None` only when `ip` is not an IP address.
    #[tracing::instrument(skip(self))]
    pub async fn query_location(&self, ip: &str) -> Option<Location> {
        let addr: IpAddr = match ip.trim().parse() {
            Ok(addr) => addr,
            Err(_) => {
                tracing::debug!("Unparseable IP address");
                return None;
            }
        };

        for provider in &self.providers {
            match provider.locate(addr).await {
                Ok(location) => return Some(location),
                Err(e) => {
                    tracing::debug!(
                        provider = provider.name(),
                        error = %e,
                        "Geo provider failed, trying next"
                    );
                }
            }
        }

        Some(self.fallback.lookup(addr))
    }
}

impl std::fmt::Debug for GeoResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names: Vec<_> = self.providers.iter().map(|p| p.name()).collect();
        f.debug_struct("GeoResolver")
            .field("providers", &names)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    struct Failing;

    #[async_trait]
    impl LocationProvider for Failing {
        fn name(&self) -> &'static str {
            "failing"
        }

        async fn locate(&self, _ip: IpAddr) -> Result<Location, TelemetryError> {
            tokio::time::sleep(Duration::from_millis(5)).await;
            Err(TelemetryError::external("failing", "timed out"))
        }
    }

    struct Fixed(&'static str);

    #[async_trait]
    impl LocationProvider for Fixed {
        fn name(&self) -> &'static str {
            self.0
        }

        async fn locate(&self, _ip: IpAddr) -> Result<Location, TelemetryError> {
            Ok(Location {
                country: "Japan".to_string(),
                country_code: "JP".to_string(),
                city: "Tokyo".to_string(),
                source: self.0.to_string(),
                ..Location::default()
            })
        }
    }

    #[tokio::test]
    async fn second_provider_answers_when_first_fails() {
        let resolver = GeoResolver::new(vec![Arc::new(Failing), Arc::new(Fixed("b"))]);
        let location = resolver.query_location("203.0.113.9").await.unwrap();
        assert_eq!(location.source, "b");
        assert_eq!(location.city, "Tokyo");
    }

    #[tokio::test]
    async fn local_table_answers_when_all_fail() {
        let resolver = GeoResolver::new(vec![Arc::new(Failing), Arc::new(Failing)]);
        let location = resolver.query_location("192.168.1.20").await.unwrap();
        assert_eq!(location.source, "local");
        assert_eq!(location.country, "LAN");

        let public = resolver.query_location("203.0.113.9").await.unwrap();
        assert_eq!(public.country, "unknown");
    }

    #[tokio::test]
    async fn garbage_ip_yields_none() {
        let resolver = GeoResolver::new(vec![Arc::new(Fixed("a"))]);
        assert!(resolver.query_location("not-an-ip").await.is_none());
    }
}
