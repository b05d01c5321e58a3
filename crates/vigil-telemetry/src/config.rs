//! Configuration types for the telemetry engine.

use std::path::Path;
use std::time::Duration;

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use vigil_state::StateConfig;

use crate::model::Category;
use crate::worker::OverflowPolicy;
use crate::TelemetryError;

// ============================================================================
// Default configuration constants
// ============================================================================

/// Default site cache TTL in seconds. `0` disables expiry.
pub const DEFAULT_SITE_TTL_SECS: u64 = 3600;

/// Default per-request geo provider timeout in milliseconds.
pub const DEFAULT_GEO_TIMEOUT_MS: u64 = 3000;

pub const DEFAULT_IP_API_URL: &str = "http://ip-api.com/json";

pub const DEFAULT_IPAPI_CO_URL: &str = "https://ipapi.co";

/// Default webhook delivery timeout in milliseconds.
pub const DEFAULT_ALERT_TIMEOUT_MS: u64 = 5000;

/// Default admin console base URL used for links in alert messages.
pub const DEFAULT_ADMIN_URL: &str = "http://localhost:8080";

/// Default background worker count.
pub const DEFAULT_POOL_WORKERS: usize = 4;

/// Default background queue capacity.
pub const DEFAULT_POOL_CAPACITY: usize = 1024;

/// Default upper bound on the random delay added to every sweep interval.
pub const DEFAULT_RETENTION_JITTER_SECS: u64 = 300;

/// Default retention lease TTL in seconds.
pub const DEFAULT_RETENTION_LEASE_SECS: u64 = 600;

/// Default cleanup queue poll interval in milliseconds.
pub const DEFAULT_CLEANUP_POLL_MS: u64 = 1000;

/// Default time a claimed cleanup job stays invisible to other workers.
pub const DEFAULT_CLEANUP_LEASE_SECS: u64 = 300;

/// Default delay before a failed cleanup job is retried.
pub const DEFAULT_CLEANUP_RETRY_SECS: u64 = 60;

const HOUR: u64 = 3600;

/// Telemetry engine configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TelemetryConfig {
    pub cache: CacheSettings,
    pub geo: GeoConfig,
    pub alerts: AlertConfig,
    pub pool: PoolConfig,
    pub retention: RetentionConfig,
    pub cleanup: CleanupConfig,
    #[serde(skip_serializing)]
    pub state: StateConfig,
}

impl TelemetryConfig {
    /// Load configuration from files and environment.
    ///
    /// Configuration is loaded in order (later sources override earlier):
    /// 1. Default values
    /// 2. `vigil.toml` in current directory
    /// 3. Environment variables prefixed with `VIGIL_`, nested with `__`
    ///    (e.g. `VIGIL_CACHE__SITE_TTL_SECS=60`)
    pub fn load() -> Result<Self, TelemetryError> {
        Self::load_from("vigil.toml")
    }

    /// Load configuration from a specific file path.
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self, TelemetryError> {
        Figment::from(Serialized::defaults(Self::default()))
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed("VIGIL_").split("__"))
            .extract()
            .map_err(|e| TelemetryError::Config(e.to_string()))
    }
}

/// Site cache settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheSettings {
    /// Site entry TTL in seconds; `0` keeps entries until invalidated.
    pub site_ttl_secs: u64,
}

impl CacheSettings {
    pub const fn site_ttl(&self) -> Option<Duration> {
        match self.site_ttl_secs {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        }
    }
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            site_ttl_secs: DEFAULT_SITE_TTL_SECS,
        }
    }
}

/// Geolocation provider settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeoConfig {
    /// When false only the embedded table is consulted.
    pub remote_enabled: bool,
    pub ip_api_url: String,
    pub ipapi_co_url: String,
    pub timeout_ms: u64,
}

impl Default for GeoConfig {
    fn default() -> Self {
        Self {
            remote_enabled: true,
            ip_api_url: DEFAULT_IP_API_URL.to_string(),
            ipapi_co_url: DEFAULT_IPAPI_CO_URL.to_string(),
            timeout_ms: DEFAULT_GEO_TIMEOUT_MS,
        }
    }
}

/// Webhook alert settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AlertConfig {
    pub enabled: bool,
    pub timeout_ms: u64,
    /// Base URL of the admin console, linked from messages.
    pub admin_url: String,
}

impl Default for AlertConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            timeout_ms: DEFAULT_ALERT_TIMEOUT_MS,
            admin_url: DEFAULT_ADMIN_URL.to_string(),
        }
    }
}

/// Background worker pool settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    pub workers: usize,
    pub capacity: usize,
    pub overflow: OverflowPolicy,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            workers: DEFAULT_POOL_WORKERS,
            capacity: DEFAULT_POOL_CAPACITY,
            overflow: OverflowPolicy::DropOldest,
        }
    }
}

/// Retention schedule for one store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SweepSchedule {
    /// Records older than this many days are deleted. `None` keeps them.
    #[serde(default)]
    pub horizon_days: Option<u32>,
    pub interval_secs: u64,
}

impl SweepSchedule {
    const fn days(horizon: u32, interval_secs: u64) -> Self {
        Self {
            horizon_days: Some(horizon),
            interval_secs,
        }
    }

    const fn keep(interval_secs: u64) -> Self {
        Self {
            horizon_days: None,
            interval_secs,
        }
    }

    pub fn horizon(&self) -> Option<chrono::Duration> {
        self.horizon_days.map(|d| chrono::Duration::days(i64::from(d)))
    }

    pub const fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
}

/// Per-store retention horizons and sweep cadence.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetentionConfig {
    pub enabled: bool,
    pub jitter_secs: u64,
    pub lease_secs: u64,
    pub index: SweepSchedule,
    pub api: SweepSchedule,
    pub event: SweepSchedule,
    pub error: SweepSchedule,
    pub custom: SweepSchedule,
    pub performance: SweepSchedule,
    pub pageview: SweepSchedule,
    pub feedback: SweepSchedule,
    pub recording: SweepSchedule,
}

impl RetentionConfig {
    pub const fn schedule(&self, category: Category) -> SweepSchedule {
        match category {
            Category::Api => self.api,
            Category::Event => self.event,
            Category::Error => self.error,
            Category::Custom => self.custom,
            Category::Performance => self.performance,
            Category::Pageview => self.pageview,
            Category::UserFeedback => self.feedback,
            Category::ScreenRecording => self.recording,
        }
    }

    pub const fn jitter(&self) -> Duration {
        Duration::from_secs(self.jitter_secs)
    }

    pub const fn lease_ttl(&self) -> Duration {
        Duration::from_secs(self.lease_secs)
    }
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            jitter_secs: DEFAULT_RETENTION_JITTER_SECS,
            lease_secs: DEFAULT_RETENTION_LEASE_SECS,
            index: SweepSchedule::days(3, 4 * HOUR),
            api: SweepSchedule::days(5, HOUR),
            event: SweepSchedule::keep(HOUR),
            error: SweepSchedule::days(15, HOUR),
            custom: SweepSchedule::keep(HOUR),
            performance: SweepSchedule::days(15, HOUR),
            pageview: SweepSchedule::keep(HOUR),
            feedback: SweepSchedule::days(10, HOUR),
            recording: SweepSchedule::days(7, 24 * HOUR),
        }
    }
}

/// Site cascade cleanup worker settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CleanupConfig {
    pub poll_interval_ms: u64,
    pub lease_secs: u64,
    pub retry_delay_secs: u64,
}

impl CleanupConfig {
    pub const fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub const fn lease(&self) -> Duration {
        Duration::from_secs(self.lease_secs)
    }

    pub const fn retry_delay(&self) -> Duration {
        Duration::from_secs(self.retry_delay_secs)
    }
}

impl Default for CleanupConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: DEFAULT_CLEANUP_POLL_MS,
            lease_secs: DEFAULT_CLEANUP_LEASE_SECS,
            retry_delay_secs: DEFAULT_CLEANUP_RETRY_SECS,
        }
    }
}
