use serde::Deserialize;

/// Backend selection for each state capability.
///
/// Every section defaults to the in-memory backend.
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct StateConfig {
    pub cache: CacheConfig,
    pub queue: QueueConfig,
    pub lease: LeaseConfig,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(tag = "backend", rename_all = "lowercase")]
pub enum CacheConfig {
    #[default]
    Memory,
    #[cfg(feature = "valkey")]
    Valkey {
        url: String,
        #[serde(default)]
        namespace: Option<String>,
        #[serde(default = "default_pool_size")]
        pool_size: usize,
    },
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(tag = "backend", rename_all = "lowercase")]
pub enum QueueConfig {
    #[default]
    Memory,
    #[cfg(feature = "postgres")]
    Postgres {
        url: String,
        #[serde(default = "default_queue_table")]
        table: String,
    },
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(tag = "backend", rename_all = "lowercase")]
pub enum LeaseConfig {
    #[default]
    Memory,
    #[cfg(feature = "valkey")]
    Valkey {
        url: String,
        #[serde(default)]
        namespace: Option<String>,
        #[serde(default = "default_pool_size")]
        pool_size: usize,
    },
}

#[cfg(feature = "valkey")]
fn default_pool_size() -> usize {
    8
}

#[cfg(feature = "postgres")]
fn default_queue_table() -> String {
    "vigil_jobs".to_string()
}
