use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use url::Url;

use crate::TelemetryError;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SiteId(String);

impl SiteId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SiteId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SiteState {
    #[default]
    Draft,
    Published,
    Recycled,
}

/// Per-site rule that can suppress HttpError alerts for matching URLs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertRule {
    /// `*` matches every URL; anything else is a substring match.
    pub api_url_pattern: String,
    /// Response field to inspect.
    #[serde(default)]
    pub key: Option<String>,
    /// Known values of `key` that should not alert.
    #[serde(default)]
    pub enums: Vec<Value>,
    /// Suppress when the inspected field is empty or absent.
    #[serde(default)]
    pub allow_empty: bool,
    /// Never alert for matching URLs.
    #[serde(default)]
    pub ignore: bool,
}

impl AlertRule {
    pub fn for_pattern(pattern: impl Into<String>) -> Self {
        Self {
            api_url_pattern: pattern.into(),
            key: None,
            enums: Vec::new(),
            allow_empty: false,
            ignore: false,
        }
    }

    pub fn matches_url(&self, url: &str) -> bool {
        self.api_url_pattern == "*" || url.contains(self.api_url_pattern.as_str())
    }
}

/// A monitored site and its alerting configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Site {
    #[serde(rename = "site_id")]
    pub id: SiteId,
    pub name: String,
    /// API reporting switch handed to the client SDK. Ingestion does not
    /// enforce it.
    #[serde(default)]
    pub api_reporting: bool,
    #[serde(default)]
    pub alert_url: Option<String>,
    #[serde(default)]
    pub feedback_url: Option<String>,
    #[serde(default)]
    pub state: SiteState,
    #[serde(default)]
    pub alert_rules: Vec<AlertRule>,
    /// User ids whose sessions are screen-recorded.
    #[serde(default)]
    pub record_whitelist: Vec<u64>,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub create_at: DateTime<Utc>,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub update_at: DateTime<Utc>,
}

/// Administrative input for creating or replacing a site.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SiteDraft {
    pub name: String,
    pub api_reporting: bool,
    pub alert_url: Option<String>,
    pub feedback_url: Option<String>,
    pub state: SiteState,
    pub alert_rules: Vec<AlertRule>,
    pub record_whitelist: Vec<u64>,
}

impl SiteDraft {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Check shape before anything is written.
    pub fn validate(&self) -> Result<(), TelemetryError> {
        if self.name.trim().is_empty() {
            return Err(TelemetryError::Validation("site name is empty".to_string()));
        }
        for (field, url) in [("alert_url", &self.alert_url), ("feedback_url", &self.feedback_url)] {
            if let Some(url) = url {
                validate_webhook(field, url)?;
            }
        }
        for (i, rule) in self.alert_rules.iter().enumerate() {
            if rule.api_url_pattern.trim().is_empty() {
                return Err(TelemetryError::Validation(format!(
                    "alert_rules[{i}]: empty api_url_pattern"
                )));
            }
            if rule.key.as_deref().is_some_and(|k| k.trim().is_empty()) {
                return Err(TelemetryError::Validation(format!(
                    "alert_rules[{i}]: empty key"
                )));
            }
        }
        if self.record_whitelist.contains(&0) {
            return Err(TelemetryError::Validation(
                "record_whitelist ids must be positive".to_string(),
            ));
        }
        Ok(())
    }

    pub(crate) fn into_site(self, id: SiteId, create_at: DateTime<Utc>, now: DateTime<Utc>) -> Site {
        Site {
            id,
            name: self.name.trim().to_string(),
            api_reporting: self.api_reporting,
            alert_url: self.alert_url,
            feedback_url: self.feedback_url,
            state: self.state,
            alert_rules: self.alert_rules,
            record_whitelist: self.record_whitelist,
            create_at,
            update_at: now,
        }
    }
}

fn validate_webhook(field: &str, raw: &str) -> Result<(), TelemetryError> {
    let url = Url::parse(raw)
        .map_err(|e| TelemetryError::Validation(format!("{field}: {e}")))?;
    match url.scheme() {
        "http" | "https" => Ok(()),
        other => Err(TelemetryError::Validation(format!(
            "{field}: unsupported scheme {other}"
        ))),
    }
}
