use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer};
use serde_json::{Map, Value};

use super::Category;

/// Raw ingestion payload as delivered by the transport.
///
/// Never persisted as-is: the dispatcher normalises `payload` and decodes it
/// into the [`CategoryRecord`](super::CategoryRecord) for `category`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TelemetryEnvelope {
    pub category: Category,
    #[serde(default, deserialize_with = "lenient_string")]
    pub site_id: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub user_id: Option<String>,
    #[serde(default)]
    pub ip: Option<String>,
    #[serde(default)]
    pub reports_type: Option<String>,
    #[serde(default)]
    pub mode: Option<String>,
    /// Client clock at send time, epoch milliseconds. Informational only;
    /// records are stamped with the server receive time.
    #[serde(default, with = "chrono::serde::ts_milliseconds_option")]
    pub client_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub payload: Map<String, Value>,
}

impl TelemetryEnvelope {
    pub fn new(category: Category, site_id: impl Into<String>) -> Self {
        Self {
            category,
            site_id: Some(site_id.into()),
            user_id: None,
            ip: None,
            reports_type: None,
            mode: None,
            client_time: None,
            payload: Map::new(),
        }
    }

    #[must_use]
    pub fn with_user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    #[must_use]
    pub fn with_ip(mut self, ip: impl Into<String>) -> Self {
        self.ip = Some(ip.into());
        self
    }

    #[must_use]
    pub fn with_reports_type(mut self, reports_type: impl Into<String>) -> Self {
        self.reports_type = Some(reports_type.into());
        self
    }

    #[must_use]
    pub fn with_payload(mut self, payload: Map<String, Value>) -> Self {
        self.payload = payload;
        self
    }
}

/// Clients send numeric user and site ids as often as string ones.
fn lenient_string<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Option::<Value>::deserialize(deserializer)? {
        Some(Value::String(s)) if !s.trim().is_empty() => Some(s),
        Some(Value::Number(n)) => Some(n.to_string()),
        _ => None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn accepts_numeric_user_id_and_missing_payload() {
        let envelope: TelemetryEnvelope = serde_json::from_value(json!({
            "category": "PV",
            "siteId": "site-1",
            "userId": 42,
            "ip": "10.0.0.1",
        }))
        .unwrap();

        assert_eq!(envelope.category, Category::Pageview);
        assert_eq!(envelope.user_id.as_deref(), Some("42"));
        assert!(envelope.payload.is_empty());
        assert!(envelope.client_time.is_none());
    }

    #[test]
    fn blank_site_id_is_treated_as_missing() {
        let envelope: TelemetryEnvelope =
            serde_json::from_value(json!({ "category": "API", "siteId": "  " })).unwrap();
        assert!(envelope.site_id.is_none());
    }
}
