use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Telemetry category carried by every envelope.
///
/// Serialised with the short tags clients send (`API`, `PREF`, `RV`, ...).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Category {
    #[serde(rename = "API")]
    Api,
    #[serde(rename = "EVENT")]
    Event,
    #[serde(rename = "ERROR")]
    Error,
    #[serde(rename = "CUSTOM")]
    Custom,
    #[serde(rename = "PREF")]
    Performance,
    #[serde(rename = "PV")]
    Pageview,
    #[serde(rename = "USER")]
    UserFeedback,
    #[serde(rename = "RV")]
    ScreenRecording,
}

impl Category {
    pub const ALL: [Self; 8] = [
        Self::Api,
        Self::Event,
        Self::Error,
        Self::Custom,
        Self::Performance,
        Self::Pageview,
        Self::UserFeedback,
        Self::ScreenRecording,
    ];

    /// Lowercase name used in logs, lease names and config keys.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Api => "api",
            Self::Event => "event",
            Self::Error => "error",
            Self::Custom => "custom",
            Self::Performance => "performance",
            Self::Pageview => "pageview",
            Self::UserFeedback => "feedback",
            Self::ScreenRecording => "recording",
        }
    }

    /// Short tag used on the wire.
    pub const fn tag(self) -> &'static str {
        match self {
            Self::Api => "API",
            Self::Event => "EVENT",
            Self::Error => "ERROR",
            Self::Custom => "CUSTOM",
            Self::Performance => "PREF",
            Self::Pageview => "PV",
            Self::UserFeedback => "USER",
            Self::ScreenRecording => "RV",
        }
    }

    /// Name of the collection backing this category's sink.
    pub const fn collection(self) -> &'static str {
        match self {
            Self::Api => "api_logs",
            Self::Event => "event_logs",
            Self::Error => "error_logs",
            Self::Custom => "custom_logs",
            Self::Performance => "perf_logs",
            Self::Pageview => "pv_logs",
            Self::UserFeedback => "user_logs",
            Self::ScreenRecording => "recordings",
        }
    }

    /// Discriminator written into index entries. `None` for the two
    /// categories that never appear in the unified index.
    pub const fn ref_type(self) -> Option<RefType> {
        match self {
            Self::Api => Some(RefType::ApiLog),
            Self::Event => Some(RefType::EventLog),
            Self::Error => Some(RefType::ErrorLog),
            Self::Custom => Some(RefType::CustomLog),
            Self::Performance => Some(RefType::PerfLog),
            Self::Pageview => Some(RefType::PvLog),
            Self::UserFeedback | Self::ScreenRecording => None,
        }
    }

    pub const fn is_indexed(self) -> bool {
        self.ref_type().is_some()
    }

    /// Fields matched by free-text keyword search.
    pub const fn searchable_keys(self) -> &'static [&'static str] {
        match self {
            Self::Api => &["url", "method", "status_text", "trace_id", "query_url"],
            Self::Event => &["tag_text", "tag_name", "node_id", "log_name", "log_id"],
            Self::Error => &["value", "error_type", "meta.url", "meta.file"],
            Self::Custom => &["event_category", "event_action", "event_label", "event_id"],
            Self::Performance => &["path"],
            Self::Pageview => &["path", "referrer"],
            Self::UserFeedback => &["content", "trace_id"],
            Self::ScreenRecording => &["trace_id", "page_id", "monitor_id"],
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Category {
    type Err = String;

    /// Accepts either the wire tag (`PREF`) or the lowercase name
    /// (`performance`).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|c| c.tag().eq_ignore_ascii_case(s) || c.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| format!("unknown category: {s}"))
    }
}

/// Which record variant an index entry points at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RefType {
    ApiLog,
    EventLog,
    ErrorLog,
    CustomLog,
    PerfLog,
    PvLog,
}

impl RefType {
    /// Serialised discriminator, as stored in index entries.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::ApiLog => "ApiLog",
            Self::EventLog => "EventLog",
            Self::ErrorLog => "ErrorLog",
            Self::CustomLog => "CustomLog",
            Self::PerfLog => "PerfLog",
            Self::PvLog => "PvLog",
        }
    }

    pub const fn category(self) -> Category {
        match self {
            Self::ApiLog => Category::Api,
            Self::EventLog => Category::Event,
            Self::ErrorLog => Category::Error,
            Self::CustomLog => Category::Custom,
            Self::PerfLog => Category::Performance,
            Self::PvLog => Category::Pageview,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_tags_round_trip_through_serde() {
        for category in Category::ALL {
            let json = serde_json::to_string(&category).unwrap();
            assert_eq!(json, format!("\"{}\"", category.tag()));
            let back: Category = serde_json::from_str(&json).unwrap();
            assert_eq!(back, category);
        }
    }

    #[test]
    fn parses_tag_or_name() {
        assert_eq!("PREF".parse::<Category>().unwrap(), Category::Performance);
        assert_eq!("performance".parse::<Category>().unwrap(), Category::Performance);
        assert_eq!("rv".parse::<Category>().unwrap(), Category::ScreenRecording);
        assert!("metrics".parse::<Category>().is_err());
    }

    #[test]
    fn feedback_and_recordings_are_not_indexed() {
        let indexed: Vec<_> = Category::ALL.into_iter().filter(|c| c.is_indexed()).collect();
        assert_eq!(indexed.len(), 6);
        assert!(!Category::UserFeedback.is_indexed());
        assert!(!Category::ScreenRecording.is_indexed());
        for category in indexed {
            assert_eq!(category.ref_type().map(RefType::category), Some(category));
        }
        let json = serde_json::to_value(RefType::PerfLog).unwrap();
        assert_eq!(json.as_str(), Some(RefType::PerfLog.as_str()));
    }
}
