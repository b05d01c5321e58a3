use std::fmt;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::{Category, SiteId};
use crate::geo::Location;
use crate::store::to_document;

/// Store-assigned, monotonically increasing record identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecordId(pub u64);

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Fields shared by every category record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordHeader {
    #[serde(default)]
    pub id: Option<RecordId>,
    pub site_id: SiteId,
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub ip: Option<String>,
    #[serde(default)]
    pub ip_location: Option<Location>,
    #[serde(default)]
    pub reports_type: Option<String>,
    /// Client environment, e.g. `production`.
    #[serde(default)]
    pub mode: Option<String>,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub create_at: DateTime<Utc>,
}

impl RecordHeader {
    pub fn new(site_id: SiteId, create_at: DateTime<Utc>) -> Self {
        Self {
            id: None,
            site_id,
            user_id: None,
            ip: None,
            ip_location: None,
            reports_type: None,
            mode: None,
            create_at,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiRecord {
    #[serde(flatten)]
    pub header: RecordHeader,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub method: Option<String>,
    #[serde(default)]
    pub body: Option<Value>,
    #[serde(default)]
    pub params: Option<Value>,
    #[serde(default)]
    pub status: Option<i64>,
    #[serde(default)]
    pub status_text: Option<String>,
    /// Client epoch milliseconds when the request was sent.
    #[serde(default)]
    pub request_time: Option<i64>,
    /// Client epoch milliseconds when the response arrived.
    #[serde(default)]
    pub response_time: Option<i64>,
    #[serde(default)]
    pub response: Option<Value>,
    #[serde(default)]
    pub trace_id: Option<String>,
    #[serde(default)]
    pub monitor_id: Option<String>,
    #[serde(default)]
    pub query_url: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ErrorMeta {
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub method: Option<String>,
    #[serde(default)]
    pub status: Option<Value>,
    #[serde(default)]
    pub response: Option<Value>,
    #[serde(default)]
    pub body: Option<Value>,
    #[serde(default)]
    pub params: Option<Value>,
    #[serde(default)]
    pub file: Option<String>,
    #[serde(default)]
    pub col: Option<Value>,
    #[serde(default)]
    pub row: Option<Value>,
    #[serde(default)]
    pub component_name: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StackFrame {
    #[serde(default)]
    pub filename: Option<String>,
    #[serde(default)]
    pub function_name: Option<String>,
    #[serde(default)]
    pub lineno: Option<u64>,
    #[serde(default)]
    pub colno: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorRecord {
    #[serde(flatten)]
    pub header: RecordHeader,
    #[serde(default)]
    pub error_type: Option<String>,
    /// Error message.
    #[serde(default)]
    pub value: Option<String>,
    #[serde(default)]
    pub meta: ErrorMeta,
    #[serde(default)]
    pub stack_trace: Vec<StackFrame>,
    #[serde(default)]
    pub breadcrumbs: Option<Value>,
    #[serde(default)]
    pub error_detail: Option<Value>,
    #[serde(default)]
    pub error_uuid: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventRecord {
    #[serde(flatten)]
    pub header: RecordHeader,
    #[serde(default)]
    pub tag_text: Option<String>,
    #[serde(default)]
    pub tag_name: Option<String>,
    #[serde(default)]
    pub node_dom: Option<String>,
    #[serde(default)]
    pub node_id: Option<String>,
    #[serde(default)]
    pub class_list: Option<Value>,
    #[serde(default)]
    pub log_name: Option<String>,
    #[serde(default)]
    pub log_data: Option<Value>,
    #[serde(default)]
    pub log_pos: Option<String>,
    #[serde(default)]
    pub log_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CustomRecord {
    #[serde(flatten)]
    pub header: RecordHeader,
    #[serde(default)]
    pub event_category: Option<String>,
    #[serde(default)]
    pub event_action: Option<String>,
    #[serde(default)]
    pub event_label: Option<String>,
    #[serde(default)]
    pub event_value: Option<Value>,
    #[serde(default)]
    pub event_id: Option<String>,
}

/// Navigation timing marks, all in milliseconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerformanceRecord {
    #[serde(flatten)]
    pub header: RecordHeader,
    #[serde(default)]
    pub path: Option<String>,
    #[serde(default)]
    pub fp: Option<f64>,
    #[serde(default)]
    pub tti: Option<f64>,
    #[serde(default)]
    pub dom_ready: Option<f64>,
    #[serde(default)]
    pub load: Option<f64>,
    #[serde(default)]
    pub dns: Option<f64>,
    #[serde(default)]
    pub tcp: Option<f64>,
    #[serde(default)]
    pub ssl: Option<f64>,
    #[serde(default)]
    pub ttfb: Option<f64>,
    #[serde(default)]
    pub trans: Option<f64>,
    #[serde(default)]
    pub dom_parse: Option<f64>,
    #[serde(default)]
    pub res: Option<f64>,
    #[serde(default)]
    pub fmp_time: Option<f64>,
    #[serde(default)]
    pub fcp_time: Option<f64>,
    #[serde(default)]
    pub cache_rate: Option<f64>,
    #[serde(default)]
    pub resource_prefs: Option<Value>,
    #[serde(default)]
    pub nt_timing: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PageviewRecord {
    #[serde(flatten)]
    pub header: RecordHeader,
    #[serde(default)]
    pub path: Option<String>,
    #[serde(default)]
    pub referrer: Option<String>,
    #[serde(default)]
    pub ua_result: Option<Value>,
    #[serde(default)]
    pub win_screen: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedbackRecord {
    #[serde(flatten)]
    pub header: RecordHeader,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub events: Option<Value>,
    #[serde(default)]
    pub o_id: Option<String>,
    #[serde(default)]
    pub extra_info: Option<Value>,
    #[serde(default)]
    pub trace_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordingRecord {
    #[serde(flatten)]
    pub header: RecordHeader,
    #[serde(default)]
    pub monitor_id: Option<String>,
    /// Serialised rrweb-style event stream, kept opaque.
    #[serde(default)]
    pub events: Value,
    #[serde(default)]
    pub trace_id: Option<String>,
    #[serde(default)]
    pub page_id: Option<String>,
}

/// A persisted telemetry record, one variant per [`Category`].
#[derive(Debug, Clone, PartialEq)]
pub enum CategoryRecord {
    Api(ApiRecord),
    Event(EventRecord),
    Error(ErrorRecord),
    Custom(CustomRecord),
    Performance(PerformanceRecord),
    Pageview(PageviewRecord),
    UserFeedback(FeedbackRecord),
    ScreenRecording(RecordingRecord),
}

/// Dispatch `$body` over every variant with `$r` bound to the inner record.
macro_rules! each_variant {
    ($value:expr, $r:ident => $body:expr) => {
        match $value {
            CategoryRecord::Api($r) => $body,
            CategoryRecord::Event($r) => $body,
            CategoryRecord::Error($r) => $body,
            CategoryRecord::Custom($r) => $body,
            CategoryRecord::Performance($r) => $body,
            CategoryRecord::Pageview($r) => $body,
            CategoryRecord::UserFeedback($r) => $body,
            CategoryRecord::ScreenRecording($r) => $body,
        }
    };
}

impl CategoryRecord {
    pub const fn category(&self) -> Category {
        match self {
            Self::Api(_) => Category::Api,
            Self::Event(_) => Category::Event,
            Self::Error(_) => Category::Error,
            Self::Custom(_) => Category::Custom,
            Self::Performance(_) => Category::Performance,
            Self::Pageview(_) => Category::Pageview,
            Self::UserFeedback(_) => Category::UserFeedback,
            Self::ScreenRecording(_) => Category::ScreenRecording,
        }
    }

    pub fn header(&self) -> &RecordHeader {
        each_variant!(self, r => &r.header)
    }

    pub fn header_mut(&mut self) -> &mut RecordHeader {
        each_variant!(self, r => &mut r.header)
    }

    /// Decode a normalised document into the variant for `category`.
    pub fn from_document(
        category: Category,
        document: Map<String, Value>,
    ) -> Result<Self, serde_json::Error> {
        fn decode<T: DeserializeOwned>(doc: Map<String, Value>) -> Result<T, serde_json::Error> {
            serde_json::from_value(Value::Object(doc))
        }

        Ok(match category {
            Category::Api => Self::Api(decode(document)?),
            Category::Event => Self::Event(decode(document)?),
            Category::Error => Self::Error(decode(document)?),
            Category::Custom => Self::Custom(decode(document)?),
            Category::Performance => Self::Performance(decode(document)?),
            Category::Pageview => Self::Pageview(decode(document)?),
            Category::UserFeedback => Self::UserFeedback(decode(document)?),
            Category::ScreenRecording => Self::ScreenRecording(decode(document)?),
        })
    }

    /// Encode as a store document. `None` fields are omitted rather than
    /// stored as explicit nulls.
    pub fn to_document(&self) -> Result<Map<String, Value>, serde_json::Error> {
        each_variant!(self, r => to_document(r))
    }
}
