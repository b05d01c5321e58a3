use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{Category, RecordId, RefType, SiteId};

/// Searchable projection of an indexed record.
///
/// Each entry points at exactly one record in the sink for `ref_type`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogIndexEntry {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<RecordId>,
    pub site_id: SiteId,
    pub category: Category,
    pub ref_type: RefType,
    pub record_id: RecordId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ip: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reports_type: Option<String>,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub create_at: DateTime<Utc>,
}
