use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::model::SiteId;
use crate::store::{Filter, SortOrder};
use crate::TelemetryError;

/// Query parameters shared by list, search and aggregation calls.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct QueryFilter {
    pub site_id: Option<SiteId>,
    /// Free-text search over the category's searchable keys.
    pub kw: Option<String>,
    /// Per-field search; nested objects address dotted paths.
    pub keyword: Map<String, Value>,
    #[serde(with = "chrono::serde::ts_milliseconds_option")]
    pub start_time: Option<DateTime<Utc>>,
    #[serde(with = "chrono::serde::ts_milliseconds_option")]
    pub end_time: Option<DateTime<Utc>>,
    /// Bucket width in milliseconds.
    pub time_slot: Option<i64>,
    pub path: Option<String>,
    pub reports_type: Option<String>,
    pub page: Option<usize>,
    pub size: Option<usize>,
    pub cursor: Option<Value>,
    pub limit: Option<usize>,
    pub sort: Option<SortOrder>,
}

impl QueryFilter {
    pub fn for_site(site_id: impl Into<String>) -> Self {
        Self {
            site_id: Some(SiteId::new(site_id)),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn between(mut self, start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        self.start_time = Some(start);
        self.end_time = Some(end);
        self
    }

    #[must_use]
    pub fn time_slot(mut self, slot_ms: i64) -> Self {
        self.time_slot = Some(slot_ms);
        self
    }

    #[must_use]
    pub fn kw(mut self, kw: impl Into<String>) -> Self {
        self.kw = Some(kw.into());
        self
    }

    #[must_use]
    pub fn keyword(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.keyword.insert(field.into(), value.into());
        self
    }

    /// Build the store filter. `site_id` is required.
    pub fn to_filter(&self, searchable_keys: &[&str]) -> Result<Filter, TelemetryError> {
        let site_id = self
            .site_id
            .as_ref()
            .filter(|id| !id.as_str().trim().is_empty())
            .ok_or_else(|| TelemetryError::Validation("site_id is required".to_string()))?;

        let mut filter = Filter::eq("site_id", site_id.as_str());

        if let Some(kw) = self.kw.as_deref().map(str::trim).filter(|kw| !kw.is_empty()) {
            let any = searchable_keys
                .iter()
                .map(|key| Filter::contains_ignore_case(*key, kw))
                .collect::<Vec<_>>();
            if !any.is_empty() {
                filter = filter.and(Filter::Or(any));
            }
        }

        let mut fields = Vec::new();
        flatten_keyword(&self.keyword, None, &mut fields);
        for field in fields {
            filter = filter.and(field);
        }

        if let Some(start) = self.start_time {
            filter = filter.and(Filter::gte("create_at", start.timestamp_millis()));
        }
        if let Some(end) = self.end_time {
            filter = filter.and(Filter::lt("create_at", end.timestamp_millis()));
        }
        if let Some(path) = &self.path {
            filter = filter.and(Filter::eq("path", path.as_str()));
        }
        if let Some(reports_type) = &self.reports_type {
            filter = filter.and(Filter::eq("reports_type", reports_type.as_str()));
        }
        Ok(filter)
    }
}

fn flatten_keyword(map: &Map<String, Value>, prefix: Option<&str>, out: &mut Vec<Filter>) {
    for (key, value) in map {
        let path = match prefix {
            Some(prefix) => format!("{prefix}.{key}"),
            None => key.clone(),
        };
        match value {
            Value::Object(inner) => flatten_keyword(inner, Some(&path), out),
            Value::Null => {}
            Value::Number(_) if path.contains("body") => out.push(Filter::eq(path, value.clone())),
            Value::String(s) => out.push(Filter::contains_ignore_case(path, s)),
            other => out.push(Filter::contains_ignore_case(path, &other.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    fn doc(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => panic!("expected object"),
        }
    }

    #[test]
    fn site_id_is_required() {
        let err = QueryFilter::default().to_filter(&[]).unwrap_err();
        assert!(matches!(err, TelemetryError::Validation(_)));
        let blank = QueryFilter::for_site("  ").to_filter(&[]).unwrap_err();
        assert!(matches!(blank, TelemetryError::Validation(_)));
    }

    #[test]
    fn kw_searches_any_key_case_insensitively() {
        let filter = QueryFilter::for_site("s1")
            .kw("TYPEerror")
            .to_filter(&["value", "error_type"])
            .unwrap();
        assert!(filter.matches(&doc(json!({"site_id": "s1", "error_type": "TypeError"}))));
        assert!(filter.matches(&doc(json!({"site_id": "s1", "value": "a typeerror here"}))));
        assert!(!filter.matches(&doc(json!({"site_id": "s1", "value": "fine"}))));
        assert!(!filter.matches(&doc(json!({"site_id": "s2", "error_type": "TypeError"}))));
    }

    #[test]
    fn keyword_map_flattens_to_paths() {
        let filter = QueryFilter::for_site("s1")
            .keyword("meta", json!({"url": "/API/users"}))
            .keyword("body", json!({"page": 2}))
            .to_filter(&[])
            .unwrap();
        let hit = doc(json!({
            "site_id": "s1",
            "meta": {"url": "https://x.test/api/users?id=1"},
            "body": {"page": 2}
        }));
        let miss = doc(json!({
            "site_id": "s1",
            "meta": {"url": "https://x.test/api/users"},
            "body": {"page": 20}
        }));
        assert!(filter.matches(&hit));
        assert!(!filter.matches(&miss));
    }

    #[test]
    fn keyword_is_literal_not_regex() {
        let filter = QueryFilter::for_site("s1")
            .keyword("value", "a.b")
            .to_filter(&[])
            .unwrap();
        assert!(filter.matches(&doc(json!({"site_id": "s1", "value": "xa.by"}))));
        assert!(!filter.matches(&doc(json!({"site_id": "s1", "value": "axb"}))));
    }

    #[test]
    fn window_is_half_open() {
        let start = Utc.timestamp_millis_opt(1_000).unwrap();
        let end = Utc.timestamp_millis_opt(2_000).unwrap();
        let filter = QueryFilter::for_site("s1").between(start, end).to_filter(&[]).unwrap();
        let at = |ms: i64| doc(json!({"site_id": "s1", "create_at": ms}));
        assert!(filter.matches(&at(1_000)));
        assert!(filter.matches(&at(1_999)));
        assert!(!filter.matches(&at(2_000)));
        assert!(!filter.matches(&at(999)));
    }

    #[test]
    fn deserialises_camel_case_query() {
        let query: QueryFilter = serde_json::from_value(json!({
            "siteId": "s1",
            "startTime": 0,
            "timeSlot": 300000,
            "reportsType": "js",
            "sort": "desc"
        }))
        .unwrap();
        assert_eq!(query.time_slot, Some(300_000));
        assert_eq!(query.reports_type.as_deref(), Some("js"));
        assert_eq!(query.sort, Some(SortOrder::Descending));
    }
}
