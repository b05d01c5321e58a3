//! Bucketed analytics over the sinks and the unified index.

use serde_json::Value;
use tracing::instrument;

use super::bucket::{TimeBucketAggregation, DAY_MS};
use super::filter::QueryFilter;
use super::paginate::{page_offset, OffsetPage, DEFAULT_PAGE_SIZE};
use crate::model::Category;
use crate::sink::SinkRegistry;
use crate::store::{Accumulator, Collection, Document, Expr, Group, Pipeline, SortKey};
use crate::TelemetryError;

/// Bucket width used when the query does not name one.
pub const DEFAULT_TIME_SLOT_MS: i64 = DAY_MS;

const INDEX_SEARCH_KEYS: &[&str] = &["user_id", "ip", "reports_type"];

#[derive(Debug, Clone)]
pub struct Analytics {
    registry: SinkRegistry,
}

impl Analytics {
    pub fn new(registry: SinkRegistry) -> Self {
        Self { registry }
    }

    fn bucketed(
        query: &QueryFilter,
        searchable: &[&str],
    ) -> Result<TimeBucketAggregation, TelemetryError> {
        let filter = query.to_filter(searchable)?;
        TimeBucketAggregation::new(filter, query.time_slot.unwrap_or(DEFAULT_TIME_SLOT_MS))
    }

    /// Indexed records per bucket.
    #[instrument(skip(self, query))]
    pub async fn log_volume(&self, query: &QueryFilter) -> Result<Vec<Document>, TelemetryError> {
        let pipeline = Self::bucketed(query, INDEX_SEARCH_KEYS)?
            .accumulate("count", Accumulator::Count)
            .build();
        run(self.registry.index().collection().as_ref(), &pipeline).await
    }

    /// Request latency per bucket, URL and outcome.
    #[instrument(skip(self, query))]
    pub async fn api_timings(&self, query: &QueryFilter) -> Result<Vec<Document>, TelemetryError> {
        let time_len = Expr::subtract(Expr::field("response_time"), Expr::field("request_time"));
        let pipeline = Self::bucketed(query, Category::Api.searchable_keys())?
            .group_by("url", Expr::field("url"))
            .group_by(
                "status_txt",
                Expr::IfAtLeast {
                    value: Box::new(Expr::field("status")),
                    threshold: 400.0,
                    then: Value::from("fail"),
                    otherwise: Value::from("success"),
                },
            )
            .accumulate("max", Accumulator::Max(time_len.clone()))
            .accumulate("min", Accumulator::Min(time_len.clone()))
            .accumulate("avg", Accumulator::Avg(time_len))
            .accumulate("count", Accumulator::Count)
            .tie_break("count")
            .build();
        let sink = self.registry.sink(Category::Api)?;
        run(sink.collection().as_ref(), &pipeline).await
    }

    /// Errors per bucket and `reports_type`.
    #[instrument(skip(self, query))]
    pub async fn error_breakdown(
        &self,
        query: &QueryFilter,
    ) -> Result<Vec<Document>, TelemetryError> {
        let pipeline = Self::bucketed(query, Category::Error.searchable_keys())?
            .group_by("reports_type", Expr::field("reports_type"))
            .accumulate("count", Accumulator::Count)
            .tie_break("count")
            .build();
        let sink = self.registry.sink(Category::Error)?;
        run(sink.collection().as_ref(), &pipeline).await
    }

    /// `pv` and `uv` per bucket.
    #[instrument(skip(self, query))]
    pub async fn page_views(&self, query: &QueryFilter) -> Result<Vec<Document>, TelemetryError> {
        let pipeline = Self::bucketed(query, Category::Pageview.searchable_keys())?.build_pv_uv();
        let sink = self.registry.sink(Category::Pageview)?;
        run(sink.collection().as_ref(), &pipeline).await
    }

    /// Most frequent values of `field` in one category, most common first.
    #[instrument(skip(self, query))]
    pub async fn top_values(
        &self,
        category: Category,
        query: &QueryFilter,
        field: &str,
    ) -> Result<OffsetPage, TelemetryError> {
        let filter = query.to_filter(category.searchable_keys())?;
        let page = query.page.unwrap_or(1).max(1);
        let size = query.size.unwrap_or(DEFAULT_PAGE_SIZE);
        if size == 0 {
            return Err(TelemetryError::Validation("page size must be positive".to_string()));
        }

        let pipeline = Pipeline::new()
            .matching(filter)
            .group(
                Group::new()
                    .key(field, Expr::field(field))
                    .accumulate("count", Accumulator::Count),
            )
            .sort(vec![SortKey::desc("count"), SortKey::asc(field)]);
        let sink = self.registry.sink(category)?;
        let rows = run(sink.collection().as_ref(), &pipeline).await?;

        let total = rows.len() as u64;
        let data = rows.into_iter().skip(page_offset(page, size)).take(size).collect();
        Ok(OffsetPage {
            data,
            total,
            page,
            pages: total.div_ceil(size as u64),
        })
    }
}

async fn run(
    collection: &dyn Collection,
    pipeline: &Pipeline,
) -> Result<Vec<Document>, TelemetryError> {
    collection.aggregate(pipeline).await.map_err(|e| {
        tracing::warn!(collection = collection.name(), error = %e, "Aggregation failed");
        TelemetryError::aggregation(e)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::CategoryRecord;
    use crate::store::MemoryDatabase;
    use chrono::{TimeZone, Utc};
    use serde_json::json;

    fn registry() -> SinkRegistry {
        SinkRegistry::new(&MemoryDatabase::new())
    }

    async fn api(registry: &SinkRegistry, minute: i64, url: &str, status: i64, took: i64) {
        let start = minute * 60_000;
        let serde_json::Value::Object(doc) = json!({
            "site_id": "s1",
            "create_at": start,
            "url": url,
            "status": status,
            "request_time": start,
            "response_time": start + took,
        }) else {
            unreachable!()
        };
        let record = CategoryRecord::from_document(Category::Api, doc).unwrap();
        registry.sink(Category::Api).unwrap().create(&record).await.unwrap();
    }

    fn window() -> QueryFilter {
        QueryFilter::for_site("s1")
            .between(
                Utc.timestamp_millis_opt(0).unwrap(),
                Utc.timestamp_millis_opt(3_600_000).unwrap(),
            )
            .time_slot(3_600_000)
    }

    #[tokio::test]
    async fn api_timings_split_by_outcome() {
        let registry = registry();
        api(&registry, 1, "/users", 200, 100).await;
        api(&registry, 2, "/users", 200, 300).await;
        api(&registry, 3, "/users", 502, 50).await;

        let rows = Analytics::new(registry).api_timings(&window()).await.unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0]["status_txt"], "success");
        assert_eq!(rows[0]["count"], 2);
        assert_eq!(rows[0]["max"], 300);
        assert_eq!(rows[0]["min"], 100);
        assert_eq!(rows[0]["avg"], 200);
        assert_eq!(rows[1]["status_txt"], "fail");
    }

    #[tokio::test]
    async fn top_values_pages_by_frequency() {
        let registry = registry();
        for url in ["/a", "/b", "/b", "/c", "/c", "/c"] {
            api(&registry, 1, url, 200, 1).await;
        }
        let query = QueryFilter {
            size: Some(2),
            ..QueryFilter::for_site("s1")
        };
        let page = Analytics::new(registry)
            .top_values(Category::Api, &query, "url")
            .await
            .unwrap();
        assert_eq!(page.total, 3);
        assert_eq!(page.pages, 2);
        assert_eq!(page.data[0]["url"], "/c");
        assert_eq!(page.data[0]["count"], 3);
        assert_eq!(page.data[1]["url"], "/b");
    }

    #[tokio::test]
    async fn top_values_past_the_last_page_is_empty() {
        let registry = registry();
        api(&registry, 1, "/a", 200, 1).await;
        let query = QueryFilter {
            page: Some(usize::MAX),
            size: Some(usize::MAX),
            ..QueryFilter::for_site("s1")
        };
        let page = Analytics::new(registry)
            .top_values(Category::Api, &query, "url")
            .await
            .unwrap();
        assert!(page.data.is_empty());
        assert_eq!(page.total, 1);
    }

    #[tokio::test]
    async fn expression_failure_surfaces_as_aggregation() {
        let registry = registry();
        let collection = registry.sink(Category::Api).unwrap().collection().clone();
        let serde_json::Value::Object(doc) = json!({
            "site_id": "s1",
            "create_at": 60_000,
            "url": "/x",
            "request_time": "soon",
            "response_time": 5,
        }) else {
            unreachable!()
        };
        collection.insert(doc).await.unwrap();

        let err = Analytics::new(registry).api_timings(&window()).await.unwrap_err();
        assert!(matches!(err, TelemetryError::Aggregation { .. }));
    }

    #[tokio::test]
    async fn missing_site_is_validation() {
        let err = Analytics::new(registry())
            .log_volume(&QueryFilter::default())
            .await
            .unwrap_err();
        assert!(matches!(err, TelemetryError::Validation(_)));
    }
}
