//! Listings for the categories kept out of the unified index.

use tracing::instrument;

use super::filter::QueryFilter;
use super::paginate::{OffsetPage, OffsetPaginator, DEFAULT_PAGE_SIZE};
use crate::model::{Category, RecordId, SiteId};
use crate::sink::SinkRegistry;
use crate::store::{remove_path, Document, Filter, FindOptions, SortKey, SortOrder};
use crate::TelemetryError;

/// Fields left out of feedback listings; served by
/// [`RecordQueries::feedback_detail`].
pub const FEEDBACK_LIST_EXCLUDE: &[&str] = &["events"];

/// Feedback and screen-recording lookups.
#[derive(Debug, Clone)]
pub struct RecordQueries {
    registry: SinkRegistry,
}

impl RecordQueries {
    pub fn new(registry: SinkRegistry) -> Self {
        Self { registry }
    }

    /// Page through a site's feedback, newest first unless `sort` says
    /// otherwise. Replayed events are left out.
    #[instrument(skip(self, query))]
    pub async fn feedback_page(&self, query: &QueryFilter) -> Result<OffsetPage, TelemetryError> {
        let sink = self.registry.sink(Category::UserFeedback)?;
        let filter = query.to_filter(Category::UserFeedback.searchable_keys())?;
        let order = query.sort.unwrap_or(SortOrder::Descending);

        let mut page = OffsetPaginator::paginate(
            sink.collection().as_ref(),
            &filter,
            query.page.unwrap_or(1),
            query.size.unwrap_or(DEFAULT_PAGE_SIZE),
            &[SortKey::new("id", order)],
        )
        .await?;
        for row in &mut page.data {
            for path in FEEDBACK_LIST_EXCLUDE {
                remove_path(row, path);
            }
        }
        Ok(page)
    }

    /// One feedback record with every field.
    pub async fn feedback_detail(&self, id: RecordId) -> Result<Document, TelemetryError> {
        self.registry
            .sink(Category::UserFeedback)?
            .find_by_id(id)
            .await?
            .ok_or_else(|| TelemetryError::not_found("feedback", id.to_string()))
    }

    /// Recordings of `site_id` captured under any of `monitor_ids`, oldest
    /// first.
    #[instrument(skip(self, monitor_ids), fields(site_id = %site_id, count = monitor_ids.len()))]
    pub async fn recordings_by_monitor_ids(
        &self,
        site_id: &SiteId,
        monitor_ids: &[String],
    ) -> Result<Vec<Document>, TelemetryError> {
        if monitor_ids.is_empty() {
            return Ok(Vec::new());
        }
        let filter = Filter::eq("site_id", site_id.as_str())
            .and(Filter::is_in("monitor_id", monitor_ids.iter().map(String::as_str)));
        let options = FindOptions::new().sort_by("id", SortOrder::Ascending);
        let sink = self.registry.sink(Category::ScreenRecording)?;
        Ok(sink.collection().find(&filter, &options).await?)
    }
}
