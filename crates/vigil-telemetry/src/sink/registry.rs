use std::collections::HashMap;
use std::sync::Arc;

use tracing::instrument;

use super::{LogIndex, RecordSink, Sink};
use crate::model::{
    ApiRecord, Category, CustomRecord, ErrorRecord, EventRecord, FeedbackRecord, PageviewRecord,
    PerformanceRecord, RecordId, RecordingRecord, RefType, SiteId,
};
use crate::store::{Database, Document};
use crate::TelemetryError;

/// Rows removed by a site cascade.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CascadeReport {
    pub records: u64,
    pub index_entries: u64,
}

/// Lookup table from [`Category`] to its sink, plus the unified index.
#[derive(Clone)]
pub struct SinkRegistry {
    sinks: HashMap<Category, Arc<dyn Sink>>,
    index: LogIndex,
}

impl SinkRegistry {
    /// Open one sink per category over `database`.
    pub fn new(database: &dyn Database) -> Self {
        fn open<R: super::SinkRecord>(database: &dyn Database) -> (Category, Arc<dyn Sink>) {
            let sink = RecordSink::<R>::new(database.collection(R::CATEGORY.collection()));
            (R::CATEGORY, Arc::new(sink))
        }

        let sinks = HashMap::from([
            open::<ApiRecord>(database),
            open::<EventRecord>(database),
            open::<ErrorRecord>(database),
            open::<CustomRecord>(database),
            open::<PerformanceRecord>(database),
            open::<PageviewRecord>(database),
            open::<FeedbackRecord>(database),
            open::<RecordingRecord>(database),
        ]);

        Self {
            sinks,
            index: LogIndex::open(database),
        }
    }

    /// Replace the sink for its category.
    #[must_use]
    pub fn with_sink(mut self, sink: Arc<dyn Sink>) -> Self {
        self.sinks.insert(sink.category(), sink);
        self
    }

    pub fn sink(&self, category: Category) -> Result<&Arc<dyn Sink>, TelemetryError> {
        self.sinks
            .get(&category)
            .ok_or_else(|| TelemetryError::not_found("sink", category.as_str()))
    }

    pub fn index(&self) -> &LogIndex {
        &self.index
    }

    /// Fetch the record an index entry points at.
    pub async fn resolve(
        &self,
        ref_type: RefType,
        record_id: RecordId,
    ) -> Result<Option<Document>, TelemetryError> {
        self.sink(ref_type.category())?.find_by_id(record_id).await
    }

    /// Delete every record and index entry belonging to `site_id`.
    #[instrument(skip(self), fields(site_id = %site_id))]
    pub async fn delete_site(&self, site_id: &SiteId) -> Result<CascadeReport, TelemetryError> {
        let deletes = self.sinks.values().map(|sink| async move {
            let deleted = sink.delete_by_site(site_id).await?;
            tracing::debug!(category = %sink.category(), deleted, "Deleted site records");
            Ok::<_, TelemetryError>(deleted)
        });
        let records: u64 = futures::future::try_join_all(deletes).await?.into_iter().sum();
        let report = CascadeReport {
            records,
            index_entries: self.index.delete_by_site(site_id).await?,
        };
        tracing::info!(
            records = report.records,
            index_entries = report.index_entries,
            "Site data deleted"
        );
        Ok(report)
    }

    /// Delete records of one category together with their index entries.
    #[instrument(skip(self, ids), fields(category = %category, count = ids.len()))]
    pub async fn delete_records(
        &self,
        category: Category,
        ids: &[RecordId],
    ) -> Result<u64, TelemetryError> {
        let deleted = self.sink(category)?.delete_by_ids(ids).await?;
        if let Some(ref_type) = category.ref_type() {
            self.index.delete_by_records(ref_type, ids).await?;
        }
        Ok(deleted)
    }
}

impl std::fmt::Debug for SinkRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SinkRegistry")
            .field("sinks", &self.sinks.len())
            .field("index", &self.index)
            .finish()
    }
}
