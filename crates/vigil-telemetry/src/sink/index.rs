use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::instrument;

use super::ids_filter;
use crate::model::{LogIndexEntry, RecordId, RefType, SiteId};
use crate::store::{to_document, Collection, Database, Filter};
use crate::TelemetryError;

/// Name of the collection holding the unified index.
pub const INDEX_COLLECTION: &str = "log_index";

/// Unified, searchable index over every indexed category.
#[derive(Clone)]
pub struct LogIndex {
    collection: Arc<dyn Collection>,
}

impl LogIndex {
    pub fn new(collection: Arc<dyn Collection>) -> Self {
        Self { collection }
    }

    pub fn open(database: &dyn Database) -> Self {
        Self::new(database.collection(INDEX_COLLECTION))
    }

    pub fn collection(&self) -> &Arc<dyn Collection> {
        &self.collection
    }

    #[instrument(skip(self, entry), fields(ref_type = ?entry.ref_type, record_id = %entry.record_id))]
    pub async fn write(&self, entry: &LogIndexEntry) -> Result<RecordId, TelemetryError> {
        let mut document = to_document(entry)?;
        document.remove("id");
        Ok(self.collection.insert(document).await?)
    }

    pub async fn delete_by_site(&self, site_id: &SiteId) -> Result<u64, TelemetryError> {
        let filter = Filter::eq("site_id", site_id.as_str());
        Ok(self.collection.delete_many(&filter).await?)
    }

    /// Remove the entries pointing at `record_ids` of one record kind.
    pub async fn delete_by_records(
        &self,
        ref_type: RefType,
        record_ids: &[RecordId],
    ) -> Result<u64, TelemetryError> {
        if record_ids.is_empty() {
            return Ok(0);
        }
        let filter = ref_type_filter(ref_type).and(Filter::is_in(
            "record_id",
            record_ids.iter().map(|id| id.0),
        ));
        Ok(self.collection.delete_many(&filter).await?)
    }

    pub async fn delete_by_ids(&self, ids: &[RecordId]) -> Result<u64, TelemetryError> {
        if ids.is_empty() {
            return Ok(0);
        }
        Ok(self.collection.delete_many(&ids_filter(ids)).await?)
    }

    /// Delete entries older than `cutoff`, optionally only those of one
    /// record kind.
    pub async fn delete_created_before(
        &self,
        cutoff: DateTime<Utc>,
        ref_type: Option<RefType>,
    ) -> Result<u64, TelemetryError> {
        let mut filter = Filter::lt("create_at", cutoff.timestamp_millis());
        if let Some(ref_type) = ref_type {
            filter = filter.and(ref_type_filter(ref_type));
        }
        Ok(self.collection.delete_many(&filter).await?)
    }
}

fn ref_type_filter(ref_type: RefType) -> Filter {
    Filter::eq("ref_type", ref_type.as_str())
}

impl std::fmt::Debug for LogIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LogIndex")
            .field("collection", &self.collection.name())
            .finish()
    }
}
