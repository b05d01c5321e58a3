//! Per-category persistence boundary.
//!
//! Each category has its own [`Sink`] over a dedicated collection. The
//! [`SinkRegistry`] is the lookup table the dispatcher, the paginator and
//! the cleanup paths use to find the sink for a category.

mod index;
mod record;
mod registry;

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;

pub use index::LogIndex;
pub use record::{RecordSink, SinkRecord};
pub use registry::{CascadeReport, SinkRegistry};

use crate::geo::Location;
use crate::model::{Category, CategoryRecord, RecordId, SiteId};
use crate::store::{Collection, Document, Filter, FindOptions};
use crate::TelemetryError;

pub(crate) fn ids_filter(ids: &[RecordId]) -> Filter {
    Filter::is_in("id", ids.iter().map(|id| id.0))
}

#[async_trait]
pub trait Sink: Send + Sync {
    fn category(&self) -> Category;

    fn collection(&self) -> &Arc<dyn Collection>;

    /// Persist a record and return its store-assigned id.
    async fn create(&self, record: &CategoryRecord) -> Result<RecordId, TelemetryError>;

    async fn find_by_id(&self, id: RecordId) -> Result<Option<Document>, TelemetryError> {
        Ok(self.collection().find_one(&Filter::eq("id", id.0)).await?)
    }

    async fn find_by_ids(
        &self,
        ids: &[RecordId],
        exclude: &[String],
    ) -> Result<Vec<Document>, TelemetryError> {
        let options = FindOptions::new().exclude(exclude.iter().cloned());
        Ok(self.collection().find(&ids_filter(ids), &options).await?)
    }

    async fn delete_by_site(&self, site_id: &SiteId) -> Result<u64, TelemetryError> {
        let filter = Filter::eq("site_id", site_id.as_str());
        Ok(self.collection().delete_many(&filter).await?)
    }

    async fn delete_by_ids(&self, ids: &[RecordId]) -> Result<u64, TelemetryError> {
        if ids.is_empty() {
            return Ok(0);
        }
        Ok(self.collection().delete_many(&ids_filter(ids)).await?)
    }

    async fn delete_created_before(&self, cutoff: DateTime<Utc>) -> Result<u64, TelemetryError> {
        let filter = Filter::lt("create_at", cutoff.timestamp_millis());
        Ok(self.collection().delete_many(&filter).await?)
    }

    /// Record the resolved location of the client that sent `id`.
    async fn attach_location(
        &self,
        id: RecordId,
        location: &Location,
    ) -> Result<(), TelemetryError> {
        let mut fields = Document::new();
        fields.insert("ip_location".to_string(), serde_json::to_value(location)?);
        let touched = self
            .collection()
            .update_fields(&Filter::eq("id", id.0), fields)
            .await?;
        if touched == 0 {
            return Err(TelemetryError::not_found("record", id.to_string()));
        }
        Ok(())
    }
}

/// Read a numeric record id out of a stored document.
pub(crate) fn document_id(document: &Document) -> Option<RecordId> {
    document.get("id").and_then(Value::as_u64).map(RecordId)
}
