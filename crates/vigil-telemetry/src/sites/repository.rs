use std::sync::Arc;

use serde_json::Value;

use crate::model::{Site, SiteId};
use crate::query::{OffsetPage, OffsetPaginator};
use crate::store::{to_document, Collection, Database, Document, Filter, SortKey};
use crate::TelemetryError;

pub const SITES_COLLECTION: &str = "sites";

/// Origin store for sites, keyed by the `site_id` field.
#[derive(Clone)]
pub struct SiteRepository {
    collection: Arc<dyn Collection>,
}

impl SiteRepository {
    pub fn new(collection: Arc<dyn Collection>) -> Self {
        Self { collection }
    }

    pub fn open(database: &dyn Database) -> Self {
        Self::new(database.collection(SITES_COLLECTION))
    }

    fn by_id(id: &SiteId) -> Filter {
        Filter::eq("site_id", id.as_str())
    }

    pub async fn find(&self, id: &SiteId) -> Result<Option<Site>, TelemetryError> {
        self.collection
            .find_one(&Self::by_id(id))
            .await?
            .map(decode)
            .transpose()
    }

    pub async fn find_by_name(&self, name: &str) -> Result<Option<Site>, TelemetryError> {
        self.collection
            .find_one(&Filter::eq("name", name))
            .await?
            .map(decode)
            .transpose()
    }

    pub async fn insert(&self, site: &Site) -> Result<(), TelemetryError> {
        self.collection.insert(to_document(site)?).await?;
        Ok(())
    }

    /// Overwrite every stored field of an existing site.
    pub async fn replace(&self, site: &Site) -> Result<bool, TelemetryError> {
        let mut fields = to_document(site)?;
        // Cleared optionals must overwrite what is stored.
        for key in ["alert_url", "feedback_url"] {
            fields.entry(key).or_insert(Value::Null);
        }
        let touched = self
            .collection
            .update_fields(&Self::by_id(&site.id), fields)
            .await?;
        Ok(touched > 0)
    }

    pub async fn delete(&self, id: &SiteId) -> Result<bool, TelemetryError> {
        Ok(self.collection.delete_many(&Self::by_id(id)).await? > 0)
    }

    pub async fn list(&self, page: usize, size: usize) -> Result<OffsetPage<Site>, TelemetryError> {
        let page = OffsetPaginator::paginate(
            self.collection.as_ref(),
            &Filter::All,
            page,
            size,
            &[SortKey::desc("create_at")],
        )
        .await?;
        page.try_map(decode)
    }
}

fn decode(document: Document) -> Result<Site, TelemetryError> {
    Ok(serde_json::from_value(Value::Object(document))?)
}

impl std::fmt::Debug for SiteRepository {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SiteRepository")
            .field("collection", &self.collection.name())
            .finish()
    }
}
