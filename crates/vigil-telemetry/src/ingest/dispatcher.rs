use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use serde_json::{Map, Value};
use tracing::instrument;

use super::normalise::rename_keys;
use super::normalise_payload;
use crate::alert::{decide, AlertNotifier};
use crate::geo::GeoResolver;
use crate::model::{
    Category, CategoryRecord, LogIndexEntry, RecordId, Site, SiteId, TelemetryEnvelope,
};
use crate::sink::{Sink, SinkRegistry};
use crate::sites::SiteCacheResolver;
use crate::worker::{BackgroundPool, Submitted};
use crate::TelemetryError;

/// Where an ingested record ended up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct IngestReceipt {
    pub category: Category,
    pub record_id: RecordId,
    /// `None` for categories kept out of the unified index.
    pub index_id: Option<RecordId>,
}

/// Routes envelopes to their category sink and schedules side effects.
#[derive(Clone)]
pub struct Dispatcher {
    sites: SiteCacheResolver,
    registry: SinkRegistry,
    pool: Arc<BackgroundPool>,
    geo: Arc<GeoResolver>,
    notifier: Arc<AlertNotifier>,
}

impl Dispatcher {
    pub fn new(
        sites: SiteCacheResolver,
        registry: SinkRegistry,
        pool: Arc<BackgroundPool>,
        geo: Arc<GeoResolver>,
        notifier: Arc<AlertNotifier>,
    ) -> Self {
        Self {
            sites,
            registry,
            pool,
            geo,
            notifier,
        }
    }

    pub fn registry(&self) -> &SinkRegistry {
        &self.registry
    }

    /// Validate, persist and index one envelope.
    ///
    /// Alerting and geolocation run on the background pool and never affect
    /// the result.
    #[instrument(skip_all, fields(category = %envelope.category, site_id = ?envelope.site_id))]
    pub async fn ingest(&self, envelope: TelemetryEnvelope) -> Result<IngestReceipt, TelemetryError> {
        let site = self.resolve_site(envelope.site_id.as_deref()).await?;
        let category = envelope.category;
        let record = build_record(&site.id, envelope)?;
        let sink = self.registry.sink(category)?;

        let record_id = match sink.create(&record).await {
            Ok(id) => id,
            Err(e) => {
                self.report_save_failure(&site, &record, &e);
                return Err(e);
            }
        };

        let index_id = if category.is_indexed() {
            match self.write_index(&record, record_id).await {
                Ok(id) => id,
                Err(e) => {
                    self.report_save_failure(&site, &record, &e);
                    return Err(e);
                }
            }
        } else {
            None
        };

        self.schedule_side_effects(site, record, record_id, sink);
        tracing::debug!(record_id = %record_id, "Record ingested");
        Ok(IngestReceipt {
            category,
            record_id,
            index_id,
        })
    }

    async fn resolve_site(&self, site_id: Option<&str>) -> Result<Site, TelemetryError> {
        let site_id = site_id
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .ok_or_else(|| TelemetryError::Validation("site_id is required".to_string()))?;
        let site_id = SiteId::new(site_id);
        self.sites
            .get(&site_id)
            .await?
            .ok_or_else(|| TelemetryError::not_found("site", site_id.as_str()))
    }

    async fn write_index(
        &self,
        record: &CategoryRecord,
        record_id: RecordId,
    ) -> Result<Option<RecordId>, TelemetryError> {
        let Some(ref_type) = record.category().ref_type() else {
            return Ok(None);
        };
        let header = record.header();
        let entry = LogIndexEntry {
            id: None,
            site_id: header.site_id.clone(),
            category: record.category(),
            ref_type,
            record_id,
            user_id: header.user_id.clone(),
            ip: header.ip.clone(),
            reports_type: header.reports_type.clone(),
            create_at: header.create_at,
        };
        self.registry.index().write(&entry).await.map(Some)
    }

    fn schedule_side_effects(
        &self,
        site: Site,
        record: CategoryRecord,
        record_id: RecordId,
        sink: &Arc<dyn Sink>,
    ) {
        if let Some(ip) = record.header().ip.clone() {
            let geo = Arc::clone(&self.geo);
            let sink = Arc::clone(sink);
            self.submit("geo", async move {
                let Some(location) = geo.query_location(&ip).await else {
                    return;
                };
                if let Err(e) = sink.attach_location(record_id, &location).await {
                    tracing::warn!(record_id = %record_id, error = %e, "Failed to attach location");
                }
            });
        }

        let notifier = Arc::clone(&self.notifier);
        match record {
            CategoryRecord::Error(event) => {
                self.submit("alert", async move {
                    if !decide(&event, &site.alert_rules) {
                        tracing::debug!(site_id = %site.id, "Alert suppressed by rules");
                        return;
                    }
                    if let Err(e) = notifier.notify_error(&site, &event).await {
                        tracing::warn!(site_id = %site.id, error = %e, "Error alert not delivered");
                    }
                });
            }
            CategoryRecord::UserFeedback(feedback) => {
                self.submit("feedback", async move {
                    if let Err(e) = notifier.notify_feedback(&site, &feedback, record_id).await {
                        tracing::warn!(site_id = %site.id, error = %e, "Feedback notice not delivered");
                    }
                });
            }
            _ => {}
        }
    }

    fn report_save_failure(&self, site: &Site, record: &CategoryRecord, error: &TelemetryError) {
        tracing::error!(
            site_id = %site.id,
            category = %record.category(),
            error = %error,
            "Failed to persist record"
        );
        let notifier = Arc::clone(&self.notifier);
        let site = site.clone();
        let user_id = record.header().user_id.clone();
        let message = format!("{} record: {error}", record.category());
        self.submit("error-save", async move {
            if let Err(e) = notifier
                .notify_error_save(&site, user_id.as_deref(), &message)
                .await
            {
                tracing::warn!(site_id = %site.id, error = %e, "Save failure alert not delivered");
            }
        });
    }

    fn submit<F>(&self, label: &'static str, task: F)
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        if let Submitted::Closed = self.pool.submit(label, task) {
            tracing::debug!(task = label, "Background pool closed, side effect skipped");
        }
    }
}

/// Normalise the payload and stamp it with the envelope header. Recordings
/// are stored as sent apart from their key spelling.
fn build_record(site_id: &SiteId, envelope: TelemetryEnvelope) -> Result<CategoryRecord, TelemetryError> {
    let category = envelope.category;
    let mut document = match category {
        Category::ScreenRecording => rename_keys(envelope.payload),
        _ => normalise_payload(category, envelope.payload),
    };
    document.remove("ip_location");

    let mut header = Map::new();
    header.insert("site_id".to_string(), Value::from(site_id.as_str()));
    header.insert("create_at".to_string(), Value::from(Utc::now().timestamp_millis()));
    for (key, value) in [
        ("user_id", envelope.user_id),
        ("ip", envelope.ip),
        ("reports_type", envelope.reports_type),
        ("mode", envelope.mode),
    ] {
        match value.filter(|v| !v.trim().is_empty()) {
            Some(v) => header.insert(key.to_string(), Value::from(v)),
            None => document.remove(key),
        };
    }
    document.extend(header);

    CategoryRecord::from_document(category, document).map_err(|e| {
        TelemetryError::Validation(format!("invalid {} payload: {e}", category.as_str()))
    })
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("registry", &self.registry)
            .field("pool", &self.pool)
            .finish_non_exhaustive()
    }
}
