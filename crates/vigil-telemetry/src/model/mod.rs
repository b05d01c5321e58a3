//! Domain types: telemetry categories, records, sites and their rules.

mod category;
mod envelope;
mod index;
mod record;
mod site;

pub use category::{Category, RefType};
pub use envelope::TelemetryEnvelope;
pub use index::LogIndexEntry;
pub use record::{
    ApiRecord, CategoryRecord, CustomRecord, ErrorMeta, ErrorRecord, EventRecord,
    FeedbackRecord, PageviewRecord, PerformanceRecord, RecordHeader, RecordId,
    RecordingRecord, StackFrame,
};
pub use site::{AlertRule, Site, SiteDraft, SiteId, SiteState};
