use std::marker::PhantomData;
use std::sync::Arc;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;

use super::Sink;
use crate::model::{
    ApiRecord, Category, CategoryRecord, CustomRecord, ErrorRecord, EventRecord, FeedbackRecord,
    PageviewRecord, PerformanceRecord, RecordId, RecordingRecord,
};
use crate::store::{to_document, Collection};
use crate::TelemetryError;

/// A record struct that owns a category's sink.
pub trait SinkRecord: Serialize + DeserializeOwned + Send + Sync + 'static {
    const CATEGORY: Category;

    fn from_record(record: &CategoryRecord) -> Option<&Self>;
}

macro_rules! sink_record {
    ($ty:ty, $variant:ident) => {
        impl SinkRecord for $ty {
            const CATEGORY: Category = Category::$variant;

            fn from_record(record: &CategoryRecord) -> Option<&Self> {
                match record {
                    CategoryRecord::$variant(r) => Some(r),
                    _ => None,
                }
            }
        }
    };
}

sink_record!(ApiRecord, Api);
sink_record!(EventRecord, Event);
sink_record!(ErrorRecord, Error);
sink_record!(CustomRecord, Custom);
sink_record!(PerformanceRecord, Performance);
sink_record!(PageviewRecord, Pageview);
sink_record!(FeedbackRecord, UserFeedback);
sink_record!(RecordingRecord, ScreenRecording);

/// Sink storing records of type `R` in one collection.
pub struct RecordSink<R> {
    collection: Arc<dyn Collection>,
    _record: PhantomData<fn() -> R>,
}

impl<R: SinkRecord> RecordSink<R> {
    pub fn new(collection: Arc<dyn Collection>) -> Self {
        Self {
            collection,
            _record: PhantomData,
        }
    }
}

#[async_trait]
impl<R: SinkRecord> Sink for RecordSink<R> {
    fn category(&self) -> Category {
        R::CATEGORY
    }

    fn collection(&self) -> &Arc<dyn Collection> {
        &self.collection
    }

    #[tracing::instrument(skip(self, record), fields(category = %R::CATEGORY))]
    async fn create(&self, record: &CategoryRecord) -> Result<RecordId, TelemetryError> {
        let typed = R::from_record(record).ok_or_else(|| {
            TelemetryError::Validation(format!(
                "{} record sent to {} sink",
                record.category(),
                R::CATEGORY
            ))
        })?;

        let mut document = to_document(typed)?;
        document.remove("id");
        let id = self.collection.insert(document).await?;
        tracing::trace!(record_id = %id, "Record persisted");
        Ok(id)
    }
}

impl<R> std::fmt::Debug for RecordSink<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecordSink")
            .field("collection", &self.collection.name())
            .finish()
    }
}
