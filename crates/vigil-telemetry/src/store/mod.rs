//! Document store boundary.
//!
//! Category sinks, the log index and the site repository all talk to the
//! persistent store through [`Collection`]. Queries are expressed with
//! [`Filter`] and aggregations with [`Pipeline`], so a backend only has to
//! translate those two vocabularies.

mod filter;
mod memory;
mod pipeline;
mod value;

use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::{Map, Value};

pub use filter::Filter;
pub use memory::{MemoryCollection, MemoryDatabase};
pub use pipeline::{Accumulator, Expr, Group, Pipeline, SortKey, SortOrder, Stage};
pub use value::{compare_values, lookup, values_equal};

pub(crate) use value::remove_path;

use crate::model::RecordId;

/// A stored document: a JSON object.
pub type Document = Map<String, Value>;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// A pipeline expression could not be evaluated against a document.
    #[error("invalid expression: {0}")]
    Expression(String),

    /// The backend rejected or failed the operation.
    #[error("store backend error: {0}")]
    Backend(String),
}

/// Projection, ordering and windowing for [`Collection::find`].
#[derive(Debug, Clone, Default)]
pub struct FindOptions {
    pub sort: Vec<SortKey>,
    pub skip: usize,
    pub limit: Option<usize>,
    /// Dotted field paths removed from every returned document.
    pub exclude: Vec<String>,
}

impl FindOptions {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn sort_by(mut self, field: impl Into<String>, order: SortOrder) -> Self {
        self.sort.push(SortKey::new(field, order));
        self
    }

    #[must_use]
    pub const fn skip(mut self, skip: usize) -> Self {
        self.skip = skip;
        self
    }

    #[must_use]
    pub const fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    #[must_use]
    pub fn exclude<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.exclude.extend(fields.into_iter().map(Into::into));
        self
    }
}

/// One named collection in the store.
///
/// Every inserted document receives a fresh, monotonically increasing
/// numeric `id`.
#[async_trait]
pub trait Collection: Send + Sync {
    fn name(&self) -> &str;

    async fn insert(&self, document: Document) -> Result<RecordId, StoreError>;

    async fn find(&self, filter: &Filter, options: &FindOptions)
        -> Result<Vec<Document>, StoreError>;

    async fn find_one(&self, filter: &Filter) -> Result<Option<Document>, StoreError> {
        let mut found = self.find(filter, &FindOptions::new().limit(1)).await?;
        Ok(found.pop())
    }

    async fn count(&self, filter: &Filter) -> Result<u64, StoreError>;

    /// Set top-level `fields` on every matching document. Returns the number
    /// of documents touched.
    async fn update_fields(&self, filter: &Filter, fields: Document) -> Result<u64, StoreError>;

    async fn delete_many(&self, filter: &Filter) -> Result<u64, StoreError>;

    async fn aggregate(&self, pipeline: &Pipeline) -> Result<Vec<Document>, StoreError>;
}

/// Encode a value as a document, omitting null fields.
pub fn to_document<T: Serialize>(value: &T) -> Result<Document, serde_json::Error> {
    match serde_json::to_value(value)? {
        Value::Object(mut doc) => {
            doc.retain(|_, v| !v.is_null());
            Ok(doc)
        }
        _ => Err(serde::ser::Error::custom("value is not an object")),
    }
}

/// Source of named collections.
pub trait Database: Send + Sync {
    fn collection(&self, name: &str) -> Arc<dyn Collection>;
}
