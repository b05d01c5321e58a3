use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::RwLock;
use serde_json::Value;

use super::pipeline::sort_documents;
use super::value::remove_path;
use super::{Collection, Database, Document, Filter, FindOptions, Pipeline, StoreError};
use crate::model::RecordId;

/// In-process collection. Documents live in insertion order.
#[derive(Debug)]
pub struct MemoryCollection {
    name: String,
    documents: RwLock<Vec<Document>>,
    next_id: AtomicU64,
}

impl MemoryCollection {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            documents: RwLock::new(Vec::new()),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn len(&self) -> usize {
        self.documents.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl Collection for MemoryCollection {
    fn name(&self) -> &str {
        &self.name
    }

    async fn insert(&self, mut document: Document) -> Result<RecordId, StoreError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        document.insert("id".to_string(), Value::from(id));
        self.documents.write().push(document);
        Ok(RecordId(id))
    }

    async fn find(
        &self,
        filter: &Filter,
        options: &FindOptions,
    ) -> Result<Vec<Document>, StoreError> {
        let mut found: Vec<Document> = self
            .documents
            .read()
            .iter()
            .filter(|d| filter.matches(d))
            .cloned()
            .collect();

        if !options.sort.is_empty() {
            sort_documents(&mut found, &options.sort);
        }
        let window = found
            .into_iter()
            .skip(options.skip)
            .take(options.limit.unwrap_or(usize::MAX));

        Ok(window
            .map(|mut d| {
                for path in &options.exclude {
                    remove_path(&mut d, path);
                }
                d
            })
            .collect())
    }

    async fn count(&self, filter: &Filter) -> Result<u64, StoreError> {
        let n = self.documents.read().iter().filter(|d| filter.matches(d)).count();
        Ok(n as u64)
    }

    async fn update_fields(&self, filter: &Filter, fields: Document) -> Result<u64, StoreError> {
        let mut touched = 0;
        for doc in self.documents.write().iter_mut().filter(|d| filter.matches(d)) {
            for (k, v) in &fields {
                if k != "id" {
                    doc.insert(k.clone(), v.clone());
                }
            }
            touched += 1;
        }
        Ok(touched)
    }

    async fn delete_many(&self, filter: &Filter) -> Result<u64, StoreError> {
        let mut documents = self.documents.write();
        let before = documents.len();
        documents.retain(|d| !filter.matches(d));
        Ok((before - documents.len()) as u64)
    }

    async fn aggregate(&self, pipeline: &Pipeline) -> Result<Vec<Document>, StoreError> {
        let snapshot = self.documents.read().clone();
        pipeline.run(snapshot)
    }
}

/// In-process database handing out one [`MemoryCollection`] per name.
#[derive(Debug, Clone, Default)]
pub struct MemoryDatabase {
    collections: Arc<DashMap<String, Arc<MemoryCollection>>>,
}

impl MemoryDatabase {
    pub fn new() -> Self {
        Self::default()
    }

    /// Concrete handle, for tests that inspect collection sizes.
    pub fn memory_collection(&self, name: &str) -> Arc<MemoryCollection> {
        self.collections
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(MemoryCollection::new(name)))
            .clone()
    }
}

impl Database for MemoryDatabase {
    fn collection(&self, name: &str) -> Arc<dyn Collection> {
        self.memory_collection(name)
    }
}
