use std::collections::HashMap;

use serde::ser::SerializeStruct;
use serde::{Serialize, Serializer};
use serde_json::Value;

use crate::model::{RecordId, RefType};
use crate::sink::{document_id, SinkRegistry};
use crate::store::{lookup, remove_path, Collection, Document, Filter, FindOptions, SortKey, SortOrder};
use crate::TelemetryError;

pub const DEFAULT_LIMIT: usize = 20;
pub const DEFAULT_PAGE_SIZE: usize = 20;

/// Join from index entries to the records they reference.
#[derive(Debug, Clone)]
pub struct Lookup {
    /// Field the joined record is written to.
    pub as_field: String,
    /// Paths removed from the joined record.
    pub exclude: Vec<String>,
}

impl Default for Lookup {
    fn default() -> Self {
        Self {
            as_field: "record".to_string(),
            exclude: Vec::new(),
        }
    }
}

impl Lookup {
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

#[derive(Debug, Clone)]
pub struct CursorRequest {
    /// Primary key of the last row of the previous page.
    pub cursor: Option<Value>,
    pub limit: usize,
    pub order: SortOrder,
    pub primary_key: String,
    pub exclude: Vec<String>,
    pub lookup: Option<Lookup>,
}

impl Default for CursorRequest {
    fn default() -> Self {
        Self {
            cursor: None,
            limit: DEFAULT_LIMIT,
            order: SortOrder::Descending,
            primary_key: "id".to_string(),
            exclude: Vec::new(),
            lookup: None,
        }
    }
}

impl CursorRequest {
    pub fn new(limit: usize, order: SortOrder) -> Self {
        Self {
            limit,
            order,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn after(mut self, cursor: impl Into<Value>) -> Self {
        self.cursor = Some(cursor.into());
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

    #[must_use]
    pub fn with_lookup(mut self, lookup: Lookup) -> Self {
        self.lookup = Some(lookup);
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CursorPage {
    pub data: Vec<Document>,
    pub has_next_page: bool,
    pub next_cursor: Option<Value>,
}

impl Serialize for CursorPage {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        #[derive(Serialize)]
        #[serde(rename_all = "camelCase")]
        struct Pagination<'a> {
            has_next_page: bool,
            next_cursor: &'a Option<Value>,
        }

        let mut page = serializer.serialize_struct("CursorPage", 2)?;
        page.serialize_field("data", &self.data)?;
        page.serialize_field(
            "pagination",
            &Pagination {
                has_next_page: self.has_next_page,
                next_cursor: &self.next_cursor,
            },
        )?;
        page.end()
    }
}

/// Forward-only pagination keyed by the last seen primary key.
#[derive(Debug, Clone)]
pub struct CursorPaginator {
    registry: SinkRegistry,
}

impl CursorPaginator {
    pub fn new(registry: SinkRegistry) -> Self {
        Self { registry }
    }

    #[tracing::instrument(skip_all, fields(collection = collection.name(), limit = request.limit))]
    pub async fn paginate(
        &self,
        collection: &dyn Collection,
        filter: Filter,
        request: CursorRequest,
    ) -> Result<CursorPage, TelemetryError> {
        if request.limit == 0 {
            return Err(TelemetryError::Validation("limit must be positive".to_string()));
        }
        let key = request.primary_key.as_str();
        let mut filter = filter;

        if let Some(cursor) = &request.cursor {
            let last = collection
                .find_one(&Filter::eq(key, cursor.clone()))
                .await?
                .ok_or_else(|| TelemetryError::not_found("cursor", cursor.to_string()))?;
            let bound = lookup(&last, key)
                .cloned()
                .ok_or_else(|| TelemetryError::not_found("cursor", cursor.to_string()))?;
            filter = filter.and(if request.order.is_ascending() {
                Filter::gt(key, bound)
            } else {
                Filter::lt(key, bound)
            });
        }

        let options = FindOptions::new()
            .sort_by(key, request.order)
            .limit(request.limit.saturating_add(1));
        let mut data = collection.find(&filter, &options).await?;

        let has_next_page = data.len() > request.limit;
        data.truncate(request.limit);
        let next_cursor = if has_next_page {
            data.last().and_then(|row| lookup(row, key)).cloned()
        } else {
            None
        };

        if let Some(join) = &request.lookup {
            self.join(&mut data, join).await?;
        }
        for row in &mut data {
            for path in &request.exclude {
                remove_path(row, path);
            }
        }

        Ok(CursorPage {
            data,
            has_next_page,
            next_cursor,
        })
    }

    /// Attach each entry's referenced record, one fetch per record kind.
    async fn join(&self, rows: &mut [Document], join: &Lookup) -> Result<(), TelemetryError> {
        let mut wanted: HashMap<RefType, Vec<RecordId>> = HashMap::new();
        for row in rows.iter() {
            if let Some((ref_type, id)) = reference(row) {
                wanted.entry(ref_type).or_default().push(id);
            }
        }

        let mut found: HashMap<(RefType, RecordId), Document> = HashMap::new();
        for (ref_type, ids) in wanted {
            let sink = self.registry.sink(ref_type.category())?;
            for record in sink.find_by_ids(&ids, &join.exclude).await? {
                if let Some(id) = document_id(&record) {
                    found.insert((ref_type, id), record);
                }
            }
        }

        for row in rows.iter_mut() {
            let record = reference(row)
                .and_then(|key| found.remove(&key))
                .map_or(Value::Null, Value::Object);
            row.insert(join.as_field.clone(), record);
        }
        Ok(())
    }
}

fn reference(row: &Document) -> Option<(RefType, RecordId)> {
    let ref_type = serde_json::from_value(row.get("ref_type")?.clone()).ok()?;
    let id = row.get("record_id")?.as_u64()?;
    Some((ref_type, RecordId(id)))
}

/// One page of an offset-paginated listing. `page` is 1-based.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OffsetPage<T = Document> {
    pub data: Vec<T>,
    pub total: u64,
    pub page: usize,
    pub pages: u64,
}

impl<T> OffsetPage<T> {
    pub fn try_map<U, E>(self, f: impl FnMut(T) -> Result<U, E>) -> Result<OffsetPage<U>, E> {
        Ok(OffsetPage {
            data: self.data.into_iter().map(f).collect::<Result<_, _>>()?,
            total: self.total,
            page: self.page,
            pages: self.pages,
        })
    }
}

/// Rows skipped before `page` (1-based). Saturates for out-of-range pages.
pub(crate) fn page_offset(page: usize, size: usize) -> usize {
    page.saturating_sub(1).saturating_mul(size)
}

#[derive(Debug, Clone, Copy, Default)]
pub struct OffsetPaginator;

impl OffsetPaginator {
    pub async fn paginate(
        collection: &dyn Collection,
        filter: &Filter,
        page: usize,
        size: usize,
        sort: &[SortKey],
    ) -> Result<OffsetPage, TelemetryError> {
        if size == 0 {
            return Err(TelemetryError::Validation("page size must be positive".to_string()));
        }
        let page = page.max(1);
        let total = collection.count(filter).await?;
        let mut options = FindOptions::new().skip(page_offset(page, size)).limit(size);
        options.sort = sort.to_vec();
        let data = collection.find(filter, &options).await?;

        Ok(OffsetPage {
            data,
            total,
            page,
            pages: total.div_ceil(size as u64),
        })
    }
}
