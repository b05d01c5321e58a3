//! Read side: query filters, bucketed aggregation and pagination.

mod analytics;
mod bucket;
mod filter;
mod paginate;
mod records;

pub use analytics::{Analytics, DEFAULT_TIME_SLOT_MS};
pub use bucket::{BucketMode, TimeBucketAggregation, DAY_MS, HOUR_MS, MAX_SLIDING_SLOT_MS, START_TIME};
pub use filter::QueryFilter;
pub use records::{RecordQueries, FEEDBACK_LIST_EXCLUDE};
pub use paginate::{
    CursorPage, CursorPaginator, CursorRequest, Lookup, OffsetPage, OffsetPaginator,
    DEFAULT_LIMIT, DEFAULT_PAGE_SIZE,
};
