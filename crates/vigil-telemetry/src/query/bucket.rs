//! Adaptive time bucketing.
//!
//! Short slots bucket by epoch modulo the slot width. A 24 hour slot buckets
//! by UTC calendar day, and any other long slot by UTC half-day. Every output
//! row carries `start_time`, the absolute bucket start in epoch milliseconds.

use crate::store::{Accumulator, Expr, Filter, Group, Pipeline, SortKey};
use crate::TelemetryError;

pub const HOUR_MS: i64 = 3_600_000;
pub const DAY_MS: i64 = 24 * HOUR_MS;

/// Widest slot still bucketed by epoch modulo.
pub const MAX_SLIDING_SLOT_MS: i64 = 8 * HOUR_MS;

const BUCKET: &str = "bucket";
const DAY: &str = "day";
const HOUR: &str = "hour";
const IDENTITY: &str = "identity";
const HITS: &str = "hits";

/// Output field holding the bucket start.
pub const START_TIME: &str = "start_time";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BucketMode {
    /// `floor(epoch / slot) * slot`.
    Sliding(i64),
    Daily,
    HalfDaily,
}

impl BucketMode {
    pub const fn for_slot(slot_ms: i64) -> Self {
        if slot_ms <= MAX_SLIDING_SLOT_MS {
            Self::Sliding(slot_ms)
        } else if slot_ms == DAY_MS {
            Self::Daily
        } else {
            Self::HalfDaily
        }
    }

    fn key_fields(self, time: &Expr) -> Vec<(String, Expr)> {
        match self {
            Self::Sliding(slot) => vec![(BUCKET.to_string(), Expr::FloorTo(Box::new(time.clone()), slot))],
            Self::Daily => vec![(DAY.to_string(), Expr::UtcDay(Box::new(time.clone())))],
            Self::HalfDaily => vec![
                (DAY.to_string(), Expr::UtcDay(Box::new(time.clone()))),
                (HOUR.to_string(), Expr::UtcHalfDay(Box::new(time.clone()))),
            ],
        }
    }

    fn start_time(self) -> Expr {
        match self {
            Self::Sliding(_) => Expr::field(BUCKET),
            Self::Daily => Expr::DayStart {
                day: Box::new(Expr::field(DAY)),
                hour: None,
            },
            Self::HalfDaily => Expr::DayStart {
                day: Box::new(Expr::field(DAY)),
                hour: Some(Box::new(Expr::field(HOUR))),
            },
        }
    }
}

/// Builder for a bucketed aggregation pipeline.
#[derive(Debug, Clone)]
pub struct TimeBucketAggregation {
    filter: Filter,
    mode: BucketMode,
    time_field: String,
    keys: Vec<(String, Expr)>,
    accumulators: Vec<(String, Accumulator)>,
    tie_break: Option<String>,
}

impl TimeBucketAggregation {
    pub fn new(filter: Filter, slot_ms: i64) -> Result<Self, TelemetryError> {
        if slot_ms <= 0 {
            return Err(TelemetryError::Validation(format!(
                "time slot must be positive, got {slot_ms}"
            )));
        }
        Ok(Self {
            filter,
            mode: BucketMode::for_slot(slot_ms),
            time_field: "create_at".to_string(),
            keys: Vec::new(),
            accumulators: Vec::new(),
            tie_break: None,
        })
    }

    pub const fn mode(&self) -> BucketMode {
        self.mode
    }

    #[must_use]
    pub fn time_field(mut self, field: impl Into<String>) -> Self {
        self.time_field = field.into();
        self
    }

    /// Extra group key alongside the bucket.
    #[must_use]
    pub fn group_by(mut self, name: impl Into<String>, expr: Expr) -> Self {
        self.keys.push((name.into(), expr));
        self
    }

    #[must_use]
    pub fn accumulate(mut self, name: impl Into<String>, accumulator: Accumulator) -> Self {
        self.accumulators.push((name.into(), accumulator));
        self
    }

    /// Secondary sort, descending, for rows sharing a bucket.
    #[must_use]
    pub fn tie_break(mut self, field: impl Into<String>) -> Self {
        self.tie_break = Some(field.into());
        self
    }

    fn bucket_keys(&self) -> Vec<(String, Expr)> {
        self.mode.key_fields(&Expr::field(self.time_field.as_str()))
    }

    fn finish(&self, pipeline: Pipeline) -> Pipeline {
        let mut sort = vec![SortKey::asc(START_TIME)];
        if let Some(tie_break) = &self.tie_break {
            sort.push(SortKey::desc(tie_break.as_str()));
        }
        pipeline
            .derive(vec![(START_TIME.to_string(), self.mode.start_time())])
            .sort(sort)
    }

    pub fn build(self) -> Pipeline {
        let bucket_keys = self.bucket_keys();
        let mut group = Group::new();
        for (name, _) in &bucket_keys {
            group = group.key(name.as_str(), Expr::field(name.as_str()));
        }
        for (name, expr) in &self.keys {
            group = group.key(name.as_str(), expr.clone());
        }
        for (name, accumulator) in &self.accumulators {
            group = group.accumulate(name.as_str(), accumulator.clone());
        }

        let pipeline = Pipeline::new()
            .matching(self.filter.clone())
            .derive(bucket_keys)
            .group(group);
        self.finish(pipeline)
    }

    /// Page views (`pv`) and unique visitors (`uv`) per bucket.
    ///
    /// A visitor is identified by `user_id`, falling back to `ip`. Extra
    /// group keys and accumulators are ignored.
    pub fn build_pv_uv(self) -> Pipeline {
        let bucket_keys = self.bucket_keys();
        let identity = Expr::Coalesce(vec![Expr::field("user_id"), Expr::field("ip")]);

        let mut per_visitor = Group::new();
        let mut per_bucket = Group::new();
        for (name, _) in &bucket_keys {
            per_visitor = per_visitor.key(name.as_str(), Expr::field(name.as_str()));
            per_bucket = per_bucket.key(name.as_str(), Expr::field(name.as_str()));
        }
        per_visitor = per_visitor
            .key(IDENTITY, Expr::field(IDENTITY))
            .accumulate(HITS, Accumulator::Count);
        per_bucket = per_bucket
            .accumulate("pv", Accumulator::Sum(Expr::field(HITS)))
            .accumulate("uv", Accumulator::Count);

        let mut derived = bucket_keys;
        derived.push((IDENTITY.to_string(), identity));

        let pipeline = Pipeline::new()
            .matching(self.filter.clone())
            .derive(derived)
            .group(per_visitor)
            .group(per_bucket);
        self.finish(pipeline)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::Document;
    use chrono::{TimeZone, Utc};
    use rstest::rstest;
    use serde_json::{json, Value};

    const MINUTE_MS: i64 = 60_000;

    fn at(ms: i64) -> Document {
        match json!({"site_id": "s1", "create_at": ms}) {
            Value::Object(map) => map,
            _ => unreachable!(),
        }
    }

    fn visit(ms: i64, user: Option<&str>, ip: &str) -> Document {
        let mut doc = at(ms);
        if let Some(user) = user {
            doc.insert("user_id".to_string(), json!(user));
        }
        doc.insert("ip".to_string(), json!(ip));
        doc
    }

    #[rstest]
    #[case(MINUTE_MS, BucketMode::Sliding(MINUTE_MS))]
    #[case(MAX_SLIDING_SLOT_MS, BucketMode::Sliding(MAX_SLIDING_SLOT_MS))]
    #[case(DAY_MS, BucketMode::Daily)]
    #[case(12 * HOUR_MS, BucketMode::HalfDaily)]
    #[case(9 * HOUR_MS, BucketMode::HalfDaily)]
    fn mode_follows_slot_width(#[case] slot: i64, #[case] expected: BucketMode) {
        assert_eq!(BucketMode::for_slot(slot), expected);
    }

    #[test]
    fn rejects_non_positive_slot() {
        assert!(TimeBucketAggregation::new(Filter::All, 0).is_err());
    }

    #[test]
    fn ten_minutes_in_five_minute_slots() {
        let docs = (0..10).map(|m| at(m * MINUTE_MS)).collect();
        let pipeline = TimeBucketAggregation::new(Filter::All, 5 * MINUTE_MS)
            .unwrap()
            .accumulate("count", Accumulator::Count)
            .build();

        let rows = pipeline.run(docs).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0][START_TIME], 0);
        assert_eq!(rows[0]["count"], 5);
        assert_eq!(rows[1][START_TIME], 5 * MINUTE_MS);
        assert_eq!(rows[1]["count"], 5);
    }

    #[test]
    fn sliding_buckets_partition_events() {
        let slot = 7 * MINUTE_MS;
        let times: Vec<i64> = (0..200).map(|i| i * 131_071 + 17).collect();
        let rows = TimeBucketAggregation::new(Filter::All, slot)
            .unwrap()
            .accumulate("times", Accumulator::Push(Expr::field("create_at")))
            .build()
            .run(times.iter().map(|t| at(*t)).collect())
            .unwrap();

        let mut seen = 0;
        for row in &rows {
            let start = row[START_TIME].as_i64().unwrap();
            assert_eq!(start % slot, 0);
            for t in row["times"].as_array().unwrap() {
                let t = t.as_i64().unwrap();
                assert_eq!(t.div_euclid(slot) * slot, start);
                seen += 1;
            }
        }
        assert_eq!(seen, times.len());
    }

    #[test]
    fn daily_buckets_align_to_utc_midnight() {
        let late = Utc.with_ymd_and_hms(2024, 3, 1, 23, 59, 59).unwrap();
        let early = Utc.with_ymd_and_hms(2024, 3, 2, 0, 0, 1).unwrap();
        let rows = TimeBucketAggregation::new(Filter::All, DAY_MS)
            .unwrap()
            .accumulate("count", Accumulator::Count)
            .build()
            .run(vec![at(late.timestamp_millis()), at(early.timestamp_millis())])
            .unwrap();

        let midnight = |d: u32| {
            Utc.with_ymd_and_hms(2024, 3, d, 0, 0, 0)
                .unwrap()
                .timestamp_millis()
        };
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0][START_TIME], midnight(1));
        assert_eq!(rows[1][START_TIME], midnight(2));
        for row in &rows {
            assert_eq!(row[START_TIME].as_i64().unwrap() % DAY_MS, 0);
        }
    }

    #[test]
    fn half_daily_splits_at_noon() {
        let morning = Utc.with_ymd_and_hms(2024, 3, 1, 11, 0, 0).unwrap();
        let afternoon = Utc.with_ymd_and_hms(2024, 3, 1, 13, 0, 0).unwrap();
        let rows = TimeBucketAggregation::new(Filter::All, 12 * HOUR_MS)
            .unwrap()
            .accumulate("count", Accumulator::Count)
            .build()
            .run(vec![at(morning.timestamp_millis()), at(afternoon.timestamp_millis())])
            .unwrap();

        assert_eq!(rows.len(), 2);
        let noon = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();
        assert_eq!(rows[1][START_TIME], noon.timestamp_millis());
        assert_eq!(rows[1]["hour"], 12);
    }

    #[test]
    fn tie_break_orders_within_bucket() {
        let docs = vec![
            visit(0, None, "a"),
            visit(1, None, "b"),
            visit(2, None, "b"),
        ];
        let rows = TimeBucketAggregation::new(Filter::All, MINUTE_MS)
            .unwrap()
            .group_by("ip", Expr::field("ip"))
            .accumulate("count", Accumulator::Count)
            .tie_break("count")
            .build()
            .run(docs)
            .unwrap();
        assert_eq!(rows[0]["ip"], "b");
        assert_eq!(rows[1]["ip"], "a");
    }

    #[test]
    fn pv_uv_counts_identities() {
        let docs = vec![
            visit(0, Some("A"), "10.0.0.1"),
            visit(1_000, Some("A"), "10.0.0.2"),
            visit(2_000, None, "B"),
        ];
        let rows = TimeBucketAggregation::new(Filter::All, 5 * MINUTE_MS)
            .unwrap()
            .build_pv_uv()
            .run(docs)
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["pv"], 3);
        assert_eq!(rows[0]["uv"], 2);
    }

    #[test]
    fn uv_never_exceeds_pv() {
        let docs: Vec<_> = (0..120)
            .map(|i| {
                let ip = format!("10.0.0.{}", i % 7);
                visit(i * 45_000, None, &ip)
            })
            .collect();
        let rows = TimeBucketAggregation::new(Filter::All, 10 * MINUTE_MS)
            .unwrap()
            .build_pv_uv()
            .run(docs)
            .unwrap();
        for row in rows {
            assert!(row["uv"].as_i64().unwrap() <= row["pv"].as_i64().unwrap());
        }
    }
}
