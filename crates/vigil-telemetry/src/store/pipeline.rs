//! Aggregation pipeline vocabulary and its in-process evaluator.

use std::cmp::Ordering;
use std::collections::HashMap;

use chrono::{DateTime, NaiveDate, Timelike, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Number, Value};

use super::value::{lookup, sort_order, values_equal};
use super::{Document, Filter, StoreError};

const MILLIS_PER_HOUR: i64 = 3_600_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SortOrder {
    #[serde(rename = "asc", alias = "ascending")]
    Ascending,
    #[serde(rename = "desc", alias = "descending")]
    Descending,
}

impl SortOrder {
    pub const fn is_ascending(self) -> bool {
        matches!(self, Self::Ascending)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SortKey {
    pub field: String,
    pub order: SortOrder,
}

impl SortKey {
    pub fn new(field: impl Into<String>, order: SortOrder) -> Self {
        Self {
            field: field.into(),
            order,
        }
    }

    pub fn asc(field: impl Into<String>) -> Self {
        Self::new(field, SortOrder::Ascending)
    }

    pub fn desc(field: impl Into<String>) -> Self {
        Self::new(field, SortOrder::Descending)
    }
}

/// Computed value over a single document.
#[derive(Debug, Clone)]
pub enum Expr {
    Field(String),
    Literal(Value),
    /// First operand that is present and not null.
    Coalesce(Vec<Expr>),
    Subtract(Box<Expr>, Box<Expr>),
    /// `floor(value / slot) * slot`.
    FloorTo(Box<Expr>, i64),
    /// UTC calendar day of an epoch-millisecond value, as `YYYY-MM-DD`.
    UtcDay(Box<Expr>),
    /// UTC hour of an epoch-millisecond value rounded down to 0 or 12.
    UtcHalfDay(Box<Expr>),
    /// Epoch milliseconds of a `YYYY-MM-DD` day plus an optional hour offset.
    DayStart {
        day: Box<Expr>,
        hour: Option<Box<Expr>>,
    },
    /// `then` when `value >= threshold`, else `otherwise`.
    IfAtLeast {
        value: Box<Expr>,
        threshold: f64,
        then: Value,
        otherwise: Value,
    },
}

impl Expr {
    pub fn field(path: impl Into<String>) -> Self {
        Self::Field(path.into())
    }

    pub fn literal(value: impl Into<Value>) -> Self {
        Self::Literal(value.into())
    }

    pub fn subtract(left: Expr, right: Expr) -> Self {
        Self::Subtract(Box::new(left), Box::new(right))
    }

    fn eval(&self, doc: &Document) -> Result<Value, StoreError> {
        match self {
            Self::Field(path) => Ok(lookup(doc, path).cloned().unwrap_or(Value::Null)),
            Self::Literal(v) => Ok(v.clone()),
            Self::Coalesce(options) => {
                for option in options {
                    let v = option.eval(doc)?;
                    if !v.is_null() {
                        return Ok(v);
                    }
                }
                Ok(Value::Null)
            }
            Self::Subtract(left, right) => {
                match (number(&left.eval(doc)?, "subtract")?, number(&right.eval(doc)?, "subtract")?) {
                    (Some(a), Some(b)) => Ok(float_value(a - b)),
                    _ => Ok(Value::Null),
                }
            }
            Self::FloorTo(inner, slot) => {
                if *slot <= 0 {
                    return Err(StoreError::Expression(format!("non-positive slot {slot}")));
                }
                Ok(match epoch_millis(&inner.eval(doc)?)? {
                    Some(ms) => Value::from(ms.div_euclid(*slot) * slot),
                    None => Value::Null,
                })
            }
            Self::UtcDay(inner) => Ok(match datetime(&inner.eval(doc)?)? {
                Some(dt) => Value::String(dt.format("%Y-%m-%d").to_string()),
                None => Value::Null,
            }),
            Self::UtcHalfDay(inner) => Ok(match datetime(&inner.eval(doc)?)? {
                Some(dt) => {
                    let hour = dt.hour();
                    Value::from(hour - hour % 12)
                }
                None => Value::Null,
            }),
            Self::DayStart { day, hour } => {
                let day = day.eval(doc)?;
                let Some(day) = day.as_str() else {
                    return Ok(Value::Null);
                };
                let date = NaiveDate::parse_from_str(day, "%Y-%m-%d")
                    .map_err(|e| StoreError::Expression(format!("bad day {day}: {e}")))?;
                let midnight = date
                    .and_hms_opt(0, 0, 0)
                    .map(|dt| dt.and_utc().timestamp_millis())
                    .ok_or_else(|| StoreError::Expression(format!("bad day {day}")))?;
                let offset = match hour {
                    Some(hour) => number(&hour.eval(doc)?, "day start")?
                        .map_or(0, |h| h as i64 * MILLIS_PER_HOUR),
                    None => 0,
                };
                Ok(Value::from(midnight + offset))
            }
            Self::IfAtLeast {
                value,
                threshold,
                then,
                otherwise,
            } => {
                let v = number(&value.eval(doc)?, "comparison")?;
                Ok(if v.is_some_and(|v| v >= *threshold) {
                    then.clone()
                } else {
                    otherwise.clone()
                })
            }
        }
    }
}

/// Per-group reduction.
#[derive(Debug, Clone)]
pub enum Accumulator {
    Count,
    Sum(Expr),
    Avg(Expr),
    Min(Expr),
    Max(Expr),
    /// Distinct values, in first-seen order.
    AddToSet(Expr),
    Push(Expr),
}

#[derive(Debug, Clone, Default)]
pub struct Group {
    pub keys: Vec<(String, Expr)>,
    pub accumulators: Vec<(String, Accumulator)>,
}

impl Group {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn key(mut self, name: impl Into<String>, expr: Expr) -> Self {
        self.keys.push((name.into(), expr));
        self
    }

    #[must_use]
    pub fn accumulate(mut self, name: impl Into<String>, accumulator: Accumulator) -> Self {
        self.accumulators.push((name.into(), accumulator));
        self
    }
}

#[derive(Debug, Clone)]
pub enum Stage {
    Match(Filter),
    /// Add or overwrite computed top-level fields.
    Derive(Vec<(String, Expr)>),
    /// One output document per distinct key, carrying the key fields and the
    /// accumulator results.
    Group(Group),
    Sort(Vec<SortKey>),
    Skip(usize),
    Limit(usize),
}

#[derive(Debug, Clone, Default)]
pub struct Pipeline {
    pub stages: Vec<Stage>,
}

impl Pipeline {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn stage(mut self, stage: Stage) -> Self {
        self.stages.push(stage);
        self
    }

    #[must_use]
    pub fn matching(self, filter: Filter) -> Self {
        self.stage(Stage::Match(filter))
    }

    #[must_use]
    pub fn derive(self, fields: Vec<(String, Expr)>) -> Self {
        self.stage(Stage::Derive(fields))
    }

    #[must_use]
    pub fn group(self, group: Group) -> Self {
        self.stage(Stage::Group(group))
    }

    #[must_use]
    pub fn sort(self, keys: Vec<SortKey>) -> Self {
        self.stage(Stage::Sort(keys))
    }

    #[must_use]
    pub fn skip(self, n: usize) -> Self {
        self.stage(Stage::Skip(n))
    }

    #[must_use]
    pub fn limit(self, n: usize) -> Self {
        self.stage(Stage::Limit(n))
    }

    /// Evaluate the pipeline over an in-memory document set.
    pub fn run(&self, mut docs: Vec<Document>) -> Result<Vec<Document>, StoreError> {
        for stage in &self.stages {
            docs = match stage {
                Stage::Match(filter) => docs.into_iter().filter(|d| filter.matches(d)).collect(),
                Stage::Derive(fields) => {
                    for doc in &mut docs {
                        for (name, expr) in fields {
                            let v = expr.eval(doc)?;
                            doc.insert(name.clone(), v);
                        }
                    }
                    docs
                }
                Stage::Group(group) => run_group(group, &docs)?,
                Stage::Sort(keys) => {
                    sort_documents(&mut docs, keys);
                    docs
                }
                Stage::Skip(n) => docs.into_iter().skip(*n).collect(),
                Stage::Limit(n) => {
                    docs.truncate(*n);
                    docs
                }
            };
        }
        Ok(docs)
    }
}

pub(crate) fn sort_documents(docs: &mut [Document], keys: &[SortKey]) {
    docs.sort_by(|a, b| {
        keys.iter()
            .map(|k| {
                let o = sort_order(lookup(a, &k.field), lookup(b, &k.field));
                if k.order.is_ascending() { o } else { o.reverse() }
            })
            .find(|o| *o != Ordering::Equal)
            .unwrap_or(Ordering::Equal)
    });
}

enum State {
    Count(u64),
    Sum(f64),
    Avg { total: f64, n: u64 },
    Extreme { best: Option<Value>, want: Ordering },
    Set(Vec<Value>),
    List(Vec<Value>),
}

impl State {
    fn new(acc: &Accumulator) -> Self {
        match acc {
            Accumulator::Count => Self::Count(0),
            Accumulator::Sum(_) => Self::Sum(0.0),
            Accumulator::Avg(_) => Self::Avg { total: 0.0, n: 0 },
            Accumulator::Min(_) => Self::Extreme { best: None, want: Ordering::Less },
            Accumulator::Max(_) => Self::Extreme { best: None, want: Ordering::Greater },
            Accumulator::AddToSet(_) => Self::Set(Vec::new()),
            Accumulator::Push(_) => Self::List(Vec::new()),
        }
    }

    fn feed(&mut self, acc: &Accumulator, doc: &Document) -> Result<(), StoreError> {
        let value = match acc {
            Accumulator::Count => Value::Null,
            Accumulator::Sum(e)
            | Accumulator::Avg(e)
            | Accumulator::Min(e)
            | Accumulator::Max(e)
            | Accumulator::AddToSet(e)
            | Accumulator::Push(e) => e.eval(doc)?,
        };
        match self {
            Self::Count(n) => *n += 1,
            // Non-numeric values are ignored by sum and avg.
            Self::Sum(total) => *total += value.as_f64().unwrap_or(0.0),
            Self::Avg { total, n } => {
                if let Some(v) = value.as_f64() {
                    *total += v;
                    *n += 1;
                }
            }
            Self::Extreme { best, want } => {
                if !value.is_null() {
                    let replace = best
                        .as_ref()
                        .is_none_or(|b| sort_order(Some(&value), Some(b)) == *want);
                    if replace {
                        *best = Some(value);
                    }
                }
            }
            Self::Set(items) => {
                if !items.iter().any(|i| values_equal(i, &value)) {
                    items.push(value);
                }
            }
            Self::List(items) => items.push(value),
        }
        Ok(())
    }

    fn finish(self) -> Value {
        match self {
            Self::Count(n) => Value::from(n),
            Self::Sum(total) => float_value(total),
            Self::Avg { total, n } if n > 0 => float_value(total / n as f64),
            Self::Avg { .. } => Value::Null,
            Self::Extreme { best, .. } => best.unwrap_or(Value::Null),
            Self::Set(items) | Self::List(items) => Value::Array(items),
        }
    }
}

fn run_group(group: &Group, docs: &[Document]) -> Result<Vec<Document>, StoreError> {
    let mut order: Vec<(Vec<Value>, Vec<State>)> = Vec::new();
    let mut slots: HashMap<String, usize> = HashMap::new();

    for doc in docs {
        let key = group
            .keys
            .iter()
            .map(|(_, e)| e.eval(doc))
            .collect::<Result<Vec<_>, _>>()?;
        let fingerprint = serde_json::to_string(&key)
            .map_err(|e| StoreError::Expression(e.to_string()))?;

        let slot = match slots.get(&fingerprint) {
            Some(&slot) => slot,
            None => {
                let states = group.accumulators.iter().map(|(_, a)| State::new(a)).collect();
                order.push((key, states));
                slots.insert(fingerprint, order.len() - 1);
                order.len() - 1
            }
        };

        let states = &mut order[slot].1;
        for ((_, acc), state) in group.accumulators.iter().zip(states.iter_mut()) {
            state.feed(acc, doc)?;
        }
    }

    Ok(order
        .into_iter()
        .map(|(key, states)| {
            let mut out = Map::new();
            for ((name, _), v) in group.keys.iter().zip(key) {
                out.insert(name.clone(), v);
            }
            for ((name, _), state) in group.accumulators.iter().zip(states) {
                out.insert(name.clone(), state.finish());
            }
            out
        })
        .collect())
}

fn number(value: &Value, op: &str) -> Result<Option<f64>, StoreError> {
    match value {
        Value::Null => Ok(None),
        Value::Number(n) => Ok(n.as_f64()),
        other => Err(StoreError::Expression(format!("{op} expects a number, got {other}"))),
    }
}

fn epoch_millis(value: &Value) -> Result<Option<i64>, StoreError> {
    match value {
        Value::Null => Ok(None),
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().map(|f| f as i64))
            .map(Some)
            .ok_or_else(|| StoreError::Expression(format!("bad timestamp {n}"))),
        other => Err(StoreError::Expression(format!("expected epoch millis, got {other}"))),
    }
}

fn datetime(value: &Value) -> Result<Option<DateTime<Utc>>, StoreError> {
    match epoch_millis(value)? {
        Some(ms) => DateTime::from_timestamp_millis(ms)
            .map(Some)
            .ok_or_else(|| StoreError::Expression(format!("timestamp out of range: {ms}"))),
        None => Ok(None),
    }
}

/// Integral results stay integers so counts and sums compare cleanly.
fn float_value(v: f64) -> Value {
    if v.fract() == 0.0 && v.abs() < 9.0e15 {
        Value::from(v as i64)
    } else {
        Number::from_f64(v).map_or(Value::Null, Value::Number)
    }
}
