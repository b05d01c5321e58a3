use std::cmp::Ordering;

use regex::Regex;
use serde_json::{Map, Value};

use super::value::{compare_values, lookup, values_equal};

/// Match predicate over documents.
///
/// Field names are dotted paths. Comparisons against a missing field never
/// match, except [`Filter::Exists`] with `false`.
#[derive(Debug, Clone)]
pub enum Filter {
    All,
    Eq(String, Value),
    In(String, Vec<Value>),
    Gt(String, Value),
    Gte(String, Value),
    Lt(String, Value),
    Lte(String, Value),
    /// Regex match against a string field.
    Matches(String, Regex),
    Exists(String, bool),
    And(Vec<Filter>),
    Or(Vec<Filter>),
}

impl Filter {
    pub fn eq(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::Eq(field.into(), value.into())
    }

    pub fn is_in<I, V>(field: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        Self::In(field.into(), values.into_iter().map(Into::into).collect())
    }

    pub fn gt(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::Gt(field.into(), value.into())
    }

    pub fn gte(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::Gte(field.into(), value.into())
    }

    pub fn lt(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::Lt(field.into(), value.into())
    }

    pub fn lte(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::Lte(field.into(), value.into())
    }

    /// Case-insensitive literal substring match.
    pub fn contains_ignore_case(field: impl Into<String>, needle: &str) -> Self {
        let pattern = format!("(?i){}", regex::escape(needle));
        match Regex::new(&pattern) {
            Ok(re) => Self::Matches(field.into(), re),
            // An escaped literal always compiles; fall back to exact match.
            Err(_) => Self::eq(field, needle),
        }
    }

    /// Conjunction that flattens nested `And`s and drops `All`.
    #[must_use]
    pub fn and(self, other: Filter) -> Self {
        let mut parts = Vec::new();
        for f in [self, other] {
            match f {
                Self::All => {}
                Self::And(inner) => parts.extend(inner),
                other => parts.push(other),
            }
        }
        match parts.len() {
            0 => Self::All,
            1 => parts.pop().unwrap_or(Self::All),
            _ => Self::And(parts),
        }
    }

    pub fn matches(&self, document: &Map<String, Value>) -> bool {
        match self {
            Self::All => true,
            Self::Eq(field, expected) => {
                lookup(document, field).is_some_and(|v| values_equal(v, expected))
            }
            Self::In(field, options) => lookup(document, field)
                .is_some_and(|v| options.iter().any(|o| values_equal(v, o))),
            Self::Gt(field, bound) => compares(document, field, bound, |o| o == Ordering::Greater),
            Self::Gte(field, bound) => compares(document, field, bound, |o| o != Ordering::Less),
            Self::Lt(field, bound) => compares(document, field, bound, |o| o == Ordering::Less),
            Self::Lte(field, bound) => compares(document, field, bound, |o| o != Ordering::Greater),
            Self::Matches(field, re) => lookup(document, field)
                .and_then(Value::as_str)
                .is_some_and(|s| re.is_match(s)),
            Self::Exists(field, expected) => {
                lookup(document, field).is_some_and(|v| !v.is_null()) == *expected
            }
            Self::And(parts) => parts.iter().all(|f| f.matches(document)),
            Self::Or(parts) => parts.iter().any(|f| f.matches(document)),
        }
    }
}

fn compares(
    document: &Map<String, Value>,
    field: &str,
    bound: &Value,
    accept: impl Fn(Ordering) -> bool,
) -> bool {
    lookup(document, field)
        .and_then(|v| compare_values(v, bound))
        .is_some_and(accept)
}
