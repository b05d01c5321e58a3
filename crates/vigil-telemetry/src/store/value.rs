//! Helpers for reading and comparing JSON values inside documents.

use std::cmp::Ordering;

use serde_json::{Map, Value};

/// Resolve a dotted path such as `meta.url` inside a document.
pub fn lookup<'a>(document: &'a Map<String, Value>, path: &str) -> Option<&'a Value> {
    let mut parts = path.split('.');
    let mut current = document.get(parts.next()?)?;
    for part in parts {
        current = match current {
            Value::Object(map) => map.get(part)?,
            Value::Array(items) => items.get(part.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(current)
}

/// Remove a dotted path from a document. Missing paths are ignored.
pub(crate) fn remove_path(document: &mut Map<String, Value>, path: &str) {
    match path.split_once('.') {
        None => {
            document.remove(path);
        }
        Some((head, rest)) => {
            if let Some(Value::Object(inner)) = document.get_mut(head) {
                remove_path(inner, rest);
            }
        }
    }
}

/// Equality that treats `200` and `200.0` as the same number.
pub fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => match (x.as_f64(), y.as_f64()) {
            (Some(x), Some(y)) => x == y,
            _ => x == y,
        },
        _ => a == b,
    }
}

/// Ordering between two values of the same kind. `None` when the kinds
/// differ or are not ordered (objects, arrays).
pub fn compare_values(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64()?.partial_cmp(&y.as_f64()?),
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        (Value::Bool(x), Value::Bool(y)) => Some(x.cmp(y)),
        (Value::Null, Value::Null) => Some(Ordering::Equal),
        _ => None,
    }
}

fn kind_rank(value: &Value) -> u8 {
    match value {
        Value::Null => 0,
        Value::Number(_) => 1,
        Value::String(_) => 2,
        Value::Object(_) => 3,
        Value::Array(_) => 4,
        Value::Bool(_) => 5,
    }
}

/// Total order used for sorting: values of different kinds order by kind,
/// with null (and missing) first.
pub(crate) fn sort_order(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    let a = a.unwrap_or(&Value::Null);
    let b = b.unwrap_or(&Value::Null);
    compare_values(a, b).unwrap_or_else(|| kind_rank(a).cmp(&kind_rank(b)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc() -> Map<String, Value> {
        match json!({ "meta": { "url": "/api", "tags": ["a", "b"] }, "n": 3 }) {
            Value::Object(m) => m,
            _ => unreachable!(),
        }
    }

    #[test]
    fn lookup_nested_paths() {
        let d = doc();
        assert_eq!(lookup(&d, "meta.url"), Some(&json!("/api")));
        assert_eq!(lookup(&d, "meta.tags.1"), Some(&json!("b")));
        assert_eq!(lookup(&d, "meta.missing"), None);
        assert_eq!(lookup(&d, "n.deeper"), None);
    }

    #[test]
    fn remove_nested_path() {
        let mut d = doc();
        remove_path(&mut d, "meta.tags");
        remove_path(&mut d, "absent.field");
        assert_eq!(Value::Object(d), json!({ "meta": { "url": "/api" }, "n": 3 }));
    }

    #[test]
    fn numbers_compare_across_representations() {
        assert!(values_equal(&json!(200), &json!(200.0)));
        assert!(!values_equal(&json!(200), &json!("200")));
        assert_eq!(compare_values(&json!(1), &json!(2.5)), Some(Ordering::Less));
        assert_eq!(compare_values(&json!(1), &json!("1")), None);
    }

    #[test]
    fn sort_order_puts_missing_first() {
        assert_eq!(sort_order(None, Some(&json!(0))), Ordering::Less);
        assert_eq!(sort_order(Some(&json!("a")), Some(&json!(9))), Ordering::Greater);
    }
}
