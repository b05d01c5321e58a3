//! Canonicalisation of client payloads before they are decoded into records.
//!
//! Clients send camelCase keys, explicit nulls, objects where strings are
//! expected and JSON documents double-encoded as strings. Everything here is
//! infallible: unrecognised shapes are passed through for the record decoder
//! to accept or reject.

use serde_json::{Map, Value};

use crate::model::Category;

/// Keys whose client spelling does not survive plain case conversion.
const KEY_ALIASES: &[(&str, &str)] = &[
    ("conponentName", "component_name"),
    ("componentName", "component_name"),
    ("errorUUid", "error_uuid"),
    ("errorUuid", "error_uuid"),
    ("oId", "o_id"),
];

/// Fields holding structured data that may arrive as encoded JSON strings.
const DECODED_FIELDS: &[&str] = &["body", "params", "response"];

/// Upper bound on nested string decoding.
const MAX_DECODE_DEPTH: usize = 8;

/// Convert a camelCase key to snake_case. Already-snake keys are unchanged.
pub fn snake_case(key: &str) -> String {
    if let Some((_, alias)) = KEY_ALIASES.iter().find(|(from, _)| *from == key) {
        return (*alias).to_string();
    }

    let mut out = String::with_capacity(key.len() + 4);
    let mut prev_lower = false;
    for c in key.chars() {
        if c.is_ascii_uppercase() {
            if prev_lower {
                out.push('_');
            }
            out.push(c.to_ascii_lowercase());
            prev_lower = false;
        } else {
            prev_lower = c.is_ascii_lowercase() || c.is_ascii_digit();
            out.push(c);
        }
    }
    out
}

/// Decode a string that holds (possibly repeatedly) encoded JSON until an
/// object or array comes out. Anything else is returned unchanged.
pub fn decode_nested(value: Value) -> Value {
    let Value::String(original) = value else {
        return value;
    };

    let mut current: Option<Value> = None;
    for _ in 0..MAX_DECODE_DEPTH {
        let text = match &current {
            None => original.as_str(),
            Some(Value::String(s)) => s.as_str(),
            Some(_) => break,
        };
        match serde_json::from_str::<Value>(text) {
            Ok(decoded @ (Value::Object(_) | Value::Array(_))) => return decoded,
            Ok(decoded @ Value::String(_)) => current = Some(decoded),
            _ => break,
        }
    }
    Value::String(original)
}

/// Render any value as the canonical string form of a text field.
fn stringify(value: Value) -> Value {
    match value {
        Value::String(_) | Value::Null => value,
        Value::Number(n) => Value::String(n.to_string()),
        Value::Bool(b) => Value::String(b.to_string()),
        structured => Value::String(structured.to_string()),
    }
}

/// Text fields of each category that must be stored as strings.
const fn string_fields(category: Category) -> &'static [&'static str] {
    match category {
        Category::Api => &["url", "method", "status_text", "trace_id", "monitor_id", "query_url"],
        Category::Error => &["error_type", "value", "error_uuid"],
        Category::Event => &["tag_text", "tag_name", "node_dom", "node_id", "log_name", "log_pos", "log_id"],
        Category::Custom => &["event_category", "event_action", "event_label", "event_id"],
        Category::Performance => &["path"],
        Category::Pageview => &["path", "referrer", "win_screen"],
        Category::UserFeedback => &["content", "o_id", "trace_id"],
        Category::ScreenRecording => &["monitor_id", "trace_id", "page_id"],
    }
}

/// Fields that must be numeric, given as strings by some clients.
const fn numeric_fields(category: Category) -> &'static [&'static str] {
    match category {
        Category::Api => &["status", "request_time", "response_time"],
        _ => &[],
    }
}

fn rekey(map: Map<String, Value>) -> Map<String, Value> {
    map.into_iter()
        .filter(|(_, v)| !v.is_null())
        .map(|(k, v)| (snake_case(&k), v))
        .collect()
}

/// Convert top-level keys to snake_case and drop a client `id`, leaving
/// every value as sent.
pub(crate) fn rename_keys(payload: Map<String, Value>) -> Map<String, Value> {
    let mut map: Map<String, Value> = payload
        .into_iter()
        .map(|(k, v)| (snake_case(&k), v))
        .collect();
    map.remove("id");
    map
}

fn decode_fields(map: &mut Map<String, Value>) {
    for field in DECODED_FIELDS {
        if let Some(v) = map.remove(*field) {
            map.insert((*field).to_string(), decode_nested(v));
        }
    }
}

/// Normalise a raw payload for `category`.
///
/// Drops explicit nulls, converts keys to snake_case (top level, error
/// `meta` and stack frames), decodes encoded JSON in `body`, `params` and
/// `response`, and coerces text and numeric fields to their stored types.
pub fn normalise_payload(category: Category, payload: Map<String, Value>) -> Map<String, Value> {
    let mut map = rekey(payload);

    // Store-assigned; never taken from the client.
    map.remove("id");
    decode_fields(&mut map);

    if category == Category::Error {
        if let Some(Value::Object(meta)) = map.remove("meta") {
            let mut meta = rekey(meta);
            decode_fields(&mut meta);
            map.insert("meta".to_string(), Value::Object(meta));
        }
        if let Some(Value::Array(frames)) = map.remove("stack_trace") {
            let frames = frames
                .into_iter()
                .map(|f| match f {
                    Value::Object(frame) => Value::Object(rekey(frame)),
                    other => other,
                })
                .collect();
            map.insert("stack_trace".to_string(), Value::Array(frames));
        }
    }

    for field in string_fields(category) {
        if let Some(v) = map.remove(*field) {
            map.insert((*field).to_string(), stringify(v));
        }
    }
    for field in numeric_fields(category) {
        if let Some(Value::String(s)) = map.get(*field) {
            let parsed = s.trim().parse::<i64>().ok().map(Value::from);
            match parsed {
                Some(n) => {
                    map.insert((*field).to_string(), n);
                }
                None => {
                    map.remove(*field);
                }
            }
        }
    }
    map
}
