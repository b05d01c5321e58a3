use std::sync::LazyLock;

use regex::Regex;
use serde_json::Value;

use crate::model::{AlertRule, ErrorRecord};
use crate::store::values_equal;

/// Error type whose alerts are governed by per-site rules.
pub const HTTP_ERROR: &str = "HttpError";

/// Messages of non-HTTP errors that never alert.
static NOISE: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [r".open", r"Request", r"An attempt"]
        .into_iter()
        .filter_map(|p| Regex::new(p).ok())
        .collect()
});

/// Whether an error should produce an outbound alert.
///
/// For `HttpError`, every rule whose pattern matches the request URL must
/// pass. A missing response is inspected as an empty object. For every
/// other error type, messages matching the noise list are suppressed.
pub fn decide(event: &ErrorRecord, rules: &[AlertRule]) -> bool {
    if event.error_type.as_deref() != Some(HTTP_ERROR) {
        return !event
            .value
            .as_deref()
            .is_some_and(|message| NOISE.iter().any(|re| re.is_match(message)));
    }

    let url = event.meta.url.as_deref().unwrap_or_default();
    let response = event.meta.response.as_ref();
    rules
        .iter()
        .filter(|rule| rule.matches_url(url))
        .all(|rule| passes(rule, response))
}

fn passes(rule: &AlertRule, response: Option<&Value>) -> bool {
    if rule.ignore {
        return false;
    }
    let Some(key) = rule.key.as_deref() else {
        return true;
    };
    let field = response.and_then(Value::as_object).and_then(|r| r.get(key));
    if rule.allow_empty && field.is_none_or(is_empty) {
        return false;
    }
    if let Some(value) = field {
        if rule.enums.iter().any(|known| values_equal(known, value)) {
            return false;
        }
    }
    true
}

/// Falsy scalars and empty collections. Non-zero numbers and `true` count
/// as present.
fn is_empty(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Bool(b) => !b,
        Value::Number(n) => n.as_f64().is_some_and(|n| n == 0.0),
        Value::String(s) => s.is_empty(),
        Value::Array(items) => items.is_empty(),
        Value::Object(map) => map.is_empty(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Category, CategoryRecord};
    use rstest::rstest;
    use serde_json::json;

    fn http_error(url: &str, response: Option<Value>) -> ErrorRecord {
        let mut meta = json!({"url": url});
        if let Some(response) = response {
            meta["response"] = response;
        }
        error(json!({"error_type": HTTP_ERROR, "value": "failed", "meta": meta}))
    }

    fn error(fields: Value) -> ErrorRecord {
        let mut doc = json!({"site_id": "s1", "create_at": 0});
        if let (Some(doc), Value::Object(fields)) = (doc.as_object_mut(), fields) {
            doc.extend(fields);
        }
        let Value::Object(doc) = doc else { unreachable!() };
        match CategoryRecord::from_document(Category::Error, doc).unwrap() {
            CategoryRecord::Error(record) => record,
            _ => unreachable!(),
        }
    }

    fn status_rule() -> AlertRule {
        AlertRule {
            key: Some("status".to_string()),
            enums: vec![json!(200)],
            ..AlertRule::for_pattern("*")
        }
    }

    #[rstest]
    #[case(json!({"status": 200}), false)]
    #[case(json!({"status": 500}), true)]
    #[case(json!({"status": 200.0}), false)]
    fn known_status_suppresses(#[case] response: Value, #[case] alert: bool) {
        let event = http_error("https://api.test/users", Some(response));
        assert_eq!(decide(&event, &[status_rule()]), alert);
    }

    #[test]
    fn no_matching_rule_alerts() {
        let event = http_error("https://api.test/users", Some(json!({"status": 200})));
        let rule = AlertRule {
            ignore: true,
            ..AlertRule::for_pattern("/orders")
        };
        assert!(decide(&event, &[rule]));
        assert!(decide(&event, &[]));
    }

    #[test]
    fn ignore_wins_over_passing_rules() {
        let event = http_error("https://api.test/users", Some(json!({"status": 500})));
        let ignore = AlertRule {
            ignore: true,
            ..AlertRule::for_pattern("/users")
        };
        assert!(!decide(&event, &[status_rule(), ignore.clone()]));
        assert!(!decide(&event, &[ignore, status_rule()]));
    }

    #[test]
    fn unrelated_rule_does_not_change_decision() {
        let event = http_error("https://api.test/users", Some(json!({"status": 500})));
        let unrelated = AlertRule {
            key: Some("status".to_string()),
            enums: vec![json!(500)],
            ..AlertRule::for_pattern("/billing")
        };
        assert_eq!(
            decide(&event, &[status_rule()]),
            decide(&event, &[status_rule(), unrelated])
        );
    }

    #[rstest]
    #[case(Some(json!({"code": ""})))]
    #[case(Some(json!({"code": null})))]
    #[case(Some(json!({"code": []})))]
    #[case(Some(json!({})))]
    #[case(None)]
    fn allow_empty_suppresses_blank_fields(#[case] response: Option<Value>) {
        let rule = AlertRule {
            key: Some("code".to_string()),
            allow_empty: true,
            ..AlertRule::for_pattern("*")
        };
        let event = http_error("https://api.test/x", response);
        assert!(!decide(&event, &[rule]));
    }

    #[rstest]
    #[case(json!(0), false)]
    #[case(json!(0.0), false)]
    #[case(json!(false), false)]
    #[case(json!(""), false)]
    #[case(json!([]), false)]
    #[case(json!(500), true)]
    #[case(json!(-1), true)]
    #[case(json!(true), true)]
    #[case(json!("E_TIMEOUT"), true)]
    fn falsy_codes_count_as_empty(#[case] code: Value, #[case] alerts: bool) {
        let rule = AlertRule {
            key: Some("code".to_string()),
            allow_empty: true,
            ..AlertRule::for_pattern("*")
        };
        let event = http_error("https://api.test/x", Some(json!({"code": code})));
        assert_eq!(decide(&event, &[rule]), alerts);
    }

    #[rstest]
    #[case("Failed to execute 'open' on 'XMLHttpRequest'", false)]
    #[case("Request aborted", false)]
    #[case("An attempt was made to use an object", false)]
    #[case("Cannot read properties of undefined", true)]
    fn noise_list_for_other_errors(#[case] message: &str, #[case] alert: bool) {
        let event = error(json!({"error_type": "TypeError", "value": message}));
        assert_eq!(decide(&event, &[status_rule()]), alert);
    }
}
