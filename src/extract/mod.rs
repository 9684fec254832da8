//! JSON path interpreter for polled payloads.
//!
//! Paths are dot-separated keys with optional bracketed array indices:
//!
//! - `data.items` → object key lookups
//! - `results[2].id` → index into an array
//! - `payload.records.*` / `records[*]` → "this array", stop descending
//!
//! An empty path (or `$`) addresses the whole document. Lookups never fail
//! loudly: a missing key, an out-of-range index, a type mismatch or a JSON
//! `null` all resolve to `None`.

use chrono::{DateTime, NaiveDate, NaiveDateTime};
use serde_json::Value;

#[derive(Debug, Clone, PartialEq)]
enum Step<'a> {
    Key(&'a str),
    Index(usize),
    Wildcard,
}

/// Splits a path expression into steps. Returns `None` for malformed brackets.
fn parse_path(path: &str) -> Option<Vec<Step<'_>>> {
    let path = path.trim();
    let path = path.strip_prefix("$.").unwrap_or(path);
    if path.is_empty() || path == "$" {
        return Some(Vec::new());
    }

    let mut steps = Vec::new();
    for segment in path.split('.') {
        let (key, mut rest) = match segment.find('[') {
            Some(pos) => (&segment[..pos], &segment[pos..]),
            None => (segment, ""),
        };

        match key {
            "" => {}
            "*" => steps.push(Step::Wildcard),
            _ => steps.push(Step::Key(key)),
        }

        while !rest.is_empty() {
            let inner_end = rest.find(']')?;
            let inner = rest.get(1..inner_end)?.trim();
            if inner == "*" {
                steps.push(Step::Wildcard);
            } else {
                steps.push(Step::Index(inner.parse().ok()?));
            }
            rest = &rest[inner_end + 1..];
            if !rest.is_empty() && !rest.starts_with('[') {
                return None;
            }
        }
    }
    Some(steps)
}

/// Resolves `path` against `value`.
///
/// # Examples
///
/// ```
/// use conduit::extract::extract_path;
/// use serde_json::json;
///
/// let doc = json!({"data": {"items": [{"id": 1}, {"id": 2}]}});
/// assert_eq!(extract_path(&doc, "data.items[1].id"), Some(&json!(2)));
/// assert_eq!(extract_path(&doc, "data.items.*"), doc.pointer("/data/items"));
/// assert_eq!(extract_path(&doc, "data.missing"), None);
/// ```
pub fn extract_path<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    let steps = parse_path(path)?;
    let mut current = value;
    for step in steps {
        current = match step {
            Step::Key(key) => current.as_object()?.get(key)?,
            Step::Index(index) => current.as_array()?.get(index)?,
            Step::Wildcard => break,
        };
    }
    if current.is_null() {
        None
    } else {
        Some(current)
    }
}

/// Number of records a data payload represents.
///
/// Arrays count their elements, any other present value counts as one record.
pub fn record_count(data: Option<&Value>) -> usize {
    match data {
        Some(Value::Array(items)) => items.len(),
        Some(Value::Null) | None => 0,
        Some(_) => 1,
    }
}

/// Returns true if `s` parses as an ISO-8601 date or date-time.
pub fn is_iso8601(s: &str) -> bool {
    DateTime::parse_from_rfc3339(s).is_ok()
        || NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f").is_ok()
        || NaiveDate::parse_from_str(s, "%Y-%m-%d").is_ok()
}

fn as_timestamp(value: &Value) -> Option<&str> {
    value.as_str().filter(|s| is_iso8601(s))
}

fn keep_max(best: &mut Option<String>, candidate: Option<String>) {
    if let Some(candidate) = candidate {
        let newer = match best.as_deref() {
            Some(current) => candidate.as_str() > current,
            None => true,
        };
        if newer {
            *best = Some(candidate);
        }
    }
}

/// Finds the latest `field` timestamp inside a single record.
///
/// A dotted or bracketed `field` is resolved as a path from the record root.
/// A plain field name is searched recursively through nested objects and
/// arrays, and the lexicographically greatest ISO-8601 value wins.
pub fn find_timestamp(record: &Value, field: &str) -> Option<String> {
    if field.contains('.') || field.contains('[') {
        return extract_path(record, field)
            .and_then(as_timestamp)
            .map(str::to_string);
    }

    let mut best = None;
    match record {
        Value::Object(map) => {
            if let Some(ts) = map.get(field).and_then(as_timestamp) {
                keep_max(&mut best, Some(ts.to_string()));
            }
            for child in map.values() {
                if child.is_object() || child.is_array() {
                    keep_max(&mut best, find_timestamp(child, field));
                }
            }
        }
        Value::Array(items) => {
            for item in items {
                keep_max(&mut best, find_timestamp(item, field));
            }
        }
        _ => {}
    }
    best
}

/// Latest `field` timestamp across all records of a data payload.
///
/// ISO-8601 strings in a consistent format sort chronologically, so the
/// maximum is taken lexicographically.
pub fn max_timestamp(records: &Value, field: &str) -> Option<String> {
    match records {
        Value::Array(items) => {
            let mut best = None;
            for item in items {
                keep_max(&mut best, find_timestamp(item, field));
            }
            best
        }
        other => find_timestamp(other, field),
    }
}

/// Reads a value at `path` and renders it as a continuation token.
///
/// Strings are used verbatim, numbers are stringified; empty strings,
/// booleans and structured values do not count as tokens.
pub fn extract_token(value: &Value, path: &str) -> Option<String> {
    match extract_path(value, path)? {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// JavaScript-style truthiness of the value at `path`.
pub fn is_truthy(value: &Value, path: &str) -> bool {
    match extract_path(value, path) {
        None => false,
        Some(Value::Bool(b)) => *b,
        Some(Value::Number(n)) => n.as_f64().map(|f| f != 0.0).unwrap_or(false),
        Some(Value::String(s)) => !s.is_empty(),
        Some(_) => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_empty_path_is_root() {
        let doc = json!([1, 2, 3]);
        assert_eq!(extract_path(&doc, ""), Some(&doc));
        assert_eq!(extract_path(&doc, "$"), Some(&doc));
    }

    #[test]
    fn test_nested_keys_and_indices() {
        let doc = json!({"a": {"b": [{"c": "x"}, {"c": "y"}]}, "m": [[1, 2], [3, 4]]});
        assert_eq!(extract_path(&doc, "a.b[1].c"), Some(&json!("y")));
        assert_eq!(extract_path(&doc, "$.a.b[0].c"), Some(&json!("x")));
        assert_eq!(extract_path(&doc, "m[1][0]"), Some(&json!(3)));
    }

    #[test]
    fn test_wildcard_stops_descent() {
        let doc = json!({"payload": {"records": [{"id": 1}, {"id": 2}]}});
        let records = json!([{"id": 1}, {"id": 2}]);
        assert_eq!(extract_path(&doc, "payload.records.*"), Some(&records));
        assert_eq!(extract_path(&doc, "payload.records[*]"), Some(&records));
        assert_eq!(extract_path(&doc, "payload.records.*.id"), Some(&records));
    }

    #[test]
    fn test_missing_and_mismatched_paths() {
        let doc = json!({"a": {"b": [1]}, "n": null});
        assert_eq!(extract_path(&doc, "a.c"), None);
        assert_eq!(extract_path(&doc, "a.b[5]"), None);
        assert_eq!(extract_path(&doc, "a.b.c"), None);
        assert_eq!(extract_path(&doc, "a[0]"), None);
        assert_eq!(extract_path(&doc, "n"), None);
    }

    #[test]
    fn test_malformed_brackets() {
        let doc = json!({"a": [1, 2]});
        assert_eq!(extract_path(&doc, "a[1"), None);
        assert_eq!(extract_path(&doc, "a[x]"), None);
        assert_eq!(extract_path(&doc, "a[0]junk"), None);
    }

    #[test]
    fn test_record_count() {
        assert_eq!(record_count(Some(&json!([1, 2, 3]))), 3);
        assert_eq!(record_count(Some(&json!([]))), 0);
        assert_eq!(record_count(Some(&json!({"id": 1}))), 1);
        assert_eq!(record_count(Some(&Value::Null)), 0);
        assert_eq!(record_count(None), 0);
    }

    #[test]
    fn test_is_iso8601() {
        assert!(is_iso8601("2024-03-01T10:00:00Z"));
        assert!(is_iso8601("2024-03-01T10:00:00.123+02:00"));
        assert!(is_iso8601("2024-03-01T10:00:00"));
        assert!(is_iso8601("2024-03-01"));
        assert!(!is_iso8601("yesterday"));
        assert!(!is_iso8601("1709287200"));
    }

    #[test]
    fn test_max_timestamp_flat_records() {
        let records = json!([
            {"id": 1, "updatedAt": "2024-01-02T00:00:00Z"},
            {"id": 2, "updatedAt": "2024-01-05T00:00:00Z"},
            {"id": 3, "updatedAt": "2024-01-03T00:00:00Z"},
            {"id": 4}
        ]);
        assert_eq!(
            max_timestamp(&records, "updatedAt"),
            Some("2024-01-05T00:00:00Z".to_string())
        );
    }

    #[test]
    fn test_max_timestamp_nested_search() {
        let records = json!([
            {"id": 1, "meta": {"updatedAt": "2024-02-01T00:00:00Z"}},
            {"id": 2, "history": [
                {"updatedAt": "2024-02-10T00:00:00Z"},
                {"updatedAt": "2024-01-10T00:00:00Z"}
            ]}
        ]);
        assert_eq!(
            max_timestamp(&records, "updatedAt"),
            Some("2024-02-10T00:00:00Z".to_string())
        );
    }

    #[test]
    fn test_max_timestamp_dot_notation() {
        let records = json!([
            {"attributes": {"modified": "2024-04-01T00:00:00Z"}, "modified": "2030-01-01T00:00:00Z"},
            {"attributes": {"modified": "2024-04-03T00:00:00Z"}}
        ]);
        assert_eq!(
            max_timestamp(&records, "attributes.modified"),
            Some("2024-04-03T00:00:00Z".to_string())
        );
    }

    #[test]
    fn test_max_timestamp_ignores_non_timestamps() {
        let records = json!([{"updatedAt": "not a date"}, {"updatedAt": 1709287200}]);
        assert_eq!(max_timestamp(&records, "updatedAt"), None);
    }

    #[test]
    fn test_extract_token() {
        let doc = json!({"next": "abc", "num": 42, "empty": "", "flag": true});
        assert_eq!(extract_token(&doc, "next"), Some("abc".to_string()));
        assert_eq!(extract_token(&doc, "num"), Some("42".to_string()));
        assert_eq!(extract_token(&doc, "empty"), None);
        assert_eq!(extract_token(&doc, "flag"), None);
        assert_eq!(extract_token(&doc, "missing"), None);
    }

    #[test]
    fn test_is_truthy() {
        let doc = json!({"t": true, "f": false, "one": 1, "zero": 0, "s": "x", "e": "", "o": {}});
        assert!(is_truthy(&doc, "t"));
        assert!(!is_truthy(&doc, "f"));
        assert!(is_truthy(&doc, "one"));
        assert!(!is_truthy(&doc, "zero"));
        assert!(is_truthy(&doc, "s"));
        assert!(!is_truthy(&doc, "e"));
        assert!(is_truthy(&doc, "o"));
        assert!(!is_truthy(&doc, "missing"));
    }
}
