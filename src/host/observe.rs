// src/host/observe.rs
// Call logging: a handful of truncated parameters, never secrets or bodies

use serde_json::Value;

const MAX_PARAMS: usize = 5;
const MAX_VALUE_LEN: usize = 100;

const SENSITIVE_MARKERS: &[&str] = &[
    "secret", "token", "password", "authorization", "api_key", "apikey", "credential",
];

/// Render tool arguments for the call log: up to five parameters with
/// values truncated at 100 chars, arrays/objects summarized by size, a
/// count of whatever remains, and sensitive keys redacted.
pub fn summarize_args(args: &Value) -> String {
    let Some(object) = args.as_object() else {
        return summarize_value(args);
    };
    if object.is_empty() {
        return "{}".to_string();
    }

    let mut rendered = Vec::new();
    for (key, value) in object.iter().take(MAX_PARAMS) {
        if is_sensitive(key) {
            rendered.push(format!("{key}=[redacted]"));
        } else {
            rendered.push(format!("{key}={}", summarize_value(value)));
        }
    }

    let remaining = object.len().saturating_sub(MAX_PARAMS);
    if remaining > 0 {
        rendered.push(format!("(+{remaining} more)"));
    }
    rendered.join(" ")
}

fn summarize_value(value: &Value) -> String {
    match value {
        Value::Array(items) => format!("[{} items]", items.len()),
        Value::Object(map) => format!("{{{} keys}}", map.len()),
        Value::String(s) => truncate(s),
        other => truncate(&other.to_string()),
    }
}

fn is_sensitive(key: &str) -> bool {
    let key = key.to_lowercase();
    SENSITIVE_MARKERS.iter().any(|marker| key.contains(marker))
}

fn truncate(s: &str) -> String {
    if s.chars().count() <= MAX_VALUE_LEN {
        s.to_string()
    } else {
        let head: String = s.chars().take(MAX_VALUE_LEN).collect();
        format!("{head}…")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_plain_params() {
        let summary = summarize_args(&json!({"table": "incident", "limit": 10}));
        assert!(summary.contains("table=incident"));
        assert!(summary.contains("limit=10"));
    }

    #[test]
    fn test_long_values_truncated() {
        let long = "x".repeat(300);
        let summary = summarize_args(&json!({ "query": long }));
        assert!(summary.len() < 200);
        assert!(summary.contains('…'));
    }

    #[test]
    fn test_collections_summarized_by_size() {
        let summary = summarize_args(&json!({
            "records": [1, 2, 3],
            "options": {"a": 1, "b": 2}
        }));
        assert!(summary.contains("records=[3 items]"));
        assert!(summary.contains("options={2 keys}"));
    }

    #[test]
    fn test_param_count_capped_with_remainder() {
        let summary = summarize_args(&json!({
            "a": 1, "b": 2, "c": 3, "d": 4, "e": 5, "f": 6, "g": 7
        }));
        assert!(summary.contains("(+2 more)"));
    }

    #[test]
    fn test_secrets_redacted() {
        let summary = summarize_args(&json!({
            "api_key": "sk-123456",
            "Authorization": "Bearer abc",
            "client_secret": "shh",
            "table": "incident"
        }));
        assert!(!summary.contains("sk-123456"));
        assert!(!summary.contains("Bearer abc"));
        assert!(!summary.contains("shh"));
        assert!(summary.contains("[redacted]"));
        assert!(summary.contains("table=incident"));
    }

    #[test]
    fn test_non_object_args() {
        assert_eq!(summarize_args(&json!(null)), "null");
        assert_eq!(summarize_args(&json!({})), "{}");
    }
}
