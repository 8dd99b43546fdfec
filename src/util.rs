//! Shared utility functions used across the codebase.

use std::sync::OnceLock;

use regex::Regex;
use serde_json::Value;

const REDACTED: &str = "[REDACTED]";

/// Keys dropped from action traces before they are persisted. Selector strings
/// are large and useless once the run is over.
const SELECTOR_KEYS: &[&str] = &[
    "selector",
    "css_selector",
    "xpath_selector",
    "python_selector",
    "playwright_selector",
    "notte_selector",
    "iframe_parent_css_selectors",
];

/// Parse an environment variable as a boolean, returning `default` if unset.
///
/// Recognises `1`, `true`, `yes`, `y`, `on` (case-insensitive) as `true`;
/// everything else maps to `false`.
pub fn env_var_bool(name: &str, default: bool) -> bool {
    match std::env::var(name) {
        Ok(value) => matches!(
            value.trim().to_lowercase().as_str(),
            "1" | "true" | "yes" | "y" | "on"
        ),
        Err(_) => default,
    }
}

/// Get current timestamp as RFC3339 string.
pub fn now_string() -> String {
    chrono::Utc::now().to_rfc3339()
}

/// Truncate to at most `max_chars` characters (not bytes).
pub fn truncate_chars(value: &str, max_chars: usize) -> String {
    match value.char_indices().nth(max_chars) {
        Some((idx, _)) => value[..idx].to_string(),
        None => value.to_string(),
    }
}

fn secret_key_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"(?i)(api[_-]?key|apikey|token|secret|password|passwd|authorization|cookie|credential)")
            .expect("secret key pattern is valid")
    })
}

fn secret_value_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"(?i)(bearer\s+[a-z0-9._\-]+|sk-[a-z0-9_\-]{8,}|bb_live_[a-z0-9_\-]+)")
            .expect("secret value pattern is valid")
    })
}

/// Replace secret-looking substrings inside free text.
pub fn redact_text(text: &str) -> String {
    secret_value_pattern().replace_all(text, REDACTED).into_owned()
}

/// Recursively redact secret-like fields from a JSON value.
///
/// Object keys that look like credentials have their whole value replaced;
/// string values anywhere else are scrubbed of bearer tokens and API keys.
pub fn redact_secrets(value: Value) -> Value {
    match value {
        Value::Object(map) => Value::Object(
            map.into_iter()
                .map(|(key, value)| {
                    if secret_key_pattern().is_match(&key) {
                        (key, Value::String(REDACTED.to_string()))
                    } else {
                        (key, redact_secrets(value))
                    }
                })
                .collect(),
        ),
        Value::Array(items) => Value::Array(items.into_iter().map(redact_secrets).collect()),
        Value::String(s) => Value::String(redact_text(&s)),
        other => other,
    }
}

/// Recursively drop selector fields from an action trace.
pub fn strip_selectors(value: Value) -> Value {
    match value {
        Value::Object(map) => Value::Object(
            map.into_iter()
                .filter(|(key, _)| !SELECTOR_KEYS.contains(&key.as_str()))
                .map(|(key, value)| (key, strip_selectors(value)))
                .collect(),
        ),
        Value::Array(items) => Value::Array(items.into_iter().map(strip_selectors).collect()),
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn truncate_chars_counts_characters() {
        assert_eq!(truncate_chars("héllo", 2), "hé");
        assert_eq!(truncate_chars("abc", 10), "abc");
        assert_eq!(truncate_chars("", 3), "");
    }

    #[test]
    fn redact_secrets_replaces_credential_keys() {
        let redacted = redact_secrets(json!({
            "apiKey": "abc",
            "nested": { "Authorization": "Bearer xyz", "url": "https://example.com" },
            "list": [{ "token": "t" }]
        }));
        assert_eq!(redacted["apiKey"], "[REDACTED]");
        assert_eq!(redacted["nested"]["Authorization"], "[REDACTED]");
        assert_eq!(redacted["nested"]["url"], "https://example.com");
        assert_eq!(redacted["list"][0]["token"], "[REDACTED]");
    }

    #[test]
    fn redact_text_scrubs_bearer_values() {
        let text = redact_text("upstream said: Bearer abc.def-123 was rejected");
        assert!(!text.contains("abc.def-123"));
        assert!(text.contains("[REDACTED]"));
    }

    #[test]
    fn strip_selectors_is_recursive() {
        let stripped = strip_selectors(json!([
            { "name": "click", "selector": "#go", "result": { "xpath_selector": "//a", "ok": true } }
        ]));
        assert_eq!(stripped, json!([{ "name": "click", "result": { "ok": true } }]));
    }
}
