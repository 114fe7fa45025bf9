//! Tolerant parsing of LLM output.
//!
//! Models are prompted to return JSON but routinely wrap it in prose or
//! code fences. The first stage extracts a loose `serde_json::Value`
//! (top-level object or array) from raw text; typed second stages with
//! defaulted fields live next to their pipelines.

use serde_json::Value;

/// Extract the first JSON object or array embedded in `text`.
///
/// Any text outside the outermost `{…}` / `[…]` block is ignored so minor
/// formatting deviations do not break parsing. Returns `None` when no
/// parseable block exists.
pub fn extract_json(text: &str) -> Option<Value> {
    if let Ok(value) = serde_json::from_str::<Value>(text.trim()) {
        if value.is_object() || value.is_array() {
            return Some(value);
        }
    }

    for (open, close) in [('{', '}'), ('[', ']')] {
        let start = text.find(open);
        let end = text.rfind(close);
        if let (Some(s), Some(e)) = (start, end) {
            if s < e {
                if let Ok(value) = serde_json::from_str::<Value>(&text[s..=e]) {
                    return Some(value);
                }
            }
        }
    }

    None
}

/// Read a string field from an object, tolerating missing fields.
pub fn string_field(value: &Value, field: &str) -> Option<String> {
    value
        .get(field)
        .and_then(Value::as_str)
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

/// Pull a list out of a loose value: a top-level array is used as-is, an
/// object contributes the first array found under the given keys, and
/// anything else yields an empty list.
pub fn list_under<'a>(value: &'a Value, keys: &[&str]) -> Vec<&'a Value> {
    if let Some(items) = value.as_array() {
        return items.iter().collect();
    }
    for key in keys {
        if let Some(items) = value.get(key).and_then(Value::as_array) {
            return items.iter().collect();
        }
    }
    Vec::new()
}
