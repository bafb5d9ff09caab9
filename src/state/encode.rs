//! Reversible key escaping for the persistence boundary.
//!
//! The document store rejects `.` inside map keys, but chat ids
//! (`group@g.us`) and user ids (`123@s.whatsapp.net`) contain dots. Keys are
//! escaped on write and unescaped on read; the escape never appears in
//! replies, prompts, or any other external output.

use serde_json::Value;

/// Escape a single map key: `~` → `~~`, then `.` → `~`.
///
/// Escaping the escape character first keeps the mapping reversible for
/// every input string.
pub fn encode_key(key: &str) -> String {
    let mut out = String::with_capacity(key.len());
    for ch in key.chars() {
        match ch {
            '~' => out.push_str("~~"),
            '.' => out.push('~'),
            other => out.push(other),
        }
    }
    out
}

/// Reverse [`encode_key`]: `~~` → `~`, lone `~` → `.`.
pub fn decode_key(key: &str) -> String {
    let mut out = String::with_capacity(key.len());
    let mut chars = key.chars().peekable();
    while let Some(ch) = chars.next() {
        if ch == '~' {
            if chars.peek() == Some(&'~') {
                chars.next();
                out.push('~');
            } else {
                out.push('.');
            }
        } else {
            out.push(ch);
        }
    }
    out
}

/// Recursively escape every object key in a JSON document.
pub fn encode_document(value: &Value) -> Value {
    match value {
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| (encode_key(k), encode_document(v)))
                .collect(),
        ),
        Value::Array(items) => Value::Array(items.iter().map(encode_document).collect()),
        other => other.clone(),
    }
}

/// Recursively unescape every object key in a JSON document.
pub fn decode_document(value: &Value) -> Value {
    match value {
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| (decode_key(k), decode_document(v)))
                .collect(),
        ),
        Value::Array(items) => Value::Array(items.iter().map(decode_document).collect()),
        other => other.clone(),
    }
}
