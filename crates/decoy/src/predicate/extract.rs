//! Field extraction from normalized requests.
//!
//! Fields are addressed either by a path string (`"path"`,
//! `"headers.Content-Type"`) or by a nested object naming one field per
//! level (`{"query": "q"}`). Segments match keys case-insensitively.

use super::selector::Selector;
use crate::config::Mode;
use crate::error::{DecoyError, Result};
use crate::response::value_to_text;
use base64::Engine as _;
use serde_json::Value;

/// Locate the value addressed by `from` inside `request`.
pub fn lookup<'a>(request: &'a Value, from: &Value) -> Option<&'a Value> {
    match from {
        Value::String(path) => lookup_path(request, path),
        Value::Object(nested) => {
            let (key, rest) = nested.iter().next()?;
            let child = find_key(request, key)?;
            lookup(child, rest)
        }
        _ => None,
    }
}

fn lookup_path<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    if let Some(found) = find_key(value, path) {
        return Some(found);
    }
    let (head, rest) = path.split_once('.')?;
    lookup_path(find_key(value, head)?, rest)
}

fn find_key<'a>(value: &'a Value, key: &str) -> Option<&'a Value> {
    let obj = value.as_object()?;
    obj.get(key).or_else(|| {
        obj.iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(key))
            .map(|(_, v)| v)
    })
}

/// Text of a field; multi-valued fields yield their first value, a missing
/// field yields the empty string.
pub fn get_from(request: &Value, from: &Value) -> String {
    match lookup(request, from) {
        Some(Value::Array(values)) => values.first().map(value_to_text).unwrap_or_default(),
        Some(value) => value_to_text(value),
        None => String::new(),
    }
}

/// Decode base64 text into a string holding one char per byte.
pub fn decode_binary(text: &str) -> String {
    match base64::engine::general_purpose::STANDARD.decode(text.trim()) {
        Ok(bytes) => bytes.into_iter().map(char::from).collect(),
        Err(_) => text.to_string(),
    }
}

/// Extract a field, optionally narrowing it with a sub-selector.
///
/// Returns every selected value in document order. Without a selector the
/// result is the single field value.
pub fn extract(
    request: &Value,
    from: &Value,
    selector: Option<&Selector>,
    mode: Mode,
) -> Result<Vec<String>> {
    let mut text = get_from(request, from);
    if mode.is_binary() {
        if selector.is_some_and(Selector::is_xpath) {
            return Err(DecoyError::validation(
                "the xpath selector is not supported in binary mode",
            ));
        }
        text = decode_binary(&text);
    }
    Ok(match selector {
        Some(selector) => selector.select(&text).into_strings(),
        None => vec![text],
    })
}
