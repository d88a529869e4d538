//! Normalization of predicate operands and request fields.
//!
//! Both sides of a comparison go through the same pipeline before any
//! operator runs: sub-selection (request side only), `except` removal,
//! lower-casing, binary decoding. Object keys are always lower-cased and
//! scalars are compared as strings.

use super::extract::decode_binary;
use super::selector::{Selection, Selector};
use crate::error::{DecoyError, Result};
use regex::{Regex, RegexBuilder};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// Request-side value after normalization.
#[derive(Debug, Clone, PartialEq)]
pub enum Norm {
    /// Field absent, or a selector that matched nothing.
    Missing,
    /// Selector applied to text that is not XML / JSON.
    Unparseable,
    Text(String),
    List(Vec<Norm>),
    Object(BTreeMap<String, Norm>),
}

impl Norm {
    /// Child by (already lower-cased) key.
    pub fn child(&self, key: &str) -> Norm {
        match self {
            Norm::Object(fields) => fields.get(key).cloned().unwrap_or(Norm::Missing),
            _ => Norm::Missing,
        }
    }

    /// Whether the value is non-empty, as `exists` sees it.
    pub fn has_value(&self) -> bool {
        match self {
            Norm::Missing | Norm::Unparseable => false,
            Norm::Text(text) => !text.is_empty(),
            Norm::List(items) => !items.is_empty(),
            Norm::Object(fields) => !fields.is_empty(),
        }
    }

    /// Parse JSON text into a normalized tree without re-applying transforms.
    pub fn parse_json(text: &str) -> Option<Norm> {
        serde_json::from_str::<Value>(text).ok().map(|v| Norm::plain(&v))
    }

    /// Convert a JSON value, lower-casing keys and stringifying scalars.
    pub fn plain(value: &Value) -> Norm {
        match value {
            Value::Object(fields) => Norm::Object(
                fields
                    .iter()
                    .map(|(k, v)| (k.to_lowercase(), Norm::plain(v)))
                    .collect(),
            ),
            Value::Array(items) => Norm::List(items.iter().map(Norm::plain).collect()),
            Value::String(s) => Norm::Text(s.clone()),
            Value::Null => Norm::Text(String::new()),
            other => Norm::Text(other.to_string()),
        }
    }

    /// Canonical JSON form: arrays sorted so order does not matter.
    pub fn canonical(&self) -> Option<Value> {
        match self {
            Norm::Missing | Norm::Unparseable => None,
            Norm::Text(text) => Some(Value::String(text.clone())),
            Norm::List(items) => Some(sorted_array(
                items.iter().filter_map(Norm::canonical).collect(),
            )),
            Norm::Object(fields) => Some(Value::Object(
                fields
                    .iter()
                    .filter_map(|(k, v)| v.canonical().map(|v| (k.clone(), v)))
                    .collect(),
            )),
        }
    }
}

/// Canonical form of an expected operand.
pub fn canonical(value: &Value) -> Value {
    match value {
        Value::Object(fields) => Value::Object(
            fields
                .iter()
                .map(|(k, v)| (k.clone(), canonical(v)))
                .collect(),
        ),
        Value::Array(items) => sorted_array(items.iter().map(canonical).collect()),
        other => other.clone(),
    }
}

fn sorted_array(mut items: Vec<Value>) -> Value {
    items.sort_by_cached_key(|v| v.to_string());
    Value::Array(items)
}

/// Parameters shared by every field operator.
#[derive(Debug, Clone)]
pub struct Params {
    pub case_sensitive: bool,
    except: Option<Regex>,
    selector: Option<Selector>,
    selector_lower: Option<Selector>,
}

impl Params {
    pub fn from_config(config: &Map<String, Value>) -> Result<Self> {
        let case_sensitive = config
            .get("caseSensitive")
            .and_then(Value::as_bool)
            .unwrap_or(false);

        let except = match config.get("except") {
            Some(Value::String(pattern)) if !pattern.is_empty() => Some(
                RegexBuilder::new(pattern)
                    .case_insensitive(!case_sensitive)
                    .build()
                    .map_err(|_| {
                        DecoyError::validation_with_source(
                            "invalid except regular expression",
                            &Value::String(pattern.clone()),
                        )
                    })?,
            ),
            _ => None,
        };

        let selector = Selector::from_config(config)?;
        let selector_lower = selector.as_ref().map(Selector::lowercased);

        Ok(Self {
            case_sensitive,
            except,
            selector,
            selector_lower,
        })
    }

    pub fn selector(&self) -> Option<&Selector> {
        self.selector.as_ref()
    }

    pub fn has_except(&self) -> bool {
        self.except.is_some()
    }

    fn transform(&self, text: &str, lowercase: bool, binary: bool) -> String {
        if binary {
            return decode_binary(text);
        }
        let mut out = match &self.except {
            Some(re) => re.replace_all(text, "").into_owned(),
            None => text.to_string(),
        };
        if lowercase {
            out = out.to_lowercase();
        }
        out
    }

    /// Normalize the expected operand.
    ///
    /// `raw_strings` leaves string leaves untouched (regex patterns);
    /// `keep_bools` preserves boolean leaves (`exists`).
    pub fn expected(&self, value: &Value, raw_strings: bool, keep_bools: bool, binary: bool) -> Value {
        match value {
            Value::Object(fields) => Value::Object(
                fields
                    .iter()
                    .map(|(k, v)| {
                        (
                            k.to_lowercase(),
                            self.expected(v, raw_strings, keep_bools, binary),
                        )
                    })
                    .collect(),
            ),
            Value::Array(items) => Value::Array(
                items
                    .iter()
                    .map(|v| self.expected(v, raw_strings, keep_bools, binary))
                    .collect(),
            ),
            Value::Bool(b) if keep_bools => Value::Bool(*b),
            Value::String(s) if raw_strings => Value::String(s.clone()),
            Value::String(s) => Value::String(self.transform(s, !self.case_sensitive, binary)),
            Value::Null => Value::String(String::new()),
            other => Value::String(self.transform(&other.to_string(), !self.case_sensitive, binary)),
        }
    }

    /// Normalize the request fields named by `fields`.
    pub fn actual<'a>(
        &self,
        request: &Value,
        fields: impl Iterator<Item = &'a String>,
        lowercase: bool,
        binary: bool,
    ) -> Norm {
        let Some(request) = request.as_object() else {
            return Norm::Missing;
        };
        let mut out = BTreeMap::new();
        for field in fields {
            let found = request.get(field.as_str()).or_else(|| {
                request
                    .iter()
                    .find(|(k, _)| k.eq_ignore_ascii_case(field))
                    .map(|(_, v)| v)
            });
            if let Some(value) = found {
                out.insert(field.to_lowercase(), self.request_value(value, lowercase, binary));
            }
        }
        Norm::Object(out)
    }

    fn request_value(&self, value: &Value, lowercase: bool, binary: bool) -> Norm {
        match value {
            Value::Object(fields) => Norm::Object(
                fields
                    .iter()
                    .map(|(k, v)| (k.to_lowercase(), self.request_value(v, lowercase, binary)))
                    .collect(),
            ),
            Value::Array(items) => Norm::List(
                items
                    .iter()
                    .map(|v| self.request_value(v, lowercase, binary))
                    .collect(),
            ),
            Value::Null => Norm::Missing,
            Value::String(s) => self.leaf(s, lowercase, binary),
            other => self.leaf(&other.to_string(), lowercase, binary),
        }
    }

    fn leaf(&self, text: &str, lowercase: bool, binary: bool) -> Norm {
        let selected = match (&self.selector, &self.selector_lower) {
            (Some(_), Some(lower)) if lowercase => lower.select(&text.to_lowercase()),
            (Some(selector), _) => selector.select(text),
            _ => return Norm::Text(self.transform(text, lowercase, binary)),
        };
        match selected {
            Selection::Unparseable => Norm::Unparseable,
            Selection::Values(values) => match values.as_slice() {
                [] => Norm::Missing,
                [single] => self.selected_value(single, lowercase, binary),
                many => Norm::List(
                    many.iter()
                        .map(|v| self.selected_value(v, lowercase, binary))
                        .collect(),
                ),
            },
        }
    }

    fn selected_value(&self, value: &Value, lowercase: bool, binary: bool) -> Norm {
        match value {
            Value::Object(fields) => Norm::Object(
                fields
                    .iter()
                    .map(|(k, v)| (k.to_lowercase(), self.selected_value(v, lowercase, binary)))
                    .collect(),
            ),
            Value::Array(items) => Norm::List(
                items
                    .iter()
                    .map(|v| self.selected_value(v, lowercase, binary))
                    .collect(),
            ),
            Value::String(s) => Norm::Text(self.transform(s, lowercase, binary)),
            Value::Null => Norm::Text(String::new()),
            other => Norm::Text(self.transform(&other.to_string(), lowercase, binary)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn params(config: Value) -> Params {
        Params::from_config(config.as_object().unwrap()).unwrap()
    }

    #[test]
    fn test_expected_lowercases_keys_and_values() {
        let p = params(json!({}));
        let expected = p.expected(&json!({"Headers": {"X-Id": "ABC", "n": 5}}), false, false, false);
        assert_eq!(expected, json!({"headers": {"x-id": "abc", "n": "5"}}));
    }

    #[test]
    fn test_except_removed_case_insensitively() {
        let p = params(json!({"except": "^Mr\\.? "}));
        let expected = p.expected(&json!({"name": "mr. Smith"}), false, false, false);
        assert_eq!(expected, json!({"name": "smith"}));
    }

    #[test]
    fn test_actual_keeps_only_named_fields() {
        let p = params(json!({"caseSensitive": true}));
        let request = json!({"Path": "/A", "method": "GET"});
        let keys = vec!["path".to_string()];
        let actual = p.actual(&request, keys.iter(), false, false);
        assert_eq!(actual.child("path"), Norm::Text("/A".into()));
        assert_eq!(actual.child("method"), Norm::Missing);
    }

    #[test]
    fn test_jsonpath_single_value_collapses() {
        let p = params(json!({"jsonpath": {"selector": "$.Name"}}));
        let request = json!({"body": r#"{"name": "Alice"}"#});
        let keys = vec!["body".to_string()];
        let actual = p.actual(&request, keys.iter(), true, false);
        assert_eq!(actual.child("body"), Norm::Text("alice".into()));
    }

    #[test]
    fn test_selector_on_non_json_is_unparseable() {
        let p = params(json!({"jsonpath": {"selector": "$.name"}}));
        let request = json!({"body": "plain"});
        let keys = vec!["body".to_string()];
        let actual = p.actual(&request, keys.iter(), true, false);
        assert_eq!(actual.child("body"), Norm::Unparseable);
    }

    #[test]
    fn test_binary_decodes_both_sides() {
        let p = params(json!({}));
        let expected = p.expected(&json!({"data": "AQI="}), false, false, true);
        assert_eq!(expected, json!({"data": "\u{1}\u{2}"}));
    }

    #[test]
    fn test_canonical_sorts_arrays() {
        assert_eq!(canonical(&json!(["b", "a"])), canonical(&json!(["a", "b"])));
        let norm = Norm::List(vec![Norm::Text("b".into()), Norm::Text("a".into())]);
        assert_eq!(norm.canonical(), Some(json!(["a", "b"])));
    }

    #[test]
    fn test_bad_except_rejected() {
        let err = Params::from_config(json!({"except": "("}).as_object().unwrap()).unwrap_err();
        assert_eq!(err.code(), "bad data");
    }
}
