//! Predicate generation for stubs recorded from proxied traffic.

use crate::error::{DecoyError, Result};
use crate::predicate::extract;
use crate::predicate::{Operator, ParseOptions, Predicate, Selector};
use crate::response::value_to_text;
use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// One entry of `predicateGenerators`.
///
/// Every key besides `matches`, `predicateOperator` and `ignore` is a
/// predicate parameter (`caseSensitive`, `except`, `xpath`, `jsonpath`) that
/// is copied onto each generated predicate.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PredicateGenerator {
    pub matches: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub predicate_operator: Option<String>,
    /// Request fields removed before values are captured.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ignore: Option<Map<String, Value>>,
    #[serde(flatten)]
    pub parameters: Map<String, Value>,
}

impl PredicateGenerator {
    /// Check that generated predicates will parse.
    pub fn validate(&self) -> Result<()> {
        let operator = self.operator();
        if Operator::from_key(operator).is_none() {
            return Err(DecoyError::validation(format!(
                "predicateOperator {operator:?} is not a field operator"
            )));
        }
        let mut template = self.parameters.clone();
        template.insert(operator.to_string(), Value::Object(Map::new()));
        Predicate::parse(&Value::Object(template), &ParseOptions::default())?;
        Ok(())
    }

    fn operator(&self) -> &str {
        self.predicate_operator.as_deref().unwrap_or("deepEquals")
    }

    fn capture(&self) -> Capture {
        let case_sensitive = self
            .parameters
            .get("caseSensitive")
            .and_then(Value::as_bool)
            .unwrap_or(false);
        let except = self
            .parameters
            .get("except")
            .and_then(Value::as_str)
            .filter(|pattern| !pattern.is_empty())
            .and_then(|pattern| {
                RegexBuilder::new(pattern)
                    .case_insensitive(!case_sensitive)
                    .build()
                    .ok()
            });
        let selector = Selector::from_config(&self.parameters).ok().flatten();
        Capture { except, selector }
    }

    /// Predicates describing `request` for this generator.
    fn generate(&self, request: &Value) -> Vec<Value> {
        let request = match &self.ignore {
            Some(ignore) => without_ignored(request, ignore),
            None => request.clone(),
        };
        let capture = self.capture();
        let mut predicates = Vec::new();

        for (field, matcher) in &self.matches {
            let actual = extract::lookup(&request, &Value::String(field.clone()));
            let (operator, operand) = match matcher {
                Value::Bool(true) => {
                    let Some(actual) = actual else { continue };
                    (self.operator(), capture.value_of(actual))
                }
                Value::Object(nested) => {
                    let Some(actual) = actual else { continue };
                    ("equals", build_equals(actual, nested, &capture))
                }
                _ => continue,
            };
            let mut predicate = self.parameters.clone();
            let mut fields = Map::new();
            fields.insert(field.clone(), operand);
            predicate.insert(operator.to_string(), Value::Object(fields));
            predicates.push(Value::Object(predicate));
        }
        predicates
    }
}

/// Generated predicates for every generator, in order.
pub fn predicates_for(request: &Value, generators: &[PredicateGenerator]) -> Vec<Value> {
    generators
        .iter()
        .flat_map(|generator| generator.generate(request))
        .collect()
}

struct Capture {
    except: Option<Regex>,
    selector: Option<Selector>,
}

impl Capture {
    fn value_of(&self, actual: &Value) -> Value {
        if let Some(selector) = &self.selector {
            let mut values = selector.select(&value_to_text(actual)).into_strings();
            return match values.len() {
                0 => Value::String(String::new()),
                1 => Value::String(self.strip(&values.remove(0))),
                _ => Value::Array(values.iter().map(|v| Value::String(self.strip(v))).collect()),
            };
        }
        self.strip_value(actual)
    }

    fn strip(&self, text: &str) -> String {
        match &self.except {
            Some(except) => except.replace_all(text, "").into_owned(),
            None => text.to_string(),
        }
    }

    fn strip_value(&self, value: &Value) -> Value {
        match value {
            Value::String(text) => Value::String(self.strip(text)),
            Value::Array(items) => Value::Array(items.iter().map(|v| self.strip_value(v)).collect()),
            Value::Object(fields) => Value::Object(
                fields
                    .iter()
                    .map(|(k, v)| (k.clone(), self.strip_value(v)))
                    .collect(),
            ),
            other => other.clone(),
        }
    }
}

fn build_equals(actual: &Value, matchers: &Map<String, Value>, capture: &Capture) -> Value {
    let mut result = Map::new();
    for (key, matcher) in matchers {
        let Some(child) = extract::lookup(actual, &Value::String(key.clone())) else {
            continue;
        };
        let value = match (child, matcher) {
            (Value::Object(_), Value::Object(nested)) => build_equals(child, nested, capture),
            _ => capture.value_of(child),
        };
        result.insert(key.clone(), value);
    }
    Value::Object(result)
}

/// Copy of `request` without the fields named by `ignore`.
///
/// `ignore` mirrors `matches`: `{"query": "startDate"}`,
/// `{"query": ["a", "b"]}` or `{"query": {"a": true}}`.
fn without_ignored(request: &Value, ignore: &Map<String, Value>) -> Value {
    let mut request = request.clone();
    let Value::Object(fields) = &mut request else {
        return request;
    };
    for (field, rule) in ignore {
        let key = fields
            .keys()
            .find(|k| k.eq_ignore_ascii_case(field))
            .cloned();
        let Some(key) = key else { continue };
        match rule {
            Value::Bool(true) => {
                fields.remove(&key);
            }
            other => {
                if let Some(Value::Object(children)) = fields.get_mut(&key) {
                    for name in ignored_names(other) {
                        children.retain(|k, _| !k.eq_ignore_ascii_case(&name));
                    }
                }
            }
        }
    }
    request
}

fn ignored_names(rule: &Value) -> Vec<String> {
    match rule {
        Value::String(name) => vec![name.clone()],
        Value::Array(names) => names.iter().filter_map(Value::as_str).map(str::to_string).collect(),
        Value::Object(names) => names
            .iter()
            .filter(|(_, v)| v.as_bool() == Some(true))
            .map(|(k, _)| k.clone())
            .collect(),
        _ => Vec::new(),
    }
}
