//! Operand/field comparison for the field operators.

use super::normalize::{canonical, Norm};
use regex::{Regex, RegexBuilder};
use serde_json::{Map, Value};
use std::collections::HashMap;

/// Regexes of a `matches` operand, compiled once when the predicate is parsed.
#[derive(Debug, Clone, Default)]
pub struct Patterns(HashMap<String, Regex>);

impl Patterns {
    /// Compile every leaf of `operand`; `i` flag unless `case_sensitive`.
    pub fn compile(operand: &Value, case_sensitive: bool) -> Result<Self, regex::Error> {
        let mut patterns = Self::default();
        patterns.collect(operand, case_sensitive)?;
        Ok(patterns)
    }

    fn collect(&mut self, operand: &Value, case_sensitive: bool) -> Result<(), regex::Error> {
        let pattern = match operand {
            Value::Object(fields) => {
                return fields.values().try_for_each(|v| self.collect(v, case_sensitive))
            }
            Value::Array(items) => {
                return items.iter().try_for_each(|v| self.collect(v, case_sensitive))
            }
            Value::String(s) => s.clone(),
            Value::Null => String::new(),
            other => other.to_string(),
        };
        if !self.0.contains_key(&pattern) {
            let regex = RegexBuilder::new(&pattern)
                .case_insensitive(!case_sensitive)
                .build()?;
            self.0.insert(pattern, regex);
        }
        Ok(())
    }

    fn is_match(&self, pattern: &str, text: &str) -> bool {
        self.0.get(pattern).is_some_and(|re| re.is_match(text))
    }
}

/// Leaf test applied once both sides are normalized.
#[derive(Debug, Clone, Copy)]
pub enum Test<'a> {
    Equals,
    Contains,
    StartsWith,
    EndsWith,
    Matches(&'a Patterns),
    Exists,
}

impl Test<'_> {
    fn leaf(self, expected: &Value, actual: &Norm) -> bool {
        if matches!(self, Test::Exists) {
            let wanted = match expected {
                Value::Bool(b) => *b,
                Value::String(s) => s == "true",
                _ => false,
            };
            return wanted == actual.has_value();
        }

        let expected = match expected {
            Value::String(s) => s.as_str(),
            _ => return false,
        };
        match actual {
            Norm::List(items) => items.iter().any(|item| self.leaf_text(expected, item)),
            other => self.leaf_text(expected, other),
        }
    }

    fn leaf_text(self, expected: &str, actual: &Norm) -> bool {
        let actual = match actual {
            Norm::Text(text) => text.as_str(),
            Norm::Missing => "",
            _ => return false,
        };
        match self {
            Test::Equals => actual == expected,
            Test::Contains => actual.contains(expected),
            Test::StartsWith => actual.starts_with(expected),
            Test::EndsWith => actual.ends_with(expected),
            Test::Matches(patterns) => patterns.is_match(expected, actual),
            Test::Exists => !actual.is_empty(),
        }
    }
}

/// Every expected field must be satisfied by the matching actual field.
pub fn fields_satisfied(expected: &Map<String, Value>, actual: &Norm, test: Test<'_>) -> bool {
    expected
        .iter()
        .all(|(key, value)| value_satisfied(value, &actual.child(key), test))
}

fn value_satisfied(expected: &Value, actual: &Norm, test: Test<'_>) -> bool {
    if *actual == Norm::Unparseable {
        return false;
    }
    match expected {
        Value::Object(fields) => match actual {
            Norm::Text(text) => match Norm::parse_json(text) {
                Some(parsed @ (Norm::Object(_) | Norm::List(_))) => {
                    value_satisfied(expected, &parsed, test)
                }
                _ => false,
            },
            Norm::List(items) => items.iter().any(|item| value_satisfied(expected, item, test)),
            _ => fields_satisfied(fields, actual, test),
        },
        Value::Array(items) => {
            let actual_items: Vec<&Norm> = match actual {
                Norm::List(values) => values.iter().collect(),
                other => vec![other],
            };
            items.iter().all(|item| {
                actual_items
                    .iter()
                    .any(|candidate| value_satisfied(item, candidate, test))
            })
        }
        leaf => test.leaf(leaf, actual),
    }
}

/// Whole-structure equality per top-level field, arrays order-independent.
pub fn deep_equals(expected: &Map<String, Value>, actual: &Norm) -> bool {
    expected.iter().all(|(key, value)| {
        let mut field = actual.child(key);
        if value.is_object() {
            if let Norm::Text(text) = &field {
                if let Some(parsed) = Norm::parse_json(text) {
                    field = parsed;
                }
            }
        }
        field.canonical() == Some(canonical(value))
    })
}
