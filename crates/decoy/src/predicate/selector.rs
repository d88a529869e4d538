//! XPath and JSONPath sub-selectors.
//!
//! Shared by predicates (`xpath` / `jsonpath` parameters), the `copy` and
//! `lookup` behaviors, and proxy predicate generators.

use crate::error::{DecoyError, Result};
use serde_json::{Map, Value};
use serde_json_path::JsonPath;

/// Outcome of applying a selector to a text value.
#[derive(Debug, Clone, PartialEq)]
pub enum Selection {
    /// Selected values in document order. Empty when nothing matched.
    Values(Vec<Value>),
    /// The text was not XML / JSON.
    Unparseable,
}

impl Selection {
    /// Selected values rendered as strings; unparseable input selects nothing.
    pub fn into_strings(self) -> Vec<String> {
        match self {
            Selection::Values(values) => values.iter().map(crate::response::value_to_text).collect(),
            Selection::Unparseable => Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Selector {
    XPath {
        selector: String,
        /// Namespace prefix to URI bindings.
        ns: Vec<(String, String)>,
    },
    JsonPath {
        selector: String,
    },
}

impl Selector {
    /// Read the `xpath` / `jsonpath` parameter of a predicate or generator.
    pub fn from_config(config: &Map<String, Value>) -> Result<Option<Self>> {
        if let Some(xpath) = config.get("xpath") {
            return Self::xpath_from_value(xpath).map(Some);
        }
        if let Some(jsonpath) = config.get("jsonpath") {
            let selector = match jsonpath {
                Value::Object(obj) => obj.get("selector").and_then(Value::as_str),
                Value::String(s) => Some(s.as_str()),
                _ => None,
            }
            .ok_or_else(|| {
                DecoyError::validation_with_source(
                    "jsonpath parameter requires a selector",
                    jsonpath,
                )
            })?;
            let selector = Selector::JsonPath {
                selector: selector.to_string(),
            };
            selector.validate()?;
            return Ok(Some(selector));
        }
        Ok(None)
    }

    fn xpath_from_value(value: &Value) -> Result<Self> {
        let (selector, ns) = match value {
            Value::Object(obj) => (
                obj.get("selector").and_then(Value::as_str),
                obj.get("ns").and_then(Value::as_object),
            ),
            Value::String(s) => (Some(s.as_str()), None),
            _ => (None, None),
        };
        let selector = selector.ok_or_else(|| {
            DecoyError::validation_with_source("xpath parameter requires a selector", value)
        })?;
        let ns = ns
            .map(|ns| {
                ns.iter()
                    .map(|(prefix, uri)| (prefix.clone(), crate::response::value_to_text(uri)))
                    .collect()
            })
            .unwrap_or_default();
        let selector = Selector::XPath {
            selector: selector.to_string(),
            ns,
        };
        selector.validate()?;
        Ok(selector)
    }

    /// Reject selectors that do not compile.
    pub fn validate(&self) -> Result<()> {
        match self {
            Selector::XPath { selector, .. } => match sxd_xpath::Factory::new().build(selector) {
                Ok(Some(_)) => Ok(()),
                _ => Err(DecoyError::validation_with_source(
                    "malformed xpath predicate selector",
                    &Value::String(selector.clone()),
                )),
            },
            Selector::JsonPath { selector } => JsonPath::parse(selector).map(|_| ()).map_err(|_| {
                DecoyError::validation_with_source(
                    "malformed jsonpath predicate selector",
                    &Value::String(selector.clone()),
                )
            }),
        }
    }

    pub fn is_xpath(&self) -> bool {
        matches!(self, Selector::XPath { .. })
    }

    /// Lower-cased copy, used for case-insensitive predicates.
    pub fn lowercased(&self) -> Self {
        match self {
            Selector::XPath { selector, ns } => Selector::XPath {
                selector: selector.to_lowercase(),
                ns: ns
                    .iter()
                    .map(|(p, u)| (p.to_lowercase(), u.to_lowercase()))
                    .collect(),
            },
            Selector::JsonPath { selector } => Selector::JsonPath {
                selector: selector.to_lowercase(),
            },
        }
    }

    pub fn select(&self, text: &str) -> Selection {
        match self {
            Selector::XPath { selector, ns } => select_xpath(selector, ns, text),
            Selector::JsonPath { selector } => select_jsonpath(selector, text),
        }
    }

    /// Render back to the configuration shape.
    pub fn to_config(&self) -> (&'static str, Value) {
        match self {
            Selector::XPath { selector, ns } => {
                let mut obj = Map::new();
                obj.insert("selector".into(), Value::String(selector.clone()));
                if !ns.is_empty() {
                    let ns: Map<String, Value> = ns
                        .iter()
                        .map(|(p, u)| (p.clone(), Value::String(u.clone())))
                        .collect();
                    obj.insert("ns".into(), Value::Object(ns));
                }
                ("xpath", Value::Object(obj))
            }
            Selector::JsonPath { selector } => {
                let mut obj = Map::new();
                obj.insert("selector".into(), Value::String(selector.clone()));
                ("jsonpath", Value::Object(obj))
            }
        }
    }
}

/// Evaluate an XPath 1.0 expression against an XML document.
///
/// Node sets yield their string values in document order, numbers and
/// booleans are rendered as strings.
pub fn select_xpath(selector: &str, ns: &[(String, String)], xml: &str) -> Selection {
    use sxd_xpath::{Context, Factory, Value as XValue};

    let Ok(package) = sxd_document::parser::parse(xml) else {
        return Selection::Unparseable;
    };
    let document = package.as_document();
    let Ok(Some(xpath)) = Factory::new().build(selector) else {
        return Selection::Values(Vec::new());
    };
    let mut context = Context::new();
    for (prefix, uri) in ns {
        context.set_namespace(prefix, uri);
    }

    match xpath.evaluate(&context, document.root()) {
        Ok(XValue::Nodeset(nodes)) => Selection::Values(
            nodes
                .document_order()
                .into_iter()
                .map(|node| Value::String(node.string_value()))
                .collect(),
        ),
        Ok(XValue::Number(n)) => Selection::Values(vec![Value::String(format_number(n))]),
        Ok(XValue::Boolean(b)) => Selection::Values(vec![Value::String(b.to_string())]),
        Ok(XValue::String(s)) => Selection::Values(vec![Value::String(s)]),
        Err(_) => Selection::Values(Vec::new()),
    }
}

fn format_number(n: f64) -> String {
    if n.fract() == 0.0 && n.is_finite() && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        n.to_string()
    }
}

/// Evaluate a JSONPath (RFC 9535) query against a JSON document.
pub fn select_jsonpath(selector: &str, json: &str) -> Selection {
    let Ok(document) = serde_json::from_str::<Value>(json) else {
        return Selection::Unparseable;
    };
    let Ok(path) = JsonPath::parse(selector) else {
        return Selection::Values(Vec::new());
    };
    Selection::Values(path.query(&document).all().into_iter().cloned().collect())
}
