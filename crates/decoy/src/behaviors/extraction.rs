//! Extraction methods: regex, JSONPath, XPath.

use crate::error::{DecoyError, Result};
use crate::predicate::selector::{select_jsonpath, select_xpath, Selector};
use crate::response::value_to_text;
use regex::RegexBuilder;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Flags for the regex method.
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RegexOptions {
    #[serde(default)]
    pub ignore_case: bool,
    #[serde(default)]
    pub multiline: bool,
}

/// Method for extracting values from a request field (`using`).
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(tag = "method", rename_all = "lowercase")]
pub enum ExtractionMethod {
    /// Regular expression; yields the whole match then every group.
    Regex {
        selector: String,
        #[serde(default)]
        options: RegexOptions,
    },
    #[serde(rename = "jsonpath")]
    JsonPath { selector: String },
    #[serde(rename = "xpath")]
    XPath {
        selector: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        ns: Option<Map<String, Value>>,
    },
}

impl ExtractionMethod {
    /// Reject selectors that do not compile.
    pub fn validate(&self) -> Result<()> {
        match self {
            ExtractionMethod::Regex { selector, .. } => self
                .regex(selector)
                .map(|_| ())
                .map_err(|_| {
                    DecoyError::validation_with_source(
                        "invalid copy regular expression",
                        &Value::String(selector.clone()),
                    )
                }),
            ExtractionMethod::JsonPath { selector } => Selector::JsonPath {
                selector: selector.clone(),
            }
            .validate(),
            ExtractionMethod::XPath { selector, .. } => Selector::XPath {
                selector: selector.clone(),
                ns: Vec::new(),
            }
            .validate(),
        }
    }

    fn regex(&self, selector: &str) -> std::result::Result<regex::Regex, regex::Error> {
        let options = match self {
            ExtractionMethod::Regex { options, .. } => options.clone(),
            _ => RegexOptions::default(),
        };
        RegexBuilder::new(selector)
            .case_insensitive(options.ignore_case)
            .multi_line(options.multiline)
            .build()
    }

    pub fn is_xpath(&self) -> bool {
        matches!(self, ExtractionMethod::XPath { .. })
    }

    /// Every value the method extracts from `text`; empty when nothing matched.
    pub fn values(&self, text: &str) -> Vec<String> {
        match self {
            ExtractionMethod::Regex { selector, .. } => {
                let Ok(re) = self.regex(selector) else {
                    return Vec::new();
                };
                re.captures(text)
                    .map(|caps| {
                        caps.iter()
                            .map(|m| m.map(|m| m.as_str().to_string()).unwrap_or_default())
                            .collect()
                    })
                    .unwrap_or_default()
            }
            ExtractionMethod::JsonPath { selector } => {
                select_jsonpath(selector, text).into_strings()
            }
            ExtractionMethod::XPath { selector, ns } => {
                let ns: Vec<(String, String)> = ns
                    .iter()
                    .flatten()
                    .map(|(prefix, uri)| (prefix.clone(), value_to_text(uri)))
                    .collect();
                select_xpath(selector, &ns, text).into_strings()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_regex_whole_match_and_groups() {
        let method: ExtractionMethod =
            serde_json::from_value(json!({"method": "regex", "selector": "/users/(\\d+)"})).unwrap();
        assert_eq!(method.values("/users/123"), vec!["/users/123", "123"]);
        assert!(method.values("/posts/456").is_empty());
    }

    #[test]
    fn test_regex_ignore_case() {
        let method: ExtractionMethod = serde_json::from_value(json!({
            "method": "regex",
            "selector": "NAME=(\\w+)",
            "options": {"ignoreCase": true}
        }))
        .unwrap();
        assert_eq!(method.values("name=bob")[1], "bob");
    }

    #[test]
    fn test_jsonpath() {
        let method = ExtractionMethod::JsonPath {
            selector: "$.user.name".to_string(),
        };
        assert_eq!(method.values(r#"{"user": {"name": "Alice"}}"#), vec!["Alice"]);
    }

    #[test]
    fn test_xpath_with_namespace() {
        let method: ExtractionMethod = serde_json::from_value(json!({
            "method": "xpath",
            "selector": "//a:id",
            "ns": {"a": "urn:a"}
        }))
        .unwrap();
        assert_eq!(
            method.values(r#"<r xmlns:a="urn:a"><a:id>7</a:id></r>"#),
            vec!["7"]
        );
    }

    #[test]
    fn test_invalid_regex_rejected() {
        let method = ExtractionMethod::Regex {
            selector: "(".into(),
            options: RegexOptions::default(),
        };
        assert_eq!(method.validate().unwrap_err().code(), "bad data");
    }
}
