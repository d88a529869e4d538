//! Copy behavior - copy request fields into response.

use super::extraction::ExtractionMethod;
use crate::predicate::extract;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Copy behavior - copy request fields into response
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct CopyBehavior {
    /// Request field to copy from
    pub from: CopySource,
    /// Response token to replace (e.g., "${NAME}")
    pub into: String,
    /// Extraction method
    #[serde(rename = "using")]
    pub extraction: ExtractionMethod,
}

/// Source of data to copy from request
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(untagged)]
pub enum CopySource {
    /// Simple field: "path", "body", "method" or a dotted path
    Simple(String),
    /// Nested field: {"query": "name"} or {"headers": "Content-Type"}
    Nested(Map<String, Value>),
}

impl CopySource {
    pub fn to_value(&self) -> Value {
        match self {
            CopySource::Simple(field) => Value::String(field.clone()),
            CopySource::Nested(map) => Value::Object(map.clone()),
        }
    }

    /// Text of the addressed request field; missing fields are empty.
    pub fn extract(&self, request: &Value) -> String {
        extract::get_from(request, &self.to_value())
    }
}

impl CopyBehavior {
    /// Values the behavior extracts from the request.
    pub fn values(&self, request: &Value) -> Vec<String> {
        self.extraction.values(&self.from.extract(request))
    }
}

/// Apply copy behaviors to every string in the response.
pub fn apply_copy_behaviors(response: &mut Value, behaviors: &[CopyBehavior], request: &Value) {
    for behavior in behaviors {
        let values = behavior.values(request);
        if values.is_empty() {
            tracing::debug!("copy behavior {} matched nothing", behavior.into);
            continue;
        }
        replace_indexed(response, &behavior.into, &values);
    }
}

/// Replace `${T}[i]` with `values[i]`, then `${T}` with `values[0]`.
pub(super) fn replace_indexed(response: &mut Value, token: &str, values: &[String]) {
    for (i, value) in values.iter().enumerate() {
        super::replace_token(response, &format!("{token}[{i}]"), value);
    }
    if let Some(first) = values.first() {
        super::replace_token(response, token, first);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn request() -> Value {
        json!({
            "method": "GET",
            "path": "/users/123",
            "query": {"name": "Alice"},
            "headers": {"Content-Type": "application/json"},
            "body": "test body"
        })
    }

    #[test]
    fn test_copy_source_simple_and_nested() {
        let request = request();
        assert_eq!(CopySource::Simple("path".into()).extract(&request), "/users/123");
        assert_eq!(CopySource::Simple("method".into()).extract(&request), "GET");

        let source: CopySource = serde_json::from_value(json!({"query": "name"})).unwrap();
        assert_eq!(source.extract(&request), "Alice");

        let source: CopySource = serde_json::from_value(json!({"headers": "content-type"})).unwrap();
        assert_eq!(source.extract(&request), "application/json");

        assert_eq!(CopySource::Simple("missing".into()).extract(&request), "");
    }

    #[test]
    fn test_apply_copy_behaviors() {
        let behaviors: Vec<CopyBehavior> = serde_json::from_value(json!([
            {"from": "path", "into": "${ID}", "using": {"method": "regex", "selector": "\\d+"}},
            {"from": {"query": "name"}, "into": "${NAME}", "using": {"method": "regex", "selector": ".*"}}
        ]))
        .unwrap();

        let mut response = json!({
            "statusCode": 200,
            "headers": {"X-User": "${ID}"},
            "body": {"userId": "${ID}", "greeting": "Hello, ${NAME}!"}
        });
        apply_copy_behaviors(&mut response, &behaviors, &request());
        assert_eq!(
            response,
            json!({
                "statusCode": 200,
                "headers": {"X-User": "123"},
                "body": {"userId": "123", "greeting": "Hello, Alice!"}
            })
        );
    }

    #[test]
    fn test_indexed_tokens_use_groups() {
        let behaviors: Vec<CopyBehavior> = serde_json::from_value(json!([{
            "from": "path",
            "into": "${P}",
            "using": {"method": "regex", "selector": "/(\\w+)/(\\d+)"}
        }]))
        .unwrap();
        let mut response = json!({"body": "${P}[1]=${P}[2] (${P})"});
        apply_copy_behaviors(&mut response, &behaviors, &request());
        assert_eq!(response["body"], "users=123 (/users/123)");
    }

    #[test]
    fn test_no_match_leaves_token() {
        let behaviors: Vec<CopyBehavior> = serde_json::from_value(json!([{
            "from": "path",
            "into": "${X}",
            "using": {"method": "regex", "selector": "nothing-here"}
        }]))
        .unwrap();
        let mut response = json!({"body": "value: ${X}"});
        apply_copy_behaviors(&mut response, &behaviors, &request());
        assert_eq!(response["body"], "value: ${X}");
    }

    #[test]
    fn test_copy_into_status_code() {
        let behaviors: Vec<CopyBehavior> = serde_json::from_value(json!([{
            "from": {"query": "code"},
            "into": "${code}",
            "using": {"method": "regex", "selector": "\\d+"}
        }]))
        .unwrap();
        let mut response = json!({"statusCode": "${code}"});
        apply_copy_behaviors(&mut response, &behaviors, &json!({"query": {"code": "400"}}));
        assert_eq!(response["statusCode"], "400");
    }
}
