//! Normalized response record returned to protocol adapters.
//!
//! Responses stay a JSON object so behaviors and injected scripts can work on
//! arbitrary protocol fields; typed accessors cover what adapters need.

use crate::config::Protocol;
use crate::error::{DecoyError, ErrorEnvelope};
use base64::Engine as _;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Response(pub Map<String, Value>);

impl Response {
    pub fn new(fields: Map<String, Value>) -> Self {
        Self(fields)
    }

    /// Fields every response of the protocol carries.
    pub fn protocol_default(protocol: Protocol) -> Self {
        let value = match protocol {
            Protocol::Http | Protocol::Https => {
                json!({ "statusCode": 200, "headers": {}, "body": "" })
            }
            Protocol::Tcp => json!({ "data": "" }),
            Protocol::Smtp => json!({}),
        };
        Self(value.as_object().cloned().unwrap_or_default())
    }

    /// Layer `fields` over protocol defaults and the imposter's default response.
    pub fn materialize(
        protocol: Protocol,
        default_response: Option<&Map<String, Value>>,
        fields: &Map<String, Value>,
    ) -> Self {
        let mut response = Self::protocol_default(protocol);
        if let Some(defaults) = default_response {
            response.merge(defaults);
        }
        response.merge(fields);
        response
    }

    /// Error response for a failed proxy call.
    pub fn from_error(protocol: Protocol, error: &DecoyError) -> Self {
        let envelope = ErrorEnvelope::from(error).to_json();
        let value = match protocol {
            Protocol::Http | Protocol::Https => json!({
                "statusCode": error.http_status(),
                "headers": { "content-type": "application/json" },
                "body": envelope,
            }),
            _ => json!({ "data": envelope.to_string() }),
        };
        Self(value.as_object().cloned().unwrap_or_default())
    }

    fn merge(&mut self, fields: &Map<String, Value>) {
        for (key, value) in fields {
            self.0.insert(key.clone(), value.clone());
        }
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn insert(&mut self, key: impl Into<String>, value: Value) {
        self.0.insert(key.into(), value);
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }

    pub fn into_value(self) -> Value {
        Value::Object(self.0)
    }

    pub fn to_value(&self) -> Value {
        Value::Object(self.0.clone())
    }

    /// Build from a JSON value, rejecting non-objects.
    pub fn from_value(value: Value) -> Option<Self> {
        match value {
            Value::Object(map) => Some(Self(map)),
            _ => None,
        }
    }

    /// HTTP status code; accepts numbers and numeric strings.
    pub fn status_code(&self) -> u16 {
        match self.0.get("statusCode") {
            Some(Value::Number(n)) => n.as_u64().and_then(|n| u16::try_from(n).ok()),
            Some(Value::String(s)) => s.trim().parse().ok(),
            _ => None,
        }
        .unwrap_or(200)
    }

    /// Header pairs; array values become repeated headers.
    pub fn headers(&self) -> Vec<(String, String)> {
        let Some(Value::Object(headers)) = self.0.get("headers") else {
            return Vec::new();
        };
        let mut pairs = Vec::new();
        for (name, value) in headers {
            match value {
                Value::Array(values) => {
                    for v in values {
                        pairs.push((name.clone(), value_to_text(v)));
                    }
                }
                other => pairs.push((name.clone(), value_to_text(other))),
            }
        }
        pairs
    }

    pub fn is_binary(&self) -> bool {
        self.0.get("_mode").and_then(Value::as_str) == Some("binary")
    }

    /// Body as text: objects are serialized as JSON.
    pub fn body_text(&self) -> String {
        self.0.get("body").map(value_to_text).unwrap_or_default()
    }

    /// Wire bytes of the body, decoding base64 in binary mode.
    pub fn body_bytes(&self) -> Vec<u8> {
        let text = self.body_text();
        if self.is_binary() {
            if let Ok(bytes) = base64::engine::general_purpose::STANDARD.decode(text.as_bytes()) {
                return bytes;
            }
        }
        text.into_bytes()
    }

    /// TCP payload bytes; `binary` decodes the base64 `data` field.
    pub fn data_bytes(&self, binary: bool) -> Vec<u8> {
        let text = self.0.get("data").map(value_to_text).unwrap_or_default();
        if binary {
            if let Ok(bytes) = base64::engine::general_purpose::STANDARD.decode(text.as_bytes()) {
                return bytes;
            }
        }
        text.into_bytes()
    }

    /// Case-insensitive header lookup returning the stored key and value.
    pub fn find_header(&self, name: &str) -> Option<(String, Value)> {
        let Some(Value::Object(headers)) = self.0.get("headers") else {
            return None;
        };
        headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(k, v)| (k.clone(), v.clone()))
    }

    /// Overwrite a header value, keeping the caller's key casing if present.
    pub fn set_header(&mut self, name: &str, value: Value) {
        let key = self
            .find_header(name)
            .map(|(k, _)| k)
            .unwrap_or_else(|| name.to_string());
        let headers = self
            .0
            .entry("headers")
            .or_insert_with(|| Value::Object(Map::new()));
        if !headers.is_object() {
            *headers = Value::Object(Map::new());
        }
        if let Value::Object(map) = headers {
            map.insert(key, value);
        }
    }

    /// Length of the body on the wire.
    pub fn body_len(&self) -> usize {
        self.body_bytes().len()
    }
}

/// Strings stay as-is, everything else is serialized as JSON.
pub fn value_to_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}
