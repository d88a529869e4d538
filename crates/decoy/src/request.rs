//! Normalized request record handed from protocol adapters to the engine.
//!
//! HTTP-shaped fields are optional so the same record serves TCP (`data`)
//! and SMTP (protocol fields kept in `extra`).

use base64::Engine as _;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Request {
    #[serde(default)]
    pub request_from: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    /// Query parameters; repeated keys hold an array of values.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub query: Option<Map<String, Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub headers: Option<Map<String, Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<String>,
    /// Protocol specific fields (SMTP envelope, parsed form, ...).
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Request {
    /// Build an HTTP request record.
    ///
    /// `application/x-www-form-urlencoded` bodies are also exposed as `form`.
    pub fn http(
        request_from: impl Into<String>,
        method: impl Into<String>,
        path: impl Into<String>,
        query: Map<String, Value>,
        headers: Map<String, Value>,
        body: impl Into<String>,
    ) -> Self {
        let body = body.into();
        let mut extra = Map::new();
        let is_form = headers.iter().any(|(k, v)| {
            k.eq_ignore_ascii_case("content-type")
                && v.as_str()
                    .is_some_and(|ct| ct.contains("application/x-www-form-urlencoded"))
        });
        if is_form {
            extra.insert("form".to_string(), Value::Object(parse_query_string(&body)));
        }

        Self {
            request_from: request_from.into(),
            method: Some(method.into()),
            path: Some(path.into()),
            query: Some(query),
            headers: Some(headers),
            body: Some(body),
            data: None,
            extra,
        }
    }

    /// Build an HTTP request record from the raw body.
    ///
    /// Bodies that are not valid UTF-8 are kept base64 encoded and the record is
    /// marked `_mode: binary`, the same convention proxied responses use.
    pub fn http_bytes(
        request_from: impl Into<String>,
        method: impl Into<String>,
        path: impl Into<String>,
        query: Map<String, Value>,
        headers: Map<String, Value>,
        body: &[u8],
    ) -> Self {
        match std::str::from_utf8(body) {
            Ok(text) => Self::http(request_from, method, path, query, headers, text),
            Err(_) => {
                let encoded = base64::engine::general_purpose::STANDARD.encode(body);
                let mut request = Self::http(request_from, method, path, query, headers, encoded);
                request.extra.remove("form");
                request
                    .extra
                    .insert("_mode".to_string(), Value::String("binary".to_string()));
                request
            }
        }
    }

    /// Build a TCP request record.
    pub fn tcp(request_from: impl Into<String>, data: impl Into<String>) -> Self {
        Self {
            request_from: request_from.into(),
            data: Some(data.into()),
            ..Default::default()
        }
    }

    /// JSON view used by predicates, behaviors and injected scripts.
    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or_else(|_| Value::Object(Map::new()))
    }

    /// Case-insensitive header lookup. Multi-valued headers return the first value.
    pub fn header(&self, name: &str) -> Option<&str> {
        let headers = self.headers.as_ref()?;
        let value = headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v)?;
        match value {
            Value::String(s) => Some(s.as_str()),
            Value::Array(items) => items.first().and_then(Value::as_str),
            _ => None,
        }
    }

    pub fn is_binary(&self) -> bool {
        self.extra.get("_mode").and_then(Value::as_str) == Some("binary")
    }

    /// Body as it arrived on the wire.
    pub fn body_bytes(&self) -> Bytes {
        let body = self.body.as_deref().unwrap_or_default();
        if self.is_binary() {
            if let Ok(decoded) = base64::engine::general_purpose::STANDARD.decode(body) {
                return Bytes::from(decoded);
            }
        }
        Bytes::copy_from_slice(body.as_bytes())
    }

    /// Query string in wire form, without the leading `?`.
    pub fn query_string(&self) -> String {
        self.query.as_ref().map(encode_query).unwrap_or_default()
    }
}

/// Parse a query string, URL-decoding keys and values.
///
/// Repeated keys collect their values into an array, as Mountebank does.
pub fn parse_query_string(query: &str) -> Map<String, Value> {
    let mut params = Map::new();
    for pair in query.split('&').filter(|s| !s.is_empty()) {
        let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
        let key = decode_component(key);
        let value = Value::String(decode_component(value));
        match params.get_mut(&key) {
            Some(Value::Array(values)) => values.push(value),
            Some(existing) => {
                let first = existing.take();
                *existing = Value::Array(vec![first, value]);
            }
            None => {
                params.insert(key, value);
            }
        }
    }
    params
}

fn decode_component(raw: &str) -> String {
    let spaced = raw.replace('+', " ");
    urlencoding::decode(&spaced)
        .map(|s| s.into_owned())
        .unwrap_or(spaced)
}

/// Inverse of [`parse_query_string`].
pub fn encode_query(query: &Map<String, Value>) -> String {
    let mut pairs = Vec::new();
    for (key, value) in query {
        let values: Vec<&Value> = match value {
            Value::Array(items) => items.iter().collect(),
            other => vec![other],
        };
        for value in values {
            let text = match value {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            pairs.push(format!(
                "{}={}",
                urlencoding::encode(key),
                urlencoding::encode(&text)
            ));
        }
    }
    pairs.join("&")
}
