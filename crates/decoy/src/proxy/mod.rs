//! Proxy responses: forwarding to a real backend and recording what comes back.
//!
//! # Module Structure
//!
//! - `http` - reqwest-based HTTP client
//! - `tcp` - raw TCP client
//! - `generator` - predicate generation for recorded stubs
//! - `headers` - hop-by-hop header filtering

mod generator;
mod headers;
mod http;
mod tcp;

pub use generator::{predicates_for, PredicateGenerator};
pub use http::HttpProxy;
pub use tcp::TcpProxy;

use crate::config::{Mode, Protocol};
use crate::error::{DecoyError, Result};
use crate::request::Request;
use crate::response::Response;
use crate::scripting;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::Arc;

/// How proxied responses are recorded.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ProxyMode {
    /// Record the first response in a new stub placed before the proxy stub.
    #[default]
    ProxyOnce,
    /// Keep proxying; every response is recorded after the proxy stub.
    ProxyAlways,
    /// Proxy without recording anything.
    ProxyTransparent,
}

/// The `proxy` field of a response.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ProxyConfig {
    pub to: String,
    #[serde(default)]
    pub mode: ProxyMode,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub predicate_generators: Vec<PredicateGenerator>,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub inject_headers: Map<String, Value>,
    #[serde(default)]
    pub add_wait_behavior: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub add_decorate_behavior: Option<String>,
}

impl ProxyConfig {
    /// Parse and validate a proxy definition.
    pub fn parse(value: &Value, allow_injection: bool) -> Result<Self> {
        let Some(fields) = value.as_object() else {
            return Err(DecoyError::validation_with_source(
                "proxy must be an object",
                value,
            ));
        };
        if !fields.get("to").is_some_and(Value::is_string) {
            return Err(DecoyError::missing_field(
                "proxy response \"to\" field is required",
            ));
        }
        let config = Self::deserialize(value).map_err(|e| {
            DecoyError::validation_with_source(format!("malformed proxy: {e}"), value)
        })?;
        if !allow_injection {
            if let Some(decorate) = fields.get("addDecorateBehavior") {
                return Err(scripting::injection_disabled(decorate));
            }
        }
        for generator in &config.predicate_generators {
            generator.validate()?;
        }
        Ok(config)
    }
}

/// Client that forwards a request to a real backend.
#[async_trait]
pub trait ProxyClient: Send + Sync {
    /// Forward `request` to `target` and return the backend's response.
    async fn to(&self, target: &str, request: &Request, config: &ProxyConfig) -> Result<Response>;
}

/// Proxy used by dry runs: never touches the network.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoOpProxy;

#[async_trait]
impl ProxyClient for NoOpProxy {
    async fn to(&self, _target: &str, _request: &Request, _config: &ProxyConfig) -> Result<Response> {
        Ok(Response::default())
    }
}

/// Protocols without a proxy implementation.
#[derive(Debug, Clone, Copy)]
pub struct UnsupportedProxy(pub Protocol);

#[async_trait]
impl ProxyClient for UnsupportedProxy {
    async fn to(&self, _target: &str, _request: &Request, _config: &ProxyConfig) -> Result<Response> {
        Err(DecoyError::operation(format!(
            "proxy responses are not supported for {} imposters",
            self.0
        )))
    }
}

/// Proxy client for an imposter's protocol.
pub fn for_protocol(protocol: Protocol, mode: Mode) -> Arc<dyn ProxyClient> {
    match protocol {
        Protocol::Http | Protocol::Https => Arc::new(HttpProxy::new()),
        Protocol::Tcp => Arc::new(TcpProxy::with_mode(mode)),
        Protocol::Smtp => Arc::new(UnsupportedProxy(protocol)),
    }
}

/// Milliseconds elapsed since `start`, as stored in `_proxyResponseTime`.
pub(crate) fn elapsed_ms(start: std::time::Instant) -> u64 {
    u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX)
}
