//! Imposter configuration (Mountebank-compatible JSON shape).

use super::protocol::{Mode, Protocol};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Configuration for creating an imposter
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ImposterConfig {
    #[serde(default)]
    pub protocol: Protocol,
    /// Port for the imposter. When absent an ephemeral port is assigned.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    /// Bind address, defaults to the server host.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default)]
    pub mode: Mode,
    #[serde(default)]
    pub record_requests: bool,
    /// Debug mode records matches with the response config and timing.
    #[serde(default)]
    pub debug: bool,
    /// Raw stub definitions, parsed by the stub repository.
    #[serde(default)]
    pub stubs: Vec<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_response: Option<Map<String, Value>>,
}

impl ImposterConfig {
    pub fn new(protocol: Protocol) -> Self {
        Self {
            protocol,
            ..Default::default()
        }
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    pub fn with_stub(mut self, stub: Value) -> Self {
        self.stubs.push(stub);
        self
    }

    /// Whether matched requests are kept on their stubs.
    pub fn records_matches(&self) -> bool {
        self.record_requests || self.debug
    }
}
