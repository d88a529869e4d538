//! Protocol and encoding mode types.

use serde::{Deserialize, Serialize};

/// Protocol an imposter speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    #[default]
    Http,
    /// Accepted in configuration, rejected when an imposter is created.
    Https,
    Tcp,
    Smtp,
}

impl Protocol {
    /// Check if a listener exists for this protocol
    pub fn is_supported(&self) -> bool {
        matches!(self, Protocol::Http | Protocol::Tcp | Protocol::Smtp)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Protocol::Http => "http",
            Protocol::Https => "https",
            Protocol::Tcp => "tcp",
            Protocol::Smtp => "smtp",
        }
    }

    /// Whether requests and responses have the HTTP shape.
    pub fn is_http(&self) -> bool {
        matches!(self, Protocol::Http | Protocol::Https)
    }
}

impl std::fmt::Display for Protocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Payload encoding of an imposter.
///
/// In binary mode request payloads arrive base64 encoded and predicates
/// compare the decoded bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    #[default]
    Text,
    Binary,
}

impl Mode {
    pub fn is_binary(&self) -> bool {
        *self == Mode::Binary
    }
}
