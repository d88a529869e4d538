//! Error taxonomy shared by the engine and the API error envelope.
//!
//! Every failure the engine can report maps onto one of the Mountebank error
//! codes so that callers get the same `{ errors: [{ code, message }] }` shape
//! regardless of where the failure happened.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Engine error.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum DecoyError {
    /// A required field is absent from the configuration.
    #[error("{message}")]
    MissingField { message: String },

    /// Structurally invalid configuration (predicate, selector, behavior).
    #[error("{message}")]
    Validation {
        message: String,
        origin: Option<Value>,
    },

    /// Injected code is disallowed, threw, or produced an unusable value.
    #[error("{message}")]
    Injection {
        message: String,
        origin: Option<String>,
        data: Option<String>,
    },

    /// An `inject` predicate threw or returned a non-boolean.
    #[error("{message}")]
    PredicateInjection {
        message: String,
        origin: Option<String>,
        data: Option<String>,
    },

    /// Proxy target unreachable or malformed.
    #[error("{message}")]
    Proxy { message: String, origin: Option<String> },

    /// Valid configuration that the server refuses to run.
    #[error("{message}")]
    Operation { message: String },
}

impl DecoyError {
    pub fn missing_field(message: impl Into<String>) -> Self {
        DecoyError::MissingField {
            message: message.into(),
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        DecoyError::Validation {
            message: message.into(),
            origin: None,
        }
    }

    /// Validation error that remembers the offending configuration.
    pub fn validation_with_source(message: impl Into<String>, source: &Value) -> Self {
        DecoyError::Validation {
            message: message.into(),
            origin: Some(source.clone()),
        }
    }

    pub fn injection(message: impl Into<String>) -> Self {
        DecoyError::Injection {
            message: message.into(),
            origin: None,
            data: None,
        }
    }

    /// Injection failure carrying the script source and the engine's error text.
    pub fn injection_failed(
        message: impl Into<String>,
        source: impl Into<String>,
        data: impl Into<String>,
    ) -> Self {
        DecoyError::Injection {
            message: message.into(),
            origin: Some(source.into()),
            data: Some(data.into()),
        }
    }

    pub fn predicate_injection(source: impl Into<String>, data: impl Into<String>) -> Self {
        DecoyError::PredicateInjection {
            message: "invalid predicate injection".to_string(),
            origin: Some(source.into()),
            data: Some(data.into()),
        }
    }

    pub fn proxy(message: impl Into<String>) -> Self {
        DecoyError::Proxy {
            message: message.into(),
            origin: None,
        }
    }

    pub fn operation(message: impl Into<String>) -> Self {
        DecoyError::Operation {
            message: message.into(),
        }
    }

    /// Mountebank error code for this error.
    pub fn code(&self) -> &'static str {
        match self {
            DecoyError::MissingField { .. } => "missing field",
            DecoyError::Validation { .. } => "bad data",
            DecoyError::Injection { .. } => "invalid injection",
            DecoyError::PredicateInjection { .. } => "invalid predicate injection",
            DecoyError::Proxy { .. } => "invalid proxy",
            DecoyError::Operation { .. } => "invalid operation",
        }
    }

    /// HTTP status used when the error is returned to an API caller.
    pub fn http_status(&self) -> u16 {
        match self {
            DecoyError::Proxy { .. } => 500,
            _ => 400,
        }
    }

    pub fn message(&self) -> String {
        self.to_string()
    }
}

/// Single entry of the error envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorDetail {
    pub code: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl From<&DecoyError> for ErrorDetail {
    fn from(error: &DecoyError) -> Self {
        let (source, data) = match error {
            DecoyError::Validation { origin, .. } => (origin.clone(), None),
            DecoyError::Injection { origin, data, .. }
            | DecoyError::PredicateInjection { origin, data, .. } => (
                origin.clone().map(Value::String),
                data.clone().map(Value::String),
            ),
            DecoyError::Proxy { origin, .. } => (origin.clone().map(Value::String), None),
            DecoyError::MissingField { .. } | DecoyError::Operation { .. } => (None, None),
        };
        ErrorDetail {
            code: error.code().to_string(),
            message: error.message(),
            source,
            data,
        }
    }
}

impl From<DecoyError> for ErrorDetail {
    fn from(error: DecoyError) -> Self {
        ErrorDetail::from(&error)
    }
}

/// `{ "errors": [...] }` body returned to API callers.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ErrorEnvelope {
    pub errors: Vec<ErrorDetail>,
}

impl ErrorEnvelope {
    pub fn new(errors: Vec<ErrorDetail>) -> Self {
        Self { errors }
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn to_json(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }

    /// Status for the whole envelope: 500 if any entry is a proxy failure.
    pub fn http_status(&self) -> u16 {
        if self.errors.iter().any(|e| e.code == "invalid proxy") {
            500
        } else {
            400
        }
    }
}

impl From<&DecoyError> for ErrorEnvelope {
    fn from(error: &DecoyError) -> Self {
        ErrorEnvelope::new(vec![ErrorDetail::from(error)])
    }
}

impl std::fmt::Display for ErrorEnvelope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let messages: Vec<String> = self
            .errors
            .iter()
            .map(|e| format!("{}: {}", e.code, e.message))
            .collect();
        write!(f, "{}", messages.join("; "))
    }
}

pub type Result<T, E = DecoyError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes() {
        assert_eq!(DecoyError::missing_field("x").code(), "missing field");
        assert_eq!(DecoyError::validation("x").code(), "bad data");
        assert_eq!(DecoyError::injection("x").code(), "invalid injection");
        assert_eq!(
            DecoyError::predicate_injection("fn", "boom").code(),
            "invalid predicate injection"
        );
        assert_eq!(DecoyError::proxy("x").code(), "invalid proxy");
        assert_eq!(DecoyError::operation("x").code(), "invalid operation");
    }

    #[test]
    fn test_predicate_injection_message() {
        let err = DecoyError::predicate_injection("function () { throw 1; }", "1");
        assert_eq!(err.to_string(), "invalid predicate injection");
    }

    #[test]
    fn test_envelope_serialization() {
        let err = DecoyError::proxy("Cannot resolve \"http://nowhere.invalid\"");
        let envelope = ErrorEnvelope::from(&err);
        assert_eq!(envelope.http_status(), 500);
        assert_eq!(
            envelope.to_json(),
            serde_json::json!({
                "errors": [{
                    "code": "invalid proxy",
                    "message": "Cannot resolve \"http://nowhere.invalid\""
                }]
            })
        );
    }

    #[test]
    fn test_validation_status() {
        let envelope = ErrorEnvelope::from(&DecoyError::validation("missing predicate"));
        assert_eq!(envelope.http_status(), 400);
        assert!(envelope.to_string().contains("bad data: missing predicate"));
    }
}
