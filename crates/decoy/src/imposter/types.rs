//! Registry error type.

use crate::error::{DecoyError, ErrorEnvelope};
use thiserror::Error;

/// Errors from creating, finding or deleting imposters.
#[derive(Debug, Error)]
pub enum ImposterError {
    #[error("Port {0} is already in use")]
    PortInUse(u16),
    #[error("Imposter not found on port {0}")]
    NotFound(u16),
    #[error("Failed to bind port {0}: {1}")]
    BindError(u16, String),
    #[error("Invalid protocol: {0}")]
    InvalidProtocol(String),
    #[error("Invalid imposter configuration: {0}")]
    InvalidConfig(ErrorEnvelope),
}

impl ImposterError {
    /// Error envelope as an API caller would see it.
    pub fn envelope(&self) -> ErrorEnvelope {
        match self {
            ImposterError::InvalidConfig(envelope) => envelope.clone(),
            other => ErrorEnvelope::from(&DecoyError::operation(other.to_string())),
        }
    }
}

impl From<DecoyError> for ImposterError {
    fn from(error: DecoyError) -> Self {
        ImposterError::InvalidConfig(ErrorEnvelope::from(&error))
    }
}
