//! Wait behavior - add latency before response.

use crate::error::{DecoyError, Result};
use crate::scripting;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;

/// Wait behavior - add latency before response
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(untagged)]
pub enum WaitBehavior {
    /// Fixed delay in milliseconds
    Fixed(u64),
    /// Random delay within range
    Range {
        #[serde(rename = "min")]
        min_ms: u64,
        #[serde(rename = "max")]
        max_ms: u64,
    },
    /// JavaScript function that returns delay
    Function(String),
}

impl WaitBehavior {
    pub fn requires_injection(&self) -> bool {
        matches!(self, WaitBehavior::Function(_))
    }

    pub fn validate(&self) -> Result<()> {
        match self {
            WaitBehavior::Range { min_ms, max_ms } if min_ms > max_ms => {
                Err(DecoyError::validation(
                    "wait behavior \"min\" must be less than or equal to \"max\"",
                ))
            }
            _ => Ok(()),
        }
    }

    /// Delay for this request. Function waits run on the blocking pool.
    pub async fn duration(&self, request: &Value) -> Result<Duration> {
        let ms = match self {
            WaitBehavior::Fixed(ms) => *ms,
            WaitBehavior::Range { min_ms, max_ms } => {
                use rand::Rng;
                rand::thread_rng().gen_range(*min_ms..=(*max_ms).max(*min_ms))
            }
            WaitBehavior::Function(source) => {
                let source = source.clone();
                let request = request.clone();
                tokio::task::spawn_blocking(move || scripting::wait_millis(&source, &request))
                    .await
                    .map_err(|e| {
                        DecoyError::injection_failed("invalid wait injection", "", e.to_string())
                    })??
            }
        };
        Ok(Duration::from_millis(ms))
    }

    /// Sleep for the configured delay without blocking other requests.
    pub async fn sleep(&self, request: &Value) -> Result<()> {
        let duration = self.duration(request).await?;
        if !duration.is_zero() {
            tracing::debug!("wait behavior sleeping {}ms", duration.as_millis());
            tokio::time::sleep(duration).await;
        }
        Ok(())
    }
}
