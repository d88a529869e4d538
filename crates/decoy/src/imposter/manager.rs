//! ImposterManager - lifecycle management for multiple imposters.
//!
//! Each imposter owns one listening port. Creation validates the stubs with a
//! dry run, binds, then registers, all under one async lock so two requests
//! for the same port cannot both get halfway.

use super::core::Imposter;
use super::types::ImposterError;
use crate::config::ImposterConfig;
use crate::dry_run::{self, DryRunOptions};
use crate::error::ErrorEnvelope;
use crate::protocols;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{info, warn};

/// Manages the lifecycle of multiple imposters
pub struct ImposterManager {
    /// Active imposters by port
    imposters: RwLock<HashMap<u16, Arc<Imposter>>>,
    create_lock: tokio::sync::Mutex<()>,
    allow_injection: bool,
    default_host: String,
}

impl ImposterManager {
    pub fn new(default_host: impl Into<String>, allow_injection: bool) -> Self {
        Self {
            imposters: RwLock::new(HashMap::new()),
            create_lock: tokio::sync::Mutex::new(()),
            allow_injection,
            default_host: default_host.into(),
        }
    }

    /// Validate, bind and start an imposter.
    ///
    /// Without a configured port the OS assigns one; the returned imposter's
    /// config carries the actual port.
    pub async fn create_imposter(
        &self,
        mut config: ImposterConfig,
    ) -> Result<Arc<Imposter>, ImposterError> {
        let _guard = self.create_lock.lock().await;

        if !config.protocol.is_supported() {
            return Err(ImposterError::InvalidProtocol(config.protocol.to_string()));
        }

        let options = DryRunOptions {
            protocol: config.protocol,
            mode: config.mode,
            allow_injection: self.allow_injection,
            default_response: config.default_response.clone(),
        };
        let errors = dry_run::validate(&config.stubs, &options).await;
        if !errors.is_empty() {
            return Err(ImposterError::InvalidConfig(ErrorEnvelope::new(errors)));
        }

        if let Some(port) = config.port {
            if self.imposters.read().contains_key(&port) {
                return Err(ImposterError::PortInUse(port));
            }
        }

        let host = config
            .host
            .clone()
            .unwrap_or_else(|| self.default_host.clone());
        let requested = config.port.unwrap_or(0);
        let listener = TcpListener::bind((host.as_str(), requested))
            .await
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::AddrInUse => ImposterError::PortInUse(requested),
                _ => ImposterError::BindError(requested, e.to_string()),
            })?;
        let port = listener
            .local_addr()
            .map_err(|e| ImposterError::BindError(requested, e.to_string()))?
            .port();
        config.port = Some(port);

        let imposter = Arc::new(Imposter::new(config, self.allow_injection)?);
        protocols::spawn(listener, Arc::clone(&imposter));
        self.imposters.write().insert(port, Arc::clone(&imposter));

        info!("{} imposter listening on {}:{}", imposter.protocol(), host, port);
        Ok(imposter)
    }

    /// Stop an imposter and return its rendering.
    pub async fn delete_imposter(&self, port: u16) -> Result<Arc<Imposter>, ImposterError> {
        let _guard = self.create_lock.lock().await;
        let imposter = self
            .imposters
            .write()
            .remove(&port)
            .ok_or(ImposterError::NotFound(port))?;
        imposter.shutdown();
        info!("Imposter on port {} deleted", port);
        Ok(imposter)
    }

    /// Get an imposter by port
    pub fn get_imposter(&self, port: u16) -> Result<Arc<Imposter>, ImposterError> {
        self.imposters
            .read()
            .get(&port)
            .cloned()
            .ok_or(ImposterError::NotFound(port))
    }

    /// All imposters ordered by port.
    pub fn list_imposters(&self) -> Vec<Arc<Imposter>> {
        let mut imposters: Vec<_> = self.imposters.read().values().cloned().collect();
        imposters.sort_by_key(|imposter| imposter.port());
        imposters
    }

    /// Delete all imposters
    pub async fn delete_all(&self) -> Vec<Arc<Imposter>> {
        let ports: Vec<u16> = self.imposters.read().keys().copied().collect();
        let mut deleted = Vec::new();
        for port in ports {
            match self.delete_imposter(port).await {
                Ok(imposter) => deleted.push(imposter),
                Err(e) => warn!("Failed to delete imposter {}: {}", port, e),
            }
        }
        deleted
    }

    pub fn count(&self) -> usize {
        self.imposters.read().len()
    }
}

impl Default for ImposterManager {
    fn default() -> Self {
        Self::new("127.0.0.1", false)
    }
}
