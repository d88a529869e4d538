//! A single running imposter: its configuration, stubs and traffic.

use crate::config::{ImposterConfig, Mode, Protocol};
use crate::error::Result;
use crate::proxy::{self, ProxyClient};
use crate::request::Request;
use crate::response::Response;
use crate::stubs::{RepositoryOptions, StubRepository};
use parking_lot::Mutex;
use serde_json::{json, Map, Value};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::debug;

/// Runtime state of an imposter
pub struct Imposter {
    config: ImposterConfig,
    repository: StubRepository,
    /// Recorded requests (if record_requests is true)
    requests: Mutex<Vec<Value>>,
    request_count: AtomicU64,
    pub created_at: chrono::DateTime<chrono::Utc>,
    shutdown_tx: broadcast::Sender<()>,
}

impl std::fmt::Debug for Imposter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Imposter")
            .field("protocol", &self.config.protocol)
            .field("port", &self.config.port)
            .field("stubs", &self.repository.len())
            .field("requests", &self.number_of_requests())
            .finish()
    }
}

impl Imposter {
    /// Build an imposter whose proxy responses use the protocol's client.
    pub fn new(config: ImposterConfig, allow_injection: bool) -> Result<Self> {
        let proxy = proxy::for_protocol(config.protocol, config.mode);
        Self::with_proxy(config, allow_injection, proxy)
    }

    pub fn with_proxy(
        config: ImposterConfig,
        allow_injection: bool,
        proxy: Arc<dyn ProxyClient>,
    ) -> Result<Self> {
        let options = RepositoryOptions {
            protocol: config.protocol,
            mode: config.mode,
            default_response: config.default_response.clone(),
            record_matches: config.records_matches(),
            debug: config.debug,
            dry_run: false,
            allow_injection,
        };
        let repository = StubRepository::from_definitions(&config.stubs, options, proxy)?;
        let (shutdown_tx, _) = broadcast::channel(1);
        Ok(Self {
            config,
            repository,
            requests: Mutex::new(Vec::new()),
            request_count: AtomicU64::new(0),
            created_at: chrono::Utc::now(),
            shutdown_tx,
        })
    }

    pub fn config(&self) -> &ImposterConfig {
        &self.config
    }

    pub fn port(&self) -> u16 {
        self.config.port.unwrap_or_default()
    }

    pub fn protocol(&self) -> Protocol {
        self.config.protocol
    }

    pub fn mode(&self) -> Mode {
        self.config.mode
    }

    pub fn repository(&self) -> &StubRepository {
        &self.repository
    }

    /// Count, optionally record, then resolve a request.
    pub async fn handle(&self, request: Request) -> Result<Response> {
        self.request_count.fetch_add(1, Ordering::Relaxed);
        if self.config.record_requests {
            let mut recorded = request.to_value();
            if let Value::Object(fields) = &mut recorded {
                fields.insert(
                    "timestamp".to_string(),
                    Value::String(chrono::Utc::now().to_rfc3339()),
                );
            }
            self.requests.lock().push(recorded);
        }
        debug!(port = self.port(), "resolving {} request", self.protocol());
        self.repository.resolve(&request).await
    }

    pub fn number_of_requests(&self) -> u64 {
        self.request_count.load(Ordering::Relaxed)
    }

    pub fn requests(&self) -> Vec<Value> {
        self.requests.lock().clone()
    }

    /// Listener tasks stop when this fires.
    pub fn subscribe_shutdown(&self) -> broadcast::Receiver<()> {
        self.shutdown_tx.subscribe()
    }

    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
    }

    /// JSON rendering with hypermedia links.
    pub fn to_json(&self) -> Value {
        let port = self.port();
        let base = format!("/imposters/{port}");
        let stubs: Vec<Value> = self
            .repository
            .stubs()
            .into_iter()
            .enumerate()
            .map(|(index, mut stub)| {
                if let Value::Object(fields) = &mut stub {
                    fields.insert(
                        "_links".to_string(),
                        json!({ "self": { "href": format!("{base}/stubs/{index}") } }),
                    );
                }
                stub
            })
            .collect();

        let mut json = Map::new();
        json.insert("protocol".to_string(), json!(self.protocol()));
        json.insert("port".to_string(), json!(port));
        if let Some(name) = &self.config.name {
            json.insert("name".to_string(), json!(name));
        }
        if self.protocol() == Protocol::Tcp {
            json.insert("mode".to_string(), json!(self.mode()));
        }
        json.insert("numberOfRequests".to_string(), json!(self.number_of_requests()));
        json.insert("recordRequests".to_string(), json!(self.config.record_requests));
        json.insert("requests".to_string(), Value::Array(self.requests()));
        json.insert("stubs".to_string(), Value::Array(stubs));
        if let Some(default_response) = &self.config.default_response {
            json.insert(
                "defaultResponse".to_string(),
                Value::Object(default_response.clone()),
            );
        }
        json.insert(
            "_links".to_string(),
            json!({
                "self": { "href": base },
                "stubs": { "href": format!("{base}/stubs") }
            }),
        );
        Value::Object(json)
    }
}
