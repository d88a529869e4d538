//! TCP proxy client.

use super::{elapsed_ms, ProxyClient, ProxyConfig};
use crate::config::Mode;
use crate::error::{DecoyError, Result};
use crate::protocols::tcp::read_message;
use crate::request::Request;
use crate::response::Response;
use async_trait::async_trait;
use base64::Engine as _;
use serde_json::Value;
use std::time::Instant;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;

/// Forwards TCP payloads to `tcp://host:port` targets.
#[derive(Debug, Default, Clone, Copy)]
pub struct TcpProxy {
    mode: Mode,
}

impl TcpProxy {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_mode(mode: Mode) -> Self {
        Self { mode }
    }

    fn payload(&self, request: &Request) -> Vec<u8> {
        let data = request.data.as_deref().unwrap_or_default();
        if self.mode.is_binary() {
            if let Ok(bytes) = base64::engine::general_purpose::STANDARD.decode(data) {
                return bytes;
            }
        }
        data.as_bytes().to_vec()
    }

    fn encode(&self, bytes: &[u8]) -> String {
        if self.mode.is_binary() {
            base64::engine::general_purpose::STANDARD.encode(bytes)
        } else {
            String::from_utf8_lossy(bytes).into_owned()
        }
    }
}

fn parse_target(target: &str) -> Option<(&str, u16)> {
    let rest = target.strip_prefix("tcp://")?;
    let rest = rest.trim_end_matches('/');
    let (host, port) = rest.rsplit_once(':')?;
    if host.is_empty() {
        return None;
    }
    Some((host, port.parse().ok()?))
}

#[async_trait]
impl ProxyClient for TcpProxy {
    async fn to(&self, target: &str, request: &Request, _config: &ProxyConfig) -> Result<Response> {
        let (host, port) = parse_target(target)
            .ok_or_else(|| DecoyError::proxy(format!("Unable to parse {target:?} as a url")))?;

        let addr = tokio::net::lookup_host((host, port))
            .await
            .ok()
            .and_then(|mut addrs| addrs.next())
            .ok_or_else(|| DecoyError::Proxy {
                message: format!("Cannot resolve {target:?}"),
                origin: Some(target.to_string()),
            })?;

        let unable_to_connect = |e: std::io::Error| {
            tracing::warn!("tcp proxy to {target} failed: {e}");
            DecoyError::Proxy {
                message: format!("Unable to connect to {target:?}"),
                origin: Some(target.to_string()),
            }
        };

        let start = Instant::now();
        let mut stream = TcpStream::connect(addr).await.map_err(unable_to_connect)?;
        stream
            .write_all(&self.payload(request))
            .await
            .map_err(unable_to_connect)?;
        let reply = read_message(&mut stream).await.map_err(unable_to_connect)?;

        let mut response = Response::default();
        response.insert("data", Value::String(self.encode(&reply)));
        response.insert("_proxyResponseTime", Value::from(elapsed_ms(start)));
        Ok(response)
    }
}
