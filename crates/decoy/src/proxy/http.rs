//! HTTP proxy client.

use super::headers::{is_hop_by_hop, is_recomputed};
use super::{elapsed_ms, ProxyClient, ProxyConfig};
use crate::error::{DecoyError, Result};
use crate::request::Request;
use crate::response::{value_to_text, Response};
use async_trait::async_trait;
use base64::Engine as _;
use once_cell::sync::OnceCell;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use serde_json::{Map, Value};
use std::time::Instant;
use tracing::{debug, warn};

/// Forwards HTTP requests with reqwest.
///
/// Certificates are not verified and redirects are returned as-is, so the
/// recorded response is exactly what the backend sent.
#[derive(Debug, Default)]
pub struct HttpProxy {
    client: OnceCell<reqwest::Client>,
}

impl HttpProxy {
    pub fn new() -> Self {
        Self::default()
    }

    fn client(&self) -> Result<&reqwest::Client> {
        self.client.get_or_try_init(|| {
            reqwest::Client::builder()
                .danger_accept_invalid_certs(true)
                .redirect(reqwest::redirect::Policy::none())
                .build()
                .map_err(|e| DecoyError::proxy(format!("Unable to create HTTP client: {e}")))
        })
    }
}

fn unable_to_connect(target: &str) -> DecoyError {
    DecoyError::Proxy {
        message: format!("Unable to connect to {target:?}"),
        origin: Some(target.to_string()),
    }
}

fn header_values(value: &Value) -> Vec<HeaderValue> {
    let values = match value {
        Value::Array(items) => items.iter().collect(),
        other => vec![other],
    };
    values
        .into_iter()
        .filter_map(|v| HeaderValue::from_str(&value_to_text(v)).ok())
        .collect()
}

/// Request headers to forward, with `injectHeaders` replacing any header of
/// the same name.
fn outgoing_headers(request: &Request, inject: &Map<String, Value>) -> HeaderMap {
    let mut headers = HeaderMap::new();
    for (name, value) in request.headers.iter().flatten() {
        if is_recomputed(name) {
            continue;
        }
        let Ok(name) = HeaderName::from_bytes(name.as_bytes()) else {
            warn!("not forwarding invalid header name {name:?}");
            continue;
        };
        for value in header_values(value) {
            headers.append(&name, value);
        }
    }
    for (name, value) in inject {
        let Ok(name) = HeaderName::from_bytes(name.as_bytes()) else {
            warn!("ignoring invalid injected header name {name:?}");
            continue;
        };
        let mut values = header_values(value).into_iter();
        if let Some(first) = values.next() {
            headers.insert(&name, first);
        }
        for value in values {
            headers.append(&name, value);
        }
    }
    headers
}

#[async_trait]
impl ProxyClient for HttpProxy {
    async fn to(&self, target: &str, request: &Request, config: &ProxyConfig) -> Result<Response> {
        let url = reqwest::Url::parse(target)
            .ok()
            .filter(|url| url.host_str().is_some())
            .ok_or_else(|| DecoyError::proxy(format!("Unable to parse {target:?} as a url")))?;

        let host = url.host_str().unwrap_or_default().to_string();
        let port = url.port_or_known_default().unwrap_or(80);
        let resolved = tokio::net::lookup_host((host.as_str(), port))
            .await
            .map(|mut addrs| addrs.next().is_some())
            .unwrap_or(false);
        if !resolved {
            return Err(DecoyError::Proxy {
                message: format!("Cannot resolve {target:?}"),
                origin: Some(target.to_string()),
            });
        }

        let path = request.path.as_deref().unwrap_or("/");
        let query = request.query_string();
        let mut destination = format!("{}{}", target.trim_end_matches('/'), path);
        if !query.is_empty() {
            destination.push('?');
            destination.push_str(&query);
        }

        let method = request.method.as_deref().unwrap_or("GET");
        let method = reqwest::Method::from_bytes(method.as_bytes()).unwrap_or(reqwest::Method::GET);
        debug!("proxy {method} {destination}");

        let mut builder = self
            .client()?
            .request(method, &destination)
            .headers(outgoing_headers(request, &config.inject_headers));
        let body = request.body_bytes();
        if !body.is_empty() {
            builder = builder.body(body);
        }

        let start = Instant::now();
        let upstream = builder.send().await.map_err(|e| {
            warn!("proxy to {target} failed: {e}");
            unable_to_connect(target)
        })?;

        let status = upstream.status().as_u16();
        let mut headers = Map::new();
        for (name, value) in upstream.headers() {
            if is_hop_by_hop(name.as_str()) {
                continue;
            }
            let value = Value::String(String::from_utf8_lossy(value.as_bytes()).into_owned());
            match headers.get_mut(name.as_str()) {
                Some(Value::Array(values)) => values.push(value),
                Some(existing) => {
                    let first = existing.take();
                    *existing = Value::Array(vec![first, value]);
                }
                None => {
                    headers.insert(name.as_str().to_string(), value);
                }
            }
        }
        let bytes = upstream.bytes().await.map_err(|e| {
            warn!("reading proxied body from {target} failed: {e}");
            unable_to_connect(target)
        })?;

        let mut response = Response::default();
        response.insert("statusCode", Value::from(status));
        response.insert("headers", Value::Object(headers));
        match String::from_utf8(bytes.to_vec()) {
            Ok(text) => response.insert("body", Value::String(text)),
            Err(_) => {
                let encoded = base64::engine::general_purpose::STANDARD.encode(&bytes);
                response.insert("body", Value::String(encoded));
                response.insert("_mode", Value::String("binary".to_string()));
            }
        }
        response.insert("_proxyResponseTime", Value::from(elapsed_ms(start)));
        Ok(response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;
    use tokio::sync::oneshot;

    /// Raw HTTP/1.1 request received by the backend.
    struct Captured {
        head: String,
        body: Vec<u8>,
    }

    impl Captured {
        fn header_lines(&self, name: &str) -> Vec<String> {
            let prefix = format!("{}:", name.to_ascii_lowercase());
            self.head
                .lines()
                .map(str::to_ascii_lowercase)
                .filter(|line| line.starts_with(&prefix))
                .collect()
        }
    }

    /// One-shot backend that records the request and answers `ok`.
    async fn capturing_backend() -> (String, oneshot::Receiver<Captured>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let target = format!("http://{}", listener.local_addr().unwrap());
        let (tx, rx) = oneshot::channel();
        tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let mut raw = Vec::new();
            let mut chunk = [0u8; 1024];
            let head_end = loop {
                let n = stream.read(&mut chunk).await.unwrap();
                assert!(n > 0, "connection closed before the request head");
                raw.extend_from_slice(&chunk[..n]);
                if let Some(pos) = raw.windows(4).position(|w| w == b"\r\n\r\n") {
                    break pos + 4;
                }
            };
            let head = String::from_utf8_lossy(&raw[..head_end]).into_owned();
            let length = head
                .lines()
                .find_map(|line| {
                    let (name, value) = line.split_once(':')?;
                    name.eq_ignore_ascii_case("content-length")
                        .then(|| value.trim().parse::<usize>().ok())
                        .flatten()
                })
                .unwrap_or(0);
            while raw.len() < head_end + length {
                let n = stream.read(&mut chunk).await.unwrap();
                assert!(n > 0, "connection closed before the request body");
                raw.extend_from_slice(&chunk[..n]);
            }
            let body = raw[head_end..head_end + length].to_vec();
            stream
                .write_all(b"HTTP/1.1 200 OK\r\ncontent-length: 2\r\nconnection: close\r\n\r\nok")
                .await
                .unwrap();
            let _ = tx.send(Captured { head, body });
        });
        (target, rx)
    }

    fn config() -> ProxyConfig {
        ProxyConfig::parse(&json!({"to": "http://localhost"}), false).unwrap()
    }

    fn get(path: &str) -> Request {
        Request::http("", "GET", path, Map::new(), Map::new(), "")
    }

    #[tokio::test]
    async fn test_unparseable_target() {
        let err = HttpProxy::new()
            .to("not a url", &get("/"), &config())
            .await
            .unwrap_err();
        assert_eq!(err.code(), "invalid proxy");
        assert_eq!(err.message(), r#"Unable to parse "not a url" as a url"#);
    }

    #[tokio::test]
    async fn test_unresolvable_host() {
        let err = HttpProxy::new()
            .to("http://decoy-does-not-exist.invalid", &get("/"), &config())
            .await
            .unwrap_err();
        assert_eq!(err.code(), "invalid proxy");
        assert!(err.message().starts_with("Cannot resolve"));
    }

    #[tokio::test]
    async fn test_connection_refused() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);
        let target = format!("http://127.0.0.1:{port}");
        let err = HttpProxy::new().to(&target, &get("/"), &config()).await.unwrap_err();
        assert_eq!(err.message(), format!("Unable to connect to {target:?}"));
        assert_eq!(err.http_status(), 500);
    }

    #[tokio::test]
    async fn test_inject_headers_override_request_headers() {
        let (target, captured) = capturing_backend().await;
        let mut headers = Map::new();
        headers.insert("X-Env".into(), json!("prod"));
        headers.insert("Accept".into(), json!("text/plain"));
        let request = Request::http("", "GET", "/", Map::new(), headers, "");
        let config = ProxyConfig::parse(
            &json!({"to": target, "injectHeaders": {"x-env": "test", "X-Extra": "1"}}),
            false,
        )
        .unwrap();

        let response = HttpProxy::new().to(&target, &request, &config).await.unwrap();
        assert_eq!(response.body_text(), "ok");

        let captured = captured.await.unwrap();
        assert_eq!(captured.header_lines("x-env"), vec!["x-env: test"]);
        assert_eq!(captured.header_lines("x-extra"), vec!["x-extra: 1"]);
        assert_eq!(captured.header_lines("accept"), vec!["accept: text/plain"]);
    }

    #[tokio::test]
    async fn test_binary_request_body_forwarded_intact() {
        let (target, captured) = capturing_backend().await;
        let raw = vec![0x89, b'P', b'N', b'G', 0x00, 0xff, 0xfe];
        let request = Request::http_bytes("", "POST", "/upload", Map::new(), Map::new(), &raw);

        HttpProxy::new()
            .to(&target, &request, &ProxyConfig::parse(&json!({"to": target}), false).unwrap())
            .await
            .unwrap();

        let captured = captured.await.unwrap();
        assert!(captured.head.starts_with("POST /upload "));
        assert_eq!(captured.body, raw);
    }
}
