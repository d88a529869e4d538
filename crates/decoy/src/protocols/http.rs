//! HTTP listener.

use crate::config::Protocol;
use crate::imposter::Imposter;
use crate::request::{parse_query_string, Request};
use crate::response::Response;
use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::header::{HeaderName, HeaderValue, CONTENT_TYPE};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::StatusCode;
use hyper_util::rt::TokioIo;
use serde_json::{Map, Value};
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpStream;
use tracing::{debug, warn};

pub(super) async fn serve_connection(
    stream: TcpStream,
    addr: SocketAddr,
    imposter: Arc<Imposter>,
) -> anyhow::Result<()> {
    let io = TokioIo::new(stream);
    let service = service_fn(move |req| {
        let imposter = Arc::clone(&imposter);
        async move { handle_request(req, imposter, addr).await }
    });
    http1::Builder::new().serve_connection(io, service).await?;
    Ok(())
}

/// Handle a request to an imposter
pub async fn handle_request(
    req: hyper::Request<Incoming>,
    imposter: Arc<Imposter>,
    client_addr: SocketAddr,
) -> Result<hyper::Response<Full<Bytes>>, Infallible> {
    let (parts, body) = req.into_parts();
    let body = match body.collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(e) => {
            debug!("Failed to read request body: {}", e);
            Bytes::new()
        }
    };

    let request = Request::http_bytes(
        client_addr.to_string(),
        parts.method.as_str(),
        parts.uri.path(),
        parse_query_string(parts.uri.query().unwrap_or("")),
        header_map(&parts.headers),
        &body,
    );

    let response = match imposter.handle(request).await {
        Ok(response) => response,
        Err(e) => {
            warn!("Request to imposter {} failed: {}", imposter.port(), e);
            let mut response = Response::from_error(Protocol::Http, &e);
            response.insert("statusCode", Value::from(500));
            response
        }
    };
    Ok(build_response(&response))
}

/// Request headers; repeated names collect their values into an array.
fn header_map(headers: &hyper::HeaderMap) -> Map<String, Value> {
    let mut map = Map::new();
    for (name, value) in headers {
        let value = Value::String(String::from_utf8_lossy(value.as_bytes()).into_owned());
        match map.get_mut(name.as_str()) {
            Some(Value::Array(values)) => values.push(value),
            Some(existing) => {
                let first = existing.take();
                *existing = Value::Array(vec![first, value]);
            }
            None => {
                map.insert(name.as_str().to_string(), value);
            }
        }
    }
    map
}

/// Wire response; `content-length` is always recomputed from the body.
fn build_response(response: &Response) -> hyper::Response<Full<Bytes>> {
    let status = StatusCode::from_u16(response.status_code()).unwrap_or(StatusCode::OK);
    let mut builder = hyper::Response::builder().status(status);

    let mut has_content_type = false;
    if let Some(headers) = builder.headers_mut() {
        for (name, value) in response.headers() {
            if name.eq_ignore_ascii_case("content-length")
                || name.eq_ignore_ascii_case("transfer-encoding")
            {
                continue;
            }
            match (
                HeaderName::from_bytes(name.as_bytes()),
                HeaderValue::from_str(&value),
            ) {
                (Ok(name), Ok(value)) => {
                    has_content_type |= name == CONTENT_TYPE;
                    headers.append(name, value);
                }
                _ => warn!("Skipping invalid response header {:?}", name),
            }
        }
        if !has_content_type && matches!(response.get("body"), Some(Value::Object(_) | Value::Array(_))) {
            headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        }
    }

    builder
        .body(Full::new(Bytes::from(response.body_bytes())))
        .unwrap_or_else(|e| {
            warn!("Failed to build response: {}", e);
            let mut fallback = hyper::Response::new(Full::new(Bytes::new()));
            *fallback.status_mut() = StatusCode::INTERNAL_SERVER_ERROR;
            fallback
        })
}
