//! End-to-end scenarios over real sockets.
//!
//! Each test starts imposters on OS-assigned ports through the registry and
//! talks to them with ordinary clients.

use assert_json_diff::assert_json_include;
use base64::Engine as _;
use decoy::config::{ImposterConfig, Mode, Protocol};
use decoy::{Imposter, ImposterManager};
use reqwest::Client;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

fn manager() -> ImposterManager {
    ImposterManager::new("127.0.0.1", false)
}

fn client() -> Client {
    Client::builder()
        .no_proxy()
        .timeout(Duration::from_secs(10))
        .build()
        .unwrap()
}

fn http_config(stubs: Value) -> ImposterConfig {
    serde_json::from_value(json!({"protocol": "http", "stubs": stubs})).unwrap()
}

fn url(imposter: &Imposter, path: &str) -> String {
    format!("http://127.0.0.1:{}{}", imposter.port(), path)
}

async fn tcp_exchange(port: u16, payload: &[u8]) -> Vec<u8> {
    let mut stream = TcpStream::connect(("127.0.0.1", port)).await.unwrap();
    stream.write_all(payload).await.unwrap();
    let mut reply = vec![0u8; 1024];
    let n = tokio::time::timeout(Duration::from_secs(5), stream.read(&mut reply))
        .await
        .unwrap()
        .unwrap();
    reply.truncate(n);
    reply
}

#[tokio::test]
async fn tcp_client_server_scenario() {
    let manager = manager();
    let config: ImposterConfig = serde_json::from_value(json!({
        "protocol": "tcp",
        "stubs": [{
            "predicates": [{"equals": {"data": "client"}}],
            "responses": [{"is": {"data": "server"}}]
        }]
    }))
    .unwrap();
    let imposter = manager.create_imposter(config).await.unwrap();

    assert_eq!(tcp_exchange(imposter.port(), b"client").await, b"server");
    manager.delete_all().await;
}

#[tokio::test]
async fn tcp_binary_mode_round_trip() {
    let manager = manager();
    let mut config = ImposterConfig::new(Protocol::Tcp).with_stub(json!({
        "predicates": [{"equals": {"data": "AQID"}}],
        "responses": [{"is": {"data": "BAUG"}}]
    }));
    config.mode = Mode::Binary;
    let imposter = manager.create_imposter(config).await.unwrap();

    assert_eq!(tcp_exchange(imposter.port(), &[1, 2, 3]).await, vec![4u8, 5, 6]);
    manager.delete_all().await;
}

#[tokio::test]
async fn http_adapter_matches_query_headers_and_body() {
    let manager = manager();
    let imposter = manager
        .create_imposter(http_config(json!([{
            "predicates": [
                {"equals": {"method": "POST", "path": "/orders", "query": {"express": "true"}}},
                {"equals": {"headers": {"X-Tenant": "acme"}}},
                {"equals": {"body": {"item": "book"}}}
            ],
            "responses": [{"is": {
                "statusCode": 201,
                "headers": {"Location": "/orders/1"},
                "body": {"id": 1}
            }}]
        }])))
        .await
        .unwrap();

    let response = client()
        .post(url(&imposter, "/orders?express=true"))
        .header("x-tenant", "acme")
        .body(r#"{"item": "book"}"#)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 201);
    assert_eq!(response.headers()["location"], "/orders/1");
    assert_eq!(response.headers()["content-type"], "application/json");
    let body: Value = response.json().await.unwrap();
    assert_eq!(body, json!({"id": 1}));

    let miss = client().get(url(&imposter, "/orders")).send().await.unwrap();
    assert_eq!(miss.status(), 200);
    assert_eq!(miss.text().await.unwrap(), "");
    manager.delete_all().await;
}

#[tokio::test]
async fn repeat_scenario() {
    let manager = manager();
    let imposter = manager
        .create_imposter(http_config(json!([{
            "responses": [
                {"is": {"body": "first"}, "_behaviors": {"repeat": 2}},
                {"is": {"body": "second"}}
            ]
        }])))
        .await
        .unwrap();

    let client = client();
    let mut bodies = Vec::new();
    for _ in 0..5 {
        let response = client.get(url(&imposter, "/")).send().await.unwrap();
        bodies.push(response.text().await.unwrap());
    }
    assert_eq!(bodies, ["first", "first", "second", "second", "first"]);
    manager.delete_all().await;
}

#[tokio::test]
async fn copy_regex_into_status_code() {
    let manager = manager();
    let imposter = manager
        .create_imposter(http_config(json!([{
            "responses": [{
                "is": {"statusCode": "${code}", "body": "status ${code}"},
                "_behaviors": {"copy": {
                    "from": "path",
                    "into": "${code}",
                    "using": {"method": "regex", "selector": "\\d+$"}
                }}
            }]
        }])))
        .await
        .unwrap();

    let response = client().get(url(&imposter, "/status/400")).send().await.unwrap();
    assert_eq!(response.status(), 400);
    assert_eq!(response.text().await.unwrap(), "status 400");
    manager.delete_all().await;
}

#[tokio::test]
async fn proxy_once_replays_without_second_call() {
    let manager = manager();
    let mut origin_config = http_config(json!([{"responses": [{"is": {
        "statusCode": 200,
        "headers": {"X-Origin": "yes"},
        "body": "from origin"
    }}]}]));
    origin_config.record_requests = true;
    let origin = manager.create_imposter(origin_config).await.unwrap();

    let proxy = manager
        .create_imposter(http_config(json!([{
            "responses": [{"proxy": {
                "to": format!("http://127.0.0.1:{}", origin.port()),
                "predicateGenerators": [{"matches": {"path": true}}]
            }}]
        }])))
        .await
        .unwrap();

    let client = client();
    for _ in 0..2 {
        let response = client.get(url(&proxy, "/cached")).send().await.unwrap();
        assert_eq!(response.headers()["x-origin"], "yes");
        assert_eq!(response.text().await.unwrap(), "from origin");
    }
    assert_eq!(origin.number_of_requests(), 1);

    let rendered = proxy.to_json();
    assert_eq!(rendered["stubs"].as_array().unwrap().len(), 2);
    assert_json_include!(
        actual: rendered["stubs"][0].clone(),
        expected: json!({
            "predicates": [{"deepEquals": {"path": "/cached"}}],
            "responses": [{"is": {"statusCode": 200, "body": "from origin"}}]
        })
    );
    manager.delete_all().await;
}

#[tokio::test]
async fn proxy_always_accumulates_responses_on_one_stub() {
    let manager = manager();
    let origin = manager
        .create_imposter(http_config(json!([{"responses": [
            {"is": {"body": "one"}},
            {"is": {"body": "two"}}
        ]}])))
        .await
        .unwrap();

    let proxy = manager
        .create_imposter(http_config(json!([{
            "responses": [{"proxy": {
                "to": format!("http://127.0.0.1:{}", origin.port()),
                "mode": "proxyAlways",
                "predicateGenerators": [{"matches": {"path": true}}]
            }}]
        }])))
        .await
        .unwrap();

    let client = client();
    let mut bodies = Vec::new();
    for _ in 0..2 {
        let response = client.get(url(&proxy, "/same")).send().await.unwrap();
        bodies.push(response.text().await.unwrap());
    }
    assert_eq!(bodies, ["one", "two"]);
    assert_eq!(origin.number_of_requests(), 2);

    let stubs = proxy.to_json()["stubs"].clone();
    assert_eq!(stubs.as_array().unwrap().len(), 2);
    assert!(stubs[0]["responses"][0].get("proxy").is_some());
    assert_json_include!(
        actual: stubs[1].clone(),
        expected: json!({
            "predicates": [{"deepEquals": {"path": "/same"}}],
            "responses": [{"is": {"body": "one"}}, {"is": {"body": "two"}}]
        })
    );
    manager.delete_all().await;
}

#[tokio::test]
async fn proxy_injects_headers_and_keeps_binary_bodies() {
    let manager = manager();
    let mut origin_config = http_config(json!([]));
    origin_config.record_requests = true;
    let origin = manager.create_imposter(origin_config).await.unwrap();

    let proxy = manager
        .create_imposter(http_config(json!([{
            "responses": [{"proxy": {
                "to": format!("http://127.0.0.1:{}", origin.port()),
                "mode": "proxyTransparent",
                "injectHeaders": {"X-Env": "test"}
            }}]
        }])))
        .await
        .unwrap();

    let payload = vec![0xffu8, 0xd8, 0x00, 0x10, 0xfe];
    client()
        .post(url(&proxy, "/upload"))
        .header("x-env", "prod")
        .body(payload.clone())
        .send()
        .await
        .unwrap();

    let requests = origin.requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0]["headers"]["x-env"], "test");
    assert_eq!(requests[0]["_mode"], "binary");
    assert_eq!(
        requests[0]["body"],
        base64::engine::general_purpose::STANDARD.encode(&payload)
    );
    manager.delete_all().await;
}

#[tokio::test]
async fn port_bound_elsewhere_leaves_registry_empty() {
    let taken = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let port = taken.local_addr().unwrap().port();

    let manager = manager();
    let err = manager
        .create_imposter(ImposterConfig::new(Protocol::Http).with_port(port))
        .await
        .unwrap_err();
    assert!(matches!(err, decoy::ImposterError::PortInUse(p) if p == port));
    assert_eq!(manager.count(), 0);
    assert!(manager.get_imposter(port).is_err());
    drop(taken);
}

#[tokio::test]
async fn unreachable_proxy_returns_error_envelope() {
    let closed = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let closed_port = closed.local_addr().unwrap().port();
    drop(closed);

    let manager = manager();
    let imposter = manager
        .create_imposter(http_config(json!([{
            "responses": [{"proxy": {"to": format!("http://127.0.0.1:{closed_port}")}}]
        }])))
        .await
        .unwrap();

    let response = client().get(url(&imposter, "/")).send().await.unwrap();
    assert_eq!(response.status(), 500);
    let body: Value = response.json().await.unwrap();
    assert_json_include!(
        actual: body,
        expected: json!({"errors": [{
            "code": "invalid proxy",
            "message": format!("Unable to connect to \"http://127.0.0.1:{closed_port}\"")
        }]})
    );
    assert_eq!(imposter.repository().len(), 1);
    manager.delete_all().await;
}

#[tokio::test]
async fn default_response_and_recorded_requests() {
    let manager = manager();
    let config: ImposterConfig = serde_json::from_value(json!({
        "protocol": "http",
        "recordRequests": true,
        "defaultResponse": {"statusCode": 404, "body": "nothing here"}
    }))
    .unwrap();
    let imposter: Arc<Imposter> = manager.create_imposter(config).await.unwrap();

    let response = client()
        .get(url(&imposter, "/missing?a=1&a=2"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 404);
    assert_eq!(response.text().await.unwrap(), "nothing here");

    let requests = imposter.requests();
    assert_eq!(requests.len(), 1);
    assert_json_include!(
        actual: requests[0].clone(),
        expected: json!({"method": "GET", "path": "/missing", "query": {"a": ["1", "2"]}})
    );
    manager.delete_all().await;
}

#[tokio::test]
async fn deleted_imposter_stops_listening() {
    let manager = manager();
    let imposter = manager
        .create_imposter(ImposterConfig::new(Protocol::Tcp))
        .await
        .unwrap();
    let port = imposter.port();
    manager.delete_imposter(port).await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;

    // The port can be taken again once the listener is gone.
    let again = manager
        .create_imposter(ImposterConfig::new(Protocol::Tcp).with_port(port))
        .await
        .unwrap();
    assert_eq!(again.port(), port);
    manager.delete_all().await;
}
