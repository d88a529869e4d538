//! Validation of stub definitions by resolving them once, without side effects.
//!
//! Each response is resolved against a synthetic request in dry-run mode:
//! proxies are not called, `wait` does not sleep, shell commands do not run
//! and inject predicates evaluate true. Anything that still fails is reported.

use crate::config::{Mode, Protocol};
use crate::error::{DecoyError, ErrorDetail, Result};
use crate::predicate::ParseOptions;
use crate::proxy::NoOpProxy;
use crate::request::Request;
use crate::stubs::{RepositoryOptions, ResponseKind, Stub, StubRepository};
use serde_json::{json, Map, Value};
use std::sync::Arc;
use tracing::debug;

/// What the stubs will run under.
#[derive(Debug, Clone, Default)]
pub struct DryRunOptions {
    pub protocol: Protocol,
    pub mode: Mode,
    pub allow_injection: bool,
    pub default_response: Option<Map<String, Value>>,
}

impl DryRunOptions {
    fn parse_options(&self) -> ParseOptions {
        ParseOptions {
            mode: self.mode,
            allow_injection: self.allow_injection,
        }
    }

    fn repository_options(&self) -> RepositoryOptions {
        RepositoryOptions {
            protocol: self.protocol,
            mode: self.mode,
            default_response: self.default_response.clone(),
            dry_run: true,
            allow_injection: self.allow_injection,
            ..Default::default()
        }
    }
}

/// Request every dry run resolves.
pub fn test_request(protocol: Protocol) -> Request {
    match protocol {
        Protocol::Http | Protocol::Https => {
            Request::http("", "GET", "/", Map::new(), Map::new(), "")
        }
        Protocol::Tcp => Request::tcp("", ""),
        Protocol::Smtp => {
            let mut request = Request::default();
            for field in ["from", "subject", "text"] {
                request.extra.insert(field.to_string(), json!(""));
            }
            request.extra.insert("to".to_string(), json!([]));
            request
        }
    }
}

/// Validate stub definitions, returning every distinct error found.
pub async fn validate(stubs: &[Value], options: &DryRunOptions) -> Vec<ErrorDetail> {
    let mut errors = Vec::new();
    let parse_options = options.parse_options();

    for definition in stubs {
        match Stub::parse(definition, &parse_options) {
            Ok(stub) => {
                if let Err(e) = check_proxy_support(&stub, options.protocol) {
                    push_unique(&mut errors, &e);
                }
            }
            Err(e) => push_unique(&mut errors, &e),
        }
    }
    if !errors.is_empty() {
        return errors;
    }

    let request = test_request(options.protocol);
    for definition in stubs {
        for response in responses_of(definition) {
            let predicates = definition
                .get("predicates")
                .cloned()
                .unwrap_or_else(|| json!([]));
            let candidates = [
                json!({ "predicates": predicates, "responses": [response.clone()] }),
                json!({ "responses": [response] }),
            ];
            for candidate in candidates {
                if let Err(e) = resolve_once(candidate, options, &request).await {
                    debug!("dry run failed: {e}");
                    push_unique(&mut errors, &e);
                }
            }
        }
    }
    errors
}

fn responses_of(definition: &Value) -> Vec<Value> {
    match definition.get("responses").and_then(Value::as_array) {
        Some(responses) if !responses.is_empty() => responses.clone(),
        _ => vec![json!({})],
    }
}

fn check_proxy_support(stub: &Stub, protocol: Protocol) -> Result<()> {
    if protocol != Protocol::Smtp {
        return Ok(());
    }
    let proxied = stub
        .responses()
        .iter()
        .any(|r| matches!(r.kind, ResponseKind::Proxy(_)));
    if proxied {
        return Err(DecoyError::operation(
            "proxy responses are not supported for smtp imposters",
        ));
    }
    Ok(())
}

async fn resolve_once(definition: Value, options: &DryRunOptions, request: &Request) -> Result<()> {
    let repository = StubRepository::from_definitions(
        &[definition],
        options.repository_options(),
        Arc::new(NoOpProxy),
    )?;
    repository.resolve(request).await.map(|_| ())
}

fn push_unique(errors: &mut Vec<ErrorDetail>, error: &DecoyError) {
    let detail = ErrorDetail::from(error);
    if !errors.contains(&detail) {
        errors.push(detail);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn http() -> DryRunOptions {
        DryRunOptions::default()
    }

    fn codes(errors: &[ErrorDetail]) -> Vec<&str> {
        errors.iter().map(|e| e.code.as_str()).collect()
    }

    #[tokio::test]
    async fn test_valid_stubs_pass() {
        let stubs = [
            json!({"predicates": [{"equals": {"path": "/"}}], "responses": [{"is": {"body": "ok"}}]}),
            json!({"responses": [{"proxy": {"to": "http://localhost:1"}}]}),
            json!({}),
        ];
        assert!(validate(&stubs, &http()).await.is_empty());
    }

    #[tokio::test]
    async fn test_parse_errors_reported_once() {
        let bad = json!({"predicates": [{"unknown": {"path": "/"}}]});
        let errors = validate(&[bad.clone(), bad], &http()).await;
        assert_eq!(codes(&errors), vec!["bad data"]);
    }

    #[tokio::test]
    async fn test_injection_disallowed() {
        let stubs = [json!({"responses": [{"inject": "function () { return {}; }"}]})];
        let errors = validate(&stubs, &http()).await;
        assert_eq!(codes(&errors), vec!["invalid injection"]);
    }

    #[tokio::test]
    async fn test_binary_mode_rejects_matches() {
        let options = DryRunOptions {
            protocol: Protocol::Tcp,
            mode: Mode::Binary,
            ..Default::default()
        };
        let stubs = [json!({"predicates": [{"matches": {"data": "AQ=="}}]})];
        assert_eq!(codes(&validate(&stubs, &options).await), vec!["bad data"]);
    }

    #[tokio::test]
    async fn test_side_effects_skipped() {
        let options = DryRunOptions {
            allow_injection: true,
            ..Default::default()
        };
        let stubs = [json!({"responses": [{
            "is": {"body": "x"},
            "_behaviors": {"wait": 600000, "shellTransform": "exit 1"}
        }]})];
        let errors = tokio::time::timeout(Duration::from_secs(5), validate(&stubs, &options))
            .await
            .unwrap();
        assert!(errors.is_empty());
    }

    #[tokio::test]
    async fn test_smtp_proxy_unsupported() {
        let options = DryRunOptions {
            protocol: Protocol::Smtp,
            ..Default::default()
        };
        let stubs = [json!({"responses": [{"proxy": {"to": "smtp://x:25"}}]})];
        assert_eq!(codes(&validate(&stubs, &options).await), vec!["invalid operation"]);
    }

    #[cfg(feature = "javascript")]
    #[tokio::test]
    async fn test_failing_inject_response_reported() {
        let options = DryRunOptions {
            allow_injection: true,
            ..Default::default()
        };
        let stubs = [json!({"responses": [{"inject": "function () { throw new Error('boom'); }"}]})];
        assert_eq!(codes(&validate(&stubs, &options).await), vec!["invalid injection"]);
    }

    #[cfg(feature = "javascript")]
    #[tokio::test]
    async fn test_inject_predicates_not_run() {
        let options = DryRunOptions {
            allow_injection: true,
            ..Default::default()
        };
        let stubs = [json!({
            "predicates": [{"inject": "function () { throw new Error('not in dry run'); }"}],
            "responses": [{"is": {}}]
        })];
        assert!(validate(&stubs, &options).await.is_empty());
    }

    #[test]
    fn test_request_shapes() {
        let http = test_request(Protocol::Http).to_value();
        assert_eq!(http["method"], "GET");
        assert_eq!(http["path"], "/");
        assert_eq!(http["body"], "");
        assert_eq!(test_request(Protocol::Tcp).to_value(), json!({"requestFrom": "", "data": ""}));
    }
}
