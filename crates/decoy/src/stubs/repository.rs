//! Ordered stub list and request resolution.

use super::types::{Match, ResponseConfig, ResponseKind, Stub};
use crate::behaviors::{self, BehaviorContext};
use crate::config::{Mode, Protocol};
use crate::error::{DecoyError, Result};
use crate::predicate::{all_match, EvalContext, ParseOptions};
use crate::proxy::{predicates_for, ProxyClient, ProxyConfig, ProxyMode};
use crate::request::Request;
use crate::response::Response;
use crate::scripting;
use parking_lot::RwLock;
use serde_json::{json, Map, Value};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Settings fixed for the lifetime of a repository.
#[derive(Debug, Clone, Default)]
pub struct RepositoryOptions {
    pub protocol: Protocol,
    pub mode: Mode,
    pub default_response: Option<Map<String, Value>>,
    /// Keep a [`Match`] on the stub for every resolved request.
    pub record_matches: bool,
    /// Matches also carry the response config and processing time.
    pub debug: bool,
    /// No sleeping, no shell commands, inject predicates are true.
    pub dry_run: bool,
    pub allow_injection: bool,
}

impl RepositoryOptions {
    pub fn parse_options(&self) -> ParseOptions {
        ParseOptions {
            mode: self.mode,
            allow_injection: self.allow_injection,
        }
    }
}

/// The stubs of one imposter, in match order.
pub struct StubRepository {
    stubs: RwLock<Vec<Arc<Stub>>>,
    options: RepositoryOptions,
    proxy: Arc<dyn ProxyClient>,
}

impl StubRepository {
    pub fn new(options: RepositoryOptions, proxy: Arc<dyn ProxyClient>) -> Self {
        Self {
            stubs: RwLock::new(Vec::new()),
            options,
            proxy,
        }
    }

    /// Parse every definition, failing on the first invalid stub.
    pub fn from_definitions(
        definitions: &[Value],
        options: RepositoryOptions,
        proxy: Arc<dyn ProxyClient>,
    ) -> Result<Self> {
        let parse_options = options.parse_options();
        let stubs = definitions
            .iter()
            .map(|definition| Stub::parse(definition, &parse_options).map(Arc::new))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            stubs: RwLock::new(stubs),
            options,
            proxy,
        })
    }

    pub fn options(&self) -> &RepositoryOptions {
        &self.options
    }

    /// Insert a stub before `before`, or append it.
    pub fn add_stub(&self, stub: Stub, before: Option<usize>) {
        let mut stubs = self.stubs.write();
        let index = before.unwrap_or(stubs.len()).min(stubs.len());
        stubs.insert(index, Arc::new(stub));
        debug!("added stub at index {index}");
    }

    pub fn len(&self) -> usize {
        self.stubs.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.stubs.read().is_empty()
    }

    /// Current stub definitions, including recorded responses and matches.
    pub fn stubs(&self) -> Vec<Value> {
        self.snapshot().iter().map(|stub| stub.to_json()).collect()
    }

    fn snapshot(&self) -> Vec<Arc<Stub>> {
        self.stubs.read().clone()
    }

    /// First stub whose predicates all match.
    async fn find_match(&self, request: &Value) -> Result<Option<Arc<Stub>>> {
        for stub in self.snapshot() {
            if self.matches(&stub, request).await? {
                return Ok(Some(stub));
            }
        }
        Ok(None)
    }

    /// Evaluate one stub's predicates. Scripted predicates run on the
    /// blocking pool like inject responses.
    async fn matches(&self, stub: &Arc<Stub>, request: &Value) -> Result<bool> {
        let mode = self.options.mode;
        let dry_run = self.options.dry_run;
        if dry_run || !stub.has_injected_predicates() {
            let ctx = EvalContext {
                mode,
                dry_run,
                state: stub.state(),
            };
            return all_match(stub.predicates(), request, &ctx);
        }

        let stub = Arc::clone(stub);
        let request = request.clone();
        tokio::task::spawn_blocking(move || {
            let ctx = EvalContext {
                mode,
                dry_run,
                state: stub.state(),
            };
            all_match(stub.predicates(), &request, &ctx)
        })
        .await
        .map_err(|e| DecoyError::predicate_injection("inject", e.to_string()))?
    }

    /// Resolve the response for `request`.
    pub async fn resolve(&self, request: &Request) -> Result<Response> {
        let value = request.to_value();
        let Some(stub) = self.find_match(&value).await? else {
            debug!("no stub matched, using default response");
            return Ok(Response::materialize(
                self.options.protocol,
                self.options.default_response.as_ref(),
                &Map::new(),
            ));
        };
        let Some(config) = stub.next_response() else {
            return Ok(Response::materialize(
                self.options.protocol,
                self.options.default_response.as_ref(),
                &Map::new(),
            ));
        };

        let start = Instant::now();
        let response = self.resolve_config(&stub, &config, request, &value).await?;

        if self.options.record_matches {
            let debug_mode = self.options.debug;
            stub.record_match(Match {
                timestamp: chrono::Utc::now().to_rfc3339(),
                request: value,
                response: response.to_value(),
                response_config: debug_mode.then(|| config.raw().clone()),
                processing_time: debug_mode.then(|| crate::proxy::elapsed_ms(start)),
            });
        }
        Ok(response)
    }

    async fn resolve_config(
        &self,
        stub: &Arc<Stub>,
        config: &ResponseConfig,
        request: &Request,
        value: &Value,
    ) -> Result<Response> {
        let protocol = self.options.protocol;
        let response = match &config.kind {
            ResponseKind::Is(fields) => {
                Response::materialize(protocol, self.options.default_response.as_ref(), fields)
            }
            ResponseKind::Inject(source) => {
                let fields = self.inject(stub, source, value).await?;
                Response::materialize(protocol, self.options.default_response.as_ref(), &fields)
            }
            ResponseKind::Proxy(proxy) => match self.proxy.to(&proxy.to, request, proxy).await {
                Ok(proxied) => {
                    if !self.options.dry_run {
                        self.record_proxy_response(stub, proxy, value, &proxied);
                    }
                    Response::materialize(protocol, None, proxied.as_map())
                }
                Err(e @ DecoyError::Proxy { .. }) => {
                    warn!("proxy to {} failed: {e}", proxy.to);
                    return Ok(Response::from_error(protocol, &e));
                }
                Err(e) => return Err(e),
            },
        };

        match &config.behaviors {
            Some(behaviors) if !behaviors.is_empty() => {
                let ctx = BehaviorContext {
                    dry_run: self.options.dry_run,
                };
                behaviors::apply(value, response, behaviors, &ctx).await
            }
            _ => Ok(response),
        }
    }

    async fn inject(&self, stub: &Stub, source: &str, request: &Value) -> Result<Map<String, Value>> {
        let state = Arc::clone(stub.state());
        let script = source.to_string();
        let request = request.clone();
        let result = tokio::task::spawn_blocking(move || {
            scripting::inject_response(&script, &request, &state)
        })
        .await
        .map_err(|e| DecoyError::injection_failed("invalid response injection", source, e.to_string()))??;

        match result {
            Value::Object(fields) => Ok(fields),
            other => Err(DecoyError::injection_failed(
                "invalid response injection",
                source,
                format!("expected an object, got {other}"),
            )),
        }
    }

    /// Save a proxied response as a stub, as the proxy mode asks.
    fn record_proxy_response(
        &self,
        proxy_stub: &Arc<Stub>,
        config: &ProxyConfig,
        request: &Value,
        response: &Response,
    ) {
        if config.mode == ProxyMode::ProxyTransparent {
            return;
        }

        let mut is = response.as_map().clone();
        let elapsed = is.remove("_proxyResponseTime");
        let mut recorded = Map::new();
        recorded.insert("is".to_string(), Value::Object(is));
        let mut added = Map::new();
        if config.add_wait_behavior {
            if let Some(ms) = elapsed {
                added.insert("wait".to_string(), ms);
            }
        }
        if let Some(decorate) = &config.add_decorate_behavior {
            added.insert("decorate".to_string(), Value::String(decorate.clone()));
        }
        if !added.is_empty() {
            recorded.insert("_behaviors".to_string(), Value::Object(added));
        }

        let definition = json!({
            "predicates": predicates_for(request, &config.predicate_generators),
            "responses": [recorded],
        });
        let options = ParseOptions {
            mode: self.options.mode,
            allow_injection: true,
        };
        let recorded = match Stub::parse(&definition, &options) {
            Ok(stub) => stub,
            Err(e) => {
                warn!("could not record proxied response: {e}");
                return;
            }
        };

        let mut stubs = self.stubs.write();
        let Some(index) = stubs.iter().position(|s| Arc::ptr_eq(s, proxy_stub)) else {
            debug!("proxy stub no longer present, response not recorded");
            return;
        };
        match config.mode {
            ProxyMode::ProxyOnce => {
                stubs.insert(index, Arc::new(recorded));
                info!("recorded proxy response at stub {index} (proxyOnce)");
            }
            ProxyMode::ProxyAlways => {
                let existing = stubs[index + 1..]
                    .iter()
                    .find(|s| s.raw_predicates() == recorded.raw_predicates());
                match existing {
                    Some(existing) => {
                        existing.append_responses(recorded.into_responses());
                        debug!("appended proxy response to existing stub (proxyAlways)");
                    }
                    None => {
                        stubs.insert(index + 1, Arc::new(recorded));
                        info!("recorded proxy response at stub {} (proxyAlways)", index + 1);
                    }
                }
            }
            ProxyMode::ProxyTransparent => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proxy::NoOpProxy;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Proxy that answers with a numbered body and counts calls.
    #[derive(Default)]
    struct CountingProxy {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl ProxyClient for CountingProxy {
        async fn to(&self, _target: &str, _request: &Request, _config: &ProxyConfig) -> Result<Response> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            Ok(Response::from_value(json!({
                "statusCode": 200,
                "headers": {},
                "body": format!("upstream {n}"),
                "_proxyResponseTime": 7
            }))
            .unwrap())
        }
    }

    struct FailingProxy;

    #[async_trait]
    impl ProxyClient for FailingProxy {
        async fn to(&self, target: &str, _request: &Request, _config: &ProxyConfig) -> Result<Response> {
            Err(DecoyError::proxy(format!("Unable to connect to {target:?}")))
        }
    }

    fn http_options() -> RepositoryOptions {
        RepositoryOptions {
            protocol: Protocol::Http,
            ..Default::default()
        }
    }

    fn get(path: &str) -> Request {
        Request::http("127.0.0.1:1", "GET", path, Map::new(), Map::new(), "")
    }

    fn repo(stubs: Value, proxy: Arc<dyn ProxyClient>) -> StubRepository {
        let stubs = stubs.as_array().cloned().unwrap_or_default();
        StubRepository::from_definitions(&stubs, http_options(), proxy).unwrap()
    }

    #[tokio::test]
    async fn test_first_matching_stub_wins() {
        let repo = repo(
            json!([
                {"predicates": [{"equals": {"path": "/a"}}], "responses": [{"is": {"body": "a"}}]},
                {"responses": [{"is": {"body": "catch-all"}}]}
            ]),
            Arc::new(NoOpProxy),
        );
        assert_eq!(repo.resolve(&get("/a")).await.unwrap().body_text(), "a");
        assert_eq!(repo.resolve(&get("/b")).await.unwrap().body_text(), "catch-all");
    }

    #[tokio::test]
    async fn test_default_response_when_nothing_matches() {
        let options = RepositoryOptions {
            default_response: json!({"statusCode": 404}).as_object().cloned(),
            ..http_options()
        };
        let repo = StubRepository::from_definitions(
            &[json!({"predicates": [{"equals": {"path": "/x"}}]})],
            options,
            Arc::new(NoOpProxy),
        )
        .unwrap();
        let response = repo.resolve(&get("/y")).await.unwrap();
        assert_eq!(response.status_code(), 404);
        assert_eq!(response.body_text(), "");
        assert_eq!(response.get("headers"), Some(&json!({})));
    }

    #[tokio::test]
    async fn test_is_response_merged_over_defaults() {
        let repo = repo(json!([{"responses": [{"is": {"body": "hi"}}]}]), Arc::new(NoOpProxy));
        let response = repo.resolve(&get("/")).await.unwrap();
        assert_eq!(response.to_value(), json!({"statusCode": 200, "headers": {}, "body": "hi"}));
    }

    #[tokio::test]
    async fn test_proxy_once_records_before_proxy_stub() {
        let proxy = Arc::new(CountingProxy::default());
        let repo = repo(
            json!([{"responses": [{"proxy": {
                "to": "http://backend",
                "predicateGenerators": [{"matches": {"path": true}}],
                "addWaitBehavior": true
            }}]}]),
            proxy.clone(),
        );

        assert_eq!(repo.resolve(&get("/one")).await.unwrap().body_text(), "upstream 1");
        assert_eq!(repo.resolve(&get("/one")).await.unwrap().body_text(), "upstream 1");
        assert_eq!(proxy.calls.load(Ordering::SeqCst), 1);

        let stubs = repo.stubs();
        assert_eq!(stubs.len(), 2);
        assert_eq!(stubs[0]["predicates"], json!([{"deepEquals": {"path": "/one"}}]));
        assert_eq!(stubs[0]["responses"][0]["_behaviors"], json!({"wait": 7}));
        assert!(stubs[0]["responses"][0]["is"].get("_proxyResponseTime").is_none());

        assert_eq!(repo.resolve(&get("/two")).await.unwrap().body_text(), "upstream 2");
        assert_eq!(repo.len(), 3);
    }

    #[tokio::test]
    async fn test_proxy_always_appends_after_proxy_stub() {
        let proxy = Arc::new(CountingProxy::default());
        let repo = repo(
            json!([{"responses": [{"proxy": {
                "to": "http://backend",
                "mode": "proxyAlways",
                "predicateGenerators": [{"matches": {"path": true}}]
            }}]}]),
            proxy.clone(),
        );

        for _ in 0..3 {
            repo.resolve(&get("/same")).await.unwrap();
        }
        repo.resolve(&get("/other")).await.unwrap();
        assert_eq!(proxy.calls.load(Ordering::SeqCst), 4);

        let stubs = repo.stubs();
        assert_eq!(stubs.len(), 3);
        assert!(stubs[0]["responses"][0].get("proxy").is_some());
        assert_eq!(stubs[1]["predicates"], json!([{"deepEquals": {"path": "/other"}}]));
        assert_eq!(stubs[2]["responses"].as_array().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_proxy_transparent_records_nothing() {
        let repo = repo(
            json!([{"responses": [{"proxy": {"to": "http://backend", "mode": "proxyTransparent"}}]}]),
            Arc::new(CountingProxy::default()),
        );
        repo.resolve(&get("/")).await.unwrap();
        assert_eq!(repo.len(), 1);
    }

    #[tokio::test]
    #[tracing_test::traced_test]
    async fn test_proxy_failure_becomes_error_response() {
        let repo = repo(
            json!([{"responses": [{"proxy": {"to": "http://down"}}]}]),
            Arc::new(FailingProxy),
        );
        let response = repo.resolve(&get("/")).await.unwrap();
        assert_eq!(response.status_code(), 500);
        assert_eq!(response.get("body").unwrap()["errors"][0]["code"], "invalid proxy");
        assert_eq!(repo.len(), 1);
        assert!(logs_contain("proxy to http://down failed"));
    }

    #[tokio::test]
    async fn test_matches_recorded_in_debug_mode() {
        let options = RepositoryOptions {
            record_matches: true,
            debug: true,
            ..http_options()
        };
        let repo = StubRepository::from_definitions(
            &[json!({"responses": [{"is": {"body": "x"}}]})],
            options,
            Arc::new(NoOpProxy),
        )
        .unwrap();
        repo.resolve(&get("/seen")).await.unwrap();
        let stubs = repo.stubs();
        let matches = stubs[0]["matches"].as_array().unwrap();
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0]["request"]["path"], "/seen");
        assert_eq!(matches[0]["responseConfig"], json!({"is": {"body": "x"}}));
        assert!(matches[0]["processingTime"].is_u64());
    }

    #[tokio::test]
    async fn test_matches_not_recorded_by_default() {
        let repo = repo(json!([{"responses": [{"is": {}}]}]), Arc::new(NoOpProxy));
        repo.resolve(&get("/")).await.unwrap();
        assert!(repo.stubs()[0].get("matches").is_none());
    }

    #[tokio::test]
    async fn test_add_stub_at_index() {
        let repo = repo(json!([{"responses": [{"is": {"body": "old"}}]}]), Arc::new(NoOpProxy));
        let stub = Stub::parse(
            &json!({"responses": [{"is": {"body": "new"}}]}),
            &ParseOptions::default(),
        )
        .unwrap();
        repo.add_stub(stub, Some(0));
        assert_eq!(repo.resolve(&get("/")).await.unwrap().body_text(), "new");
    }

    #[cfg(feature = "javascript")]
    #[tokio::test]
    async fn test_inject_response_keeps_state() {
        let options = RepositoryOptions {
            allow_injection: true,
            ..http_options()
        };
        let repo = StubRepository::from_definitions(
            &[json!({"responses": [{"inject":
                "function (config, state) { state.count = (state.count || 0) + 1; return { body: 'call ' + state.count }; }"
            }]})],
            options,
            Arc::new(NoOpProxy),
        )
        .unwrap();
        assert_eq!(repo.resolve(&get("/")).await.unwrap().body_text(), "call 1");
        let second = repo.resolve(&get("/")).await.unwrap();
        assert_eq!(second.body_text(), "call 2");
        assert_eq!(second.status_code(), 200);
    }

    #[cfg(feature = "javascript")]
    #[tokio::test(flavor = "current_thread")]
    async fn test_inject_predicate_selects_stub() {
        let options = RepositoryOptions {
            allow_injection: true,
            ..http_options()
        };
        let repo = StubRepository::from_definitions(
            &[
                json!({
                    "predicates": [{"inject": "function (config) { return config.path === '/scripted'; }"}],
                    "responses": [{"is": {"body": "scripted"}}]
                }),
                json!({"responses": [{"is": {"body": "fallback"}}]}),
            ],
            options,
            Arc::new(NoOpProxy),
        )
        .unwrap();
        assert_eq!(repo.resolve(&get("/scripted")).await.unwrap().body_text(), "scripted");
        assert_eq!(repo.resolve(&get("/other")).await.unwrap().body_text(), "fallback");
    }
}
