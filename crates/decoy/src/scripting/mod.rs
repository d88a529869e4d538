//! Operator-supplied code: `inject` predicates and responses, `decorate`
//! and function-valued `wait`.
//!
//! JavaScript runs on the Boa engine (feature `javascript`, on by default).
//! `decorate` scripts that are not JavaScript functions run through Rhai.
//! Whether injection is allowed at all is decided when configuration is
//! parsed; nothing in this module checks it.

#[cfg(feature = "javascript")]
mod js_engine;
mod rhai_engine;

use crate::error::{DecoyError, Result};
use parking_lot::Mutex;
use serde_json::{Map, Value};
use std::sync::Arc;

/// Key/value state owned by a stub and shared by every injected call on it.
pub type ScriptState = Arc<Mutex<Map<String, Value>>>;

pub fn new_state() -> ScriptState {
    Arc::new(Mutex::new(Map::new()))
}

/// Message shown when injection is used without `--allow-injection`.
pub const INJECTION_DISABLED: &str =
    "JavaScript injection is not allowed unless decoy is run with --allow-injection";

/// Error for a disallowed injection site, carrying the offending source.
pub fn injection_disabled(source: &Value) -> DecoyError {
    DecoyError::Injection {
        message: INJECTION_DISABLED.to_string(),
        origin: Some(crate::response::value_to_text(source)),
        data: None,
    }
}

/// Level of a message written through the script `logger` object.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

/// Forward a script log line to tracing.
pub fn script_log(level: LogLevel, message: &str) {
    match level {
        LogLevel::Debug => tracing::debug!(target: "decoy::inject", "{message}"),
        LogLevel::Info => tracing::info!(target: "decoy::inject", "{message}"),
        LogLevel::Warn => tracing::warn!(target: "decoy::inject", "{message}"),
        LogLevel::Error => tracing::error!(target: "decoy::inject", "{message}"),
    }
}

/// Whether a script looks like a JavaScript function expression.
pub fn is_javascript(source: &str) -> bool {
    let trimmed = source.trim_start();
    trimmed.starts_with("function")
        || trimmed.starts_with("async")
        || trimmed.starts_with('(')
        || source.contains("=>")
}

/// The `config` argument: the request's fields plus `request` itself.
pub(crate) fn script_config(request: &Value) -> Map<String, Value> {
    let mut config = request.as_object().cloned().unwrap_or_default();
    config.insert("request".to_string(), request.clone());
    config
}

/// Run an `inject` predicate: `function (config, logger, state)` returning a boolean.
pub fn inject_predicate(source: &str, request: &Value, state: &ScriptState) -> Result<bool> {
    #[cfg(feature = "javascript")]
    {
        let mut guard = state.lock();
        js_engine::predicate(source, request, &mut guard)
    }
    #[cfg(not(feature = "javascript"))]
    {
        let _ = (request, state);
        Err(DecoyError::predicate_injection(source, "JavaScript support is not compiled in"))
    }
}

/// Run an `inject` response: `function (config, state, logger, callback)`.
///
/// A returned value wins; otherwise the first callback invocation is used.
pub fn inject_response(source: &str, request: &Value, state: &ScriptState) -> Result<Value> {
    #[cfg(feature = "javascript")]
    {
        let mut guard = state.lock();
        js_engine::response(source, request, &mut guard)
    }
    #[cfg(not(feature = "javascript"))]
    {
        let _ = (request, state);
        Err(DecoyError::injection_failed(
            "invalid response injection",
            source,
            "JavaScript support is not compiled in",
        ))
    }
}

/// Run a `decorate` behavior and return the resulting response.
pub fn decorate(source: &str, request: &Value, response: &Value) -> Result<Value> {
    if !is_javascript(source) {
        return rhai_engine::decorate(source, request, response);
    }
    #[cfg(feature = "javascript")]
    {
        js_engine::decorate(source, request, response)
    }
    #[cfg(not(feature = "javascript"))]
    {
        let _ = (request, response);
        Err(DecoyError::injection_failed(
            "invalid decorator injection",
            source,
            "JavaScript support is not compiled in",
        ))
    }
}

/// Run a function-valued `wait` and return the delay in milliseconds.
pub fn wait_millis(source: &str, request: &Value) -> Result<u64> {
    #[cfg(feature = "javascript")]
    {
        js_engine::wait(source, request)
    }
    #[cfg(not(feature = "javascript"))]
    {
        let _ = request;
        Err(DecoyError::injection_failed(
            "invalid wait injection",
            source,
            "JavaScript support is not compiled in",
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_is_javascript() {
        assert!(is_javascript("function (config) { return true; }"));
        assert!(is_javascript("(config, response) => { response.body = 'x'; }"));
        assert!(is_javascript("  async function (c) {}"));
        assert!(!is_javascript("response.body = \"changed\";"));
    }

    #[test]
    fn test_script_config_includes_request() {
        let request = json!({"path": "/a", "method": "GET"});
        let config = script_config(&request);
        assert_eq!(config["path"], "/a");
        assert_eq!(config["request"]["method"], "GET");
    }

    #[test]
    fn test_injection_disabled_error() {
        let err = injection_disabled(&json!("function () {}"));
        assert_eq!(err.code(), "invalid injection");
        assert_eq!(err.to_string(), INJECTION_DISABLED);
    }

    #[cfg(feature = "javascript")]
    #[test]
    fn test_predicate_state_persists() {
        let state = new_state();
        let source = "function (config, logger, state) { state.count = (state.count || 0) + 1; return state.count > 1; }";
        let request = json!({"path": "/"});
        assert!(!inject_predicate(source, &request, &state).unwrap());
        assert!(inject_predicate(source, &request, &state).unwrap());
        assert_eq!(state.lock()["count"], json!(2));
    }

    #[test]
    fn test_rhai_decorate_fallback() {
        let response = json!({"statusCode": 200, "body": "hello"});
        let result = decorate(
            r#"response.body = response.body + " world";"#,
            &json!({}),
            &response,
        )
        .unwrap();
        assert_eq!(result["body"], "hello world");
    }
}
