//! Rhai execution for `decorate` scripts.
//!
//! The script sees `request` and `response` maps in scope. It may mutate
//! `response` or evaluate to a replacement map.

use crate::error::{DecoyError, Result};
use rhai::{Dynamic, Engine, Map, Scope};
use serde_json::Value;

pub(super) fn decorate(source: &str, request: &Value, response: &Value) -> Result<Value> {
    let engine = Engine::new();
    let mut scope = Scope::new();
    scope.push("request", json_to_dynamic(request.clone()));
    scope.push("response", json_to_dynamic(response.clone()));

    let result: Dynamic = engine.eval_with_scope(&mut scope, source).map_err(|e| {
        tracing::error!(target: "decoy::inject", "decorate X=> {e}");
        DecoyError::injection_failed("invalid decorator injection", source, e.to_string())
    })?;

    if result.is_map() {
        return Ok(dynamic_to_json(result));
    }
    let updated = scope
        .get_value::<Map>("response")
        .map(|map| dynamic_to_json(Dynamic::from(map)))
        .ok_or_else(|| {
            DecoyError::injection_failed(
                "invalid decorator injection",
                source,
                "response is no longer a map",
            )
        })?;
    Ok(updated)
}

fn json_to_dynamic(value: Value) -> Dynamic {
    match value {
        Value::Null => Dynamic::UNIT,
        Value::Bool(b) => Dynamic::from(b),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Dynamic::from(i)
            } else if let Some(f) = n.as_f64() {
                Dynamic::from(f)
            } else {
                Dynamic::UNIT
            }
        }
        Value::String(s) => Dynamic::from(s),
        Value::Array(arr) => {
            let vec: Vec<Dynamic> = arr.into_iter().map(json_to_dynamic).collect();
            Dynamic::from(vec)
        }
        Value::Object(obj) => {
            let mut map = Map::new();
            for (k, v) in obj {
                map.insert(k.into(), json_to_dynamic(v));
            }
            Dynamic::from(map)
        }
    }
}

fn dynamic_to_json(value: Dynamic) -> Value {
    if value.is_unit() {
        Value::Null
    } else if let Ok(b) = value.as_bool() {
        Value::Bool(b)
    } else if let Ok(i) = value.as_int() {
        Value::Number(i.into())
    } else if let Ok(f) = value.as_float() {
        serde_json::Number::from_f64(f)
            .map(Value::Number)
            .unwrap_or(Value::Null)
    } else if let Some(s) = value.clone().try_cast::<String>() {
        Value::String(s)
    } else if let Some(arr) = value.clone().try_cast::<Vec<Dynamic>>() {
        Value::Array(arr.into_iter().map(dynamic_to_json).collect())
    } else if let Some(map) = value.clone().try_cast::<Map>() {
        Value::Object(
            map.into_iter()
                .map(|(k, v)| (k.to_string(), dynamic_to_json(v)))
                .collect(),
        )
    } else {
        Value::String(value.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_mutates_response() {
        let result = decorate(
            r#"response.headers["x-path"] = request.path;"#,
            &json!({"path": "/a"}),
            &json!({"statusCode": 200, "headers": {}, "body": ""}),
        )
        .unwrap();
        assert_eq!(result["headers"]["x-path"], "/a");
        assert_eq!(result["statusCode"], 200);
    }

    #[test]
    fn test_returns_replacement_map() {
        let result = decorate(
            r#"#{ statusCode: 503, body: "down" }"#,
            &json!({}),
            &json!({"statusCode": 200}),
        )
        .unwrap();
        assert_eq!(result, json!({"statusCode": 503, "body": "down"}));
    }

    #[test]
    fn test_script_error() {
        let err = decorate("let x = ;", &json!({}), &json!({})).unwrap_err();
        assert_eq!(err.code(), "invalid injection");
    }
}
