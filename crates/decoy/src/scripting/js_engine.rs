//! JavaScript execution on Boa.
//!
//! Every call builds a fresh `Context`, installs the arguments as globals and
//! evaluates a small wrapper that invokes the operator's function. Contexts
//! are not `Send`, so async callers run these functions on the blocking pool.

use super::{script_config, script_log, LogLevel};
use crate::error::{DecoyError, Result};
use boa_engine::{
    js_string, native_function::NativeFunction, object::builtins::JsArray, property::PropertyKey,
    Context, JsObject, JsResult, JsValue, Source,
};
use serde_json::{Map, Value};
use std::cell::RefCell;

// First value handed to the inject callback during the current call.
thread_local! {
    static CALLBACK_RESULT: RefCell<Option<Value>> = const { RefCell::new(None) };
}

fn create_js_object(context: &Context) -> JsObject {
    JsObject::with_object_proto(context.intrinsics())
}

/// Strip the trailing `;` operators often leave after a function expression.
fn function_expression(source: &str) -> &str {
    source.trim().trim_end_matches(';').trim_end()
}

fn set_global(context: &mut Context, name: &str, value: JsValue) -> JsResult<()> {
    let global = context.global_object();
    global.set(js_string!(name), value, false, context)?;
    Ok(())
}

fn register_method(
    obj: &JsObject,
    name: &str,
    func: fn(&JsValue, &[JsValue], &mut Context) -> JsResult<JsValue>,
    context: &mut Context,
) -> JsResult<()> {
    obj.set(
        PropertyKey::from(js_string!(name)),
        NativeFunction::from_fn_ptr(func).to_js_function(context.realm()),
        false,
        context,
    )?;
    Ok(())
}

fn log_args(level: LogLevel, args: &[JsValue], context: &mut Context) -> JsResult<JsValue> {
    let mut parts = Vec::with_capacity(args.len());
    for arg in args {
        parts.push(arg.to_string(context)?.to_std_string_escaped());
    }
    script_log(level, &parts.join(" "));
    Ok(JsValue::undefined())
}

fn logger_debug(_this: &JsValue, args: &[JsValue], ctx: &mut Context) -> JsResult<JsValue> {
    log_args(LogLevel::Debug, args, ctx)
}

fn logger_info(_this: &JsValue, args: &[JsValue], ctx: &mut Context) -> JsResult<JsValue> {
    log_args(LogLevel::Info, args, ctx)
}

fn logger_warn(_this: &JsValue, args: &[JsValue], ctx: &mut Context) -> JsResult<JsValue> {
    log_args(LogLevel::Warn, args, ctx)
}

fn logger_error(_this: &JsValue, args: &[JsValue], ctx: &mut Context) -> JsResult<JsValue> {
    log_args(LogLevel::Error, args, ctx)
}

/// `logger` object with `debug`, `info`, `warn` and `error` methods.
fn create_logger_object(context: &mut Context) -> JsResult<JsValue> {
    let obj = create_js_object(context);
    register_method(&obj, "debug", logger_debug, context)?;
    register_method(&obj, "info", logger_info, context)?;
    register_method(&obj, "warn", logger_warn, context)?;
    register_method(&obj, "error", logger_error, context)?;
    Ok(obj.into())
}

fn inject_callback(_this: &JsValue, args: &[JsValue], ctx: &mut Context) -> JsResult<JsValue> {
    let value = match args.first() {
        Some(arg) => js_to_json(ctx, arg)?,
        None => Value::Null,
    };
    CALLBACK_RESULT.with(|slot| {
        let mut slot = slot.borrow_mut();
        if slot.is_none() {
            *slot = Some(value);
        }
    });
    Ok(JsValue::undefined())
}

/// Fresh context with `__config` and `__logger` installed.
fn prepare(request: &Value) -> JsResult<Context> {
    let mut context = Context::default();
    let config = json_to_js(&mut context, &Value::Object(script_config(request)))?;
    set_global(&mut context, "__config", config)?;
    let logger = create_logger_object(&mut context)?;
    set_global(&mut context, "__logger", logger)?;
    Ok(context)
}

fn install_state(context: &mut Context, state: &Map<String, Value>) -> JsResult<()> {
    let state = json_to_js(context, &Value::Object(state.clone()))?;
    set_global(context, "__state", state)
}

fn read_state(context: &mut Context) -> JsResult<Option<Map<String, Value>>> {
    let global = context.global_object();
    let state = global.get(js_string!("__state"), context)?;
    Ok(match js_to_json(context, &state)? {
        Value::Object(map) => Some(map),
        _ => None,
    })
}

pub(super) fn predicate(
    source: &str,
    request: &Value,
    state: &mut Map<String, Value>,
) -> Result<bool> {
    let fail = |e: boa_engine::JsError| {
        tracing::error!(target: "decoy::inject", "injection X=> {e}");
        DecoyError::predicate_injection(source, e.to_string())
    };

    let mut context = prepare(request).map_err(fail)?;
    install_state(&mut context, state).map_err(fail)?;

    let wrapper = format!(
        r#"
        var __fn = ({function});
        __config.state = __state;
        __config.logger = __logger;
        __fn(__config, __logger, __state);
        "#,
        function = function_expression(source)
    );
    let result = context
        .eval(Source::from_bytes(wrapper.as_bytes()))
        .map_err(fail)?;

    if let Some(updated) = read_state(&mut context).map_err(fail)? {
        *state = updated;
    }

    result.as_boolean().ok_or_else(|| {
        let shown = result
            .to_string(&mut context)
            .map(|s| s.to_std_string_escaped())
            .unwrap_or_default();
        DecoyError::predicate_injection(source, format!("predicate returned {shown}, not a boolean"))
    })
}

pub(super) fn response(
    source: &str,
    request: &Value,
    state: &mut Map<String, Value>,
) -> Result<Value> {
    let fail = |e: boa_engine::JsError| {
        tracing::error!(target: "decoy::inject", "injection X=> {e}");
        DecoyError::injection_failed("invalid response injection", source, e.to_string())
    };

    CALLBACK_RESULT.with(|slot| slot.borrow_mut().take());

    let mut context = prepare(request).map_err(fail)?;
    install_state(&mut context, state).map_err(fail)?;
    let callback = NativeFunction::from_fn_ptr(inject_callback).to_js_function(context.realm());
    set_global(&mut context, "__callback", callback.into()).map_err(fail)?;

    let wrapper = format!(
        r#"
        var __fn = ({function});
        __config.state = __state;
        __config.logger = __logger;
        __config.callback = __callback;
        var __result = __fn(__config, __state, __logger, __callback);
        if (__result && typeof __result.then === 'function') {{
            __result.then(function (resolved) {{
                if (resolved !== undefined) {{ __callback(resolved); }}
            }});
            __result = undefined;
        }}
        __result;
        "#,
        function = function_expression(source)
    );
    let result = context
        .eval(Source::from_bytes(wrapper.as_bytes()))
        .map_err(fail)?;
    let _ = context.run_jobs();

    if let Some(updated) = read_state(&mut context).map_err(fail)? {
        *state = updated;
    }

    let direct = js_to_json(&mut context, &result).map_err(fail)?;
    let called_back = CALLBACK_RESULT.with(|slot| slot.borrow_mut().take());
    match (direct, called_back) {
        (Value::Object(map), _) => Ok(Value::Object(map)),
        (_, Some(Value::Object(map))) => Ok(Value::Object(map)),
        (Value::Null, None) => Err(DecoyError::injection_failed(
            "invalid response injection",
            source,
            "injection neither returned a response nor called the callback",
        )),
        (other, callback) => Err(DecoyError::injection_failed(
            "invalid response injection",
            source,
            format!(
                "injection produced {} instead of a response object",
                callback.unwrap_or(other)
            ),
        )),
    }
}

pub(super) fn decorate(source: &str, request: &Value, response: &Value) -> Result<Value> {
    let fail = |e: boa_engine::JsError| {
        tracing::error!(target: "decoy::inject", "injection X=> {e}");
        DecoyError::injection_failed("invalid decorator injection", source, e.to_string())
    };

    let mut context = prepare(request).map_err(fail)?;
    let js_response = json_to_js(&mut context, response).map_err(fail)?;
    set_global(&mut context, "__response", js_response).map_err(fail)?;

    let wrapper = format!(
        r#"
        var __fn = ({function});
        __config.response = __response;
        __config.logger = __logger;
        var __result = __fn(__config, __response, __logger);
        (__result !== null && typeof __result === 'object') ? __result : __response;
        "#,
        function = function_expression(source)
    );
    let result = context
        .eval(Source::from_bytes(wrapper.as_bytes()))
        .map_err(fail)?;

    match js_to_json(&mut context, &result).map_err(fail)? {
        Value::Object(map) => Ok(Value::Object(map)),
        other => Err(DecoyError::injection_failed(
            "invalid decorator injection",
            source,
            format!("decorator produced {other}"),
        )),
    }
}

pub(super) fn wait(source: &str, request: &Value) -> Result<u64> {
    let fail = |e: boa_engine::JsError| {
        tracing::error!(target: "decoy::inject", "injection X=> {e}");
        DecoyError::injection_failed("invalid wait injection", source, e.to_string())
    };

    let mut context = prepare(request).map_err(fail)?;
    let wrapper = format!(
        r#"
        var __fn = ({function});
        __config.logger = __logger;
        __fn(__config, __logger);
        "#,
        function = function_expression(source)
    );
    let result = context
        .eval(Source::from_bytes(wrapper.as_bytes()))
        .map_err(fail)?;

    let millis = result
        .to_number(&mut context)
        .map_err(fail)?;
    if millis.is_finite() && millis > 0.0 {
        Ok(millis as u64)
    } else {
        Ok(0)
    }
}

fn json_to_js(context: &mut Context, value: &Value) -> JsResult<JsValue> {
    match value {
        Value::Null => Ok(JsValue::null()),
        Value::Bool(b) => Ok(JsValue::from(*b)),
        Value::Number(n) => {
            if let Some(i) = n.as_i64().and_then(|i| i32::try_from(i).ok()) {
                Ok(JsValue::from(i))
            } else {
                Ok(JsValue::from(n.as_f64().unwrap_or(0.0)))
            }
        }
        Value::String(s) => Ok(JsValue::from(js_string!(s.clone()))),
        Value::Array(arr) => {
            let js_arr = JsArray::new(context);
            for (i, v) in arr.iter().enumerate() {
                let js_val = json_to_js(context, v)?;
                js_arr.set(i as u32, js_val, false, context)?;
            }
            Ok(js_arr.into())
        }
        Value::Object(obj) => {
            let js_obj = create_js_object(context);
            for (k, v) in obj {
                let js_val = json_to_js(context, v)?;
                js_obj.set(js_string!(k.clone()), js_val, false, context)?;
            }
            Ok(js_obj.into())
        }
    }
}

fn number_to_json(n: f64) -> Value {
    if n.fract() == 0.0 && n.abs() < 9_007_199_254_740_992.0 {
        Value::Number((n as i64).into())
    } else {
        serde_json::Number::from_f64(n)
            .map(Value::Number)
            .unwrap_or(Value::Null)
    }
}

fn js_to_json(context: &mut Context, value: &JsValue) -> JsResult<Value> {
    if value.is_null() || value.is_undefined() {
        return Ok(Value::Null);
    }
    if let Some(b) = value.as_boolean() {
        return Ok(Value::Bool(b));
    }
    if let Some(n) = value.as_number() {
        return Ok(number_to_json(n));
    }
    if let Some(s) = value.as_string() {
        return Ok(Value::String(s.to_std_string_escaped()));
    }
    if let Some(obj) = value.as_object() {
        if obj.is_callable() {
            return Ok(Value::Null);
        }
        if obj.is_array() {
            let len = obj
                .get(js_string!("length"), context)?
                .as_number()
                .unwrap_or(0.0) as u32;
            let mut arr = Vec::with_capacity(len as usize);
            for i in 0..len {
                let item = obj.get(i, context)?;
                arr.push(js_to_json(context, &item)?);
            }
            return Ok(Value::Array(arr));
        }

        let mut map = Map::new();
        for key in obj.own_property_keys(context)? {
            let key_str = match &key {
                PropertyKey::String(s) => s.to_std_string_escaped(),
                PropertyKey::Index(i) => i.get().to_string(),
                PropertyKey::Symbol(_) => continue,
            };
            let val = obj.get(key.clone(), context)?;
            if val.is_undefined() || val.as_object().is_some_and(|o| o.is_callable()) {
                continue;
            }
            map.insert(key_str, js_to_json(context, &val)?);
        }
        return Ok(Value::Object(map));
    }
    Ok(Value::Null)
}
