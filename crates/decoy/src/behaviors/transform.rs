//! Shell transform and decorate behaviors.

use crate::error::{DecoyError, Result};
use crate::response::Response;
use crate::scripting;
use serde_json::Value;

/// Execute shell transform commands in order.
///
/// Each command receives MB_REQUEST and MB_RESPONSE environment variables
/// and must print the transformed response JSON to stdout; the output of
/// one command is the MB_RESPONSE of the next.
pub async fn apply_shell_transform(
    commands: &[String],
    request: &Value,
    response: Value,
) -> Result<Value> {
    let mut response = response;
    for command in commands {
        response = run_command(command, request, &response).await?;
    }
    Ok(response)
}

async fn run_command(command: &str, request: &Value, response: &Value) -> Result<Value> {
    tracing::debug!("shellTransform: {command}");
    let output = tokio::process::Command::new("sh")
        .arg("-c")
        .arg(command)
        .env("MB_REQUEST", request.to_string())
        .env("MB_RESPONSE", response.to_string())
        .kill_on_drop(true)
        .output()
        .await
        .map_err(|e| DecoyError::injection_failed("Command failed", command, e.to_string()))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        tracing::error!("shellTransform {command} failed: {stderr}");
        return Err(DecoyError::injection_failed(
            "Command failed",
            command,
            stderr.trim().to_string(),
        ));
    }

    let stdout = String::from_utf8_lossy(&output.stdout);
    match serde_json::from_str::<Value>(stdout.trim()) {
        Ok(value @ Value::Object(_)) => Ok(value),
        _ => Err(DecoyError::injection_failed(
            "Shell command did not output a JSON response",
            command,
            stdout.trim().to_string(),
        )),
    }
}

/// Apply a decorate script (JavaScript or Rhai) on the blocking pool.
///
/// When the response had a `Content-Length` header and the decorated body
/// has a different length, the header is updated to match.
pub async fn apply_decorate(source: &str, request: &Value, response: Value) -> Result<Value> {
    let before = Response::from_value(response.clone()).map(|r| r.body_len());

    let script = source.to_string();
    let request = request.clone();
    let decorated = tokio::task::spawn_blocking(move || {
        scripting::decorate(&script, &request, &response)
    })
    .await
    .map_err(|e| DecoyError::injection_failed("invalid decorator injection", source, e.to_string()))??;

    let Some(mut decorated) = Response::from_value(decorated) else {
        return Err(DecoyError::injection_failed(
            "invalid decorator injection",
            source,
            "decorated response is not an object",
        ));
    };
    if let Some((_, length)) = decorated.find_header("content-length") {
        let after = decorated.body_len();
        if before != Some(after) {
            let value = match length {
                Value::String(_) => Value::String(after.to_string()),
                _ => Value::from(after),
            };
            decorated.set_header("content-length", value);
        }
    }
    Ok(decorated.into_value())
}
