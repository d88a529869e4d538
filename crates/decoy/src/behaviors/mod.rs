//! Mountebank-compatible response behaviors.
//!
//! Behaviors post-process a resolved response. They always run in the same
//! order, whatever order the configuration lists them in:
//!
//! - `wait` - Add latency before response (fixed ms, {min, max} range, or a function)
//! - `repeat` - Repeat response N times before cycling to next (see [`ResponseCursor`])
//! - `copy` - Copy request fields into response using regex/jsonpath/xpath
//! - `lookup` - Query external CSV data source
//! - `shellTransform` - External program transforms response
//! - `decorate` - Script post-processes response

mod copy;
mod cycler;
mod extraction;
mod lookup;
mod transform;
mod types;
mod wait;

pub use copy::{apply_copy_behaviors, CopyBehavior, CopySource};
pub use cycler::{HasRepeatBehavior, ResponseCursor};
pub use extraction::{ExtractionMethod, RegexOptions};
pub use lookup::{apply_lookup_behaviors, CsvData, CsvDataSource, DataSource, LookupBehavior, LookupKey};
pub use transform::{apply_decorate, apply_shell_transform};
pub use types::{normalize_behaviors, Behaviors};
pub use wait::WaitBehavior;

use crate::error::{DecoyError, Result};
use crate::response::Response;
use serde_json::Value;

/// How the pipeline runs for one response.
#[derive(Debug, Clone, Copy, Default)]
pub struct BehaviorContext {
    /// Dry runs skip `wait` and `shellTransform`.
    pub dry_run: bool,
}

/// Run `behaviors` over `response` for `request`.
pub async fn apply(
    request: &Value,
    response: Response,
    behaviors: &Behaviors,
    ctx: &BehaviorContext,
) -> Result<Response> {
    if let Some(wait) = behaviors.wait.as_ref().filter(|_| !ctx.dry_run) {
        wait.sleep(request).await?;
    }

    let mut value = response.into_value();
    apply_copy_behaviors(&mut value, &behaviors.copy, request);
    apply_lookup_behaviors(&mut value, &behaviors.lookup, request);

    if !behaviors.shell_transform.is_empty() && !ctx.dry_run {
        value = apply_shell_transform(&behaviors.shell_transform, request, value).await?;
    }
    if let Some(decorate) = &behaviors.decorate {
        value = apply_decorate(decorate, request, value).await?;
    }

    Response::from_value(value).ok_or_else(|| DecoyError::injection("behaviors produced a non-object response"))
}

/// Replace every occurrence of `token` in the string leaves of `value`.
pub(crate) fn replace_token(value: &mut Value, token: &str, replacement: &str) {
    if token.is_empty() {
        return;
    }
    match value {
        Value::String(s) => {
            if s.contains(token) {
                *s = s.replace(token, replacement);
            }
        }
        Value::Array(items) => {
            for item in items {
                replace_token(item, token, replacement);
            }
        }
        Value::Object(map) => {
            for item in map.values_mut() {
                replace_token(item, token, replacement);
            }
        }
        _ => {}
    }
}
