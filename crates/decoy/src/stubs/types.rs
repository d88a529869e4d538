//! Stub and response definitions.

use crate::behaviors::{normalize_behaviors, Behaviors, HasRepeatBehavior, ResponseCursor};
use crate::error::{DecoyError, Result};
use crate::predicate::{parse_all, ParseOptions, Predicate};
use crate::proxy::ProxyConfig;
use crate::scripting::{self, ScriptState};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

const RESPONSE_TYPES: [&str; 3] = ["is", "proxy", "inject"];

/// What produces a response.
#[derive(Debug, Clone, PartialEq)]
pub enum ResponseKind {
    /// Literal fields merged over the defaults.
    Is(Map<String, Value>),
    Proxy(ProxyConfig),
    /// JavaScript `function (config, state, logger, callback)`.
    Inject(String),
}

/// One entry of a stub's `responses`.
#[derive(Debug, Clone, PartialEq)]
pub struct ResponseConfig {
    pub kind: ResponseKind,
    pub behaviors: Option<Behaviors>,
    raw: Value,
}

impl ResponseConfig {
    /// Parse one response definition.
    ///
    /// An object naming none of `is`, `proxy`, `inject` means `is: {}`.
    /// Behaviors may be given as a `_behaviors` object or a `behaviors` array.
    pub fn parse(value: &Value, options: &ParseOptions) -> Result<Self> {
        let Some(fields) = value.as_object() else {
            return Err(DecoyError::validation_with_source(
                "each response must be an object",
                value,
            ));
        };

        let types: Vec<&str> = RESPONSE_TYPES
            .into_iter()
            .filter(|t| fields.contains_key(*t))
            .collect();
        if types.len() > 1 {
            return Err(DecoyError::validation_with_source(
                "each response object must have only one response type",
                value,
            ));
        }

        let kind = match types.first().copied() {
            None => ResponseKind::Is(Map::new()),
            Some("is") => match &fields["is"] {
                Value::Object(is) => ResponseKind::Is(is.clone()),
                Value::Null => ResponseKind::Is(Map::new()),
                other => {
                    return Err(DecoyError::validation_with_source(
                        "\"is\" response must be an object",
                        other,
                    ))
                }
            },
            Some("proxy") => {
                ResponseKind::Proxy(ProxyConfig::parse(&fields["proxy"], options.allow_injection)?)
            }
            _ => {
                let source = &fields["inject"];
                if !options.allow_injection {
                    return Err(scripting::injection_disabled(source));
                }
                let Some(source) = source.as_str() else {
                    return Err(DecoyError::validation_with_source(
                        "inject response must be a function string",
                        source,
                    ));
                };
                ResponseKind::Inject(source.to_string())
            }
        };

        let behaviors = match (fields.get("_behaviors"), fields.get("behaviors")) {
            (Some(_), Some(_)) => {
                return Err(DecoyError::validation_with_source(
                    "use either _behaviors or behaviors, not both",
                    value,
                ))
            }
            (Some(map), None) => Some(Behaviors::parse(map, options.allow_injection)?),
            (None, Some(Value::Array(list))) => Some(Behaviors::parse(
                &normalize_behaviors(list)?,
                options.allow_injection,
            )?),
            (None, Some(other)) => {
                return Err(DecoyError::validation_with_source(
                    "behaviors must be an array",
                    other,
                ))
            }
            (None, None) => None,
        };

        Ok(Self {
            kind,
            behaviors,
            raw: value.clone(),
        })
    }

    /// Definition as given, for rendering.
    pub fn raw(&self) -> &Value {
        &self.raw
    }
}

impl HasRepeatBehavior for ResponseConfig {
    fn repeat(&self) -> Option<u32> {
        self.behaviors.as_ref().and_then(|b| b.repeat)
    }
}

/// A request the stub answered.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Match {
    pub timestamp: String,
    pub request: Value,
    pub response: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_config: Option<Value>,
    /// Milliseconds spent resolving the response.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub processing_time: Option<u64>,
}

/// Predicates plus the responses they unlock.
///
/// Responses can grow at runtime (proxyAlways recording), so they sit
/// behind a lock; the cursor advances atomically.
#[derive(Debug)]
pub struct Stub {
    predicates: Vec<Predicate>,
    raw_predicates: Vec<Value>,
    responses: RwLock<Vec<ResponseConfig>>,
    cursor: ResponseCursor,
    matches: Mutex<Vec<Match>>,
    state: ScriptState,
    extra: Map<String, Value>,
}

impl Stub {
    /// Parse a stub definition `{ predicates?, responses? }`.
    pub fn parse(value: &Value, options: &ParseOptions) -> Result<Self> {
        let Some(fields) = value.as_object() else {
            return Err(DecoyError::validation_with_source(
                "each stub must be an object",
                value,
            ));
        };

        let raw_predicates = match fields.get("predicates") {
            None | Some(Value::Null) => Vec::new(),
            Some(Value::Array(items)) => items.clone(),
            Some(other) => {
                return Err(DecoyError::validation_with_source(
                    "predicates must be an array",
                    other,
                ))
            }
        };
        let predicates = parse_all(&raw_predicates, options)?;

        let responses = match fields.get("responses") {
            None | Some(Value::Null) => vec![ResponseConfig::parse(&Value::Object(Map::new()), options)?],
            Some(Value::Array(items)) if items.is_empty() => {
                vec![ResponseConfig::parse(&Value::Object(Map::new()), options)?]
            }
            Some(Value::Array(items)) => items
                .iter()
                .map(|item| ResponseConfig::parse(item, options))
                .collect::<Result<Vec<_>>>()?,
            Some(other) => {
                return Err(DecoyError::validation_with_source(
                    "responses must be an array",
                    other,
                ))
            }
        };

        let extra = fields
            .iter()
            .filter(|(k, _)| !matches!(k.as_str(), "predicates" | "responses" | "matches" | "_links"))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();

        Ok(Self {
            predicates,
            raw_predicates,
            responses: RwLock::new(responses),
            cursor: ResponseCursor::new(),
            matches: Mutex::new(Vec::new()),
            state: scripting::new_state(),
            extra,
        })
    }

    pub fn predicates(&self) -> &[Predicate] {
        &self.predicates
    }

    /// Any predicate that runs an `inject` script.
    pub fn has_injected_predicates(&self) -> bool {
        self.predicates.iter().any(Predicate::uses_injection)
    }

    pub fn raw_predicates(&self) -> &[Value] {
        &self.raw_predicates
    }

    pub fn state(&self) -> &ScriptState {
        &self.state
    }

    pub fn response_count(&self) -> usize {
        self.responses.read().len()
    }

    /// Take the response under the cursor and advance it.
    pub fn next_response(&self) -> Option<ResponseConfig> {
        let responses = self.responses.read();
        if responses.is_empty() {
            return None;
        }
        let index = self.cursor.next_for(&responses);
        responses.get(index).cloned()
    }

    pub fn responses(&self) -> Vec<ResponseConfig> {
        self.responses.read().clone()
    }

    pub fn into_responses(self) -> Vec<ResponseConfig> {
        self.responses.into_inner()
    }

    /// Append responses (recorded proxy traffic).
    pub fn append_responses(&self, more: Vec<ResponseConfig>) {
        self.responses.write().extend(more);
    }

    pub fn record_match(&self, entry: Match) {
        self.matches.lock().push(entry);
    }

    pub fn matches(&self) -> Vec<Match> {
        self.matches.lock().clone()
    }

    /// JSON definition: the original fields, the current responses, and any
    /// recorded matches.
    pub fn to_json(&self) -> Value {
        let mut json = self.extra.clone();
        json.insert(
            "predicates".to_string(),
            Value::Array(self.raw_predicates.clone()),
        );
        json.insert(
            "responses".to_string(),
            Value::Array(self.responses.read().iter().map(|r| r.raw.clone()).collect()),
        );
        let matches = self.matches();
        if !matches.is_empty() {
            json.insert(
                "matches".to_string(),
                serde_json::to_value(matches).unwrap_or_default(),
            );
        }
        Value::Object(json)
    }
}
