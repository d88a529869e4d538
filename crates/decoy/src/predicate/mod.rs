//! Mountebank-compatible predicate engine.
//!
//! A predicate is parsed once from its JSON form into a [`Predicate`] tree and
//! evaluated against the JSON view of a normalized request. Parsing performs
//! every structural check (unknown operators, malformed regexes and
//! selectors, binary-mode restrictions, injection permission) so that
//! evaluation only fails for problems that depend on the request.
//!
//! # Module Structure
//!
//! - `extract` - field lookup shared with behaviors and proxy recording
//! - `selector` - XPath / JSONPath sub-selection
//! - `normalize` - case, `except`, binary and selector normalization
//! - `compare` - operator semantics over normalized values

mod compare;
pub mod extract;
mod normalize;
pub mod selector;

use crate::config::Mode;
use crate::error::{DecoyError, Result};
use crate::scripting::{self, ScriptState};
use compare::{Patterns, Test};
use normalize::Params;
use serde_json::{Map, Value};

pub use selector::Selector;

/// Field operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operator {
    Equals,
    DeepEquals,
    Contains,
    StartsWith,
    EndsWith,
    Matches,
    Exists,
}

impl Operator {
    pub fn from_key(key: &str) -> Option<Self> {
        Some(match key {
            "equals" => Operator::Equals,
            "deepEquals" => Operator::DeepEquals,
            "contains" => Operator::Contains,
            "startsWith" => Operator::StartsWith,
            "endsWith" => Operator::EndsWith,
            "matches" => Operator::Matches,
            "exists" => Operator::Exists,
            _ => return None,
        })
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Operator::Equals => "equals",
            Operator::DeepEquals => "deepEquals",
            Operator::Contains => "contains",
            Operator::StartsWith => "startsWith",
            Operator::EndsWith => "endsWith",
            Operator::Matches => "matches",
            Operator::Exists => "exists",
        }
    }
}

const COMBINATORS: [&str; 4] = ["not", "and", "or", "inject"];

#[derive(Debug, Clone)]
pub enum PredicateKind {
    Compare {
        operator: Operator,
        expected: Map<String, Value>,
    },
    Not(Box<Predicate>),
    And(Vec<Predicate>),
    Or(Vec<Predicate>),
    Inject(String),
}

/// Parsed predicate node.
#[derive(Debug, Clone)]
pub struct Predicate {
    kind: PredicateKind,
    params: Params,
    /// Compiled `matches` operand; empty for other operators.
    patterns: Patterns,
    raw: Value,
}

/// Settings that decide what a predicate may contain.
#[derive(Debug, Clone, Copy, Default)]
pub struct ParseOptions {
    pub mode: Mode,
    pub allow_injection: bool,
}

/// Per-evaluation inputs beyond the request.
#[derive(Clone, Copy)]
pub struct EvalContext<'a> {
    pub mode: Mode,
    /// Dry runs never execute injected predicates.
    pub dry_run: bool,
    pub state: &'a ScriptState,
}

impl Predicate {
    pub fn parse(value: &Value, options: &ParseOptions) -> Result<Self> {
        let config = value
            .as_object()
            .ok_or_else(|| DecoyError::validation_with_source("missing predicate", value))?;
        let params = Params::from_config(config)?;

        if options.mode.is_binary() && params.selector().is_some_and(Selector::is_xpath) {
            return Err(DecoyError::validation_with_source(
                "the xpath predicate parameter is not allowed in binary mode",
                value,
            ));
        }
        if options.mode.is_binary() && params.has_except() {
            return Err(DecoyError::validation_with_source(
                "the except predicate parameter is not allowed in binary mode",
                value,
            ));
        }

        let mut patterns = Patterns::default();
        let kind = if let Some((key, operand)) = config
            .iter()
            .find(|(k, _)| Operator::from_key(k).is_some())
        {
            let operator = Operator::from_key(key)
                .ok_or_else(|| DecoyError::validation_with_source("missing predicate", value))?;
            if operator == Operator::Matches {
                if options.mode.is_binary() {
                    return Err(DecoyError::validation_with_source(
                        "the matches predicate is not allowed in binary mode",
                        value,
                    ));
                }
                let normalized = params.expected(operand, true, false, false);
                patterns = Patterns::compile(&normalized, params.case_sensitive).map_err(|_| {
                    DecoyError::validation_with_source("invalid regular expression", value)
                })?;
            }
            Self::parse_compare(operator, operand, value)?
        } else if let Some((key, operand)) =
            config.iter().find(|(k, _)| COMBINATORS.contains(&k.as_str()))
        {
            match key.as_str() {
                "not" => PredicateKind::Not(Box::new(Predicate::parse(operand, options)?)),
                "and" => PredicateKind::And(Self::parse_list(key, operand, options)?),
                "or" => PredicateKind::Or(Self::parse_list(key, operand, options)?),
                _ => {
                    let source = operand.as_str().ok_or_else(|| {
                        DecoyError::validation_with_source(
                            "inject predicate requires a function string",
                            value,
                        )
                    })?;
                    if !options.allow_injection {
                        return Err(scripting::injection_disabled(operand));
                    }
                    PredicateKind::Inject(source.to_string())
                }
            }
        } else {
            return Err(DecoyError::validation_with_source("missing predicate", value));
        };

        Ok(Self {
            kind,
            params,
            patterns,
            raw: value.clone(),
        })
    }

    fn parse_compare(operator: Operator, operand: &Value, raw: &Value) -> Result<PredicateKind> {
        let expected = operand.as_object().cloned().ok_or_else(|| {
            DecoyError::validation_with_source(
                format!("the {} predicate requires an object", operator.as_str()),
                raw,
            )
        })?;
        Ok(PredicateKind::Compare { operator, expected })
    }

    fn parse_list(key: &str, operand: &Value, options: &ParseOptions) -> Result<Vec<Predicate>> {
        let items = operand.as_array().ok_or_else(|| {
            DecoyError::validation_with_source(
                format!("the {key} predicate requires an array"),
                operand,
            )
        })?;
        items.iter().map(|p| Predicate::parse(p, options)).collect()
    }

    pub fn kind(&self) -> &PredicateKind {
        &self.kind
    }

    /// JSON form the predicate was parsed from.
    pub fn raw(&self) -> &Value {
        &self.raw
    }

    /// Whether evaluating this predicate can run an `inject` script.
    pub fn uses_injection(&self) -> bool {
        match &self.kind {
            PredicateKind::Inject(_) => true,
            PredicateKind::Not(inner) => inner.uses_injection(),
            PredicateKind::And(items) | PredicateKind::Or(items) => {
                items.iter().any(Predicate::uses_injection)
            }
            PredicateKind::Compare { .. } => false,
        }
    }

    pub fn evaluate(&self, request: &Value, ctx: &EvalContext<'_>) -> Result<bool> {
        match &self.kind {
            PredicateKind::Compare { operator, expected } => {
                self.compare(*operator, expected, request, ctx.mode)
            }
            PredicateKind::Not(inner) => Ok(!inner.evaluate(request, ctx)?),
            PredicateKind::And(items) => {
                for item in items {
                    if !item.evaluate(request, ctx)? {
                        return Ok(false);
                    }
                }
                Ok(true)
            }
            PredicateKind::Or(items) => {
                for item in items {
                    if item.evaluate(request, ctx)? {
                        return Ok(true);
                    }
                }
                Ok(false)
            }
            PredicateKind::Inject(source) => {
                if ctx.dry_run {
                    return Ok(true);
                }
                scripting::inject_predicate(source, request, ctx.state)
            }
        }
    }

    fn compare(
        &self,
        operator: Operator,
        expected: &Map<String, Value>,
        request: &Value,
        mode: Mode,
    ) -> Result<bool> {
        let binary = mode.is_binary();
        if binary && operator == Operator::Matches {
            return Err(DecoyError::validation_with_source(
                "the matches predicate is not allowed in binary mode",
                &self.raw,
            ));
        }
        if binary && self.params.selector().is_some_and(Selector::is_xpath) {
            return Err(DecoyError::validation_with_source(
                "the xpath predicate parameter is not allowed in binary mode",
                &self.raw,
            ));
        }
        if binary && self.params.has_except() {
            return Err(DecoyError::validation_with_source(
                "the except predicate parameter is not allowed in binary mode",
                &self.raw,
            ));
        }

        let is_matches = operator == Operator::Matches;
        let expected = match self.params.expected(
            &Value::Object(expected.clone()),
            is_matches,
            operator == Operator::Exists,
            binary,
        ) {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        let lowercase = !self.params.case_sensitive && !is_matches;
        let actual = self.params.actual(request, expected.keys(), lowercase, binary);

        Ok(match operator {
            Operator::DeepEquals => compare::deep_equals(&expected, &actual),
            Operator::Equals => compare::fields_satisfied(&expected, &actual, Test::Equals),
            Operator::Contains => compare::fields_satisfied(&expected, &actual, Test::Contains),
            Operator::StartsWith => compare::fields_satisfied(&expected, &actual, Test::StartsWith),
            Operator::EndsWith => compare::fields_satisfied(&expected, &actual, Test::EndsWith),
            Operator::Exists => compare::fields_satisfied(&expected, &actual, Test::Exists),
            Operator::Matches => {
                compare::fields_satisfied(&expected, &actual, Test::Matches(&self.patterns))
            }
        })
    }
}

/// Parse a stub's predicate array.
pub fn parse_all(values: &[Value], options: &ParseOptions) -> Result<Vec<Predicate>> {
    values.iter().map(|v| Predicate::parse(v, options)).collect()
}

/// Implicit AND over a predicate array, short-circuiting left to right.
pub fn all_match(predicates: &[Predicate], request: &Value, ctx: &EvalContext<'_>) -> Result<bool> {
    for predicate in predicates {
        if !predicate.evaluate(request, ctx)? {
            return Ok(false);
        }
    }
    Ok(true)
}
