//! Configuration types for response behaviors.

use super::copy::CopyBehavior;
use super::lookup::LookupBehavior;
use super::wait::WaitBehavior;
use crate::error::{DecoyError, Result};
use crate::scripting;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::marker::PhantomData;

/// Response behaviors that modify how responses are generated
#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Behaviors {
    /// Add latency before response
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wait: Option<WaitBehavior>,

    /// Repeat response N times before advancing to next
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repeat: Option<u32>,

    /// Copy fields from request to response
    #[serde(
        default,
        deserialize_with = "one_or_many",
        skip_serializing_if = "Vec::is_empty"
    )]
    pub copy: Vec<CopyBehavior>,

    /// Lookup from external data source
    #[serde(
        default,
        deserialize_with = "one_or_many",
        skip_serializing_if = "Vec::is_empty"
    )]
    pub lookup: Vec<LookupBehavior>,

    /// Shell commands that transform the response, run in order
    #[serde(
        default,
        deserialize_with = "one_or_many",
        skip_serializing_if = "Vec::is_empty"
    )]
    pub shell_transform: Vec<String>,

    /// Script that post-processes the response
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub decorate: Option<String>,
}

impl Behaviors {
    /// Parse and validate a `_behaviors` object.
    ///
    /// Function-valued `wait`, `shellTransform` and `decorate` need injection;
    /// without it they are rejected here.
    pub fn parse(value: &Value, allow_injection: bool) -> Result<Self> {
        if !value.is_object() {
            return Err(DecoyError::validation_with_source(
                "_behaviors must be an object",
                value,
            ));
        }
        let behaviors = Self::deserialize(value).map_err(|e| {
            DecoyError::validation_with_source(format!("malformed behaviors: {e}"), value)
        })?;

        if !allow_injection {
            if behaviors.wait.as_ref().is_some_and(WaitBehavior::requires_injection) {
                return Err(scripting::injection_disabled(&value["wait"]));
            }
            if let Some(commands) = value.get("shellTransform") {
                return Err(scripting::injection_disabled(commands));
            }
            if let Some(decorate) = value.get("decorate") {
                return Err(scripting::injection_disabled(decorate));
            }
        }

        behaviors.validate(value)?;
        Ok(behaviors)
    }

    fn validate(&self, source: &Value) -> Result<()> {
        if self.repeat == Some(0) {
            return Err(DecoyError::validation_with_source(
                "repeat behavior \"repeat\" field must be an integer greater than 0",
                source,
            ));
        }
        if let Some(wait) = &self.wait {
            wait.validate()?;
        }
        for copy in &self.copy {
            copy.extraction.validate()?;
        }
        for lookup in &self.lookup {
            lookup.key.extraction.validate()?;
            lookup.from_data_source.csv.validate()?;
        }
        Ok(())
    }

    pub fn is_empty(&self) -> bool {
        self == &Self::default()
    }
}

/// Fold the `behaviors` array form into the `_behaviors` object form.
///
/// List-valued behaviors accumulate in order; scalar behaviors keep the last
/// value given.
pub fn normalize_behaviors(list: &[Value]) -> Result<Value> {
    let mut merged = Map::new();
    for entry in list {
        let Value::Object(entry) = entry else {
            return Err(DecoyError::validation_with_source(
                "each entry of behaviors must be an object",
                entry,
            ));
        };
        for (key, value) in entry {
            match key.as_str() {
                "copy" | "lookup" | "shellTransform" => {
                    let slot = merged
                        .entry(key.clone())
                        .or_insert_with(|| Value::Array(Vec::new()));
                    if let Value::Array(items) = slot {
                        match value {
                            Value::Array(values) => items.extend(values.iter().cloned()),
                            other => items.push(other.clone()),
                        }
                    }
                }
                _ => {
                    merged.insert(key.clone(), value.clone());
                }
            }
        }
    }
    Ok(Value::Object(merged))
}

/// Accept either one item or an array of items
fn one_or_many<'de, D, T>(deserializer: D) -> std::result::Result<Vec<T>, D::Error>
where
    D: serde::Deserializer<'de>,
    T: Deserialize<'de>,
{
    use serde::de::{self, IntoDeserializer, Visitor};

    struct OneOrMany<T>(PhantomData<T>);

    impl<'de, T: Deserialize<'de>> Visitor<'de> for OneOrMany<T> {
        type Value = Vec<T>;

        fn expecting(&self, formatter: &mut std::fmt::Formatter) -> std::fmt::Result {
            formatter.write_str("a behavior or an array of behaviors")
        }

        fn visit_seq<A>(self, mut seq: A) -> std::result::Result<Self::Value, A::Error>
        where
            A: de::SeqAccess<'de>,
        {
            let mut items = Vec::new();
            while let Some(item) = seq.next_element()? {
                items.push(item);
            }
            Ok(items)
        }

        fn visit_map<M>(self, map: M) -> std::result::Result<Self::Value, M::Error>
        where
            M: de::MapAccess<'de>,
        {
            let item = T::deserialize(de::value::MapAccessDeserializer::new(map))?;
            Ok(vec![item])
        }

        fn visit_str<E>(self, value: &str) -> std::result::Result<Self::Value, E>
        where
            E: de::Error,
        {
            let item = T::deserialize(value.into_deserializer())?;
            Ok(vec![item])
        }
    }

    deserializer.deserialize_any(OneOrMany(PhantomData))
}
