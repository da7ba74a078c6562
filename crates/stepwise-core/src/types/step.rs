//! Step type definitions
//!
//! A step is one named action invocation inside a plan.

use serde::de::{self, Deserializer, Visitor};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::borrow::Borrow;
use std::fmt;

/// Strongly-typed Step ID.
///
/// Planners emit ids both as strings (`"s1"`) and as bare integers (`1`),
/// so deserialization accepts either and keeps the textual form.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Default)]
#[serde(transparent)]
pub struct StepId(pub String);

impl StepId {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for StepId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for StepId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<&StepId> for StepId {
    fn from(value: &StepId) -> Self {
        value.clone()
    }
}

impl From<u64> for StepId {
    fn from(value: u64) -> Self {
        Self(value.to_string())
    }
}

impl From<StepId> for String {
    fn from(value: StepId) -> Self {
        value.0
    }
}

impl fmt::Display for StepId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl Borrow<str> for StepId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl AsRef<str> for StepId {
    fn as_ref(&self) -> &str {
        self.as_str()
    }
}

impl PartialEq<&str> for StepId {
    fn eq(&self, other: &&str) -> bool {
        self.as_str() == *other
    }
}

impl<'de> Deserialize<'de> for StepId {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct StepIdVisitor;

        impl<'de> Visitor<'de> for StepIdVisitor {
            type Value = StepId;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a step id string or non-negative integer")
            }

            fn visit_str<E: de::Error>(self, value: &str) -> Result<StepId, E> {
                Ok(StepId::from(value))
            }

            fn visit_string<E: de::Error>(self, value: String) -> Result<StepId, E> {
                Ok(StepId(value))
            }

            fn visit_u64<E: de::Error>(self, value: u64) -> Result<StepId, E> {
                Ok(StepId::from(value))
            }

            fn visit_i64<E: de::Error>(self, value: i64) -> Result<StepId, E> {
                u64::try_from(value)
                    .map(StepId::from)
                    .map_err(|_| E::custom(format!("negative step id {}", value)))
            }
        }

        deserializer.deserialize_any(StepIdVisitor)
    }
}

/// A single step in the execution plan
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Step {
    /// Unique identifier for this step within its plan
    pub id: StepId,
    /// Name of the action to execute
    pub action: String,
    /// Parameters for the action; values may embed template references
    #[serde(default, alias = "parameters")]
    pub params: Map<String, Value>,
    /// IDs of steps this step depends on
    #[serde(default, alias = "dependencies", alias = "deps")]
    pub depends_on: Vec<StepId>,
    /// Planner rationale, carried for reporting only
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning: Option<String>,
    /// Planner's description of the expected output, carried for reporting only
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected_output: Option<String>,
}

impl Step {
    /// Create a new action step
    pub fn action(id: impl Into<StepId>, action: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            action: action.into(),
            params: Map::new(),
            depends_on: Vec::new(),
            reasoning: None,
            expected_output: None,
        }
    }

    /// Add dependencies
    pub fn with_depends_on(mut self, deps: Vec<StepId>) -> Self {
        self.depends_on = deps;
        self
    }

    /// Set parameters from a JSON object. Non-object values are ignored.
    pub fn with_params(mut self, params: Value) -> Self {
        if let Value::Object(map) = params {
            self.params = map;
        }
        self
    }

    /// Set a single parameter
    pub fn with_param(mut self, key: impl Into<String>, value: Value) -> Self {
        self.params.insert(key.into(), value);
        self
    }

    /// Whether this step lists `id` among its dependencies
    pub fn depends_on_step(&self, id: &StepId) -> bool {
        self.depends_on.iter().any(|dep| dep == id)
    }
}
