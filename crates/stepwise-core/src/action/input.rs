//! ActionInput type definition

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Resolved parameters handed to an action
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ActionInput {
    #[serde(default)]
    pub params: Map<String, Value>,
}

impl ActionInput {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_params(params: Map<String, Value>) -> Self {
        Self { params }
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.params.get(key)
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.params.get(key).and_then(|v| v.as_str())
    }

    /// Get a parameter by JSON pointer (e.g. "/meta/count")
    pub fn get_param(&self, pointer: &str) -> Option<&Value> {
        let (head, rest) = match pointer.strip_prefix('/') {
            Some(tail) => tail.split_once('/').map_or((tail, ""), |(h, r)| (h, r)),
            None => return None,
        };
        let value = self.params.get(head)?;
        if rest.is_empty() {
            Some(value)
        } else {
            value.pointer(&format!("/{}", rest))
        }
    }
}
