//! ActionResult type definition

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::time::Duration;

/// Action execution result with retry semantics
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ActionResult {
    /// Execution succeeded; `output` becomes the step's result fields
    Success {
        #[serde(default)]
        output: Map<String, Value>,
    },

    /// Transient failure (rate limit, flaky upstream). Retried by the
    /// adapter while the retry budget lasts.
    RetryableError {
        message: String,
        /// Suggested wait before the next attempt
        #[serde(default, with = "optional_duration_serde")]
        retry_after: Option<Duration>,
        #[serde(default)]
        attempt: u32,
    },

    /// Non-recoverable error
    Error { message: String },
}

impl ActionResult {
    /// Success with no output fields
    pub fn success() -> Self {
        Self::Success { output: Map::new() }
    }

    pub fn success_with(output: Map<String, Value>) -> Self {
        Self::Success { output }
    }

    pub fn success_with_one(key: impl Into<String>, value: Value) -> Self {
        let mut output = Map::new();
        output.insert(key.into(), value);
        Self::Success { output }
    }

    pub fn retryable(
        message: impl Into<String>,
        retry_after: Option<Duration>,
        attempt: u32,
    ) -> Self {
        Self::RetryableError {
            message: message.into(),
            retry_after,
            attempt,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            message: message.into(),
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::RetryableError { .. })
    }
}

/// Serde support for Option<Duration> as milliseconds
mod optional_duration_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match duration {
            Some(d) => (d.as_millis() as u64).serialize(serializer),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis: Option<u64> = Option::deserialize(deserializer)?;
        Ok(millis.map(Duration::from_millis))
    }
}
