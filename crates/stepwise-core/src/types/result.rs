//! Step result type definitions

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

use super::StepId;

/// Terminal status of a single step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Completed,
    Failed,
    Timeout,
    Skipped,
    Cancelled,
}

impl StepStatus {
    /// Whether dependents of a step ending in this status must be skipped.
    pub fn cascades(&self) -> bool {
        matches!(
            self,
            StepStatus::Failed | StepStatus::Timeout | StepStatus::Cancelled | StepStatus::Skipped
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            StepStatus::Completed => "completed",
            StepStatus::Failed => "failed",
            StepStatus::Timeout => "timeout",
            StepStatus::Skipped => "skipped",
            StepStatus::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for StepStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Normalized error code attached to every non-completed step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    /// A template reference could not be resolved
    TemplateResolution,
    /// The tool handler reported a failure
    Executor,
    /// The step exceeded its time budget
    Timeout,
    /// The run was cancelled before or while the step ran
    Cancelled,
    /// An upstream step did not complete
    DependencyFailed,
    /// No executor is registered for the action
    ActionNotFound,
    /// Resolved parameters violate the action input schema
    InvalidInput,
    /// Handler output violates the action output schema
    InvalidOutput,
    /// The handler panicked
    Panicked,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::TemplateResolution => "template_resolution",
            ErrorCode::Executor => "executor",
            ErrorCode::Timeout => "timeout",
            ErrorCode::Cancelled => "cancelled",
            ErrorCode::DependencyFailed => "dependency_failed",
            ErrorCode::ActionNotFound => "action_not_found",
            ErrorCode::InvalidInput => "invalid_input",
            ErrorCode::InvalidOutput => "invalid_output",
            ErrorCode::Panicked => "panicked",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Normalized step error: code plus human-readable message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepError {
    pub code: ErrorCode,
    pub message: String,
}

impl StepError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

impl fmt::Display for StepError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code, self.message)
    }
}

/// Outcome of one step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepResult {
    pub status: StepStatus,
    /// Output fields; empty unless the step completed
    #[serde(default)]
    pub output: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<StepError>,
}

impl StepResult {
    pub fn completed(output: Map<String, Value>) -> Self {
        Self {
            status: StepStatus::Completed,
            output,
            error: None,
        }
    }

    pub fn failed(code: ErrorCode, message: impl Into<String>) -> Self {
        Self::with_error(StepStatus::Failed, StepError::new(code, message))
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::with_error(
            StepStatus::Timeout,
            StepError::new(ErrorCode::Timeout, message),
        )
    }

    pub fn cancelled(message: impl Into<String>) -> Self {
        Self::with_error(
            StepStatus::Cancelled,
            StepError::new(ErrorCode::Cancelled, message),
        )
    }

    /// Skipped because `upstream` ended without completing.
    pub fn skipped(upstream: &StepId, upstream_status: StepStatus) -> Self {
        Self::with_error(
            StepStatus::Skipped,
            StepError::new(
                ErrorCode::DependencyFailed,
                format!("dependency '{}' ended as {}", upstream, upstream_status),
            ),
        )
    }

    fn with_error(status: StepStatus, error: StepError) -> Self {
        Self {
            status,
            output: Map::new(),
            error: Some(error),
        }
    }

    pub fn is_completed(&self) -> bool {
        self.status == StepStatus::Completed
    }

    pub fn error_code(&self) -> Option<ErrorCode> {
        self.error.as_ref().map(|e| e.code)
    }
}
