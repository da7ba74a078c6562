//! Final report of a run.
//!
//! The report enumerates every declared step, in plan order, with exactly one
//! terminal status each.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::types::{RunId, RunStatus, StepError, StepId, StepResult, StepStatus};
use crate::validator::ValidationIssue;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepReport {
    pub step_id: StepId,
    pub action: String,
    pub status: StepStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<StepError>,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub output: Map<String, Value>,
}

impl StepReport {
    pub fn new(step_id: StepId, action: impl Into<String>, result: &StepResult) -> Self {
        Self {
            step_id,
            action: action.into(),
            status: result.status,
            error: result.error.clone(),
            output: result.output.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunReport {
    pub run_id: RunId,
    pub goal: String,
    pub status: RunStatus,
    pub steps: Vec<StepReport>,
    /// Validation warnings of the accepted plan
    #[serde(default)]
    pub warnings: Vec<ValidationIssue>,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
}

impl RunReport {
    pub fn step(&self, id: &str) -> Option<&StepReport> {
        self.steps.iter().find(|s| s.step_id.as_str() == id)
    }

    pub fn counts(&self) -> StatusCounts {
        StatusCounts::from_statuses(self.steps.iter().map(|s| s.status))
    }

    pub fn duration_ms(&self) -> Option<i64> {
        match (self.started_at, self.completed_at) {
            (Some(start), Some(end)) => Some((end - start).num_milliseconds()),
            _ => None,
        }
    }

    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or_else(|err| {
            tracing::warn!(run_id = %self.run_id, "failed to serialize run report: {}", err);
            Value::Null
        })
    }
}

/// Per-status step counts
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusCounts {
    pub completed: usize,
    pub failed: usize,
    pub timeout: usize,
    pub skipped: usize,
    pub cancelled: usize,
}

impl StatusCounts {
    pub fn from_statuses(statuses: impl IntoIterator<Item = StepStatus>) -> Self {
        let mut counts = Self::default();
        for status in statuses {
            match status {
                StepStatus::Completed => counts.completed += 1,
                StepStatus::Failed => counts.failed += 1,
                StepStatus::Timeout => counts.timeout += 1,
                StepStatus::Skipped => counts.skipped += 1,
                StepStatus::Cancelled => counts.cancelled += 1,
            }
        }
        counts
    }

    pub fn total(&self) -> usize {
        self.completed + self.failed + self.timeout + self.skipped + self.cancelled
    }

    /// Overall run status.
    ///
    /// Completed when every step completed, even if a cancel arrived late.
    /// Otherwise Cancelled once a cancellation was observed, else Failed
    /// when no step completed and PartiallyFailed in between.
    pub fn run_status(&self, cancel_observed: bool) -> RunStatus {
        if self.completed == self.total() {
            RunStatus::Completed
        } else if cancel_observed {
            RunStatus::Cancelled
        } else if self.completed == 0 {
            RunStatus::Failed
        } else {
            RunStatus::PartiallyFailed
        }
    }
}
