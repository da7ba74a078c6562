//! Plan run state machine

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

use crate::context::ExecutionContext;

/// Strongly-typed Run ID.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(transparent)]
pub struct RunId(pub String);

impl RunId {
    /// Allocate a fresh random run id
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for RunId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for RunId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl AsRef<str> for RunId {
    fn as_ref(&self) -> &str {
        self.as_str()
    }
}

/// Run state machine: `Pending -> Running -> {Completed, PartiallyFailed, Failed, Cancelled}`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Pending,
    Running,
    Completed,
    PartiallyFailed,
    Failed,
    Cancelled,
}

impl RunStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RunStatus::Completed
                | RunStatus::PartiallyFailed
                | RunStatus::Failed
                | RunStatus::Cancelled
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Pending => "pending",
            RunStatus::Running => "running",
            RunStatus::Completed => "completed",
            RunStatus::PartiallyFailed => "partially_failed",
            RunStatus::Failed => "failed",
            RunStatus::Cancelled => "cancelled",
        }
    }

    fn can_transition_to(&self, next: RunStatus) -> bool {
        match self {
            RunStatus::Pending => next == RunStatus::Running,
            RunStatus::Running => next.is_terminal(),
            _ => false,
        }
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("run '{run_id}' cannot move from {from} to {to}")]
pub struct RunStateError {
    pub run_id: RunId,
    pub from: RunStatus,
    pub to: RunStatus,
}

/// The only mutable entity of a run: status, per-step results and timing.
#[derive(Debug)]
pub struct PlanRun {
    pub run_id: RunId,
    status: RunStatus,
    pub results: ExecutionContext,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl PlanRun {
    pub fn new(run_id: RunId) -> Self {
        Self {
            run_id,
            status: RunStatus::Pending,
            results: ExecutionContext::new(),
            started_at: None,
            completed_at: None,
        }
    }

    pub fn status(&self) -> RunStatus {
        self.status
    }

    /// Transition `Pending -> Running` and stamp the start time.
    pub fn start(&mut self) -> Result<(), RunStateError> {
        self.transition(RunStatus::Running)?;
        self.started_at = Some(Utc::now());
        Ok(())
    }

    /// Transition `Running -> terminal` and stamp the completion time.
    pub fn finish(&mut self, status: RunStatus) -> Result<(), RunStateError> {
        self.transition(status)?;
        self.completed_at = Some(Utc::now());
        Ok(())
    }

    fn transition(&mut self, next: RunStatus) -> Result<(), RunStateError> {
        if !self.status.can_transition_to(next) {
            return Err(RunStateError {
                run_id: self.run_id.clone(),
                from: self.status,
                to: next,
            });
        }
        self.status = next;
        Ok(())
    }
}
