//! Lifecycle events of a run.
//!
//! Events of one run carry a strictly increasing `seq`. Per step,
//! `step-started` always precedes that step's `step-completed` or
//! `step-failed`, and `run-finished` is always the last event of a run.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::RwLock;

use crate::types::{RunId, StepId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RunEventType {
    RunStarted,
    StepStarted,
    StepRetrying,
    StepCompleted,
    /// The step ran and ended Failed, Timeout or Cancelled
    StepFailed,
    /// The step never reached the adapter (Skipped or Cancelled)
    StepSkipped,
    RunCancelRequested,
    RunFinished,
}

impl RunEventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunEventType::RunStarted => "run-started",
            RunEventType::StepStarted => "step-started",
            RunEventType::StepRetrying => "step-retrying",
            RunEventType::StepCompleted => "step-completed",
            RunEventType::StepFailed => "step-failed",
            RunEventType::StepSkipped => "step-skipped",
            RunEventType::RunCancelRequested => "run-cancel-requested",
            RunEventType::RunFinished => "run-finished",
        }
    }

    pub fn is_terminal(&self) -> bool {
        *self == RunEventType::RunFinished
    }
}

impl fmt::Display for RunEventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A discrete, ordered status notification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunEvent {
    #[serde(rename = "type")]
    pub event_type: RunEventType,
    pub run_id: RunId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step_id: Option<StepId>,
    pub seq: u64,
    pub at: DateTime<Utc>,
    #[serde(default)]
    pub payload: Value,
}

/// Sink interface for lifecycle events.
#[async_trait]
pub trait RunEventReporter: Send + Sync {
    async fn report(&self, event: RunEvent) -> Result<(), String>;
}

/// Per-run event emitter fanning out to every attached reporter.
pub struct RunEvents {
    run_id: RunId,
    seq: AtomicU64,
    reporters: Vec<Arc<dyn RunEventReporter>>,
}

impl RunEvents {
    pub fn new(run_id: RunId) -> Self {
        Self {
            run_id,
            seq: AtomicU64::new(0),
            reporters: Vec::new(),
        }
    }

    pub fn with_reporter(mut self, reporter: Arc<dyn RunEventReporter>) -> Self {
        self.reporters.push(reporter);
        self
    }

    pub fn run_id(&self) -> &RunId {
        &self.run_id
    }

    /// Number of events emitted so far
    pub fn emitted(&self) -> u64 {
        self.seq.load(Ordering::SeqCst)
    }

    /// Stamp and deliver one event. Reporter failures are logged and dropped;
    /// a broken sink never affects the run.
    pub async fn emit(
        &self,
        event_type: RunEventType,
        step_id: Option<&StepId>,
        payload: Value,
    ) -> RunEvent {
        let event = RunEvent {
            event_type,
            run_id: self.run_id.clone(),
            step_id: step_id.cloned(),
            seq: self.seq.fetch_add(1, Ordering::SeqCst) + 1,
            at: Utc::now(),
            payload,
        };
        for reporter in &self.reporters {
            if let Err(err) = reporter.report(event.clone()).await {
                tracing::warn!(
                    run_id = %self.run_id,
                    event = %event_type,
                    "failed to report run event: {}",
                    err
                );
            }
        }
        event
    }
}

impl fmt::Debug for RunEvents {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RunEvents")
            .field("run_id", &self.run_id)
            .field("seq", &self.seq)
            .field("reporters", &self.reporters.len())
            .finish()
    }
}

/// Reporter that keeps every event in memory.
#[derive(Default)]
pub struct CollectingReporter {
    events: RwLock<Vec<RunEvent>>,
}

impl CollectingReporter {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn events(&self) -> Vec<RunEvent> {
        self.events.read().await.clone()
    }

    pub async fn event_types(&self) -> Vec<RunEventType> {
        self.events
            .read()
            .await
            .iter()
            .map(|e| e.event_type)
            .collect()
    }
}

#[async_trait]
impl RunEventReporter for CollectingReporter {
    async fn report(&self, event: RunEvent) -> Result<(), String> {
        self.events.write().await.push(event);
        Ok(())
    }
}
