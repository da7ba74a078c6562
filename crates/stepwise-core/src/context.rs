//! Execution context: accumulated step results of a run.
//!
//! Each slot is written exactly once, by the owning step's execution attempt.
//! Stored results are shared behind `Arc` and never mutated afterwards, so a
//! dependent always reads a complete snapshot.

use std::collections::HashMap;
use std::sync::Arc;

use thiserror::Error;

use crate::types::{StepId, StepResult};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ContextError {
    #[error("result for step '{0}' was already recorded")]
    AlreadyRecorded(StepId),
}

#[derive(Debug, Clone, Default)]
pub struct ExecutionContext {
    results: HashMap<StepId, Arc<StepResult>>,
}

impl ExecutionContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a step's result. A second write to the same slot is rejected
    /// and leaves the first result untouched.
    pub fn record(
        &mut self,
        step_id: StepId,
        result: StepResult,
    ) -> Result<Arc<StepResult>, ContextError> {
        if self.results.contains_key(&step_id) {
            return Err(ContextError::AlreadyRecorded(step_id));
        }
        let result = Arc::new(result);
        self.results.insert(step_id, result.clone());
        Ok(result)
    }

    pub fn get(&self, step_id: &str) -> Option<&Arc<StepResult>> {
        self.results.get(step_id)
    }

    pub fn contains(&self, step_id: &StepId) -> bool {
        self.results.contains_key(step_id)
    }

    pub fn len(&self) -> usize {
        self.results.len()
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&StepId, &Arc<StepResult>)> {
        self.results.iter()
    }
}
