//! ActionContext type definition

use tokio_util::sync::CancellationToken;

use crate::types::{RunId, StepId};

/// Execution context for actions
#[derive(Clone)]
pub struct ActionContext {
    pub run_id: RunId,
    /// Step ID (logical ID)
    pub step_id: StepId,
    /// Runtime ID of this attempt; differs across retries of the same step
    pub execution_id: String,
    /// Cancelled when the run is cancelled or the step times out.
    /// Long-running actions should check it and return early.
    pub cancellation_token: CancellationToken,
}

impl ActionContext {
    pub fn new(
        run_id: impl Into<RunId>,
        step_id: impl Into<StepId>,
        execution_id: impl Into<String>,
        cancellation_token: CancellationToken,
    ) -> Self {
        Self {
            run_id: run_id.into(),
            step_id: step_id.into(),
            execution_id: execution_id.into(),
            cancellation_token,
        }
    }

    /// Generate a new execution ID
    pub fn new_execution_id() -> String {
        uuid::Uuid::new_v4().to_string()
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancellation_token.is_cancelled()
    }

    /// Completes when cancellation is requested
    pub async fn cancelled(&self) {
        self.cancellation_token.cancelled().await
    }
}

impl std::fmt::Debug for ActionContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActionContext")
            .field("run_id", &self.run_id)
            .field("step_id", &self.step_id)
            .field("execution_id", &self.execution_id)
            .finish_non_exhaustive()
    }
}
