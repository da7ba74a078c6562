//! Step execution adapter.
//!
//! Dispatches one resolved step to its action and normalizes whatever
//! happens into a `StepResult`. Handler errors and panics never escape.
//! Timeout and cancellation share the same terminate path: the step's token
//! is cancelled and the handler task aborted.

use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Map, Value};
use tokio::task::JoinError;
use tokio::time::{sleep, sleep_until, Instant};
use tokio_util::sync::CancellationToken;

use super::{truncate_for_log, truncate_json_for_log, MAX_LOG_JSON_CHARS, MAX_LOG_TEXT_CHARS};
use crate::action::{Action, ActionContext, ActionInput, ActionMeta, ActionResult};
use crate::lifecycle::{RunEventType, RunEvents};
use crate::schema::validate_schema;
use crate::types::{ErrorCode, RunId, Step, StepResult};

pub const DEFAULT_STEP_TIMEOUT: Duration = Duration::from_secs(60);
const DEFAULT_RETRY_BASE_DELAY: Duration = Duration::from_millis(200);
const DEFAULT_RETRY_MAX_DELAY: Duration = Duration::from_secs(5);

/// An action resolved from the registry together with its contract.
#[derive(Clone)]
pub struct ResolvedAction {
    pub action: Arc<dyn Action>,
    pub meta: ActionMeta,
}

impl ResolvedAction {
    pub fn new(action: Arc<dyn Action>) -> Self {
        let meta = action.metadata();
        Self { action, meta }
    }
}

/// Retry policy for `ActionResult::RetryableError`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the initial attempt
    pub max_retries: u32,
    /// Base delay for exponential backoff when the action gives no hint
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_retries: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_retries,
            base_delay,
            max_delay: max_delay.max(base_delay),
        }
    }

    pub fn backoff(&self, retries_used: u32) -> Duration {
        let base_ms = self.base_delay.as_millis();
        if base_ms == 0 {
            return Duration::from_millis(0);
        }
        let max_ms = self.max_delay.as_millis().max(base_ms);
        let shift = retries_used.min(20);
        let multiplier = 1u128 << shift;
        let backoff_ms = base_ms.saturating_mul(multiplier).min(max_ms);
        Duration::from_millis(u64::try_from(backoff_ms).unwrap_or(u64::MAX))
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(0, DEFAULT_RETRY_BASE_DELAY, DEFAULT_RETRY_MAX_DELAY)
    }
}

enum Attempt {
    Returned(ActionResult),
    TimedOut,
    Cancelled,
    Panicked(String),
}

#[derive(Debug, Clone)]
pub struct StepAdapter {
    pub default_timeout: Duration,
    /// How long an in-flight handler may keep running after the run is
    /// cancelled. `None` lets it run until it returns or times out.
    pub cancel_grace: Option<Duration>,
    pub retry: RetryPolicy,
}

impl Default for StepAdapter {
    fn default() -> Self {
        Self {
            default_timeout: DEFAULT_STEP_TIMEOUT,
            cancel_grace: None,
            retry: RetryPolicy::default(),
        }
    }
}

impl StepAdapter {
    /// Execute a step whose parameters are already resolved.
    pub async fn execute(
        &self,
        step: &Step,
        handler: &ResolvedAction,
        params: Map<String, Value>,
        run_token: &CancellationToken,
        events: &RunEvents,
    ) -> StepResult {
        let run_id = events.run_id();
        if let Err(error) = validate_schema(&Value::Object(params.clone()), &handler.meta.input_schema)
        {
            tracing::warn!(
                run_id = %run_id,
                step_id = %step.id,
                action = %step.action,
                error = %error,
                "step input rejected by action schema"
            );
            return StepResult::failed(
                ErrorCode::InvalidInput,
                format!("input of action '{}' is invalid: {}", step.action, error),
            );
        }

        if tracing::enabled!(tracing::Level::DEBUG) {
            let resolved = Value::Object(params.clone());
            tracing::debug!(
                run_id = %run_id,
                step_id = %step.id,
                action = %step.action,
                resolved_params = %truncate_json_for_log(&resolved, MAX_LOG_JSON_CHARS),
                "action input resolved"
            );
        }

        let timeout = handler.meta.timeout.unwrap_or(self.default_timeout);
        let deadline = Instant::now() + timeout;
        let mut retries_used: u32 = 0;

        loop {
            let ctx = ActionContext::new(
                run_id.clone(),
                step.id.clone(),
                ActionContext::new_execution_id(),
                run_token.child_token(),
            );
            let input = ActionInput::with_params(params.clone());
            let attempt = self
                .run_attempt(handler.action.clone(), input, ctx, deadline, run_token)
                .await;

            let result = match attempt {
                Attempt::Returned(result) => result,
                Attempt::TimedOut => return timed_out(step, timeout, run_id),
                Attempt::Cancelled => {
                    tracing::warn!(
                        run_id = %run_id,
                        step_id = %step.id,
                        action = %step.action,
                        "in-flight step terminated after cancellation"
                    );
                    return StepResult::cancelled(format!(
                        "run cancelled while action '{}' was running",
                        step.action
                    ));
                }
                Attempt::Panicked(message) => {
                    tracing::error!(
                        run_id = %run_id,
                        step_id = %step.id,
                        action = %step.action,
                        panic = %truncate_for_log(&message, MAX_LOG_TEXT_CHARS),
                        "action panicked"
                    );
                    return StepResult::failed(
                        ErrorCode::Panicked,
                        format!("action '{}' panicked: {}", step.action, message),
                    );
                }
            };

            match result {
                ActionResult::Success { output } => {
                    return self.check_output(step, handler, output, run_id);
                }
                ActionResult::Error { message } => {
                    if run_token.is_cancelled() {
                        return StepResult::cancelled(format!(
                            "action '{}' stopped after cancellation: {}",
                            step.action, message
                        ));
                    }
                    tracing::error!(
                        run_id = %run_id,
                        step_id = %step.id,
                        action = %step.action,
                        error = %truncate_for_log(&message, MAX_LOG_TEXT_CHARS),
                        "action returned terminal error"
                    );
                    return StepResult::failed(ErrorCode::Executor, message);
                }
                ActionResult::RetryableError {
                    message,
                    retry_after,
                    attempt: reported_attempt,
                } => {
                    if run_token.is_cancelled() {
                        return StepResult::cancelled(format!(
                            "action '{}' stopped after cancellation: {}",
                            step.action, message
                        ));
                    }
                    if retries_used >= self.retry.max_retries {
                        let total_attempts = retries_used.saturating_add(1);
                        return StepResult::failed(
                            ErrorCode::Executor,
                            format!(
                                "{} (retry exhausted after {} attempt(s))",
                                message, total_attempts
                            ),
                        );
                    }

                    let delay = retry_after.unwrap_or_else(|| self.retry.backoff(retries_used));
                    let next_attempt = retries_used.saturating_add(1);
                    tracing::warn!(
                        run_id = %run_id,
                        step_id = %step.id,
                        action = %step.action,
                        message = %truncate_for_log(&message, MAX_LOG_TEXT_CHARS),
                        retry_attempt = next_attempt,
                        reported_attempt = reported_attempt,
                        retry_in_ms = delay.as_millis() as u64,
                        "retrying step after retryable error"
                    );
                    events
                        .emit(
                            RunEventType::StepRetrying,
                            Some(&step.id),
                            json!({
                                "action": step.action,
                                "message": truncate_for_log(&message, MAX_LOG_TEXT_CHARS),
                                "retry_attempt": next_attempt,
                                "retry_in_ms": delay.as_millis() as u64,
                                "max_retry_attempts": self.retry.max_retries,
                            }),
                        )
                        .await;

                    if !delay.is_zero() {
                        tokio::select! {
                            _ = sleep(delay) => {}
                            _ = sleep_until(deadline) => return timed_out(step, timeout, run_id),
                            _ = run_token.cancelled() => {
                                return StepResult::cancelled(format!(
                                    "run cancelled while action '{}' waited to retry",
                                    step.action
                                ));
                            }
                        }
                    }
                    retries_used = next_attempt;
                }
            }
        }
    }

    async fn run_attempt(
        &self,
        action: Arc<dyn Action>,
        input: ActionInput,
        ctx: ActionContext,
        deadline: Instant,
        run_token: &CancellationToken,
    ) -> Attempt {
        let step_token = ctx.cancellation_token.clone();
        let mut handle = tokio::spawn(async move { action.run(input, ctx).await });
        let grace = self.cancel_grace;
        let grace_expired = async move {
            match grace {
                Some(grace) => {
                    run_token.cancelled().await;
                    sleep(grace).await;
                }
                None => std::future::pending::<()>().await,
            }
        };

        tokio::select! {
            joined = &mut handle => match joined {
                Ok(result) => Attempt::Returned(result),
                Err(err) => Attempt::Panicked(panic_message(err)),
            },
            _ = sleep_until(deadline) => {
                step_token.cancel();
                handle.abort();
                Attempt::TimedOut
            }
            _ = grace_expired => {
                step_token.cancel();
                handle.abort();
                Attempt::Cancelled
            }
        }
    }

    fn check_output(
        &self,
        step: &Step,
        handler: &ResolvedAction,
        output: Map<String, Value>,
        run_id: &RunId,
    ) -> StepResult {
        let output_value = Value::Object(output);
        if let Err(error) = validate_schema(&output_value, &handler.meta.output_schema) {
            tracing::warn!(
                run_id = %run_id,
                step_id = %step.id,
                action = %step.action,
                error = %error,
                "step output rejected by action schema"
            );
            return StepResult::failed(
                ErrorCode::InvalidOutput,
                format!("output of action '{}' is invalid: {}", step.action, error),
            );
        }
        if tracing::enabled!(tracing::Level::DEBUG) {
            tracing::debug!(
                run_id = %run_id,
                step_id = %step.id,
                action = %step.action,
                output = %truncate_json_for_log(&output_value, MAX_LOG_JSON_CHARS),
                "action returned success"
            );
        }
        match output_value {
            Value::Object(output) => StepResult::completed(output),
            _ => StepResult::completed(Map::new()),
        }
    }
}

fn timed_out(step: &Step, timeout: Duration, run_id: &RunId) -> StepResult {
    tracing::warn!(
        run_id = %run_id,
        step_id = %step.id,
        action = %step.action,
        timeout_ms = timeout.as_millis() as u64,
        "step timed out"
    );
    StepResult::timeout(format!(
        "action '{}' did not finish within {} ms",
        step.action,
        timeout.as_millis()
    ))
}

fn panic_message(err: JoinError) -> String {
    if !err.is_panic() {
        return err.to_string();
    }
    let payload = err.into_panic();
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
