//! Action doubles shared by executor tests

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Map, Value};
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

use crate::action::{Action, ActionContext, ActionInput, ActionMeta, ActionResult};

pub(crate) struct StaticAction {
    name: String,
    result: ActionResult,
    metadata: Option<ActionMeta>,
    calls: Arc<AtomicUsize>,
}

impl StaticAction {
    pub(crate) fn new(name: &str, result: ActionResult) -> Self {
        Self {
            name: name.to_string(),
            result,
            metadata: None,
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub(crate) fn with_metadata(mut self, metadata: ActionMeta) -> Self {
        self.metadata = Some(metadata);
        self
    }

    pub(crate) fn calls(&self) -> Arc<AtomicUsize> {
        self.calls.clone()
    }
}

#[async_trait]
impl Action for StaticAction {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        "test action"
    }

    fn metadata(&self) -> ActionMeta {
        self.metadata
            .clone()
            .unwrap_or_else(|| ActionMeta::new(self.name(), self.description()))
    }

    async fn run(&self, _input: ActionInput, _ctx: ActionContext) -> ActionResult {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.result.clone()
    }
}

/// Records the params of every call and echoes them back as output.
pub(crate) struct EchoAction {
    name: String,
    seen: Arc<Mutex<Vec<Map<String, Value>>>>,
}

impl EchoAction {
    pub(crate) fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            seen: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub(crate) fn seen(&self) -> Arc<Mutex<Vec<Map<String, Value>>>> {
        self.seen.clone()
    }
}

#[async_trait]
impl Action for EchoAction {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        "echoes its params"
    }

    async fn run(&self, input: ActionInput, _ctx: ActionContext) -> ActionResult {
        if let Ok(mut seen) = self.seen.lock() {
            seen.push(input.params.clone());
        }
        ActionResult::success_with(input.params)
    }
}

/// Tracks how many calls overlap.
pub(crate) struct SlowAction {
    active: Arc<AtomicUsize>,
    peak: Arc<AtomicUsize>,
    delay: Duration,
}

impl SlowAction {
    pub(crate) fn new(active: Arc<AtomicUsize>, peak: Arc<AtomicUsize>, delay_ms: u64) -> Self {
        Self {
            active,
            peak,
            delay: Duration::from_millis(delay_ms),
        }
    }
}

#[async_trait]
impl Action for SlowAction {
    fn name(&self) -> &str {
        "slow"
    }

    fn description(&self) -> &str {
        "slow action for parallelism tests"
    }

    async fn run(&self, _input: ActionInput, _ctx: ActionContext) -> ActionResult {
        let in_flight = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(in_flight, Ordering::SeqCst);
        sleep(self.delay).await;
        self.active.fetch_sub(1, Ordering::SeqCst);
        ActionResult::success_with_one("done", json!(true))
    }
}

/// Sleeps without looking at its cancellation token.
pub(crate) struct SleepyAction {
    name: String,
    delay: Duration,
    timeout: Option<Duration>,
}

impl SleepyAction {
    pub(crate) fn new(name: &str, delay: Duration) -> Self {
        Self {
            name: name.to_string(),
            delay,
            timeout: None,
        }
    }

    pub(crate) fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

#[async_trait]
impl Action for SleepyAction {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        "sleeps"
    }

    fn metadata(&self) -> ActionMeta {
        let meta = ActionMeta::new(self.name(), self.description());
        match self.timeout {
            Some(timeout) => meta.with_timeout(timeout),
            None => meta,
        }
    }

    async fn run(&self, _input: ActionInput, _ctx: ActionContext) -> ActionResult {
        sleep(self.delay).await;
        ActionResult::success()
    }
}

pub(crate) struct PanickingAction;

#[async_trait]
impl Action for PanickingAction {
    fn name(&self) -> &str {
        "panics"
    }

    fn description(&self) -> &str {
        "panics on every call"
    }

    async fn run(&self, _input: ActionInput, _ctx: ActionContext) -> ActionResult {
        panic!("handler exploded");
    }
}

/// Fails with retryable errors until `failures_left` reaches zero.
pub(crate) struct FlakyRetryAction {
    failures_left: Arc<AtomicUsize>,
    calls: Arc<AtomicUsize>,
}

impl FlakyRetryAction {
    pub(crate) fn new(failures_left: Arc<AtomicUsize>, calls: Arc<AtomicUsize>) -> Self {
        Self {
            failures_left,
            calls,
        }
    }
}

#[async_trait]
impl Action for FlakyRetryAction {
    fn name(&self) -> &str {
        "flaky_retry"
    }

    fn description(&self) -> &str {
        "returns retryable errors before succeeding"
    }

    async fn run(&self, _input: ActionInput, _ctx: ActionContext) -> ActionResult {
        let current_call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if self.failures_left.load(Ordering::SeqCst) > 0 {
            self.failures_left.fetch_sub(1, Ordering::SeqCst);
            return ActionResult::retryable("temporary failure", None, current_call as u32);
        }
        ActionResult::success_with_one("ok", json!(current_call))
    }
}

/// Cancels the run token it was given, then succeeds.
pub(crate) struct CancellingAction {
    token: CancellationToken,
}

impl CancellingAction {
    pub(crate) fn new(token: CancellationToken) -> Self {
        Self { token }
    }
}

#[async_trait]
impl Action for CancellingAction {
    fn name(&self) -> &str {
        "cancel_run"
    }

    fn description(&self) -> &str {
        "requests cancellation of the run"
    }

    async fn run(&self, _input: ActionInput, _ctx: ActionContext) -> ActionResult {
        self.token.cancel();
        ActionResult::success()
    }
}
