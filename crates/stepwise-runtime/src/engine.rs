//! Engine facade: the entry point a presentation layer talks to.
//!
//! Plans are validated synchronously by `start`; a rejected plan never gets a
//! run id. Accepted plans run on their own tokio task and are reachable by
//! run id (`cancel`) until their terminal event has been emitted.

use std::sync::Arc;

use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use stepwise_core::action::ActionRegistry;
use stepwise_core::executor::Executor;
use stepwise_core::lifecycle::{RunEvent, RunEventReporter, RunEvents};
use stepwise_core::report::RunReport;
use stepwise_core::types::{Plan, RunId};
use stepwise_core::validator::{PlanRejection, PlanValidator, ValidatedPlan};

use crate::error::RuntimeError;
use crate::event_bus::BroadcastEventBus;
use crate::hooks::HookRegistry;
use crate::run_registry::RunRegistry;

pub struct Engine {
    validator: PlanValidator,
    executor: Arc<Executor>,
    runs: Arc<RunRegistry>,
    bus: Arc<BroadcastEventBus>,
    hooks: Arc<HookRegistry>,
    reporters: Vec<Arc<dyn RunEventReporter>>,
}

impl Engine {
    /// Engine whose validator and executor share one action registry.
    pub fn new(actions: ActionRegistry) -> Self {
        let actions = Arc::new(actions);
        Self::from_parts(
            PlanValidator::new(actions.clone()),
            Executor::with_registry(actions),
            BroadcastEventBus::default(),
        )
    }

    pub fn from_parts(validator: PlanValidator, executor: Executor, bus: BroadcastEventBus) -> Self {
        Self {
            validator,
            executor: Arc::new(executor),
            runs: Arc::new(RunRegistry::new()),
            bus: Arc::new(bus),
            hooks: Arc::new(HookRegistry::new()),
            reporters: Vec::new(),
        }
    }

    /// Attach an extra event sink to every run, next to the live bus.
    pub fn with_reporter(mut self, reporter: Arc<dyn RunEventReporter>) -> Self {
        self.reporters.push(reporter);
        self
    }

    pub fn hooks(&self) -> &Arc<HookRegistry> {
        &self.hooks
    }

    pub fn validator(&self) -> &PlanValidator {
        &self.validator
    }

    pub fn executor(&self) -> &Executor {
        &self.executor
    }

    pub fn validate(&self, plan: Plan) -> Result<ValidatedPlan, PlanRejection> {
        self.validator.validate(plan)
    }

    /// Validate a plan and start running it.
    pub async fn start(&self, plan: Plan) -> Result<RunHandle, PlanRejection> {
        let validated = self.validator.validate(plan)?;
        Ok(self.start_validated(validated).await)
    }

    /// Start a plan that has already been accepted.
    pub async fn start_validated(&self, validated: ValidatedPlan) -> RunHandle {
        let run_id = RunId::generate();
        let token = CancellationToken::new();
        self.runs.insert(run_id.clone(), token.clone()).await;

        let mut events = RunEvents::new(run_id.clone()).with_reporter(self.bus.clone());
        for reporter in &self.reporters {
            events = events.with_reporter(reporter.clone());
        }

        tracing::info!(
            run_id = %run_id,
            goal = %validated.plan.goal,
            warnings = validated.warnings.len(),
            "run accepted"
        );

        let executor = self.executor.clone();
        let runs = self.runs.clone();
        let hooks = self.hooks.clone();
        let task_run_id = run_id.clone();
        let join = tokio::spawn(async move {
            let report = executor.execute(&validated, &events, &token).await;
            runs.remove(&task_run_id).await;
            hooks.on_run_finished(&report).await;
            report
        });

        RunHandle { run_id, join }
    }

    /// Validate, run to completion and return the final report.
    pub async fn run(&self, plan: Plan) -> Result<RunReport, RuntimeError> {
        let handle = self.start(plan).await?;
        handle.wait().await
    }

    /// Request cancellation of a run. Idempotent; returns whether the run
    /// was still active.
    pub async fn cancel(&self, run_id: &RunId) -> bool {
        let active = self.runs.cancel(run_id).await;
        if active {
            tracing::info!(run_id = %run_id, "run cancellation requested");
        } else {
            tracing::debug!(run_id = %run_id, "cancel ignored: run not active");
        }
        active
    }

    /// Live lifecycle events of every run started after subscribing.
    pub fn subscribe(&self) -> broadcast::Receiver<RunEvent> {
        self.bus.subscribe()
    }

    pub async fn active_runs(&self) -> Vec<RunId> {
        self.runs.active().await
    }
}

/// Handle to a started run.
pub struct RunHandle {
    run_id: RunId,
    join: JoinHandle<RunReport>,
}

impl RunHandle {
    pub fn run_id(&self) -> &RunId {
        &self.run_id
    }

    /// Wait for the final report.
    pub async fn wait(self) -> Result<RunReport, RuntimeError> {
        let RunHandle { run_id, join } = self;
        join.await.map_err(|err| RuntimeError::RunAborted {
            run_id,
            reason: err.to_string(),
        })
    }
}
