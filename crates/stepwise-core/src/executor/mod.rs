//! Executor module
//!
//! The Executor is responsible for:
//! - Dependency-ordered scheduling over the execution DAG
//! - Bounded parallel execution of ready steps
//! - Cascade skip of dependents whose upstream did not complete
//! - Honoring run cancellation without truncating the report
//!
//! One scheduling loop owns the DAG and the run's result context. Workers
//! only return `(step_id, result)` pairs; every state change happens in the
//! loop, so completions arriving together never race on the ready set.

mod adapter;
mod dag;
#[cfg(test)]
pub(crate) mod test_actions;

pub use adapter::{ResolvedAction, RetryPolicy, StepAdapter, DEFAULT_STEP_TIMEOUT};
pub use dag::{topological_order, DagError, DagNode, ExecutionDag, NodeState};

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use futures_util::stream::{FuturesUnordered, StreamExt};
use serde_json::{json, Map, Value};
use tokio_util::sync::CancellationToken;

use crate::action::ActionRegistry;
use crate::lifecycle::{RunEventType, RunEvents};
use crate::report::{RunReport, StatusCounts, StepReport};
use crate::template::TemplateResolver;
use crate::types::{ErrorCode, PlanRun, Step, StepId, StepResult, StepStatus};
use crate::validator::ValidatedPlan;

pub(crate) const MAX_LOG_TEXT_CHARS: usize = 2_000;
pub(crate) const MAX_LOG_JSON_CHARS: usize = 8_000;
const DEFAULT_MAX_IN_FLIGHT: usize = 4;
const PREVIEW_CHARS: usize = 320;
const SUMMARY_CHARS: usize = 240;

pub(crate) fn truncate_for_log(input: &str, max_chars: usize) -> String {
    let char_count = input.chars().count();
    if char_count <= max_chars {
        return input.to_string();
    }
    let mut preview: String = input.chars().take(max_chars).collect();
    preview.push_str(&format!("... [truncated, total_chars={}]", char_count));
    preview
}

pub(crate) fn truncate_json_for_log(value: &Value, max_chars: usize) -> String {
    truncate_for_log(&value.to_string(), max_chars)
}

/// The executor - drives one validated plan to a terminal run status
pub struct Executor {
    /// Action registry, resolved once per run
    pub action_registry: Arc<ActionRegistry>,
    /// Maximum number of steps running at once
    pub max_in_flight: usize,
    pub adapter: StepAdapter,
}

impl Executor {
    /// Create a new executor
    pub fn new(action_registry: ActionRegistry) -> Self {
        Self::with_registry(Arc::new(action_registry))
    }

    /// Create a new executor with a shared registry
    pub fn with_registry(action_registry: Arc<ActionRegistry>) -> Self {
        Self {
            action_registry,
            max_in_flight: DEFAULT_MAX_IN_FLIGHT,
            adapter: StepAdapter::default(),
        }
    }

    /// Set the in-flight bound. Zero is treated as one.
    pub fn with_max_in_flight(mut self, max: usize) -> Self {
        self.max_in_flight = max.max(1);
        self
    }

    /// Default per-step timeout for actions that declare none
    pub fn with_step_timeout(mut self, timeout: Duration) -> Self {
        self.adapter.default_timeout = timeout;
        self
    }

    pub fn with_cancel_grace(mut self, grace: Option<Duration>) -> Self {
        self.adapter.cancel_grace = grace;
        self
    }

    /// Configure retry policy for retryable action errors.
    pub fn with_retry_policy(
        mut self,
        max_retry_attempts: u32,
        retry_base_delay: Duration,
        retry_max_delay: Duration,
    ) -> Self {
        self.adapter.retry = RetryPolicy::new(max_retry_attempts, retry_base_delay, retry_max_delay);
        self
    }

    /// Execute a validated plan.
    ///
    /// Always returns a report listing every declared step; `run-finished`
    /// is the last event emitted, cancelled or not.
    pub async fn execute(
        &self,
        validated: &ValidatedPlan,
        events: &RunEvents,
        cancel: &CancellationToken,
    ) -> RunReport {
        let plan = &validated.plan;
        let mut dag = validated.dag.clone();
        let mut run = PlanRun::new(events.run_id().clone());
        if let Err(err) = run.start() {
            tracing::warn!(run_id = %run.run_id, "{}", err);
        }
        let handlers = self.resolve_handlers(validated);

        tracing::info!(
            run_id = %run.run_id,
            goal = %plan.goal,
            steps = plan.steps.len(),
            max_in_flight = self.max_in_flight,
            "run started"
        );
        events
            .emit(
                RunEventType::RunStarted,
                None,
                json!({
                    "goal": plan.goal,
                    "step_count": plan.steps.len(),
                    "warning_count": validated.warnings.len(),
                }),
            )
            .await;

        let mut in_flight = FuturesUnordered::new();
        let mut cancel_observed = false;
        loop {
            if !cancel_observed && cancel.is_cancelled() {
                cancel_observed = true;
                tracing::warn!(
                    run_id = %run.run_id,
                    in_flight = in_flight.len(),
                    "run cancellation observed; no further steps will be dispatched"
                );
                events
                    .emit(
                        RunEventType::RunCancelRequested,
                        None,
                        json!({ "in_flight": in_flight.len() }),
                    )
                    .await;
            }

            if !cancel_observed {
                for step_id in dag.ready_nodes() {
                    if in_flight.len() >= self.max_in_flight {
                        break;
                    }
                    let Some(step) = dag.get_node(step_id.as_str()).map(|n| n.step.clone()) else {
                        continue;
                    };
                    dag.mark_running(step.id.as_str());
                    tracing::info!(
                        run_id = %run.run_id,
                        step_id = %step.id,
                        action = %step.action,
                        "step execution started"
                    );
                    events
                        .emit(
                            RunEventType::StepStarted,
                            Some(&step.id),
                            build_step_start_metadata(&step),
                        )
                        .await;

                    match prepare_step(&step, &handlers, &run) {
                        Ok((handler, params)) => {
                            in_flight.push(run_step(
                                &self.adapter,
                                step,
                                handler,
                                params,
                                cancel,
                                events,
                            ));
                        }
                        Err(result) => {
                            self.finish_step(&mut dag, &mut run, &step.id, result, events)
                                .await;
                        }
                    }
                }
            }

            if in_flight.is_empty() {
                break;
            }

            let completed = tokio::select! {
                next = in_flight.next() => next,
                _ = cancel.cancelled(), if !cancel_observed => None,
            };
            if let Some((step_id, result)) = completed {
                self.finish_step(&mut dag, &mut run, &step_id, result, events)
                    .await;
            }
        }

        self.settle_pending(&mut dag, &mut run, events).await;

        let counts = StatusCounts::from_statuses(
            plan.steps
                .iter()
                .filter_map(|step| run.results.get(step.id.as_str()).map(|r| r.status)),
        );
        let status = counts.run_status(cancel_observed);
        if let Err(err) = run.finish(status) {
            tracing::warn!(run_id = %run.run_id, "{}", err);
        }

        let report = build_report(validated, &run);
        tracing::info!(
            run_id = %run.run_id,
            status = %report.status,
            completed = counts.completed,
            failed = counts.failed,
            timeout = counts.timeout,
            skipped = counts.skipped,
            cancelled = counts.cancelled,
            duration_ms = report.duration_ms().unwrap_or_default(),
            "run finished"
        );
        events
            .emit(RunEventType::RunFinished, None, report.to_value())
            .await;
        report
    }

    /// Resolve every action the plan uses once, up front.
    fn resolve_handlers(&self, validated: &ValidatedPlan) -> HashMap<String, ResolvedAction> {
        let mut handlers = HashMap::new();
        for step in &validated.plan.steps {
            if handlers.contains_key(&step.action) {
                continue;
            }
            if let Some(action) = self.action_registry.resolve(&step.action) {
                handlers.insert(step.action.clone(), ResolvedAction::new(action));
            }
        }
        handlers
    }

    /// Record a terminal result, emit its event and cascade-skip dependents.
    async fn finish_step(
        &self,
        dag: &mut ExecutionDag,
        run: &mut PlanRun,
        step_id: &StepId,
        result: StepResult,
        events: &RunEvents,
    ) {
        let action = dag
            .get_node(step_id.as_str())
            .map(|node| node.step.action.clone())
            .unwrap_or_default();
        let status = result.status;
        let (event_type, payload) = match status {
            StepStatus::Completed => (
                RunEventType::StepCompleted,
                build_step_completion_metadata(&action, &result.output),
            ),
            _ => (
                RunEventType::StepFailed,
                build_step_failure_metadata(&action, &result),
            ),
        };

        if let Err(err) = run.results.record(step_id.clone(), result) {
            tracing::error!(run_id = %run.run_id, step_id = %step_id, "{}", err);
            return;
        }
        dag.mark_finished(step_id.as_str(), status);

        if status == StepStatus::Completed {
            tracing::info!(
                run_id = %run.run_id,
                step_id = %step_id,
                action = %action,
                "step execution completed"
            );
        } else {
            tracing::warn!(
                run_id = %run.run_id,
                step_id = %step_id,
                action = %action,
                status = %status,
                "step execution did not complete"
            );
        }
        events.emit(event_type, Some(step_id), payload).await;

        if !status.cascades() {
            return;
        }
        for dependent in dag.transitive_dependents(step_id.as_str()) {
            if dag.state(dependent.as_str()) != Some(NodeState::Pending) {
                continue;
            }
            self.skip_step(dag, run, &dependent, StepResult::skipped(step_id, status), events)
                .await;
        }
    }

    /// Close out steps that were never dispatched, in dependency order.
    async fn settle_pending(&self, dag: &mut ExecutionDag, run: &mut PlanRun, events: &RunEvents) {
        if dag.pending_nodes().is_empty() {
            return;
        }
        let order = dag.order().to_vec();
        for step_id in order {
            if dag.state(step_id.as_str()) != Some(NodeState::Pending) {
                continue;
            }
            let result = match dag.failed_dependency(step_id.as_str()) {
                Some((upstream, status)) => StepResult::skipped(&upstream, status),
                None => StepResult::cancelled("run cancelled before step started"),
            };
            self.skip_step(dag, run, &step_id, result, events).await;
        }
    }

    async fn skip_step(
        &self,
        dag: &mut ExecutionDag,
        run: &mut PlanRun,
        step_id: &StepId,
        result: StepResult,
        events: &RunEvents,
    ) {
        let action = dag
            .get_node(step_id.as_str())
            .map(|node| node.step.action.clone())
            .unwrap_or_default();
        let status = result.status;
        let payload = build_step_failure_metadata(&action, &result);
        if let Err(err) = run.results.record(step_id.clone(), result) {
            tracing::error!(run_id = %run.run_id, step_id = %step_id, "{}", err);
            return;
        }
        dag.mark_finished(step_id.as_str(), status);
        tracing::info!(
            run_id = %run.run_id,
            step_id = %step_id,
            action = %action,
            status = %status,
            "step not executed"
        );
        events
            .emit(RunEventType::StepSkipped, Some(step_id), payload)
            .await;
    }
}

/// Look up the step's handler and resolve its parameters against the
/// results recorded so far.
fn prepare_step(
    step: &Step,
    handlers: &HashMap<String, ResolvedAction>,
    run: &PlanRun,
) -> Result<(ResolvedAction, Map<String, Value>), StepResult> {
    let handler = handlers.get(&step.action).cloned().ok_or_else(|| {
        StepResult::failed(
            ErrorCode::ActionNotFound,
            format!("no executor registered for action '{}'", step.action),
        )
    })?;
    let params = TemplateResolver::new(&run.results)
        .resolve_params(&step.params)
        .map_err(|err| {
            tracing::warn!(
                run_id = %run.run_id,
                step_id = %step.id,
                action = %step.action,
                error = %err,
                "template resolution failed"
            );
            StepResult::failed(ErrorCode::TemplateResolution, err.to_string())
        })?;
    Ok((handler, params))
}

async fn run_step(
    adapter: &StepAdapter,
    step: Step,
    handler: ResolvedAction,
    params: Map<String, Value>,
    cancel: &CancellationToken,
    events: &RunEvents,
) -> (StepId, StepResult) {
    let result = adapter.execute(&step, &handler, params, cancel, events).await;
    (step.id, result)
}

fn build_report(validated: &ValidatedPlan, run: &PlanRun) -> RunReport {
    let steps = validated
        .plan
        .steps
        .iter()
        .map(|step| match run.results.get(step.id.as_str()) {
            Some(result) => StepReport::new(step.id.clone(), step.action.clone(), result),
            None => StepReport::new(
                step.id.clone(),
                step.action.clone(),
                &StepResult::cancelled("step never reached a terminal state"),
            ),
        })
        .collect();
    RunReport {
        run_id: run.run_id.clone(),
        goal: validated.plan.goal.clone(),
        status: run.status(),
        steps,
        warnings: validated.warnings.clone(),
        started_at: run.started_at,
        completed_at: run.completed_at,
    }
}

fn build_step_start_metadata(step: &Step) -> Value {
    let mut metadata = Map::new();
    metadata.insert("action".to_string(), Value::String(step.action.clone()));
    if !step.depends_on.is_empty() {
        metadata.insert(
            "depends_on".to_string(),
            Value::Array(
                step.depends_on
                    .iter()
                    .map(|id| Value::String(id.to_string()))
                    .collect(),
            ),
        );
    }
    if !step.params.is_empty() {
        metadata.insert(
            "input_summary".to_string(),
            Value::String(truncate_json_for_log(
                &Value::Object(step.params.clone()),
                SUMMARY_CHARS,
            )),
        );
    }
    Value::Object(metadata)
}

fn build_step_completion_metadata(action: &str, output: &Map<String, Value>) -> Value {
    let mut output_keys: Vec<String> = output.keys().cloned().collect();
    output_keys.sort();

    let mut metadata = Map::new();
    metadata.insert("action".to_string(), Value::String(action.to_string()));
    metadata.insert("output_count".to_string(), json!(output_keys.len()));
    metadata.insert(
        "output_keys".to_string(),
        Value::Array(output_keys.into_iter().map(Value::String).collect()),
    );
    if let Some(preview) = output_preview(output) {
        metadata.insert("output_preview".to_string(), Value::String(preview));
    }
    Value::Object(metadata)
}

fn build_step_failure_metadata(action: &str, result: &StepResult) -> Value {
    let mut metadata = Map::new();
    metadata.insert("action".to_string(), Value::String(action.to_string()));
    metadata.insert("status".to_string(), Value::String(result.status.to_string()));
    if let Some(error) = &result.error {
        metadata.insert("code".to_string(), Value::String(error.code.to_string()));
        metadata.insert(
            "message".to_string(),
            Value::String(truncate_for_log(&error.message, MAX_LOG_TEXT_CHARS)),
        );
    }
    Value::Object(metadata)
}

fn output_preview(output: &Map<String, Value>) -> Option<String> {
    for key in ["result", "content", "text", "stdout", "body"] {
        if let Some(value) = output.get(key).and_then(|v| v.as_str()) {
            return Some(truncate_for_log(value, PREVIEW_CHARS));
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use crate::action::{ActionMeta, ActionResult, StaticCatalog};
    use crate::executor::test_actions::{
        CancellingAction, EchoAction, FlakyRetryAction, PanickingAction, SleepyAction, SlowAction,
        StaticAction,
    };
    use crate::lifecycle::CollectingReporter;
    use crate::types::{Plan, RunId, RunStatus};
    use crate::validator::PlanValidator;

    fn validate(plan: Plan, registry: &Arc<ActionRegistry>) -> ValidatedPlan {
        PlanValidator::new(registry.clone())
            .validate(plan)
            .expect("plan accepted")
    }

    fn events() -> (RunEvents, Arc<CollectingReporter>) {
        let reporter = Arc::new(CollectingReporter::new());
        (
            RunEvents::new(RunId::from("run-1")).with_reporter(reporter.clone()),
            reporter,
        )
    }

    fn fetch_then_send() -> Plan {
        Plan::new(
            "fetch and send",
            vec![
                Step::action("1", "fetch"),
                Step::action("2", "send")
                    .with_param("body", json!("$step1.text"))
                    .with_depends_on(vec![StepId::from("1")]),
            ],
        )
    }

    #[test]
    fn test_whole_value_reference_feeds_downstream_step() {
        tokio_test::block_on(async {
            let send = EchoAction::new("send");
            let seen = send.seen();
            let registry = Arc::new(
                ActionRegistry::new()
                    .with_action(Arc::new(StaticAction::new(
                        "fetch",
                        ActionResult::success_with_one("text", json!("hello")),
                    )))
                    .with_action(Arc::new(send)),
            );
            let validated = validate(fetch_then_send(), &registry);
            let (events, _) = events();

            let report = Executor::with_registry(registry)
                .execute(&validated, &events, &CancellationToken::new())
                .await;

            assert_eq!(report.status, RunStatus::Completed);
            assert_eq!(report.step("1").map(|s| s.status), Some(StepStatus::Completed));
            assert_eq!(report.step("2").map(|s| s.status), Some(StepStatus::Completed));
            let seen = seen.lock().expect("lock");
            assert_eq!(seen.len(), 1);
            assert_eq!(seen[0].get("body"), Some(&json!("hello")));
        });
    }

    #[test]
    fn test_failed_upstream_skips_dependent() {
        tokio_test::block_on(async {
            let send = StaticAction::new("send", ActionResult::success());
            let send_calls = send.calls();
            let registry = Arc::new(
                ActionRegistry::new()
                    .with_action(Arc::new(StaticAction::new(
                        "fetch",
                        ActionResult::error("upstream unavailable"),
                    )))
                    .with_action(Arc::new(send)),
            );
            let validated = validate(fetch_then_send(), &registry);
            let (events, reporter) = events();

            let report = Executor::with_registry(registry)
                .execute(&validated, &events, &CancellationToken::new())
                .await;

            assert_eq!(report.status, RunStatus::Failed);
            assert_eq!(report.step("1").map(|s| s.status), Some(StepStatus::Failed));
            let skipped = report.step("2").expect("step 2");
            assert_eq!(skipped.status, StepStatus::Skipped);
            assert_eq!(
                skipped.error.as_ref().map(|e| e.code),
                Some(ErrorCode::DependencyFailed)
            );
            assert_eq!(send_calls.load(Ordering::SeqCst), 0);
            assert_eq!(
                reporter.event_types().await,
                vec![
                    RunEventType::RunStarted,
                    RunEventType::StepStarted,
                    RunEventType::StepFailed,
                    RunEventType::StepSkipped,
                    RunEventType::RunFinished,
                ]
            );
        });
    }

    #[test]
    fn test_missing_field_fails_step_without_calling_handler() {
        tokio_test::block_on(async {
            let send = EchoAction::new("send");
            let seen = send.seen();
            let registry = Arc::new(
                ActionRegistry::new()
                    .with_action(Arc::new(StaticAction::new(
                        "fetch",
                        ActionResult::success_with_one("text", json!("hello")),
                    )))
                    .with_action(Arc::new(send)),
            );
            let plan = Plan::new(
                "missing field",
                vec![
                    Step::action("1", "fetch"),
                    Step::action("2", "send")
                        .with_param("body", json!("$step1.missing_field"))
                        .with_depends_on(vec![StepId::from("1")]),
                ],
            );
            let validated = validate(plan, &registry);
            let (events, _) = events();

            let report = Executor::with_registry(registry)
                .execute(&validated, &events, &CancellationToken::new())
                .await;

            let step = report.step("2").expect("step 2");
            assert_eq!(step.status, StepStatus::Failed);
            assert_eq!(
                step.error.as_ref().map(|e| e.code),
                Some(ErrorCode::TemplateResolution)
            );
            assert!(seen.lock().expect("lock").is_empty());
            assert_eq!(report.status, RunStatus::PartiallyFailed);
        });
    }

    #[test]
    fn test_inline_reference_to_list_fails_step() {
        tokio_test::block_on(async {
            let registry = Arc::new(
                ActionRegistry::new()
                    .with_action(Arc::new(StaticAction::new(
                        "fetch",
                        ActionResult::success_with_one("items", json!([1, 2])),
                    )))
                    .with_action(Arc::new(EchoAction::new("send"))),
            );
            let plan = Plan::new(
                "inline list",
                vec![
                    Step::action("1", "fetch"),
                    Step::action("2", "send")
                        .with_param("body", json!("got {$step1.items}"))
                        .with_depends_on(vec![StepId::from("1")]),
                ],
            );
            let validated = validate(plan, &registry);
            let (events, _) = events();

            let report = Executor::with_registry(registry)
                .execute(&validated, &events, &CancellationToken::new())
                .await;

            let step = report.step("2").expect("step 2");
            assert_eq!(
                step.error.as_ref().map(|e| e.code),
                Some(ErrorCode::TemplateResolution)
            );
            assert!(step
                .error
                .as_ref()
                .is_some_and(|e| e.message.contains("list")));
        });
    }

    #[test]
    fn test_siblings_run_in_parallel_after_shared_dependency() {
        tokio_test::block_on(async {
            let active = Arc::new(AtomicUsize::new(0));
            let peak = Arc::new(AtomicUsize::new(0));
            let registry = Arc::new(
                ActionRegistry::new()
                    .with_action(Arc::new(StaticAction::new("seed", ActionResult::success())))
                    .with_action(Arc::new(SlowAction::new(active.clone(), peak.clone(), 40))),
            );
            let plan = Plan::new(
                "fan-out",
                vec![
                    Step::action("a", "seed"),
                    Step::action("b", "slow").with_depends_on(vec![StepId::from("a")]),
                    Step::action("c", "slow").with_depends_on(vec![StepId::from("a")]),
                ],
            );
            let validated = validate(plan, &registry);
            let (events, _) = events();

            let report = Executor::with_registry(registry)
                .execute(&validated, &events, &CancellationToken::new())
                .await;

            assert_eq!(report.status, RunStatus::Completed);
            assert_eq!(peak.load(Ordering::SeqCst), 2);
        });
    }

    #[test]
    fn test_max_in_flight_bounds_running_steps() {
        tokio_test::block_on(async {
            let active = Arc::new(AtomicUsize::new(0));
            let peak = Arc::new(AtomicUsize::new(0));
            let registry = Arc::new(ActionRegistry::new().with_action(Arc::new(SlowAction::new(
                active.clone(),
                peak.clone(),
                20,
            ))));
            let plan = Plan::new(
                "wide",
                (1..=5)
                    .map(|i| Step::action(i.to_string(), "slow"))
                    .collect(),
            );
            let validated = validate(plan, &registry);
            let (events, _) = events();

            let report = Executor::with_registry(registry)
                .with_max_in_flight(2)
                .execute(&validated, &events, &CancellationToken::new())
                .await;

            assert_eq!(report.counts().completed, 5);
            assert_eq!(peak.load(Ordering::SeqCst), 2);
        });
    }

    #[test]
    fn test_timeout_cascades_like_failure() {
        tokio_test::block_on(async {
            let send = StaticAction::new("send", ActionResult::success());
            let send_calls = send.calls();
            let registry = Arc::new(
                ActionRegistry::new()
                    .with_action(Arc::new(
                        SleepyAction::new("fetch", Duration::from_secs(5))
                            .with_timeout(Duration::from_millis(20)),
                    ))
                    .with_action(Arc::new(send)),
            );
            let validated = validate(fetch_then_send(), &registry);
            let (events, _) = events();

            let report = Executor::with_registry(registry)
                .execute(&validated, &events, &CancellationToken::new())
                .await;

            assert_eq!(report.step("1").map(|s| s.status), Some(StepStatus::Timeout));
            assert_eq!(report.step("2").map(|s| s.status), Some(StepStatus::Skipped));
            assert_eq!(report.status, RunStatus::Failed);
            assert_eq!(send_calls.load(Ordering::SeqCst), 0);
        });
    }

    #[test]
    fn test_panicking_handler_only_fails_its_own_step() {
        tokio_test::block_on(async {
            let registry = Arc::new(
                ActionRegistry::new()
                    .with_action(Arc::new(StaticAction::new("fetch", ActionResult::success())))
                    .with_action(Arc::new(PanickingAction)),
            );
            let plan = Plan::new(
                "independent branches",
                vec![Step::action("1", "fetch"), Step::action("2", "panics")],
            );
            let validated = validate(plan, &registry);
            let (events, _) = events();

            let report = Executor::with_registry(registry)
                .execute(&validated, &events, &CancellationToken::new())
                .await;

            assert_eq!(report.status, RunStatus::PartiallyFailed);
            assert_eq!(report.step("1").map(|s| s.status), Some(StepStatus::Completed));
            assert_eq!(
                report.step("2").and_then(|s| s.error.as_ref()).map(|e| e.code),
                Some(ErrorCode::Panicked)
            );
        });
    }

    #[test]
    fn test_cancellation_mid_run_reports_every_step() {
        tokio_test::block_on(async {
            let cancel = CancellationToken::new();
            let registry = Arc::new(
                ActionRegistry::new()
                    .with_action(Arc::new(CancellingAction::new(cancel.clone())))
                    .with_action(Arc::new(StaticAction::new("send", ActionResult::success()))),
            );
            let plan = Plan::new(
                "cancelled",
                vec![
                    Step::action("1", "cancel_run"),
                    Step::action("2", "send").with_depends_on(vec![StepId::from("1")]),
                    Step::action("3", "send").with_depends_on(vec![StepId::from("2")]),
                    Step::action("4", "send").with_depends_on(vec![StepId::from("1")]),
                ],
            );
            let validated = validate(plan, &registry);
            let (events, reporter) = events();

            let report = Executor::with_registry(registry)
                .execute(&validated, &events, &cancel)
                .await;

            assert_eq!(report.status, RunStatus::Cancelled);
            assert_eq!(report.steps.len(), 4);
            let statuses: Vec<StepStatus> = report.steps.iter().map(|s| s.status).collect();
            assert_eq!(
                statuses,
                vec![
                    StepStatus::Completed,
                    StepStatus::Cancelled,
                    StepStatus::Skipped,
                    StepStatus::Cancelled,
                ]
            );

            let types = reporter.event_types().await;
            assert!(types.contains(&RunEventType::RunCancelRequested));
            assert_eq!(types.last(), Some(&RunEventType::RunFinished));
            assert_eq!(
                types
                    .iter()
                    .filter(|t| **t == RunEventType::StepStarted)
                    .count(),
                1
            );
        });
    }

    #[test]
    fn test_cancel_before_start_runs_nothing() {
        tokio_test::block_on(async {
            let send = StaticAction::new("send", ActionResult::success());
            let send_calls = send.calls();
            let registry = Arc::new(
                ActionRegistry::new()
                    .with_action(Arc::new(StaticAction::new("fetch", ActionResult::success())))
                    .with_action(Arc::new(send)),
            );
            let validated = validate(fetch_then_send(), &registry);
            let (events, reporter) = events();
            let cancel = CancellationToken::new();
            cancel.cancel();

            let report = Executor::with_registry(registry)
                .execute(&validated, &events, &cancel)
                .await;

            assert_eq!(report.status, RunStatus::Cancelled);
            assert_eq!(report.step("1").map(|s| s.status), Some(StepStatus::Cancelled));
            assert_eq!(report.step("2").map(|s| s.status), Some(StepStatus::Skipped));
            assert_eq!(send_calls.load(Ordering::SeqCst), 0);
            assert_eq!(
                reporter.event_types().await,
                vec![
                    RunEventType::RunStarted,
                    RunEventType::RunCancelRequested,
                    RunEventType::StepSkipped,
                    RunEventType::StepSkipped,
                    RunEventType::RunFinished,
                ]
            );
        });
    }

    #[test]
    fn test_retryable_error_retries_and_then_succeeds() {
        tokio_test::block_on(async {
            let failures_left = Arc::new(AtomicUsize::new(2));
            let calls = Arc::new(AtomicUsize::new(0));
            let registry = Arc::new(ActionRegistry::new().with_action(Arc::new(
                FlakyRetryAction::new(failures_left, calls.clone()),
            )));
            let validated = validate(
                Plan::new("retry", vec![Step::action("1", "flaky_retry")]),
                &registry,
            );
            let (events, reporter) = events();

            let report = Executor::with_registry(registry)
                .with_retry_policy(3, Duration::from_millis(1), Duration::from_millis(2))
                .execute(&validated, &events, &CancellationToken::new())
                .await;

            assert_eq!(report.status, RunStatus::Completed);
            assert_eq!(calls.load(Ordering::SeqCst), 3);
            assert_eq!(
                report.step("1").and_then(|s| s.output.get("ok").cloned()),
                Some(json!(3))
            );
            let retries = reporter
                .event_types()
                .await
                .into_iter()
                .filter(|t| *t == RunEventType::StepRetrying)
                .count();
            assert_eq!(retries, 2);
        });
    }

    #[test]
    fn test_retryable_error_exhausts_and_fails() {
        tokio_test::block_on(async {
            let failures_left = Arc::new(AtomicUsize::new(5));
            let calls = Arc::new(AtomicUsize::new(0));
            let registry = Arc::new(ActionRegistry::new().with_action(Arc::new(
                FlakyRetryAction::new(failures_left, calls.clone()),
            )));
            let validated = validate(
                Plan::new("retry", vec![Step::action("1", "flaky_retry")]),
                &registry,
            );
            let (events, _) = events();

            let report = Executor::with_registry(registry)
                .with_retry_policy(1, Duration::from_millis(1), Duration::from_millis(1))
                .execute(&validated, &events, &CancellationToken::new())
                .await;

            assert_eq!(report.status, RunStatus::Failed);
            assert_eq!(calls.load(Ordering::SeqCst), 2);
            assert!(report
                .step("1")
                .and_then(|s| s.error.as_ref())
                .is_some_and(|e| e.message.contains("retry exhausted after 2 attempt(s)")));
        });
    }

    #[test]
    fn test_unregistered_action_fails_with_action_not_found() {
        tokio_test::block_on(async {
            let catalog = Arc::new(StaticCatalog::new().with(ActionMeta::new("ghost", "declared only")));
            let validated = PlanValidator::new(catalog)
                .validate(Plan::new("ghost", vec![Step::action("1", "ghost")]))
                .expect("plan accepted");
            let (events, _) = events();

            let report = Executor::new(ActionRegistry::new())
                .execute(&validated, &events, &CancellationToken::new())
                .await;

            assert_eq!(
                report.step("1").and_then(|s| s.error.as_ref()).map(|e| e.code),
                Some(ErrorCode::ActionNotFound)
            );
            assert_eq!(report.status, RunStatus::Failed);
        });
    }

    #[test]
    fn test_events_are_ordered_and_final_event_carries_report() {
        tokio_test::block_on(async {
            let registry = Arc::new(
                ActionRegistry::new()
                    .with_action(Arc::new(StaticAction::new(
                        "fetch",
                        ActionResult::success_with_one("text", json!("hello")),
                    )))
                    .with_action(Arc::new(EchoAction::new("send"))),
            );
            let validated = validate(fetch_then_send(), &registry);
            let (events, reporter) = events();

            Executor::with_registry(registry)
                .execute(&validated, &events, &CancellationToken::new())
                .await;

            let collected = reporter.events().await;
            let types: Vec<RunEventType> = collected.iter().map(|e| e.event_type).collect();
            assert_eq!(
                types,
                vec![
                    RunEventType::RunStarted,
                    RunEventType::StepStarted,
                    RunEventType::StepCompleted,
                    RunEventType::StepStarted,
                    RunEventType::StepCompleted,
                    RunEventType::RunFinished,
                ]
            );
            let seqs: Vec<u64> = collected.iter().map(|e| e.seq).collect();
            assert_eq!(seqs, vec![1, 2, 3, 4, 5, 6]);
            assert_eq!(collected[2].payload["output_preview"], json!("hello"));

            let last = collected.last().expect("run-finished");
            assert_eq!(last.payload["status"], json!("completed"));
            assert_eq!(last.payload["steps"].as_array().map(Vec::len), Some(2));
        });
    }

    #[test]
    fn test_cancel_during_step_that_times_out_ends_run_cancelled() {
        tokio_test::block_on(async {
            let send = StaticAction::new("send", ActionResult::success());
            let send_calls = send.calls();
            let registry = Arc::new(
                ActionRegistry::new()
                    .with_action(Arc::new(
                        SleepyAction::new("fetch", Duration::from_secs(5))
                            .with_timeout(Duration::from_millis(60)),
                    ))
                    .with_action(Arc::new(send)),
            );
            let validated = validate(fetch_then_send(), &registry);
            let (events, reporter) = events();
            let cancel = CancellationToken::new();
            let trigger = cancel.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(10)).await;
                trigger.cancel();
            });

            let report = Executor::with_registry(registry)
                .execute(&validated, &events, &cancel)
                .await;

            assert_eq!(report.step("1").map(|s| s.status), Some(StepStatus::Timeout));
            assert_eq!(report.step("2").map(|s| s.status), Some(StepStatus::Skipped));
            assert_eq!(report.status, RunStatus::Cancelled);
            assert_eq!(send_calls.load(Ordering::SeqCst), 0);

            let types = reporter.event_types().await;
            assert!(types.contains(&RunEventType::RunCancelRequested));
            assert_eq!(types.last(), Some(&RunEventType::RunFinished));
        });
    }

    #[test]
    fn test_validation_warnings_reach_report_and_final_event() {
        tokio_test::block_on(async {
            let registry = Arc::new(
                ActionRegistry::new()
                    .with_action(Arc::new(StaticAction::new(
                        "fetch",
                        ActionResult::success_with_one("text", json!("hello")),
                    )))
                    .with_action(Arc::new(EchoAction::new("send"))),
            );
            // step 2 uses step 1 without declaring the dependency
            let plan = Plan::new(
                "fetch and send",
                vec![
                    Step::action("1", "fetch"),
                    Step::action("2", "send").with_param("body", json!("$step1.text")),
                ],
            );
            let validated = validate(plan, &registry);
            assert_eq!(validated.warnings.len(), 1);
            let (events, reporter) = events();

            let report = Executor::with_registry(registry)
                .execute(&validated, &events, &CancellationToken::new())
                .await;

            assert_eq!(report.status, RunStatus::Completed);
            assert_eq!(report.warnings, validated.warnings);
            assert!(report.warnings[0].autocorrected);
            assert!(report.warnings[0].message.contains("dependency added"));

            let collected = reporter.events().await;
            let last = collected.last().expect("run-finished");
            assert_eq!(last.event_type, RunEventType::RunFinished);
            let warnings = last.payload["warnings"].as_array().expect("warnings array");
            assert_eq!(warnings.len(), 1);
            assert_eq!(warnings[0]["autocorrected"], json!(true));
            assert_eq!(
                warnings[0]["message"],
                json!(report.warnings[0].message.clone())
            );
        });
    }

    #[test]
    fn test_truncate_for_log_marks_truncation() {
        assert_eq!(truncate_for_log("short", 10), "short");
        let long = "x".repeat(12);
        assert_eq!(
            truncate_for_log(&long, 4),
            "xxxx... [truncated, total_chars=12]"
        );
    }
}
