//! Plan Validator module
//!
//! Plans arrive from an external planner and are treated as untrusted.
//! The validator is the only gate in front of execution:
//! - structural checks and unknown actions reject the whole plan
//! - dependency cycles reject the whole plan
//! - undeclared template dependencies are added, with a warning
//! - malformed reference tokens, misnamed output fields and missing
//!   artifact parameters are repaired by fixed rules, with a warning each
//! - scalar/composite mismatches between producer and consumer are warned
//!   about, never blocked
//!
//! An accepted plan carries its DAG and the action contracts resolved once
//! from the capability catalog.

mod repair;

use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::action::{ActionMeta, CapabilityCatalog};
use crate::executor::{topological_order, DagError, ExecutionDag};
use crate::schema::{property_shape, ValueShape};
use crate::template::{collect_references, ReferenceForm};
use crate::types::{Plan, PlanComplexity, StepId};

pub use repair::{FieldAliasTable, ANY_ACTION};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Fatal,
    Warning,
}

/// One finding of the validator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationIssue {
    pub severity: Severity,
    pub message: String,
    /// Whether the plan was rewritten to address the issue
    pub autocorrected: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step_id: Option<StepId>,
}

impl ValidationIssue {
    pub fn fatal(error: &ValidationError) -> Self {
        Self {
            severity: Severity::Fatal,
            message: error.to_string(),
            autocorrected: false,
            step_id: error.step_id().cloned(),
        }
    }

    pub fn warning(step_id: &StepId, message: impl Into<String>) -> Self {
        Self {
            severity: Severity::Warning,
            message: message.into(),
            autocorrected: false,
            step_id: Some(step_id.clone()),
        }
    }

    pub fn corrected(step_id: &StepId, message: impl Into<String>) -> Self {
        Self {
            autocorrected: true,
            ..Self::warning(step_id, message)
        }
    }

    pub fn is_fatal(&self) -> bool {
        self.severity == Severity::Fatal
    }
}

impl fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match (self.severity, self.autocorrected) {
            (Severity::Fatal, _) => "fatal",
            (Severity::Warning, true) => "corrected",
            (Severity::Warning, false) => "warning",
        };
        write!(f, "[{}] {}", label, self.message)
    }
}

/// Fatal validation errors. Any one of these rejects the plan.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("plan has no steps")]
    EmptyPlan,

    #[error("planner marked the goal as impossible")]
    ImpossiblePlan,

    #[error("duplicate step id '{0}'")]
    DuplicateStepId(StepId),

    #[error("step '{step}' depends on undefined step '{dependency}'")]
    MissingDependency { step: StepId, dependency: StepId },

    #[error("step '{0}' depends on itself")]
    SelfDependency(StepId),

    #[error("step '{step}' uses unknown action '{action}'")]
    UnknownAction { step: StepId, action: String },

    #[error("step '{step}' references undefined step '{target}'")]
    UnknownReference { step: StepId, target: StepId },

    #[error("dependency cycle involving steps: {}", join_ids(.0))]
    CycleDetected(Vec<StepId>),
}

impl ValidationError {
    pub fn step_id(&self) -> Option<&StepId> {
        match self {
            ValidationError::EmptyPlan
            | ValidationError::ImpossiblePlan
            | ValidationError::CycleDetected(_) => None,
            ValidationError::DuplicateStepId(step)
            | ValidationError::SelfDependency(step)
            | ValidationError::MissingDependency { step, .. }
            | ValidationError::UnknownAction { step, .. }
            | ValidationError::UnknownReference { step, .. } => Some(step),
        }
    }
}

impl From<DagError> for ValidationError {
    fn from(err: DagError) -> Self {
        match err {
            DagError::DuplicateStep(id) => ValidationError::DuplicateStepId(id),
            DagError::MissingDependency { step, dependency } => {
                ValidationError::MissingDependency { step, dependency }
            }
            DagError::Cycle(remaining) => ValidationError::CycleDetected(remaining),
        }
    }
}

fn join_ids(ids: &[StepId]) -> String {
    ids.iter()
        .map(|id| id.as_str())
        .collect::<Vec<_>>()
        .join(", ")
}

/// A rejected plan. Nothing of it may execute.
#[derive(Debug, Clone, Error)]
#[error("plan rejected: {reason}")]
pub struct PlanRejection {
    /// Human-readable summary of the fatal errors
    pub reason: String,
    pub errors: Vec<ValidationError>,
    /// Every issue found before rejection, fatal ones included
    pub issues: Vec<ValidationIssue>,
    /// The plan as received, with complexity marked impossible
    pub plan: Plan,
}

impl PlanRejection {
    fn new(mut plan: Plan, errors: Vec<ValidationError>, mut issues: Vec<ValidationIssue>) -> Self {
        let reason = errors
            .iter()
            .map(|e| e.to_string())
            .collect::<Vec<_>>()
            .join("; ");
        issues.extend(errors.iter().map(ValidationIssue::fatal));
        plan.complexity = PlanComplexity::Impossible;
        Self {
            reason,
            errors,
            issues,
            plan,
        }
    }
}

/// A plan accepted for execution
#[derive(Debug, Clone)]
pub struct ValidatedPlan {
    /// The plan after repairs
    pub plan: Plan,
    pub dag: ExecutionDag,
    /// Warnings in the order they were raised
    pub warnings: Vec<ValidationIssue>,
    /// Contracts of every action the plan uses
    pub contracts: BTreeMap<String, ActionMeta>,
}

impl ValidatedPlan {
    pub fn contract(&self, action: &str) -> Option<&ActionMeta> {
        self.contracts.get(action)
    }
}

pub struct PlanValidator {
    catalog: Arc<dyn CapabilityCatalog>,
    aliases: FieldAliasTable,
    type_check: bool,
}

impl PlanValidator {
    /// Validator over `catalog` with the built-in alias table
    pub fn new(catalog: Arc<dyn CapabilityCatalog>) -> Self {
        Self {
            catalog,
            aliases: FieldAliasTable::builtin(),
            type_check: true,
        }
    }

    pub fn with_field_aliases(mut self, aliases: FieldAliasTable) -> Self {
        self.aliases = aliases;
        self
    }

    pub fn with_type_check(mut self, enabled: bool) -> Self {
        self.type_check = enabled;
        self
    }

    pub fn catalog(&self) -> &Arc<dyn CapabilityCatalog> {
        &self.catalog
    }

    /// Validate and repair a plan.
    pub fn validate(&self, mut plan: Plan) -> Result<ValidatedPlan, PlanRejection> {
        let mut issues = Vec::new();

        if plan.complexity == PlanComplexity::Impossible {
            return Err(self.reject(plan, vec![ValidationError::ImpossiblePlan], issues));
        }

        let mut errors = validate_structure(&plan);
        errors.extend(self.check_actions(&plan));
        if !errors.is_empty() {
            return Err(self.reject(plan, errors, issues));
        }

        if let Err(remaining) = topological_order(&plan) {
            return Err(self.reject(plan, vec![ValidationError::CycleDetected(remaining)], issues));
        }

        let contracts: BTreeMap<String, ActionMeta> = plan
            .steps
            .iter()
            .filter_map(|step| {
                self.catalog
                    .meta(&step.action)
                    .map(|meta| (step.action.clone(), meta))
            })
            .collect();

        repair::repair_token_shapes(&mut plan, &mut issues);

        let errors = add_reference_dependencies(&mut plan, &mut issues);
        if !errors.is_empty() {
            return Err(self.reject(plan, errors, issues));
        }

        repair::repair_field_aliases(&mut plan, &contracts, &self.aliases, &mut issues);
        repair::inject_artifact_references(&mut plan, &contracts, &mut issues);

        // repairs add edges; they must not have closed a cycle
        let dag = match ExecutionDag::from_plan(&plan) {
            Ok(dag) => dag,
            Err(err) => return Err(self.reject(plan, vec![err.into()], issues)),
        };

        if self.type_check {
            check_types(&plan, &contracts, &mut issues);
        }

        tracing::info!(
            goal = %plan.goal,
            steps = plan.steps.len(),
            warnings = issues.len(),
            autocorrected = issues.iter().filter(|i| i.autocorrected).count(),
            "plan accepted"
        );

        Ok(ValidatedPlan {
            plan,
            dag,
            warnings: issues,
            contracts,
        })
    }

    fn check_actions(&self, plan: &Plan) -> Vec<ValidationError> {
        let known = self.catalog.capabilities();
        plan.steps
            .iter()
            .filter(|step| !known.contains(&step.action))
            .map(|step| ValidationError::UnknownAction {
                step: step.id.clone(),
                action: step.action.clone(),
            })
            .collect()
    }

    fn reject(
        &self,
        plan: Plan,
        errors: Vec<ValidationError>,
        issues: Vec<ValidationIssue>,
    ) -> PlanRejection {
        let rejection = PlanRejection::new(plan, errors, issues);
        tracing::warn!(goal = %rejection.plan.goal, reason = %rejection.reason, "plan rejected");
        rejection
    }
}

/// Empty plan, duplicate ids, dangling and self dependencies.
fn validate_structure(plan: &Plan) -> Vec<ValidationError> {
    let mut errors = Vec::new();
    if plan.steps.is_empty() {
        errors.push(ValidationError::EmptyPlan);
        return errors;
    }

    let mut seen = HashSet::new();
    for step in &plan.steps {
        if !seen.insert(step.id.as_str()) {
            errors.push(ValidationError::DuplicateStepId(step.id.clone()));
        }
    }

    for step in &plan.steps {
        for dep in &step.depends_on {
            if dep == &step.id {
                errors.push(ValidationError::SelfDependency(step.id.clone()));
            } else if !seen.contains(dep.as_str()) {
                errors.push(ValidationError::MissingDependency {
                    step: step.id.clone(),
                    dependency: dep.clone(),
                });
            }
        }
    }
    errors
}

/// Make every referenced step a declared dependency of the referencing step.
fn add_reference_dependencies(
    plan: &mut Plan,
    issues: &mut Vec<ValidationIssue>,
) -> Vec<ValidationError> {
    let declared: HashSet<StepId> = plan.steps.iter().map(|s| s.id.clone()).collect();
    let mut errors = Vec::new();

    for step in &mut plan.steps {
        for site in collect_references(&step.params) {
            let target = site.reference.step_id;
            if target == step.id {
                errors.push(ValidationError::SelfDependency(step.id.clone()));
                continue;
            }
            if !declared.contains(&target) {
                errors.push(ValidationError::UnknownReference {
                    step: step.id.clone(),
                    target,
                });
                continue;
            }
            if !step.depends_on_step(&target) {
                tracing::debug!(step_id = %step.id, dependency = %target, "added missing dependency");
                issues.push(ValidationIssue::corrected(
                    &step.id,
                    format!(
                        "step '{}' references step '{}' in parameter '{}' without depending on it; dependency added",
                        step.id, target, site.param
                    ),
                ));
                step.depends_on.push(target);
            }
        }
    }
    errors
}

/// Warn where a composite output flows into a scalar-only slot.
fn check_types(
    plan: &Plan,
    contracts: &BTreeMap<String, ActionMeta>,
    issues: &mut Vec<ValidationIssue>,
) {
    for step in &plan.steps {
        let consumer = contracts.get(&step.action);
        for site in collect_references(&step.params) {
            if !site.reference.path.is_empty() {
                continue;
            }
            let Some(producer) = plan
                .get_step(site.reference.step_id.as_str())
                .and_then(|p| contracts.get(&p.action))
            else {
                continue;
            };
            if property_shape(&producer.output_schema, &site.reference.field)
                != ValueShape::Composite
            {
                continue;
            }

            let message = match site.form {
                ReferenceForm::Inline => format!(
                    "step '{}' parameter '{}': inline reference '{}' points at a list or map; add a step that formats it as text",
                    step.id, site.param, site.reference.inline_token()
                ),
                ReferenceForm::Whole => {
                    let accepts_scalar_only = consumer
                        .map(|meta| property_shape(&meta.input_schema, &site.param))
                        == Some(ValueShape::Scalar);
                    if !accepts_scalar_only {
                        continue;
                    }
                    format!(
                        "step '{}' parameter '{}' accepts only scalar input but '{}' is a list or map; add a step that adapts it",
                        step.id, site.param, site.reference
                    )
                }
            };
            issues.push(ValidationIssue::warning(&step.id, message));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::StaticCatalog;
    use crate::types::Step;
    use serde_json::json;

    fn catalog() -> Arc<dyn CapabilityCatalog> {
        Arc::new(
            StaticCatalog::new()
                .with(
                    ActionMeta::new("fetch", "fetch a document").with_output_schema(json!({
                        "type": "object",
                        "properties": {
                            "text": { "type": "string" },
                            "files": { "type": "array" }
                        }
                    })),
                )
                .with(
                    ActionMeta::new("send", "send a message").with_input_schema(json!({
                        "type": "object",
                        "properties": {
                            "body": { "type": "string" },
                            "attachment": { "type": "string" }
                        }
                    })),
                )
                .with(
                    ActionMeta::new("write_doc", "write a document")
                        .with_output_schema(json!({
                            "properties": { "path": { "type": "string" } }
                        }))
                        .produces_artifact("path", "document"),
                )
                .with(
                    ActionMeta::new("mail", "mail a document")
                        .requires_artifact("attachment", "document"),
                ),
        )
    }

    fn validator() -> PlanValidator {
        PlanValidator::new(catalog())
    }

    fn dep(id: &str) -> Vec<StepId> {
        vec![StepId::from(id)]
    }

    #[test]
    fn test_unknown_action_rejects_whole_plan() {
        let plan = Plan::new(
            "bad action",
            vec![
                Step::action("1", "fetch"),
                Step::action("2", "teleport").with_depends_on(dep("1")),
            ],
        );
        let rejection = validator().validate(plan).expect_err("rejected");
        assert_eq!(
            rejection.errors,
            vec![ValidationError::UnknownAction {
                step: StepId::from("2"),
                action: "teleport".to_string(),
            }]
        );
        assert_eq!(rejection.plan.complexity, PlanComplexity::Impossible);
        assert!(rejection.issues.iter().any(|i| i.is_fatal()));
    }

    #[test]
    fn test_cycle_rejects_plan() {
        let plan = Plan::new(
            "cycle",
            vec![
                Step::action("1", "fetch").with_depends_on(dep("2")),
                Step::action("2", "fetch").with_depends_on(dep("1")),
            ],
        );
        let rejection = validator().validate(plan).expect_err("cycle");
        assert!(matches!(
            rejection.errors.as_slice(),
            [ValidationError::CycleDetected(ids)] if ids.len() == 2
        ));
    }

    #[test]
    fn test_reference_induced_cycle_rejects_plan() {
        let plan = Plan::new(
            "hidden cycle",
            vec![
                Step::action("1", "send").with_param("body", json!("$step2.text")),
                Step::action("2", "fetch").with_depends_on(dep("1")),
            ],
        );
        let rejection = validator().validate(plan).expect_err("cycle");
        assert!(matches!(
            rejection.errors.as_slice(),
            [ValidationError::CycleDetected(_)]
        ));
    }

    #[test]
    fn test_structural_errors_are_collected() {
        let plan = Plan::new(
            "broken",
            vec![
                Step::action("1", "fetch").with_depends_on(dep("1")),
                Step::action("1", "fetch"),
                Step::action("3", "send").with_depends_on(dep("9")),
            ],
        );
        let rejection = validator().validate(plan).expect_err("structure");
        assert!(rejection
            .errors
            .contains(&ValidationError::DuplicateStepId(StepId::from("1"))));
        assert!(rejection
            .errors
            .contains(&ValidationError::SelfDependency(StepId::from("1"))));
        assert!(rejection
            .errors
            .contains(&ValidationError::MissingDependency {
                step: StepId::from("3"),
                dependency: StepId::from("9"),
            }));
    }

    #[test]
    fn test_empty_and_impossible_plans_are_rejected() {
        let rejection = validator()
            .validate(Plan::new("nothing", Vec::new()))
            .expect_err("empty");
        assert_eq!(rejection.errors, vec![ValidationError::EmptyPlan]);

        let plan = Plan::new("moon", vec![Step::action("1", "fetch")])
            .with_complexity(PlanComplexity::Impossible);
        let rejection = validator().validate(plan).expect_err("impossible");
        assert_eq!(rejection.errors, vec![ValidationError::ImpossiblePlan]);
    }

    #[test]
    fn test_missing_reference_dependency_is_added_with_warning() {
        let plan = Plan::new(
            "implicit dep",
            vec![
                Step::action("1", "fetch"),
                Step::action("2", "send").with_param("body", json!("$step1.text")),
            ],
        );
        let validated = validator().validate(plan).expect("accepted");
        let step2 = validated.plan.get_step("2").expect("step 2");
        assert_eq!(step2.depends_on, dep("1"));
        let warning = validated
            .warnings
            .iter()
            .find(|w| w.message.contains("dependency added"))
            .expect("warning");
        assert!(warning.autocorrected);
        assert_eq!(warning.severity, Severity::Warning);
        assert_eq!(warning.step_id, Some(StepId::from("2")));
    }

    #[test]
    fn test_reference_to_undeclared_step_is_fatal() {
        let plan = Plan::new(
            "ghost",
            vec![Step::action("1", "send").with_param("body", json!("$step7.text"))],
        );
        let rejection = validator().validate(plan).expect_err("ghost");
        assert_eq!(
            rejection.errors,
            vec![ValidationError::UnknownReference {
                step: StepId::from("1"),
                target: StepId::from("7"),
            }]
        );
    }

    #[test]
    fn test_malformed_token_is_repaired_and_dependency_added() {
        let plan = Plan::new(
            "shape",
            vec![
                Step::action("1", "fetch"),
                Step::action("2", "send").with_param("body", json!("Summary: ${step1.text}")),
            ],
        );
        let validated = validator().validate(plan).expect("accepted");
        let step2 = validated.plan.get_step("2").expect("step 2");
        assert_eq!(step2.params["body"], json!("Summary: {$step1.text}"));
        assert_eq!(step2.depends_on, dep("1"));
        assert_eq!(validated.warnings.iter().filter(|w| w.autocorrected).count(), 2);
    }

    #[test]
    fn test_field_alias_rewrites_undeclared_field() {
        let plan = Plan::new(
            "alias",
            vec![
                Step::action("1", "fetch"),
                Step::action("2", "send")
                    .with_param("body", json!("$step1.content"))
                    .with_depends_on(dep("1")),
            ],
        );
        let validated = validator().validate(plan).expect("accepted");
        let step2 = validated.plan.get_step("2").expect("step 2");
        assert_eq!(step2.params["body"], json!("$step1.text"));
        assert!(validated
            .warnings
            .iter()
            .any(|w| w.autocorrected && w.message.contains("using 'text'")));
    }

    #[test]
    fn test_unknown_field_without_alias_is_warned_not_rewritten() {
        let plan = Plan::new(
            "no alias",
            vec![
                Step::action("1", "fetch"),
                Step::action("2", "send")
                    .with_param("body", json!("$step1.missing_field"))
                    .with_depends_on(dep("1")),
            ],
        );
        let validated = validator().validate(plan).expect("accepted");
        let step2 = validated.plan.get_step("2").expect("step 2");
        assert_eq!(step2.params["body"], json!("$step1.missing_field"));
        assert!(validated
            .warnings
            .iter()
            .any(|w| !w.autocorrected && w.message.contains("missing_field")));
    }

    #[test]
    fn test_missing_artifact_is_injected_from_nearest_producer() {
        let plan = Plan::new(
            "artifact",
            vec![
                Step::action("1", "write_doc"),
                Step::action("2", "write_doc"),
                Step::action("3", "mail"),
            ],
        );
        let validated = validator().validate(plan).expect("accepted");
        let step3 = validated.plan.get_step("3").expect("step 3");
        assert_eq!(step3.params["attachment"], json!("$step2.path"));
        assert_eq!(step3.depends_on, dep("2"));
    }

    #[test]
    fn test_missing_artifact_without_producer_is_warned() {
        let plan = Plan::new("orphan", vec![Step::action("1", "mail")]);
        let validated = validator().validate(plan).expect("accepted");
        assert!(validated.plan.get_step("1").expect("1").params.is_empty());
        assert!(validated
            .warnings
            .iter()
            .any(|w| !w.autocorrected && w.message.contains("no earlier step produces")));
    }

    #[test]
    fn test_composite_into_scalar_is_a_warning_only() {
        let plan = Plan::new(
            "types",
            vec![
                Step::action("1", "fetch"),
                Step::action("2", "send")
                    .with_param("attachment", json!("$step1.files"))
                    .with_param("body", json!("Files: {$step1.files}"))
                    .with_depends_on(dep("1")),
            ],
        );
        let validated = validator().validate(plan).expect("accepted");
        let type_warnings: Vec<_> = validated
            .warnings
            .iter()
            .filter(|w| w.message.contains("list or map"))
            .collect();
        assert_eq!(type_warnings.len(), 2);
        assert!(type_warnings.iter().all(|w| !w.autocorrected));

        let quiet = PlanValidator::new(catalog()).with_type_check(false);
        let plan = validated.plan.clone();
        let revalidated = quiet.validate(plan).expect("accepted");
        assert!(revalidated.warnings.iter().all(|w| !w.message.contains("list or map")));
    }

    #[test]
    fn test_accepted_plan_carries_dag_and_contracts() {
        let plan = Plan::new(
            "ok",
            vec![
                Step::action("1", "fetch"),
                Step::action("2", "send")
                    .with_param("body", json!("$step1.text"))
                    .with_depends_on(dep("1")),
            ],
        );
        let validated = validator().validate(plan).expect("accepted");
        assert!(validated.warnings.is_empty());
        assert_eq!(validated.dag.len(), 2);
        assert!(validated.contract("send").is_some());
        assert_eq!(validated.dag.ready_nodes(), vec!["1"]);
    }
}
