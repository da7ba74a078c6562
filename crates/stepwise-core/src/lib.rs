//! # Stepwise Core
//!
//! Core abstractions and deterministic logic of the stepwise plan engine.
//!
//! This crate contains:
//! - Plan / Step / StepResult / PlanRun definitions
//! - Template references between steps and their resolution
//! - Plan validation and deterministic repair
//! - The Action capability interface and registry
//! - DAG scheduling, step execution and lifecycle events
//!
//! This crate does NOT care about:
//! - Who produced the plan
//! - What the actions actually do
//! - Where configuration comes from
//! - How events are displayed

pub mod action;
pub mod context;
pub mod executor;
pub mod lifecycle;
pub mod report;
pub mod schema;
pub mod template;
pub mod types;
pub mod validator;

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::action::{
        Action, ActionContext, ActionInput, ActionMeta, ActionRegistry, ActionResult,
        CancellationToken, CapabilityCatalog, StaticCatalog,
    };
    pub use crate::context::ExecutionContext;
    pub use crate::executor::{ExecutionDag, Executor, NodeState, RetryPolicy};
    pub use crate::lifecycle::{RunEvent, RunEventReporter, RunEventType, RunEvents};
    pub use crate::report::{RunReport, StatusCounts, StepReport};
    pub use crate::template::{TemplateError, TemplateRef, TemplateResolver};
    pub use crate::types::{
        ErrorCode, Plan, PlanComplexity, PlanRun, RunId, RunStatus, Step, StepError, StepId,
        StepResult, StepStatus,
    };
    pub use crate::validator::{
        FieldAliasTable, PlanRejection, PlanValidator, Severity, ValidatedPlan, ValidationError,
        ValidationIssue,
    };
}

// Re-export key types at crate root
pub use action::{Action, ActionContext, ActionInput, ActionMeta, ActionRegistry, ActionResult};
pub use executor::Executor;
pub use lifecycle::{RunEvent, RunEventReporter, RunEventType, RunEvents};
pub use report::RunReport;
pub use types::{Plan, RunId, RunStatus, Step, StepId, StepResult, StepStatus};
pub use validator::{PlanRejection, PlanValidator, ValidatedPlan};
