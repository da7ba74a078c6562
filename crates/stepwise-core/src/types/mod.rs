//! Core type definitions for stepwise
//!
//! - Plan: planner-produced step graph
//! - Step: individual action invocation with dependencies
//! - StepResult: normalized outcome of a step
//! - PlanRun: the mutable state of one execution

mod plan;
mod result;
mod run;
mod step;

pub use plan::{Plan, PlanComplexity};
pub use result::{ErrorCode, StepError, StepResult, StepStatus};
pub use run::{PlanRun, RunId, RunStateError, RunStatus};
pub use step::{Step, StepId};
