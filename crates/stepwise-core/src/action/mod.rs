//! Action abstraction module
//!
//! - Action: the capability interface every tool handler implements
//! - ActionMeta: contract used by validation and the execution adapter
//! - ActionInput / ActionContext / ActionResult: per-call data
//! - ActionRegistry / StaticCatalog: name -> capability lookup

mod context;
mod input;
mod registry;
mod result;

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub use context::ActionContext;
pub use input::ActionInput;
pub use registry::{ActionRegistry, CapabilityCatalog, StaticCatalog};
pub use result::ActionResult;

// Re-export CancellationToken for handlers that poll it
pub use tokio_util::sync::CancellationToken;

/// Action trait - a black box the engine dispatches resolved steps to.
#[async_trait]
pub trait Action: Send + Sync {
    /// Unique action name, matched against `Step::action`
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    /// Contract used by validation and runtime checks
    fn metadata(&self) -> ActionMeta {
        ActionMeta::new(self.name(), self.description())
    }

    /// Execute the action
    async fn run(&self, input: ActionInput, ctx: ActionContext) -> ActionResult;
}

/// Artifact a step produces in one of its output fields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactOutput {
    pub field: String,
    pub kind: String,
}

/// Attachment-like parameter that must be fed by an artifact of `kind`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactInput {
    pub param: String,
    pub kind: String,
}

/// Action metadata
#[derive(Debug, Clone, PartialEq)]
pub struct ActionMeta {
    pub name: String,
    pub description: String,
    /// JSON schema for the fully resolved input payload
    pub input_schema: Value,
    /// JSON schema for the output payload
    pub output_schema: Value,
    /// Overrides the engine's default step timeout
    pub timeout: Option<Duration>,
    pub artifact_output: Option<ArtifactOutput>,
    pub artifact_input: Option<ArtifactInput>,
}

impl ActionMeta {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            input_schema: Value::Null,
            output_schema: Value::Null,
            timeout: None,
            artifact_output: None,
            artifact_input: None,
        }
    }

    pub fn with_input_schema(mut self, schema: Value) -> Self {
        self.input_schema = schema;
        self
    }

    pub fn with_output_schema(mut self, schema: Value) -> Self {
        self.output_schema = schema;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Declare that `field` of this action's output carries an artifact of `kind`.
    pub fn produces_artifact(mut self, field: impl Into<String>, kind: impl Into<String>) -> Self {
        self.artifact_output = Some(ArtifactOutput {
            field: field.into(),
            kind: kind.into(),
        });
        self
    }

    /// Declare that `param` must receive an artifact of `kind`.
    pub fn requires_artifact(mut self, param: impl Into<String>, kind: impl Into<String>) -> Self {
        self.artifact_input = Some(ArtifactInput {
            param: param.into(),
            kind: kind.into(),
        });
        self
    }
}
