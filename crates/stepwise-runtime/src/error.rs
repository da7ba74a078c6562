use thiserror::Error;

use stepwise_config::ConfigError;
use stepwise_core::types::RunId;
use stepwise_core::validator::PlanRejection;

/// Runtime errors.
#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("config error: {0}")]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Rejected(#[from] PlanRejection),
    #[error("run '{run_id}' ended abnormally: {reason}")]
    RunAborted { run_id: RunId, reason: String },
}
