//! Configuration loading and validation.

use std::collections::HashSet;
use std::fs;
use std::path::Path;

use thiserror::Error;

use crate::{ActionSpec, StepwiseConfig};

/// Configuration loading errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("YAML parse error: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("Invalid config: {0}")]
    Invalid(String),
}

/// Load full stepwise configuration from YAML file.
pub fn load_config(path: &Path) -> Result<StepwiseConfig, ConfigError> {
    let content = fs::read_to_string(path)?;
    parse_config(&content)
}

/// Parse and validate configuration from YAML text.
pub fn parse_config(content: &str) -> Result<StepwiseConfig, ConfigError> {
    let config: StepwiseConfig = serde_yaml::from_str(content)?;
    validate_config(&config)?;
    Ok(config)
}

pub fn validate_config(config: &StepwiseConfig) -> Result<(), ConfigError> {
    if config.version == 0 {
        return Err(ConfigError::Invalid(
            "version must be greater than 0".to_string(),
        ));
    }

    if config.app.name.trim().is_empty() {
        return Err(ConfigError::Invalid(
            "app.name must not be empty".to_string(),
        ));
    }

    if config.engine.max_in_flight == 0 {
        return Err(ConfigError::Invalid(
            "engine.max_in_flight must be > 0".to_string(),
        ));
    }

    if config.engine.step_timeout_ms == 0 {
        return Err(ConfigError::Invalid(
            "engine.step_timeout_ms must be > 0".to_string(),
        ));
    }

    if config.engine.event_buffer == 0 {
        return Err(ConfigError::Invalid(
            "engine.event_buffer must be > 0".to_string(),
        ));
    }

    for alias in &config.validation.field_aliases {
        if alias.field.trim().is_empty() || alias.replacement.trim().is_empty() {
            return Err(ConfigError::Invalid(format!(
                "validation.field_aliases[{}]: field and replacement must not be empty",
                alias.action
            )));
        }
    }

    validate_actions(&config.actions)?;
    Ok(())
}

fn validate_actions(actions: &[ActionSpec]) -> Result<(), ConfigError> {
    let mut seen = HashSet::new();
    for spec in actions {
        if spec.name.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "action name must not be empty".to_string(),
            ));
        }
        if !seen.insert(spec.name.as_str()) {
            return Err(ConfigError::Invalid(format!(
                "action '{}' is declared more than once",
                spec.name
            )));
        }
        if !spec.input_schema.is_null() && !spec.input_schema.is_object() {
            return Err(ConfigError::Invalid(format!(
                "action '{}' input_schema must be an object",
                spec.name
            )));
        }
        if !spec.output_schema.is_null() && !spec.output_schema.is_object() {
            return Err(ConfigError::Invalid(format!(
                "action '{}' output_schema must be an object",
                spec.name
            )));
        }
        if spec.timeout_ms == Some(0) {
            return Err(ConfigError::Invalid(format!(
                "action '{}' timeout_ms must be > 0",
                spec.name
            )));
        }
    }
    Ok(())
}
