//! # Stepwise Config
//!
//! Single-file configuration for stepwise. One `stepwise.yaml` configures
//! engine limits, validation repair rules, the offline action catalog and
//! observability settings. Every section is optional.

mod loader;

pub use loader::{load_config, parse_config, validate_config, ConfigError};

use std::time::Duration;

use serde::Deserialize;
use serde_json::Value;

/// Top-level configuration schema for stepwise.
#[derive(Debug, Clone, Deserialize)]
pub struct StepwiseConfig {
    /// Config schema version.
    #[serde(default = "default_version")]
    pub version: u32,
    #[serde(default)]
    pub app: AppConfig,
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub validation: ValidationConfig,
    /// Capability catalog used when validating plans without live actions.
    #[serde(default)]
    pub actions: Vec<ActionSpec>,
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

fn default_version() -> u32 {
    1
}

impl Default for StepwiseConfig {
    fn default() -> Self {
        Self {
            version: default_version(),
            app: AppConfig::default(),
            engine: EngineConfig::default(),
            validation: ValidationConfig::default(),
            actions: Vec::new(),
            observability: ObservabilityConfig::default(),
        }
    }
}

impl StepwiseConfig {
    pub fn action(&self, name: &str) -> Option<&ActionSpec> {
        self.actions.iter().find(|spec| spec.name == name)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    #[serde(default = "default_app_name")]
    pub name: String,
    #[serde(default = "default_env")]
    pub environment: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            name: default_app_name(),
            environment: default_env(),
        }
    }
}

fn default_app_name() -> String {
    "stepwise".to_string()
}

fn default_env() -> String {
    "development".to_string()
}

/// Scheduler and execution adapter limits.
#[derive(Debug, Clone, Deserialize)]
pub struct EngineConfig {
    #[serde(default = "default_max_in_flight")]
    pub max_in_flight: usize,
    /// Default per-step timeout; actions may override it.
    #[serde(default = "default_step_timeout_ms")]
    pub step_timeout_ms: u64,
    /// How long an in-flight step may keep running after cancellation.
    /// Absent means it runs until it returns or times out.
    #[serde(default)]
    pub cancel_grace_ms: Option<u64>,
    /// Retries after the first attempt for retryable action errors.
    #[serde(default)]
    pub max_retry_attempts: u32,
    #[serde(default = "default_retry_base_delay_ms")]
    pub retry_base_delay_ms: u64,
    #[serde(default = "default_retry_max_delay_ms")]
    pub retry_max_delay_ms: u64,
    /// Capacity of the live lifecycle event channel.
    #[serde(default = "default_event_buffer")]
    pub event_buffer: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_in_flight: default_max_in_flight(),
            step_timeout_ms: default_step_timeout_ms(),
            cancel_grace_ms: None,
            max_retry_attempts: 0,
            retry_base_delay_ms: default_retry_base_delay_ms(),
            retry_max_delay_ms: default_retry_max_delay_ms(),
            event_buffer: default_event_buffer(),
        }
    }
}

impl EngineConfig {
    pub fn step_timeout(&self) -> Duration {
        Duration::from_millis(self.step_timeout_ms)
    }

    pub fn cancel_grace(&self) -> Option<Duration> {
        self.cancel_grace_ms.map(Duration::from_millis)
    }

    pub fn retry_base_delay(&self) -> Duration {
        Duration::from_millis(self.retry_base_delay_ms)
    }

    pub fn retry_max_delay(&self) -> Duration {
        Duration::from_millis(self.retry_max_delay_ms)
    }
}

fn default_max_in_flight() -> usize {
    4
}

fn default_step_timeout_ms() -> u64 {
    60_000
}

fn default_retry_base_delay_ms() -> u64 {
    200
}

fn default_retry_max_delay_ms() -> u64 {
    5_000
}

fn default_event_buffer() -> usize {
    1024
}

#[derive(Debug, Clone, Deserialize)]
pub struct ValidationConfig {
    /// Extra field alias rules on top of the built-in table.
    #[serde(default)]
    pub field_aliases: Vec<FieldAliasSpec>,
    #[serde(default = "default_true")]
    pub type_check: bool,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            field_aliases: Vec::new(),
            type_check: true,
        }
    }
}

fn default_true() -> bool {
    true
}

/// `(action, field) -> replacement`; `action: "*"` matches any producer.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct FieldAliasSpec {
    #[serde(default = "default_alias_action")]
    pub action: String,
    pub field: String,
    pub replacement: String,
}

fn default_alias_action() -> String {
    "*".to_string()
}

/// Declared contract of one action.
#[derive(Debug, Clone, Deserialize)]
pub struct ActionSpec {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub input_schema: Value,
    #[serde(default)]
    pub output_schema: Value,
    #[serde(default)]
    pub timeout_ms: Option<u64>,
    #[serde(default)]
    pub artifact: Option<ArtifactSpec>,
}

impl ActionSpec {
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_ms.map(Duration::from_millis)
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ArtifactSpec {
    /// Output field carrying an artifact this action produces
    #[serde(default)]
    pub produces: Option<ArtifactOutputSpec>,
    /// Parameter that must receive an artifact
    #[serde(default)]
    pub requires: Option<ArtifactInputSpec>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ArtifactOutputSpec {
    pub field: String,
    pub kind: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ArtifactInputSpec {
    pub param: String,
    pub kind: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ObservabilityConfig {
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default)]
    pub traces_enabled: bool,
    #[serde(default)]
    pub log_file: Option<String>,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            traces_enabled: false,
            log_file: None,
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}
