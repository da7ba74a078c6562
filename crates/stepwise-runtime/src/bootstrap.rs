//! Bootstrap helpers for building an engine from a single YAML config.

use std::sync::{Arc, Mutex, OnceLock};

use stepwise_config::{ActionSpec, ObservabilityConfig, StepwiseConfig};
use stepwise_core::action::{ActionMeta, ActionRegistry, CapabilityCatalog, StaticCatalog};
use stepwise_core::executor::Executor;
use stepwise_core::validator::{FieldAliasTable, PlanValidator};

use crate::engine::Engine;
use crate::event_bus::BroadcastEventBus;

static TRACING_INIT: OnceLock<()> = OnceLock::new();

/// Contract of a configured action.
pub fn action_meta_from_spec(spec: &ActionSpec) -> ActionMeta {
    let mut meta = ActionMeta::new(spec.name.clone(), spec.description.clone())
        .with_input_schema(spec.input_schema.clone())
        .with_output_schema(spec.output_schema.clone());
    if let Some(timeout) = spec.timeout() {
        meta = meta.with_timeout(timeout);
    }
    if let Some(artifact) = &spec.artifact {
        if let Some(produces) = &artifact.produces {
            meta = meta.produces_artifact(produces.field.clone(), produces.kind.clone());
        }
        if let Some(requires) = &artifact.requires {
            meta = meta.requires_artifact(requires.param.clone(), requires.kind.clone());
        }
    }
    meta
}

/// Metadata-only catalog of every configured action.
pub fn catalog_from_config(config: &StepwiseConfig) -> StaticCatalog {
    config.actions.iter().map(action_meta_from_spec).collect()
}

/// Validator with the configured alias rules and type check switch.
pub fn validator_from_config(
    config: &StepwiseConfig,
    catalog: Arc<dyn CapabilityCatalog>,
) -> PlanValidator {
    let mut aliases = FieldAliasTable::builtin();
    for alias in &config.validation.field_aliases {
        aliases.insert(
            alias.action.clone(),
            alias.field.clone(),
            alias.replacement.clone(),
        );
    }
    PlanValidator::new(catalog)
        .with_field_aliases(aliases)
        .with_type_check(config.validation.type_check)
}

/// Build an engine over live actions using the configured limits.
pub fn engine_from_config(config: &StepwiseConfig, actions: ActionRegistry) -> Engine {
    let actions = Arc::new(actions);
    let engine_config = &config.engine;
    let executor = Executor::with_registry(actions.clone())
        .with_max_in_flight(engine_config.max_in_flight)
        .with_step_timeout(engine_config.step_timeout())
        .with_cancel_grace(engine_config.cancel_grace())
        .with_retry_policy(
            engine_config.max_retry_attempts,
            engine_config.retry_base_delay(),
            engine_config.retry_max_delay(),
        );
    tracing::debug!(
        app = %config.app.name,
        actions = actions.len(),
        max_in_flight = executor.max_in_flight,
        "engine built from config"
    );
    Engine::from_parts(
        validator_from_config(config, actions),
        executor,
        BroadcastEventBus::new(engine_config.event_buffer),
    )
}

/// Install the global tracing subscriber once. `RUST_LOG` wins over the
/// configured level; later calls are no-ops.
pub fn init_tracing(observability: &ObservabilityConfig) {
    TRACING_INIT.get_or_init(|| {
        let log_file_path = std::env::var("STEPWISE_LOG_FILE")
            .ok()
            .filter(|v| !v.trim().is_empty())
            .or_else(|| observability.log_file.clone());
        let file_writer = log_file_path.as_deref().and_then(create_log_writer);
        let fallback_level = match observability.log_level.trim().to_ascii_lowercase().as_str() {
            "trace" => "trace",
            "debug" => "debug",
            "info" => "info",
            "warn" => "warn",
            "error" => "error",
            _ => "info",
        };

        let make_filter = || {
            tracing_subscriber::EnvFilter::try_from_default_env()
                .or_else(|_| tracing_subscriber::EnvFilter::try_new(fallback_level))
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"))
        };
        let span_events = if observability.traces_enabled {
            tracing_subscriber::fmt::format::FmtSpan::NEW
                | tracing_subscriber::fmt::format::FmtSpan::CLOSE
        } else {
            tracing_subscriber::fmt::format::FmtSpan::NONE
        };

        match file_writer {
            Some(writer) => {
                let _ = tracing_subscriber::fmt()
                    .with_env_filter(make_filter())
                    .with_target(true)
                    .with_ansi(false)
                    .with_writer(writer)
                    .with_span_events(span_events)
                    .try_init();
            }
            None => {
                let _ = tracing_subscriber::fmt()
                    .with_env_filter(make_filter())
                    .with_target(true)
                    .with_writer(std::io::stderr)
                    .with_span_events(span_events)
                    .try_init();
            }
        }

        tracing::info!(
            log_level = %observability.log_level,
            traces_enabled = observability.traces_enabled,
            log_file = log_file_path.as_deref().unwrap_or("(stderr)"),
            "tracing initialized"
        );
    });
}

fn create_log_writer(path: &str) -> Option<SharedFileMakeWriter> {
    use std::fs::{create_dir_all, OpenOptions};
    use std::path::Path;

    let file_path = Path::new(path);
    if let Some(parent) = file_path.parent() {
        if !parent.as_os_str().is_empty() {
            if let Err(err) = create_dir_all(parent) {
                eprintln!(
                    "failed to create log directory '{}': {}",
                    parent.display(),
                    err
                );
                return None;
            }
        }
    }
    match OpenOptions::new().create(true).append(true).open(file_path) {
        Ok(file) => Some(SharedFileMakeWriter::new(file)),
        Err(err) => {
            eprintln!("failed to open log file '{}': {}", file_path.display(), err);
            None
        }
    }
}

#[derive(Clone)]
struct SharedFileMakeWriter {
    file: Arc<Mutex<std::fs::File>>,
}

impl SharedFileMakeWriter {
    fn new(file: std::fs::File) -> Self {
        Self {
            file: Arc::new(Mutex::new(file)),
        }
    }
}

struct SharedFileWriter {
    file: Arc<Mutex<std::fs::File>>,
}

impl<'a> tracing_subscriber::fmt::MakeWriter<'a> for SharedFileMakeWriter {
    type Writer = SharedFileWriter;

    fn make_writer(&'a self) -> Self::Writer {
        SharedFileWriter {
            file: self.file.clone(),
        }
    }
}

impl std::io::Write for SharedFileWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let mut file = self
            .file
            .lock()
            .map_err(|_| std::io::Error::other("log file mutex poisoned"))?;
        std::io::Write::write(&mut *file, buf)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        let mut file = self
            .file
            .lock()
            .map_err(|_| std::io::Error::other("log file mutex poisoned"))?;
        std::io::Write::flush(&mut *file)
    }
}
