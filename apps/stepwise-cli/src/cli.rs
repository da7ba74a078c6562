use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use serde_json::json;

use stepwise_config::{load_config, StepwiseConfig};
use stepwise_core::types::Plan;
use stepwise_runtime::{catalog_from_config, init_tracing, validator_from_config};

#[derive(Debug, Parser)]
#[command(name = "stepwise", about = "Stepwise plan engine CLI")]
pub struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Validate and repair a plan against the configured action catalog
    Validate(ValidateArgs),
    /// Load and validate a config file
    CheckConfig(ConfigArgs),
}

#[derive(Debug, Args, Clone)]
struct ValidateArgs {
    #[arg(long, default_value = "configs/stepwise.yaml")]
    config: PathBuf,
    /// Plan JSON file
    #[arg(value_name = "PLAN")]
    plan: PathBuf,
    /// Print the repaired plan alongside the verdict
    #[arg(long)]
    show_plan: bool,
}

#[derive(Debug, Args, Clone)]
struct ConfigArgs {
    #[arg(long, default_value = "configs/stepwise.yaml")]
    config: PathBuf,
}

impl Cli {
    pub fn run(self) -> anyhow::Result<()> {
        match self.command {
            Command::Validate(args) => validate(args),
            Command::CheckConfig(args) => check_config(args),
        }
    }
}

fn load(path: &Path) -> anyhow::Result<StepwiseConfig> {
    let config = load_config(path)
        .with_context(|| format!("failed to load config '{}'", path.display()))?;
    init_tracing(&config.observability);
    Ok(config)
}

fn validate(args: ValidateArgs) -> anyhow::Result<()> {
    let config = load(&args.config)?;
    let raw = fs::read_to_string(&args.plan)
        .with_context(|| format!("failed to read plan '{}'", args.plan.display()))?;
    let plan = Plan::from_json(&raw)
        .with_context(|| format!("plan '{}' is not valid JSON", args.plan.display()))?;

    let validator = validator_from_config(&config, Arc::new(catalog_from_config(&config)));
    match validator.validate(plan) {
        Ok(validated) => {
            let mut verdict = json!({
                "accepted": true,
                "steps": validated.plan.steps.len(),
                "execution_order": validated.dag.order(),
                "warnings": validated.warnings,
            });
            if args.show_plan {
                verdict["plan"] = serde_json::to_value(&validated.plan)?;
            }
            println!("{}", serde_json::to_string_pretty(&verdict)?);
            Ok(())
        }
        Err(rejection) => {
            let verdict = json!({
                "accepted": false,
                "reason": rejection.reason,
                "issues": rejection.issues,
            });
            println!("{}", serde_json::to_string_pretty(&verdict)?);
            Err(anyhow::anyhow!(rejection))
        }
    }
}

fn check_config(args: ConfigArgs) -> anyhow::Result<()> {
    let config = load(&args.config)?;
    tracing::debug!(path = %args.config.display(), "config loaded");
    let summary = json!({
        "app": config.app.name,
        "environment": config.app.environment,
        "max_in_flight": config.engine.max_in_flight,
        "step_timeout_ms": config.engine.step_timeout_ms,
        "max_retry_attempts": config.engine.max_retry_attempts,
        "actions": config.actions.iter().map(|a| a.name.as_str()).collect::<Vec<_>>(),
        "field_aliases": config.validation.field_aliases.len(),
        "type_check": config.validation.type_check,
    });
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}
