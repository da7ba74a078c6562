//! # Stepwise Runtime
//!
//! Runtime layer on top of `stepwise-core`:
//! - `Engine`: validate, start, await and cancel runs by run id
//! - live lifecycle event fan-out to subscribers
//! - post-run hooks (e.g. an external verifier)
//! - building an engine and tracing from `stepwise.yaml`

pub mod bootstrap;
mod engine;
mod error;
mod event_bus;
mod hooks;
mod run_registry;

pub use bootstrap::{
    action_meta_from_spec, catalog_from_config, engine_from_config, init_tracing,
    validator_from_config,
};
pub use engine::{Engine, RunHandle};
pub use error::RuntimeError;
pub use event_bus::BroadcastEventBus;
pub use hooks::{HookRegistry, PostRunHook};
pub use run_registry::RunRegistry;
