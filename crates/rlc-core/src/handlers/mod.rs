//! Built-in handlers shipped with the orchestrator. Data collectors register
//! their own handlers next to these.

mod health_check;
mod noop;
mod script;

use std::sync::Arc;

pub use health_check::{HealthCheckHandler, HealthCheckParams};
pub use noop::{NOOP_KEY, NoopHandler};
pub use script::{ScriptHandler, ScriptParams};

use crate::app::{HealthSummarizer, RegistryBuilder};
use crate::error::RegistryError;

/// Register `builtin.noop`, `builtin.script.run` and `builtin.health_check.run`.
pub fn register_builtins(
    builder: RegistryBuilder,
    summarizer: Arc<HealthSummarizer>,
) -> Result<RegistryBuilder, RegistryError> {
    builder
        .register(NOOP_KEY, Arc::new(NoopHandler))?
        .register_typed::<ScriptParams, _>(ScriptHandler)?
        .register_typed::<HealthCheckParams, _>(HealthCheckHandler::new(summarizer))
}
