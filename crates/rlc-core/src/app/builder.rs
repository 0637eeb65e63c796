//! RegistryBuilder - startup wiring for the handler registry.
//!
//! `expect()` declares the keys the configuration will dispatch to;
//! `build()` fails fast when any of them is not registered, instead of
//! letting the first scheduled run fail with "unregistered handler".

use std::collections::BTreeSet;
use std::sync::Arc;

use crate::error::RegistryError;
use crate::typed::{Handler, HandlerParams, HandlerRegistry, ParamsHandler};

/// Collects handlers and expected keys, then yields a [`HandlerRegistry`].
///
/// # Example
/// ```ignore
/// use std::sync::Arc;
/// use rlc_core::app::RegistryBuilder;
/// use rlc_core::handlers::{NOOP_KEY, NoopHandler};
///
/// let registry = RegistryBuilder::new()
///     .register(NOOP_KEY, Arc::new(NoopHandler))?
///     .expect([NOOP_KEY])
///     .build()?;
/// assert!(registry.contains(NOOP_KEY));
/// ```
#[derive(Default)]
pub struct RegistryBuilder {
    registry: HandlerRegistry,
    expected: BTreeSet<String>,
}

impl RegistryBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(
        mut self,
        key: impl Into<String>,
        handler: Arc<dyn Handler>,
    ) -> Result<Self, RegistryError> {
        self.registry.register(key, handler)?;
        Ok(self)
    }

    pub fn register_typed<P, H>(mut self, handler: H) -> Result<Self, RegistryError>
    where
        P: HandlerParams,
        H: ParamsHandler<P> + 'static,
    {
        self.registry.register_typed::<P, H>(handler)?;
        Ok(self)
    }

    /// Add keys that must be registered by the time `build()` runs.
    /// May be called more than once; the sets accumulate.
    pub fn expect<I, S>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.expected.extend(keys.into_iter().map(Into::into));
        self
    }

    /// # Errors
    /// `MissingHandlers` with every expected key that has no handler, sorted.
    pub fn build(self) -> Result<HandlerRegistry, RegistryError> {
        let missing: Vec<String> = self
            .expected
            .into_iter()
            .filter(|key| !self.registry.contains(key))
            .collect();
        if !missing.is_empty() {
            return Err(RegistryError::MissingHandlers(missing));
        }
        Ok(self.registry)
    }
}
