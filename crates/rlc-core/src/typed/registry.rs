//! HandlerRegistry - handler key to handler lookup.
//!
//! Built once at startup and shared read-only afterwards. Registration after
//! the executor has started is not supported.

use std::collections::HashMap;
use std::sync::Arc;

use super::handler::{Handler, HandlerParams, ParamsHandler, TypedHandler};
use crate::error::RegistryError;

/// Handlers keyed by the string stored in a task's `function` field.
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: HashMap<String, Arc<dyn Handler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` under `key`.
    ///
    /// # Errors
    /// `AlreadyRegistered` if the key is taken. The existing handler is kept.
    pub fn register(
        &mut self,
        key: impl Into<String>,
        handler: Arc<dyn Handler>,
    ) -> Result<(), RegistryError> {
        let key = key.into();
        if self.handlers.contains_key(&key) {
            return Err(RegistryError::AlreadyRegistered(key));
        }
        self.handlers.insert(key, handler);
        Ok(())
    }

    /// Register a typed handler under `P::KEY`.
    pub fn register_typed<P, H>(&mut self, handler: H) -> Result<(), RegistryError>
    where
        P: HandlerParams,
        H: ParamsHandler<P> + 'static,
    {
        self.register(P::KEY, Arc::new(TypedHandler::<P, H>::new(handler)))
    }

    /// `None` for an unregistered key; the executor turns that into
    /// `HandlerError::NotFound` on the task row.
    pub fn get(&self, key: &str) -> Option<Arc<dyn Handler>> {
        self.handlers.get(key).cloned()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.handlers.contains_key(key)
    }

    /// Registered keys, sorted.
    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.handlers.keys().cloned().collect();
        keys.sort();
        keys
    }
}
