//! Handler traits.
//!
//! Two layers:
//! - `Handler` is object-safe and works on raw payloads. The registry stores
//!   `Arc<dyn Handler>`.
//! - `ParamsHandler<P>` receives a deserialized `P: HandlerParams`, and
//!   `TypedHandler<P, H>` erases it back into a `Handler`.

use std::marker::PhantomData;

use async_trait::async_trait;
use serde::de::DeserializeOwned;

use crate::domain::Payload;
use crate::error::HandlerError;

#[async_trait]
pub trait Handler: Send + Sync {
    async fn call(&self, payload: &Payload) -> Result<Payload, HandlerError>;
}

/// Binds a payload shape to its registry key.
///
/// Unknown payload fields (such as `function` itself) are ignored unless the
/// type opts into `deny_unknown_fields`.
pub trait HandlerParams: DeserializeOwned + Send + Sync + 'static {
    /// `{namespace}.{source}.{action}`, e.g. `collectors.usda.wasde`.
    const KEY: &'static str;
}

#[async_trait]
pub trait ParamsHandler<P: HandlerParams>: Send + Sync {
    async fn handle(&self, params: P) -> Result<Payload, HandlerError>;
}

pub struct TypedHandler<P: HandlerParams, H: ParamsHandler<P>> {
    handler: H,
    _marker: PhantomData<fn() -> P>,
}

impl<P: HandlerParams, H: ParamsHandler<P>> TypedHandler<P, H> {
    pub fn new(handler: H) -> Self {
        Self {
            handler,
            _marker: PhantomData,
        }
    }
}

#[async_trait]
impl<P: HandlerParams, H: ParamsHandler<P>> Handler for TypedHandler<P, H> {
    async fn call(&self, payload: &Payload) -> Result<Payload, HandlerError> {
        let params: P = serde_json::from_value(serde_json::Value::Object(payload.clone()))
            .map_err(|e| HandlerError::InvalidPayload(format!("{}: {e}", P::KEY)))?;
        self.handler.handle(params).await
    }
}
