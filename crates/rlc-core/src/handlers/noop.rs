use async_trait::async_trait;

use crate::domain::Payload;
use crate::error::HandlerError;
use crate::typed::Handler;

pub const NOOP_KEY: &str = "builtin.noop";

/// Returns its payload. Handy for checking a deployment end to end.
pub struct NoopHandler;

#[async_trait]
impl Handler for NoopHandler {
    async fn call(&self, payload: &Payload) -> Result<Payload, HandlerError> {
        Ok(payload.clone())
    }
}
