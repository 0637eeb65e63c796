use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;

use crate::app::HealthSummarizer;
use crate::domain::Payload;
use crate::error::HandlerError;
use crate::typed::{HandlerParams, ParamsHandler};

#[derive(Debug, Default, Deserialize)]
pub struct HealthCheckParams {
    #[serde(default)]
    pub notify: bool,
}

impl HandlerParams for HealthCheckParams {
    const KEY: &'static str = "builtin.health_check.run";
}

/// Summarizes today's pipeline log. Meant to be scheduled in the evening.
pub struct HealthCheckHandler {
    summarizer: Arc<HealthSummarizer>,
}

impl HealthCheckHandler {
    pub fn new(summarizer: Arc<HealthSummarizer>) -> Self {
        Self { summarizer }
    }
}

#[async_trait]
impl ParamsHandler<HealthCheckParams> for HealthCheckHandler {
    async fn handle(&self, params: HealthCheckParams) -> Result<Payload, HandlerError> {
        let report = self
            .summarizer
            .run(self.summarizer.today(), params.notify)
            .await
            .map_err(|e| HandlerError::failed(format!("health check: {e}")))?;

        match serde_json::to_value(&report) {
            Ok(serde_json::Value::Object(map)) => Ok(map),
            Ok(_) => Err(HandlerError::failed("health report did not serialize to an object")),
            Err(e) => Err(HandlerError::failed(format!("health report: {e}"))),
        }
    }
}
