//! Structured pipeline log entries.
//!
//! Entries are written by collectors, transformers and the executor, and read
//! by the health summarizer. Nothing in this crate updates or deletes them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    Start,
    Info,
    Success,
    Warning,
    Error,
    /// The agent reported that its run failed as a whole.
    Failure,
}

impl EventType {
    pub const ALL: [EventType; 6] = [
        EventType::Start,
        EventType::Info,
        EventType::Success,
        EventType::Warning,
        EventType::Error,
        EventType::Failure,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            EventType::Start => "start",
            EventType::Info => "info",
            EventType::Success => "success",
            EventType::Warning => "warning",
            EventType::Error => "error",
            EventType::Failure => "failure",
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lowered = s.trim().to_ascii_lowercase();
        EventType::ALL
            .into_iter()
            .find(|event| event.as_str() == lowered)
            .ok_or_else(|| format!("unknown event type '{s}'"))
    }
}

/// Data layer an entry belongs to: raw, cleaned, analysis-ready, or the
/// orchestrator itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Layer {
    Bronze,
    Silver,
    Gold,
    System,
}

impl Layer {
    pub fn as_str(self) -> &'static str {
        match self {
            Layer::Bronze => "bronze",
            Layer::Silver => "silver",
            Layer::Gold => "gold",
            Layer::System => "system",
        }
    }
}

impl fmt::Display for Layer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Layer {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "bronze" => Ok(Layer::Bronze),
            "silver" => Ok(Layer::Silver),
            "gold" => Ok(Layer::Gold),
            "system" => Ok(Layer::System),
            _ => Err(format!("unknown layer '{s}'")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    pub timestamp: DateTime<Utc>,
    pub agent_name: String,
    pub event_type: EventType,
    pub layer: Option<Layer>,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

impl LogEntry {
    pub fn new(
        timestamp: DateTime<Utc>,
        agent_name: impl Into<String>,
        event_type: EventType,
        message: impl Into<String>,
    ) -> Self {
        Self {
            timestamp,
            agent_name: agent_name.into(),
            event_type,
            layer: None,
            message: message.into(),
            data: None,
        }
    }

    pub fn with_layer(mut self, layer: Layer) -> Self {
        self.layer = Some(layer);
        self
    }

    pub fn with_data(mut self, data: serde_json::Value) -> Self {
        self.data = Some(data);
        self
    }
}
