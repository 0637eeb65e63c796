use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::{TaskId, TaskStatus};
use crate::error::HandlerError;

/// Handler keyword arguments and handler results.
pub type Payload = serde_json::Map<String, serde_json::Value>;

/// Registry key that runs `Script` tasks.
pub const SCRIPT_HANDLER_KEY: &str = "builtin.script.run";

pub const DEFAULT_PRIORITY: i32 = 5;

/// Distinguishes one-off scripts from registered handler invocations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskType {
    /// `payload.function` names a registered handler.
    Function,
    /// `payload.script` is an executable run by the script handler.
    Script,
}

impl TaskType {
    pub fn as_str(self) -> &'static str {
        match self {
            TaskType::Function => "function",
            TaskType::Script => "script",
        }
    }
}

impl fmt::Display for TaskType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "function" => Ok(TaskType::Function),
            "script" => Ok(TaskType::Script),
            other => Err(format!("unknown task type '{other}'")),
        }
    }
}

/// A unit of deferred or recurring work, as stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    pub name: String,
    pub task_type: TaskType,
    pub payload: Payload,
    pub status: TaskStatus,
    pub priority: i32,

    /// `None` means "as soon as possible".
    pub scheduled_for: Option<DateTime<Utc>>,

    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,

    /// Set on success only; `error` is set on failure only.
    pub result: Option<Payload>,
    pub error: Option<String>,

    /// `<rule>@<occurrence>` for rows materialized by the scheduler.
    pub schedule_key: Option<String>,
}

impl Task {
    /// Build the stored row for a freshly inserted task.
    pub fn from_new(id: TaskId, new: NewTask, created_at: DateTime<Utc>) -> Self {
        Self {
            id,
            name: new.name,
            task_type: new.task_type,
            payload: new.payload,
            status: TaskStatus::Pending,
            priority: new.priority,
            scheduled_for: new.scheduled_for,
            created_at,
            started_at: None,
            completed_at: None,
            result: None,
            error: None,
            schedule_key: new.schedule_key,
        }
    }

    /// Registry key this task dispatches to.
    pub fn handler_key(&self) -> Result<&str, HandlerError> {
        match self.task_type {
            TaskType::Script => Ok(SCRIPT_HANDLER_KEY),
            TaskType::Function => self
                .payload
                .get("function")
                .and_then(|v| v.as_str())
                .ok_or_else(|| {
                    HandlerError::InvalidPayload("payload.function is missing".to_string())
                }),
        }
    }

    /// Whether this task is eligible to run at `now`.
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.status == TaskStatus::Pending && self.scheduled_for.is_none_or(|at| at <= now)
    }

    /// Sort key for due tasks: priority, then schedule time, then age.
    pub(crate) fn due_order(&self) -> (i32, DateTime<Utc>, DateTime<Utc>) {
        (
            self.priority,
            self.scheduled_for.unwrap_or(self.created_at),
            self.created_at,
        )
    }
}

/// Insert-side task description; the store assigns id and timestamps.
#[derive(Debug, Clone, PartialEq)]
pub struct NewTask {
    pub name: String,
    pub task_type: TaskType,
    pub payload: Payload,
    pub priority: i32,
    pub scheduled_for: Option<DateTime<Utc>>,
    pub schedule_key: Option<String>,
}

impl NewTask {
    /// A handler invocation; `function` is stored as `payload.function`.
    pub fn function(
        name: impl Into<String>,
        function: impl Into<String>,
        payload: Payload,
    ) -> Self {
        let mut payload = payload;
        payload.insert(
            "function".to_string(),
            serde_json::Value::String(function.into()),
        );
        Self {
            name: name.into(),
            task_type: TaskType::Function,
            payload,
            priority: DEFAULT_PRIORITY,
            scheduled_for: None,
            schedule_key: None,
        }
    }

    pub fn script(name: impl Into<String>, script: impl Into<String>, args: Vec<String>) -> Self {
        let mut payload = Payload::new();
        payload.insert("script".to_string(), serde_json::Value::String(script.into()));
        payload.insert("args".to_string(), serde_json::json!(args));
        Self {
            name: name.into(),
            task_type: TaskType::Script,
            payload,
            priority: DEFAULT_PRIORITY,
            scheduled_for: None,
            schedule_key: None,
        }
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn scheduled_for(mut self, at: DateTime<Utc>) -> Self {
        self.scheduled_for = Some(at);
        self
    }

    pub fn with_schedule_key(mut self, key: impl Into<String>) -> Self {
        self.schedule_key = Some(key.into());
        self
    }
}

/// Filter for listing tasks.
#[derive(Debug, Clone, Default)]
pub struct TaskFilter {
    pub status: Option<TaskStatus>,
    pub limit: Option<usize>,
}
