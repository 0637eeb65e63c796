//! TaskStore port - the source of truth for task rows.
//!
//! The queue is the only writer. Every status change goes through
//! `transition`, which enforces the monotonic state machine inside the
//! store's own lock/transaction.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::domain::{Payload, Task, TaskCounts, TaskFilter, TaskId, TaskStatus, Transition};
use crate::error::StoreError;

/// A requested status change and the outcome it records.
#[derive(Debug, Clone, PartialEq)]
pub enum StatusUpdate {
    Running,
    Succeeded(Payload),
    Failed(String),
    Skipped(String),
}

impl StatusUpdate {
    pub fn target(&self) -> TaskStatus {
        match self {
            StatusUpdate::Running => TaskStatus::Running,
            StatusUpdate::Succeeded(_) => TaskStatus::Succeeded,
            StatusUpdate::Failed(_) => TaskStatus::Failed,
            StatusUpdate::Skipped(_) => TaskStatus::Skipped,
        }
    }

    /// Apply to an in-memory row. Callers check the transition first.
    pub(crate) fn apply(self, task: &mut Task, at: DateTime<Utc>) {
        task.status = self.target();
        match self {
            StatusUpdate::Running => task.started_at = Some(at),
            StatusUpdate::Succeeded(result) => {
                task.completed_at = Some(at);
                task.result = Some(result);
                task.error = None;
            }
            StatusUpdate::Failed(error) => {
                task.completed_at = Some(at);
                task.result = None;
                task.error = Some(error);
            }
            StatusUpdate::Skipped(reason) => {
                let mut result = Payload::new();
                result.insert("skipped_reason".to_string(), serde_json::Value::String(reason));
                task.completed_at = Some(at);
                task.result = Some(result);
            }
        }
    }
}

/// Durable task rows.
///
/// # Errors
/// Every method may return `StoreError::Busy` while another process holds
/// the write lock. Callers decide whether to retry.
#[async_trait]
pub trait TaskStore: Send + Sync {
    /// Insert unconditionally.
    async fn insert(&self, task: Task) -> Result<(), StoreError>;

    /// Insert unless a row with the same `schedule_key` exists.
    /// Returns whether a row was written. Rows without a key always insert.
    async fn insert_if_absent(&self, task: Task) -> Result<bool, StoreError>;

    /// Atomically pick the next due pending task and move it to `running`.
    async fn claim_next_due(&self, now: DateTime<Utc>) -> Result<Option<Task>, StoreError>;

    /// Move a task to `update.target()` if the state machine allows it.
    /// Disallowed moves leave the row untouched and report `Ignored`.
    async fn transition(
        &self,
        id: TaskId,
        update: StatusUpdate,
        at: DateTime<Utc>,
    ) -> Result<Transition, StoreError>;

    async fn get(&self, id: TaskId) -> Result<Option<Task>, StoreError>;

    /// Newest first.
    async fn list(&self, filter: &TaskFilter) -> Result<Vec<Task>, StoreError>;

    async fn counts(&self) -> Result<TaskCounts, StoreError>;
}
