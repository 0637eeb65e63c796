//! TaskQueue - the only writer of task rows.
//!
//! Wraps a `TaskStore` with the clock and id generator, assigns ids and
//! timestamps on insert, and turns ignored transitions into log lines.

use std::sync::Arc;

use crate::domain::{
    NewTask, Payload, Task, TaskCounts, TaskFilter, TaskId, TaskStatus, Transition,
};
use crate::error::StoreError;
use crate::ports::{Clock, IdGenerator, StatusUpdate, TaskStore};

/// Error recorded on tasks found `running` when the daemon starts.
pub const INTERRUPTED_ERROR: &str = "interrupted: the executor stopped before the task finished";

/// Task lifecycle operations over a [`TaskStore`].
///
/// # Transitions
/// `mark_*` never fails on an out-of-order request. A change the state
/// machine does not allow comes back as `Transition::Ignored` and is logged
/// (warn for a real conflict, debug when the task is already in the requested
/// state).
pub struct TaskQueue {
    store: Arc<dyn TaskStore>,
    clock: Arc<dyn Clock>,
    ids: Arc<dyn IdGenerator>,
}

impl TaskQueue {
    pub fn new(
        store: Arc<dyn TaskStore>,
        clock: Arc<dyn Clock>,
        ids: Arc<dyn IdGenerator>,
    ) -> Self {
        Self { store, clock, ids }
    }

    /// Clock used for every timestamp the queue writes.
    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// Insert a pending task.
    pub async fn add_task(&self, new: NewTask) -> Result<TaskId, StoreError> {
        let task = Task::from_new(self.ids.generate_task_id(), new, self.clock.now());
        let id = task.id;
        let name = task.name.clone();
        self.store.insert(task).await?;
        tracing::debug!(task_id = %id, %name, "task added");
        Ok(id)
    }

    /// Insert a rule materialization unless its `schedule_key` already exists.
    /// Returns the new id, or `None` when the occurrence was already queued.
    pub async fn insert_scheduled(&self, new: NewTask) -> Result<Option<TaskId>, StoreError> {
        let task = Task::from_new(self.ids.generate_task_id(), new, self.clock.now());
        let id = task.id;
        if self.store.insert_if_absent(task).await? {
            Ok(Some(id))
        } else {
            Ok(None)
        }
    }

    /// Claim the next due task. The returned task is already `running`.
    pub async fn next_due(&self) -> Result<Option<Task>, StoreError> {
        self.store.claim_next_due(self.clock.now()).await
    }

    /// `pending -> running`. `next_due` already does this as part of the
    /// claim; this is for callers that pick tasks by id.
    pub async fn mark_running(&self, id: TaskId) -> Result<Transition, StoreError> {
        self.apply(id, StatusUpdate::Running).await
    }

    /// `running -> succeeded`, storing `result`.
    ///
    /// # Errors
    /// `StoreError::NotFound` for an unknown id, or any store failure.
    pub async fn mark_succeeded(
        &self,
        id: TaskId,
        result: Payload,
    ) -> Result<Transition, StoreError> {
        self.apply(id, StatusUpdate::Succeeded(result)).await
    }

    /// `pending | running -> failed`, storing `error`.
    pub async fn mark_failed(
        &self,
        id: TaskId,
        error: impl Into<String>,
    ) -> Result<Transition, StoreError> {
        self.apply(id, StatusUpdate::Failed(error.into())).await
    }

    /// `pending -> skipped`, storing the reason as `result.skipped_reason`.
    pub async fn mark_skipped(
        &self,
        id: TaskId,
        reason: impl Into<String>,
    ) -> Result<Transition, StoreError> {
        self.apply(id, StatusUpdate::Skipped(reason.into())).await
    }

    /// Fail every task left `running`, e.g. by a crash or a fatal store error
    /// in an earlier run. Only call this while no executor is running.
    /// Returns the tasks that were failed.
    pub async fn fail_interrupted(&self) -> Result<Vec<Task>, StoreError> {
        let running = self
            .store
            .list(&TaskFilter {
                status: Some(TaskStatus::Running),
                limit: None,
            })
            .await?;

        let mut failed = Vec::with_capacity(running.len());
        for task in running {
            if self.mark_failed(task.id, INTERRUPTED_ERROR).await?.is_applied() {
                tracing::warn!(task_id = %task.id, name = %task.name, "interrupted task failed");
                failed.push(task);
            }
        }
        Ok(failed)
    }

    pub async fn get(&self, id: TaskId) -> Result<Option<Task>, StoreError> {
        self.store.get(id).await
    }

    /// Newest first.
    pub async fn list(&self, filter: &TaskFilter) -> Result<Vec<Task>, StoreError> {
        self.store.list(filter).await
    }

    pub async fn counts(&self) -> Result<TaskCounts, StoreError> {
        self.store.counts().await
    }

    async fn apply(&self, id: TaskId, update: StatusUpdate) -> Result<Transition, StoreError> {
        let target = update.target();
        let outcome = self.store.transition(id, update, self.clock.now()).await?;

        if let Transition::Ignored { current } = outcome {
            if current == target {
                tracing::debug!(task_id = %id, status = %current, "already in requested state");
            } else {
                tracing::warn!(
                    task_id = %id,
                    from = %current,
                    to = %target,
                    "ignored invalid status transition"
                );
            }
        }
        Ok(outcome)
    }
}
