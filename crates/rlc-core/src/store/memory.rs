//! In-memory stores for tests and embedding.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

use crate::domain::{LogEntry, Task, TaskCounts, TaskFilter, TaskId, Transition};
use crate::error::StoreError;
use crate::ports::{LogStore, StatusUpdate, TaskStore};

use super::check_transition;

struct Row {
    seq: u64,
    task: Task,
}

#[derive(Default)]
struct InMemoryTaskState {
    /// Single source of truth for task rows.
    rows: HashMap<TaskId, Row>,

    /// schedule_key -> task, for idempotent materialization.
    keys: HashMap<String, TaskId>,

    next_seq: u64,
}

impl InMemoryTaskState {
    fn push(&mut self, task: Task) {
        let seq = self.next_seq;
        self.next_seq += 1;
        if let Some(key) = &task.schedule_key {
            self.keys.insert(key.clone(), task.id);
        }
        self.rows.insert(task.id, Row { seq, task });
    }
}

/// In-memory task store.
///
/// # Failure switches
/// - `set_available(false)`: every call fails with `StoreError::Unavailable`,
///   the executor's fatal path.
/// - `set_busy(true)`: every call fails with `StoreError::Busy`, as SQLite
///   does while another process holds the write lock.
#[derive(Default)]
pub struct InMemoryTaskStore {
    state: Mutex<InMemoryTaskState>,
    unavailable: AtomicBool,
    busy: AtomicBool,
}

impl InMemoryTaskStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_available(&self, available: bool) {
        self.unavailable.store(!available, Ordering::SeqCst);
    }

    pub fn set_busy(&self, busy: bool) {
        self.busy.store(busy, Ordering::SeqCst);
    }

    fn ensure_available(&self) -> Result<(), StoreError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("in-memory store switched off".into()));
        }
        if self.busy.load(Ordering::SeqCst) {
            return Err(StoreError::Busy("in-memory store locked".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl TaskStore for InMemoryTaskStore {
    async fn insert(&self, task: Task) -> Result<(), StoreError> {
        self.ensure_available()?;
        self.state.lock().await.push(task);
        Ok(())
    }

    async fn insert_if_absent(&self, task: Task) -> Result<bool, StoreError> {
        self.ensure_available()?;
        let mut state = self.state.lock().await;
        if let Some(key) = &task.schedule_key
            && state.keys.contains_key(key)
        {
            return Ok(false);
        }
        state.push(task);
        Ok(true)
    }

    async fn claim_next_due(&self, now: DateTime<Utc>) -> Result<Option<Task>, StoreError> {
        self.ensure_available()?;
        let mut state = self.state.lock().await;

        let next = state
            .rows
            .values()
            .filter(|row| row.task.is_due(now))
            .min_by_key(|row| (row.task.due_order(), row.seq))
            .map(|row| row.task.id);

        let Some(id) = next else {
            return Ok(None);
        };
        let Some(row) = state.rows.get_mut(&id) else {
            return Ok(None);
        };
        StatusUpdate::Running.apply(&mut row.task, now);
        Ok(Some(row.task.clone()))
    }

    async fn transition(
        &self,
        id: TaskId,
        update: StatusUpdate,
        at: DateTime<Utc>,
    ) -> Result<Transition, StoreError> {
        self.ensure_available()?;
        let mut state = self.state.lock().await;
        let row = state.rows.get_mut(&id).ok_or(StoreError::NotFound(id))?;

        if let Some(ignored) = check_transition(row.task.status, update.target()) {
            return Ok(ignored);
        }
        update.apply(&mut row.task, at);
        Ok(Transition::Applied)
    }

    async fn get(&self, id: TaskId) -> Result<Option<Task>, StoreError> {
        self.ensure_available()?;
        let state = self.state.lock().await;
        Ok(state.rows.get(&id).map(|row| row.task.clone()))
    }

    async fn list(&self, filter: &TaskFilter) -> Result<Vec<Task>, StoreError> {
        self.ensure_available()?;
        let state = self.state.lock().await;
        let mut rows: Vec<&Row> = state
            .rows
            .values()
            .filter(|row| filter.status.is_none_or(|s| row.task.status == s))
            .collect();
        rows.sort_by(|a, b| b.seq.cmp(&a.seq));

        let limit = filter.limit.unwrap_or(usize::MAX);
        Ok(rows.into_iter().take(limit).map(|row| row.task.clone()).collect())
    }

    async fn counts(&self) -> Result<TaskCounts, StoreError> {
        self.ensure_available()?;
        let state = self.state.lock().await;
        let mut counts = TaskCounts::default();
        for row in state.rows.values() {
            counts.add(row.task.status, 1);
        }
        Ok(counts)
    }
}

/// In-memory pipeline log. `set_available(false)` fails every call with
/// `StoreError::Unavailable`.
#[derive(Default)]
pub struct InMemoryLogStore {
    entries: Mutex<Vec<LogEntry>>,
    unavailable: AtomicBool,
}

impl InMemoryLogStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_available(&self, available: bool) {
        self.unavailable.store(!available, Ordering::SeqCst);
    }

    fn ensure_available(&self) -> Result<(), StoreError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("in-memory log switched off".into()));
        }
        Ok(())
    }

    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.lock().await.is_empty()
    }
}

#[async_trait]
impl LogStore for InMemoryLogStore {
    async fn append(&self, entry: &LogEntry) -> Result<(), StoreError> {
        self.ensure_available()?;
        self.entries.lock().await.push(entry.clone());
        Ok(())
    }

    async fn entries_between(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<LogEntry>, StoreError> {
        self.ensure_available()?;
        let entries = self.entries.lock().await;
        let mut found: Vec<LogEntry> = entries
            .iter()
            .filter(|e| e.timestamp >= start && e.timestamp < end)
            .cloned()
            .collect();
        found.sort_by_key(|e| e.timestamp);
        Ok(found)
    }
}
