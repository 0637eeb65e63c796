//! LogStore port - append-only pipeline log.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::domain::LogEntry;
use crate::error::StoreError;

#[async_trait]
pub trait LogStore: Send + Sync {
    /// # Errors
    /// The executor treats a failed append as a dropped row, never as a
    /// failed task.
    async fn append(&self, entry: &LogEntry) -> Result<(), StoreError>;

    /// Entries with `start <= timestamp < end`, oldest first.
    async fn entries_between(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<LogEntry>, StoreError>;
}
