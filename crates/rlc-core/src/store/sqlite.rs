//! SQLite-backed task store and log store.
//!
//! One connection behind a mutex. Every operation finishes while the lock is
//! held and nothing awaits under it, so the claim in `claim_next_due` is
//! atomic with respect to any other caller in the process.
//!
//! Other processes (e.g. `rlc emit` from a collector script) write to the
//! same file. Read-then-write operations open `IMMEDIATE` transactions so the
//! write lock is taken up front and the busy timeout applies; a lock held
//! past the timeout surfaces as `StoreError::Busy`.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{Connection, OptionalExtension, TransactionBehavior, params};

use crate::domain::{
    EventType, Layer, LogEntry, Payload, Task, TaskCounts, TaskFilter, TaskId, TaskStatus,
    TaskType, Transition,
};
use crate::error::StoreError;
use crate::ports::{LogStore, StatusUpdate, TaskStore};

use super::check_transition;

const TASK_COLUMNS: &str = "id, name, task_type, payload_json, status, priority, scheduled_for, \
     created_at, started_at, completed_at, result_json, error_text, schedule_key";

/// Wait applied by [`SqliteStore::open`] when another connection holds the
/// write lock.
pub const DEFAULT_BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Task store and log store over one SQLite file.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open or create the database at `path`, creating parent directories.
    ///
    /// # Errors
    /// `StoreError::Unavailable` when the file or its directory cannot be
    /// created or opened.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        Self::open_with_timeout(path, DEFAULT_BUSY_TIMEOUT)
    }

    /// [`SqliteStore::open`] with a custom busy timeout.
    pub fn open_with_timeout(path: &Path, busy_timeout: Duration) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)
                .map_err(|e| StoreError::Unavailable(format!("{}: {e}", parent.display())))?;
        }
        let conn = Connection::open(path)?;
        conn.busy_timeout(busy_timeout)?;
        Self::with_connection(conn)
    }

    /// A private database that lives as long as the store.
    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self, StoreError> {
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.migrate()?;
        Ok(store)
    }

    fn migrate(&self) -> Result<(), StoreError> {
        self.conn()?.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS tasks (
                seq INTEGER PRIMARY KEY AUTOINCREMENT,
                id TEXT NOT NULL UNIQUE,
                name TEXT NOT NULL,
                task_type TEXT NOT NULL,          -- 'function' | 'script'
                payload_json TEXT NOT NULL,
                status TEXT NOT NULL DEFAULT 'pending',
                priority INTEGER NOT NULL DEFAULT 5,
                scheduled_for TEXT,               -- NULL = ASAP
                created_at TEXT NOT NULL,
                started_at TEXT,
                completed_at TEXT,
                result_json TEXT,
                error_text TEXT,
                schedule_key TEXT UNIQUE          -- '<rule>@<occurrence>'
            );

            CREATE INDEX IF NOT EXISTS idx_tasks_due
                ON tasks (status, priority, scheduled_for);

            CREATE TABLE IF NOT EXISTS log_entries (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                timestamp TEXT NOT NULL,
                agent_name TEXT NOT NULL,
                event_type TEXT NOT NULL,
                layer TEXT,
                message TEXT NOT NULL,
                data_json TEXT
            );

            CREATE INDEX IF NOT EXISTS idx_log_entries_timestamp
                ON log_entries (timestamp);
            ",
        )?;
        Ok(())
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>, StoreError> {
        self.conn
            .lock()
            .map_err(|_| StoreError::Unavailable("connection mutex poisoned".into()))
    }
}

/// Fixed-width UTC timestamps so text comparison orders correctly.
fn fmt_ts(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn parse_ts(raw: &str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|d| d.with_timezone(&Utc))
        .map_err(|e| StoreError::Corrupt(format!("timestamp '{raw}': {e}")))
}

fn parse_opt_ts(raw: Option<String>) -> Result<Option<DateTime<Utc>>, StoreError> {
    raw.as_deref().map(parse_ts).transpose()
}

fn parse_payload(raw: &str) -> Result<Payload, StoreError> {
    serde_json::from_str(raw).map_err(|e| StoreError::Corrupt(format!("payload: {e}")))
}

fn payload_json(payload: &Payload) -> String {
    serde_json::Value::Object(payload.clone()).to_string()
}

/// Row as read from SQLite, before domain parsing.
struct RawTask {
    id: String,
    name: String,
    task_type: String,
    payload_json: String,
    status: String,
    priority: i32,
    scheduled_for: Option<String>,
    created_at: String,
    started_at: Option<String>,
    completed_at: Option<String>,
    result_json: Option<String>,
    error_text: Option<String>,
    schedule_key: Option<String>,
}

impl RawTask {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            name: row.get(1)?,
            task_type: row.get(2)?,
            payload_json: row.get(3)?,
            status: row.get(4)?,
            priority: row.get(5)?,
            scheduled_for: row.get(6)?,
            created_at: row.get(7)?,
            started_at: row.get(8)?,
            completed_at: row.get(9)?,
            result_json: row.get(10)?,
            error_text: row.get(11)?,
            schedule_key: row.get(12)?,
        })
    }

    fn into_task(self) -> Result<Task, StoreError> {
        Ok(Task {
            id: self.id.parse().map_err(|e| StoreError::Corrupt(format!("{e}")))?,
            name: self.name,
            task_type: self.task_type.parse::<TaskType>().map_err(StoreError::Corrupt)?,
            payload: parse_payload(&self.payload_json)?,
            status: self.status.parse::<TaskStatus>().map_err(StoreError::Corrupt)?,
            priority: self.priority,
            scheduled_for: parse_opt_ts(self.scheduled_for)?,
            created_at: parse_ts(&self.created_at)?,
            started_at: parse_opt_ts(self.started_at)?,
            completed_at: parse_opt_ts(self.completed_at)?,
            result: self.result_json.as_deref().map(parse_payload).transpose()?,
            error: self.error_text,
            schedule_key: self.schedule_key,
        })
    }
}

fn load_task(conn: &Connection, id: TaskId) -> Result<Option<Task>, StoreError> {
    let raw = conn
        .query_row(
            &format!("SELECT {TASK_COLUMNS} FROM tasks WHERE id = ?1"),
            [id.to_string()],
            RawTask::from_row,
        )
        .optional()?;
    raw.map(RawTask::into_task).transpose()
}

/// Write back the mutable lifecycle columns of a row.
fn save_lifecycle(conn: &Connection, task: &Task) -> Result<(), StoreError> {
    conn.execute(
        "UPDATE tasks SET status = ?1, started_at = ?2, completed_at = ?3,
                          result_json = ?4, error_text = ?5
         WHERE id = ?6",
        params![
            task.status.as_str(),
            task.started_at.map(fmt_ts),
            task.completed_at.map(fmt_ts),
            task.result.as_ref().map(payload_json),
            task.error,
            task.id.to_string(),
        ],
    )?;
    Ok(())
}

fn insert_row(conn: &Connection, task: &Task, or_ignore: bool) -> Result<usize, StoreError> {
    let verb = if or_ignore {
        "INSERT OR IGNORE"
    } else {
        "INSERT"
    };
    let changed = conn.execute(
        &format!(
            "{verb} INTO tasks ({TASK_COLUMNS})
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)"
        ),
        params![
            task.id.to_string(),
            task.name,
            task.task_type.as_str(),
            payload_json(&task.payload),
            task.status.as_str(),
            task.priority,
            task.scheduled_for.map(fmt_ts),
            fmt_ts(task.created_at),
            task.started_at.map(fmt_ts),
            task.completed_at.map(fmt_ts),
            task.result.as_ref().map(payload_json),
            task.error,
            task.schedule_key,
        ],
    )?;
    Ok(changed)
}

#[async_trait]
impl TaskStore for SqliteStore {
    async fn insert(&self, task: Task) -> Result<(), StoreError> {
        let conn = self.conn()?;
        insert_row(&conn, &task, false)?;
        tracing::debug!(task_id = %task.id, name = %task.name, "task inserted");
        Ok(())
    }

    async fn insert_if_absent(&self, task: Task) -> Result<bool, StoreError> {
        let conn = self.conn()?;
        Ok(insert_row(&conn, &task, true)? == 1)
    }

    async fn claim_next_due(&self, now: DateTime<Utc>) -> Result<Option<Task>, StoreError> {
        let mut conn = self.conn()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let now_s = fmt_ts(now);
        let id: Option<String> = tx
            .query_row(
                "SELECT id FROM tasks
                 WHERE status = 'pending'
                   AND (scheduled_for IS NULL OR scheduled_for <= ?1)
                 ORDER BY priority ASC,
                          COALESCE(scheduled_for, created_at) ASC,
                          created_at ASC,
                          seq ASC
                 LIMIT 1",
                [&now_s],
                |row| row.get(0),
            )
            .optional()?;

        let Some(id) = id else {
            tx.commit()?;
            return Ok(None);
        };

        tx.execute(
            "UPDATE tasks SET status = 'running', started_at = ?1
             WHERE id = ?2 AND status = 'pending'",
            params![now_s, id],
        )?;
        let task_id: TaskId = id.parse().map_err(|e| StoreError::Corrupt(format!("{e}")))?;
        let task = load_task(&tx, task_id)?;
        tx.commit()?;
        Ok(task)
    }

    async fn transition(
        &self,
        id: TaskId,
        update: StatusUpdate,
        at: DateTime<Utc>,
    ) -> Result<Transition, StoreError> {
        let mut conn = self.conn()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let mut task = load_task(&tx, id)?.ok_or(StoreError::NotFound(id))?;
        if let Some(ignored) = check_transition(task.status, update.target()) {
            return Ok(ignored);
        }
        update.apply(&mut task, at);
        save_lifecycle(&tx, &task)?;
        tx.commit()?;
        Ok(Transition::Applied)
    }

    async fn get(&self, id: TaskId) -> Result<Option<Task>, StoreError> {
        let conn = self.conn()?;
        load_task(&conn, id)
    }

    async fn list(&self, filter: &TaskFilter) -> Result<Vec<Task>, StoreError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {TASK_COLUMNS} FROM tasks
             WHERE (?1 IS NULL OR status = ?1)
             ORDER BY seq DESC
             LIMIT ?2"
        ))?;
        let limit = filter.limit.map(|l| l as i64).unwrap_or(-1);
        let rows = stmt.query_map(
            params![filter.status.map(|s| s.as_str()), limit],
            RawTask::from_row,
        )?;

        let mut tasks = Vec::new();
        for raw in rows {
            tasks.push(raw?.into_task()?);
        }
        Ok(tasks)
    }

    async fn counts(&self) -> Result<TaskCounts, StoreError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare("SELECT status, COUNT(*) FROM tasks GROUP BY status")?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
        })?;

        let mut counts = TaskCounts::default();
        for row in rows {
            let (status, n) = row?;
            let status = status.parse::<TaskStatus>().map_err(StoreError::Corrupt)?;
            counts.add(status, n.max(0) as usize);
        }
        Ok(counts)
    }
}

#[async_trait]
impl LogStore for SqliteStore {
    async fn append(&self, entry: &LogEntry) -> Result<(), StoreError> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO log_entries
                 (timestamp, agent_name, event_type, layer, message, data_json)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                fmt_ts(entry.timestamp),
                entry.agent_name,
                entry.event_type.as_str(),
                entry.layer.map(|l| l.as_str()),
                entry.message,
                entry.data.as_ref().map(|d| d.to_string()),
            ],
        )?;
        Ok(())
    }

    async fn entries_between(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<LogEntry>, StoreError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT timestamp, agent_name, event_type, layer, message, data_json
             FROM log_entries
             WHERE timestamp >= ?1 AND timestamp < ?2
             ORDER BY timestamp, id",
        )?;
        let rows = stmt.query_map(params![fmt_ts(start), fmt_ts(end)], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, Option<String>>(3)?,
                row.get::<_, String>(4)?,
                row.get::<_, Option<String>>(5)?,
            ))
        })?;

        let mut entries = Vec::new();
        for row in rows {
            let (timestamp, agent_name, event_type, layer, message, data) = row?;
            entries.push(LogEntry {
                timestamp: parse_ts(&timestamp)?,
                agent_name,
                event_type: event_type.parse::<EventType>().map_err(StoreError::Corrupt)?,
                layer: layer
                    .as_deref()
                    .map(str::parse::<Layer>)
                    .transpose()
                    .map_err(StoreError::Corrupt)?,
                message,
                data: data
                    .as_deref()
                    .map(serde_json::from_str)
                    .transpose()
                    .map_err(|e| StoreError::Corrupt(format!("log data: {e}")))?,
            });
        }
        Ok(entries)
    }
}
