use std::time::Duration;

use rusqlite::ErrorCode;
use thiserror::Error;

use crate::domain::TaskId;

/// Errors raised by a task or log store.
///
/// # Severity
/// - `Unavailable`: the store cannot be reached. Fatal to the executor loop.
/// - `Busy`: another writer holds the database lock. The loops retry on the
///   next poll (see [`StoreError::is_transient`]).
/// - `NotFound`, `Conflict`, `Corrupt`: surfaced to the caller for that one
///   operation.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("store busy: {0}")]
    Busy(String),

    #[error("task not found: {0}")]
    NotFound(TaskId),

    #[error("constraint violated: {0}")]
    Conflict(String),

    #[error("corrupt row: {0}")]
    Corrupt(String),
}

impl StoreError {
    /// Whether retrying the same operation later can succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::Busy(_))
    }
}

impl From<rusqlite::Error> for StoreError {
    fn from(err: rusqlite::Error) -> Self {
        match err {
            rusqlite::Error::SqliteFailure(failure, message) => {
                let detail = message.unwrap_or_else(|| failure.to_string());
                match failure.code {
                    ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked => StoreError::Busy(detail),
                    ErrorCode::ConstraintViolation => StoreError::Conflict(detail),
                    _ => StoreError::Unavailable(detail),
                }
            }
            rusqlite::Error::FromSqlConversionFailure(_, _, inner) => {
                StoreError::Corrupt(inner.to_string())
            }
            rusqlite::Error::InvalidColumnType(idx, name, ty) => {
                StoreError::Corrupt(format!("column {idx} ({name}) has type {ty}"))
            }
            other => StoreError::Unavailable(other.to_string()),
        }
    }
}

/// Task-level failures. These are recorded on the task row and never stop the
/// executor loop.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HandlerError {
    #[error("unregistered handler: {0}")]
    NotFound(String),

    #[error("invalid payload: {0}")]
    InvalidPayload(String),

    #[error("{0}")]
    Failed(String),

    #[error("handler panicked: {0}")]
    Panicked(String),

    #[error("handler exceeded deadline of {0:?}")]
    TimedOut(Duration),
}

impl HandlerError {
    /// Shorthand for [`HandlerError::Failed`].
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed(message.into())
    }
}

/// A schedule rule that cannot be evaluated. The scheduler logs it and skips
/// the rule for the current tick.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ScheduleRuleError {
    #[error("rule '{rule}': invalid time '{value}'")]
    InvalidTime { rule: String, value: String },

    #[error("rule '{rule}': invalid release date '{value}'")]
    InvalidDate { rule: String, value: String },

    #[error("unknown time zone '{0}'")]
    InvalidTimezone(String),

    #[error("rule '{rule}': invalid weekday '{value}'")]
    InvalidWeekday { rule: String, value: String },

    #[error("unknown schedule rule: {0}")]
    UnknownRule(String),
}

/// Errors from operations that both evaluate a rule and write to the store.
#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error(transparent)]
    Rule(#[from] ScheduleRuleError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Handler registration errors. Both are startup errors.
#[derive(Debug, Error)]
pub enum RegistryError {
    /// Two handlers were registered under one key.
    #[error("handler '{0}' is already registered")]
    AlreadyRegistered(String),

    /// Keys passed to `RegistryBuilder::expect` that nothing registered.
    #[error("missing handlers: {0:?}. These keys were expected but not registered.")]
    MissingHandlers(Vec<String>),
}

/// Failure to load `rlc.toml`.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// Bad TOML, or a value that fails validation (time zone, horizon,
    /// duplicate rule names).
    #[error("failed to parse config {path}: {message}")]
    Parse { path: String, message: String },
}
