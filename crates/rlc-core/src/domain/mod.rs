//! Domain model: task ids, task rows, status machine, schedule rules and
//! log entries.

pub mod ids;
pub mod log_entry;
pub mod schedule;
pub mod state;
pub mod task;

pub use ids::{ParseTaskIdError, TaskId};
pub use log_entry::{EventType, Layer, LogEntry};
pub use schedule::{
    Occurrence, RuleKind, ScheduleRule, latest_release, local_to_utc, next_occurrence,
    parse_timezone,
};
pub use state::{TaskCounts, TaskStatus, Transition};
pub use task::{DEFAULT_PRIORITY, NewTask, Payload, SCRIPT_HANDLER_KEY, Task, TaskFilter, TaskType};
