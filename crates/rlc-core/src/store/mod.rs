//! Store implementations: SQLite for production, in-memory for tests.

mod memory;
mod sqlite;

pub use memory::{InMemoryLogStore, InMemoryTaskStore};
pub use sqlite::SqliteStore;

use crate::domain::{TaskStatus, Transition};

/// `None` when `current -> target` may be applied, otherwise the `Ignored`
/// answer to hand back.
pub(crate) fn check_transition(current: TaskStatus, target: TaskStatus) -> Option<Transition> {
    if current.can_transition_to(target) {
        None
    } else {
        Some(Transition::Ignored { current })
    }
}
