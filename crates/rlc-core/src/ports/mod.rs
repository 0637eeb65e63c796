//! Ports - the seams between the orchestrator and the outside world.
//!
//! Every trait here has a production implementation and a test double:
//! SQLite and in-memory stores, the system and a fixed clock, and so on.

pub mod clock;
pub mod id_generator;
pub mod log_store;
pub mod notifier;
pub mod task_store;

pub use self::clock::{Clock, FixedClock, SystemClock};
pub use self::id_generator::{IdGenerator, UlidGenerator};
pub use self::log_store::LogStore;
pub use self::notifier::{Notifier, TracingNotifier};
pub use self::task_store::{StatusUpdate, TaskStore};
