//! Application layer: ports wired into the queue, executor, scheduler and
//! health summarizer.

pub mod builder;
pub mod daemon;
pub mod executor;
pub mod health;
pub mod queue;
pub mod scheduler;

pub use self::builder::RegistryBuilder;
pub use self::daemon::Daemon;
pub use self::executor::{CycleOutcome, Executor, ExecutorSettings};
pub use self::health::{
    EventCount, HealthReport, HealthSettings, HealthSummarizer, PipelineStatus, summarize,
};
pub use self::queue::TaskQueue;
pub use self::scheduler::{Scheduler, SchedulerSettings, TickReport, UpcomingFire};
