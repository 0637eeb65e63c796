//! Daemon - the scheduler tick and executor polling, interleaved in one loop.
//!
//! Nothing runs in parallel: a tick never overlaps a task, and a long task
//! delays the next tick until it finishes.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::Instant;

use crate::error::StoreError;
use crate::ports::Clock;

use super::executor::{CycleOutcome, Executor, retry_if_busy};
use super::scheduler::Scheduler;

/// `rlc run`: the scheduler and the executor sharing one loop.
pub struct Daemon {
    scheduler: Arc<Scheduler>,
    executor: Arc<Executor>,
    tick_interval: Duration,
}

impl Daemon {
    pub fn new(
        scheduler: Arc<Scheduler>,
        executor: Arc<Executor>,
        tick_interval: Duration,
    ) -> Self {
        Self {
            scheduler,
            executor,
            tick_interval,
        }
    }

    /// Fail tasks a previous run left `running`, then tick and poll until
    /// `shutdown` is set. A task in flight when `shutdown` flips is finished
    /// first.
    ///
    /// # Errors
    /// Any store error except `Busy`, which is retried on the next wake-up.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> Result<(), StoreError> {
        tracing::info!(
            rules = self.scheduler.rules().len(),
            tick_secs = self.tick_interval.as_secs(),
            poll_secs = self.executor.poll_interval().as_secs(),
            "daemon started"
        );
        let mut recovered = false;
        let mut next_tick = Instant::now();

        loop {
            if !recovered {
                let swept =
                    retry_if_busy(self.executor.recover_interrupted().await, "startup recovery")?;
                recovered = swept.is_some();
            }
            if *shutdown.borrow() {
                break;
            }

            if recovered && Instant::now() >= next_tick {
                let now = self.executor.clock().now();
                let tick = retry_if_busy(self.scheduler.tick(now).await, "scheduler tick")?;
                next_tick = match tick {
                    Some(report) => {
                        if report.inserted > 0 || !report.skipped_rules.is_empty() {
                            tracing::info!(
                                inserted = report.inserted,
                                existing = report.existing,
                                skipped = report.skipped_rules.len(),
                                "scheduler tick"
                            );
                        }
                        Instant::now() + self.tick_interval
                    }
                    None => Instant::now() + self.executor.poll_interval(),
                };
            }

            let outcome = if recovered {
                retry_if_busy(self.executor.run_once().await, "executor poll")?
            } else {
                None
            };
            if outcome.is_some_and(|o| o != CycleOutcome::Idle) {
                continue;
            }

            let next_poll = Instant::now() + self.executor.poll_interval();
            let wake = if recovered {
                next_poll.min(next_tick)
            } else {
                next_poll
            };
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
                _ = tokio::time::sleep_until(wake) => {}
            }
        }

        tracing::info!("daemon stopped");
        Ok(())
    }
}
