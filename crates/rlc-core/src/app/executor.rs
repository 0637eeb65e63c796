//! Executor - claims due tasks one at a time and runs their handlers.
//!
//! One cycle is `next_due -> handler -> mark_succeeded | mark_failed`.
//! Anything a handler does (return `Err`, panic, overrun its deadline) ends up
//! on the task row. Pipeline log rows are best effort and never fail a cycle.
//! Store errors leave `run_once`; the loop retries `Busy` on the next poll and
//! stops on anything else.

use std::any::Any;
use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tokio::sync::watch;

use crate::domain::{EventType, Layer, LogEntry, Payload, Task, TaskId};
use crate::error::{HandlerError, StoreError};
use crate::ports::{Clock, LogStore};
use crate::typed::HandlerRegistry;

use super::queue::TaskQueue;

/// Attempts at writing a task's outcome while the store reports `Busy`.
const SETTLE_ATTEMPTS: u32 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExecutorSettings {
    /// Sleep between polls while the queue is empty, and between retries of
    /// a busy store.
    pub poll_interval: Duration,

    /// Per-task deadline. `None` lets handlers run as long as they like.
    pub handler_timeout: Option<Duration>,
}

impl Default for ExecutorSettings {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(5),
            handler_timeout: None,
        }
    }
}

/// What one `run_once` call did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CycleOutcome {
    Idle,
    Succeeded(TaskId),
    Failed(TaskId, HandlerError),
}

/// Runs one task at a time. There is exactly one executor per database.
pub struct Executor {
    queue: Arc<TaskQueue>,
    registry: Arc<HandlerRegistry>,
    logs: Arc<dyn LogStore>,
    settings: ExecutorSettings,
}

impl Executor {
    pub fn new(
        queue: Arc<TaskQueue>,
        registry: Arc<HandlerRegistry>,
        logs: Arc<dyn LogStore>,
        settings: ExecutorSettings,
    ) -> Self {
        Self {
            queue,
            registry,
            logs,
            settings,
        }
    }

    pub fn poll_interval(&self) -> Duration {
        self.settings.poll_interval
    }

    /// The queue's clock. The daemon reads tick times from it.
    pub fn clock(&self) -> &Arc<dyn Clock> {
        self.queue.clock()
    }

    /// Run at most one due task.
    ///
    /// # Errors
    /// Store errors from the claim or from writing the outcome. Handler
    /// failures are not errors here; they come back as
    /// `CycleOutcome::Failed`.
    pub async fn run_once(&self) -> Result<CycleOutcome, StoreError> {
        let Some(task) = self.queue.next_due().await? else {
            return Ok(CycleOutcome::Idle);
        };
        tracing::info!(task_id = %task.id, name = %task.name, "task started");
        self.record(
            &task,
            EventType::Start,
            "task started",
            json!({ "task_id": task.id.to_string() }),
        )
        .await;

        let outcome = self.dispatch(&task).await;
        self.settle(task.id, &outcome).await?;

        match outcome {
            Ok(_) => {
                tracing::info!(task_id = %task.id, name = %task.name, "task succeeded");
                self.record(
                    &task,
                    EventType::Success,
                    "task succeeded",
                    json!({ "task_id": task.id.to_string() }),
                )
                .await;
                Ok(CycleOutcome::Succeeded(task.id))
            }
            Err(err) => {
                tracing::error!(
                    task_id = %task.id,
                    name = %task.name,
                    error = %err,
                    "task failed"
                );
                self.record(
                    &task,
                    EventType::Error,
                    &format!("task failed: {err}"),
                    json!({ "task_id": task.id.to_string(), "error": err.to_string() }),
                )
                .await;
                Ok(CycleOutcome::Failed(task.id, err))
            }
        }
    }

    /// Fail tasks an earlier run left `running` and log each one. Call once
    /// before polling starts.
    pub async fn recover_interrupted(&self) -> Result<usize, StoreError> {
        let failed = self.queue.fail_interrupted().await?;
        for task in &failed {
            self.record(
                task,
                EventType::Error,
                "task interrupted before completion",
                json!({ "task_id": task.id.to_string() }),
            )
            .await;
        }
        Ok(failed.len())
    }

    /// Poll until `shutdown` flips to `true` or its sender is dropped.
    /// A task that is already running is always finished first.
    ///
    /// # Errors
    /// Any store error except `Busy`, which is retried on the next poll.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> Result<(), StoreError> {
        tracing::info!(poll_secs = self.settings.poll_interval.as_secs(), "executor started");
        let mut recovered = false;

        loop {
            if !recovered {
                let swept = retry_if_busy(self.recover_interrupted().await, "startup recovery")?;
                recovered = swept.is_some();
            }
            if *shutdown.borrow() {
                break;
            }
            let outcome = if recovered {
                retry_if_busy(self.run_once().await, "executor poll")?
            } else {
                None
            };
            if outcome.is_some_and(|o| o != CycleOutcome::Idle) {
                continue;
            }
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
                _ = tokio::time::sleep(self.settings.poll_interval) => {}
            }
        }
        tracing::info!("executor stopped");
        Ok(())
    }

    async fn dispatch(&self, task: &Task) -> Result<Payload, HandlerError> {
        let key = task.handler_key()?;
        let handler = self
            .registry
            .get(key)
            .ok_or_else(|| HandlerError::NotFound(key.to_string()))?;

        let payload = task.payload.clone();
        let mut join = tokio::spawn(async move { handler.call(&payload).await });

        let joined = match self.settings.handler_timeout {
            Some(limit) => match tokio::time::timeout(limit, &mut join).await {
                Ok(joined) => joined,
                Err(_) => {
                    join.abort();
                    return Err(HandlerError::TimedOut(limit));
                }
            },
            None => join.await,
        };

        match joined {
            Ok(result) => result,
            Err(err) if err.is_panic() => {
                Err(HandlerError::Panicked(panic_message(err.into_panic())))
            }
            Err(err) => Err(HandlerError::failed(format!("handler task cancelled: {err}"))),
        }
    }

    /// Write the handler's outcome, retrying a few times while the store is
    /// busy. A task whose outcome never lands stays `running` until the next
    /// `recover_interrupted`.
    async fn settle(
        &self,
        id: TaskId,
        outcome: &Result<Payload, HandlerError>,
    ) -> Result<(), StoreError> {
        let mut attempt = 1;
        loop {
            let written = match outcome {
                Ok(result) => self.queue.mark_succeeded(id, result.clone()).await,
                Err(err) => self.queue.mark_failed(id, err.to_string()).await,
            };
            match written {
                Err(err) if err.is_transient() && attempt < SETTLE_ATTEMPTS => {
                    tracing::warn!(task_id = %id, attempt, error = %err, "retrying outcome write");
                    attempt += 1;
                    tokio::time::sleep(self.settings.poll_interval).await;
                }
                written => return written.map(|_| ()),
            }
        }
    }

    async fn record(&self, task: &Task, event: EventType, message: &str, data: serde_json::Value) {
        let entry = LogEntry::new(self.queue.clock().now(), &task.name, event, message)
            .with_layer(Layer::System)
            .with_data(data);
        if let Err(err) = self.logs.append(&entry).await {
            tracing::warn!(task_id = %task.id, event = %event, error = %err, "log entry dropped");
        }
    }
}

/// `Ok(None)` for a transient store error, which the caller treats as an
/// idle cycle; other errors pass through.
pub(crate) fn retry_if_busy<T>(
    result: Result<T, StoreError>,
    context: &str,
) -> Result<Option<T>, StoreError> {
    match result {
        Ok(value) => Ok(Some(value)),
        Err(err) if err.is_transient() => {
            tracing::warn!(error = %err, "{context}: store busy, retrying");
            Ok(None)
        }
        Err(err) => Err(err),
    }
}

fn panic_message(panic: Box<dyn Any + Send>) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{NewTask, TaskStatus};
    use crate::ports::{FixedClock, UlidGenerator};
    use crate::store::{InMemoryLogStore, InMemoryTaskStore};
    use crate::typed::Handler;
    use async_trait::async_trait;
    use chrono::{TimeZone, Utc};

    struct Echo;

    #[async_trait]
    impl Handler for Echo {
        async fn call(&self, payload: &Payload) -> Result<Payload, HandlerError> {
            Ok(payload.clone())
        }
    }

    struct Boom;

    #[async_trait]
    impl Handler for Boom {
        async fn call(&self, _payload: &Payload) -> Result<Payload, HandlerError> {
            Err(HandlerError::failed("upstream returned 503"))
        }
    }

    struct Panics;

    #[async_trait]
    impl Handler for Panics {
        async fn call(&self, _payload: &Payload) -> Result<Payload, HandlerError> {
            panic!("index out of bounds");
        }
    }

    struct Slow;

    #[async_trait]
    impl Handler for Slow {
        async fn call(&self, payload: &Payload) -> Result<Payload, HandlerError> {
            tokio::time::sleep(Duration::from_secs(30)).await;
            Ok(payload.clone())
        }
    }

    struct Harness {
        queue: Arc<TaskQueue>,
        store: Arc<InMemoryTaskStore>,
        logs: Arc<InMemoryLogStore>,
        executor: Executor,
    }

    fn harness(settings: ExecutorSettings) -> Harness {
        let start = Utc.with_ymd_and_hms(2026, 10, 19, 6, 0, 0).unwrap();
        let clock = Arc::new(FixedClock::new(start));
        let store = Arc::new(InMemoryTaskStore::new());
        let logs = Arc::new(InMemoryLogStore::new());
        let queue = Arc::new(TaskQueue::new(
            store.clone(),
            clock.clone(),
            Arc::new(UlidGenerator::new(clock)),
        ));

        let mut registry = HandlerRegistry::new();
        registry.register("test.echo", Arc::new(Echo)).unwrap();
        registry.register("test.boom", Arc::new(Boom)).unwrap();
        registry.register("test.panics", Arc::new(Panics)).unwrap();
        registry.register("test.slow", Arc::new(Slow)).unwrap();

        let executor = Executor::new(queue.clone(), Arc::new(registry), logs.clone(), settings);
        Harness {
            queue,
            store,
            logs,
            executor,
        }
    }

    fn call(name: &str, key: &str) -> NewTask {
        NewTask::function(name, key, Payload::new())
    }

    #[tokio::test]
    async fn idle_when_nothing_is_due() {
        let h = harness(ExecutorSettings::default());
        assert_eq!(h.executor.run_once().await.unwrap(), CycleOutcome::Idle);
        assert!(h.logs.is_empty().await);
    }

    #[tokio::test]
    async fn success_stores_result_and_logs_start_and_success() {
        let h = harness(ExecutorSettings::default());
        let id = h.queue.add_task(call("echo", "test.echo")).await.unwrap();

        assert_eq!(h.executor.run_once().await.unwrap(), CycleOutcome::Succeeded(id));

        let task = h.queue.get(id).await.unwrap().unwrap();
        assert_eq!(task.status, TaskStatus::Succeeded);
        assert_eq!(task.result.unwrap()["function"], "test.echo");
        assert!(task.completed_at.is_some());
        assert_eq!(h.logs.len().await, 2);
    }

    #[tokio::test]
    async fn failing_handler_does_not_stop_the_next_task() {
        let h = harness(ExecutorSettings::default());
        let bad = h
            .queue
            .add_task(call("bad", "test.boom").with_priority(1))
            .await
            .unwrap();
        let good = h
            .queue
            .add_task(call("good", "test.echo").with_priority(2))
            .await
            .unwrap();

        let first = h.executor.run_once().await.unwrap();
        assert_eq!(
            first,
            CycleOutcome::Failed(bad, HandlerError::failed("upstream returned 503"))
        );
        assert_eq!(h.executor.run_once().await.unwrap(), CycleOutcome::Succeeded(good));

        let bad = h.queue.get(bad).await.unwrap().unwrap();
        assert_eq!(bad.status, TaskStatus::Failed);
        assert_eq!(bad.error.as_deref(), Some("upstream returned 503"));
    }

    #[tokio::test]
    async fn unregistered_handler_fails_the_task() {
        let h = harness(ExecutorSettings::default());
        let id = h.queue.add_task(call("ghost", "collectors.nowhere")).await.unwrap();

        h.executor.run_once().await.unwrap();

        let task = h.queue.get(id).await.unwrap().unwrap();
        assert_eq!(task.status, TaskStatus::Failed);
        assert_eq!(
            task.error.as_deref(),
            Some("unregistered handler: collectors.nowhere")
        );
    }

    #[tokio::test]
    async fn panic_is_recorded_as_task_failure() {
        let h = harness(ExecutorSettings::default());
        let id = h.queue.add_task(call("panics", "test.panics")).await.unwrap();

        let outcome = h.executor.run_once().await.unwrap();
        assert_eq!(
            outcome,
            CycleOutcome::Failed(id, HandlerError::Panicked("index out of bounds".into()))
        );
        assert_eq!(h.queue.get(id).await.unwrap().unwrap().status, TaskStatus::Failed);
    }

    #[tokio::test(start_paused = true)]
    async fn deadline_overrun_is_timed_out() {
        let h = harness(ExecutorSettings {
            handler_timeout: Some(Duration::from_secs(2)),
            ..ExecutorSettings::default()
        });
        let id = h.queue.add_task(call("slow", "test.slow")).await.unwrap();

        let outcome = h.executor.run_once().await.unwrap();
        assert_eq!(
            outcome,
            CycleOutcome::Failed(id, HandlerError::TimedOut(Duration::from_secs(2)))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn sub_second_deadline_is_reported_exactly() {
        let h = harness(ExecutorSettings {
            handler_timeout: Some(Duration::from_millis(250)),
            ..ExecutorSettings::default()
        });
        let id = h.queue.add_task(call("slow", "test.slow")).await.unwrap();

        h.executor.run_once().await.unwrap();

        let task = h.queue.get(id).await.unwrap().unwrap();
        assert_eq!(
            task.error.as_deref(),
            Some("handler exceeded deadline of 250ms")
        );
    }

    #[tokio::test]
    async fn store_outage_is_fatal() {
        let h = harness(ExecutorSettings::default());
        h.store.set_available(false);
        let err = h.executor.run_once().await.unwrap_err();
        assert!(matches!(err, StoreError::Unavailable(_)));
    }

    #[tokio::test]
    async fn log_outage_does_not_strand_the_task() {
        let h = harness(ExecutorSettings::default());
        h.logs.set_available(false);
        let id = h.queue.add_task(call("echo", "test.echo")).await.unwrap();

        assert_eq!(h.executor.run_once().await.unwrap(), CycleOutcome::Succeeded(id));

        let task = h.queue.get(id).await.unwrap().unwrap();
        assert_eq!(task.status, TaskStatus::Succeeded);
        assert!(h.queue.next_due().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn busy_store_is_a_transient_error() {
        let h = harness(ExecutorSettings::default());
        h.store.set_busy(true);
        let err = h.executor.run_once().await.unwrap_err();
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn run_keeps_polling_through_a_busy_store() {
        let h = harness(ExecutorSettings {
            poll_interval: Duration::from_millis(10),
            handler_timeout: None,
        });
        let id = h.queue.add_task(call("echo", "test.echo")).await.unwrap();
        h.store.set_busy(true);

        let (tx, rx) = watch::channel(false);
        let executor = h.executor;
        let run = tokio::spawn(async move { executor.run(rx).await });

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!run.is_finished());

        h.store.set_busy(false);
        while h.queue.get(id).await.unwrap().unwrap().status != TaskStatus::Succeeded {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        tx.send(true).unwrap();
        run.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn run_fails_tasks_left_running() {
        let h = harness(ExecutorSettings::default());
        let id = h.queue.add_task(call("echo", "test.echo")).await.unwrap();
        h.queue.next_due().await.unwrap();

        let (tx, rx) = watch::channel(true);
        h.executor.run(rx).await.unwrap();
        drop(tx);

        let task = h.queue.get(id).await.unwrap().unwrap();
        assert_eq!(task.status, TaskStatus::Failed);
        assert_eq!(task.error.as_deref(), Some(crate::app::queue::INTERRUPTED_ERROR));
        assert_eq!(h.logs.len().await, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_mid_task_finishes_it_first() {
        let h = harness(ExecutorSettings {
            poll_interval: Duration::from_millis(10),
            handler_timeout: None,
        });
        let id = h.queue.add_task(call("slow", "test.slow")).await.unwrap();

        let (tx, rx) = watch::channel(false);
        let executor = h.executor;
        let run = tokio::spawn(async move { executor.run(rx).await });

        while h.queue.get(id).await.unwrap().unwrap().status != TaskStatus::Running {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
        tx.send(true).unwrap();
        run.await.unwrap().unwrap();

        let task = h.queue.get(id).await.unwrap().unwrap();
        assert_eq!(task.status, TaskStatus::Succeeded);
    }

    #[tokio::test]
    async fn run_drains_queue_and_stops_on_shutdown() {
        let h = harness(ExecutorSettings {
            poll_interval: Duration::from_millis(10),
            handler_timeout: None,
        });
        h.queue.add_task(call("one", "test.echo")).await.unwrap();
        h.queue.add_task(call("two", "test.boom")).await.unwrap();

        let (tx, rx) = watch::channel(false);
        let executor = h.executor;
        let queue = h.queue.clone();
        let run = tokio::spawn(async move { executor.run(rx).await });

        while queue.counts().await.unwrap().pending > 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        tx.send(true).unwrap();
        run.await.unwrap().unwrap();

        let counts = queue.counts().await.unwrap();
        assert_eq!(counts.succeeded, 1);
        assert_eq!(counts.failed, 1);
    }
}
