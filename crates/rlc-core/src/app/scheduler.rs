//! Scheduler - materializes recurring rules into pending tasks.
//!
//! Each tick looks at every rule's next occurrence and, when it falls inside
//! the horizon, inserts one task keyed by `<rule>@<occurrence>`. The key makes
//! repeated ticks (and restarts) idempotent.
//!
//! A failed run is not retried before the rule's next natural occurrence.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use chrono_tz::Tz;
use serde::Serialize;

use crate::domain::{ScheduleRule, TaskId, latest_release, next_occurrence};
use crate::error::{ScheduleRuleError, SchedulerError, StoreError};

use super::queue::TaskQueue;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchedulerSettings {
    /// How far ahead occurrences are materialized. Must be at least the tick
    /// interval, or an occurrence can fall between two ticks unseen.
    pub horizon: Duration,

    /// Zone rule times are written in.
    pub timezone: Tz,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            horizon: Duration::hours(24),
            timezone: Tz::UTC,
        }
    }
}

/// What one `tick` did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickReport {
    pub inserted: usize,

    /// Occurrences whose task already existed.
    pub existing: usize,

    /// Rules that failed to evaluate this tick.
    pub skipped_rules: Vec<String>,
}

/// One upcoming fire, as shown by `rlc next`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UpcomingFire {
    pub rule: String,
    pub handler: String,
    pub at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reference_month: Option<String>,
}

/// Turns the configured rules into task rows. Holds no state of its own;
/// everything it has done is visible in the queue.
pub struct Scheduler {
    rules: Vec<ScheduleRule>,
    queue: Arc<TaskQueue>,
    settings: SchedulerSettings,
}

impl Scheduler {
    pub fn new(
        rules: Vec<ScheduleRule>,
        queue: Arc<TaskQueue>,
        settings: SchedulerSettings,
    ) -> Self {
        Self {
            rules,
            queue,
            settings,
        }
    }

    pub fn rules(&self) -> &[ScheduleRule] {
        &self.rules
    }

    /// Handler keys the rules dispatch to, for `RegistryBuilder::expect`.
    pub fn handler_keys(&self) -> Vec<String> {
        self.rules.iter().map(|rule| rule.handler.clone()).collect()
    }

    /// Materialize every rule's next occurrence that falls within the
    /// horizon. Safe to call any number of times for the same `now`.
    ///
    /// # Errors
    /// Only store errors. A rule that fails to evaluate is logged and listed
    /// in `TickReport::skipped_rules`.
    pub async fn tick(&self, now: DateTime<Utc>) -> Result<TickReport, StoreError> {
        let mut report = TickReport::default();
        let until = now + self.settings.horizon;

        for rule in &self.rules {
            let occurrence = match next_occurrence(rule, now, self.settings.timezone) {
                Ok(Some(occurrence)) => occurrence,
                Ok(None) => continue,
                Err(err) => {
                    tracing::warn!(rule = %rule.name, error = %err, "skipping schedule rule");
                    report.skipped_rules.push(rule.name.clone());
                    continue;
                }
            };
            if occurrence.at > until {
                continue;
            }

            let key = rule.schedule_key(occurrence.at);
            let new = rule
                .task_for(occurrence.reference_month.as_deref())
                .scheduled_for(occurrence.at)
                .with_schedule_key(&key);
            match self.queue.insert_scheduled(new).await? {
                Some(id) => {
                    tracing::info!(
                        rule = %rule.name,
                        task_id = %id,
                        at = %occurrence.at,
                        "scheduled"
                    );
                    report.inserted += 1;
                }
                None => {
                    tracing::debug!(%key, "occurrence already queued");
                    report.existing += 1;
                }
            }
        }
        Ok(report)
    }

    /// The next `n` fires across all rules, soonest first. Rules that fail to
    /// evaluate are left out.
    pub fn preview(&self, now: DateTime<Utc>, n: usize) -> Vec<UpcomingFire> {
        let mut fires = Vec::new();
        for rule in &self.rules {
            let mut after = now;
            for _ in 0..n {
                match next_occurrence(rule, after, self.settings.timezone) {
                    Ok(Some(occurrence)) => {
                        after = occurrence.at + Duration::milliseconds(1);
                        fires.push(UpcomingFire {
                            rule: rule.name.clone(),
                            handler: rule.handler.clone(),
                            at: occurrence.at,
                            reference_month: occurrence.reference_month,
                        });
                    }
                    Ok(None) => break,
                    Err(err) => {
                        tracing::warn!(rule = %rule.name, error = %err, "rule left out of preview");
                        break;
                    }
                }
            }
        }
        fires.sort_by(|a, b| a.at.cmp(&b.at).then_with(|| a.rule.cmp(&b.rule)));
        fires.truncate(n);
        fires
    }

    /// Enqueue a rule's task to run now, outside its schedule. Calendar rules
    /// use the latest release at or before `now` as the reference month.
    ///
    /// # Errors
    /// - `SchedulerError::Rule` for an unknown or malformed rule.
    /// - `SchedulerError::Store` when the insert fails.
    pub async fn trigger(&self, name: &str, now: DateTime<Utc>) -> Result<TaskId, SchedulerError> {
        let rule = self
            .rules
            .iter()
            .find(|rule| rule.name == name)
            .ok_or_else(|| ScheduleRuleError::UnknownRule(name.to_string()))?;
        rule.validate()?;

        let latest = latest_release(rule, now, self.settings.timezone)?;
        let new = rule.task_for(latest.as_ref().and_then(|o| o.reference_month.as_deref()));
        let id = self.queue.add_task(new).await?;
        tracing::info!(rule = %name, task_id = %id, "triggered manually");
        Ok(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Payload, RuleKind, TaskFilter, TaskStatus};
    use crate::ports::{FixedClock, UlidGenerator};
    use crate::store::InMemoryTaskStore;
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        // Monday
        Utc.with_ymd_and_hms(2026, 10, 19, 6, 0, 0).unwrap()
    }

    fn queue() -> Arc<TaskQueue> {
        let clock = Arc::new(FixedClock::new(now()));
        Arc::new(TaskQueue::new(
            Arc::new(InMemoryTaskStore::new()),
            clock.clone(),
            Arc::new(UlidGenerator::new(clock)),
        ))
    }

    fn daily(name: &str, at: &str) -> ScheduleRule {
        ScheduleRule {
            name: name.into(),
            handler: format!("collectors.{name}"),
            payload: Payload::new(),
            priority: 5,
            kind: RuleKind::DailyAt {
                at: at.into(),
                days: vec![],
            },
        }
    }

    fn wasde() -> ScheduleRule {
        ScheduleRule {
            name: "wasde".into(),
            handler: "collectors.usda.wasde".into(),
            payload: Payload::new(),
            priority: 1,
            kind: RuleKind::Calendar {
                releases: [
                    ("2026-09".to_string(), "2026-10-09T12:00".to_string()),
                    ("2026-10".to_string(), "2026-10-19T16:00".to_string()),
                ]
                .into_iter()
                .collect(),
            },
        }
    }

    #[tokio::test]
    async fn tick_twice_inserts_once() {
        let queue = queue();
        let scheduler = Scheduler::new(
            vec![daily("nass", "07:00")],
            queue.clone(),
            SchedulerSettings::default(),
        );

        let first = scheduler.tick(now()).await.unwrap();
        let second = scheduler.tick(now()).await.unwrap();
        assert_eq!(first.inserted, 1);
        assert_eq!(second.inserted, 0);
        assert_eq!(second.existing, 1);

        let tasks = queue.list(&TaskFilter::default()).await.unwrap();
        assert_eq!(tasks.len(), 1);
        assert_eq!(
            tasks[0].schedule_key.as_deref(),
            Some("nass@2026-10-19T07:00:00.000Z")
        );
        assert_eq!(
            tasks[0].scheduled_for,
            Some(Utc.with_ymd_and_hms(2026, 10, 19, 7, 0, 0).unwrap())
        );
        assert_eq!(tasks[0].status, TaskStatus::Pending);
    }

    #[tokio::test]
    async fn occurrences_beyond_horizon_wait() {
        let queue = queue();
        let settings = SchedulerSettings {
            horizon: Duration::minutes(30),
            ..SchedulerSettings::default()
        };
        let scheduler = Scheduler::new(vec![daily("nass", "07:00")], queue.clone(), settings);

        assert_eq!(scheduler.tick(now()).await.unwrap().inserted, 0);
        assert_eq!(scheduler.tick(now() + Duration::minutes(30)).await.unwrap().inserted, 1);
    }

    #[tokio::test]
    async fn tick_uses_the_configured_zone() {
        let queue = queue();
        let settings = SchedulerSettings {
            timezone: chrono_tz::America::Chicago,
            ..SchedulerSettings::default()
        };
        let scheduler = Scheduler::new(vec![daily("nass", "07:00")], queue.clone(), settings);

        scheduler.tick(now()).await.unwrap();

        let tasks = queue.list(&TaskFilter::default()).await.unwrap();
        // 07:00 CDT
        assert_eq!(
            tasks[0].scheduled_for,
            Some(Utc.with_ymd_and_hms(2026, 10, 19, 12, 0, 0).unwrap())
        );
    }

    #[tokio::test]
    async fn calendar_task_carries_reference_month() {
        let queue = queue();
        let scheduler =
            Scheduler::new(vec![wasde()], queue.clone(), SchedulerSettings::default());

        scheduler.tick(now()).await.unwrap();

        let tasks = queue.list(&TaskFilter::default()).await.unwrap();
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].payload["reference_month"], "2026-10");
        assert_eq!(tasks[0].payload["function"], "collectors.usda.wasde");
        assert_eq!(tasks[0].priority, 1);
    }

    #[tokio::test]
    async fn invalid_rule_is_skipped_and_others_still_run() {
        let queue = queue();
        let scheduler = Scheduler::new(
            vec![daily("broken", "7 am"), daily("nass", "07:00")],
            queue.clone(),
            SchedulerSettings::default(),
        );

        let report = scheduler.tick(now()).await.unwrap();
        assert_eq!(report.inserted, 1);
        assert_eq!(report.skipped_rules, vec!["broken".to_string()]);
    }

    #[test]
    fn preview_merges_rules_in_time_order() {
        let scheduler = Scheduler::new(
            vec![daily("late", "18:00"), daily("early", "07:00"), wasde()],
            queue(),
            SchedulerSettings::default(),
        );

        let fires = scheduler.preview(now(), 4);
        let names: Vec<&str> = fires.iter().map(|f| f.rule.as_str()).collect();
        assert_eq!(names, vec!["early", "wasde", "late", "early"]);
        assert_eq!(fires[1].reference_month.as_deref(), Some("2026-10"));
    }

    #[tokio::test]
    async fn trigger_enqueues_immediately() {
        let queue = queue();
        let scheduler =
            Scheduler::new(vec![wasde()], queue.clone(), SchedulerSettings::default());

        let id = scheduler.trigger("wasde", now()).await.unwrap();
        let task = queue.get(id).await.unwrap().unwrap();
        assert_eq!(task.scheduled_for, None);
        assert_eq!(task.schedule_key, None);
        assert_eq!(task.payload["reference_month"], "2026-09");

        // A second trigger is a separate run.
        scheduler.trigger("wasde", now()).await.unwrap();
        assert_eq!(queue.counts().await.unwrap().pending, 2);
    }

    #[tokio::test]
    async fn trigger_unknown_rule() {
        let scheduler = Scheduler::new(vec![], queue(), SchedulerSettings::default());
        let err = scheduler.trigger("nope", now()).await.unwrap_err();
        assert!(matches!(
            err,
            SchedulerError::Rule(ScheduleRuleError::UnknownRule(name)) if name == "nope"
        ));
    }
}
