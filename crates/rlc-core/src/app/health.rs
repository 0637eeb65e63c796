//! Health summarizer - one day of pipeline log entries in one status.
//!
//! `summarize` is pure; `HealthSummarizer` adds the store reads, the task
//! counts and the optional notification.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt::{self, Write as _};
use std::sync::Arc;

use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use chrono_tz::Tz;
use serde::Serialize;

use crate::domain::{EventType, Layer, LogEntry, TaskCounts, local_to_utc};
use crate::error::StoreError;
use crate::ports::{Clock, LogStore, Notifier, TaskStore};

/// Overall verdict for one day.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PipelineStatus {
    Success,
    Warning,
    Failed,
    NoData,
}

impl PipelineStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            PipelineStatus::Success => "SUCCESS",
            PipelineStatus::Warning => "WARNING",
            PipelineStatus::Failed => "FAILED",
            PipelineStatus::NoData => "NO_DATA",
        }
    }
}

impl fmt::Display for PipelineStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Entries for one (agent, event type, layer).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EventCount {
    pub agent_name: String,
    pub event_type: EventType,
    pub layer: Option<Layer>,
    pub count: usize,
}

/// A day's roll-up of the pipeline log, plus queue counts when the report
/// came from [`HealthSummarizer::run`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HealthReport {
    pub date: NaiveDate,
    pub status: PipelineStatus,
    pub total: usize,

    /// Per (agent, event type, layer), sorted by that key.
    pub counts: Vec<EventCount>,

    pub errors: usize,
    pub failures: usize,
    pub warnings: usize,

    /// Agents with at least one `error` or `failure` entry.
    pub failed_agents: Vec<String>,

    pub tasks: TaskCounts,

    /// `None` when no notification was requested.
    pub notified: Option<bool>,
}

impl HealthReport {
    /// `[RLC] Pipeline health <date>: <STATUS>`
    pub fn subject(&self) -> String {
        format!("[RLC] Pipeline health {}: {}", self.date, self.status)
    }

    /// Plain-text body for the notifier and the CLI.
    pub fn body(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "Date:     {}", self.date);
        let _ = writeln!(out, "Status:   {}", self.status);
        let _ = writeln!(
            out,
            "Entries:  {} ({} errors, {} failures, {} warnings)",
            self.total, self.errors, self.failures, self.warnings
        );
        let _ = writeln!(
            out,
            "Tasks:    {} pending, {} running, {} succeeded, {} failed, {} skipped",
            self.tasks.pending,
            self.tasks.running,
            self.tasks.succeeded,
            self.tasks.failed,
            self.tasks.skipped
        );
        if !self.failed_agents.is_empty() {
            let _ = writeln!(out, "Failed:   {}", self.failed_agents.join(", "));
        }
        if !self.counts.is_empty() {
            let _ = writeln!(out);
            for c in &self.counts {
                let layer = c.layer.map(Layer::as_str).unwrap_or("-");
                let _ = writeln!(
                    out,
                    "  {:<28} {:<8} {:<7} {:>5}",
                    c.agent_name, c.event_type, layer, c.count
                );
            }
        }
        out
    }
}

/// Roll `entries` up into a report. Status precedence:
/// any error/failure, then warnings over `warning_threshold`, then no entries.
pub fn summarize(date: NaiveDate, entries: &[LogEntry], warning_threshold: usize) -> HealthReport {
    let mut grouped: BTreeMap<(String, EventType, Option<Layer>), usize> = BTreeMap::new();
    let mut failed_agents = BTreeSet::new();
    let (mut errors, mut failures, mut warnings) = (0, 0, 0);

    for entry in entries {
        *grouped
            .entry((entry.agent_name.clone(), entry.event_type, entry.layer))
            .or_default() += 1;
        match entry.event_type {
            EventType::Error => errors += 1,
            EventType::Failure => failures += 1,
            EventType::Warning => warnings += 1,
            _ => {}
        }
        if matches!(entry.event_type, EventType::Error | EventType::Failure) {
            failed_agents.insert(entry.agent_name.clone());
        }
    }

    let status = if errors + failures > 0 {
        PipelineStatus::Failed
    } else if warnings > warning_threshold {
        PipelineStatus::Warning
    } else if entries.is_empty() {
        PipelineStatus::NoData
    } else {
        PipelineStatus::Success
    };

    HealthReport {
        date,
        status,
        total: entries.len(),
        counts: grouped
            .into_iter()
            .map(|((agent_name, event_type, layer), count)| EventCount {
                agent_name,
                event_type,
                layer,
                count,
            })
            .collect(),
        errors,
        failures,
        warnings,
        failed_agents: failed_agents.into_iter().collect(),
        tasks: TaskCounts::default(),
        notified: None,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HealthSettings {
    /// Warnings tolerated before the day is `WARNING`.
    pub warning_threshold: usize,

    /// Zone that defines where a day starts.
    pub timezone: Tz,
}

impl Default for HealthSettings {
    fn default() -> Self {
        Self {
            warning_threshold: 5,
            timezone: Tz::UTC,
        }
    }
}

/// Reads one local day of the log, summarizes it and optionally notifies.
pub struct HealthSummarizer {
    logs: Arc<dyn LogStore>,
    tasks: Arc<dyn TaskStore>,
    notifier: Arc<dyn Notifier>,
    clock: Arc<dyn Clock>,
    settings: HealthSettings,
}

impl HealthSummarizer {
    pub fn new(
        logs: Arc<dyn LogStore>,
        tasks: Arc<dyn TaskStore>,
        notifier: Arc<dyn Notifier>,
        clock: Arc<dyn Clock>,
        settings: HealthSettings,
    ) -> Self {
        Self {
            logs,
            tasks,
            notifier,
            clock,
            settings,
        }
    }

    /// Today's date in the configured zone.
    pub fn today(&self) -> NaiveDate {
        self.clock.now().with_timezone(&self.settings.timezone).date_naive()
    }

    /// Summarize `date` and, when `notify` is set, send the report.
    ///
    /// # Errors
    /// Store errors from reading the log or the task counts. A notifier that
    /// declines the message is not an error; it shows as `notified: false`.
    pub async fn run(&self, date: NaiveDate, notify: bool) -> Result<HealthReport, StoreError> {
        let (start, end) = self.day_window(date);
        let entries = self.logs.entries_between(start, end).await?;

        let mut report = summarize(date, &entries, self.settings.warning_threshold);
        report.tasks = self.tasks.counts().await?;
        tracing::info!(%date, status = %report.status, entries = report.total, "health summarized");

        if notify {
            let sent = self.notifier.send(&report.subject(), &report.body()).await;
            if !sent {
                tracing::warn!(%date, "health notification was not accepted");
            }
            report.notified = Some(sent);
        }
        Ok(report)
    }

    /// Local midnight to the next local midnight, so DST days are 23 or 25
    /// hours long.
    fn day_window(&self, date: NaiveDate) -> (DateTime<Utc>, DateTime<Utc>) {
        let tz = self.settings.timezone;
        let start = local_to_utc(date.and_time(NaiveTime::MIN), tz);
        let end = date
            .succ_opt()
            .map(|next| local_to_utc(next.and_time(NaiveTime::MIN), tz))
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        (start, end)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ports::FixedClock;
    use crate::store::{InMemoryLogStore, InMemoryTaskStore};
    use async_trait::async_trait;
    use chrono::{Duration, TimeZone};
    use rstest::rstest;
    use tokio::sync::Mutex;

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 10, 19).unwrap()
    }

    fn at(hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 10, 19, hour, 0, 0).unwrap()
    }

    fn entry(agent: &str, event: EventType) -> LogEntry {
        LogEntry::new(at(8), agent, event, "msg").with_layer(Layer::Bronze)
    }

    #[test]
    fn no_entries_is_no_data() {
        let report = summarize(date(), &[], 5);
        assert_eq!(report.status, PipelineStatus::NoData);
        assert_eq!(report.total, 0);
        assert!(report.counts.is_empty());
    }

    #[test]
    fn one_error_is_failed() {
        let entries = vec![
            entry("usda_nass", EventType::Start),
            entry("usda_nass", EventType::Error),
            entry("cftc_cot", EventType::Success),
        ];
        let report = summarize(date(), &entries, 5);
        assert_eq!(report.status, PipelineStatus::Failed);
        assert_eq!(report.errors, 1);
        assert_eq!(report.failed_agents, vec!["usda_nass".to_string()]);
    }

    #[rstest]
    #[case(&[EventType::Success], PipelineStatus::Success)]
    #[case(&[EventType::Failure], PipelineStatus::Failed)]
    #[case(&[EventType::Warning; 5], PipelineStatus::Success)]
    #[case(&[EventType::Warning; 6], PipelineStatus::Warning)]
    #[case(
        &[
            EventType::Warning,
            EventType::Warning,
            EventType::Warning,
            EventType::Warning,
            EventType::Warning,
            EventType::Warning,
            EventType::Error,
        ],
        PipelineStatus::Failed
    )]
    #[case(&[EventType::Info], PipelineStatus::Success)]
    fn status_precedence(#[case] events: &[EventType], #[case] expected: PipelineStatus) {
        let entries: Vec<LogEntry> = events.iter().map(|e| entry("eia", *e)).collect();
        assert_eq!(summarize(date(), &entries, 5).status, expected);
    }

    #[test]
    fn counts_group_by_agent_event_and_layer() {
        let entries = vec![
            entry("eia", EventType::Success),
            entry("eia", EventType::Success),
            entry("eia", EventType::Success).with_layer(Layer::Silver),
        ];
        let report = summarize(date(), &entries, 5);
        assert_eq!(report.counts.len(), 2);
        assert_eq!(report.counts[0].layer, Some(Layer::Bronze));
        assert_eq!(report.counts[0].count, 2);
    }

    #[test]
    fn status_serializes_screaming_snake() {
        assert_eq!(serde_json::to_value(PipelineStatus::NoData).unwrap(), "NO_DATA");
    }

    #[derive(Default)]
    struct RecordingNotifier {
        sent: Mutex<Vec<(String, String)>>,
    }

    #[async_trait]
    impl Notifier for RecordingNotifier {
        async fn send(&self, subject: &str, body: &str) -> bool {
            self.sent.lock().await.push((subject.to_string(), body.to_string()));
            true
        }
    }

    #[tokio::test]
    async fn run_reads_the_local_day_and_notifies() {
        let logs = Arc::new(InMemoryLogStore::new());
        let notifier = Arc::new(RecordingNotifier::default());
        // Local midnight in CDT is 05:00 UTC.
        let settings = HealthSettings {
            warning_threshold: 5,
            timezone: chrono_tz::America::Chicago,
        };
        let summarizer = HealthSummarizer::new(
            logs.clone(),
            Arc::new(InMemoryTaskStore::new()),
            notifier.clone(),
            Arc::new(FixedClock::new(at(12))),
            settings,
        );

        logs.append(&LogEntry::new(at(4), "cftc", EventType::Error, "previous local day"))
            .await
            .unwrap();
        logs.append(&LogEntry::new(at(6), "cftc", EventType::Success, "ok"))
            .await
            .unwrap();
        let next_day = LogEntry::new(
            at(5) + Duration::days(1),
            "cftc",
            EventType::Error,
            "next local day",
        );
        logs.append(&next_day).await.unwrap();

        assert_eq!(summarizer.today(), date());
        let report = summarizer.run(date(), true).await.unwrap();
        assert_eq!(report.status, PipelineStatus::Success);
        assert_eq!(report.total, 1);
        assert_eq!(report.notified, Some(true));

        let sent = notifier.sent.lock().await;
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0, "[RLC] Pipeline health 2026-10-19: SUCCESS");
        assert!(sent[0].1.contains("Status:   SUCCESS"));
    }

    #[tokio::test]
    async fn fall_back_day_is_twenty_five_hours() {
        let logs = Arc::new(InMemoryLogStore::new());
        let summarizer = HealthSummarizer::new(
            logs.clone(),
            Arc::new(InMemoryTaskStore::new()),
            Arc::new(RecordingNotifier::default()),
            Arc::new(FixedClock::new(at(12))),
            HealthSettings {
                warning_threshold: 5,
                timezone: chrono_tz::America::Chicago,
            },
        );
        // 2026-11-01 in Chicago runs from 05:00Z to 06:00Z the next day.
        let day = NaiveDate::from_ymd_opt(2026, 11, 1).unwrap();
        let late = Utc.with_ymd_and_hms(2026, 11, 2, 5, 30, 0).unwrap();
        logs.append(&LogEntry::new(late, "eia", EventType::Success, "23:30 CST"))
            .await
            .unwrap();

        let report = summarizer.run(day, false).await.unwrap();
        assert_eq!(report.total, 1);
    }

    #[tokio::test]
    async fn run_without_notify_leaves_notified_unset() {
        let summarizer = HealthSummarizer::new(
            Arc::new(InMemoryLogStore::new()),
            Arc::new(InMemoryTaskStore::new()),
            Arc::new(RecordingNotifier::default()),
            Arc::new(FixedClock::new(at(12))),
            HealthSettings::default(),
        );
        let report = summarizer.run(date(), false).await.unwrap();
        assert_eq!(report.status, PipelineStatus::NoData);
        assert_eq!(report.notified, None);
    }
}
