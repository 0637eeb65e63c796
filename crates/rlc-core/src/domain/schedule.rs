//! Recurring schedule rules and their pure evaluation.
//!
//! Rule times are wall-clock times in one IANA time zone, so a rule at
//! `05:30` in `America/Chicago` keeps firing at 05:30 local across daylight
//! saving changes. Evaluation never touches the store; the scheduler turns
//! occurrences into task rows.

use std::collections::BTreeMap;

use chrono::{
    DateTime, Datelike, Days, LocalResult, NaiveDate, NaiveDateTime, NaiveTime, Offset,
    SecondsFormat, TimeZone, Utc, Weekday,
};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

use super::task::{DEFAULT_PRIORITY, NewTask, Payload};
use crate::error::ScheduleRuleError;

/// One `[[schedule]]` entry from the config file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduleRule {
    pub name: String,

    /// Registry key the materialized task dispatches to.
    pub handler: String,

    #[serde(default)]
    pub payload: Payload,

    #[serde(default = "default_priority")]
    pub priority: i32,

    #[serde(flatten)]
    pub kind: RuleKind,
}

fn default_priority() -> i32 {
    DEFAULT_PRIORITY
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RuleKind {
    /// Every day (or every listed weekday) at `at` (`HH:MM[:SS]`).
    DailyAt {
        at: String,
        #[serde(default)]
        days: Vec<String>,
    },

    /// Release calendar: reference month (`YYYY-MM`) to release time
    /// (`YYYY-MM-DDTHH:MM[:SS]`).
    Calendar { releases: BTreeMap<String, String> },
}

/// One future fire of a rule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Occurrence {
    pub at: DateTime<Utc>,

    /// Set for calendar rules: the month the release reports on.
    pub reference_month: Option<String>,
}

impl ScheduleRule {
    /// Dedup key for a materialized occurrence.
    pub fn schedule_key(&self, at: DateTime<Utc>) -> String {
        format!("{}@{}", self.name, at.to_rfc3339_opts(SecondsFormat::Millis, true))
    }

    /// Task to enqueue for one occurrence. The payload is the rule payload plus
    /// `function`, and `reference_month` for calendar rules.
    pub fn task_for(&self, reference_month: Option<&str>) -> NewTask {
        let mut payload = self.payload.clone();
        if let Some(month) = reference_month {
            payload.insert(
                "reference_month".to_string(),
                serde_json::Value::String(month.to_string()),
            );
        }
        NewTask::function(&self.name, &self.handler, payload).with_priority(self.priority)
    }

    /// Check every time, date and weekday in the rule.
    pub fn validate(&self) -> Result<(), ScheduleRuleError> {
        match &self.kind {
            RuleKind::DailyAt { at, days } => {
                parse_time(&self.name, at)?;
                parse_weekdays(&self.name, days)?;
            }
            RuleKind::Calendar { releases } => {
                parse_releases(&self.name, releases, Tz::UTC)?;
            }
        }
        Ok(())
    }
}

/// First occurrence of `rule` at or after `after`, or `None` when the rule has
/// nothing left to fire (an exhausted release calendar).
///
/// # Errors
/// `ScheduleRuleError` when a time, weekday or release in the rule does not
/// parse.
pub fn next_occurrence(
    rule: &ScheduleRule,
    after: DateTime<Utc>,
    tz: Tz,
) -> Result<Option<Occurrence>, ScheduleRuleError> {
    match &rule.kind {
        RuleKind::DailyAt { at, days } => {
            let time = parse_time(&rule.name, at)?;
            let days = parse_weekdays(&rule.name, days)?;
            let local_day = after.with_timezone(&tz).date_naive();

            // Eight days always covers a weekday list with at least one entry.
            for step in 0..=7 {
                let Some(date) = local_day.checked_add_days(Days::new(step)) else {
                    break;
                };
                if !days.is_empty() && !days.contains(&date.weekday()) {
                    continue;
                }
                let at = local_to_utc(date.and_time(time), tz);
                if at >= after {
                    return Ok(Some(Occurrence {
                        at,
                        reference_month: None,
                    }));
                }
            }
            Ok(None)
        }
        RuleKind::Calendar { releases } => {
            let next = parse_releases(&rule.name, releases, tz)?
                .into_iter()
                .filter(|(_, at)| *at >= after)
                .min_by_key(|(_, at)| *at)
                .map(|(month, at)| Occurrence {
                    at,
                    reference_month: Some(month),
                });
            Ok(next)
        }
    }
}

/// Latest calendar release at or before `now`, for manual re-runs.
pub fn latest_release(
    rule: &ScheduleRule,
    now: DateTime<Utc>,
    tz: Tz,
) -> Result<Option<Occurrence>, ScheduleRuleError> {
    let RuleKind::Calendar { releases } = &rule.kind else {
        return Ok(None);
    };
    let latest = parse_releases(&rule.name, releases, tz)?
        .into_iter()
        .filter(|(_, at)| *at <= now)
        .max_by_key(|(_, at)| *at)
        .map(|(month, at)| Occurrence {
            at,
            reference_month: Some(month),
        });
    Ok(latest)
}

/// Parse an IANA zone name such as `America/Chicago` or `UTC`.
pub fn parse_timezone(raw: &str) -> Result<Tz, ScheduleRuleError> {
    raw.trim()
        .parse::<Tz>()
        .map_err(|_| ScheduleRuleError::InvalidTimezone(raw.to_string()))
}

/// Resolve a wall-clock time in `tz` to one instant.
///
/// # Gaps and folds
/// - A time repeated when clocks go back resolves to its first pass.
/// - A time skipped when clocks go forward is read with the offset in force
///   before the change, i.e. it lands as far past the gap as it was into it
///   (02:30 on a spring-forward night in Chicago fires at 03:30 CDT).
pub fn local_to_utc(local: NaiveDateTime, tz: Tz) -> DateTime<Utc> {
    match tz.from_local_datetime(&local) {
        LocalResult::Single(at) => at.with_timezone(&Utc),
        LocalResult::Ambiguous(first, _) => first.with_timezone(&Utc),
        LocalResult::None => {
            let before = tz
                .offset_from_utc_datetime(&(local - chrono::Duration::days(1)))
                .fix();
            DateTime::<Utc>::from_naive_utc_and_offset(local - before, Utc)
        }
    }
}

fn parse_time(rule: &str, raw: &str) -> Result<NaiveTime, ScheduleRuleError> {
    NaiveTime::parse_from_str(raw, "%H:%M:%S")
        .or_else(|_| NaiveTime::parse_from_str(raw, "%H:%M"))
        .map_err(|_| ScheduleRuleError::InvalidTime {
            rule: rule.to_string(),
            value: raw.to_string(),
        })
}

fn parse_weekdays(rule: &str, raw: &[String]) -> Result<Vec<Weekday>, ScheduleRuleError> {
    raw.iter()
        .map(|day| {
            day.trim()
                .parse::<Weekday>()
                .map_err(|_| ScheduleRuleError::InvalidWeekday {
                    rule: rule.to_string(),
                    value: day.clone(),
                })
        })
        .collect()
}

fn parse_releases(
    rule: &str,
    releases: &BTreeMap<String, String>,
    tz: Tz,
) -> Result<Vec<(String, DateTime<Utc>)>, ScheduleRuleError> {
    releases
        .iter()
        .map(|(month, stamp)| {
            let invalid = |value: &str| ScheduleRuleError::InvalidDate {
                rule: rule.to_string(),
                value: value.to_string(),
            };
            NaiveDate::parse_from_str(&format!("{month}-01"), "%Y-%m-%d")
                .map_err(|_| invalid(month))?;
            let local = NaiveDateTime::parse_from_str(stamp, "%Y-%m-%dT%H:%M:%S")
                .or_else(|_| NaiveDateTime::parse_from_str(stamp, "%Y-%m-%dT%H:%M"))
                .map_err(|_| invalid(stamp))?;
            Ok((month.clone(), local_to_utc(local, tz)))
        })
        .collect()
}
