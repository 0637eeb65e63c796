//! Configuration loaded once at startup from `rlc.toml`.
//!
//! ```toml
//! [store]
//! path = "/var/lib/rlc/rlc.db"
//!
//! [scheduler]
//! timezone = "America/Chicago"
//!
//! [[schedule]]
//! name = "cftc_cot"
//! handler = "collectors.cftc.cot"
//! kind = "daily_at"
//! at = "15:45"
//! days = ["fri"]
//! ```

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

use crate::app::{ExecutorSettings, HealthSettings, SchedulerSettings};
use crate::domain::{ScheduleRule, parse_timezone};
use crate::error::ConfigError;

/// Used when neither `--config` nor `RLC_CONFIG` is given.
pub const DEFAULT_CONFIG_PATH: &str = "rlc.toml";

/// Environment variable naming the config file.
pub const CONFIG_PATH_ENV: &str = "RLC_CONFIG";

/// The whole `rlc.toml`. Every section and field is optional.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub executor: ExecutorConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub health: HealthConfig,
    #[serde(default)]
    pub schedule: Vec<ScheduleRule>,
}

/// `[store]`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoreConfig {
    #[serde(default = "default_store_path")]
    pub path: PathBuf,

    /// How long a write waits for another process's lock before giving up
    /// with `StoreError::Busy`.
    #[serde(default = "default_busy_timeout")]
    pub busy_timeout_ms: u64,
}

/// `[executor]`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutorConfig {
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,
    #[serde(default)]
    pub handler_timeout_secs: Option<u64>,
}

/// `[scheduler]`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchedulerConfig {
    #[serde(default = "default_tick_interval")]
    pub tick_interval_secs: u64,

    /// Must cover at least one tick interval.
    #[serde(default = "default_horizon")]
    pub horizon_hours: u32,

    /// IANA zone name for rule times and the health day.
    #[serde(default = "default_timezone")]
    pub timezone: String,
}

/// `[health]`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthConfig {
    #[serde(default = "default_warning_threshold")]
    pub warning_threshold: usize,
}

fn default_store_path() -> PathBuf {
    PathBuf::from("rlc.db")
}

fn default_busy_timeout() -> u64 {
    5_000
}

fn default_poll_interval() -> u64 {
    5
}

fn default_tick_interval() -> u64 {
    60
}

fn default_horizon() -> u32 {
    24
}

fn default_timezone() -> String {
    "UTC".into()
}

fn default_warning_threshold() -> usize {
    5
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: default_store_path(),
            busy_timeout_ms: default_busy_timeout(),
        }
    }
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: default_poll_interval(),
            handler_timeout_secs: None,
        }
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick_interval_secs: default_tick_interval(),
            horizon_hours: default_horizon(),
            timezone: default_timezone(),
        }
    }
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            warning_threshold: default_warning_threshold(),
        }
    }
}

impl Config {
    /// `--config` wins, then `RLC_CONFIG`, then `./rlc.toml`.
    pub fn resolve_path(flag: Option<PathBuf>, env: Option<String>) -> PathBuf {
        flag.or_else(|| env.filter(|v| !v.is_empty()).map(PathBuf::from))
            .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH))
    }

    /// Load from `path`; a missing file yields the defaults.
    pub fn load_or_default(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::debug!(path = %path.display(), "no config file, using defaults");
            return Ok(Self::default());
        }
        Self::load_from(path)
    }

    /// Read and parse `path`.
    ///
    /// # Errors
    /// `ConfigError::Io` when the file cannot be read, `ConfigError::Parse`
    /// for anything [`Config::parse`] rejects.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let config = Self::parse(&content).map_err(|message| ConfigError::Parse {
            path: path.display().to_string(),
            message,
        })?;
        tracing::debug!(path = %path.display(), rules = config.schedule.len(), "config loaded");
        Ok(config)
    }

    /// Parse and check everything that must hold before the daemon starts.
    /// Individual rule times are checked per tick instead, so one bad rule
    /// does not stop the others.
    pub fn parse(content: &str) -> Result<Self, String> {
        let config: Config = toml::from_str(content).map_err(|e| e.to_string())?;

        parse_timezone(&config.scheduler.timezone).map_err(|e| e.to_string())?;

        let horizon_secs = u64::from(config.scheduler.horizon_hours) * 3600;
        let tick_secs = config.scheduler.tick_interval_secs.max(1);
        if horizon_secs < tick_secs {
            return Err(format!(
                "scheduler.horizon_hours ({}h) is shorter than tick_interval_secs ({tick_secs}s); \
                 occurrences between ticks would never be queued",
                config.scheduler.horizon_hours
            ));
        }

        let mut names = HashSet::new();
        for rule in &config.schedule {
            if !names.insert(rule.name.as_str()) {
                return Err(format!("duplicate schedule rule '{}'", rule.name));
            }
        }
        Ok(config)
    }

    pub fn busy_timeout(&self) -> Duration {
        Duration::from_millis(self.store.busy_timeout_ms)
    }

    pub fn executor_settings(&self) -> ExecutorSettings {
        ExecutorSettings {
            poll_interval: Duration::from_secs(self.executor.poll_interval_secs.max(1)),
            handler_timeout: self.executor.handler_timeout_secs.map(Duration::from_secs),
        }
    }

    pub fn scheduler_settings(&self) -> SchedulerSettings {
        SchedulerSettings {
            horizon: chrono::Duration::hours(i64::from(self.scheduler.horizon_hours)),
            timezone: self.timezone(),
        }
    }

    pub fn health_settings(&self) -> HealthSettings {
        HealthSettings {
            warning_threshold: self.health.warning_threshold,
            timezone: self.timezone(),
        }
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_secs(self.scheduler.tick_interval_secs.max(1))
    }

    // Checked in `parse`; a hand-built config with a bad zone falls back to UTC.
    fn timezone(&self) -> Tz {
        parse_timezone(&self.scheduler.timezone).unwrap_or_else(|err| {
            tracing::warn!(error = %err, "falling back to UTC");
            Tz::UTC
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::RuleKind;
    use rstest::rstest;

    #[test]
    fn empty_file_is_all_defaults() {
        let config = Config::parse("").unwrap();
        assert_eq!(config, Config::default());
        assert_eq!(config.store.path, PathBuf::from("rlc.db"));
        assert_eq!(config.executor.poll_interval_secs, 5);
        assert_eq!(config.scheduler.horizon_hours, 24);
        assert_eq!(config.health.warning_threshold, 5);
        assert_eq!(config.busy_timeout(), Duration::from_secs(5));
        assert_eq!(config.scheduler_settings().timezone, Tz::UTC);
        assert!(config.executor_settings().handler_timeout.is_none());
    }

    #[test]
    fn full_file_parses() {
        let config = Config::parse(
            r#"
            [store]
            path = "/var/lib/rlc/rlc.db"

            [executor]
            poll_interval_secs = 2
            handler_timeout_secs = 600

            [scheduler]
            timezone = "America/Chicago"

            [[schedule]]
            name = "cftc_cot"
            handler = "collectors.cftc.cot"
            kind = "daily_at"
            at = "15:45"
            days = ["fri"]

            [[schedule]]
            name = "wasde"
            handler = "collectors.usda.wasde"
            priority = 1
            kind = "calendar"

            [schedule.releases]
            "2026-10" = "2026-11-10T12:00"

            [schedule.payload]
            report = "wasde"
            "#,
        )
        .unwrap();

        assert_eq!(config.schedule.len(), 2);
        assert!(matches!(
            config.schedule[1].kind,
            RuleKind::Calendar { ref releases } if releases.len() == 1
        ));
        assert_eq!(config.schedule[1].payload["report"], "wasde");
        assert_eq!(
            config.executor_settings().handler_timeout,
            Some(Duration::from_secs(600))
        );
        assert_eq!(
            config.scheduler_settings().timezone,
            chrono_tz::America::Chicago
        );
        assert_eq!(config.health_settings().timezone, chrono_tz::America::Chicago);
    }

    #[test]
    fn unknown_zone_is_rejected() {
        let err = Config::parse("[scheduler]\ntimezone = \"Central Time\"\n").unwrap_err();
        assert!(err.contains("Central Time"));
    }

    #[rstest]
    #[case("[scheduler]\nhorizon_hours = 0\n")]
    #[case("[scheduler]\nhorizon_hours = 1\ntick_interval_secs = 7200\n")]
    fn horizon_shorter_than_tick_is_rejected(#[case] raw: &str) {
        let err = Config::parse(raw).unwrap_err();
        assert!(err.contains("horizon_hours"), "{err}");
    }

    #[test]
    fn horizon_equal_to_tick_is_accepted() {
        let config = Config::parse("[scheduler]\nhorizon_hours = 1\ntick_interval_secs = 3600\n")
            .unwrap();
        assert_eq!(config.scheduler.horizon_hours, 1);
    }

    #[test]
    fn duplicate_rule_names_are_rejected() {
        let rule =
            "[[schedule]]\nname = \"a\"\nhandler = \"h\"\nkind = \"daily_at\"\nat = \"06:00\"\n";
        let err = Config::parse(&format!("{rule}{rule}")).unwrap_err();
        assert!(err.contains("duplicate"));
    }

    #[test]
    fn path_resolution_order() {
        let flag = Some(PathBuf::from("/etc/rlc.toml"));
        let env = Some("/opt/rlc.toml".to_string());
        assert_eq!(
            Config::resolve_path(flag, env.clone()),
            PathBuf::from("/etc/rlc.toml")
        );
        assert_eq!(
            Config::resolve_path(None, env),
            PathBuf::from("/opt/rlc.toml")
        );
        assert_eq!(
            Config::resolve_path(None, Some(String::new())),
            PathBuf::from(DEFAULT_CONFIG_PATH)
        );
    }

    #[test]
    fn missing_file_yields_defaults_and_io_errors_surface() {
        let dir = std::env::temp_dir().join(format!("rlc-config-{}", ulid::Ulid::new()));
        let missing = dir.join("rlc.toml");
        assert_eq!(Config::load_or_default(&missing).unwrap(), Config::default());

        assert!(matches!(Config::load_from(&missing), Err(ConfigError::Io { .. })));
    }
}
