use std::path::PathBuf;

use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use rlc_core::domain::{EventType, Layer, TaskId, TaskStatus};

#[derive(Parser, Debug)]
#[command(name = "rlc", version, about = "Task orchestrator for the RLC data collectors")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Config file (default: $RLC_CONFIG, then ./rlc.toml)
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// SQLite database, overrides [store] path
    #[arg(long, global = true, value_name = "PATH")]
    pub db: Option<PathBuf>,

    /// Debug logging
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the scheduler and executor until Ctrl-C
    Run,

    /// List stored tasks and the configured recurring rules
    ///
    /// Example: rlc list --status failed --limit 5
    List {
        #[arg(long)]
        status: Option<TaskStatus>,
        #[arg(long, default_value_t = 20)]
        limit: usize,
        #[arg(long)]
        json: bool,
    },

    /// Preview the next scheduled fires
    ///
    /// Example: rlc next -n 5
    Next {
        #[arg(short = 'n', default_value_t = 10)]
        count: usize,
        #[arg(long)]
        json: bool,
    },

    /// Enqueue a rule's task to run now
    ///
    /// Example: rlc trigger wasde
    Trigger { rule: String },

    /// Show one task
    Show {
        id: TaskId,
        #[arg(long)]
        json: bool,
    },

    /// Skip a pending task
    Skip {
        id: TaskId,
        #[arg(long, default_value = "skipped by operator")]
        reason: String,
    },

    /// Summarize one day of pipeline log entries
    ///
    /// Example: rlc health --date 2026-10-19 --notify
    Health {
        /// Defaults to today in the configured time zone
        #[arg(long)]
        date: Option<NaiveDate>,
        #[arg(long)]
        notify: bool,
        #[arg(long)]
        json: bool,
    },

    /// Append a pipeline log entry (for collector scripts)
    ///
    /// Example: rlc emit usda_nass success --layer bronze --message "saved 42 rows"
    Emit {
        agent: String,
        event_type: EventType,
        #[arg(long)]
        layer: Option<Layer>,
        #[arg(long, default_value = "")]
        message: String,
        /// JSON object attached to the entry
        #[arg(long, value_name = "JSON")]
        data: Option<String>,
    },
}
