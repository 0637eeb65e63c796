//! rlc - run and inspect the collector task queue.
//!
//! Usage:
//!   rlc run                        # scheduler + executor until Ctrl-C
//!   rlc list --status failed       # stored tasks and configured rules
//!   rlc health --notify            # today's pipeline summary

mod cli;

use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use chrono::{DateTime, Utc};
use clap::Parser;
use tokio::sync::watch;
use tracing_subscriber::EnvFilter;

use rlc_core::app::{
    Daemon, Executor, HealthReport, HealthSummarizer, RegistryBuilder, Scheduler, TaskQueue,
    UpcomingFire,
};
use rlc_core::config::{CONFIG_PATH_ENV, Config};
use rlc_core::domain::{LogEntry, RuleKind, ScheduleRule, Task, TaskFilter, TaskId, Transition};
use rlc_core::handlers::register_builtins;
use rlc_core::ports::{Clock, LogStore, SystemClock, TracingNotifier, UlidGenerator};
use rlc_core::store::SqliteStore;

use crate::cli::{Cli, Command};

/// Everything a command needs, wired from one `Config`.
struct App {
    config: Config,
    clock: Arc<dyn Clock>,
    store: Arc<SqliteStore>,
    queue: Arc<TaskQueue>,
    scheduler: Arc<Scheduler>,
    summarizer: Arc<HealthSummarizer>,
}

impl App {
    fn open(cli: &Cli) -> Result<Self> {
        let config_path =
            Config::resolve_path(cli.config.clone(), std::env::var(CONFIG_PATH_ENV).ok());
        let mut config = Config::load_or_default(&config_path)?;
        if let Some(db) = &cli.db {
            config.store.path = db.clone();
        }

        let store = Arc::new(
            SqliteStore::open_with_timeout(&config.store.path, config.busy_timeout())
                .with_context(|| format!("opening {}", config.store.path.display()))?,
        );
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let queue = Arc::new(TaskQueue::new(
            store.clone(),
            clock.clone(),
            Arc::new(UlidGenerator::new(clock.clone())),
        ));
        let scheduler = Arc::new(Scheduler::new(
            config.schedule.clone(),
            queue.clone(),
            config.scheduler_settings(),
        ));
        let summarizer = Arc::new(HealthSummarizer::new(
            store.clone(),
            store.clone(),
            Arc::new(TracingNotifier),
            clock.clone(),
            config.health_settings(),
        ));

        Ok(Self {
            config,
            clock,
            store,
            queue,
            scheduler,
            summarizer,
        })
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        "rlc=debug,rlc_core=debug"
    } else {
        "rlc=info,rlc_core=info"
    };
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("error: {err:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<()> {
    let app = App::open(&cli)?;

    match cli.command {
        Command::Run => run_daemon(app).await,
        Command::List { status, limit, json } => {
            let tasks = app
                .queue
                .list(&TaskFilter {
                    status,
                    limit: Some(limit),
                })
                .await?;
            if json {
                let out = serde_json::json!({ "tasks": tasks, "rules": app.config.schedule });
                println!("{}", serde_json::to_string_pretty(&out)?);
            } else {
                print_tasks_plain(&tasks);
                print_rules_plain(&app.config.schedule);
            }
            Ok(())
        }
        Command::Next { count, json } => {
            let fires = app.scheduler.preview(app.clock.now(), count);
            if json {
                println!("{}", serde_json::to_string_pretty(&fires)?);
            } else {
                print_fires_plain(&fires);
            }
            Ok(())
        }
        Command::Trigger { rule } => {
            let id = app.scheduler.trigger(&rule, app.clock.now()).await?;
            println!("{id}");
            Ok(())
        }
        Command::Show { id, json } => {
            let Some(task) = app.queue.get(id).await? else {
                bail!("task not found: {id}");
            };
            if json {
                println!("{}", serde_json::to_string_pretty(&task)?);
            } else {
                print_task_detail(&task);
            }
            Ok(())
        }
        Command::Skip { id, reason } => skip(&app, id, reason).await,
        Command::Health { date, notify, json } => {
            let date = date.unwrap_or_else(|| app.summarizer.today());
            let report = app.summarizer.run(date, notify).await?;
            print_health(&report, json)
        }
        Command::Emit {
            agent,
            event_type,
            layer,
            message,
            data,
        } => {
            let mut entry = LogEntry::new(app.clock.now(), agent, event_type, message);
            if let Some(layer) = layer {
                entry = entry.with_layer(layer);
            }
            if let Some(raw) = data {
                let value: serde_json::Value =
                    serde_json::from_str(&raw).context("--data is not valid JSON")?;
                entry = entry.with_data(value);
            }
            app.store.append(&entry).await?;
            Ok(())
        }
    }
}

async fn run_daemon(app: App) -> Result<()> {
    let registry = register_builtins(RegistryBuilder::new(), app.summarizer.clone())?
        .expect(app.scheduler.handler_keys())
        .build()?;
    tracing::info!(handlers = ?registry.keys(), "handlers registered");

    let executor = Arc::new(Executor::new(
        app.queue.clone(),
        Arc::new(registry),
        app.store.clone(),
        app.config.executor_settings(),
    ));
    let daemon = Daemon::new(app.scheduler.clone(), executor, app.config.tick_interval());

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("ctrl-c received, finishing current task");
            // ignore send error: the daemon may already have stopped
            let _ = shutdown_tx.send(true);
        }
    });

    daemon.run(shutdown_rx).await?;
    Ok(())
}

async fn skip(app: &App, id: TaskId, reason: String) -> Result<()> {
    match app.queue.mark_skipped(id, reason).await? {
        Transition::Applied => {
            println!("skipped {id}");
            Ok(())
        }
        Transition::Ignored { current } => {
            bail!("task {id} is {current}; only pending tasks can be skipped")
        }
    }
}

fn fmt_time(at: DateTime<Utc>) -> String {
    at.format("%Y-%m-%d %H:%M:%S").to_string()
}

fn fmt_opt_time(at: Option<DateTime<Utc>>) -> String {
    at.map(fmt_time).unwrap_or_else(|| "-".to_string())
}

fn print_tasks_plain(tasks: &[Task]) {
    if tasks.is_empty() {
        println!("no tasks");
    }
    for task in tasks {
        println!(
            "{} | {} | {} | p{} | {} | {}",
            task.id,
            task.name,
            task.status,
            task.priority,
            fmt_opt_time(task.scheduled_for),
            task.error.as_deref().unwrap_or("")
        );
    }
}

fn print_rules_plain(rules: &[ScheduleRule]) {
    if rules.is_empty() {
        return;
    }
    println!();
    println!("recurring rules:");
    for rule in rules {
        let when = match &rule.kind {
            RuleKind::DailyAt { at, days } if days.is_empty() => {
                format!("daily at {at}")
            }
            RuleKind::DailyAt { at, days } => {
                format!("{} at {at}", days.join(","))
            }
            RuleKind::Calendar { releases } => {
                format!("calendar ({} releases)", releases.len())
            }
        };
        println!("  {} -> {} | {} | p{}", rule.name, rule.handler, when, rule.priority);
    }
}

fn print_fires_plain(fires: &[UpcomingFire]) {
    if fires.is_empty() {
        println!("nothing scheduled");
    }
    for fire in fires {
        match &fire.reference_month {
            Some(month) => println!(
                "{} | {} ({month}) | {}",
                fmt_time(fire.at),
                fire.rule,
                fire.handler
            ),
            None => println!("{} | {} | {}", fmt_time(fire.at), fire.rule, fire.handler),
        }
    }
}

fn print_task_detail(task: &Task) {
    println!("id:            {}", task.id);
    println!("name:          {}", task.name);
    println!("type:          {}", task.task_type);
    println!("status:        {}", task.status);
    println!("priority:      {}", task.priority);
    println!("scheduled_for: {}", fmt_opt_time(task.scheduled_for));
    println!("created_at:    {}", fmt_time(task.created_at));
    println!("started_at:    {}", fmt_opt_time(task.started_at));
    println!("completed_at:  {}", fmt_opt_time(task.completed_at));
    if let Some(key) = &task.schedule_key {
        println!("schedule_key:  {key}");
    }
    println!("payload:       {}", serde_json::Value::Object(task.payload.clone()));
    if let Some(result) = &task.result {
        println!("result:        {}", serde_json::Value::Object(result.clone()));
    }
    if let Some(error) = &task.error {
        println!("error:         {error}");
    }
}

fn print_health(report: &HealthReport, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(report)?);
    } else {
        println!("{}", report.subject());
        println!();
        print!("{}", report.body());
        if let Some(sent) = report.notified {
            println!();
            println!("notification {}", if sent { "sent" } else { "NOT sent" });
        }
    }
    Ok(())
}
