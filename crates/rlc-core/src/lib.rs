//! rlc-core
//!
//! Task orchestration for the market-data collectors: a persistent task
//! queue, a single-threaded executor, a recurring-rule scheduler and a daily
//! health summary over the pipeline log.
//!
//! # Modules
//! - **domain**: tasks, status machine, log entries, schedule rules
//! - **ports**: `TaskStore`, `LogStore`, `Clock`, `IdGenerator`, `Notifier`
//! - **store**: SQLite and in-memory implementations of the store ports
//! - **typed**: handler traits and the `HandlerRegistry`
//! - **app**: queue, executor, scheduler, health summarizer, daemon loop
//! - **handlers**: built-in handlers (`builtin.*`)
//! - **config**: `rlc.toml`

pub mod app;
pub mod config;
pub mod domain;
pub mod error;
pub mod handlers;
pub mod ports;
pub mod store;
pub mod typed;

pub use config::Config;
