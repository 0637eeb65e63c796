//! Typed handler API.
//!
//! Handler keys are bound to payload types through `HandlerParams::KEY`, so a
//! typo in a key shows up as a missing handler at startup rather than as a
//! failed task at 3 a.m.

pub mod handler;
pub mod registry;

pub use self::handler::{Handler, HandlerParams, ParamsHandler, TypedHandler};
pub use self::registry::HandlerRegistry;
