//! Notifier port - where health summaries are forwarded.
//!
//! Email delivery lives outside this crate; anything that can take a subject
//! and a body plugs in here.

use async_trait::async_trait;

#[async_trait]
pub trait Notifier: Send + Sync {
    /// Returns whether the message was accepted for delivery.
    async fn send(&self, subject: &str, body: &str) -> bool;
}

/// Writes notifications to the tracing log. Used when no sender is wired in.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingNotifier;

#[async_trait]
impl Notifier for TracingNotifier {
    async fn send(&self, subject: &str, body: &str) -> bool {
        tracing::info!(%subject, "notification\n{body}");
        true
    }
}
