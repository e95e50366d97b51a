//! Shared session enums and the consumer handler trait.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::Event;

/// Whether a channel to the remote agent is currently open.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConnectionStatus {
    Connected,
    Disconnected,
}

/// How ingested events reach the log.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionMode {
    /// Events are delivered as soon as they arrive.
    #[default]
    Live,
    /// Events are queued and delivered at a watchable pace.
    Replay,
}

/// Progress of a replay. Only meaningful in [`SessionMode::Replay`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReplayState {
    InProgress,
    Completed,
}

/// Failure reported by an [`EventHandler`].
#[derive(Debug, Error)]
#[error("event handler failed: {0}")]
pub struct HandlerError(pub String);

/// Downstream consumer of delivered events.
///
/// Every event, live or replayed, is handed to exactly one handler, in log
/// order. Failures are logged and never retried.
pub trait EventHandler: Send + Sync {
    /// Handle one delivered event.
    ///
    /// # Errors
    /// Returns [`HandlerError`] if the downstream side effect failed.
    fn on_event(&self, event: &Event) -> Result<(), HandlerError>;

    /// Called when a replay restarts, so state derived from earlier
    /// deliveries can be discarded.
    fn on_reset(&self) {}
}

impl<F> EventHandler for F
where
    F: Fn(&Event) -> Result<(), HandlerError> + Send + Sync,
{
    fn on_event(&self, event: &Event) -> Result<(), HandlerError> {
        self(event)
    }
}

/// Handler that ignores everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopHandler;

impl EventHandler for NoopHandler {
    fn on_event(&self, _event: &Event) -> Result<(), HandlerError> {
        Ok(())
    }
}
