//! Session errors and user-facing notices.

use std::time::Duration;

use convo_stream_transport::{DomainError, StatusNotice};
use thiserror::Error;

/// Session facade error.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("not connected")]
    NotConnected,
    #[error("session closed")]
    Closed,
}

/// Something the UI should show.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notice {
    /// Error about the conversation itself.
    Error {
        error: DomainError,
        /// Leave the conversation view after this delay.
        redirect_after: Option<Duration>,
    },
    /// Progress message from the remote side.
    Status(StatusNotice),
}
