//! Connector abstraction and the per-channel link handle.

use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::protocol::{ClientMessage, DomainError, OpenParams};

/// Transport-level failure.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("connection failed: {0}")]
    Connect(String),
    #[error("connection timed out")]
    Timeout,
    #[error("socket error: {0}")]
    Socket(String),
    #[error("channel closed")]
    Closed,
    #[error("{0}")]
    Domain(DomainError),
}

/// Whether an error is worth showing to the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Timeouts and generic socket failures: logged only.
    Suppressed,
    /// Errors about the conversation itself.
    Domain,
}

impl TransportError {
    #[must_use]
    pub const fn classify(&self) -> ErrorClass {
        match self {
            Self::Domain(_) => ErrorClass::Domain,
            _ => ErrorClass::Suppressed,
        }
    }

    #[must_use]
    pub const fn domain(&self) -> Option<&DomainError> {
        match self {
            Self::Domain(e) => Some(e),
            _ => None,
        }
    }
}

/// Signal raised by a transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportSignal {
    /// Handshake completed.
    Opened,
    /// Raw text frame.
    Frame(String),
    /// The transport failed and will not deliver anything else.
    Error(TransportError),
    /// The remote side closed the channel.
    Closed { reason: Option<String> },
}

/// Handle to one open (or opening) channel.
///
/// Dropping or closing the link shuts the transport down and detaches its
/// signals; nothing is delivered from a link after that.
#[derive(Debug)]
pub struct ChannelLink {
    outbound: mpsc::UnboundedSender<ClientMessage>,
    inbound: mpsc::UnboundedReceiver<TransportSignal>,
    shutdown: CancellationToken,
}

impl ChannelLink {
    /// Assemble a link from a transport's channel ends.
    #[must_use]
    pub const fn new(
        outbound: mpsc::UnboundedSender<ClientMessage>,
        inbound: mpsc::UnboundedReceiver<TransportSignal>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            outbound,
            inbound,
            shutdown,
        }
    }

    /// Queue a message for the transport without waiting.
    ///
    /// # Errors
    /// Returns [`TransportError::Closed`] if the transport is gone.
    pub fn send(&self, msg: ClientMessage) -> Result<(), TransportError> {
        self.outbound.send(msg).map_err(|_| TransportError::Closed)
    }

    /// Next signal; a vanished transport reads as a close.
    pub async fn recv(&mut self) -> TransportSignal {
        self.inbound
            .recv()
            .await
            .unwrap_or(TransportSignal::Closed { reason: None })
    }

    /// Shut the transport down.
    pub fn close(self) {
        // Drop does the work.
        drop(self);
    }
}

impl Drop for ChannelLink {
    fn drop(&mut self) {
        self.shutdown.cancel();
        self.inbound.close();
    }
}

/// Opens channels to the remote agent.
///
/// `open` must not block: the handshake runs in the background and reports
/// through [`TransportSignal::Opened`] or [`TransportSignal::Error`].
pub trait Connector: Send + Sync {
    fn open(&self, params: &OpenParams) -> ChannelLink;
}
