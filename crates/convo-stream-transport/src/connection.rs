//! Channel connection: owns at most one link and its lifecycle.

use std::sync::Arc;

use convo_stream_core::ConnectionStatus;
use thiserror::Error;

use crate::{
    channel::{ChannelLink, Connector, TransportError, TransportSignal},
    protocol::{ClientMessage, DomainError, OpenParams},
};

/// Caller-side misuse of the connection.
#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("not connected")]
    NotConnected,
    #[error(transparent)]
    Transport(#[from] TransportError),
}

enum ChannelState {
    Disconnected,
    Connecting(ChannelLink),
    Connected(ChannelLink),
}

/// What a transport signal meant for the connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelEvent {
    /// The channel is now usable.
    Opened,
    /// Raw text frame from the remote side.
    Frame(String),
    /// The channel is gone. `error` is `None` for a clean remote close.
    Lost { error: Option<TransportError> },
}

/// Supervises the single channel of a session.
///
/// The link never leaves this type; callers only see [`ChannelEvent`]s.
pub struct ChannelConnection {
    connector: Arc<dyn Connector>,
    state: ChannelState,
    params: Option<OpenParams>,
}

impl ChannelConnection {
    #[must_use]
    pub fn new(connector: Arc<dyn Connector>) -> Self {
        Self {
            connector,
            state: ChannelState::Disconnected,
            params: None,
        }
    }

    #[must_use]
    pub const fn status(&self) -> ConnectionStatus {
        match self.state {
            ChannelState::Connected(_) => ConnectionStatus::Connected,
            ChannelState::Disconnected | ChannelState::Connecting(_) => {
                ConnectionStatus::Disconnected
            }
        }
    }

    /// Whether a link exists, open or still handshaking.
    #[must_use]
    pub const fn is_active(&self) -> bool {
        !matches!(self.state, ChannelState::Disconnected)
    }

    /// Parameters of the most recent `connect`.
    #[must_use]
    pub const fn params(&self) -> Option<&OpenParams> {
        self.params.as_ref()
    }

    /// Open a new channel, closing any existing one first.
    pub fn connect(&mut self, params: OpenParams) {
        self.disconnect();
        tracing::debug!(
            conversation_id = %params.conversation_id,
            latest_event_id = params.latest_event_id,
            "opening channel"
        );
        let link = self.connector.open(&params);
        self.state = ChannelState::Connecting(link);
        self.params = Some(params);
    }

    /// Forward a message to the open channel.
    ///
    /// # Errors
    /// Returns [`ChannelError::NotConnected`] if no channel is open.
    pub fn send(&self, msg: ClientMessage) -> Result<(), ChannelError> {
        match &self.state {
            ChannelState::Connected(link) => link.send(msg).map_err(ChannelError::from),
            ChannelState::Disconnected | ChannelState::Connecting(_) => {
                Err(ChannelError::NotConnected)
            }
        }
    }

    /// Close the channel. Returns `false` if there was nothing to close.
    pub fn disconnect(&mut self) -> bool {
        match std::mem::replace(&mut self.state, ChannelState::Disconnected) {
            ChannelState::Disconnected => false,
            ChannelState::Connecting(link) | ChannelState::Connected(link) => {
                link.close();
                true
            }
        }
    }

    /// Wait for the next signal of the current link and apply it.
    ///
    /// Pending forever while disconnected. Cancel safe.
    pub async fn next_event(&mut self) -> ChannelEvent {
        let signal = match &mut self.state {
            ChannelState::Connecting(link) | ChannelState::Connected(link) => link.recv().await,
            ChannelState::Disconnected => std::future::pending().await,
        };
        self.apply(signal)
    }

    /// Single transition function for transport signals.
    pub fn apply(&mut self, signal: TransportSignal) -> ChannelEvent {
        match signal {
            TransportSignal::Opened => {
                self.state = match std::mem::replace(&mut self.state, ChannelState::Disconnected) {
                    ChannelState::Connecting(link) | ChannelState::Connected(link) => {
                        ChannelState::Connected(link)
                    }
                    ChannelState::Disconnected => ChannelState::Disconnected,
                };
                ChannelEvent::Opened
            }
            TransportSignal::Frame(text) => ChannelEvent::Frame(text),
            TransportSignal::Error(error) => {
                self.disconnect();
                ChannelEvent::Lost { error: Some(error) }
            }
            TransportSignal::Closed { reason } => {
                self.disconnect();
                let error = reason
                    .as_deref()
                    .and_then(DomainError::recognize)
                    .map(TransportError::Domain);
                ChannelEvent::Lost { error }
            }
        }
    }
}

impl Drop for ChannelConnection {
    fn drop(&mut self) {
        self.disconnect();
    }
}

#[cfg(all(test, feature = "memory"))]
mod tests {
    use serde_json::{Map, json};

    use super::*;
    use crate::memory::MemoryConnector;

    fn params(cursor: Option<i64>) -> OpenParams {
        OpenParams::new("conv-1", "token", cursor)
    }

    #[tokio::test]
    async fn test_connect_open_send() {
        let (connector, mut peers) = MemoryConnector::new();
        let mut conn = ChannelConnection::new(Arc::new(connector));

        conn.connect(params(None));
        assert_eq!(conn.status(), ConnectionStatus::Disconnected);
        assert!(matches!(
            conn.send(ClientMessage::user_action(Map::new())),
            Err(ChannelError::NotConnected)
        ));

        let mut peer = peers.recv().await.unwrap();
        peer.open();
        assert_eq!(conn.next_event().await, ChannelEvent::Opened);
        assert_eq!(conn.status(), ConnectionStatus::Connected);

        let mut data = Map::new();
        data.insert("action".into(), json!("message"));
        conn.send(ClientMessage::user_action(data.clone())).unwrap();
        assert_eq!(peer.recv().await, Some(ClientMessage::user_action(data)));
    }

    #[tokio::test]
    async fn test_reconnect_detaches_previous_link() {
        let (connector, mut peers) = MemoryConnector::new();
        let mut conn = ChannelConnection::new(Arc::new(connector));

        conn.connect(params(None));
        let first = peers.recv().await.unwrap();
        conn.connect(params(Some(5)));
        let second = peers.recv().await.unwrap();

        assert!(first.is_detached());
        assert!(!second.is_detached());
        assert_eq!(second.params().latest_event_id, 5);
    }

    #[tokio::test]
    async fn test_disconnect_idempotent() {
        let (connector, mut peers) = MemoryConnector::new();
        let mut conn = ChannelConnection::new(Arc::new(connector));
        conn.connect(params(None));
        let peer = peers.recv().await.unwrap();

        assert!(conn.disconnect());
        assert!(!conn.disconnect());
        assert!(peer.is_detached());
        assert_eq!(conn.status(), ConnectionStatus::Disconnected);
    }

    #[tokio::test]
    async fn test_error_and_domain_close() {
        let (connector, mut peers) = MemoryConnector::new();
        let mut conn = ChannelConnection::new(Arc::new(connector));

        conn.connect(params(None));
        let peer = peers.recv().await.unwrap();
        peer.fail(TransportError::Timeout);
        assert_eq!(
            conn.next_event().await,
            ChannelEvent::Lost {
                error: Some(TransportError::Timeout)
            }
        );
        assert!(!conn.is_active());

        conn.connect(params(None));
        let peer = peers.recv().await.unwrap();
        peer.close(Some("Conversation not found"));
        assert_eq!(
            conn.next_event().await,
            ChannelEvent::Lost {
                error: Some(TransportError::Domain(DomainError::ConversationNotFound))
            }
        );
    }
}
