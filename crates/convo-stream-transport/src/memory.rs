//! In-memory connector.
//!
//! Useful for tests and offline demos. Every `open` hands the remote end of
//! the new channel to whoever holds the peer receiver.

use serde_json::Value;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::{
    channel::{ChannelLink, Connector, TransportError, TransportSignal},
    protocol::{ClientMessage, OpenParams},
};

/// Connector whose channels terminate in [`MemoryPeer`]s.
pub struct MemoryConnector {
    peers: mpsc::UnboundedSender<MemoryPeer>,
}

impl MemoryConnector {
    /// Create a connector and the receiver of its peers.
    #[must_use]
    pub fn new() -> (Self, mpsc::UnboundedReceiver<MemoryPeer>) {
        let (peers, rx) = mpsc::unbounded_channel();
        (Self { peers }, rx)
    }
}

impl Connector for MemoryConnector {
    fn open(&self, params: &OpenParams) -> ChannelLink {
        let (out_tx, out_rx) = mpsc::unbounded_channel();
        let (in_tx, in_rx) = mpsc::unbounded_channel();
        let shutdown = CancellationToken::new();

        let peer = MemoryPeer {
            params: params.clone(),
            to_client: in_tx,
            from_client: out_rx,
            shutdown: shutdown.clone(),
        };
        if self.peers.send(peer).is_err() {
            tracing::debug!("memory peer receiver dropped");
        }

        ChannelLink::new(out_tx, in_rx, shutdown)
    }
}

/// Remote end of an in-memory channel.
pub struct MemoryPeer {
    params: OpenParams,
    to_client: mpsc::UnboundedSender<TransportSignal>,
    from_client: mpsc::UnboundedReceiver<ClientMessage>,
    shutdown: CancellationToken,
}

impl MemoryPeer {
    /// Parameters the client opened this channel with.
    #[must_use]
    pub const fn params(&self) -> &OpenParams {
        &self.params
    }

    /// Complete the handshake.
    pub fn open(&self) {
        self.signal(TransportSignal::Opened);
    }

    /// Send a JSON frame.
    pub fn send(&self, frame: &Value) {
        self.send_text(frame.to_string());
    }

    /// Send a raw text frame.
    pub fn send_text(&self, text: impl Into<String>) {
        self.signal(TransportSignal::Frame(text.into()));
    }

    /// Fail the transport.
    pub fn fail(&self, error: TransportError) {
        self.signal(TransportSignal::Error(error));
    }

    /// Close from the remote side.
    pub fn close(&self, reason: Option<&str>) {
        self.signal(TransportSignal::Closed {
            reason: reason.map(str::to_string),
        });
    }

    /// Next message sent by the client.
    pub async fn recv(&mut self) -> Option<ClientMessage> {
        self.from_client.recv().await
    }

    /// Non-blocking variant of [`MemoryPeer::recv`].
    pub fn try_recv(&mut self) -> Option<ClientMessage> {
        self.from_client.try_recv().ok()
    }

    /// Whether the client closed this channel and stopped listening.
    #[must_use]
    pub fn is_detached(&self) -> bool {
        self.shutdown.is_cancelled() && self.to_client.is_closed()
    }

    fn signal(&self, signal: TransportSignal) {
        if self.to_client.send(signal).is_err() {
            tracing::debug!("memory channel detached, signal dropped");
        }
    }
}
