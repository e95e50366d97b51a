//! Transport layer for the conversation channel.
//!
//! Provides:
//! - Wire protocol (open parameters, client messages, server frames)
//! - `Connector` abstraction and the `ChannelConnection` state machine
//! - WebSocket connector (feature: websocket)
//! - In-memory connector for tests and demos (feature: memory)

pub mod channel;
pub mod connection;
pub mod protocol;

#[cfg(feature = "memory")]
pub mod memory;

#[cfg(feature = "websocket")]
pub mod websocket;

pub use channel::{ChannelLink, Connector, ErrorClass, TransportError, TransportSignal};
pub use connection::{ChannelConnection, ChannelError, ChannelEvent};
pub use protocol::{ClientMessage, DomainError, NO_CURSOR, OpenParams, ServerFrame, StatusNotice};

#[cfg(feature = "memory")]
pub use memory::{MemoryConnector, MemoryPeer};

#[cfg(feature = "websocket")]
pub use websocket::WebSocketConnector;
