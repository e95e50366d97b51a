//! Conversation stream sessions.
//!
//! Provides:
//! - `Session` - One conversation stream, live or replayed
//! - `SessionManager` - Keeps a single session per conversation and token
//! - `ReplayScheduler` - Paced delivery of recorded events

pub mod config;
pub mod error;
pub mod manager;
pub mod replay;
pub mod session;

pub use config::{
    DEFAULT_REDIRECT_DELAY, DEFAULT_REPLAY_INTERVAL, ReconnectPolicy, SessionConfig,
};
pub use error::{Notice, SessionError};
pub use manager::SessionManager;
pub use replay::{ReplayScheduler, SchedulerState};
pub use session::{Session, SessionState};
