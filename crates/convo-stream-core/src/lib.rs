//! Core building blocks for a client-side conversation stream.
//!
//! This crate provides:
//! - `Event` - Validated, immutable conversation event
//! - `IngestPipeline` - Frame validation, de-duplication and routing
//! - `EventLog` - Ordered history + broadcast for subscribers
//! - `RateMonitor` - Burst detection for the initial catch-up
//! - `EventHandler` - Consumer callback trait

pub mod event;
pub mod event_log;
pub mod ingest;
pub mod rate;
pub mod traits;

pub use event::{Event, EventId, EventSource, FrameError};
pub use event_log::{EventLog, LogUpdate};
pub use ingest::{IngestError, IngestPipeline, Ingested, Route};
pub use rate::{DEFAULT_RATE_THRESHOLD, RateMonitor};
pub use traits::{
    ConnectionStatus, EventHandler, HandlerError, NoopHandler, ReplayState, SessionMode,
};
