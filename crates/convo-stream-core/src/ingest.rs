//! Gatekeeper between raw frames and the trusted event log.

use serde_json::Value;
use thiserror::Error;

use crate::{Event, FrameError, SessionMode};

/// Where a validated event goes next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    /// Append to the log and hand to the consumer now.
    Deliver,
    /// Push onto the replay queue.
    Enqueue,
}

/// Outcome of a successful ingest.
#[derive(Debug, Clone, PartialEq)]
pub struct Ingested {
    pub event: Event,
    pub route: Route,
}

/// Why a frame did not make it past ingestion.
#[derive(Debug, Error)]
pub enum IngestError {
    #[error("malformed frame: {0}")]
    Malformed(#[from] FrameError),
    #[error("duplicate event {0}")]
    Duplicate(i64),
}

/// Validates frames, drops re-deliveries and decides routing.
#[derive(Debug, Clone)]
pub struct IngestPipeline {
    mode: SessionMode,
    highest_seen: Option<i64>,
}

impl IngestPipeline {
    #[must_use]
    pub const fn new(mode: SessionMode) -> Self {
        Self {
            mode,
            highest_seen: None,
        }
    }

    /// Highest numeric id accepted so far.
    #[must_use]
    pub const fn highest_seen(&self) -> Option<i64> {
        self.highest_seen
    }

    /// Validate and route one raw frame.
    ///
    /// Numeric ids at or below the highest one already accepted are
    /// re-deliveries from a resumed channel and are rejected.
    ///
    /// # Errors
    /// Returns [`IngestError::Malformed`] for structurally invalid frames and
    /// [`IngestError::Duplicate`] for re-delivered ids.
    pub fn ingest(&mut self, raw: Value) -> Result<Ingested, IngestError> {
        let event = Event::from_frame(raw)?;

        if let Some(ordinal) = event.id().ordinal() {
            if self.highest_seen.is_some_and(|seen| ordinal <= seen) {
                return Err(IngestError::Duplicate(ordinal));
            }
            self.highest_seen = Some(ordinal);
        }

        let route = match self.mode {
            SessionMode::Live => Route::Deliver,
            SessionMode::Replay => Route::Enqueue,
        };

        Ok(Ingested { event, route })
    }
}
