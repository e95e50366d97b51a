//! Append-only event log with broadcast for live subscribers.

use futures::StreamExt;
use parking_lot::RwLock;
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;

use crate::Event;

/// Capacity of the live update channel.
const BROADCAST_CAPACITY: usize = 10_000;

/// Change published to log subscribers.
#[derive(Debug, Clone, PartialEq)]
pub enum LogUpdate {
    /// An event was appended.
    Appended(Event),
    /// The log was emptied (replay restart).
    Cleared,
}

#[derive(Default)]
struct Inner {
    events: Vec<Event>,
    last_delivered_id: Option<i64>,
}

/// Ordered log of delivered events.
///
/// Holds the externally visible event sequence and the resume cursor.
/// Subscribers get the history first, then live updates, without gaps.
pub struct EventLog {
    inner: RwLock<Inner>,
    sender: broadcast::Sender<LogUpdate>,
}

impl Default for EventLog {
    fn default() -> Self {
        Self::new()
    }
}

impl EventLog {
    /// Create an empty log.
    #[must_use]
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(BROADCAST_CAPACITY);
        Self {
            inner: RwLock::new(Inner::default()),
            sender,
        }
    }

    /// Append one delivered event and advance the cursor if its id is numeric.
    pub fn push(&self, event: Event) {
        let mut inner = self.inner.write();
        if let Some(ordinal) = event.id().ordinal() {
            inner.last_delivered_id = Some(ordinal);
        }
        let _ = self.sender.send(LogUpdate::Appended(event.clone()));
        inner.events.push(event);
    }

    /// Append a batch atomically.
    ///
    /// Only the last event of the batch moves the cursor, and only when its
    /// id is numeric.
    pub fn push_batch(&self, events: Vec<Event>) {
        let mut inner = self.inner.write();
        if let Some(ordinal) = events.last().and_then(|e| e.id().ordinal()) {
            inner.last_delivered_id = Some(ordinal);
        }
        for event in events {
            let _ = self.sender.send(LogUpdate::Appended(event.clone()));
            inner.events.push(event);
        }
    }

    /// Remove and return every event. The cursor is left untouched.
    pub fn take_all(&self) -> Vec<Event> {
        let mut inner = self.inner.write();
        let _ = self.sender.send(LogUpdate::Cleared);
        std::mem::take(&mut inner.events)
    }

    /// Snapshot of the current events.
    #[must_use]
    pub fn snapshot(&self) -> Vec<Event> {
        self.inner.read().events.clone()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.read().events.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.read().events.is_empty()
    }

    /// Last numeric id handed to consumers.
    #[must_use]
    pub fn last_delivered_id(&self) -> Option<i64> {
        self.inner.read().last_delivered_id
    }

    /// Stream that yields the current history, then live updates.
    #[must_use]
    pub fn history_plus_stream(&self) -> futures::stream::BoxStream<'static, LogUpdate> {
        // Subscribe under the read lock so no append falls between the two.
        let (history, rx) = {
            let inner = self.inner.read();
            (inner.events.clone(), self.sender.subscribe())
        };

        let hist = futures::stream::iter(history.into_iter().map(LogUpdate::Appended));
        let live = BroadcastStream::new(rx).filter_map(|res| async move {
            match res {
                Ok(update) => Some(update),
                Err(e) => {
                    tracing::warn!("event log subscriber lagged: {e}");
                    None
                }
            }
        });

        Box::pin(hist.chain(live))
    }
}
