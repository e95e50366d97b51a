//! Paced delivery of recorded events.

use std::{collections::VecDeque, pin::Pin, time::Duration};

use convo_stream_core::{Event, ReplayState};
use tokio::time::{Instant, Sleep};
use tokio_util::sync::CancellationToken;

/// Scheduler lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    /// Nothing queued yet.
    Idle,
    /// Delivering one event per interval.
    Running,
    /// Queue exhausted; the replay is complete.
    Drained,
}

/// Owns the replay queue and the timer pacing it.
///
/// The scheduler never delivers by itself: the session driver awaits
/// [`ReplayScheduler::wait_step`] and then calls [`ReplayScheduler::step`],
/// which hands back the event to deliver.
pub struct ReplayScheduler {
    state: SchedulerState,
    queue: VecDeque<Event>,
    interval: Duration,
    next_step: Option<Pin<Box<Sleep>>>,
    cancel: CancellationToken,
}

impl ReplayScheduler {
    #[must_use]
    pub fn new(interval: Duration, cancel: CancellationToken) -> Self {
        Self {
            state: SchedulerState::Idle,
            queue: VecDeque::new(),
            interval,
            next_step: None,
            cancel,
        }
    }

    #[must_use]
    pub const fn state(&self) -> SchedulerState {
        self.state
    }

    #[must_use]
    pub const fn replay_state(&self) -> ReplayState {
        match self.state {
            SchedulerState::Drained => ReplayState::Completed,
            SchedulerState::Idle | SchedulerState::Running => ReplayState::InProgress,
        }
    }

    /// Number of events waiting for delivery.
    #[must_use]
    pub fn queued(&self) -> usize {
        self.queue.len()
    }

    /// Queue an event, starting delivery if the scheduler was at rest.
    pub fn enqueue(&mut self, event: Event) {
        self.queue.push_back(event);
        self.transition(SchedulerState::Running);
    }

    /// Resolves when the next delivery is due. Pending while not running.
    pub async fn wait_step(&mut self) {
        match self.next_step.as_mut() {
            Some(sleep) => sleep.as_mut().await,
            None => std::future::pending().await,
        }
    }

    /// Pop the event due now.
    ///
    /// Returns `None` without touching the queue once cancelled.
    pub fn step(&mut self) -> Option<Event> {
        self.next_step = None;
        if self.cancel.is_cancelled() || self.state != SchedulerState::Running {
            return None;
        }
        let event = self.queue.pop_front();
        if self.queue.is_empty() {
            self.transition(SchedulerState::Drained);
        } else {
            self.next_step = Some(Box::pin(tokio::time::sleep(self.interval)));
        }
        event
    }

    /// Take everything still queued, bypassing the pacing.
    ///
    /// Empty when nothing is queued, in which case the state is unchanged.
    pub fn skip_to_end(&mut self) -> Vec<Event> {
        if self.queue.is_empty() {
            return Vec::new();
        }
        let batch = self.queue.drain(..).collect();
        self.transition(SchedulerState::Drained);
        batch
    }

    /// Replay `history` from the start, ahead of anything still queued.
    pub fn restart(&mut self, history: Vec<Event>) {
        let pending = std::mem::take(&mut self.queue);
        self.queue = history.into_iter().chain(pending).collect();
        self.state = SchedulerState::Idle;
        self.transition(SchedulerState::Running);
    }

    /// Stop for good. Later steps are no-ops even if a timer fires.
    pub fn cancel(&mut self) {
        self.cancel.cancel();
        self.next_step = None;
    }

    fn transition(&mut self, to: SchedulerState) {
        match (self.state, to) {
            (SchedulerState::Idle | SchedulerState::Drained, SchedulerState::Running) => {
                if self.queue.is_empty() || self.cancel.is_cancelled() {
                    return;
                }
                self.state = SchedulerState::Running;
                self.next_step = Some(Box::pin(tokio::time::sleep_until(Instant::now())));
            }
            (_, SchedulerState::Drained) => {
                self.state = SchedulerState::Drained;
                self.next_step = None;
            }
            _ => {}
        }
    }
}
