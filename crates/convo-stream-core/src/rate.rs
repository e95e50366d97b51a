//! Arrival-rate monitor for the initial message burst.

use std::{collections::VecDeque, time::Duration};

use tokio::time::Instant;

/// Default gap under which arrivals count as a burst.
pub const DEFAULT_RATE_THRESHOLD: Duration = Duration::from_millis(250);

/// Tracks recent message arrivals.
///
/// While messages keep arriving within `threshold` of each other (and the
/// last one arrived within `threshold` of now) the client is still catching
/// up on history.
#[derive(Debug, Clone)]
pub struct RateMonitor {
    threshold: Duration,
    arrivals: VecDeque<Instant>,
}

impl Default for RateMonitor {
    fn default() -> Self {
        Self::new(DEFAULT_RATE_THRESHOLD)
    }
}

impl RateMonitor {
    #[must_use]
    pub fn new(threshold: Duration) -> Self {
        Self {
            threshold,
            arrivals: VecDeque::with_capacity(8),
        }
    }

    /// Record an arrival.
    pub fn record(&mut self, at: Instant) {
        self.arrivals.push_back(at);
        // The last two arrivals are always kept so the latest gap is known.
        while self.arrivals.len() > 2
            && self
                .arrivals
                .front()
                .is_some_and(|front| at.saturating_duration_since(*front) > self.threshold)
        {
            self.arrivals.pop_front();
        }
    }

    /// Gap between the two most recent arrivals.
    #[must_use]
    pub fn last_gap(&self) -> Option<Duration> {
        let mut recent = self.arrivals.iter().rev();
        let last = recent.next()?;
        let prev = recent.next()?;
        Some(last.saturating_duration_since(*prev))
    }

    #[must_use]
    pub fn last_arrival(&self) -> Option<Instant> {
        self.arrivals.back().copied()
    }

    /// Whether arrivals are still dense enough to count as a burst at `now`.
    ///
    /// No arrivals at all is not a burst.
    #[must_use]
    pub fn is_under_threshold(&self, now: Instant) -> bool {
        let Some(last) = self.last_arrival() else {
            return false;
        };
        if now.saturating_duration_since(last) > self.threshold {
            return false;
        }
        self.last_gap().is_none_or(|gap| gap <= self.threshold)
    }
}
