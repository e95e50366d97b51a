//! Session configuration.

use std::time::Duration;

use convo_stream_core::{DEFAULT_RATE_THRESHOLD, SessionMode};
use convo_stream_transport::OpenParams;

/// Default pause between two replayed events.
pub const DEFAULT_REPLAY_INTERVAL: Duration = Duration::from_millis(1000);

/// Default delay before a viewer of an unavailable conversation is sent away.
pub const DEFAULT_REDIRECT_DELAY: Duration = Duration::from_millis(3000);

/// When and how fast to re-open a lost channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    /// Attempts per outage. Zero disables reconnection.
    pub max_attempts: u32,
    /// Delay before the first attempt; doubled for each further one.
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(10),
        }
    }
}

impl ReconnectPolicy {
    /// Never reconnect automatically.
    #[must_use]
    pub const fn disabled() -> Self {
        Self {
            max_attempts: 0,
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
        }
    }

    /// Delay before attempt number `attempt` (1-based), or `None` once the
    /// attempts are used up.
    #[must_use]
    pub fn delay_for(&self, attempt: u32) -> Option<Duration> {
        if attempt == 0 || attempt > self.max_attempts {
            return None;
        }
        let factor = 1u32 << (attempt - 1).min(16);
        Some(self.base_delay.saturating_mul(factor).min(self.max_delay))
    }
}

/// Everything needed to run one session.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub conversation_id: String,
    pub auth_token: String,
    pub mode: SessionMode,
    /// Connect as a viewer of a shared conversation.
    pub shared: bool,
    pub replay_interval: Duration,
    pub rate_threshold: Duration,
    pub redirect_delay: Duration,
    pub reconnect: ReconnectPolicy,
    /// Extra query parameters sent when the channel opens.
    pub extra_params: Vec<(String, String)>,
}

impl SessionConfig {
    /// Live session with default timings.
    #[must_use]
    pub fn new(conversation_id: impl Into<String>, auth_token: impl Into<String>) -> Self {
        Self {
            conversation_id: conversation_id.into(),
            auth_token: auth_token.into(),
            mode: SessionMode::Live,
            shared: false,
            replay_interval: DEFAULT_REPLAY_INTERVAL,
            rate_threshold: DEFAULT_RATE_THRESHOLD,
            redirect_delay: DEFAULT_REDIRECT_DELAY,
            reconnect: ReconnectPolicy::default(),
            extra_params: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_mode(mut self, mode: SessionMode) -> Self {
        self.mode = mode;
        self
    }

    #[must_use]
    pub fn shared(mut self, shared: bool) -> Self {
        self.shared = shared;
        self
    }

    #[must_use]
    pub fn with_replay_interval(mut self, interval: Duration) -> Self {
        self.replay_interval = interval;
        self
    }

    #[must_use]
    pub fn with_rate_threshold(mut self, threshold: Duration) -> Self {
        self.rate_threshold = threshold;
        self
    }

    #[must_use]
    pub fn with_redirect_delay(mut self, delay: Duration) -> Self {
        self.redirect_delay = delay;
        self
    }

    #[must_use]
    pub fn with_reconnect(mut self, policy: ReconnectPolicy) -> Self {
        self.reconnect = policy;
        self
    }

    #[must_use]
    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.extra_params.push((key.into(), value.into()));
        self
    }

    /// Open parameters resuming after `cursor`.
    #[must_use]
    pub fn open_params(&self, cursor: Option<i64>) -> OpenParams {
        let mut params = OpenParams::new(&self.conversation_id, &self.auth_token, cursor);
        if self.shared {
            params = params.shared();
        }
        for (key, value) in &self.extra_params {
            params = params.with_param(key, value);
        }
        params
    }
}
