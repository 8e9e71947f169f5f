use rand::Rng;
use std::fmt;
use std::time::Duration;

/// Connection lifecycle of a feed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
        };
        f.write_str(s)
    }
}

/// Exponential backoff: `base * factor^failures`, capped at `max_delay`.
#[derive(Debug, Clone, PartialEq)]
pub struct ReconnectPolicy {
    pub base_delay: Duration,
    pub factor: u32,
    pub max_delay: Duration,
    /// Upper bound of the random extra delay, as a fraction of the computed delay
    pub jitter: f64,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_secs(1),
            factor: 2,
            max_delay: Duration::from_secs(60),
            jitter: 0.1,
        }
    }
}

impl ReconnectPolicy {
    /// Deterministic delay after `failures` previous consecutive failures:
    /// 1s, 2s, 4s, ... up to 60s with the default policy.
    pub fn delay_for(&self, failures: u32) -> Duration {
        let multiplier = self.factor.checked_pow(failures).unwrap_or(u32::MAX);
        self.base_delay
            .checked_mul(multiplier)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }

    /// Adds a random non-negative extra of at most `jitter * delay`.
    pub fn with_jitter<R: Rng + ?Sized>(&self, delay: Duration, rng: &mut R) -> Duration {
        if self.jitter <= 0.0 {
            return delay;
        }
        let extra = delay.as_secs_f64() * self.jitter * rng.random_range(0.0..=1.0);
        delay + Duration::from_secs_f64(extra)
    }
}

/// Explicit reconnect state machine; owns nothing but counters, so it can be
/// driven in tests without sockets.
#[derive(Debug, Clone)]
pub struct ReconnectMachine {
    policy: ReconnectPolicy,
    state: ConnectionState,
    consecutive_failures: u32,
    total_reconnects: u64,
}

impl ReconnectMachine {
    pub fn new(policy: ReconnectPolicy) -> Self {
        Self {
            policy,
            state: ConnectionState::Disconnected,
            consecutive_failures: 0,
            total_reconnects: 0,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    pub fn total_reconnects(&self) -> u64 {
        self.total_reconnects
    }

    pub fn policy(&self) -> &ReconnectPolicy {
        &self.policy
    }

    pub fn on_connecting(&mut self) {
        self.state = ConnectionState::Connecting;
    }

    /// A successful connection resets the backoff.
    pub fn on_connected(&mut self) {
        self.state = ConnectionState::Connected;
        self.consecutive_failures = 0;
    }

    /// Records a failure or disconnect and returns how long to wait before
    /// the next attempt (without jitter).
    pub fn on_failure(&mut self) -> Duration {
        self.state = ConnectionState::Disconnected;
        let delay = self.policy.delay_for(self.consecutive_failures);
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        self.total_reconnects += 1;
        delay
    }
}
