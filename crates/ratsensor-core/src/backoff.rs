//! Reconnect backoff for the broker connection.
//!
//! [`RetryPolicy`] is the immutable configuration; [`RetryState`] is the
//! evolving `{current_delay, last_attempt}` pair owned by whoever drives the
//! connection attempts. The state is a plain value so it can be copied out as
//! a consistent snapshot.
//!
//! ```
//! use std::time::Duration;
//! use ratsensor_core::{RetryPolicy, RetryState};
//! use tokio::time::Instant;
//!
//! let policy = RetryPolicy::new()
//!     .initial_delay(Duration::from_secs(1))
//!     .backoff_factor(2.0)
//!     .max_jitter(Duration::ZERO);
//! let mut state = RetryState::new(&policy);
//!
//! let now = Instant::now();
//! for _ in 0..3 {
//!     state.record_failure(&policy, now, Duration::ZERO);
//! }
//! assert_eq!(state.current_delay, Duration::from_secs(4));
//! ```

use std::time::Duration;

use rand::Rng;
use tokio::time::Instant;

use crate::error::{Error, Result};

/// Backoff parameters for reconnect attempts.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Delay before the first retry and after every successful connect.
    pub initial_delay: Duration,
    /// Upper bound for the un-jittered delay.
    pub max_delay: Duration,
    /// Multiplier applied per consecutive failure.
    pub backoff_factor: f64,
    /// Jitter is drawn uniformly from `[0, max_jitter)`.
    pub max_jitter: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(15),
            max_delay: Duration::from_secs(300),
            backoff_factor: 2.0,
            max_jitter: Duration::from_secs(5),
        }
    }
}

impl RetryPolicy {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    #[must_use]
    pub fn max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    #[must_use]
    pub fn backoff_factor(mut self, factor: f64) -> Self {
        self.backoff_factor = factor;
        self
    }

    #[must_use]
    pub fn max_jitter(mut self, jitter: Duration) -> Self {
        self.max_jitter = jitter;
        self
    }

    /// Checks that:
    /// - `backoff_factor` is a finite value >= 1.0
    /// - `initial_delay` is > 0
    /// - `max_delay` >= `initial_delay`
    pub fn validate(&self) -> Result<()> {
        if !self.backoff_factor.is_finite() || self.backoff_factor < 1.0 {
            return Err(Error::InvalidConfig(
                "backoff_factor must be >= 1.0".to_string(),
            ));
        }
        if self.initial_delay.is_zero() {
            return Err(Error::InvalidConfig(
                "initial_delay must be > 0".to_string(),
            ));
        }
        if self.max_delay < self.initial_delay {
            return Err(Error::InvalidConfig(
                "max_delay must be >= initial_delay".to_string(),
            ));
        }
        Ok(())
    }

    /// Draw a jitter value in `[0, max_jitter)`.
    pub fn sample_jitter(&self) -> Duration {
        let max_ms = self.max_jitter.as_millis() as u64;
        if max_ms == 0 {
            return Duration::ZERO;
        }
        Duration::from_millis(rand::rng().random_range(0..max_ms))
    }

    /// The un-jittered delay after `failures` consecutive failures.
    ///
    /// Zero failures and one failure both give `initial_delay`; every further
    /// failure multiplies by `backoff_factor`, capped at `max_delay`.
    pub fn delay_after_failures(&self, failures: u32) -> Duration {
        let exponent = failures.saturating_sub(1).min(i32::MAX as u32) as i32;
        let secs = self.initial_delay.as_secs_f64() * self.backoff_factor.powi(exponent);
        Duration::try_from_secs_f64(secs)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }
}

/// Reconnect bookkeeping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryState {
    /// Base delay before the next attempt, without jitter.
    pub current_delay: Duration,
    /// Jitter sampled at the last failure.
    pub jitter: Duration,
    /// Start of the most recent connect attempt.
    pub last_attempt: Option<Instant>,
    /// Failed attempts since the last success.
    pub consecutive_failures: u32,
}

impl RetryState {
    pub fn new(policy: &RetryPolicy) -> Self {
        Self {
            current_delay: policy.initial_delay,
            jitter: Duration::ZERO,
            last_attempt: None,
            consecutive_failures: 0,
        }
    }

    /// Record a failed attempt that started at `attempted_at`.
    pub fn record_failure(&mut self, policy: &RetryPolicy, attempted_at: Instant, jitter: Duration) {
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        if self.consecutive_failures > 1 {
            let grown = Duration::try_from_secs_f64(
                self.current_delay.as_secs_f64() * policy.backoff_factor,
            )
            .unwrap_or(policy.max_delay);
            self.current_delay = grown.min(policy.max_delay).max(self.current_delay);
        }
        self.jitter = jitter;
        self.last_attempt = Some(attempted_at);
    }

    /// Record a successful connect.
    pub fn record_success(&mut self, policy: &RetryPolicy, connected_at: Instant) {
        self.current_delay = policy.initial_delay;
        self.jitter = Duration::ZERO;
        self.consecutive_failures = 0;
        self.last_attempt = Some(connected_at);
    }

    /// Total wait between the last attempt and the next one.
    pub fn effective_delay(&self) -> Duration {
        self.current_delay + self.jitter
    }

    /// When the next attempt may start; `None` before the first attempt.
    ///
    /// A session that drops shortly after a successful connect still waits
    /// out `initial_delay` from that connect, so a flapping broker cannot
    /// drive a reconnect loop.
    pub fn next_attempt_at(&self) -> Option<Instant> {
        self.last_attempt.map(|t| t + self.effective_delay())
    }

    /// Whether an attempt may start at `now`.
    pub fn is_due(&self, now: Instant) -> bool {
        self.next_attempt_at().is_none_or(|at| now >= at)
    }

    /// Time left until the next attempt is due (zero if already due).
    pub fn remaining(&self, now: Instant) -> Duration {
        self.next_attempt_at()
            .map(|at| at.saturating_duration_since(now))
            .unwrap_or(Duration::ZERO)
    }
}
