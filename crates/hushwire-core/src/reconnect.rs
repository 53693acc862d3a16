//! Reconnection backoff policy.
//!
//! Pure bookkeeping for the exponential schedule; the transport layer owns
//! the actual timers and sockets.

use std::time::Duration;

use thiserror::Error;

/// Consecutive failures allowed before reconnection gives up.
pub const MAX_RECONNECT_ATTEMPTS: u32 = 5;

/// Default delay before the first retry.
pub const DEFAULT_BASE_DELAY: Duration = Duration::from_secs(1);

/// Reconnection gave up; only an explicit retry request re-arms it.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("reconnect attempts exhausted after {attempts} failures")]
pub struct ReconnectExhausted {
    /// Consecutive failures when giving up.
    pub attempts: u32,
}

/// Exponential backoff schedule for one channel.
///
/// Delays grow as `base * 2^attempt`: with the default base, 1s, 2s, 4s,
/// 8s, 16s, then [`ReconnectExhausted`].
#[derive(Debug, Clone)]
pub struct ReconnectPolicy {
    base: Duration,
    attempt: u32,
}

impl ReconnectPolicy {
    /// Policy with the default base delay.
    pub fn new() -> Self {
        Self::with_base(DEFAULT_BASE_DELAY)
    }

    /// Policy with a custom base delay (tests use milliseconds).
    pub fn with_base(base: Duration) -> Self {
        Self { base, attempt: 0 }
    }

    /// Consecutive failures recorded so far.
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Delay to wait before the next attempt, doubling per failure.
    ///
    /// # Errors
    /// Returns [`ReconnectExhausted`] once [`MAX_RECONNECT_ATTEMPTS`] have
    /// been consumed; the caller must park until an explicit retry.
    pub fn next_delay(&mut self) -> Result<Duration, ReconnectExhausted> {
        if self.attempt >= MAX_RECONNECT_ATTEMPTS {
            return Err(ReconnectExhausted { attempts: self.attempt });
        }
        let delay = self.base * 2u32.pow(self.attempt);
        self.attempt += 1;
        Ok(delay)
    }

    /// Forget past failures after a successful connection or manual retry.
    pub fn reset(&mut self) {
        self.attempt = 0;
    }
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self::new()
    }
}
