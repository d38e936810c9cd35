use std::time::Duration;

use rand::Rng;

use crate::config::ReconnectionPolicy;

/// Reconnection delay schedule for one session.
#[derive(Debug, Clone)]
pub struct Backoff {
    policy: ReconnectionPolicy,
    attempt: u32,
}

impl Backoff {
    pub fn new(policy: ReconnectionPolicy) -> Self {
        Self { policy, attempt: 0 }
    }

    /// Delay before the next attempt, or `None` once `max_retries`
    /// consecutive attempts have failed.
    pub fn next_delay(&mut self) -> Option<Duration> {
        if self.policy.max_retries != 0 && self.attempt >= self.policy.max_retries {
            return None;
        }
        let base = self.base_delay_ms();
        let jitter = if self.policy.jitter_ms > 0 {
            rand::thread_rng().gen_range(0..=u64::from(self.policy.jitter_ms))
        } else {
            0
        };
        self.attempt += 1;
        Some(Duration::from_millis(base + jitter))
    }

    /// `min(initial * 2^attempt, max)`, without jitter.
    fn base_delay_ms(&self) -> u64 {
        let factor = 1u64 << self.attempt.min(32);
        u64::from(self.policy.initial_delay_ms)
            .saturating_mul(factor)
            .min(u64::from(self.policy.max_delay_ms))
    }

    /// Called once a connection proved stable.
    pub fn reset(&mut self) {
        self.attempt = 0;
    }

    /// Consecutive failed attempts so far.
    pub fn attempt(&self) -> u32 {
        self.attempt
    }
}
