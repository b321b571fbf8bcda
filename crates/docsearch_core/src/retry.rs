use std::time::Duration;

use crate::FailureKind;

const RETRYABLE_STATUSES: [u16; 4] = [500, 502, 503, 504];

/// Bounded exponential backoff: attempt `i` waits `base_delay * 2^i`, capped at `max_delay`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first try; `3` means at most four calls.
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(1000),
            max_delay: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    RetryAfter(Duration),
    GiveUp,
}

impl RetryPolicy {
    /// A policy that never retries.
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    pub fn is_retryable(kind: &FailureKind) -> bool {
        match kind {
            FailureKind::Timeout | FailureKind::Transport => true,
            FailureKind::HttpStatus(code) => RETRYABLE_STATUSES.contains(code),
            _ => false,
        }
    }

    /// Backoff before retrying after failed attempt `attempt` (0-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 2u32.checked_pow(attempt).unwrap_or(u32::MAX);
        self.base_delay
            .checked_mul(factor)
            .map_or(self.max_delay, |delay| delay.min(self.max_delay))
    }

    /// Decides what to do after attempt `attempt` (0-based) failed with `kind`.
    pub fn decide(&self, kind: &FailureKind, attempt: u32) -> RetryDecision {
        if !Self::is_retryable(kind) || attempt >= self.max_retries {
            return RetryDecision::GiveUp;
        }
        RetryDecision::RetryAfter(self.delay_for(attempt))
    }
}
