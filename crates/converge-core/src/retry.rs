//! Bounded exponential backoff
//!
//! Retry is explicit state (attempt counter + optional deadline) rather than
//! nested error handlers, so the schedule is testable without timing.

use std::time::{Duration, Instant};

/// Retry schedule for one operation
#[derive(Debug, Clone)]
pub struct Backoff {
    attempt: u32,
    max_attempts: u32,
    base: Duration,
    cap: Duration,
    deadline: Option<Instant>,
}

impl Backoff {
    /// Backoff doubling from `base` up to `cap`, for at most `max_attempts`
    /// retries
    pub fn new(max_attempts: u32, base: Duration, cap: Duration) -> Self {
        Self {
            attempt: 0,
            max_attempts,
            base,
            cap,
            deadline: None,
        }
    }

    /// Default schedule for transient apply failures: 5 retries from 200ms
    pub fn for_apply() -> Self {
        Self::new(5, Duration::from_millis(200), Duration::from_secs(5))
    }

    /// Stop retrying past an absolute deadline
    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    /// Retries consumed so far
    pub fn attempts(&self) -> u32 {
        self.attempt
    }

    /// Next delay, or None when the schedule is exhausted
    pub fn next_delay(&mut self) -> Option<Duration> {
        if self.attempt >= self.max_attempts {
            return None;
        }
        if let Some(deadline) = self.deadline
            && Instant::now() >= deadline
        {
            return None;
        }

        let factor = 1u32 << self.attempt.min(16);
        let delay = self.base.saturating_mul(factor).min(self.cap);
        self.attempt += 1;
        Some(delay)
    }

    /// Reset the counter (e.g. after a different failure class)
    pub fn reset(&mut self) {
        self.attempt = 0;
    }
}
