// src/pipeline/backoff.rs

//! Exponential backoff schedule for provider failures.
//!
//! The first retry waits one minute. Retry *n* then waits
//! `30 * factor * n + 1` minutes, where `factor` is drawn once per schedule
//! from `[1, 2)`, capped at eight hours. The update loop keeps retrying at
//! the cap; the full-hash retry task abandons once the uncapped schedule
//! passes it.

use std::time::Duration;

use rand::Rng;

/// Ceiling on a single wait, in minutes.
const BACKOFF_CAP_MINS: f64 = 480.0;

/// Backoff state for one sequence of retries.
#[derive(Debug, Clone)]
pub struct Backoff {
    factor: f64,
    attempt: u32,
}

impl Backoff {
    pub fn new() -> Self {
        Self::with_factor(rand::thread_rng().gen_range(1.0..2.0))
    }

    /// Fixed random factor, for tests and for sharing a draw across retries.
    pub fn with_factor(factor: f64) -> Self {
        Self { factor, attempt: 0 }
    }

    /// Wait before the next retry, advancing the schedule.
    pub fn next_delay(&mut self) -> Duration {
        let mins = self.current_mins().min(BACKOFF_CAP_MINS);
        self.attempt += 1;
        Duration::from_secs((mins * 60.0) as u64)
    }

    /// True once the uncapped wait exceeds the cap. Callers that abandon
    /// rather than retry forever check this before sleeping.
    pub fn exhausted(&self) -> bool {
        self.current_mins() > BACKOFF_CAP_MINS
    }

    /// Start over after a success.
    pub fn reset(&mut self) {
        self.attempt = 0;
    }

    fn current_mins(&self) -> f64 {
        30.0 * self.factor * f64::from(self.attempt) + 1.0
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new()
    }
}
