//! Adaptive wait for stragglers.
//!
//! Until enough nodes (`min_search_coverage` percent) have answered, the coordinator waits
//! for the full query timeout. After that it only waits a window derived from the time
//! that was left when coverage was reached: `min` factor of it when few nodes are still
//! pending, growing towards the `max` factor the more nodes are still out. The effective
//! deadline only ever moves earlier.

use std::time::Duration;
use tokio::time::Instant;

use crate::config::DispatchConfig;

#[derive(Debug, Clone)]
pub struct AdaptiveTimeout {
    min_search_coverage: f64,
    min_wait_factor: f64,
    max_wait_factor: f64,
    query_deadline: Instant,
    deadline: Instant,
    window: Option<(Duration, Duration)>,
}

impl AdaptiveTimeout {
    pub fn new(config: &DispatchConfig, query_deadline: Instant) -> Self {
        Self {
            min_search_coverage: config.min_search_coverage,
            min_wait_factor: config.min_wait_after_coverage_factor,
            max_wait_factor: config.max_wait_after_coverage_factor,
            query_deadline,
            deadline: query_deadline,
            window: None,
        }
    }

    /// Whether the adaptive window has been entered.
    pub fn is_adaptive(&self) -> bool {
        self.window.is_some()
    }

    pub fn deadline(&self) -> Instant {
        self.deadline
    }

    /// How long to wait for the next answer, `None` once there is no time left.
    pub fn next_timeout(&mut self, now: Instant, asked: u32, answered: u32) -> Option<Duration> {
        let time_left = self.query_deadline.checked_duration_since(now)?;
        if asked == answered || self.min_search_coverage >= 100.0 {
            return Some(time_left);
        }
        let minimum_responses = (f64::from(asked) * self.min_search_coverage / 100.0).ceil() as u32;
        if answered < minimum_responses {
            return Some(time_left);
        }

        let (min_factor, max_factor) = (self.min_wait_factor, self.max_wait_factor);
        let (min_wait, max_wait) = *self
            .window
            .get_or_insert_with(|| (time_left.mul_f64(min_factor), time_left.mul_f64(max_factor)));

        let pending = asked.saturating_sub(answered);
        let miss_width = (100.0 - self.min_search_coverage) * f64::from(asked) / 100.0 - 1.0;
        let mut wait = min_wait;
        if pending > 1 && miss_width > 0.0 {
            let slope = f64::from(pending - 1) / miss_width;
            wait += max_wait.saturating_sub(min_wait).mul_f64(slope);
        }

        if now + wait >= self.deadline {
            return self.deadline.checked_duration_since(now);
        }
        self.deadline = now + wait;
        Some(wait)
    }
}
