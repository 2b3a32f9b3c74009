//! Time source used for deadlines and latency samples.
//!
//! Everything that reads "now" goes through [`Clock`], so tests can run the adaptive
//! timeout state machine and the latency decay against a controlled clock.

use tokio::time::Instant;

pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
}

/// Monotonic clock driven by the tokio time driver.
///
/// Inside a runtime started with a paused clock this follows the paused time.
#[derive(Debug, Default, Clone, Copy)]
pub struct TokioClock;

impl Clock for TokioClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}
