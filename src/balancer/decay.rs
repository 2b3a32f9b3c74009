use std::time::Duration;
use tokio::time::Instant;

/// Samples below this are treated as this.
pub const MIN_LATENCY: Duration = Duration::from_micros(1);
pub const INITIAL_QUERY_TIME: Duration = Duration::from_millis(1);
/// Number of requests the request-decayed average spans once warmed up.
pub const DECAY_WINDOW: f64 = 43.0;
pub const DEFAULT_HALF_LIFE: Duration = Duration::from_secs(1);

/// Running average of a group's search latency, in seconds.
#[derive(Debug, Clone)]
pub enum LatencyDecay {
    /// Every sample weighs at least `1 / DECAY_WINDOW`.
    ByRequests { samples: u64, average: f64 },
    /// Older samples lose half their weight every `half_life`.
    ByTime {
        average: f64,
        last_update: Option<Instant>,
        half_life: Duration,
    },
}

impl LatencyDecay {
    pub fn by_requests() -> Self {
        Self::ByRequests {
            samples: 0,
            average: INITIAL_QUERY_TIME.as_secs_f64(),
        }
    }

    pub fn by_time(half_life: Duration) -> Self {
        Self::ByTime {
            average: INITIAL_QUERY_TIME.as_secs_f64(),
            last_update: None,
            half_life,
        }
    }

    pub fn average_search_time(&self) -> f64 {
        match self {
            Self::ByRequests { average, .. } | Self::ByTime { average, .. } => *average,
        }
    }

    pub fn record(&mut self, elapsed: Duration, now: Instant) {
        let sample = elapsed.max(MIN_LATENCY).as_secs_f64();
        match self {
            Self::ByRequests { samples, average } => {
                let rate = ((*samples + 1) as f64).min(DECAY_WINDOW);
                *samples += 1;
                *average = (sample + (rate - 1.0) * *average) / rate;
            }
            Self::ByTime {
                average,
                last_update,
                half_life,
            } => {
                let keep = match last_update {
                    None => 0.0,
                    Some(previous) => {
                        let age = now.saturating_duration_since(*previous).as_secs_f64();
                        0.5f64
                            .powf(age / half_life.as_secs_f64().max(f64::MIN_POSITIVE))
                            .min(1.0 - 1.0 / DECAY_WINDOW)
                    }
                };
                *average = keep * *average + (1.0 - keep) * sample;
                *last_update = Some(now);
            }
        }
    }
}
