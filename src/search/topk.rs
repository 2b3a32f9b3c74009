//! Per-node hit count estimation.
//!
//! When a query wants the global top `k` hits from `n` nodes whose documents are spread
//! evenly, asking every node for `k` hits is wasteful: each node only holds about `k/n`
//! of the global top `k`. The number of global top hits on one node is binomial with
//! mean `k/n` and variance `k·(1/n)·(1−1/n)`; we approximate it with a Student-t
//! distribution and ask each node for enough hits that the global top `k` survives
//! per-node truncation with the requested probability.

use statrs::distribution::{ContinuousCDF, StudentsT};
use std::sync::OnceLock;

/// Degrees of freedom of the Student-t approximation.
pub const DEFAULT_DEGREES_OF_FREEDOM: f64 = 30.0;

/// Quantiles for the default probability are cached for node counts below this.
const MAX_CACHED_PARTITIONS: usize = 1000;

pub struct TopKEstimator {
    /// `None` for unusable degrees of freedom, which disables estimation.
    distribution: Option<StudentsT>,
    default_probability: f64,
    default_quantiles: Vec<OnceLock<f64>>,
}

impl TopKEstimator {
    pub fn new(degrees_of_freedom: f64, default_probability: f64) -> Self {
        let distribution = StudentsT::new(0.0, 1.0, degrees_of_freedom).ok();
        if distribution.is_none() {
            tracing::warn!(
                "Top-K estimation disabled: {} degrees of freedom",
                degrees_of_freedom
            );
        }
        Self {
            distribution,
            default_probability,
            default_quantiles: (0..MAX_CACHED_PARTITIONS).map(|_| OnceLock::new()).collect(),
        }
    }

    pub fn default_probability(&self) -> f64 {
        self.default_probability
    }

    pub fn estimate_exact_k(&self, k: u32, n: u32) -> f64 {
        self.estimate_exact_k_with(k, n, self.default_probability)
    }

    /// Expected hits needed from each of `n` nodes, before rounding.
    ///
    /// A probability outside `(0, 1)` disables estimation and yields `k`.
    pub fn estimate_exact_k_with(&self, k: u32, n: u32, probability: f64) -> f64 {
        let Some(distribution) = &self.distribution else {
            return f64::from(k);
        };
        if n <= 1 || !(probability > 0.0 && probability < 1.0) {
            return f64::from(k);
        }
        let k = f64::from(k);
        let share = 1.0 / f64::from(n);
        k * share + self.quantile(distribution, n, probability) * (k * share * (1.0 - share)).sqrt()
    }

    pub fn estimate_k(&self, k: u32, n: u32) -> u32 {
        self.estimate_k_with(k, n, self.default_probability)
    }

    /// Hits to ask each of `n` nodes for. Never more than `k`.
    pub fn estimate_k_with(&self, k: u32, n: u32, probability: f64) -> u32 {
        let estimate = self.estimate_exact_k_with(k, n, probability).ceil();
        if estimate >= f64::from(k) {
            k
        } else {
            estimate.max(0.0) as u32
        }
    }

    /// Student-t quantile at `1 − (1 − probability)/n`.
    fn quantile(&self, distribution: &StudentsT, n: u32, probability: f64) -> f64 {
        let tail = (1.0 - probability) / f64::from(n);
        match self.default_quantiles.get(n as usize) {
            Some(cached) if probability == self.default_probability => {
                *cached.get_or_init(|| upper_quantile(distribution, tail))
            }
            _ => upper_quantile(distribution, tail),
        }
    }
}

impl Default for TopKEstimator {
    fn default() -> Self {
        Self::new(DEFAULT_DEGREES_OF_FREEDOM, 0.9999)
    }
}

/// The `t` with `P(T > t) = tail`.
fn upper_quantile(distribution: &StudentsT, tail: f64) -> f64 {
    distribution.inverse_cdf(1.0 - tail)
}
