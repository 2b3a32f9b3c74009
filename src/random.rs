//! Injectable randomness for group selection and search-path evaluation.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

pub trait RandomSource: Send {
    /// Uniform value in `[0, 1)`.
    fn next_f64(&mut self) -> f64;

    /// Uniform index in `[0, bound)`. `bound` is always positive.
    fn next_index(&mut self, bound: usize) -> usize;
}

/// Default source backed by `StdRng`.
pub struct StdRandom(StdRng);

impl StdRandom {
    pub fn new() -> Self {
        Self(StdRng::from_entropy())
    }

    pub fn seeded(seed: u64) -> Self {
        Self(StdRng::seed_from_u64(seed))
    }
}

impl Default for StdRandom {
    fn default() -> Self {
        Self::new()
    }
}

impl RandomSource for StdRandom {
    fn next_f64(&mut self) -> f64 {
        self.0.gen_range(0.0..1.0)
    }

    fn next_index(&mut self, bound: usize) -> usize {
        self.0.gen_range(0..bound)
    }
}
