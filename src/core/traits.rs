//! The random source seam used by the backoff schedule.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Source of uniform randomness for retransmission jitter.
///
/// Injected into the supervisor so tests can pin the schedule either with a
/// fixed seed or with a scripted sequence.
pub trait RandomSource: Send {
    /// Uniform sample in `[0.0, 1.0)`.
    fn next_unit(&mut self) -> f64;

    /// Uniform 16-bit sample, used to seed message ids.
    fn next_u16(&mut self) -> u16 {
        (self.next_unit() * f64::from(u16::MAX)) as u16
    }
}

/// A random source that can be seeded for deterministic behavior.
///
/// With a seed it draws from a [`StdRng`]; without one it falls back to the
/// thread-local generator.
pub struct SeededRng {
    inner: Option<StdRng>,
}

impl SeededRng {
    /// Create a source with an optional seed.
    pub fn new(seed: Option<u64>) -> Self {
        Self {
            inner: seed.map(StdRng::seed_from_u64),
        }
    }
}

impl Default for SeededRng {
    fn default() -> Self {
        Self::new(None)
    }
}

impl RandomSource for SeededRng {
    fn next_unit(&mut self) -> f64 {
        match self.inner.as_mut() {
            Some(rng) => rng.gen_range(0.0..1.0),
            None => rand::thread_rng().gen_range(0.0..1.0),
        }
    }

    fn next_u16(&mut self) -> u16 {
        match self.inner.as_mut() {
            Some(rng) => rng.gen_range(0..=u16::MAX),
            None => rand::thread_rng().gen_range(0..=u16::MAX),
        }
    }
}

impl std::fmt::Debug for SeededRng {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SeededRng")
            .field("seeded", &self.inner.is_some())
            .finish()
    }
}
