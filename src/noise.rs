//! Seeded noise source shared by the waveform synthesizer and the status report.
//!
//! Every connection draws from the same generator. Passing a seed makes a whole
//! session reproducible, which is what the integration tests rely on.

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use std::sync::{Mutex, PoisonError};

/// Thread-safe, optionally seeded random number generator.
pub struct NoiseSource {
    inner: Mutex<ChaCha8Rng>,
}

impl NoiseSource {
    /// Create a new source with optional seed.
    /// If seed is None, the generator is seeded from the OS.
    pub fn new(seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(s) => ChaCha8Rng::seed_from_u64(s),
            None => ChaCha8Rng::from_entropy(),
        };
        Self {
            inner: Mutex::new(rng),
        }
    }

    /// Run `f` with exclusive access to the generator.
    ///
    /// Used for bulk draws (a whole waveform) so the lock is taken once.
    pub fn with_rng<T>(&self, f: impl FnOnce(&mut ChaCha8Rng) -> T) -> T {
        // A panic while holding the lock cannot leave the generator in a bad state.
        let mut rng = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut rng)
    }

    /// Generate a random value in the given range
    pub fn gen_range<T, R>(&self, range: R) -> T
    where
        T: rand::distributions::uniform::SampleUniform,
        R: rand::distributions::uniform::SampleRange<T>,
    {
        self.with_rng(|rng| rng.gen_range(range))
    }
}

impl Default for NoiseSource {
    fn default() -> Self {
        Self::new(None)
    }
}

impl std::fmt::Debug for NoiseSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NoiseSource")
            .field("inner", &"<Mutex<ChaCha8Rng>>")
            .finish()
    }
}
