// SPDX-License-Identifier: MIT OR Apache-2.0

//! Randomness source for key generation.
//!
//! Every operation that needs fresh key material takes a handle to this generator; the crate
//! never reads from a global or thread-local source. Tests construct it from a fixed seed,
//! which makes whole protocol runs reproducible.
use std::sync::Mutex;

use rand_chacha::ChaCha20Rng;
use rand_chacha::rand_core::{SeedableRng, TryRngCore};
use thiserror::Error;

/// ChaCha20-based cryptographically-secure random number generator.
#[derive(Debug)]
pub struct Rng {
    inner: Mutex<ChaCha20Rng>,
}

impl Rng {
    /// Creates a generator seeded with entropy from the operating system.
    pub fn new() -> Result<Self, RngError> {
        let inner = ChaCha20Rng::try_from_os_rng().map_err(|_| RngError::SeedingFailed)?;
        Ok(Self {
            inner: Mutex::new(inner),
        })
    }

    /// Creates a generator from a fixed seed, for reproducible protocol runs.
    #[cfg(any(test, feature = "test_utils"))]
    pub fn from_seed(seed: [u8; 32]) -> Self {
        Self {
            inner: Mutex::new(ChaCha20Rng::from_seed(seed)),
        }
    }

    /// Draws `N` fresh random bytes.
    pub fn random_bytes<const N: usize>(&self) -> Result<[u8; N], RngError> {
        // The generator state stays valid even if another thread panicked mid-draw.
        let mut inner = self
            .inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let mut bytes = [0u8; N];
        inner
            .try_fill_bytes(&mut bytes)
            .map_err(|_| RngError::NotEnoughRandom)?;
        Ok(bytes)
    }
}

#[derive(Debug, Error)]
pub enum RngError {
    #[error("could not gather entropy from the operating system")]
    SeedingFailed,

    #[error("random number generator failed to produce the requested bytes")]
    NotEnoughRandom,
}

#[cfg(test)]
mod tests {
    use super::Rng;

    #[test]
    fn seeded_draws_are_reproducible() {
        let first_run: [u8; 64] = Rng::from_seed([9; 32]).random_bytes().unwrap();
        let second_run: [u8; 64] = Rng::from_seed([9; 32]).random_bytes().unwrap();
        assert_eq!(first_run, second_run);
    }

    #[test]
    fn successive_draws_differ() {
        let rng = Rng::from_seed([9; 32]);
        let first: [u8; 32] = rng.random_bytes().unwrap();
        let second: [u8; 32] = rng.random_bytes().unwrap();
        assert_ne!(first, second);
    }
}
