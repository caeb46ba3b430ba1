//! DeterministicRng - Seeded Random Number Generator
//!
//! `TigerStyle`: ChaCha20-based RNG so a seed replays a whole simulated run.

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha20Rng;

/// Golden-ratio increment used to derive fork seeds.
const FORK_SEED_STRIDE: u64 = 0x9E37_79B9_7F4A_7C15;

/// A deterministic random number generator.
///
/// `TigerStyle`:
/// - Same seed always produces same sequence
/// - Fork creates independent streams (one per simulated collaborator)
/// - All simulation randomness flows through this
#[derive(Debug, Clone)]
pub struct DeterministicRng {
    rng: ChaCha20Rng,
    seed: u64,
    fork_counter: u64,
}

impl DeterministicRng {
    /// Create a new RNG with the given seed.
    ///
    /// # Example
    /// ```
    /// use tiermig_core::dst::DeterministicRng;
    /// let mut rng = DeterministicRng::new(42);
    /// let roll = rng.next_float();
    /// assert!((0.0..1.0).contains(&roll));
    /// ```
    #[must_use]
    pub fn new(seed: u64) -> Self {
        Self {
            rng: ChaCha20Rng::seed_from_u64(seed),
            seed,
            fork_counter: 0,
        }
    }

    /// Get the original seed.
    #[must_use]
    pub fn seed(&self) -> u64 {
        self.seed
    }

    /// Generate a random float in [0, 1).
    pub fn next_float(&mut self) -> f64 {
        let value = self.rng.gen::<f64>();

        // Postcondition
        assert!((0.0..1.0).contains(&value), "float must be in [0, 1)");
        value
    }

    /// Generate a random u64.
    pub fn next_u64(&mut self) -> u64 {
        self.rng.gen()
    }

    /// Generate a random u64 in [min, max] (inclusive).
    ///
    /// # Panics
    /// Panics if min > max.
    pub fn next_u64_in(&mut self, min: u64, max: u64) -> u64 {
        // Precondition
        assert!(min <= max, "min ({}) must be <= max ({})", min, max);

        let value = self.rng.gen_range(min..=max);

        // Postcondition
        assert!(value >= min && value <= max, "value must be in range");
        value
    }

    /// Generate a random usize in [min, max] (inclusive).
    ///
    /// # Panics
    /// Panics if min > max.
    pub fn next_usize(&mut self, min: usize, max: usize) -> usize {
        // Precondition
        assert!(min <= max, "min ({}) must be <= max ({})", min, max);

        let value = self.rng.gen_range(min..=max);

        // Postcondition
        assert!(value >= min && value <= max, "value must be in range");
        value
    }

    /// Generate a random boolean with the given probability of true.
    ///
    /// # Panics
    /// Panics if probability is not in [0, 1].
    pub fn next_bool(&mut self, probability: f64) -> bool {
        // Precondition
        assert!(
            (0.0..=1.0).contains(&probability),
            "probability must be in [0, 1], got {}",
            probability
        );

        self.next_float() < probability
    }

    /// Choose a random element from a slice.
    ///
    /// # Panics
    /// Panics if the slice is empty.
    pub fn choose<'a, T>(&mut self, items: &'a [T]) -> &'a T {
        // Precondition
        assert!(!items.is_empty(), "cannot choose from empty slice");

        let index = self.next_usize(0, items.len() - 1);
        &items[index]
    }

    /// Create an independent fork of this RNG.
    ///
    /// Forks are derived from the parent seed and the fork count, so the
    /// n-th fork of a seed is always the same stream.
    pub fn fork(&mut self) -> Self {
        self.fork_counter += 1;
        let fork_seed = self
            .seed
            .wrapping_add(self.fork_counter.wrapping_mul(FORK_SEED_STRIDE));

        Self::new(fork_seed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_same_seed_same_sequence() {
        let mut rng1 = DeterministicRng::new(12345);
        let mut rng2 = DeterministicRng::new(12345);

        for _ in 0..100 {
            assert_eq!(rng1.next_u64(), rng2.next_u64());
        }
    }

    #[test]
    fn test_different_seeds_different_sequence() {
        let mut rng1 = DeterministicRng::new(12345);
        let mut rng2 = DeterministicRng::new(54321);

        let differs = (0..10).any(|_| rng1.next_float() != rng2.next_float());
        assert!(differs, "different seeds should produce different sequences");
    }

    #[test]
    fn test_ranges() {
        let mut rng = DeterministicRng::new(42);

        for _ in 0..100 {
            assert!((0x100..=0x1ff).contains(&rng.next_u64_in(0x100, 0x1ff)));
            assert!((5..=10).contains(&rng.next_usize(5, 10)));
        }
        assert_eq!(rng.next_u64_in(7, 7), 7);
    }

    #[test]
    fn test_next_bool_extremes() {
        let mut rng = DeterministicRng::new(42);

        for _ in 0..100 {
            assert!(!rng.next_bool(0.0));
            assert!(rng.next_bool(1.0));
        }
    }

    #[test]
    fn test_fork_is_reproducible_and_independent() {
        let mut parent_a = DeterministicRng::new(42);
        let mut parent_b = DeterministicRng::new(42);

        let mut fork_a1 = parent_a.fork();
        let mut fork_a2 = parent_a.fork();
        let mut fork_b1 = parent_b.fork();

        assert_ne!(fork_a1.seed(), fork_a2.seed());
        assert_eq!(fork_a1.seed(), fork_b1.seed());
        assert_eq!(fork_a1.next_u64(), fork_b1.next_u64());
        assert_ne!(fork_a1.next_u64(), fork_a2.next_u64());
    }

    #[test]
    fn test_choose_stays_in_slice() {
        let mut rng = DeterministicRng::new(42);
        let frames: Vec<u64> = (100..110).collect();

        let picked: std::collections::HashSet<u64> =
            (0..200).map(|_| *rng.choose(&frames)).collect();
        assert!(picked.iter().all(|f| frames.contains(f)));
        assert!(picked.len() > 1, "choose should spread over the slice");
    }

    #[test]
    #[should_panic(expected = "min (10) must be <= max (5)")]
    fn test_invalid_range() {
        let mut rng = DeterministicRng::new(42);
        rng.next_usize(10, 5);
    }

    #[test]
    #[should_panic(expected = "cannot choose from empty slice")]
    fn test_choose_empty() {
        let mut rng = DeterministicRng::new(42);
        let items: Vec<u64> = vec![];
        rng.choose(&items);
    }
}
