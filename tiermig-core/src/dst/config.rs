//! SimConfig - Simulation Configuration
//!
//! `TigerStyle`: One seed per run, always recoverable.

use rand::Rng;
use std::env;

/// Environment variable holding a replay seed.
pub const DST_SEED_ENV: &str = "DST_SEED";

/// Seed of one simulation run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SimConfig {
    seed: u64,
}

impl SimConfig {
    /// Config with an explicit seed.
    ///
    /// # Example
    /// ```
    /// use tiermig_core::dst::SimConfig;
    /// let config = SimConfig::with_seed(12345);
    /// assert_eq!(config.seed(), 12345);
    /// ```
    #[must_use]
    pub fn with_seed(seed: u64) -> Self {
        Self { seed }
    }

    /// Seed from `DST_SEED`, or a fresh one that is printed for replay.
    ///
    /// # Panics
    /// Panics if `DST_SEED` is set but is not a valid u64.
    #[must_use]
    pub fn from_env_or_random() -> Self {
        match env::var(DST_SEED_ENV) {
            Ok(raw) => Self::with_seed(parse_seed(&raw)),
            Err(_) => {
                let seed = rand::thread_rng().gen::<u64>();
                eprintln!("DST seed {seed} (replay with {DST_SEED_ENV}={seed})");
                Self::with_seed(seed)
            }
        }
    }

    /// The run's seed.
    #[must_use]
    pub fn seed(&self) -> u64 {
        self.seed
    }
}

impl Default for SimConfig {
    fn default() -> Self {
        Self::from_env_or_random()
    }
}

fn parse_seed(raw: &str) -> u64 {
    raw.trim()
        .parse::<u64>()
        .unwrap_or_else(|_| panic!("{DST_SEED_ENV} must be a u64, got {raw:?}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_with_seed() {
        assert_eq!(SimConfig::with_seed(7).seed(), 7);
        assert_eq!(SimConfig::with_seed(7), SimConfig::with_seed(7));
    }

    #[test]
    fn test_parse_seed_tolerates_newline() {
        assert_eq!(parse_seed("42\n"), 42);
    }

    #[test]
    #[should_panic(expected = "DST_SEED must be a u64")]
    fn test_parse_seed_rejects_garbage() {
        let _ = parse_seed("forty-two");
    }
}
