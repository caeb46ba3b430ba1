//! Property-Based Testing for DST
//!
//! `TigerStyle`: Random operation sequences with invariant checking.
//!
//! Property tests generate random operations and verify invariants after
//! each one. Combined with DST this gives:
//! - Deterministic reproduction via seed
//! - Time control via `SimClock`
//! - Fault injection via `FaultInjector`
//!
//! # Example
//!
//! ```rust
//! use tiermig_core::dst::{DeterministicRng, PropertyTest, PropertyTestable, SimClock};
//!
//! struct PinLedger { pinned: u64, capacity: u64 }
//!
//! #[derive(Debug, Clone)]
//! enum LedgerOp { Pin(u64), Release(u64) }
//!
//! impl PropertyTestable for PinLedger {
//!     type Operation = LedgerOp;
//!
//!     fn generate_operation(&self, rng: &mut DeterministicRng) -> LedgerOp {
//!         let n = rng.next_u64_in(1, 8);
//!         if rng.next_bool(0.5) { LedgerOp::Pin(n) } else { LedgerOp::Release(n) }
//!     }
//!
//!     fn apply_operation(&mut self, op: &LedgerOp, _clock: &SimClock) {
//!         match op {
//!             LedgerOp::Pin(n) => self.pinned = (self.pinned + n).min(self.capacity),
//!             LedgerOp::Release(n) => self.pinned = self.pinned.saturating_sub(*n),
//!         }
//!     }
//!
//!     fn check_invariants(&self) -> Result<(), String> {
//!         if self.pinned > self.capacity {
//!             return Err(format!("{} pinned over capacity {}", self.pinned, self.capacity));
//!         }
//!         Ok(())
//!     }
//! }
//!
//! PropertyTest::new(42)
//!     .with_max_operations(500)
//!     .run_and_assert(PinLedger { pinned: 0, capacity: 32 });
//! ```

use std::fmt::Debug;

use super::clock::SimClock;
use super::rng::DeterministicRng;
use crate::constants::{DST_SIMULATION_STEPS_MAX, DST_TIME_ADVANCE_US_MAX};

/// Trait for systems that can be property-tested.
///
/// `TigerStyle`: Explicit operation generation and invariant checking.
pub trait PropertyTestable {
    /// The type of operations that can be performed.
    type Operation: Debug + Clone;

    /// Generate a random operation based on current state.
    fn generate_operation(&self, rng: &mut DeterministicRng) -> Self::Operation;

    /// Apply an operation to the state.
    ///
    /// May read the clock for time-dependent behaviour.
    fn apply_operation(&mut self, op: &Self::Operation, clock: &SimClock);

    /// Check that all invariants hold.
    ///
    /// # Errors
    /// Returns a description of the first violated invariant.
    fn check_invariants(&self) -> Result<(), String>;

    /// Describe the current state for failure reports.
    fn describe_state(&self) -> String {
        String::from("(state description not implemented)")
    }
}

/// Result of a property test run.
#[derive(Debug)]
pub struct PropertyTestResult {
    /// Number of operations executed
    pub operations_executed: u64,
    /// Seed used for reproduction
    pub seed: u64,
    /// Failure details, if any
    pub failure: Option<PropertyTestFailure>,
}

impl PropertyTestResult {
    /// Check if the test passed.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.failure.is_none()
    }

    /// Check if the test failed.
    #[must_use]
    pub fn is_failure(&self) -> bool {
        self.failure.is_some()
    }

    /// Panic with reproduction details if the test failed.
    ///
    /// # Panics
    /// Panics if the test failed.
    pub fn unwrap(self) {
        if let Some(failure) = self.failure {
            panic!(
                "Property test failed!\n\
                 Seed: {} (replay with DST_SEED={})\n\
                 Operation #{}: {}\n\
                 Invariant violation: {}\n\
                 State: {}",
                self.seed,
                self.seed,
                failure.operation_index,
                failure.operation,
                failure.message,
                failure.state_description
            );
        }
    }
}

/// Details of a property test failure.
#[derive(Debug)]
pub struct PropertyTestFailure {
    /// Index of the failing operation (0-based)
    pub operation_index: u64,
    /// The operation that caused the failure
    pub operation: String,
    /// The invariant violation message
    pub message: String,
    /// Description of the state at failure
    pub state_description: String,
}

/// Configuration for time advancement between operations.
#[derive(Debug, Clone)]
pub struct TimeAdvanceConfig {
    /// Minimum advance per operation (us)
    pub min_us: u64,
    /// Maximum advance per operation (us)
    pub max_us: u64,
    /// Probability of advancing time (0.0 to 1.0)
    pub probability: f64,
}

impl Default for TimeAdvanceConfig {
    fn default() -> Self {
        Self {
            min_us: 0,
            max_us: 100_000,
            probability: 0.5,
        }
    }
}

impl TimeAdvanceConfig {
    /// No time advancement.
    #[must_use]
    pub fn none() -> Self {
        Self {
            min_us: 0,
            max_us: 0,
            probability: 0.0,
        }
    }

    /// Always advance by a fixed amount.
    #[must_use]
    pub fn fixed(us: u64) -> Self {
        Self {
            min_us: us,
            max_us: us,
            probability: 1.0,
        }
    }

    /// Advance by a random amount in `[min_us, max_us]` with the given probability.
    ///
    /// # Panics
    /// Panics if the range or probability is invalid.
    #[must_use]
    pub fn random(min_us: u64, max_us: u64, probability: f64) -> Self {
        assert!((0.0..=1.0).contains(&probability));
        assert!(min_us <= max_us);
        assert!(max_us <= DST_TIME_ADVANCE_US_MAX);
        Self {
            min_us,
            max_us,
            probability,
        }
    }
}

/// Property-based test runner.
///
/// `TigerStyle`:
/// - Deterministic via seed
/// - Explicit operation count limits
/// - Invariant checking after each operation
/// - Time advancement control
#[derive(Debug)]
pub struct PropertyTest {
    seed: u64,
    max_operations: u64,
    time_config: TimeAdvanceConfig,
    check_invariants_before: bool,
}

impl PropertyTest {
    /// Create a new property test with the given seed.
    #[must_use]
    pub fn new(seed: u64) -> Self {
        Self {
            seed,
            max_operations: 100,
            time_config: TimeAdvanceConfig::default(),
            check_invariants_before: true,
        }
    }

    /// Set the maximum number of operations to run.
    ///
    /// # Panics
    /// Panics if max exceeds `DST_SIMULATION_STEPS_MAX`.
    #[must_use]
    pub fn with_max_operations(mut self, max: u64) -> Self {
        assert!(
            max <= DST_SIMULATION_STEPS_MAX,
            "max_operations {} exceeds DST_SIMULATION_STEPS_MAX {}",
            max,
            DST_SIMULATION_STEPS_MAX
        );
        self.max_operations = max;
        self
    }

    /// Configure time advancement between operations.
    #[must_use]
    pub fn with_time_advance(mut self, config: TimeAdvanceConfig) -> Self {
        self.time_config = config;
        self
    }

    /// Disable checking invariants before the first operation.
    #[must_use]
    pub fn skip_initial_invariant_check(mut self) -> Self {
        self.check_invariants_before = false;
        self
    }

    /// Run the property test and report the outcome.
    #[must_use]
    pub fn run<T: PropertyTestable>(self, mut state: T) -> PropertyTestResult {
        let mut rng = DeterministicRng::new(self.seed);
        let clock = SimClock::new();

        if self.check_invariants_before {
            if let Err(msg) = state.check_invariants() {
                return PropertyTestResult {
                    operations_executed: 0,
                    seed: self.seed,
                    failure: Some(PropertyTestFailure {
                        operation_index: 0,
                        operation: "(initial state)".to_string(),
                        message: format!("Initial state violates invariants: {}", msg),
                        state_description: state.describe_state(),
                    }),
                };
            }
        }

        for i in 0..self.max_operations {
            if self.time_config.probability > 0.0 && rng.next_bool(self.time_config.probability) {
                let advance = rng.next_u64_in(self.time_config.min_us, self.time_config.max_us);
                clock.advance_us(advance);
            }

            let op = state.generate_operation(&mut rng);
            let op_debug = format!("{:?}", op);
            state.apply_operation(&op, &clock);

            if let Err(msg) = state.check_invariants() {
                return PropertyTestResult {
                    operations_executed: i + 1,
                    seed: self.seed,
                    failure: Some(PropertyTestFailure {
                        operation_index: i,
                        operation: op_debug,
                        message: msg,
                        state_description: state.describe_state(),
                    }),
                };
            }
        }

        PropertyTestResult {
            operations_executed: self.max_operations,
            seed: self.seed,
            failure: None,
        }
    }

    /// Run the property test, panicking on failure.
    ///
    /// # Panics
    /// Panics if any invariant is violated.
    pub fn run_and_assert<T: PropertyTestable>(self, state: T) {
        self.run(state).unwrap();
    }
}

/// Run the same property over several seeds.
///
/// # Panics
/// Panics if any seed fails.
pub fn run_property_tests<T, F>(
    seeds: &[u64],
    max_operations: u64,
    time_config: TimeAdvanceConfig,
    state_factory: F,
) where
    T: PropertyTestable,
    F: Fn() -> T,
{
    for &seed in seeds {
        PropertyTest::new(seed)
            .with_max_operations(max_operations)
            .with_time_advance(time_config.clone())
            .run_and_assert(state_factory());
    }
}

/// Generate test seeds: `[0, 1, 42]` followed by fresh random ones.
///
/// # Panics
/// Panics if `count` is below 3.
#[must_use]
pub fn test_seeds(count: usize) -> Vec<u64> {
    assert!(count >= 3, "need at least 3 seeds for edge cases");

    let mut seeds = vec![0, 1, 42];

    let time_seed = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map_or(12345, |d| d.as_nanos() as u64);
    let mut rng = DeterministicRng::new(time_seed);

    while seeds.len() < count {
        seeds.push(rng.next_u64());
    }

    seeds
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Blocks pinned against a fixed capacity, clamped on every operation.
    struct PinLedger {
        pinned: u64,
        capacity: u64,
    }

    #[derive(Debug, Clone)]
    enum LedgerOp {
        Pin(u64),
        Release(u64),
    }

    impl PropertyTestable for PinLedger {
        type Operation = LedgerOp;

        fn generate_operation(&self, rng: &mut DeterministicRng) -> Self::Operation {
            let n = rng.next_u64_in(1, 20);
            if rng.next_bool(0.6) {
                LedgerOp::Pin(n)
            } else {
                LedgerOp::Release(n)
            }
        }

        fn apply_operation(&mut self, op: &Self::Operation, _clock: &SimClock) {
            match op {
                LedgerOp::Pin(n) => self.pinned = (self.pinned + n).min(self.capacity),
                LedgerOp::Release(n) => self.pinned = self.pinned.saturating_sub(*n),
            }
        }

        fn check_invariants(&self) -> Result<(), String> {
            if self.pinned > self.capacity {
                return Err(format!(
                    "{} pinned exceeds capacity {}",
                    self.pinned, self.capacity
                ));
            }
            Ok(())
        }

        fn describe_state(&self) -> String {
            format!(
                "PinLedger {{ pinned: {}, capacity: {} }}",
                self.pinned, self.capacity
            )
        }
    }

    /// Ledger that forgets to clamp.
    struct LeakyLedger {
        pinned: u64,
        capacity: u64,
    }

    impl PropertyTestable for LeakyLedger {
        type Operation = u64;

        fn generate_operation(&self, rng: &mut DeterministicRng) -> Self::Operation {
            rng.next_u64_in(1, 50)
        }

        fn apply_operation(&mut self, op: &Self::Operation, _clock: &SimClock) {
            self.pinned += op;
        }

        fn check_invariants(&self) -> Result<(), String> {
            if self.pinned > self.capacity {
                return Err(format!("{} exceeds capacity {}", self.pinned, self.capacity));
            }
            Ok(())
        }
    }

    /// Records how often the clock moved between operations.
    struct TimeTracker {
        last_us: u64,
        advances: u64,
        operations: u64,
    }

    impl PropertyTestable for TimeTracker {
        type Operation = ();

        fn generate_operation(&self, _rng: &mut DeterministicRng) -> Self::Operation {}

        fn apply_operation(&mut self, _op: &Self::Operation, clock: &SimClock) {
            self.operations += 1;
            if clock.now_us() > self.last_us {
                self.advances += 1;
                self.last_us = clock.now_us();
            }
        }

        fn check_invariants(&self) -> Result<(), String> {
            if self.advances != self.operations {
                return Err(format!(
                    "clock advanced {} times over {} operations",
                    self.advances, self.operations
                ));
            }
            Ok(())
        }
    }

    #[test]
    fn test_property_test_success() {
        let result = PropertyTest::new(42)
            .with_max_operations(1000)
            .with_time_advance(TimeAdvanceConfig::none())
            .run(PinLedger {
                pinned: 0,
                capacity: 64,
            });

        assert!(result.is_success());
        assert_eq!(result.operations_executed, 1000);
        assert_eq!(result.seed, 42);
    }

    #[test]
    fn test_property_test_catches_bug() {
        let result = PropertyTest::new(42)
            .with_max_operations(1000)
            .run(LeakyLedger {
                pinned: 0,
                capacity: 100,
            });

        assert!(result.is_failure());
        let failure = result.failure.unwrap();
        assert!(failure.message.contains("exceeds capacity"));
    }

    #[test]
    fn test_fixed_time_advance_moves_clock_every_operation() {
        PropertyTest::new(7)
            .with_max_operations(100)
            .with_time_advance(TimeAdvanceConfig::fixed(10))
            .run_and_assert(TimeTracker {
                last_us: 0,
                advances: 0,
                operations: 0,
            });
    }

    #[test]
    fn test_initial_invariant_check() {
        let result = PropertyTest::new(42).run(PinLedger {
            pinned: 200,
            capacity: 100,
        });

        assert!(result.is_failure());
        assert!(result
            .failure
            .unwrap()
            .message
            .contains("Initial state violates"));
    }

    #[test]
    fn test_skip_initial_invariant_check() {
        let result = PropertyTest::new(42)
            .skip_initial_invariant_check()
            .with_max_operations(1)
            .run(LeakyLedger {
                pinned: 200,
                capacity: 100,
            });

        assert!(result.is_failure());
    }

    #[test]
    fn test_test_seeds() {
        let seeds = test_seeds(10);
        assert_eq!(seeds.len(), 10);
        assert_eq!(&seeds[..3], &[0, 1, 42]);
    }

    #[test]
    fn test_run_property_tests_helper() {
        run_property_tests(&[0, 1, 42], 100, TimeAdvanceConfig::default(), || {
            PinLedger {
                pinned: 0,
                capacity: 16,
            }
        });
    }
}
