//! FaultInjector - Probabilistic Fault Injection
//!
//! `TigerStyle`: Explicit fault injection for chaos testing.
//!
//! Every fault type targets one collaborator operation. Simulators ask the
//! injector before doing real work, passing the operation name.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use super::rng::DeterministicRng;
use crate::constants::DST_FAULT_PROBABILITY_MAX;

/// Operation names simulators pass to [`FaultInjector::should_inject`].
pub mod op {
    /// `HotnessSource::poll_candidates`
    pub const POLL_CANDIDATES: &str = "poll_candidates";
    /// `HotnessSource::histogram_ready`
    pub const HISTOGRAM_READY: &str = "histogram_ready";
    /// `HotnessSource::fetch_histogram`
    pub const FETCH_HISTOGRAM: &str = "fetch_histogram";
    /// `AllocatorBlockPool::resolve`
    pub const RESOLVE: &str = "resolve";
    /// `AllocatorBlockPool::acquire_exclusive`
    pub const ACQUIRE_EXCLUSIVE: &str = "acquire_exclusive";
    /// `MigrationPrimitive::migrate`
    pub const MIGRATE: &str = "migrate";
}

/// Types of faults that can be injected.
///
/// `TigerStyle`: Every fault type is explicit and documented.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FaultType {
    // =========================================================================
    // Hotness Source Faults
    // =========================================================================
    /// Candidate poll returns an error
    HotnessPollFail,
    /// Histogram never reports ready
    HistogramNeverReady,
    /// Histogram read returns an error
    HistogramFetchFail,

    // =========================================================================
    // Allocator Faults
    // =========================================================================
    /// Block freed between report and validation (address no longer backed)
    BlockVanished,
    /// Block pinned by a concurrent user at acquisition time
    SpuriousPin,

    // =========================================================================
    // Migration Faults
    // =========================================================================
    /// Some blocks in a batch fail to move
    MigrationPartialFail,
    /// The whole batch fails
    MigrationTotalFail,
}

impl FaultType {
    /// Every fault type.
    pub const ALL: [FaultType; 7] = [
        Self::HotnessPollFail,
        Self::HistogramNeverReady,
        Self::HistogramFetchFail,
        Self::BlockVanished,
        Self::SpuriousPin,
        Self::MigrationPartialFail,
        Self::MigrationTotalFail,
    ];

    /// Get the fault type name as a string.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::HotnessPollFail => "hotness_poll_fail",
            Self::HistogramNeverReady => "histogram_never_ready",
            Self::HistogramFetchFail => "histogram_fetch_fail",
            Self::BlockVanished => "block_vanished",
            Self::SpuriousPin => "spurious_pin",
            Self::MigrationPartialFail => "migration_partial_fail",
            Self::MigrationTotalFail => "migration_total_fail",
        }
    }

    /// The collaborator operation this fault fires on.
    #[must_use]
    pub fn operation(&self) -> &'static str {
        match self {
            Self::HotnessPollFail => op::POLL_CANDIDATES,
            Self::HistogramNeverReady => op::HISTOGRAM_READY,
            Self::HistogramFetchFail => op::FETCH_HISTOGRAM,
            Self::BlockVanished => op::RESOLVE,
            Self::SpuriousPin => op::ACQUIRE_EXCLUSIVE,
            Self::MigrationPartialFail | Self::MigrationTotalFail => op::MIGRATE,
        }
    }
}

/// Configuration for a specific fault.
#[derive(Debug, Clone)]
pub struct FaultConfig {
    /// The type of fault
    pub fault_type: FaultType,
    /// Probability of injection (0.0 to 1.0)
    pub probability: f64,
    /// Maximum number of injections (None = unlimited)
    pub max_injections: Option<u64>,
    /// Skip this many matching calls before rolling
    pub after_calls: u64,
}

impl FaultConfig {
    /// Create a new fault configuration.
    ///
    /// # Panics
    /// Panics if probability is not in [0, 1].
    #[must_use]
    pub fn new(fault_type: FaultType, probability: f64) -> Self {
        // Precondition
        assert!(
            (0.0..=DST_FAULT_PROBABILITY_MAX).contains(&probability),
            "probability must be in [0, {}], got {}",
            DST_FAULT_PROBABILITY_MAX,
            probability
        );

        Self {
            fault_type,
            probability,
            max_injections: None,
            after_calls: 0,
        }
    }

    /// Set maximum number of injections.
    ///
    /// # Panics
    /// Panics if `max` is zero.
    #[must_use]
    pub fn with_max_injections(mut self, max: u64) -> Self {
        // Precondition
        assert!(max > 0, "max_injections must be positive");
        self.max_injections = Some(max);
        self
    }

    /// Let the first `calls` matching operations through untouched.
    #[must_use]
    pub fn after_calls(mut self, calls: u64) -> Self {
        self.after_calls = calls;
        self
    }
}

#[derive(Debug, Default, Clone, Copy)]
struct FaultCounts {
    calls_seen: u64,
    injected: u64,
}

#[derive(Debug)]
struct InjectorState {
    rng: DeterministicRng,
    counts: HashMap<FaultType, FaultCounts>,
}

/// Fault injector for simulation testing.
///
/// `TigerStyle`:
/// - Explicit fault registration
/// - Deterministic through RNG
/// - Statistics tracked
/// - Interior mutability for sharing via Arc
#[derive(Debug)]
pub struct FaultInjector {
    configs: Vec<FaultConfig>,
    state: Mutex<InjectorState>,
}

impl FaultInjector {
    /// Create a new fault injector with the given RNG.
    #[must_use]
    pub fn new(rng: DeterministicRng) -> Self {
        Self {
            configs: Vec::new(),
            state: Mutex::new(InjectorState {
                rng,
                counts: HashMap::new(),
            }),
        }
    }

    /// An injector that never fires.
    #[must_use]
    pub fn disabled() -> Self {
        Self::new(DeterministicRng::new(0))
    }

    fn lock(&self) -> MutexGuard<'_, InjectorState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a fault configuration.
    ///
    /// Registration must happen before sharing via Arc.
    pub fn register(&mut self, config: FaultConfig) {
        self.state
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .counts
            .entry(config.fault_type)
            .or_default();
        self.configs.push(config);
    }

    /// Check if a fault should be injected for the given operation.
    ///
    /// Only faults targeting `operation` are considered. Returns the first
    /// one that fires.
    pub fn should_inject(&self, operation: &str) -> Option<FaultType> {
        let mut state = self.lock();

        for config in &self.configs {
            if config.fault_type.operation() != operation {
                continue;
            }

            let counts = state.counts.entry(config.fault_type).or_default();
            counts.calls_seen += 1;
            if counts.calls_seen <= config.after_calls {
                continue;
            }
            if let Some(max) = config.max_injections {
                if counts.injected >= max {
                    continue;
                }
            }

            if state.rng.next_bool(config.probability) {
                state.counts.entry(config.fault_type).or_default().injected += 1;
                return Some(config.fault_type);
            }
        }

        None
    }

    /// Check a specific fault type, ignoring others on the same operation.
    pub fn should_inject_fault(&self, fault_type: FaultType) -> bool {
        let mut state = self.lock();

        for config in self.configs.iter().filter(|c| c.fault_type == fault_type) {
            let counts = state.counts.entry(fault_type).or_default();
            counts.calls_seen += 1;
            if counts.calls_seen <= config.after_calls {
                continue;
            }
            if config.max_injections.is_some_and(|max| counts.injected >= max) {
                continue;
            }
            if state.rng.next_bool(config.probability) {
                state.counts.entry(fault_type).or_default().injected += 1;
                return true;
            }
        }

        false
    }

    /// Draw a uniform value from the injector's RNG stream.
    ///
    /// Lets simulators size partial failures deterministically.
    pub fn next_usize(&self, min: usize, max: usize) -> usize {
        self.lock().rng.next_usize(min, max)
    }

    /// Get injection statistics keyed by fault name.
    #[must_use]
    pub fn injection_stats(&self) -> HashMap<String, u64> {
        self.lock()
            .counts
            .iter()
            .map(|(fault_type, counts)| (fault_type.as_str().to_string(), counts.injected))
            .collect()
    }

    /// Injections of one fault type so far.
    #[must_use]
    pub fn injections_of(&self, fault_type: FaultType) -> u64 {
        self.lock()
            .counts
            .get(&fault_type)
            .map_or(0, |counts| counts.injected)
    }

    /// Get total number of injections.
    #[must_use]
    pub fn total_injections(&self) -> u64 {
        self.lock().counts.values().map(|c| c.injected).sum()
    }

    /// Reset all statistics.
    pub fn reset_stats(&self) {
        for counts in self.lock().counts.values_mut() {
            *counts = FaultCounts::default();
        }
    }
}

/// Builder for `FaultInjector`.
///
/// `TigerStyle`: Builder pattern for clean configuration before sharing via Arc.
#[derive(Debug)]
pub struct FaultInjectorBuilder {
    rng: DeterministicRng,
    configs: Vec<FaultConfig>,
}

impl FaultInjectorBuilder {
    /// Create a new builder with the given RNG.
    #[must_use]
    pub fn new(rng: DeterministicRng) -> Self {
        Self {
            rng,
            configs: Vec::new(),
        }
    }

    /// Add a fault configuration.
    #[must_use]
    pub fn with_fault(mut self, config: FaultConfig) -> Self {
        self.configs.push(config);
        self
    }

    /// Add hotness-source faults (poll and histogram fetch).
    #[must_use]
    pub fn with_hotness_faults(self, probability: f64) -> Self {
        self.with_fault(FaultConfig::new(FaultType::HotnessPollFail, probability))
            .with_fault(FaultConfig::new(FaultType::HistogramFetchFail, probability))
    }

    /// Add allocator races (vanished blocks and concurrent pins).
    #[must_use]
    pub fn with_allocator_faults(self, probability: f64) -> Self {
        self.with_fault(FaultConfig::new(FaultType::BlockVanished, probability))
            .with_fault(FaultConfig::new(FaultType::SpuriousPin, probability))
    }

    /// Add partial and total migration failures.
    #[must_use]
    pub fn with_migration_faults(self, probability: f64) -> Self {
        self.with_fault(FaultConfig::new(FaultType::MigrationPartialFail, probability))
            .with_fault(FaultConfig::new(FaultType::MigrationTotalFail, probability))
    }

    /// Build the `FaultInjector`.
    #[must_use]
    pub fn build(self) -> FaultInjector {
        let mut injector = FaultInjector::new(self.rng);
        for config in self.configs {
            injector.register(config);
        }
        injector
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_no_faults_registered() {
        let injector = FaultInjector::disabled();

        for operation in [op::POLL_CANDIDATES, op::MIGRATE, op::RESOLVE] {
            assert!(injector.should_inject(operation).is_none());
        }
    }

    #[test]
    fn test_always_inject_on_target_operation_only() {
        let mut injector = FaultInjector::new(DeterministicRng::new(42));
        injector.register(FaultConfig::new(FaultType::HotnessPollFail, 1.0));

        for _ in 0..10 {
            assert_eq!(
                injector.should_inject(op::POLL_CANDIDATES),
                Some(FaultType::HotnessPollFail)
            );
        }
        assert!(injector.should_inject(op::MIGRATE).is_none());
        assert!(injector.should_inject(op::FETCH_HISTOGRAM).is_none());
    }

    #[test]
    fn test_never_inject() {
        let mut injector = FaultInjector::new(DeterministicRng::new(42));
        injector.register(FaultConfig::new(FaultType::SpuriousPin, 0.0));

        for _ in 0..100 {
            assert!(injector.should_inject(op::ACQUIRE_EXCLUSIVE).is_none());
        }
    }

    #[test]
    fn test_max_injections() {
        let mut injector = FaultInjector::new(DeterministicRng::new(42));
        injector
            .register(FaultConfig::new(FaultType::MigrationTotalFail, 1.0).with_max_injections(2));

        assert!(injector.should_inject(op::MIGRATE).is_some());
        assert!(injector.should_inject(op::MIGRATE).is_some());
        assert!(injector.should_inject(op::MIGRATE).is_none());
        assert_eq!(injector.injections_of(FaultType::MigrationTotalFail), 2);
    }

    #[test]
    fn test_after_calls() {
        let mut injector = FaultInjector::new(DeterministicRng::new(42));
        injector.register(FaultConfig::new(FaultType::HistogramNeverReady, 1.0).after_calls(3));

        for _ in 0..3 {
            assert!(injector.should_inject(op::HISTOGRAM_READY).is_none());
        }
        assert_eq!(
            injector.should_inject(op::HISTOGRAM_READY),
            Some(FaultType::HistogramNeverReady)
        );
    }

    #[test]
    fn test_should_inject_fault_selects_type() {
        let injector = FaultInjectorBuilder::new(DeterministicRng::new(7))
            .with_fault(FaultConfig::new(FaultType::MigrationPartialFail, 1.0))
            .build();

        assert!(injector.should_inject_fault(FaultType::MigrationPartialFail));
        assert!(!injector.should_inject_fault(FaultType::MigrationTotalFail));
    }

    #[test]
    fn test_injection_stats_and_reset() {
        let mut injector = FaultInjector::new(DeterministicRng::new(42));
        injector.register(FaultConfig::new(FaultType::BlockVanished, 1.0));

        for _ in 0..3 {
            injector.should_inject(op::RESOLVE);
        }

        let stats = injector.injection_stats();
        assert_eq!(stats.get("block_vanished"), Some(&3));
        assert_eq!(injector.total_injections(), 3);

        injector.reset_stats();
        assert_eq!(injector.total_injections(), 0);
    }

    #[test]
    fn test_every_fault_targets_known_operation() {
        let known = [
            op::POLL_CANDIDATES,
            op::HISTOGRAM_READY,
            op::FETCH_HISTOGRAM,
            op::RESOLVE,
            op::ACQUIRE_EXCLUSIVE,
            op::MIGRATE,
        ];
        for fault in FaultType::ALL {
            assert!(known.contains(&fault.operation()), "{}", fault.as_str());
        }
    }

    #[test]
    #[should_panic(expected = "probability must be in")]
    fn test_invalid_probability() {
        let _ = FaultConfig::new(FaultType::HotnessPollFail, 1.5);
    }

    #[test]
    #[should_panic(expected = "max_injections must be positive")]
    fn test_invalid_max_injections() {
        let _ = FaultConfig::new(FaultType::HotnessPollFail, 0.5).with_max_injections(0);
    }

    #[test]
    fn test_builder_and_arc_sharing() {
        let injector = Arc::new(
            FaultInjectorBuilder::new(DeterministicRng::new(42))
                .with_hotness_faults(0.0)
                .with_allocator_faults(0.0)
                .with_migration_faults(1.0)
                .build(),
        );

        let shared = Arc::clone(&injector);
        assert!(shared.should_inject(op::MIGRATE).is_some());
        assert!(injector.should_inject(op::POLL_CANDIDATES).is_none());
        assert_eq!(injector.total_injections(), 1);
    }
}
