//! Simulation - DST Test Harness
//!
//! `TigerStyle`: One seed builds the whole world: clock, faults, pool, workload.

use std::future::Future;
use std::sync::Arc;

use tiermig_core::dst::{
    DeterministicRng, FaultConfig, FaultInjector, FaultInjectorBuilder, FaultType, SimClock,
    SimConfig,
};
use tiermig_core::HISTOGRAM_BINS_COUNT_DEFAULT;

use super::hotness::SimHotnessSource;
use super::pool::SimBlockPool;
use crate::config::EngineConfig;
use crate::engine::{EngineParts, MigrationEngine};
use crate::error::EngineResult;

/// Blocks in the simulated slow tier by default.
const SIM_BLOCKS_COUNT_DEFAULT: usize = 256;

/// Upper bound on workload candidates per poll by default.
const SIM_CANDIDATES_PER_POLL_DEFAULT: usize = 32;

/// First frame of the unbacked range the workload also reports.
const SIM_UNBACKED_FRAME_BASE: u64 = 1 << 30;

/// Unbacked frames mixed into the workload.
const SIM_UNBACKED_FRAMES_COUNT: u64 = 8;

/// Environment provided to simulation tests.
///
/// `TigerStyle`: All simulation resources in one place.
pub struct SimEnvironment {
    /// Simulation configuration
    pub config: SimConfig,
    /// Simulated clock; sleepers advance it to their own deadline
    pub clock: SimClock,
    /// Deterministic RNG left over after forking the collaborators
    pub rng: DeterministicRng,
    /// Fault injector shared by source and pool
    pub faults: Arc<FaultInjector>,
    /// Simulated hotness source
    pub source: Arc<SimHotnessSource>,
    /// Simulated allocator and migration primitive
    pub pool: Arc<SimBlockPool>,
    /// Frames the workload reports as hot, backed and unbacked
    pub hot_frames: Vec<u64>,
}

impl SimEnvironment {
    /// Advance simulated time in microseconds.
    pub fn advance_time_us(&self, us: u64) -> u64 {
        self.clock.advance_us(us)
    }

    /// Current simulated time in microseconds.
    #[must_use]
    pub fn now_us(&self) -> u64 {
        self.clock.now_us()
    }

    /// Engine collaborators wired to this simulation.
    #[must_use]
    pub fn parts(&self) -> EngineParts {
        EngineParts::new(
            self.source.clone(),
            self.pool.clone(),
            self.pool.clone(),
        )
        .with_clock(Arc::new(self.clock.clone()))
    }

    /// Create an engine over this simulation's collaborators and clock.
    ///
    /// # Errors
    /// Returns a config error if `config` is invalid.
    pub fn engine(&self, config: EngineConfig) -> EngineResult<MigrationEngine> {
        MigrationEngine::new(self.parts(), config)
    }

    /// Blocks still held exclusively. Zero once the engine has stopped.
    #[must_use]
    pub fn leaked_pins(&self) -> usize {
        self.pool.pinned_count()
    }
}

/// DST simulation harness.
///
/// # Example
///
/// ```rust
/// use tiermig::dst::{SimConfig, Simulation};
/// use tiermig::EngineConfig;
///
/// #[tokio::main(flavor = "current_thread")]
/// async fn main() {
///     let sim = Simulation::new(SimConfig::with_seed(42)).with_migration_faults(0.1);
///
///     sim.run(|env| async move {
///         let mut engine = env.engine(EngineConfig::default().enabled())?;
///         engine.start()?;
///         for _ in 0..50 {
///             tokio::task::yield_now().await;
///         }
///         engine.stop().await?;
///         assert_eq!(env.leaked_pins(), 0);
///         Ok::<(), tiermig::EngineError>(())
///     })
///     .await
///     .unwrap();
/// }
/// ```
pub struct Simulation {
    config: SimConfig,
    fault_configs: Vec<FaultConfig>,
    blocks: usize,
    per_poll_max: usize,
}

impl Simulation {
    /// Create a new simulation with the given configuration.
    #[must_use]
    pub fn new(config: SimConfig) -> Self {
        Self {
            config,
            fault_configs: Vec::new(),
            blocks: SIM_BLOCKS_COUNT_DEFAULT,
            per_poll_max: SIM_CANDIDATES_PER_POLL_DEFAULT,
        }
    }

    /// Register a fault to inject during simulation.
    #[must_use]
    pub fn with_fault(mut self, fault_config: FaultConfig) -> Self {
        self.fault_configs.push(fault_config);
        self
    }

    /// Add poll and histogram fetch failures.
    #[must_use]
    pub fn with_hotness_faults(self, probability: f64) -> Self {
        self.with_fault(FaultConfig::new(FaultType::HotnessPollFail, probability))
            .with_fault(FaultConfig::new(FaultType::HistogramFetchFail, probability))
    }

    /// Add vanished blocks and concurrent pins.
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

    /// Number of slow-tier blocks in the pool.
    ///
    /// # Panics
    /// Panics if `count` is zero.
    #[must_use]
    pub fn with_blocks(mut self, count: usize) -> Self {
        assert!(count > 0, "simulation needs at least one block");
        self.blocks = count;
        self
    }

    /// Upper bound on workload candidates per poll.
    #[must_use]
    pub fn with_candidates_per_poll(mut self, max: usize) -> Self {
        self.per_poll_max = max;
        self
    }

    /// Run the simulation with the given test function.
    ///
    /// # Errors
    /// Returns any error from the test function.
    pub async fn run<F, Fut, E>(self, test_fn: F) -> Result<(), E>
    where
        F: FnOnce(SimEnvironment) -> Fut,
        Fut: Future<Output = Result<(), E>>,
    {
        let seed = self.config.seed();
        let env = self.build();
        let result = test_fn(env).await;
        if result.is_err() {
            tracing::error!(seed, "simulation failed; rerun with DST_SEED={}", seed);
        }
        result
    }

    /// Build the simulation environment without running a test.
    #[must_use]
    pub fn build(self) -> SimEnvironment {
        // Forked RNGs keep the collaborators independent
        let mut rng = DeterministicRng::new(self.config.seed());
        let clock = SimClock::new().with_auto_advance();

        let mut fault_builder = FaultInjectorBuilder::new(rng.fork());
        for fault_config in self.fault_configs {
            fault_builder = fault_builder.with_fault(fault_config);
        }
        let faults = Arc::new(fault_builder.build());

        let mut pool_rng = rng.fork();
        let (pool, heads) = SimBlockPool::new()
            .with_faults(Arc::clone(&faults))
            .with_random_blocks(&mut pool_rng, self.blocks);

        let mut hot_frames = heads;
        hot_frames.extend(
            (0..SIM_UNBACKED_FRAMES_COUNT).map(|i| SIM_UNBACKED_FRAME_BASE + i),
        );

        let source = SimHotnessSource::new(rng.fork())
            .with_faults(Arc::clone(&faults))
            .with_workload(hot_frames.clone(), self.per_poll_max);
        source.set_histogram(vec![0; HISTOGRAM_BINS_COUNT_DEFAULT]);

        SimEnvironment {
            config: self.config,
            clock,
            rng,
            faults,
            source: Arc::new(source),
            pool: Arc::new(pool),
            hot_frames,
        }
    }
}

/// Create a simulation with optional seed.
#[must_use]
pub fn create_simulation(seed: Option<u64>) -> Simulation {
    let config = match seed {
        Some(s) => SimConfig::with_seed(s),
        None => SimConfig::from_env_or_random(),
    };
    Simulation::new(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stats::Counter;
    use tiermig_core::{HotnessSource, Tier};

    async fn run_cycles(engine: &MigrationEngine, cycles: u64) {
        while engine.stats().get(Counter::Cycles) < cycles {
            tokio::task::yield_now().await;
        }
    }

    #[test]
    fn test_build_is_deterministic() {
        let a = Simulation::new(SimConfig::with_seed(7)).build();
        let b = Simulation::new(SimConfig::with_seed(7)).build();
        assert_eq!(a.hot_frames, b.hot_frames);
        assert_eq!(a.pool.frames_in(Tier::Slow), b.pool.frames_in(Tier::Slow));
        assert_eq!(
            a.source.poll_candidates().unwrap(),
            b.source.poll_candidates().unwrap()
        );
    }

    #[test]
    fn test_build_populates_pool() {
        let env = Simulation::new(SimConfig::with_seed(1)).with_blocks(16).build();
        assert_eq!(env.pool.blocks_in(Tier::Slow), 16);
        assert_eq!(env.pool.blocks_in(Tier::Fast), 0);
        assert_eq!(env.hot_frames.len(), 16 + SIM_UNBACKED_FRAMES_COUNT as usize);
        assert!(env.clock.is_auto_advance());
    }

    #[tokio::test]
    async fn test_engine_promotes_blocks() {
        let sim = Simulation::new(SimConfig::with_seed(42)).with_blocks(64);

        sim.run(|env| async move {
            let mut engine = env.engine(EngineConfig::default().enabled())?;
            engine.start()?;
            run_cycles(&engine, 20).await;
            engine.stop().await?;

            assert!(env.pool.blocks_in(Tier::Fast) > 0);
            assert!(env.now_us() >= 20 * EngineConfig::default().scan_interval_us);
            assert_eq!(env.leaked_pins(), 0);
            Ok::<(), crate::EngineError>(())
        })
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn test_faults_never_leak_pins() {
        for seed in [1_u64, 2, 3] {
            let sim = Simulation::new(SimConfig::with_seed(seed))
                .with_hotness_faults(0.2)
                .with_allocator_faults(0.2)
                .with_migration_faults(0.3);

            sim.run(|env| async move {
                let mut engine = env.engine(EngineConfig::default().enabled())?;
                engine.start()?;
                run_cycles(&engine, 30).await;
                engine.stop().await?;

                assert_eq!(env.leaked_pins(), 0, "seed {seed} leaked pins");
                assert!(env.faults.total_injections() > 0);
                Ok::<(), crate::EngineError>(())
            })
            .await
            .unwrap();
        }
    }
}
