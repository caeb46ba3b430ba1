//! DST Tests for the Engine Under Faults
//!
//! `TigerStyle`: Every collaborator fails, nothing leaks, every candidate is
//! accounted for.
//!
//! Runs the whole engine inside a `Simulation`: one seed drives the block
//! layout, the workload and every injected fault. Simulated time advances
//! itself, so hundreds of cycles take milliseconds.

use tiermig::dst::{test_seeds, SimConfig, SimEnvironment, Simulation};
use tiermig::{Counter, EngineConfig, EngineError, MigrationEngine, QuotaGate, StatsSnapshot};

// =============================================================================
// Helpers
// =============================================================================

async fn run_cycles(engine: &MigrationEngine, cycles: u64) {
    while engine.stats().get(Counter::Cycles) < cycles {
        tokio::task::yield_now().await;
    }
}

async fn run_engine(
    env: &SimEnvironment,
    config: EngineConfig,
    cycles: u64,
) -> Result<StatsSnapshot, EngineError> {
    let mut engine = env.engine(config)?;
    engine.start()?;
    run_cycles(&engine, cycles).await;
    engine.stop().await?;
    Ok(engine.handle().snapshot())
}

fn rejected(snapshot: &StatsSnapshot) -> u64 {
    [
        Counter::RejectedAddressNotBacked,
        Counter::RejectedNotMovable,
        Counter::RejectedAlreadyPinned,
        Counter::RejectedUnevictable,
    ]
    .into_iter()
    .map(|c| snapshot.counter(c))
    .sum()
}

/// Every polled candidate ends up migrated, handed back, deferred or rejected.
fn assert_conserved(snapshot: &StatsSnapshot, seed: u64) {
    let polled = snapshot.counter(Counter::PolledCandidates);
    let accounted = snapshot.counter(Counter::MigratedTotal)
        + snapshot.counter(Counter::MigrationRemaining)
        + snapshot.counter(Counter::QuotaDeferred)
        + rejected(snapshot);
    assert_eq!(polled, accounted, "seed {seed}: candidates unaccounted for");
}

fn config() -> EngineConfig {
    EngineConfig::default()
        .enabled()
        .with_histogram(5, 64, 50)
        .with_counter_reset_period(3)
}

// =============================================================================
// Tests
// =============================================================================

#[tokio::test]
async fn test_no_leaked_pins_under_all_faults() {
    for seed in test_seeds(5) {
        let sim = Simulation::new(SimConfig::with_seed(seed))
            .with_hotness_faults(0.1)
            .with_allocator_faults(0.1)
            .with_migration_faults(0.2);

        sim.run(|env| async move {
            let snapshot = run_engine(&env, config(), 100).await?;

            assert_eq!(env.leaked_pins(), 0, "seed {seed}: leaked pins");
            assert_conserved(&snapshot, seed);
            assert_eq!(
                env.pool.migrated_blocks(),
                snapshot.counter(Counter::MigratedTotal),
                "seed {seed}: pool and engine disagree"
            );
            assert!(snapshot.counter(Counter::PollFailures) > 0);
            assert!(snapshot.counter(Counter::RejectedAddressNotBacked) > 0);
            Ok::<(), EngineError>(())
        })
        .await
        .unwrap();
    }
}

#[tokio::test]
async fn test_total_migration_failure_hands_everything_back() {
    let sim = Simulation::new(SimConfig::with_seed(11))
        .with_fault(tiermig::dst::FaultConfig::new(
            tiermig::dst::FaultType::MigrationTotalFail,
            1.0,
        ));

    sim.run(|env| async move {
        let snapshot = run_engine(&env, config(), 40).await?;

        assert_eq!(snapshot.counter(Counter::MigratedTotal), 0);
        assert!(snapshot.counter(Counter::MigrationRemaining) > 0);
        assert_eq!(
            snapshot.counter(Counter::MigrationFailures),
            snapshot.counter(Counter::MigrationBatches)
        );
        assert_eq!(env.leaked_pins(), 0);
        assert_conserved(&snapshot, 11);
        Ok::<(), EngineError>(())
    })
    .await
    .unwrap();
}

#[tokio::test]
async fn test_quota_bound_holds_across_cycles() {
    let sim = Simulation::new(SimConfig::with_seed(3)).with_candidates_per_poll(64);

    sim.run(|env| async move {
        // Period 0: only an explicit reset reopens the gate
        let snapshot = run_engine(&env, config().with_quota(10, 0), 60).await?;

        assert_eq!(snapshot.counter(Counter::MigratedTotal), 10);
        assert_eq!(snapshot.quota.migrated_this_period, 10);
        assert_eq!(snapshot.quota.gate, QuotaGate::Closed);
        assert!(snapshot.counter(Counter::QuotaDeferred) > 0);
        assert_eq!(env.leaked_pins(), 0);
        Ok::<(), EngineError>(())
    })
    .await
    .unwrap();
}

#[tokio::test]
async fn test_same_seed_same_outcome() {
    let mut outcomes = Vec::new();
    for _ in 0..2 {
        let env = Simulation::new(SimConfig::with_seed(42))
            .with_allocator_faults(0.1)
            .with_migration_faults(0.1)
            .build();
        let snapshot = run_engine(&env, config(), 50).await.unwrap();
        outcomes.push((
            snapshot.counter(Counter::MigratedTotal),
            snapshot.counter(Counter::PolledCandidates),
            env.pool.frames_in(tiermig::Tier::Fast),
        ));
    }
    assert_eq!(outcomes[0], outcomes[1]);
}
