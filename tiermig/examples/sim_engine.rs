//! Simulated Engine Run
//!
//! Drives the migration engine against a seeded simulation with a sprinkle
//! of faults, then prints the final statistics as JSON.
//!
//! ```bash
//! DST_SEED=42 RUST_LOG=tiermig=debug cargo run -p tiermig --example sim_engine
//! ```

use tiermig::dst::create_simulation;
use tiermig::telemetry::{init_tracing, TelemetryConfig};
use tiermig::{Counter, EngineConfig, Tier};

const CYCLES: u64 = 200;

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    let _guard = init_tracing(TelemetryConfig::default())?;

    let env = create_simulation(None)
        .with_allocator_faults(0.05)
        .with_migration_faults(0.05)
        .with_hotness_faults(0.02)
        .build();
    println!("seed: {}", env.config.seed());

    let config = EngineConfig::default()
        .enabled()
        .with_quota(512, 1_000_000)
        .with_histogram(20, 64, 90)
        .with_adaptive_threshold(true);
    let mut engine = env.engine(config)?;
    let handle = engine.handle();
    engine.start()?;

    while handle.stats().get(Counter::Cycles) < CYCLES {
        tokio::task::yield_now().await;
    }
    engine.stop().await?;

    println!(
        "simulated {}ms, {} blocks in the fast tier, {} pinned",
        env.now_us() / 1_000,
        env.pool.blocks_in(Tier::Fast),
        env.leaked_pins()
    );
    println!("{}", handle.snapshot().to_json()?);
    Ok(())
}
