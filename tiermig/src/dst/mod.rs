//! DST - Deterministic Simulation Testing
//!
//! Simulated collaborators for the migration engine, built on the seeded
//! primitives in [`tiermig_core::dst`].
//!
//! - [`SimHotnessSource`] - seeded workload, histogram, fault points
//! - [`SimBlockPool`] - allocator and migration primitive in one
//! - [`Simulation`] - wires both to one clock and one fault injector
//!
//! Run with explicit seed for reproducibility:
//! ```bash
//! DST_SEED=12345 cargo test -p tiermig
//! ```

mod hotness;
mod pool;
mod simulation;

pub use hotness::SimHotnessSource;
pub use pool::{BlockView, SimBlockPool};
pub use simulation::{create_simulation, SimEnvironment, Simulation};

pub use tiermig_core::dst::{
    op, run_property_tests, test_seeds, DeterministicRng, FaultConfig, FaultInjector,
    FaultInjectorBuilder, FaultType, PropertyTest, PropertyTestFailure, PropertyTestResult,
    PropertyTestable, SimClock, SimConfig, TimeAdvanceConfig, DST_SEED_ENV,
};
