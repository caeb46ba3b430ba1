//! DST - Deterministic Simulation Testing
//!
//! TigerBeetle/FoundationDB-style simulation primitives shared by every
//! simulated collaborator of the migration engine.
//!
//! # Philosophy
//!
//! > "If you're not testing with fault injection, you're not testing."
//!
//! # Usage
//!
//! ```rust
//! use tiermig_core::dst::{op, DeterministicRng, FaultConfig, FaultInjectorBuilder, FaultType, SimConfig};
//!
//! let config = SimConfig::with_seed(42);
//! let faults = FaultInjectorBuilder::new(DeterministicRng::new(config.seed()))
//!     .with_fault(FaultConfig::new(FaultType::MigrationTotalFail, 1.0))
//!     .build();
//!
//! assert_eq!(faults.should_inject(op::MIGRATE), Some(FaultType::MigrationTotalFail));
//! ```
//!
//! Run with explicit seed for reproducibility:
//! ```bash
//! DST_SEED=12345 cargo test
//! ```

mod clock;
mod config;
mod fault;
mod property;
mod rng;

pub use clock::SimClock;
pub use config::{SimConfig, DST_SEED_ENV};
pub use fault::{op, FaultConfig, FaultInjector, FaultInjectorBuilder, FaultType};
pub use property::{
    run_property_tests, test_seeds, PropertyTest, PropertyTestFailure, PropertyTestResult,
    PropertyTestable, TimeAdvanceConfig,
};
pub use rng::DeterministicRng;
