//! Tiermig Core - Contracts and Simulation Primitives
//!
//! `TigerStyle` foundation for the tiered-memory migration engine.
//!
//! # Philosophy
//!
//! The engine depends on three things it does not own: a hotness signal, the
//! allocator's block pool, and a migration primitive. This crate pins those
//! down as traits, together with the value types that cross them, so the
//! engine can be driven by real hardware or by a seeded simulation.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │                tiermig-core                   │
//! ├──────────────────────────────────────────────┤
//! │  HotnessSource       │ candidates, histogram  │
//! │  AllocatorBlockPool  │ resolve, pin, release  │
//! │  MigrationPrimitive  │ batch move to a tier   │
//! │  Clock               │ tokio or simulated     │
//! ├──────────────────────────────────────────────┤
//! │  DST Framework       │ seeds, faults, props   │
//! └──────────────────────────────────────────────┘
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod block;
pub mod constants;
pub mod dst;
pub mod hotness;
pub mod time;

// Re-export common types
pub use block::{
    AcquireError, AllocatorBlockPool, BlockHandle, MigrateOutcome, MigrationError,
    MigrationPrimitive, Tier,
};
pub use constants::*;
pub use dst::{
    run_property_tests, test_seeds, DeterministicRng, FaultConfig, FaultInjector,
    FaultInjectorBuilder, FaultType, PropertyTest, PropertyTestFailure, PropertyTestResult,
    PropertyTestable, SimClock, SimConfig, TimeAdvanceConfig,
};
pub use hotness::{BandwidthStats, HotCandidate, HotnessError, HotnessSource, Histogram};
pub use time::{Clock, TokioClock};
