//! # Tiermig
//!
//! A tiered-memory migration engine with deterministic simulation testing.
//!
//! A background worker repeatedly asks a hotness source which physical
//! addresses in the slow tier are hot, validates each against the
//! allocator, throttles the survivors with a per-period quota, and hands
//! them to a batch migration primitive. A periodic histogram of hotness
//! samples yields an error bound that can keep the threshold honest.
//!
//! ## Quick Start
//!
//! ```rust
//! use tiermig::dst::{SimConfig, Simulation};
//! use tiermig::EngineConfig;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> Result<(), tiermig::EngineError> {
//! let env = Simulation::new(SimConfig::with_seed(42)).build();
//! let mut engine = env.engine(EngineConfig::default())?;
//! engine.start()?;
//!
//! let handle = engine.handle();
//! handle.set("scan_interval_us", "5000")?;
//! handle.set("quota_limit", "1024")?;
//! handle.enable();
//!
//! for _ in 0..20 {
//!     tokio::task::yield_now().await;
//! }
//! println!("{}", handle.read("migrated_total")?);
//!
//! engine.stop().await?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │  MigrationEngine / EngineHandle   │ lifecycle, tunables │
//! ├─────────────────────────────────────────────────────────┤
//! │  Worker: schedule → sync → poll → validate → admit →    │
//! │          migrate → window / counter reset / histogram   │
//! ├─────────────────────────────────────────────────────────┤
//! │  CandidateValidator   │ resolve, pin, evictability      │
//! │  QuotaController      │ per-period admission            │
//! │  MigrationBatchExecutor │ one batch, no leaked pins     │
//! │  HistogramEstimator   │ percentile error bound          │
//! │  HotnessController    │ threshold and sample periods    │
//! ├─────────────────────────────────────────────────────────┤
//! │  tiermig-core traits  │ HotnessSource, AllocatorBlockPool,
//! │                       │ MigrationPrimitive, Clock       │
//! ├─────────────────────────────────────────────────────────┤
//! │  DST Framework        │ SimHotnessSource, SimBlockPool  │
//! └─────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Simulation-First Philosophy
//!
//! > "If you're not testing with fault injection, you're not testing."
//!
//! Every collaborator has a seeded simulation; see [`dst::Simulation`].
//!
//! ## Feature Flags
//!
//! - `opentelemetry` - OTLP span export from [`telemetry::init_tracing`]

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod config;
pub mod constants;
pub mod controller;
pub mod dst;
pub mod engine;
pub mod error;
pub mod histogram;
pub mod migration;
pub mod queue;
pub mod quota;
pub mod schedule;
pub mod stats;
pub mod telemetry;
pub mod validator;

// Re-export common types
pub use config::{ConfigError, EngineConfig, EngineTunables, Tunable};
pub use controller::{HotnessController, SyncReport};
pub use engine::{EngineHandle, EngineParts, MigrationEngine};
pub use error::{EngineError, EngineResult};
pub use histogram::{HistogramError, HistogramEstimator};
pub use migration::{BatchReport, MigrationBatch, MigrationBatchExecutor};
pub use queue::{CandidateQueue, QueueFedSource};
pub use quota::{QuotaController, QuotaGate, QuotaState};
pub use schedule::{CycleSchedule, Tick};
pub use stats::{Counter, EngineState, EngineStats, RollingCounter, StatsSnapshot};
pub use telemetry::{init_tracing, TelemetryConfig, TelemetryError, TelemetryGuard};
pub use validator::{CandidateValidator, RejectReason, ReleasedBlock, ValidatedBlock};

// Contracts the engine is generic over
pub use tiermig_core::{
    AllocatorBlockPool, BandwidthStats, BlockHandle, Clock, Histogram, HotCandidate,
    HotnessError, HotnessSource, MigrateOutcome, MigrationError, MigrationPrimitive, Tier,
    TokioClock,
};
