//! Migration Engine
//!
//! `TigerStyle`: One owned engine, one worker task, no globals.
//!
//! [`MigrationEngine`] owns the lifecycle: it spawns the control loop on the
//! current tokio runtime, flips the enable gate, and joins the worker on
//! stop. Everything the worker and outside readers share lives in one
//! `Arc<EngineShared>`; [`EngineHandle`] is the cloneable view of it used as
//! the configuration surface.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use tiermig::dst::{SimBlockPool, SimHotnessSource};
//! use tiermig::{EngineConfig, EngineParts, MigrationEngine};
//! use tiermig_core::DeterministicRng;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let pool = Arc::new(SimBlockPool::new());
//!     let source = Arc::new(SimHotnessSource::new(DeterministicRng::new(42)));
//!     let parts = EngineParts::new(source, pool.clone(), pool);
//!
//!     let mut engine = MigrationEngine::new(parts, EngineConfig::default())?;
//!     engine.start()?;
//!     engine.enable();
//!
//!     let handle = engine.handle();
//!     handle.set("quota_limit", "4096")?;
//!     println!("{}", handle.read("migrated_total")?);
//!
//!     engine.stop().await?;
//!     Ok(())
//! }
//! ```

mod worker;

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tiermig_core::{AllocatorBlockPool, Clock, HotnessSource, MigrationPrimitive, TokioClock};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::config::{ConfigError, EngineConfig, EngineTunables, Tunable};
use crate::error::{EngineError, EngineResult};
use crate::stats::{EngineState, EngineStats, StatsSnapshot};

use self::worker::Worker;

// =============================================================================
// Parts
// =============================================================================

/// The collaborators an engine drives.
#[derive(Clone)]
pub struct EngineParts {
    /// Hotness evidence
    pub source: Arc<dyn HotnessSource>,
    /// Allocator view used for validation and release
    pub pool: Arc<dyn AllocatorBlockPool>,
    /// Batch mover
    pub migrator: Arc<dyn MigrationPrimitive>,
    /// Time source the worker sleeps on
    pub clock: Arc<dyn Clock>,
}

impl EngineParts {
    /// Bundle collaborators with the tokio clock.
    #[must_use]
    pub fn new(
        source: Arc<dyn HotnessSource>,
        pool: Arc<dyn AllocatorBlockPool>,
        migrator: Arc<dyn MigrationPrimitive>,
    ) -> Self {
        Self {
            source,
            pool,
            migrator,
            clock: Arc::new(TokioClock::new()),
        }
    }

    /// Use another clock (simulated time in tests).
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }
}

impl fmt::Debug for EngineParts {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EngineParts")
            .field("clock", &self.clock)
            .finish_non_exhaustive()
    }
}

// =============================================================================
// Shared State
// =============================================================================

/// State shared by the worker and every handle.
#[derive(Debug)]
pub(crate) struct EngineShared {
    pub(crate) tunables: EngineTunables,
    pub(crate) stats: EngineStats,
    quota_reset_requested: AtomicBool,
    histogram_reset_requested: AtomicBool,
}

impl EngineShared {
    fn new(config: &EngineConfig) -> Result<Self, ConfigError> {
        Ok(Self {
            tunables: EngineTunables::new(config)?,
            stats: EngineStats::new(),
            quota_reset_requested: AtomicBool::new(false),
            histogram_reset_requested: AtomicBool::new(false),
        })
    }

    fn request_quota_reset(&self) {
        self.quota_reset_requested.store(true, Ordering::Release);
    }

    fn request_histogram_reset(&self) {
        self.histogram_reset_requested.store(true, Ordering::Release);
    }

    pub(crate) fn take_quota_reset(&self) -> bool {
        self.quota_reset_requested.swap(false, Ordering::AcqRel)
    }

    pub(crate) fn take_histogram_reset(&self) -> bool {
        self.histogram_reset_requested.swap(false, Ordering::AcqRel)
    }
}

// =============================================================================
// Handle
// =============================================================================

/// Cloneable configuration and observability surface.
///
/// Values are keyed by tunable name and parsed the way a sysfs attribute
/// would be: integers, plus `true`/`false`/`1`/`0` for flags.
#[derive(Debug, Clone)]
pub struct EngineHandle {
    shared: Arc<EngineShared>,
}

impl EngineHandle {
    /// Current value of a tunable.
    ///
    /// # Errors
    /// Returns `UnknownTunable` if `name` is not a tunable.
    pub fn get(&self, name: &str) -> Result<u64, ConfigError> {
        let tunable: Tunable = name.parse()?;
        Ok(self.shared.tunables.get(tunable))
    }

    /// Parse, validate and write a tunable. Applies from the next cycle.
    ///
    /// # Errors
    /// Returns an error for unknown names, unparsable text or out-of-range
    /// values. Nothing is written on error.
    pub fn set(&self, name: &str, value: &str) -> Result<(), ConfigError> {
        self.shared.tunables.set_str(name, value)
    }

    /// Read any tunable or observable as text.
    ///
    /// # Errors
    /// Returns `UnknownTunable` if no tunable or observable has this name.
    pub fn read(&self, name: &str) -> Result<String, ConfigError> {
        if let Ok(tunable) = name.parse::<Tunable>() {
            return Ok(self.shared.tunables.get(tunable).to_string());
        }
        self.shared
            .stats
            .read(name)
            .ok_or_else(|| ConfigError::unknown_tunable(name))
    }

    /// Copy of every tunable.
    #[must_use]
    pub fn config(&self) -> EngineConfig {
        self.shared.tunables.snapshot()
    }

    /// Serializable view of every observable.
    #[must_use]
    pub fn snapshot(&self) -> StatsSnapshot {
        self.shared.stats.snapshot()
    }

    /// Live counters.
    #[must_use]
    pub fn stats(&self) -> &EngineStats {
        &self.shared.stats
    }

    /// Open the gate.
    pub fn enable(&self) {
        self.shared.tunables.set_enabled(true);
    }

    /// Close the gate. An in-flight cycle completes first.
    pub fn disable(&self) {
        self.shared.tunables.set_enabled(false);
    }

    /// Whether the gate is open.
    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.shared.tunables.is_enabled()
    }

    /// Start a new quota period at the next cycle.
    pub fn reset_quota(&self) {
        self.shared.request_quota_reset();
    }

    /// Drop the histogram and error bound at the next cycle.
    pub fn reset_histogram(&self) {
        self.shared.request_histogram_reset();
    }

    /// Worker state.
    #[must_use]
    pub fn state(&self) -> EngineState {
        self.shared.stats.state()
    }
}

// =============================================================================
// Engine
// =============================================================================

/// The background migration engine.
pub struct MigrationEngine {
    shared: Arc<EngineShared>,
    parts: Option<EngineParts>,
    stop_tx: watch::Sender<bool>,
    worker: Option<JoinHandle<()>>,
}

impl fmt::Debug for MigrationEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MigrationEngine")
            .field("state", &self.shared.stats.state())
            .field("started", &self.worker.is_some())
            .finish_non_exhaustive()
    }
}

impl MigrationEngine {
    /// Build an engine. It starts `Disabled` and not running.
    ///
    /// # Errors
    /// Returns `EngineError::Config` if `config` fails validation.
    pub fn new(parts: EngineParts, config: EngineConfig) -> EngineResult<Self> {
        let shared = Arc::new(EngineShared::new(&config)?);
        shared.stats.set_state(EngineState::Disabled);
        let (stop_tx, _) = watch::channel(false);

        Ok(Self {
            shared,
            parts: Some(parts),
            stop_tx,
            worker: None,
        })
    }

    /// Spawn the worker on the current tokio runtime.
    ///
    /// # Errors
    /// Returns `WorkerSpawn` outside a runtime (the engine stays usable and
    /// `Disabled`), or `AlreadyStarted` on a second call.
    pub fn start(&mut self) -> EngineResult<()> {
        if self.worker.is_some() || self.parts.is_none() {
            return Err(EngineError::AlreadyStarted);
        }
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|err| EngineError::worker_spawn(err.to_string()))?;

        let parts = self.parts.take().ok_or(EngineError::AlreadyStarted)?;
        let worker = Worker::new(parts, Arc::clone(&self.shared), self.stop_tx.subscribe());
        self.worker = Some(runtime.spawn(worker.run()));

        info!(
            enabled = self.shared.tunables.is_enabled(),
            "migration engine started"
        );

        // Postcondition
        assert!(self.parts.is_none() && self.worker.is_some());
        Ok(())
    }

    /// Open the gate and wake the worker.
    pub fn enable(&self) {
        self.shared.tunables.set_enabled(true);
    }

    /// Close the gate. The in-flight cycle, if any, completes first.
    pub fn disable(&self) {
        self.shared.tunables.set_enabled(false);
    }

    /// Stop the worker and wait for it to exit.
    ///
    /// # Errors
    /// Returns `WorkerPanicked` if the worker died on an invariant violation.
    pub async fn stop(&mut self) -> EngineResult<()> {
        self.stop_tx.send_replace(true);

        let Some(worker) = self.worker.take() else {
            self.shared.stats.set_state(EngineState::Stopped);
            return Ok(());
        };

        let result = match worker.await {
            Ok(()) => Ok(()),
            Err(err) if err.is_panic() => {
                let reason = panic_reason(err.into_panic());
                warn!(reason = %reason, "migration worker panicked");
                Err(EngineError::worker_panicked(reason))
            }
            Err(err) => {
                warn!(error = %err, "migration worker cancelled");
                Ok(())
            }
        };

        self.shared.stats.set_state(EngineState::Stopped);
        info!("migration engine stopped");
        result
    }

    /// Start a new quota period at the next cycle.
    pub fn reset_quota(&self) {
        self.shared.request_quota_reset();
    }

    /// Drop the histogram and error bound at the next cycle.
    pub fn reset_histogram(&self) {
        self.shared.request_histogram_reset();
    }

    /// Cloneable configuration surface.
    #[must_use]
    pub fn handle(&self) -> EngineHandle {
        EngineHandle {
            shared: Arc::clone(&self.shared),
        }
    }

    /// Live counters.
    #[must_use]
    pub fn stats(&self) -> &EngineStats {
        &self.shared.stats
    }

    /// Worker state.
    #[must_use]
    pub fn state(&self) -> EngineState {
        self.shared.stats.state()
    }

    /// Whether `start` succeeded and `stop` has not been called.
    #[must_use]
    pub fn is_started(&self) -> bool {
        self.worker.is_some()
    }
}

impl Drop for MigrationEngine {
    fn drop(&mut self) {
        self.stop_tx.send_replace(true);
    }
}

fn panic_reason(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        String::from("unknown panic")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dst::{SimBlockPool, SimHotnessSource};
    use tiermig_core::DeterministicRng;

    fn parts() -> EngineParts {
        let pool = Arc::new(SimBlockPool::new());
        let source = Arc::new(SimHotnessSource::new(DeterministicRng::new(42)));
        EngineParts::new(source, pool.clone(), pool)
    }

    #[test]
    fn test_new_starts_disabled() {
        let engine = MigrationEngine::new(parts(), EngineConfig::default()).unwrap();
        assert_eq!(engine.state(), EngineState::Disabled);
        assert!(!engine.is_started());
    }

    #[test]
    fn test_new_rejects_invalid_config() {
        let config = EngineConfig::default().with_scan_interval_us(0);
        let err = MigrationEngine::new(parts(), config).unwrap_err();
        assert!(matches!(err, EngineError::Config(_)));
    }

    #[test]
    fn test_start_without_runtime() {
        let mut engine = MigrationEngine::new(parts(), EngineConfig::default()).unwrap();

        let err = engine.start().unwrap_err();

        assert!(matches!(err, EngineError::WorkerSpawn { .. }));
        assert_eq!(engine.state(), EngineState::Disabled);
        assert!(!engine.is_started());
    }

    #[tokio::test]
    async fn test_start_twice() {
        let mut engine = MigrationEngine::new(parts(), EngineConfig::default()).unwrap();
        engine.start().unwrap();
        assert!(matches!(engine.start(), Err(EngineError::AlreadyStarted)));

        engine.stop().await.unwrap();
        assert_eq!(engine.state(), EngineState::Stopped);
        assert!(matches!(engine.start(), Err(EngineError::AlreadyStarted)));
    }

    #[tokio::test]
    async fn test_stop_without_start() {
        let mut engine = MigrationEngine::new(parts(), EngineConfig::default()).unwrap();
        engine.stop().await.unwrap();
        assert_eq!(engine.state(), EngineState::Stopped);
    }

    #[test]
    fn test_handle_config_map() {
        let engine = MigrationEngine::new(parts(), EngineConfig::default()).unwrap();
        let handle = engine.handle();

        handle.set("hotness_threshold", "7").unwrap();
        assert_eq!(handle.get("hotness_threshold").unwrap(), 7);
        assert_eq!(handle.config().hotness_threshold, 7);

        handle.set("adaptive_threshold", "true").unwrap();
        assert_eq!(handle.read("adaptive_threshold").unwrap(), "1");

        assert!(handle.set("percentile", "101").is_err());
        assert!(handle.set("no_such_knob", "1").is_err());
        assert!(handle.get("migrated_total").is_err());
        assert_eq!(handle.read("migrated_total").unwrap(), "0");
        assert_eq!(handle.read("state").unwrap(), "disabled");
        assert!(handle.read("no_such_value").is_err());
    }

    #[test]
    fn test_handle_gate() {
        let engine = MigrationEngine::new(parts(), EngineConfig::default()).unwrap();
        let handle = engine.handle();

        handle.enable();
        assert!(handle.is_enabled());
        assert_eq!(handle.get("enabled").unwrap(), 1);
        engine.disable();
        assert!(!handle.is_enabled());
        handle.set("enabled", "on").unwrap();
        assert!(handle.is_enabled());
    }

    #[test]
    fn test_reset_requests_are_consumed_once() {
        let engine = MigrationEngine::new(parts(), EngineConfig::default()).unwrap();
        engine.reset_quota();
        assert!(engine.shared.take_quota_reset());
        assert!(!engine.shared.take_quota_reset());

        engine.handle().reset_histogram();
        assert!(engine.shared.take_histogram_reset());
        assert!(!engine.shared.take_histogram_reset());
    }

    #[test]
    fn test_panic_reason() {
        assert_eq!(panic_reason(Box::new("boom")), "boom");
        assert_eq!(panic_reason(Box::new(String::from("bang"))), "bang");
        assert_eq!(panic_reason(Box::new(7_u8)), "unknown panic");
    }
}
