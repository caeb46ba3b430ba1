//! Engine Statistics and Observables
//!
//! `TigerStyle`: Every absorbed failure is counted. Nothing is silently dropped.
//!
//! The worker is the only writer. Counters and scalar observables are
//! atomics, so readers on other threads never wait on the worker. The
//! published histogram sits behind a reader-writer lock the worker takes
//! only for the copy after a successful refresh.

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, AtomicU8, Ordering};
use tiermig_core::{BandwidthStats, Histogram};

use crate::quota::{QuotaGate, QuotaState};
use crate::validator::RejectReason;

// =============================================================================
// EngineState
// =============================================================================

/// Lifecycle state of the engine worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[repr(u8)]
pub enum EngineState {
    /// Gate closed; no polling
    Disabled = 0,
    /// Actively cycling
    Running = 1,
    /// Worker has exited
    Stopped = 2,
}

impl EngineState {
    /// Stable lowercase name.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Disabled => "disabled",
            Self::Running => "running",
            Self::Stopped => "stopped",
        }
    }

    fn from_u8(raw: u8) -> Self {
        match raw {
            1 => Self::Running,
            2 => Self::Stopped,
            _ => Self::Disabled,
        }
    }
}

impl fmt::Display for EngineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// Counter
// =============================================================================

/// Named monotonically increasing counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Counter {
    /// Completed scanning cycles
    Cycles,
    /// Cycles that started after their deadline
    LateCycles,
    /// Candidates returned by the source
    PolledCandidates,
    /// Failed candidate polls
    PollFailures,
    /// Candidates that passed validation
    Validated,
    /// Rejected: address not backed by the pool
    RejectedAddressNotBacked,
    /// Rejected: block not on a reclaim list
    RejectedNotMovable,
    /// Rejected: block pinned elsewhere
    RejectedAlreadyPinned,
    /// Rejected: block unevictable
    RejectedUnevictable,
    /// Candidates not attempted because the quota was exhausted
    QuotaDeferred,
    /// Blocks migrated to the fast tier
    MigratedTotal,
    /// Blocks handed back after a partial or failed batch
    MigrationRemaining,
    /// Batches that failed or handed blocks back
    MigrationFailures,
    /// Batches submitted to the migration primitive
    MigrationBatches,
    /// Successful histogram refreshes
    HistogramRefreshes,
    /// Failed histogram refreshes
    HistogramFetchFailures,
    /// Source counter resets
    CounterResets,
    /// Threshold read-backs that disagreed with the written value
    ThresholdMismatches,
}

impl Counter {
    /// Number of counters.
    pub const COUNT: usize = 18;

    /// Every counter, in display order.
    pub const ALL: [Counter; Self::COUNT] = [
        Self::Cycles,
        Self::LateCycles,
        Self::PolledCandidates,
        Self::PollFailures,
        Self::Validated,
        Self::RejectedAddressNotBacked,
        Self::RejectedNotMovable,
        Self::RejectedAlreadyPinned,
        Self::RejectedUnevictable,
        Self::QuotaDeferred,
        Self::MigratedTotal,
        Self::MigrationRemaining,
        Self::MigrationFailures,
        Self::MigrationBatches,
        Self::HistogramRefreshes,
        Self::HistogramFetchFailures,
        Self::CounterResets,
        Self::ThresholdMismatches,
    ];

    /// Stable external name.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Cycles => "cycles",
            Self::LateCycles => "late_cycles",
            Self::PolledCandidates => "polled_candidates",
            Self::PollFailures => "poll_failures",
            Self::Validated => "validated",
            Self::RejectedAddressNotBacked => "rejected_address_not_backed",
            Self::RejectedNotMovable => "rejected_not_movable",
            Self::RejectedAlreadyPinned => "rejected_already_pinned",
            Self::RejectedUnevictable => "rejected_unevictable",
            Self::QuotaDeferred => "quota_deferred",
            Self::MigratedTotal => "migrated_total",
            Self::MigrationRemaining => "migration_remaining",
            Self::MigrationFailures => "migration_failures",
            Self::MigrationBatches => "migration_batches",
            Self::HistogramRefreshes => "histogram_refreshes",
            Self::HistogramFetchFailures => "histogram_fetch_failures",
            Self::CounterResets => "counter_resets",
            Self::ThresholdMismatches => "threshold_mismatches",
        }
    }

    /// Counter charged for a validation rejection.
    #[must_use]
    pub fn for_reject(reason: RejectReason) -> Self {
        match reason {
            RejectReason::AddressNotBacked => Self::RejectedAddressNotBacked,
            RejectReason::BlockNotMovable => Self::RejectedNotMovable,
            RejectReason::AlreadyPinned => Self::RejectedAlreadyPinned,
            RejectReason::BlockUnevictable => Self::RejectedUnevictable,
        }
    }

    /// Look a counter up by name.
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|c| c.as_str() == name)
    }

    fn index(self) -> usize {
        self as usize
    }
}

// =============================================================================
// RollingCounter
// =============================================================================

/// Counter that is periodically read and zeroed.
#[derive(Debug, Default)]
pub struct RollingCounter {
    window: AtomicU64,
}

impl RollingCounter {
    /// Add to the current window.
    pub fn add(&self, n: u64) {
        self.window.fetch_add(n, Ordering::Relaxed);
    }

    /// Value accumulated in the current window.
    #[must_use]
    pub fn current(&self) -> u64 {
        self.window.load(Ordering::Relaxed)
    }

    /// Close the window: return its total and start a new one at zero.
    pub fn take(&self) -> u64 {
        self.window.swap(0, Ordering::Relaxed)
    }
}

// =============================================================================
// EngineStats
// =============================================================================

const ERROR_BOUND_NONE: u64 = u64::MAX;

/// Counters and published observables of one engine.
#[derive(Debug)]
pub struct EngineStats {
    counters: [AtomicU64; Counter::COUNT],
    window: RollingCounter,
    last_window_migrated: AtomicU64,
    error_bound: AtomicU32,
    last_valid_error_bound: AtomicU64,
    applied_threshold: AtomicU32,
    quota_migrated: AtomicU64,
    quota_limit: AtomicU64,
    quota_period_reset_at_us: AtomicU64,
    quota_gate_open: AtomicBool,
    bandwidth_total: AtomicU64,
    bandwidth_read: AtomicU64,
    bandwidth_write: AtomicU64,
    state: AtomicU8,
    histogram: RwLock<Histogram>,
}

impl Default for EngineStats {
    fn default() -> Self {
        Self::new()
    }
}

impl EngineStats {
    /// All counters at zero, engine `Disabled`.
    #[must_use]
    pub fn new() -> Self {
        Self {
            counters: std::array::from_fn(|_| AtomicU64::new(0)),
            window: RollingCounter::default(),
            last_window_migrated: AtomicU64::new(0),
            error_bound: AtomicU32::new(0),
            last_valid_error_bound: AtomicU64::new(ERROR_BOUND_NONE),
            applied_threshold: AtomicU32::new(0),
            quota_migrated: AtomicU64::new(0),
            quota_limit: AtomicU64::new(0),
            quota_period_reset_at_us: AtomicU64::new(0),
            quota_gate_open: AtomicBool::new(true),
            bandwidth_total: AtomicU64::new(0),
            bandwidth_read: AtomicU64::new(0),
            bandwidth_write: AtomicU64::new(0),
            state: AtomicU8::new(EngineState::Disabled as u8),
            histogram: RwLock::new(Histogram::default()),
        }
    }

    // -------------------------------------------------------------------------
    // Counters
    // -------------------------------------------------------------------------

    /// Add to a counter.
    pub fn add(&self, counter: Counter, n: u64) {
        self.counters[counter.index()].fetch_add(n, Ordering::Relaxed);
    }

    /// Increment a counter.
    pub fn incr(&self, counter: Counter) {
        self.add(counter, 1);
    }

    /// Read a counter.
    #[must_use]
    pub fn get(&self, counter: Counter) -> u64 {
        self.counters[counter.index()].load(Ordering::Relaxed)
    }

    /// Rolling migrated-blocks window.
    #[must_use]
    pub fn window(&self) -> &RollingCounter {
        &self.window
    }

    /// Close the rolling window and publish its total.
    pub fn close_window(&self) -> u64 {
        let total = self.window.take();
        self.last_window_migrated.store(total, Ordering::Relaxed);
        total
    }

    /// Total of the last closed window.
    #[must_use]
    pub fn last_window_migrated(&self) -> u64 {
        self.last_window_migrated.load(Ordering::Relaxed)
    }

    // -------------------------------------------------------------------------
    // Observables
    // -------------------------------------------------------------------------

    /// Publish the error bound (`None` = undefined, reported as 0).
    pub fn publish_error_bound(&self, bound: Option<u32>) {
        self.error_bound.store(bound.unwrap_or(0), Ordering::Relaxed);
        if let Some(bound) = bound {
            self.last_valid_error_bound
                .store(u64::from(bound), Ordering::Relaxed);
        }
    }

    /// Forget the error bound entirely (explicit histogram reset).
    pub fn clear_error_bound(&self) {
        self.error_bound.store(0, Ordering::Relaxed);
        self.last_valid_error_bound
            .store(ERROR_BOUND_NONE, Ordering::Relaxed);
    }

    /// Current error bound (0 when undefined).
    #[must_use]
    pub fn error_bound(&self) -> u32 {
        self.error_bound.load(Ordering::Relaxed)
    }

    /// Last defined error bound, if any refresh produced one.
    #[must_use]
    pub fn last_valid_error_bound(&self) -> Option<u32> {
        let raw = self.last_valid_error_bound.load(Ordering::Relaxed);
        u32::try_from(raw).ok()
    }

    /// Publish the threshold currently applied to the source.
    pub fn publish_threshold(&self, threshold: u32) {
        self.applied_threshold.store(threshold, Ordering::Relaxed);
    }

    /// Threshold currently applied to the source.
    #[must_use]
    pub fn applied_threshold(&self) -> u32 {
        self.applied_threshold.load(Ordering::Relaxed)
    }

    /// Publish the quota state.
    pub fn publish_quota(&self, quota: &QuotaState) {
        self.quota_migrated
            .store(quota.migrated_this_period, Ordering::Relaxed);
        self.quota_limit.store(quota.limit, Ordering::Relaxed);
        self.quota_period_reset_at_us
            .store(quota.period_reset_at_us, Ordering::Relaxed);
        self.quota_gate_open
            .store(quota.gate == QuotaGate::Open, Ordering::Relaxed);
    }

    /// Last published quota state.
    #[must_use]
    pub fn quota(&self) -> QuotaState {
        QuotaState {
            migrated_this_period: self.quota_migrated.load(Ordering::Relaxed),
            limit: self.quota_limit.load(Ordering::Relaxed),
            period_reset_at_us: self.quota_period_reset_at_us.load(Ordering::Relaxed),
            gate: if self.quota_gate_open.load(Ordering::Relaxed) {
                QuotaGate::Open
            } else {
                QuotaGate::Closed
            },
        }
    }

    /// Publish sampled bandwidth.
    pub fn publish_bandwidth(&self, bandwidth: BandwidthStats) {
        self.bandwidth_total.store(bandwidth.total, Ordering::Relaxed);
        self.bandwidth_read.store(bandwidth.read, Ordering::Relaxed);
        self.bandwidth_write.store(bandwidth.write, Ordering::Relaxed);
    }

    /// Last sampled bandwidth.
    #[must_use]
    pub fn bandwidth(&self) -> BandwidthStats {
        BandwidthStats {
            total: self.bandwidth_total.load(Ordering::Relaxed),
            read: self.bandwidth_read.load(Ordering::Relaxed),
            write: self.bandwidth_write.load(Ordering::Relaxed),
        }
    }

    /// Publish the engine state.
    pub fn set_state(&self, state: EngineState) {
        self.state.store(state as u8, Ordering::Release);
    }

    /// Current engine state.
    #[must_use]
    pub fn state(&self) -> EngineState {
        EngineState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Publish a copy of the last good histogram.
    pub fn publish_histogram(&self, histogram: &Histogram) {
        self.histogram.write().clone_from(histogram);
    }

    /// Copy of the last good histogram.
    #[must_use]
    pub fn histogram(&self) -> Histogram {
        self.histogram.read().clone()
    }

    /// Read one observable or counter by name, formatted for display.
    #[must_use]
    pub fn read(&self, name: &str) -> Option<String> {
        if let Some(counter) = Counter::from_name(name) {
            return Some(self.get(counter).to_string());
        }

        let value = match name {
            "error_bound" => self.error_bound().to_string(),
            "last_valid_error_bound" => self.last_valid_error_bound().unwrap_or(0).to_string(),
            "last_window_migrated" => self.last_window_migrated().to_string(),
            "applied_threshold" => self.applied_threshold().to_string(),
            "quota_migrated" => self.quota().migrated_this_period.to_string(),
            "quota_gate" => self.quota().gate.as_str().to_string(),
            "quota_period_reset_at_us" => self.quota().period_reset_at_us.to_string(),
            "bandwidth_total" => self.bandwidth().total.to_string(),
            "bandwidth_read" => self.bandwidth().read.to_string(),
            "bandwidth_write" => self.bandwidth().write.to_string(),
            "state" => self.state().as_str().to_string(),
            "histogram" => self
                .histogram()
                .bins()
                .iter()
                .map(u64::to_string)
                .collect::<Vec<_>>()
                .join(" "),
            _ => return None,
        };
        Some(value)
    }

    /// Consistent-enough copy of everything for export.
    ///
    /// Each value is read atomically; the set is not a single atomic cut.
    #[must_use]
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            state: self.state(),
            counters: Counter::ALL
                .iter()
                .map(|c| (c.as_str().to_string(), self.get(*c)))
                .collect(),
            last_window_migrated: self.last_window_migrated(),
            error_bound: self.error_bound(),
            last_valid_error_bound: self.last_valid_error_bound(),
            applied_threshold: self.applied_threshold(),
            quota: self.quota(),
            bandwidth: self.bandwidth(),
            histogram: self.histogram().bins().to_vec(),
        }
    }
}

// =============================================================================
// StatsSnapshot
// =============================================================================

/// Serializable read-only view of an engine's statistics.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatsSnapshot {
    /// Engine state
    pub state: EngineState,
    /// Every named counter
    pub counters: BTreeMap<String, u64>,
    /// Migrated blocks in the last closed window
    pub last_window_migrated: u64,
    /// Current error bound (0 when undefined)
    pub error_bound: u32,
    /// Last defined error bound
    pub last_valid_error_bound: Option<u32>,
    /// Threshold applied to the source
    pub applied_threshold: u32,
    /// Quota state
    pub quota: QuotaState,
    /// Sampled bandwidth
    pub bandwidth: BandwidthStats,
    /// Bins of the last good histogram
    pub histogram: Vec<u64>,
}

impl StatsSnapshot {
    /// Value of one counter in this snapshot.
    #[must_use]
    pub fn counter(&self, counter: Counter) -> u64 {
        self.counters.get(counter.as_str()).copied().unwrap_or(0)
    }

    /// Render as JSON.
    ///
    /// # Errors
    /// Returns an error if serialization fails.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counter_names_unique_and_indexed() {
        for (i, counter) in Counter::ALL.iter().enumerate() {
            assert_eq!(counter.index(), i);
            assert_eq!(Counter::from_name(counter.as_str()), Some(*counter));
        }
        assert_eq!(Counter::from_name("bogus"), None);
    }

    #[test]
    fn test_counters_accumulate() {
        let stats = EngineStats::new();
        stats.incr(Counter::Cycles);
        stats.add(Counter::MigratedTotal, 5);
        stats.incr(Counter::for_reject(RejectReason::BlockUnevictable));

        assert_eq!(stats.get(Counter::Cycles), 1);
        assert_eq!(stats.get(Counter::MigratedTotal), 5);
        assert_eq!(stats.get(Counter::RejectedUnevictable), 1);
        assert_eq!(stats.read("migrated_total").as_deref(), Some("5"));
    }

    #[test]
    fn test_rolling_window() {
        let stats = EngineStats::new();
        stats.window().add(3);
        stats.window().add(4);
        assert_eq!(stats.window().current(), 7);

        assert_eq!(stats.close_window(), 7);
        assert_eq!(stats.window().current(), 0);
        assert_eq!(stats.last_window_migrated(), 7);
    }

    #[test]
    fn test_error_bound_keeps_last_valid() {
        let stats = EngineStats::new();
        assert_eq!(stats.last_valid_error_bound(), None);

        stats.publish_error_bound(Some(4));
        assert_eq!(stats.error_bound(), 4);
        assert_eq!(stats.last_valid_error_bound(), Some(4));

        stats.publish_error_bound(None);
        assert_eq!(stats.error_bound(), 0);
        assert_eq!(stats.last_valid_error_bound(), Some(4));

        stats.clear_error_bound();
        assert_eq!(stats.last_valid_error_bound(), None);
    }

    #[test]
    fn test_read_observables() {
        let stats = EngineStats::new();
        stats.set_state(EngineState::Running);
        stats.publish_histogram(&Histogram::from_bins(vec![1, 2, 3]));
        stats.publish_bandwidth(BandwidthStats {
            total: 10,
            read: 7,
            write: 3,
        });

        assert_eq!(stats.read("state").as_deref(), Some("running"));
        assert_eq!(stats.read("histogram").as_deref(), Some("1 2 3"));
        assert_eq!(stats.read("bandwidth_read").as_deref(), Some("7"));
        assert_eq!(stats.read("quota_gate").as_deref(), Some("open"));
        assert_eq!(stats.read("nope"), None);
    }

    #[test]
    fn test_snapshot_serializes() {
        let stats = EngineStats::new();
        stats.add(Counter::PollFailures, 2);
        stats.publish_error_bound(Some(9));

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.counter(Counter::PollFailures), 2);
        assert_eq!(snapshot.state, EngineState::Disabled);

        let json = snapshot.to_json().unwrap();
        assert!(json.contains("\"poll_failures\":2"));
        assert!(json.contains("\"state\":\"disabled\""));

        let back: StatsSnapshot = serde_json::from_str(&json).unwrap();
        assert_eq!(back, snapshot);
    }
}
