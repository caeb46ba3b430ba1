//! Engine Configuration
//!
//! `TigerStyle`: Sensible defaults, builder pattern, explicit over implicit.
//!
//! Two layers:
//! - [`EngineConfig`]: a plain value. One is snapshotted at the start of every
//!   cycle, so a cycle never sees a half-applied change.
//! - [`EngineTunables`]: the live store. One atomic per tunable plus a `watch`
//!   channel for the enable gate. Writers never block the worker.
//!
//! Every tunable has a stable name ([`Tunable`]) so a control surface can
//! expose them as one map.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use thiserror::Error;
use tokio::sync::watch;

use crate::constants::{
    ENGINE_COUNTER_RESET_PERIOD_CYCLES_DEFAULT, ENGINE_PERIOD_CYCLES_MAX,
    ENGINE_SCAN_INTERVAL_US_DEFAULT, ENGINE_SCAN_INTERVAL_US_MAX, ENGINE_SCAN_INTERVAL_US_MIN,
    ENGINE_STATS_LOG_PERIOD_CYCLES_DEFAULT, HISTOGRAM_BINS_COUNT_DEFAULT, HISTOGRAM_BINS_COUNT_MAX,
    HISTOGRAM_PERCENTILE_DEFAULT, HISTOGRAM_PERCENTILE_MAX, HISTOGRAM_REFRESH_PERIOD_CYCLES_DEFAULT,
    HOTNESS_ACCESS_SAMPLE_PERIOD_DEFAULT, HOTNESS_STATE_SAMPLE_PERIOD_DEFAULT,
    HOTNESS_THRESHOLD_DEFAULT, QUOTA_BLOCKS_PER_PERIOD_DEFAULT, QUOTA_BLOCKS_UNLIMITED,
    QUOTA_PERIOD_US_DEFAULT,
};

// =============================================================================
// ConfigError
// =============================================================================

/// Errors from reading or writing tunables.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    /// No tunable or observable has this name
    #[error("unknown tunable: {name}")]
    UnknownTunable {
        /// Name that was looked up
        name: String,
    },

    /// The value could not be parsed
    #[error("invalid value {value:?} for {tunable}: {reason}")]
    InvalidValue {
        /// Tunable being written
        tunable: Tunable,
        /// Raw input
        value: String,
        /// Why parsing failed
        reason: String,
    },

    /// The value parsed but is outside the accepted range
    #[error("{tunable} = {value} out of range [{min}, {max}]")]
    OutOfRange {
        /// Tunable being written
        tunable: Tunable,
        /// Rejected value
        value: u64,
        /// Smallest accepted value
        min: u64,
        /// Largest accepted value
        max: u64,
    },

    /// The name refers to a read-only observable
    #[error("{name} is read-only")]
    ReadOnly {
        /// Observable name
        name: String,
    },
}

impl ConfigError {
    /// Create an unknown tunable error.
    #[must_use]
    pub fn unknown_tunable(name: impl Into<String>) -> Self {
        Self::UnknownTunable { name: name.into() }
    }

    /// Create an invalid value error.
    #[must_use]
    pub fn invalid_value(
        tunable: Tunable,
        value: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self::InvalidValue {
            tunable,
            value: value.into(),
            reason: reason.into(),
        }
    }

    /// Create a read-only error.
    #[must_use]
    pub fn read_only(name: impl Into<String>) -> Self {
        Self::ReadOnly { name: name.into() }
    }
}

// =============================================================================
// Tunable
// =============================================================================

/// Name of one live-configurable engine parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Tunable {
    /// Enable gate (flag)
    Enabled,
    /// Interval between scanning cycles, microseconds
    ScanIntervalUs,
    /// Hotness threshold pushed to the source
    HotnessThreshold,
    /// Blocks admitted per quota period
    QuotaLimit,
    /// Quota period, microseconds (0 = explicit reset only)
    QuotaPeriodUs,
    /// Cycles between histogram refreshes (0 = never)
    HistRefreshPeriod,
    /// Histogram bin count
    HistBins,
    /// Percentile used for the error bound
    Percentile,
    /// Cycles between source counter resets (0 = never)
    CounterResetPeriod,
    /// Cycles between rolling-window reports (0 = never)
    StatsLogPeriod,
    /// Access sampling period pushed to the source
    AccessSamplePeriod,
    /// Bandwidth-state sampling period pushed to the source
    StateSamplePeriod,
    /// Raise the threshold above the error bound (flag)
    AdaptiveThreshold,
}

impl Tunable {
    /// Every tunable, in display order.
    pub const ALL: [Tunable; 13] = [
        Self::Enabled,
        Self::ScanIntervalUs,
        Self::HotnessThreshold,
        Self::QuotaLimit,
        Self::QuotaPeriodUs,
        Self::HistRefreshPeriod,
        Self::HistBins,
        Self::Percentile,
        Self::CounterResetPeriod,
        Self::StatsLogPeriod,
        Self::AccessSamplePeriod,
        Self::StateSamplePeriod,
        Self::AdaptiveThreshold,
    ];

    /// Stable external name.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Enabled => "enabled",
            Self::ScanIntervalUs => "scan_interval_us",
            Self::HotnessThreshold => "hotness_threshold",
            Self::QuotaLimit => "quota_limit",
            Self::QuotaPeriodUs => "quota_period_us",
            Self::HistRefreshPeriod => "hist_refresh_period",
            Self::HistBins => "hist_bins",
            Self::Percentile => "percentile",
            Self::CounterResetPeriod => "counter_reset_period",
            Self::StatsLogPeriod => "stats_log_period",
            Self::AccessSamplePeriod => "access_sample_period",
            Self::StateSamplePeriod => "state_sample_period",
            Self::AdaptiveThreshold => "adaptive_threshold",
        }
    }

    /// True for boolean tunables.
    #[must_use]
    pub fn is_flag(&self) -> bool {
        matches!(self, Self::Enabled | Self::AdaptiveThreshold)
    }

    /// Inclusive accepted range.
    #[must_use]
    pub fn range(&self) -> (u64, u64) {
        let u32_max = u64::from(u32::MAX);
        match self {
            Self::Enabled | Self::AdaptiveThreshold => (0, 1),
            Self::ScanIntervalUs => (ENGINE_SCAN_INTERVAL_US_MIN, ENGINE_SCAN_INTERVAL_US_MAX),
            Self::HotnessThreshold | Self::AccessSamplePeriod | Self::StateSamplePeriod => {
                (0, u32_max)
            }
            Self::QuotaLimit | Self::QuotaPeriodUs => (0, u64::MAX),
            Self::HistRefreshPeriod | Self::CounterResetPeriod | Self::StatsLogPeriod => {
                (0, ENGINE_PERIOD_CYCLES_MAX)
            }
            Self::HistBins => (1, HISTOGRAM_BINS_COUNT_MAX as u64),
            Self::Percentile => (0, u64::from(HISTOGRAM_PERCENTILE_MAX)),
        }
    }

    /// Check a value against this tunable's range.
    ///
    /// # Errors
    /// Returns `OutOfRange` if the value is outside `range()`.
    pub fn check(&self, value: u64) -> Result<u64, ConfigError> {
        let (min, max) = self.range();
        if value < min || value > max {
            return Err(ConfigError::OutOfRange {
                tunable: *self,
                value,
                min,
                max,
            });
        }
        Ok(value)
    }

    /// Parse a sysfs-style value and check its range.
    ///
    /// Surrounding whitespace (including a trailing newline) is ignored.
    /// Flags accept `1/0`, `true/false`, `y/n` and `on/off`.
    ///
    /// # Errors
    /// Returns `InvalidValue` if the text does not parse, `OutOfRange` if the
    /// number is not accepted.
    pub fn parse_value(&self, raw: &str) -> Result<u64, ConfigError> {
        let text = raw.trim();

        let value = if self.is_flag() {
            match text.to_ascii_lowercase().as_str() {
                "1" | "true" | "y" | "yes" | "on" => 1,
                "0" | "false" | "n" | "no" | "off" => 0,
                _ => {
                    return Err(ConfigError::invalid_value(
                        *self,
                        raw,
                        "expected a boolean",
                    ))
                }
            }
        } else if text == "unlimited" && *self == Self::QuotaLimit {
            QUOTA_BLOCKS_UNLIMITED
        } else {
            text.parse::<u64>()
                .map_err(|e| ConfigError::invalid_value(*self, raw, e.to_string()))?
        };

        self.check(value)
    }
}

impl fmt::Display for Tunable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Tunable {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| ConfigError::unknown_tunable(s))
    }
}

// =============================================================================
// EngineConfig
// =============================================================================

/// Snapshot of every engine tunable.
///
/// `TigerStyle`:
/// - Sensible defaults via Default impl
/// - Builder pattern for customization
/// - All fields public for transparency
///
/// # Example
///
/// ```rust
/// use tiermig::config::EngineConfig;
///
/// let config = EngineConfig::default()
///     .with_scan_interval_us(50_000)
///     .with_quota(1_024, 1_000_000)
///     .with_adaptive_threshold(true);
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Enable gate.
    ///
    /// Default: false (engine starts disabled)
    pub enabled: bool,

    /// Interval between scanning cycles.
    ///
    /// Default: 100ms
    pub scan_interval_us: u64,

    /// Hotness threshold pushed to the source.
    ///
    /// Default: 2
    pub hotness_threshold: u32,

    /// Blocks admitted per quota period.
    ///
    /// Default: 65536. `u64::MAX` means unlimited.
    pub quota_limit: u64,

    /// Quota period. 0 disables time-based rollover.
    ///
    /// Default: 1s
    pub quota_period_us: u64,

    /// Cycles between histogram refreshes. 0 disables refreshes.
    ///
    /// Default: 50
    pub hist_refresh_period: u64,

    /// Histogram bin count.
    ///
    /// Default: 64
    pub hist_bins: usize,

    /// Percentile for the error bound.
    ///
    /// Default: 50
    pub percentile: u32,

    /// Cycles between source counter resets. 0 disables resets.
    ///
    /// Default: 10
    pub counter_reset_period: u64,

    /// Cycles between rolling-window reports. 0 disables reports.
    ///
    /// Default: 10
    pub stats_log_period: u64,

    /// Access sampling period pushed to the source.
    ///
    /// Default: 0 (every access)
    pub access_sample_period: u32,

    /// Bandwidth-state sampling period pushed to the source.
    ///
    /// Default: 100
    pub state_sample_period: u32,

    /// Keep the threshold above the error bound.
    ///
    /// Default: false
    pub adaptive_threshold: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            scan_interval_us: ENGINE_SCAN_INTERVAL_US_DEFAULT,
            hotness_threshold: HOTNESS_THRESHOLD_DEFAULT,
            quota_limit: QUOTA_BLOCKS_PER_PERIOD_DEFAULT,
            quota_period_us: QUOTA_PERIOD_US_DEFAULT,
            hist_refresh_period: HISTOGRAM_REFRESH_PERIOD_CYCLES_DEFAULT,
            hist_bins: HISTOGRAM_BINS_COUNT_DEFAULT,
            percentile: HISTOGRAM_PERCENTILE_DEFAULT,
            counter_reset_period: ENGINE_COUNTER_RESET_PERIOD_CYCLES_DEFAULT,
            stats_log_period: ENGINE_STATS_LOG_PERIOD_CYCLES_DEFAULT,
            access_sample_period: HOTNESS_ACCESS_SAMPLE_PERIOD_DEFAULT,
            state_sample_period: HOTNESS_STATE_SAMPLE_PERIOD_DEFAULT,
            adaptive_threshold: false,
        }
    }
}

impl EngineConfig {
    /// Create a new config with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Start enabled.
    #[must_use]
    pub fn enabled(mut self) -> Self {
        self.enabled = true;
        self
    }

    /// Set the scanning interval.
    #[must_use]
    pub fn with_scan_interval_us(mut self, interval_us: u64) -> Self {
        self.scan_interval_us = interval_us;
        self
    }

    /// Set the hotness threshold.
    #[must_use]
    pub fn with_hotness_threshold(mut self, threshold: u32) -> Self {
        self.hotness_threshold = threshold;
        self
    }

    /// Set the quota limit and period.
    #[must_use]
    pub fn with_quota(mut self, limit: u64, period_us: u64) -> Self {
        self.quota_limit = limit;
        self.quota_period_us = period_us;
        self
    }

    /// Remove the quota limit.
    #[must_use]
    pub fn without_quota(mut self) -> Self {
        self.quota_limit = QUOTA_BLOCKS_UNLIMITED;
        self
    }

    /// Set histogram refresh period, bin count and percentile.
    #[must_use]
    pub fn with_histogram(mut self, refresh_period: u64, bins: usize, percentile: u32) -> Self {
        self.hist_refresh_period = refresh_period;
        self.hist_bins = bins;
        self.percentile = percentile;
        self
    }

    /// Set the counter reset period.
    #[must_use]
    pub fn with_counter_reset_period(mut self, cycles: u64) -> Self {
        self.counter_reset_period = cycles;
        self
    }

    /// Set the rolling-window report period.
    #[must_use]
    pub fn with_stats_log_period(mut self, cycles: u64) -> Self {
        self.stats_log_period = cycles;
        self
    }

    /// Set the source sampling periods.
    #[must_use]
    pub fn with_sample_periods(mut self, access: u32, state: u32) -> Self {
        self.access_sample_period = access;
        self.state_sample_period = state;
        self
    }

    /// Toggle the adaptive threshold floor.
    #[must_use]
    pub fn with_adaptive_threshold(mut self, adaptive: bool) -> Self {
        self.adaptive_threshold = adaptive;
        self
    }

    /// Read one tunable as a raw value.
    #[must_use]
    pub fn get(&self, tunable: Tunable) -> u64 {
        match tunable {
            Tunable::Enabled => u64::from(self.enabled),
            Tunable::ScanIntervalUs => self.scan_interval_us,
            Tunable::HotnessThreshold => u64::from(self.hotness_threshold),
            Tunable::QuotaLimit => self.quota_limit,
            Tunable::QuotaPeriodUs => self.quota_period_us,
            Tunable::HistRefreshPeriod => self.hist_refresh_period,
            Tunable::HistBins => self.hist_bins as u64,
            Tunable::Percentile => u64::from(self.percentile),
            Tunable::CounterResetPeriod => self.counter_reset_period,
            Tunable::StatsLogPeriod => self.stats_log_period,
            Tunable::AccessSamplePeriod => u64::from(self.access_sample_period),
            Tunable::StateSamplePeriod => u64::from(self.state_sample_period),
            Tunable::AdaptiveThreshold => u64::from(self.adaptive_threshold),
        }
    }

    /// Validate every tunable against its range.
    ///
    /// # Errors
    /// Returns the first out-of-range tunable.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for tunable in Tunable::ALL {
            tunable.check(self.get(tunable))?;
        }
        Ok(())
    }
}

// =============================================================================
// EngineTunables
// =============================================================================

/// Live tunable store shared by the worker and the control surface.
///
/// Every write is validated first. Reads assemble an [`EngineConfig`]
/// snapshot from the atomics.
#[derive(Debug)]
pub struct EngineTunables {
    enabled: AtomicBool,
    scan_interval_us: AtomicU64,
    hotness_threshold: AtomicU32,
    quota_limit: AtomicU64,
    quota_period_us: AtomicU64,
    hist_refresh_period: AtomicU64,
    hist_bins: AtomicU64,
    percentile: AtomicU32,
    counter_reset_period: AtomicU64,
    stats_log_period: AtomicU64,
    access_sample_period: AtomicU32,
    state_sample_period: AtomicU32,
    adaptive_threshold: AtomicBool,
    gate: watch::Sender<bool>,
}

impl EngineTunables {
    /// Build the store from a validated config.
    ///
    /// # Errors
    /// Returns an error if `config` fails validation.
    pub fn new(config: &EngineConfig) -> Result<Self, ConfigError> {
        config.validate()?;

        let (gate, _) = watch::channel(config.enabled);
        Ok(Self {
            enabled: AtomicBool::new(config.enabled),
            scan_interval_us: AtomicU64::new(config.scan_interval_us),
            hotness_threshold: AtomicU32::new(config.hotness_threshold),
            quota_limit: AtomicU64::new(config.quota_limit),
            quota_period_us: AtomicU64::new(config.quota_period_us),
            hist_refresh_period: AtomicU64::new(config.hist_refresh_period),
            hist_bins: AtomicU64::new(config.hist_bins as u64),
            percentile: AtomicU32::new(config.percentile),
            counter_reset_period: AtomicU64::new(config.counter_reset_period),
            stats_log_period: AtomicU64::new(config.stats_log_period),
            access_sample_period: AtomicU32::new(config.access_sample_period),
            state_sample_period: AtomicU32::new(config.state_sample_period),
            adaptive_threshold: AtomicBool::new(config.adaptive_threshold),
            gate,
        })
    }

    /// Copy every tunable into a fresh snapshot.
    #[must_use]
    pub fn snapshot(&self) -> EngineConfig {
        EngineConfig {
            enabled: self.enabled.load(Ordering::Acquire),
            scan_interval_us: self.scan_interval_us.load(Ordering::Relaxed),
            hotness_threshold: self.hotness_threshold.load(Ordering::Relaxed),
            quota_limit: self.quota_limit.load(Ordering::Relaxed),
            quota_period_us: self.quota_period_us.load(Ordering::Relaxed),
            hist_refresh_period: self.hist_refresh_period.load(Ordering::Relaxed),
            hist_bins: self.hist_bins.load(Ordering::Relaxed) as usize,
            percentile: self.percentile.load(Ordering::Relaxed),
            counter_reset_period: self.counter_reset_period.load(Ordering::Relaxed),
            stats_log_period: self.stats_log_period.load(Ordering::Relaxed),
            access_sample_period: self.access_sample_period.load(Ordering::Relaxed),
            state_sample_period: self.state_sample_period.load(Ordering::Relaxed),
            adaptive_threshold: self.adaptive_threshold.load(Ordering::Relaxed),
        }
    }

    /// Current value of one tunable.
    #[must_use]
    pub fn get(&self, tunable: Tunable) -> u64 {
        match tunable {
            Tunable::Enabled => u64::from(self.is_enabled()),
            Tunable::ScanIntervalUs => self.scan_interval_us.load(Ordering::Relaxed),
            Tunable::HotnessThreshold => u64::from(self.hotness_threshold.load(Ordering::Relaxed)),
            Tunable::QuotaLimit => self.quota_limit.load(Ordering::Relaxed),
            Tunable::QuotaPeriodUs => self.quota_period_us.load(Ordering::Relaxed),
            Tunable::HistRefreshPeriod => self.hist_refresh_period.load(Ordering::Relaxed),
            Tunable::HistBins => self.hist_bins.load(Ordering::Relaxed),
            Tunable::Percentile => u64::from(self.percentile.load(Ordering::Relaxed)),
            Tunable::CounterResetPeriod => self.counter_reset_period.load(Ordering::Relaxed),
            Tunable::StatsLogPeriod => self.stats_log_period.load(Ordering::Relaxed),
            Tunable::AccessSamplePeriod => {
                u64::from(self.access_sample_period.load(Ordering::Relaxed))
            }
            Tunable::StateSamplePeriod => {
                u64::from(self.state_sample_period.load(Ordering::Relaxed))
            }
            Tunable::AdaptiveThreshold => u64::from(self.adaptive_threshold.load(Ordering::Relaxed)),
        }
    }

    /// Write one tunable after range-checking it.
    ///
    /// Writing `Enabled` also publishes on the gate channel, waking the worker.
    ///
    /// # Errors
    /// Returns `OutOfRange` if the value is not accepted. Nothing is written.
    pub fn set(&self, tunable: Tunable, value: u64) -> Result<(), ConfigError> {
        let value = tunable.check(value)?;
        // Range checks above make the narrowing casts below lossless.
        let narrow = value as u32;

        match tunable {
            Tunable::Enabled => self.set_enabled(value != 0),
            Tunable::ScanIntervalUs => self.scan_interval_us.store(value, Ordering::Relaxed),
            Tunable::HotnessThreshold => self.hotness_threshold.store(narrow, Ordering::Relaxed),
            Tunable::QuotaLimit => self.quota_limit.store(value, Ordering::Relaxed),
            Tunable::QuotaPeriodUs => self.quota_period_us.store(value, Ordering::Relaxed),
            Tunable::HistRefreshPeriod => self.hist_refresh_period.store(value, Ordering::Relaxed),
            Tunable::HistBins => self.hist_bins.store(value, Ordering::Relaxed),
            Tunable::Percentile => self.percentile.store(narrow, Ordering::Relaxed),
            Tunable::CounterResetPeriod => {
                self.counter_reset_period.store(value, Ordering::Relaxed);
            }
            Tunable::StatsLogPeriod => self.stats_log_period.store(value, Ordering::Relaxed),
            Tunable::AccessSamplePeriod => {
                self.access_sample_period.store(narrow, Ordering::Relaxed);
            }
            Tunable::StateSamplePeriod => {
                self.state_sample_period.store(narrow, Ordering::Relaxed);
            }
            Tunable::AdaptiveThreshold => {
                self.adaptive_threshold.store(value != 0, Ordering::Relaxed);
            }
        }

        // Postcondition
        debug_assert_eq!(self.get(tunable), value);
        Ok(())
    }

    /// Parse and write one tunable by name.
    ///
    /// # Errors
    /// Returns an error for unknown names, unparsable text or out-of-range values.
    pub fn set_str(&self, name: &str, raw: &str) -> Result<(), ConfigError> {
        let tunable: Tunable = name.parse()?;
        let value = tunable.parse_value(raw)?;
        self.set(tunable, value)
    }

    /// Whether the gate is open.
    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }

    /// Flip the gate and wake anything waiting on it.
    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Release);
        self.gate.send_replace(enabled);
    }

    /// Subscribe to gate changes.
    #[must_use]
    pub fn subscribe_gate(&self) -> watch::Receiver<bool> {
        self.gate.subscribe()
    }
}

// =============================================================================
// Tests
// =============================================================================
