//! Hotness Signal Contract
//!
//! `TigerStyle`: The engine never talks to profiling hardware directly.
//!
//! Whatever produces hotness evidence (a CXL-side sketch, PEBS/IBS sampling,
//! access-bit scanning) sits behind [`HotnessSource`]. Addresses it returns are
//! already physical, and counters it reports are already 64-bit.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::constants::{HISTOGRAM_BINS_COUNT_MAX, HOTNESS_PAGE_SHIFT};

// =============================================================================
// HotCandidate
// =============================================================================

/// A physical address the hotness signal reported as recently or frequently accessed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HotCandidate {
    /// Physical address of the accessed page
    pub physical_address: u64,
}

impl HotCandidate {
    /// Create a candidate from a physical address.
    #[must_use]
    pub fn new(physical_address: u64) -> Self {
        Self { physical_address }
    }

    /// Create a candidate pointing at the first byte of a frame.
    #[must_use]
    pub fn from_frame(frame: u64) -> Self {
        Self {
            physical_address: frame << HOTNESS_PAGE_SHIFT,
        }
    }

    /// Frame number containing this address.
    #[must_use]
    pub fn frame(&self) -> u64 {
        self.physical_address >> HOTNESS_PAGE_SHIFT
    }
}

// =============================================================================
// Histogram
// =============================================================================

/// Fixed-bin histogram of observed hotness.
///
/// Bin `i` counts pages whose hotness metric fell in bucket `i`. Counts are
/// cumulative until the source starts a new window.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Histogram {
    bins: Vec<u64>,
}

impl Histogram {
    /// Create an all-zero histogram with `bins_count` bins.
    ///
    /// # Panics
    /// Panics if `bins_count` exceeds `HISTOGRAM_BINS_COUNT_MAX`.
    #[must_use]
    pub fn zeroed(bins_count: usize) -> Self {
        assert!(
            bins_count <= HISTOGRAM_BINS_COUNT_MAX,
            "bins_count {} exceeds max {}",
            bins_count,
            HISTOGRAM_BINS_COUNT_MAX
        );

        Self {
            bins: vec![0; bins_count],
        }
    }

    /// Create a histogram from raw bin counts.
    ///
    /// # Panics
    /// Panics if there are more than `HISTOGRAM_BINS_COUNT_MAX` bins.
    #[must_use]
    pub fn from_bins(bins: Vec<u64>) -> Self {
        assert!(
            bins.len() <= HISTOGRAM_BINS_COUNT_MAX,
            "bins_count {} exceeds max {}",
            bins.len(),
            HISTOGRAM_BINS_COUNT_MAX
        );

        Self { bins }
    }

    /// Number of bins.
    #[must_use]
    pub fn len(&self) -> usize {
        self.bins.len()
    }

    /// True if the histogram has no bins.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.bins.is_empty()
    }

    /// Raw bin counts.
    #[must_use]
    pub fn bins(&self) -> &[u64] {
        &self.bins
    }

    /// Total mass across all bins.
    #[must_use]
    pub fn total(&self) -> u64 {
        self.bins.iter().fold(0u64, |acc, b| acc.saturating_add(*b))
    }

    /// Smallest bin index whose cumulative count reaches `percentile` of the total.
    ///
    /// The target mass is `total * percentile / 100` (integer division).
    /// Returns `None` when the histogram holds no samples, since the bound is
    /// undefined.
    ///
    /// # Panics
    /// Panics if `percentile` is above 100.
    #[must_use]
    pub fn percentile_bin(&self, percentile: u32) -> Option<u32> {
        assert!(percentile <= 100, "percentile {} above 100", percentile);

        let total = self.total();
        if total == 0 {
            return None;
        }

        let target = (u128::from(total) * u128::from(percentile) / 100) as u64;
        let mut accumulated: u64 = 0;
        for (index, count) in self.bins.iter().enumerate() {
            accumulated = accumulated.saturating_add(*count);
            if accumulated >= target {
                // Postcondition
                assert!(index < self.bins.len());
                return Some(index as u32);
            }
        }

        // Unreachable: the final cumulative equals total >= target.
        Some((self.bins.len() - 1) as u32)
    }
}

// =============================================================================
// Bandwidth
// =============================================================================

/// Sampled memory-bandwidth counters reported by the source.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BandwidthStats {
    /// Total sampled accesses
    pub total: u64,
    /// Sampled reads
    pub read: u64,
    /// Sampled writes
    pub write: u64,
}

// =============================================================================
// Errors
// =============================================================================

/// Errors reported by a hotness source.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum HotnessError {
    /// The device could not be read
    #[error("hotness device unavailable: {message}")]
    Unavailable {
        /// Failure description
        message: String,
    },

    /// The histogram window was read before it was populated
    #[error("histogram not ready: {bins_ready}/{bins_expected} bins")]
    HistogramNotReady {
        /// Bins currently populated
        bins_ready: usize,
        /// Bins expected
        bins_expected: usize,
    },

    /// Simulated fault (for DST)
    #[error("simulated fault: {fault_type}")]
    SimulatedFault {
        /// Type of simulated fault
        fault_type: String,
    },
}

impl HotnessError {
    /// Create an unavailable error.
    #[must_use]
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::Unavailable {
            message: message.into(),
        }
    }

    /// Create a simulated fault error.
    #[must_use]
    pub fn simulated_fault(fault_type: impl Into<String>) -> Self {
        Self::SimulatedFault {
            fault_type: fault_type.into(),
        }
    }

    /// Check if this error is transient (retrying next cycle may succeed).
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::HistogramNotReady { .. } | Self::SimulatedFault { .. } | Self::Unavailable { .. }
        )
    }
}

// =============================================================================
// HotnessSource
// =============================================================================

/// External producer of hotness evidence.
///
/// All calls are synchronous and must return quickly: they sit on the
/// engine's only worker. Implementations use interior mutability.
pub trait HotnessSource: Send + Sync {
    /// Drain the candidates accumulated since the last poll.
    ///
    /// Destructive read: each candidate is returned at most once. The result
    /// is bounded by `HOTNESS_POLL_CANDIDATES_COUNT_MAX`.
    ///
    /// # Errors
    /// Returns an error if the device cannot be read this cycle.
    fn poll_candidates(&self) -> Result<Vec<HotCandidate>, HotnessError>;

    /// Set the hotness threshold above which a page is reported.
    fn set_threshold(&self, threshold: u32);

    /// Read back the threshold currently applied by the source.
    fn get_threshold(&self) -> u32;

    /// Clear the source's access counters (the sketch).
    fn reset_counters(&self);

    /// Start populating a fresh histogram window.
    fn begin_histogram_window(&self);

    /// True once `expected_bins` bins of the current window are populated.
    fn histogram_ready(&self, expected_bins: usize) -> bool;

    /// Read the populated histogram.
    ///
    /// # Errors
    /// Returns an error if the device cannot be read.
    fn fetch_histogram(&self) -> Result<Histogram, HotnessError>;

    /// Read the sampled bandwidth counters.
    fn read_bandwidth_stats(&self) -> BandwidthStats;

    /// Set how often accesses are sampled into the sketch and histogram.
    fn set_access_sample_period(&self, _period: u32) {}

    /// Set how often bandwidth state is sampled.
    fn set_state_sample_period(&self, _period: u32) {}
}
