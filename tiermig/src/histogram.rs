//! Histogram Estimator
//!
//! `TigerStyle`: Bounded retry, last good value kept on every failure.
//!
//! The hotness source fills its histogram asynchronously. A refresh opens a
//! window, waits for the bins to become ready (at most
//! `HISTOGRAM_FETCH_RETRIES_MAX` polls, each after a
//! `HISTOGRAM_FETCH_BACKOFF_US` sleep), fetches, and derives the error bound:
//! the first bin whose cumulative count reaches the configured percentile of
//! the total mass.

use thiserror::Error;
use tiermig_core::{
    Clock, Histogram, HotnessError, HotnessSource, HISTOGRAM_BINS_COUNT_MAX,
    HISTOGRAM_FETCH_BACKOFF_US, HISTOGRAM_FETCH_RETRIES_MAX, HISTOGRAM_PERCENTILE_MAX,
};
use tracing::debug;

/// A histogram refresh that produced nothing usable.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum HistogramError {
    /// The source never reported the bins ready
    #[error("histogram not ready after {attempts} attempts")]
    NotReady {
        /// Readiness polls made
        attempts: u32,
    },

    /// The source failed the read
    #[error("histogram fetch failed: {0}")]
    Fetch(#[from] HotnessError),

    /// The source returned the wrong number of bins
    #[error("histogram has {actual} bins, expected {expected}")]
    BinCountMismatch {
        /// Configured bin count
        expected: usize,
        /// Bins returned
        actual: usize,
    },
}

impl HistogramError {
    /// Check if the next refresh may succeed.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        match self {
            Self::NotReady { .. } => true,
            Self::Fetch(err) => err.is_transient(),
            Self::BinCountMismatch { .. } => false,
        }
    }
}

/// Last good histogram and the error bound derived from it.
#[derive(Debug, Clone, Default)]
pub struct HistogramEstimator {
    histogram: Option<Histogram>,
    error_bound: Option<u32>,
    last_valid_error_bound: Option<u32>,
}

impl HistogramEstimator {
    /// Create an estimator with no histogram yet.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Fetch a fresh histogram and recompute the error bound.
    ///
    /// Returns the new bound, `None` when the histogram holds no samples.
    ///
    /// # Errors
    /// Returns why the refresh failed. The previous histogram and bound are
    /// kept untouched.
    pub async fn refresh(
        &mut self,
        source: &dyn HotnessSource,
        clock: &dyn Clock,
        bins: usize,
        percentile: u32,
    ) -> Result<Option<u32>, HistogramError> {
        // Preconditions
        assert!(bins > 0 && bins <= HISTOGRAM_BINS_COUNT_MAX, "bins out of range: {}", bins);
        assert!(percentile <= HISTOGRAM_PERCENTILE_MAX, "percentile out of range: {}", percentile);

        source.begin_histogram_window();

        let mut ready = false;
        for _ in 0..HISTOGRAM_FETCH_RETRIES_MAX {
            clock.sleep_us(HISTOGRAM_FETCH_BACKOFF_US).await;
            if source.histogram_ready(bins) {
                ready = true;
                break;
            }
        }
        if !ready {
            return Err(HistogramError::NotReady {
                attempts: HISTOGRAM_FETCH_RETRIES_MAX,
            });
        }

        let histogram = source.fetch_histogram()?;
        if histogram.len() != bins {
            return Err(HistogramError::BinCountMismatch {
                expected: bins,
                actual: histogram.len(),
            });
        }

        let bound = histogram.percentile_bin(percentile);
        match bound {
            Some(bound) => {
                self.last_valid_error_bound = Some(bound);
                debug!(bound, total = histogram.total(), "error bound updated");
            }
            None => debug!("histogram empty, error bound undefined"),
        }
        self.error_bound = bound;
        self.histogram = Some(histogram);

        // Postcondition
        assert!(
            self.error_bound.map_or(true, |b| (b as usize) < bins),
            "error bound must index a bin"
        );

        Ok(bound)
    }

    /// Bound from the last successful refresh; `None` if undefined.
    #[must_use]
    pub fn error_bound(&self) -> Option<u32> {
        self.error_bound
    }

    /// Most recent defined bound.
    #[must_use]
    pub fn last_valid_error_bound(&self) -> Option<u32> {
        self.last_valid_error_bound
    }

    /// Last good histogram.
    #[must_use]
    pub fn histogram(&self) -> Option<&Histogram> {
        self.histogram.as_ref()
    }

    /// Drop the histogram and every derived bound.
    pub fn reset(&mut self) {
        self.histogram = None;
        self.error_bound = None;
        self.last_valid_error_bound = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dst::SimHotnessSource;
    use std::sync::Arc;
    use tiermig_core::dst::{FaultConfig, FaultInjectorBuilder, FaultType};
    use tiermig_core::{DeterministicRng, SimClock};

    fn clock() -> SimClock {
        SimClock::new().with_auto_advance()
    }

    #[tokio::test]
    async fn test_refresh_computes_bound() {
        let source = SimHotnessSource::new(DeterministicRng::new(42));
        source.set_histogram(vec![10, 20, 30, 25, 15]);
        let clock = clock();
        let mut estimator = HistogramEstimator::new();

        let bound = estimator.refresh(&source, &clock, 5, 50).await.unwrap();

        assert_eq!(bound, Some(2));
        assert_eq!(estimator.error_bound(), Some(2));
        assert_eq!(estimator.last_valid_error_bound(), Some(2));
        assert_eq!(estimator.histogram().map(Histogram::total), Some(100));
        assert_eq!(source.windows_opened(), 1);
        // Ready on the first poll, after one backoff
        assert_eq!(clock.now_us(), HISTOGRAM_FETCH_BACKOFF_US);
    }

    #[tokio::test]
    async fn test_empty_histogram_keeps_last_valid() {
        let source = SimHotnessSource::new(DeterministicRng::new(42));
        let clock = clock();
        let mut estimator = HistogramEstimator::new();

        source.set_histogram(vec![0, 4, 0, 0]);
        assert_eq!(estimator.refresh(&source, &clock, 4, 50).await.unwrap(), Some(1));

        source.set_histogram(vec![0, 0, 0, 0]);
        assert_eq!(estimator.refresh(&source, &clock, 4, 50).await.unwrap(), None);
        assert_eq!(estimator.error_bound(), None);
        assert_eq!(estimator.last_valid_error_bound(), Some(1));
    }

    #[tokio::test]
    async fn test_not_ready_keeps_previous_and_skips_fetch() {
        let faults = FaultInjectorBuilder::new(DeterministicRng::new(7))
            .with_fault(FaultConfig::new(FaultType::HistogramNeverReady, 1.0).after_calls(1))
            .build();
        let source = SimHotnessSource::new(DeterministicRng::new(42)).with_faults(Arc::new(faults));
        source.set_histogram(vec![10, 20, 30, 25, 15]);
        let clock = clock();
        let mut estimator = HistogramEstimator::new();

        assert_eq!(estimator.refresh(&source, &clock, 5, 50).await.unwrap(), Some(2));
        let fetches = source.fetch_calls();

        source.set_histogram(vec![100, 0, 0, 0, 0]);
        let started = clock.now_us();
        let err = estimator.refresh(&source, &clock, 5, 50).await.unwrap_err();

        assert_eq!(
            err,
            HistogramError::NotReady {
                attempts: HISTOGRAM_FETCH_RETRIES_MAX
            }
        );
        assert!(err.is_transient());
        assert_eq!(source.fetch_calls(), fetches);
        assert_eq!(estimator.error_bound(), Some(2));
        assert_eq!(
            clock.now_us() - started,
            u64::from(HISTOGRAM_FETCH_RETRIES_MAX) * HISTOGRAM_FETCH_BACKOFF_US
        );
    }

    #[tokio::test]
    async fn test_bin_count_mismatch() {
        let source = SimHotnessSource::new(DeterministicRng::new(42));
        source.set_histogram(vec![1, 2, 3]);
        let clock = clock();
        let mut estimator = HistogramEstimator::new();

        // Ready reports on the expected count, so a short histogram never gets ready
        let err = estimator.refresh(&source, &clock, 4, 50).await.unwrap_err();
        assert!(matches!(err, HistogramError::NotReady { .. }));

        source.force_ready(true);
        let err = estimator.refresh(&source, &clock, 4, 50).await.unwrap_err();
        assert_eq!(
            err,
            HistogramError::BinCountMismatch {
                expected: 4,
                actual: 3
            }
        );
        assert!(!err.is_transient());
        assert!(estimator.histogram().is_none());
    }

    #[tokio::test]
    async fn test_fetch_error_propagates() {
        let faults = FaultInjectorBuilder::new(DeterministicRng::new(7))
            .with_fault(FaultConfig::new(FaultType::HistogramFetchFail, 1.0))
            .build();
        let source = SimHotnessSource::new(DeterministicRng::new(42)).with_faults(Arc::new(faults));
        source.set_histogram(vec![1, 1]);
        let mut estimator = HistogramEstimator::new();

        let err = estimator.refresh(&source, &clock(), 2, 50).await.unwrap_err();
        assert!(matches!(err, HistogramError::Fetch(HotnessError::SimulatedFault { .. })));
    }

    #[tokio::test]
    async fn test_reset_clears_everything() {
        let source = SimHotnessSource::new(DeterministicRng::new(42));
        source.set_histogram(vec![1, 1]);
        let mut estimator = HistogramEstimator::new();
        estimator.refresh(&source, &clock(), 2, 50).await.unwrap();

        estimator.reset();
        assert!(estimator.histogram().is_none());
        assert_eq!(estimator.error_bound(), None);
        assert_eq!(estimator.last_valid_error_bound(), None);
    }
}
