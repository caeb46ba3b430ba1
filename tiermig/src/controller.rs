//! Hotness Controller
//!
//! `TigerStyle`: Write to the source only on change, read back what it kept.
//!
//! Owns the threshold and sampling periods the source is running with. The
//! worker hands it each cycle's config snapshot; the controller pushes only
//! the values that differ from what it last applied.

use tiermig_core::HotnessSource;
use tracing::{debug, warn};

use crate::config::EngineConfig;

/// What one [`HotnessController::sync`] did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncReport {
    /// Threshold the source should now hold
    pub threshold: u32,
    /// A threshold write happened
    pub threshold_written: bool,
    /// Value the source reported instead of `threshold`
    pub mismatch: Option<u32>,
    /// Sampling periods were rewritten
    pub sample_periods_written: bool,
}

/// Tracks and pushes hotness-source parameters.
#[derive(Debug, Clone, Default)]
pub struct HotnessController {
    applied_threshold: Option<u32>,
    applied_access_period: Option<u32>,
    applied_state_period: Option<u32>,
}

impl HotnessController {
    /// Create a controller that has applied nothing yet.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Threshold to run with under `config`.
    ///
    /// With `adaptive_threshold` set the configured value is raised to one
    /// above the error bound, since estimates at or below it are noise.
    #[must_use]
    pub fn effective_threshold(config: &EngineConfig, error_bound: Option<u32>) -> u32 {
        match error_bound {
            Some(bound) if config.adaptive_threshold => {
                config.hotness_threshold.max(bound.saturating_add(1))
            }
            _ => config.hotness_threshold,
        }
    }

    /// Bring the source in line with `config`.
    pub fn sync(
        &mut self,
        source: &dyn HotnessSource,
        config: &EngineConfig,
        error_bound: Option<u32>,
    ) -> SyncReport {
        let threshold = Self::effective_threshold(config, error_bound);
        let mut report = SyncReport {
            threshold,
            ..SyncReport::default()
        };

        if self.applied_threshold != Some(threshold) {
            report.mismatch = self.write_threshold(source, threshold);
            report.threshold_written = true;
        }

        if self.applied_access_period != Some(config.access_sample_period)
            || self.applied_state_period != Some(config.state_sample_period)
        {
            source.set_access_sample_period(config.access_sample_period);
            source.set_state_sample_period(config.state_sample_period);
            self.applied_access_period = Some(config.access_sample_period);
            self.applied_state_period = Some(config.state_sample_period);
            report.sample_periods_written = true;
            debug!(
                access = config.access_sample_period,
                state = config.state_sample_period,
                "sample periods applied"
            );
        }

        report
    }

    /// Reset the source's counters and re-assert the threshold.
    ///
    /// Returns the read-back value if it differs from the threshold.
    pub fn reset_counters(&mut self, source: &dyn HotnessSource) -> Option<u32> {
        source.reset_counters();
        self.applied_threshold
            .and_then(|threshold| self.write_threshold(source, threshold))
    }

    /// Forget everything applied so the next sync rewrites it.
    pub fn invalidate(&mut self) {
        *self = Self::default();
    }

    /// Threshold last written.
    #[must_use]
    pub fn applied_threshold(&self) -> Option<u32> {
        self.applied_threshold
    }

    fn write_threshold(&mut self, source: &dyn HotnessSource, threshold: u32) -> Option<u32> {
        source.set_threshold(threshold);
        self.applied_threshold = Some(threshold);

        let read_back = source.get_threshold();
        if read_back == threshold {
            debug!(threshold, "threshold applied");
            None
        } else {
            warn!(threshold, read_back, "source did not keep threshold");
            Some(read_back)
        }
    }
}
