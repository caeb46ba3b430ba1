//! SimHotnessSource - Simulated Hotness Signal
//!
//! `TigerStyle`: Deterministic workload, explicit fault points, every call counted.
//!
//! Candidates come from two places: addresses queued explicitly by a test,
//! and an optional workload that draws hot frames from a fixed set on every
//! poll. The histogram is whatever the test installs, plus one sample per
//! generated candidate.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use tiermig_core::dst::{op, DeterministicRng, FaultInjector};
use tiermig_core::{
    BandwidthStats, Histogram, HotCandidate, HotnessError, HotnessSource,
    HOTNESS_POLL_CANDIDATES_COUNT_MAX,
};

/// Bytes of sampled read traffic charged per generated candidate.
const SIM_READ_BYTES_PER_CANDIDATE: u64 = 64;

/// Bytes of sampled write traffic charged per generated candidate.
const SIM_WRITE_BYTES_PER_CANDIDATE: u64 = 16;

#[derive(Debug, Clone)]
struct Workload {
    hot_frames: Vec<u64>,
    per_poll_max: usize,
}

#[derive(Debug)]
struct SourceState {
    rng: DeterministicRng,
    pending: Vec<HotCandidate>,
    workload: Option<Workload>,
    histogram: Vec<u64>,
    force_ready: bool,
    bandwidth: BandwidthStats,
}

/// Simulated hotness source for DST.
#[derive(Debug)]
pub struct SimHotnessSource {
    state: Mutex<SourceState>,
    faults: Arc<FaultInjector>,
    threshold: AtomicU32,
    threshold_cap: Option<u32>,
    access_sample_period: AtomicU32,
    state_sample_period: AtomicU32,
    // Statistics
    polls: AtomicU64,
    poll_failures: AtomicU64,
    set_threshold_calls: AtomicU64,
    reset_calls: AtomicU64,
    windows_opened: AtomicU64,
    fetch_calls: AtomicU64,
}

impl SimHotnessSource {
    /// Create a source with no faults and no workload.
    #[must_use]
    pub fn new(rng: DeterministicRng) -> Self {
        Self {
            state: Mutex::new(SourceState {
                rng,
                pending: Vec::new(),
                workload: None,
                histogram: Vec::new(),
                force_ready: false,
                bandwidth: BandwidthStats::default(),
            }),
            faults: Arc::new(FaultInjector::disabled()),
            threshold: AtomicU32::new(0),
            threshold_cap: None,
            access_sample_period: AtomicU32::new(0),
            state_sample_period: AtomicU32::new(0),
            polls: AtomicU64::new(0),
            poll_failures: AtomicU64::new(0),
            set_threshold_calls: AtomicU64::new(0),
            reset_calls: AtomicU64::new(0),
            windows_opened: AtomicU64::new(0),
            fetch_calls: AtomicU64::new(0),
        }
    }

    /// Share a fault injector with the rest of the simulation.
    #[must_use]
    pub fn with_faults(mut self, faults: Arc<FaultInjector>) -> Self {
        self.faults = faults;
        self
    }

    /// Generate up to `per_poll_max` candidates per poll from `hot_frames`.
    ///
    /// # Panics
    /// Panics if `hot_frames` is empty.
    #[must_use]
    pub fn with_workload(self, hot_frames: Vec<u64>, per_poll_max: usize) -> Self {
        // Preconditions
        assert!(!hot_frames.is_empty(), "workload needs at least one frame");
        assert!(
            per_poll_max <= HOTNESS_POLL_CANDIDATES_COUNT_MAX,
            "per_poll_max exceeds poll bound"
        );

        self.state.lock().workload = Some(Workload {
            hot_frames,
            per_poll_max,
        });
        self
    }

    /// Silently clamp written thresholds, as saturating hardware would.
    #[must_use]
    pub fn with_threshold_cap(mut self, cap: u32) -> Self {
        self.threshold_cap = Some(cap);
        self
    }

    /// Queue candidates for the next poll.
    pub fn push_candidates(&self, candidates: impl IntoIterator<Item = HotCandidate>) {
        self.state.lock().pending.extend(candidates);
    }

    /// Install histogram contents. Ready once the bin count matches.
    pub fn set_histogram(&self, bins: Vec<u64>) {
        self.state.lock().histogram = bins;
    }

    /// Report ready regardless of the bin count.
    pub fn force_ready(&self, ready: bool) {
        self.state.lock().force_ready = ready;
    }

    /// Last access sampling period written.
    #[must_use]
    pub fn access_sample_period(&self) -> u32 {
        self.access_sample_period.load(Ordering::Relaxed)
    }

    /// Last state sampling period written.
    #[must_use]
    pub fn state_sample_period(&self) -> u32 {
        self.state_sample_period.load(Ordering::Relaxed)
    }

    /// Successful polls.
    #[must_use]
    pub fn polls(&self) -> u64 {
        self.polls.load(Ordering::Relaxed)
    }

    /// Polls failed by fault injection.
    #[must_use]
    pub fn poll_failures(&self) -> u64 {
        self.poll_failures.load(Ordering::Relaxed)
    }

    /// Calls to `set_threshold`.
    #[must_use]
    pub fn set_threshold_calls(&self) -> u64 {
        self.set_threshold_calls.load(Ordering::Relaxed)
    }

    /// Calls to `reset_counters`.
    #[must_use]
    pub fn reset_calls(&self) -> u64 {
        self.reset_calls.load(Ordering::Relaxed)
    }

    /// Calls to `begin_histogram_window`.
    #[must_use]
    pub fn windows_opened(&self) -> u64 {
        self.windows_opened.load(Ordering::Relaxed)
    }

    /// Calls to `fetch_histogram`.
    #[must_use]
    pub fn fetch_calls(&self) -> u64 {
        self.fetch_calls.load(Ordering::Relaxed)
    }
}

impl HotnessSource for SimHotnessSource {
    fn poll_candidates(&self) -> Result<Vec<HotCandidate>, HotnessError> {
        if let Some(fault) = self.faults.should_inject(op::POLL_CANDIDATES) {
            self.poll_failures.fetch_add(1, Ordering::Relaxed);
            return Err(HotnessError::simulated_fault(fault.as_str()));
        }
        self.polls.fetch_add(1, Ordering::Relaxed);

        let mut state = self.state.lock();
        let mut candidates = std::mem::take(&mut state.pending);

        if let Some(workload) = state.workload.clone() {
            let count = state.rng.next_usize(0, workload.per_poll_max);
            let bins = state.histogram.len();
            for _ in 0..count {
                let frame = *state.rng.choose(&workload.hot_frames);
                candidates.push(HotCandidate::from_frame(frame));
                if bins > 0 {
                    let bin = state.rng.next_usize(0, bins - 1);
                    state.histogram[bin] += 1;
                }
            }

            let generated = count as u64;
            let bandwidth = &mut state.bandwidth;
            bandwidth.read += generated * SIM_READ_BYTES_PER_CANDIDATE;
            bandwidth.write += generated * SIM_WRITE_BYTES_PER_CANDIDATE;
            bandwidth.total = bandwidth.read + bandwidth.write;
        }

        if candidates.len() > HOTNESS_POLL_CANDIDATES_COUNT_MAX {
            let overflow = candidates.split_off(HOTNESS_POLL_CANDIDATES_COUNT_MAX);
            state.pending = overflow;
        }

        // Postcondition
        assert!(candidates.len() <= HOTNESS_POLL_CANDIDATES_COUNT_MAX);
        Ok(candidates)
    }

    fn set_threshold(&self, threshold: u32) {
        self.set_threshold_calls.fetch_add(1, Ordering::Relaxed);
        let stored = self.threshold_cap.map_or(threshold, |cap| threshold.min(cap));
        self.threshold.store(stored, Ordering::Relaxed);
    }

    fn get_threshold(&self) -> u32 {
        self.threshold.load(Ordering::Relaxed)
    }

    fn reset_counters(&self) {
        self.reset_calls.fetch_add(1, Ordering::Relaxed);
    }

    fn begin_histogram_window(&self) {
        self.windows_opened.fetch_add(1, Ordering::Relaxed);
    }

    fn histogram_ready(&self, expected_bins: usize) -> bool {
        if self.faults.should_inject(op::HISTOGRAM_READY).is_some() {
            return false;
        }
        let state = self.state.lock();
        state.force_ready || state.histogram.len() == expected_bins
    }

    fn fetch_histogram(&self) -> Result<Histogram, HotnessError> {
        self.fetch_calls.fetch_add(1, Ordering::Relaxed);
        if let Some(fault) = self.faults.should_inject(op::FETCH_HISTOGRAM) {
            return Err(HotnessError::simulated_fault(fault.as_str()));
        }
        Ok(Histogram::from_bins(self.state.lock().histogram.clone()))
    }

    fn read_bandwidth_stats(&self) -> BandwidthStats {
        self.state.lock().bandwidth
    }

    fn set_access_sample_period(&self, period: u32) {
        self.access_sample_period.store(period, Ordering::Relaxed);
    }

    fn set_state_sample_period(&self, period: u32) {
        self.state_sample_period.store(period, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tiermig_core::dst::{FaultConfig, FaultInjectorBuilder, FaultType};

    #[test]
    fn test_poll_is_destructive() {
        let source = SimHotnessSource::new(DeterministicRng::new(42));
        source.push_candidates([HotCandidate::from_frame(1), HotCandidate::from_frame(2)]);

        assert_eq!(source.poll_candidates().unwrap().len(), 2);
        assert!(source.poll_candidates().unwrap().is_empty());
        assert_eq!(source.polls(), 2);
    }

    #[test]
    fn test_workload_is_deterministic() {
        let run = |seed| {
            let source = SimHotnessSource::new(DeterministicRng::new(seed))
                .with_workload(vec![10, 20, 30], 8);
            (0..5)
                .map(|_| source.poll_candidates().unwrap())
                .collect::<Vec<_>>()
        };

        let first = run(99);
        assert_eq!(first, run(99));
        for candidates in &first {
            assert!(candidates.len() <= 8);
            assert!(candidates.iter().all(|c| [10, 20, 30].contains(&c.frame())));
        }
    }

    #[test]
    fn test_workload_feeds_histogram_and_bandwidth() {
        let source =
            SimHotnessSource::new(DeterministicRng::new(3)).with_workload(vec![1], 4);
        source.set_histogram(vec![0; 8]);

        let mut generated = 0;
        for _ in 0..10 {
            generated += source.poll_candidates().unwrap().len() as u64;
        }

        assert_eq!(source.fetch_histogram().unwrap().total(), generated);
        let bandwidth = source.read_bandwidth_stats();
        assert_eq!(bandwidth.read, generated * SIM_READ_BYTES_PER_CANDIDATE);
        assert_eq!(bandwidth.total, bandwidth.read + bandwidth.write);
    }

    #[test]
    fn test_poll_fault() {
        let faults = FaultInjectorBuilder::new(DeterministicRng::new(1))
            .with_fault(FaultConfig::new(FaultType::HotnessPollFail, 1.0).with_max_injections(1))
            .build();
        let source = SimHotnessSource::new(DeterministicRng::new(42)).with_faults(Arc::new(faults));
        source.push_candidates([HotCandidate::from_frame(5)]);

        assert!(source.poll_candidates().is_err());
        assert_eq!(source.poll_failures(), 1);
        // Queued candidates survive a failed poll
        assert_eq!(source.poll_candidates().unwrap().len(), 1);
    }

    #[test]
    fn test_threshold_cap() {
        let source = SimHotnessSource::new(DeterministicRng::new(42)).with_threshold_cap(8);
        source.set_threshold(5);
        assert_eq!(source.get_threshold(), 5);
        source.set_threshold(20);
        assert_eq!(source.get_threshold(), 8);
        assert_eq!(source.set_threshold_calls(), 2);
    }

    #[test]
    fn test_histogram_ready_on_bin_count() {
        let source = SimHotnessSource::new(DeterministicRng::new(42));
        source.set_histogram(vec![0; 4]);
        assert!(source.histogram_ready(4));
        assert!(!source.histogram_ready(8));
        source.force_ready(true);
        assert!(source.histogram_ready(8));
    }
}
