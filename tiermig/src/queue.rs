//! Candidate Queue
//!
//! `TigerStyle`: One lock, one swap, bounded.
//!
//! For sources that push rather than get polled: a sampler thread appends
//! candidates, the engine takes the whole buffer in one `mem::take` under the
//! lock. Overflow is dropped and counted; a hot block shows up again.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tiermig_core::{
    BandwidthStats, Histogram, HotCandidate, HotnessError, HotnessSource,
    CANDIDATE_QUEUE_CAPACITY_MAX, HOTNESS_POLL_CANDIDATES_COUNT_MAX,
};

/// Bounded multi-producer hand-off buffer.
#[derive(Debug)]
pub struct CandidateQueue {
    buffer: Mutex<Vec<HotCandidate>>,
    capacity: usize,
    dropped: AtomicU64,
}

impl Default for CandidateQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl CandidateQueue {
    /// Create a queue bounded by `CANDIDATE_QUEUE_CAPACITY_MAX`.
    #[must_use]
    pub fn new() -> Self {
        Self::with_capacity(CANDIDATE_QUEUE_CAPACITY_MAX)
    }

    /// Create a queue with a smaller bound.
    ///
    /// # Panics
    /// Panics if `capacity` is zero or above `CANDIDATE_QUEUE_CAPACITY_MAX`.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        // Preconditions
        assert!(capacity > 0, "capacity must be positive");
        assert!(
            capacity <= CANDIDATE_QUEUE_CAPACITY_MAX,
            "capacity {} exceeds max {}",
            capacity,
            CANDIDATE_QUEUE_CAPACITY_MAX
        );

        Self {
            buffer: Mutex::new(Vec::new()),
            capacity,
            dropped: AtomicU64::new(0),
        }
    }

    /// Append one candidate. Returns false if it was dropped.
    pub fn push(&self, candidate: HotCandidate) -> bool {
        let mut buffer = self.buffer.lock();
        if buffer.len() >= self.capacity {
            drop(buffer);
            self.dropped.fetch_add(1, Ordering::Relaxed);
            return false;
        }
        buffer.push(candidate);
        true
    }

    /// Append as many candidates as fit. Returns how many were accepted.
    pub fn extend(&self, candidates: impl IntoIterator<Item = HotCandidate>) -> usize {
        let mut offered = 0_usize;
        let mut accepted = 0_usize;
        {
            let mut buffer = self.buffer.lock();
            for candidate in candidates {
                offered += 1;
                if buffer.len() < self.capacity {
                    buffer.push(candidate);
                    accepted += 1;
                }
            }
        }

        let dropped = offered - accepted;
        if dropped > 0 {
            self.dropped.fetch_add(dropped as u64, Ordering::Relaxed);
        }
        accepted
    }

    /// Take everything queued.
    #[must_use]
    pub fn drain(&self) -> Vec<HotCandidate> {
        std::mem::take(&mut *self.buffer.lock())
    }

    /// Take at most `max` candidates, oldest first.
    #[must_use]
    pub fn drain_up_to(&self, max: usize) -> Vec<HotCandidate> {
        let mut buffer = self.buffer.lock();
        if buffer.len() <= max {
            return std::mem::take(&mut *buffer);
        }
        let rest = buffer.split_off(max);
        std::mem::replace(&mut *buffer, rest)
    }

    /// Candidates waiting.
    #[must_use]
    pub fn len(&self) -> usize {
        self.buffer.lock().len()
    }

    /// Whether nothing is waiting.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.buffer.lock().is_empty()
    }

    /// Bound on queued candidates.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Candidates dropped on overflow since creation.
    #[must_use]
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

/// A [`HotnessSource`] whose candidates come from a [`CandidateQueue`].
///
/// Everything except `poll_candidates` goes to the inner source.
#[derive(Debug)]
pub struct QueueFedSource<S> {
    queue: Arc<CandidateQueue>,
    inner: S,
}

impl<S: HotnessSource> QueueFedSource<S> {
    /// Pair a queue with the source that owns threshold and histogram.
    #[must_use]
    pub fn new(queue: Arc<CandidateQueue>, inner: S) -> Self {
        Self { queue, inner }
    }

    /// The queue producers push into.
    #[must_use]
    pub fn queue(&self) -> &Arc<CandidateQueue> {
        &self.queue
    }

    /// The wrapped source.
    #[must_use]
    pub fn inner(&self) -> &S {
        &self.inner
    }
}

impl<S: HotnessSource> HotnessSource for QueueFedSource<S> {
    fn poll_candidates(&self) -> Result<Vec<HotCandidate>, HotnessError> {
        Ok(self.queue.drain_up_to(HOTNESS_POLL_CANDIDATES_COUNT_MAX))
    }

    fn set_threshold(&self, threshold: u32) {
        self.inner.set_threshold(threshold);
    }

    fn get_threshold(&self) -> u32 {
        self.inner.get_threshold()
    }

    fn reset_counters(&self) {
        self.inner.reset_counters();
    }

    fn begin_histogram_window(&self) {
        self.inner.begin_histogram_window();
    }

    fn histogram_ready(&self, expected_bins: usize) -> bool {
        self.inner.histogram_ready(expected_bins)
    }

    fn fetch_histogram(&self) -> Result<Histogram, HotnessError> {
        self.inner.fetch_histogram()
    }

    fn read_bandwidth_stats(&self) -> BandwidthStats {
        self.inner.read_bandwidth_stats()
    }

    fn set_access_sample_period(&self, period: u32) {
        self.inner.set_access_sample_period(period);
    }

    fn set_state_sample_period(&self, period: u32) {
        self.inner.set_state_sample_period(period);
    }
}
