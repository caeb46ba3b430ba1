//! `TigerStyle` Constants
//!
//! All limits use big-endian naming: `CATEGORY_SPECIFICS_UNIT_LIMIT`
//! Example: `HISTOGRAM_BINS_COUNT_MAX` (not `MAX_HISTOGRAM_BINS`)
//!
//! Every constant includes units in the name:
//! - _US for microseconds
//! - _CYCLES for engine-cycle counts
//! - _`COUNT_MAX/DEFAULT` for quantity limits

// =============================================================================
// Time
// =============================================================================

/// Microseconds per millisecond
pub const TIME_US_PER_MS: u64 = 1_000;

/// Microseconds per second
pub const TIME_US_PER_SEC: u64 = 1_000 * TIME_US_PER_MS;

// =============================================================================
// Engine Loop
// =============================================================================

/// Default interval between scanning cycles
pub const ENGINE_SCAN_INTERVAL_US_DEFAULT: u64 = 100 * TIME_US_PER_MS; // 100ms

/// Smallest accepted scanning interval (keeps the worker off a busy loop)
pub const ENGINE_SCAN_INTERVAL_US_MIN: u64 = 100;

/// Largest accepted scanning interval
pub const ENGINE_SCAN_INTERVAL_US_MAX: u64 = 3_600 * TIME_US_PER_SEC; // 1 hour

/// Reset the hotness source counters every N cycles
pub const ENGINE_COUNTER_RESET_PERIOD_CYCLES_DEFAULT: u64 = 10;

/// Log (and reset) the rolling migration window every N cycles
pub const ENGINE_STATS_LOG_PERIOD_CYCLES_DEFAULT: u64 = 10;

/// Upper bound for every cycle-count period tunable
pub const ENGINE_PERIOD_CYCLES_MAX: u64 = 1_000_000;

// =============================================================================
// Hotness Signal
// =============================================================================

/// Default hotness threshold pushed to the source
pub const HOTNESS_THRESHOLD_DEFAULT: u32 = 2;

/// Default access sampling period (0 = sample every access)
pub const HOTNESS_ACCESS_SAMPLE_PERIOD_DEFAULT: u32 = 0;

/// Default bandwidth-state sampling period
pub const HOTNESS_STATE_SAMPLE_PERIOD_DEFAULT: u32 = 100;

/// Maximum number of candidates a single poll may return
pub const HOTNESS_POLL_CANDIDATES_COUNT_MAX: usize = 64 * 1024;

/// Bytes per base page (candidate granularity)
pub const HOTNESS_PAGE_SIZE_BYTES: u64 = 4096;

/// Shift converting a physical address to a frame number
pub const HOTNESS_PAGE_SHIFT: u32 = 12;

// =============================================================================
// Histogram / Error Bound
// =============================================================================

/// Default number of histogram bins
pub const HISTOGRAM_BINS_COUNT_DEFAULT: usize = 64;

/// Maximum number of histogram bins
pub const HISTOGRAM_BINS_COUNT_MAX: usize = 4096;

/// Refresh the histogram every N cycles
pub const HISTOGRAM_REFRESH_PERIOD_CYCLES_DEFAULT: u64 = 50;

/// Default percentile used for the error bound
pub const HISTOGRAM_PERCENTILE_DEFAULT: u32 = 50;

/// Maximum percentile
pub const HISTOGRAM_PERCENTILE_MAX: u32 = 100;

/// Readiness polls before a histogram fetch is abandoned
pub const HISTOGRAM_FETCH_RETRIES_MAX: u32 = 10;

/// Backoff before each readiness poll
pub const HISTOGRAM_FETCH_BACKOFF_US: u64 = 500;

// =============================================================================
// Quota
// =============================================================================

/// Default number of blocks admitted per quota period
pub const QUOTA_BLOCKS_PER_PERIOD_DEFAULT: u64 = 64 * 1024;

/// Sentinel limit meaning "no quota"
pub const QUOTA_BLOCKS_UNLIMITED: u64 = u64::MAX;

/// Default quota period
pub const QUOTA_PERIOD_US_DEFAULT: u64 = TIME_US_PER_SEC; // 1s

// =============================================================================
// Candidate Queue
// =============================================================================

/// Maximum candidates buffered by the push-fed queue
pub const CANDIDATE_QUEUE_CAPACITY_MAX: usize = 256 * 1024;

// =============================================================================
// DST (Deterministic Simulation Testing)
// =============================================================================

/// Maximum simulation steps
pub const DST_SIMULATION_STEPS_MAX: u64 = 1_000_000;

/// Maximum fault probability
pub const DST_FAULT_PROBABILITY_MAX: f64 = 1.0;

/// Maximum single time advance in simulation
pub const DST_TIME_ADVANCE_US_MAX: u64 = 86_400 * TIME_US_PER_SEC; // 24 hours

// =============================================================================
// Compile-time Assertions
// =============================================================================

const _: () = {
    assert!(ENGINE_SCAN_INTERVAL_US_MIN <= ENGINE_SCAN_INTERVAL_US_DEFAULT);
    assert!(ENGINE_SCAN_INTERVAL_US_DEFAULT <= ENGINE_SCAN_INTERVAL_US_MAX);
    assert!(HISTOGRAM_BINS_COUNT_DEFAULT <= HISTOGRAM_BINS_COUNT_MAX);
    assert!(HISTOGRAM_PERCENTILE_DEFAULT <= HISTOGRAM_PERCENTILE_MAX);
    assert!(HISTOGRAM_FETCH_RETRIES_MAX > 0);
    assert!(1 << HOTNESS_PAGE_SHIFT == HOTNESS_PAGE_SIZE_BYTES);
};
