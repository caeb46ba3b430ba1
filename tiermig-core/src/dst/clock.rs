//! SimClock - Simulated Time
//!
//! `TigerStyle`: Deterministic, controllable time for simulation.
//! Supports async sleep/notify for coordinating time-dependent tasks.

use crate::constants::{DST_TIME_ADVANCE_US_MAX, TIME_US_PER_MS};
use crate::time::Clock;
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;

/// A simulated clock for deterministic testing.
///
/// `TigerStyle`:
/// - Time only moves forward
/// - All time operations are explicit
/// - No reliance on system time
/// - Supports async sleep with notify for coordination
///
/// With auto-advance enabled, a sleeper jumps the clock straight to its
/// deadline instead of waiting for someone to advance it. Useful for
/// single-task components whose sleeps are backoffs.
#[derive(Debug, Clone)]
pub struct SimClock {
    /// Current time in microseconds (thread-safe)
    current_us: Arc<AtomicU64>,
    /// Sleepers advance time themselves
    auto_advance: Arc<AtomicBool>,
    /// Notify waiters when time advances
    notify: Arc<Notify>,
}

impl SimClock {
    /// Create a new clock starting at time zero.
    ///
    /// # Example
    /// ```
    /// use tiermig_core::dst::SimClock;
    /// let clock = SimClock::new();
    /// assert_eq!(clock.now_us(), 0);
    /// ```
    #[must_use]
    pub fn new() -> Self {
        Self::at_us(0)
    }

    /// Create a clock starting at the given microsecond timestamp.
    #[must_use]
    pub fn at_us(start_us: u64) -> Self {
        Self {
            current_us: Arc::new(AtomicU64::new(start_us)),
            auto_advance: Arc::new(AtomicBool::new(false)),
            notify: Arc::new(Notify::new()),
        }
    }

    /// Make sleepers advance the clock to their own deadline.
    #[must_use]
    pub fn with_auto_advance(self) -> Self {
        self.auto_advance.store(true, Ordering::SeqCst);
        self
    }

    /// Whether sleepers advance the clock themselves.
    #[must_use]
    pub fn is_auto_advance(&self) -> bool {
        self.auto_advance.load(Ordering::SeqCst)
    }

    /// Get current time in microseconds.
    #[must_use]
    pub fn now_us(&self) -> u64 {
        self.current_us.load(Ordering::SeqCst)
    }

    /// Get current time in milliseconds (truncated).
    #[must_use]
    pub fn now_ms(&self) -> u64 {
        self.now_us() / TIME_US_PER_MS
    }

    /// Advance time by the given microseconds.
    ///
    /// # Panics
    /// Panics if `us` exceeds `DST_TIME_ADVANCE_US_MAX`.
    ///
    /// # Returns
    /// The new current time.
    pub fn advance_us(&self, us: u64) -> u64 {
        // Preconditions
        assert!(
            us <= DST_TIME_ADVANCE_US_MAX,
            "advance_us({}) exceeds max ({})",
            us,
            DST_TIME_ADVANCE_US_MAX
        );

        let old_time = self.current_us.fetch_add(us, Ordering::SeqCst);
        let new_time = old_time.saturating_add(us);

        self.notify.notify_waiters();

        // Postcondition
        assert!(new_time >= old_time, "time must not go backwards");

        new_time
    }

    /// Advance time by the given milliseconds.
    ///
    /// # Panics
    /// Panics if the advance exceeds `DST_TIME_ADVANCE_US_MAX`.
    pub fn advance_ms(&self, ms: u64) -> u64 {
        self.advance_us(ms.saturating_mul(TIME_US_PER_MS))
    }

    /// Set time to absolute value.
    ///
    /// # Panics
    /// Panics if new time is less than current time.
    pub fn set_us(&self, us: u64) {
        let current = self.now_us();
        // Precondition
        assert!(
            us >= current,
            "cannot set time backwards: {} < {}",
            us,
            current
        );

        self.current_us.store(us, Ordering::SeqCst);
        self.notify.notify_waiters();

        // Postcondition
        assert!(self.now_us() >= us, "time must be set correctly");
    }

    /// Get elapsed time since a given timestamp.
    ///
    /// # Panics
    /// Panics if since is in the future.
    #[must_use]
    pub fn elapsed_since(&self, since_us: u64) -> u64 {
        let current = self.now_us();
        // Precondition
        assert!(
            since_us <= current,
            "elapsed_since({}) is in the future (now={})",
            since_us,
            current
        );

        current - since_us
    }

    /// Check if a deadline (in us) has passed.
    #[must_use]
    pub fn is_past_us(&self, deadline_us: u64) -> bool {
        self.now_us() >= deadline_us
    }

    /// Sleep until a specific deadline.
    ///
    /// Waits for another task to advance time, unless auto-advance is on.
    pub async fn sleep_until_us(&self, deadline_us: u64) {
        loop {
            // Register interest before checking, so an advance between the
            // check and the await is not lost.
            let mut notified = std::pin::pin!(self.notify.notified());
            notified.as_mut().enable();

            if self.now_us() >= deadline_us {
                return;
            }

            if self.is_auto_advance() {
                self.current_us.fetch_max(deadline_us, Ordering::SeqCst);
                self.notify.notify_waiters();
                tokio::task::yield_now().await;
                return;
            }

            notified.await;
        }
    }

    /// Sleep until the specified duration has passed.
    pub async fn sleep_us(&self, duration_us: u64) {
        let deadline_us = self.now_us().saturating_add(duration_us);
        self.sleep_until_us(deadline_us).await;
    }
}

impl Default for SimClock {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Clock for SimClock {
    fn now_us(&self) -> u64 {
        SimClock::now_us(self)
    }

    async fn sleep_until_us(&self, deadline_us: u64) {
        SimClock::sleep_until_us(self, deadline_us).await;
    }
}
