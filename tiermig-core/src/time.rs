//! Clock - Time Source Abstraction
//!
//! `TigerStyle`: All engine time goes through an injectable clock.
//!
//! Times are microseconds since the clock's own origin. Production uses
//! [`TokioClock`]; simulation uses [`crate::dst::SimClock`].

use async_trait::async_trait;
use std::fmt;
use std::time::Duration;
use tokio::time::Instant;

/// Monotonic time source the engine reads and sleeps on.
#[async_trait]
pub trait Clock: Send + Sync + fmt::Debug {
    /// Microseconds since this clock's origin.
    fn now_us(&self) -> u64;

    /// Sleep until `now_us() >= deadline_us`.
    ///
    /// Must be cancellation safe: dropping the future abandons the sleep.
    async fn sleep_until_us(&self, deadline_us: u64);

    /// Sleep for `duration_us` from now.
    async fn sleep_us(&self, duration_us: u64) {
        let deadline_us = self.now_us().saturating_add(duration_us);
        self.sleep_until_us(deadline_us).await;
    }
}

/// Clock backed by tokio's timer.
///
/// Honors paused tokio time, so `#[tokio::test(start_paused = true)]` tests
/// run deterministically.
#[derive(Debug, Clone, Copy)]
pub struct TokioClock {
    origin: Instant,
}

impl TokioClock {
    /// Create a clock whose origin is now.
    #[must_use]
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }

    fn instant_at(&self, us: u64) -> Instant {
        self.origin + Duration::from_micros(us)
    }
}

impl Default for TokioClock {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Clock for TokioClock {
    fn now_us(&self) -> u64 {
        u64::try_from(self.origin.elapsed().as_micros()).unwrap_or(u64::MAX)
    }

    async fn sleep_until_us(&self, deadline_us: u64) {
        tokio::time::sleep_until(self.instant_at(deadline_us)).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_tokio_clock_paused_time() {
        let clock = TokioClock::new();
        assert_eq!(clock.now_us(), 0);

        clock.sleep_until_us(250_000).await;
        assert_eq!(clock.now_us(), 250_000);

        clock.sleep_us(1_000).await;
        assert_eq!(clock.now_us(), 251_000);
    }

    #[tokio::test(start_paused = true)]
    async fn test_tokio_clock_past_deadline_returns() {
        let clock = TokioClock::new();
        tokio::time::advance(Duration::from_millis(10)).await;

        clock.sleep_until_us(5_000).await;
        assert_eq!(clock.now_us(), 10_000);
    }
}
