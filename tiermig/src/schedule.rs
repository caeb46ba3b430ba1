//! Cycle Schedule
//!
//! `TigerStyle`: Deadlines sit on a fixed grid; debt never exceeds one interval.
//!
//! Each deadline is the previous one plus the interval, so the time spent
//! inside a cycle does not push later cycles back. A cycle that ends past
//! the next deadline is late: within one interval the next cycle starts at
//! once, beyond that the schedule snaps to the first grid point after now.

/// How the next deadline was placed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tick {
    /// The next deadline is still ahead
    OnTime,
    /// Overran by less than an interval; the next cycle runs immediately
    Late {
        /// How far past the missed deadline
        lateness_us: u64,
    },
    /// Overran by an interval or more; skipped grid points are dropped
    Snapped {
        /// How far past the missed deadline
        lateness_us: u64,
        /// Grid points skipped
        skipped: u64,
    },
}

impl Tick {
    /// Whether the cycle overran.
    #[must_use]
    pub fn is_late(&self) -> bool {
        !matches!(self, Self::OnTime)
    }

    /// Overrun, 0 when on time.
    #[must_use]
    pub fn lateness_us(&self) -> u64 {
        match *self {
            Self::OnTime => 0,
            Self::Late { lateness_us } | Self::Snapped { lateness_us, .. } => lateness_us,
        }
    }
}

/// Drift-compensated deadline tracker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CycleSchedule {
    deadline_us: u64,
}

impl CycleSchedule {
    /// First deadline one interval from now.
    #[must_use]
    pub fn new(now_us: u64, interval_us: u64) -> Self {
        Self {
            deadline_us: now_us.saturating_add(interval_us),
        }
    }

    /// Restart the grid one interval from now.
    pub fn reset(&mut self, now_us: u64, interval_us: u64) {
        self.deadline_us = now_us.saturating_add(interval_us);
    }

    /// When the next cycle should start.
    #[must_use]
    pub fn deadline_us(&self) -> u64 {
        self.deadline_us
    }

    /// Place the deadline after a cycle that finished at `now_us`.
    ///
    /// # Panics
    /// Panics if `interval_us` is zero.
    pub fn advance(&mut self, now_us: u64, interval_us: u64) -> Tick {
        // Precondition
        assert!(interval_us > 0, "interval must be positive");

        let next = self.deadline_us.saturating_add(interval_us);
        if now_us <= next {
            self.deadline_us = next;
            return Tick::OnTime;
        }

        let lateness_us = now_us - next;
        let tick = if lateness_us < interval_us {
            self.deadline_us = next;
            Tick::Late { lateness_us }
        } else {
            let skipped = lateness_us / interval_us + 1;
            self.deadline_us = next.saturating_add(skipped.saturating_mul(interval_us));
            Tick::Snapped {
                lateness_us,
                skipped,
            }
        };

        // Postcondition
        assert!(
            self.deadline_us.saturating_add(interval_us) > now_us,
            "schedule debt exceeds one interval"
        );
        tick
    }
}
