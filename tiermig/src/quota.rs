//! Migration Quota
//!
//! `TigerStyle`: Admission is decided before any work is attempted, so the
//! quota bounds attempted migrations, not just successful ones.
//!
//! Per period the gate is `Open` until `limit` blocks have been admitted,
//! then `Closed` until the period rolls over (elapsed time or an explicit
//! reset). The limit is passed in on every call so a live change applies
//! to the very next admission.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::constants::QUOTA_BLOCKS_UNLIMITED;

/// Whether the quota still admits blocks this period.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QuotaGate {
    /// Admissions possible
    Open,
    /// Limit reached until rollover
    Closed,
}

impl QuotaGate {
    /// Stable lowercase name.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::Closed => "closed",
        }
    }
}

impl fmt::Display for QuotaGate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Point-in-time view of the quota.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuotaState {
    /// Blocks admitted since the period started
    pub migrated_this_period: u64,
    /// Limit in force at the last admission
    pub limit: u64,
    /// When the current period started
    pub period_reset_at_us: u64,
    /// Gate position
    pub gate: QuotaGate,
}

/// Rate limiter owned by the engine worker.
#[derive(Debug, Clone)]
pub struct QuotaController {
    migrated_this_period: u64,
    limit: u64,
    period_reset_at_us: u64,
}

impl QuotaController {
    /// Start a period at `now_us` with the given limit.
    #[must_use]
    pub fn new(now_us: u64, limit: u64) -> Self {
        Self {
            migrated_this_period: 0,
            limit,
            period_reset_at_us: now_us,
        }
    }

    /// Roll the period over if `period_us` has elapsed since it started.
    ///
    /// A `period_us` of 0 disables time-based rollover. Returns true if the
    /// period rolled over.
    pub fn maybe_rollover(&mut self, now_us: u64, period_us: u64) -> bool {
        if period_us == 0 {
            return false;
        }
        if now_us.saturating_sub(self.period_reset_at_us) < period_us {
            return false;
        }

        self.reset(now_us);
        true
    }

    /// Start a new period now (explicit external reset).
    pub fn reset(&mut self, now_us: u64) {
        self.migrated_this_period = 0;
        self.period_reset_at_us = now_us;

        // Postcondition
        assert_eq!(self.migrated_this_period, 0, "reset must empty the period");
    }

    /// Admit up to `requested` blocks under `limit`.
    ///
    /// Returns `min(requested, limit - migrated_this_period)` and charges it
    /// to the period. Never exceeds the limit; a limit lowered below the
    /// count already admitted yields 0.
    pub fn admit(&mut self, requested: u64, limit: u64) -> u64 {
        self.limit = limit;

        let headroom = if limit == QUOTA_BLOCKS_UNLIMITED {
            u64::MAX
        } else {
            limit.saturating_sub(self.migrated_this_period)
        };
        let accepted = requested.min(headroom);
        self.migrated_this_period = self.migrated_this_period.saturating_add(accepted);

        // Postconditions
        assert!(accepted <= requested, "admitted more than requested");
        assert!(
            accepted == 0 || limit == QUOTA_BLOCKS_UNLIMITED || self.migrated_this_period <= limit,
            "quota exceeded: {} > {}",
            self.migrated_this_period,
            limit
        );

        accepted
    }

    /// Apply a new limit without admitting anything.
    pub fn set_limit(&mut self, limit: u64) {
        self.limit = limit;
    }

    /// Limit currently in force.
    #[must_use]
    pub fn limit(&self) -> u64 {
        self.limit
    }

    /// Gate position under the current limit.
    #[must_use]
    pub fn gate(&self) -> QuotaGate {
        if self.limit == QUOTA_BLOCKS_UNLIMITED || self.migrated_this_period < self.limit {
            QuotaGate::Open
        } else {
            QuotaGate::Closed
        }
    }

    /// Blocks admitted this period.
    #[must_use]
    pub fn migrated_this_period(&self) -> u64 {
        self.migrated_this_period
    }

    /// Snapshot of the current period.
    #[must_use]
    pub fn state(&self) -> QuotaState {
        QuotaState {
            migrated_this_period: self.migrated_this_period,
            limit: self.limit,
            period_reset_at_us: self.period_reset_at_us,
            gate: self.gate(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tiermig_core::dst::{
        run_property_tests, DeterministicRng, PropertyTestable, SimClock, TimeAdvanceConfig,
    };

    #[test]
    fn test_admit_caps_at_limit() {
        let mut quota = QuotaController::new(0, 5);

        assert_eq!(quota.admit(3, 5), 3);
        assert_eq!(quota.gate(), QuotaGate::Open);
        assert_eq!(quota.admit(3, 5), 2);
        assert_eq!(quota.gate(), QuotaGate::Closed);
        assert_eq!(quota.admit(3, 5), 0);
        assert_eq!(quota.migrated_this_period(), 5);
    }

    #[test]
    fn test_rollover_reopens_gate() {
        let mut quota = QuotaController::new(0, 5);
        for _ in 0..5 {
            assert_eq!(quota.admit(1, 5), 1);
        }
        assert_eq!(quota.gate(), QuotaGate::Closed);

        assert!(!quota.maybe_rollover(999_999, 1_000_000));
        assert_eq!(quota.gate(), QuotaGate::Closed);

        assert!(quota.maybe_rollover(1_000_000, 1_000_000));
        assert_eq!(quota.admit(3, 5), 3);
        assert_eq!(quota.gate(), QuotaGate::Open);
        assert_eq!(quota.state().period_reset_at_us, 1_000_000);
    }

    #[test]
    fn test_zero_period_only_explicit_reset() {
        let mut quota = QuotaController::new(0, 2);
        quota.admit(2, 2);

        assert!(!quota.maybe_rollover(u64::MAX, 0));
        assert_eq!(quota.gate(), QuotaGate::Closed);

        quota.reset(50);
        assert_eq!(quota.gate(), QuotaGate::Open);
        assert_eq!(quota.state().period_reset_at_us, 50);
    }

    #[test]
    fn test_lowering_limit_closes_gate() {
        let mut quota = QuotaController::new(0, 10);
        assert_eq!(quota.admit(6, 10), 6);

        quota.set_limit(4);
        assert_eq!(quota.gate(), QuotaGate::Closed);
        assert_eq!(quota.admit(5, 4), 0);
        assert_eq!(quota.migrated_this_period(), 6);
    }

    #[test]
    fn test_unlimited() {
        let mut quota = QuotaController::new(0, QUOTA_BLOCKS_UNLIMITED);
        assert_eq!(quota.admit(1 << 40, QUOTA_BLOCKS_UNLIMITED), 1 << 40);
        assert_eq!(quota.admit(u64::MAX, QUOTA_BLOCKS_UNLIMITED), u64::MAX);
        assert_eq!(quota.gate(), QuotaGate::Open);
    }

    #[test]
    fn test_zero_limit_admits_nothing() {
        let mut quota = QuotaController::new(0, 0);
        assert_eq!(quota.gate(), QuotaGate::Closed);
        assert_eq!(quota.admit(4, 0), 0);
        quota.reset(1);
        assert_eq!(quota.gate(), QuotaGate::Closed);
    }

    // -------------------------------------------------------------------------
    // Property: sum(accepted) <= limit within every period
    // -------------------------------------------------------------------------

    const PERIOD_US: u64 = 1_000_000;

    struct QuotaModel {
        quota: QuotaController,
        limit: u64,
        /// Largest limit in force at any point of the current period
        period_limit_max: u64,
        accepted_this_period: u64,
        violation: Option<String>,
    }

    #[derive(Debug, Clone)]
    enum QuotaOp {
        Admit(u64),
        SetLimit(u64),
        Reset,
    }

    impl QuotaModel {
        fn new(limit: u64) -> Self {
            Self {
                quota: QuotaController::new(0, limit),
                limit,
                period_limit_max: limit,
                accepted_this_period: 0,
                violation: None,
            }
        }

        fn start_period(&mut self) {
            self.accepted_this_period = 0;
            self.period_limit_max = self.limit;
        }
    }

    impl PropertyTestable for QuotaModel {
        type Operation = QuotaOp;

        fn generate_operation(&self, rng: &mut DeterministicRng) -> Self::Operation {
            match rng.next_usize(0, 9) {
                0 => QuotaOp::SetLimit(rng.next_u64_in(0, 64)),
                1 => QuotaOp::Reset,
                _ => QuotaOp::Admit(rng.next_u64_in(0, 40)),
            }
        }

        fn apply_operation(&mut self, op: &Self::Operation, clock: &SimClock) {
            if self.quota.maybe_rollover(clock.now_us(), PERIOD_US) {
                self.start_period();
            }
            match op {
                QuotaOp::Admit(n) => {
                    let before = self.quota.migrated_this_period();
                    let accepted = self.quota.admit(*n, self.limit);
                    let headroom = self.limit.saturating_sub(before);
                    if accepted != (*n).min(headroom) {
                        self.violation = Some(format!(
                            "admit({}) with headroom {} returned {}",
                            n, headroom, accepted
                        ));
                    }
                    self.accepted_this_period += accepted;
                }
                QuotaOp::SetLimit(limit) => {
                    self.limit = *limit;
                    self.quota.set_limit(*limit);
                    self.period_limit_max = self.period_limit_max.max(*limit);
                }
                QuotaOp::Reset => {
                    self.quota.reset(clock.now_us());
                    self.start_period();
                }
            }
        }

        fn check_invariants(&self) -> Result<(), String> {
            if let Some(violation) = &self.violation {
                return Err(violation.clone());
            }
            if self.accepted_this_period > self.period_limit_max {
                return Err(format!(
                    "accepted {} exceeds every limit of the period (max {})",
                    self.accepted_this_period, self.period_limit_max
                ));
            }
            if self.quota.migrated_this_period() != self.accepted_this_period {
                return Err(format!(
                    "controller counts {} but {} were accepted",
                    self.quota.migrated_this_period(),
                    self.accepted_this_period
                ));
            }
            if self.quota.gate() == QuotaGate::Open
                && self.quota.migrated_this_period() >= self.limit
            {
                return Err("gate open at limit".to_string());
            }
            Ok(())
        }

        fn describe_state(&self) -> String {
            format!(
                "QuotaModel {{ limit: {}, accepted: {}, state: {:?} }}",
                self.limit,
                self.accepted_this_period,
                self.quota.state()
            )
        }
    }

    #[test]
    fn test_quota_bound_property() {
        run_property_tests(
            &[0, 1, 42, 7_777, 0xDEAD_BEEF],
            2_000,
            TimeAdvanceConfig::random(0, 300_000, 0.3),
            || QuotaModel::new(16),
        );
    }
}
