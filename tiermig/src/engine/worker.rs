//! Engine Worker
//!
//! `TigerStyle`: One cycle at a time; every wait is interruptible.
//!
//! The control loop behind [`super::MigrationEngine`]. It sleeps until the
//! next deadline, selecting over the clock, the stop channel and the enable
//! gate, then runs one cycle: sync the source, poll, validate, admit,
//! migrate, and the periodic maintenance steps. Re-enabling the gate runs
//! the maintenance steps at once, without a poll.

use std::sync::Arc;
use tiermig_core::{Clock, Histogram, HotCandidate, HotnessSource};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::config::EngineConfig;
use crate::controller::HotnessController;
use crate::histogram::HistogramEstimator;
use crate::migration::{MigrationBatch, MigrationBatchExecutor};
use crate::quota::{QuotaController, QuotaGate};
use crate::schedule::{CycleSchedule, Tick};
use crate::stats::{Counter, EngineState, EngineStats};
use crate::validator::CandidateValidator;

use super::{EngineParts, EngineShared};

/// Why the worker stopped waiting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Wake {
    /// The deadline passed; run a cycle
    Deadline,
    /// The gate is closed
    Disabled,
    /// Stop was requested
    Stop,
}

/// `true` every `period` steps, starting at step 0; a period of 0 never fires.
fn every(step: u64, period: u64) -> bool {
    period > 0 && step % period == 0
}

pub(crate) struct Worker {
    source: Arc<dyn HotnessSource>,
    validator: CandidateValidator,
    executor: MigrationBatchExecutor,
    clock: Arc<dyn Clock>,
    shared: Arc<EngineShared>,
    stop: watch::Receiver<bool>,
    gate: watch::Receiver<bool>,
    quota: QuotaController,
    estimator: HistogramEstimator,
    controller: HotnessController,
    schedule: CycleSchedule,
    /// Loop iterations started, including re-enable passes
    cycle: u64,
}

impl Worker {
    pub(crate) fn new(
        parts: EngineParts,
        shared: Arc<EngineShared>,
        stop: watch::Receiver<bool>,
    ) -> Self {
        let config = shared.tunables.snapshot();
        let now_us = parts.clock.now_us();
        let gate = shared.tunables.subscribe_gate();

        Self {
            validator: CandidateValidator::new(Arc::clone(&parts.pool)),
            executor: MigrationBatchExecutor::new(parts.pool, parts.migrator),
            source: parts.source,
            clock: parts.clock,
            shared,
            stop,
            gate,
            quota: QuotaController::new(now_us, config.quota_limit),
            estimator: HistogramEstimator::new(),
            controller: HotnessController::new(),
            schedule: CycleSchedule::new(now_us, config.scan_interval_us),
            cycle: 0,
        }
    }

    fn stats(&self) -> &EngineStats {
        &self.shared.stats
    }

    fn interval_us(&self) -> u64 {
        self.shared.tunables.snapshot().scan_interval_us
    }

    /// Run until stopped.
    pub(crate) async fn run(mut self) {
        info!("migration worker running");
        if *self.gate.borrow() {
            self.stats().set_state(EngineState::Running);
        }

        loop {
            match self.sleep_until_deadline().await {
                Wake::Stop => break,
                Wake::Disabled => {
                    self.stats().set_state(EngineState::Disabled);
                    debug!(cycle = self.cycle, "gate closed, waiting");
                    if !self.wait_for_enable().await {
                        break;
                    }
                    // Idle time while disabled never counts as drift
                    let interval_us = self.interval_us();
                    self.schedule.reset(self.clock.now_us(), interval_us);
                    self.stats().set_state(EngineState::Running);
                    info!(deadline_us = self.schedule.deadline_us(), "gate opened");
                    self.resume().await;
                    continue;
                }
                Wake::Deadline => {}
            }

            self.stats().set_state(EngineState::Running);
            self.run_cycle().await;

            let interval_us = self.interval_us();
            let tick = self.schedule.advance(self.clock.now_us(), interval_us);
            match tick {
                Tick::OnTime => {}
                Tick::Late { lateness_us } => {
                    self.stats().incr(Counter::LateCycles);
                    warn!(cycle = self.cycle, lateness_us, "cycle overran, catching up");
                }
                Tick::Snapped {
                    lateness_us,
                    skipped,
                } => {
                    self.stats().incr(Counter::LateCycles);
                    warn!(
                        cycle = self.cycle,
                        lateness_us, skipped, "cycle overran by an interval or more, snapping"
                    );
                }
            }
        }

        self.stats().set_state(EngineState::Stopped);
        info!(cycles = self.cycle, "migration worker exited");
    }

    /// Sleep until the deadline, waking early on stop or a gate change.
    async fn sleep_until_deadline(&mut self) -> Wake {
        loop {
            if *self.stop.borrow_and_update() {
                return Wake::Stop;
            }
            if !*self.gate.borrow_and_update() {
                return Wake::Disabled;
            }

            let deadline_us = self.schedule.deadline_us();
            if self.clock.now_us() >= deadline_us {
                return Wake::Deadline;
            }

            tokio::select! {
                () = self.clock.sleep_until_us(deadline_us) => return Wake::Deadline,
                changed = self.stop.changed() => {
                    if changed.is_err() {
                        return Wake::Stop;
                    }
                }
                changed = self.gate.changed() => {
                    if changed.is_err() {
                        return Wake::Stop;
                    }
                }
            }
        }
    }

    /// Block until the gate opens. Returns false on stop.
    async fn wait_for_enable(&mut self) -> bool {
        loop {
            if *self.stop.borrow_and_update() {
                return false;
            }
            if *self.gate.borrow_and_update() {
                return true;
            }

            tokio::select! {
                changed = self.stop.changed() => {
                    if changed.is_err() {
                        return false;
                    }
                }
                changed = self.gate.changed() => {
                    if changed.is_err() {
                        return false;
                    }
                }
            }
        }
    }

    #[tracing::instrument(skip(self), fields(cycle = self.cycle + 1))]
    async fn run_cycle(&mut self) {
        self.cycle += 1;
        let config = self.shared.tunables.snapshot();
        let now_us = self.clock.now_us();
        self.stats().incr(Counter::Cycles);

        self.apply_control_requests(&config, now_us);

        // Threshold and sample periods
        let report = self.controller.sync(
            self.source.as_ref(),
            &config,
            self.estimator.last_valid_error_bound(),
        );
        if report.mismatch.is_some() {
            self.stats().incr(Counter::ThresholdMismatches);
        }
        self.stats().publish_threshold(report.threshold);

        match self.source.poll_candidates() {
            Ok(candidates) => {
                self.migrate_candidates(candidates, &config).await;
                let bandwidth = self.source.read_bandwidth_stats();
                self.stats().publish_bandwidth(bandwidth);
            }
            Err(err) => {
                self.stats().incr(Counter::PollFailures);
                warn!(error = %err, transient = err.is_transient(), "hotness poll failed");
            }
        }
        self.stats().publish_quota(&self.quota.state());

        if every(self.cycle, config.stats_log_period) {
            let migrated = self.stats().close_window();
            info!(
                cycle = self.cycle,
                migrated,
                migrated_total = self.stats().get(Counter::MigratedTotal),
                "migration window closed"
            );
        }

        self.maintenance(&config).await;
    }

    /// Pass run when the gate reopens: no poll, only the periodic steps.
    #[tracing::instrument(skip(self), fields(cycle = self.cycle + 1))]
    async fn resume(&mut self) {
        self.cycle += 1;
        let config = self.shared.tunables.snapshot();
        self.apply_control_requests(&config, self.clock.now_us());
        self.maintenance(&config).await;
    }

    /// Counter reset and histogram refresh. Both fire on the first pass,
    /// so an error bound exists from the start.
    async fn maintenance(&mut self, config: &EngineConfig) {
        assert!(self.cycle > 0, "maintenance before the first pass");
        let step = self.cycle - 1;

        if every(step, config.counter_reset_period) {
            if self.controller.reset_counters(self.source.as_ref()).is_some() {
                self.stats().incr(Counter::ThresholdMismatches);
            }
            self.stats().incr(Counter::CounterResets);
            debug!(cycle = self.cycle, "hotness counters reset");
        }

        if every(step, config.hist_refresh_period) {
            self.refresh_histogram(config).await;
        }
    }

    fn apply_control_requests(&mut self, config: &EngineConfig, now_us: u64) {
        self.quota.set_limit(config.quota_limit);

        if self.shared.take_quota_reset() {
            self.quota.reset(now_us);
            info!(now_us, "quota reset");
        } else if self.quota.maybe_rollover(now_us, config.quota_period_us) {
            debug!(now_us, "quota period rolled over");
        }

        if self.shared.take_histogram_reset() {
            self.estimator.reset();
            self.stats().clear_error_bound();
            self.stats().publish_histogram(&Histogram::default());
            info!("histogram reset");
        }
    }

    #[tracing::instrument(skip_all, fields(cycle = self.cycle, polled = candidates.len()))]
    async fn migrate_candidates(&mut self, candidates: Vec<HotCandidate>, config: &EngineConfig) {
        let polled = candidates.len() as u64;
        self.stats().add(Counter::PolledCandidates, polled);
        if candidates.is_empty() {
            return;
        }

        // Nothing can be admitted: skip validation so nothing gets pinned
        if self.quota.gate() == QuotaGate::Closed {
            self.stats().add(Counter::QuotaDeferred, polled);
            debug!(deferred = polled, "quota closed, candidates deferred");
            return;
        }

        let mut batch = MigrationBatch::with_capacity(candidates.len());
        for candidate in candidates {
            match self.validator.validate(candidate) {
                Ok(block) => batch.push(block),
                Err(reason) => self.stats().incr(Counter::for_reject(reason)),
            }
        }
        self.stats().add(Counter::Validated, batch.len() as u64);

        let accepted = self.quota.admit(batch.len() as u64, config.quota_limit);
        let admitted = usize::try_from(accepted).unwrap_or(usize::MAX);
        let excess = batch.split_off(admitted);
        if !excess.is_empty() {
            let deferred = excess.release_all(self.validator.pool()).len() as u64;
            self.stats().add(Counter::QuotaDeferred, deferred);
            debug!(deferred, "over quota, released");
        }
        if batch.is_empty() {
            return;
        }

        let report = self.executor.execute(batch).await;
        let remaining = report.remaining.len() as u64;

        self.stats().incr(Counter::MigrationBatches);
        self.stats().add(Counter::MigratedTotal, report.succeeded as u64);
        self.stats().window().add(report.succeeded as u64);
        self.stats().add(Counter::MigrationRemaining, remaining);

        if let Some(err) = &report.failed {
            self.stats().incr(Counter::MigrationFailures);
            warn!(error = %err, remaining, "batch migration failed");
        } else if remaining > 0 {
            self.stats().incr(Counter::MigrationFailures);
            debug!(succeeded = report.succeeded, remaining, "batch partially migrated");
        } else {
            debug!(succeeded = report.succeeded, "batch migrated");
        }
    }

    #[tracing::instrument(skip_all, fields(cycle = self.cycle, bins = config.hist_bins))]
    async fn refresh_histogram(&mut self, config: &EngineConfig) {
        let result = self
            .estimator
            .refresh(
                self.source.as_ref(),
                self.clock.as_ref(),
                config.hist_bins,
                config.percentile,
            )
            .await;

        match result {
            Ok(bound) => {
                self.stats().incr(Counter::HistogramRefreshes);
                self.stats().publish_error_bound(bound);
                if let Some(histogram) = self.estimator.histogram() {
                    self.stats().publish_histogram(histogram);
                }

                if config.adaptive_threshold {
                    let report = self.controller.sync(
                        self.source.as_ref(),
                        config,
                        self.estimator.last_valid_error_bound(),
                    );
                    if report.threshold_written {
                        info!(threshold = report.threshold, "threshold recalibrated");
                    }
                    if report.mismatch.is_some() {
                        self.stats().incr(Counter::ThresholdMismatches);
                    }
                    self.stats().publish_threshold(report.threshold);
                }
            }
            Err(err) => {
                self.stats().incr(Counter::HistogramFetchFailures);
                warn!(error = %err, "histogram refresh failed, keeping previous bound");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every() {
        assert!(!every(5, 0));
        assert!(!every(0, 0));
        assert!(every(0, 10));
        assert!(every(10, 10));
        assert!(every(20, 10));
        assert!(!every(15, 10));
        assert!(every(3, 1));
    }
}
