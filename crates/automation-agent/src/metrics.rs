use std::time::Instant;

use allocation_engine::{CycleOutcome, StateError};

use crate::executor::ExecutionSummary;

/// Structured telemetry for the automation agent.
pub struct AgentMetrics {
    /// Every interval tick, whatever its outcome.
    pub ticks: u64,
    /// Ticks whose evaluation cycle completed.
    pub cycles_run: u64,
    pub cycles_skipped_disabled: u64,
    pub cycles_skipped_busy: u64,
    pub feed_errors: u64,
    pub actions_proposed: u64,
    pub actions_executed: u64,
    pub actions_failed: u64,
    pub last_health_score: Option<u8>,
    pub last_total_duration_ms: u64,
    log_interval_cycles: u64,
}

impl AgentMetrics {
    pub fn new(log_interval_cycles: u64) -> Self {
        Self {
            ticks: 0,
            cycles_run: 0,
            cycles_skipped_disabled: 0,
            cycles_skipped_busy: 0,
            feed_errors: 0,
            actions_proposed: 0,
            actions_executed: 0,
            actions_failed: 0,
            last_health_score: None,
            last_total_duration_ms: 0,
            log_interval_cycles,
        }
    }

    pub fn start_timer() -> Instant {
        Instant::now()
    }

    pub fn record_feed_error(&mut self) {
        self.feed_errors += 1;
    }

    pub fn record_outcome(&mut self, outcome: &CycleOutcome) {
        match outcome {
            CycleOutcome::Completed(report) => {
                self.cycles_run += 1;
                self.actions_proposed += report.merge.added as u64;
                self.last_health_score = Some(report.portfolio_health.overall_score);
            }
            CycleOutcome::Skipped(StateError::Disabled) => self.cycles_skipped_disabled += 1,
            CycleOutcome::Skipped(_) => self.cycles_skipped_busy += 1,
        }
    }

    pub fn record_execution(&mut self, summary: ExecutionSummary) {
        self.actions_executed += summary.executed;
        self.actions_failed += summary.failed;
    }

    pub fn finish_cycle(&mut self, cycle_start: Instant) {
        self.last_total_duration_ms = cycle_start.elapsed().as_millis() as u64;
        self.ticks += 1;

        if self.log_interval_cycles > 0 && self.ticks.is_multiple_of(self.log_interval_cycles)
        {
            self.log_metrics();
        }
    }

    pub fn log_metrics(&self) {
        tracing::info!(
            ticks = self.ticks,
            cycles = self.cycles_run,
            skipped_disabled = self.cycles_skipped_disabled,
            skipped_busy = self.cycles_skipped_busy,
            feed_errors = self.feed_errors,
            actions_proposed = self.actions_proposed,
            actions_executed = self.actions_executed,
            actions_failed = self.actions_failed,
            health_score = self.last_health_score.map(u64::from),
            last_cycle_ms = self.last_total_duration_ms,
            "Agent metrics summary"
        );
    }
}
