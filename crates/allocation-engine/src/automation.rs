//! Automation Controller
//!
//! Owns the enable switch, the automation settings, and the action ledgers,
//! and serializes evaluation cycles. At most one cycle is in flight: a
//! trigger that arrives while another cycle holds the processing guard, or
//! while automation is disabled, returns [`CycleOutcome::Skipped`] without
//! touching any state.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::{DateTime, Local, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::config::{AutomationConfig, AutomationConfigPatch, Configuration, RawConfiguration};
use crate::error::{ConfigError, StateError};
use crate::health::{HealthScorer, ProfitState};
use crate::ledger::{
    ActionLedger, ActionPayload, AutomationStats, ExecutedAction, MergeOutcome, PendingAction,
};
use crate::models::*;
use crate::monitor::AllocationMonitor;
use crate::profit::ProfitPreservationEngine;
use crate::rebalancing::RebalancingAdvisor;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ControllerState {
    Disabled,
    Idle,
    Evaluating,
}

/// Summary of one completed evaluation cycle.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CycleReport {
    pub cycle: u64,
    pub allocation_status: AllocationStatus,
    pub portfolio_health: PortfolioHealth,
    pub profit_actions_found: usize,
    pub rebalancing_suggestions_found: usize,
    pub merge: MergeOutcome,
    pub pending_actions: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub enum CycleOutcome {
    Completed(CycleReport),
    /// Carries [`StateError::Disabled`] or [`StateError::AlreadyEvaluating`].
    Skipped(StateError),
}

impl CycleOutcome {
    pub fn is_completed(&self) -> bool {
        matches!(self, CycleOutcome::Completed(_))
    }
}

/// Read-only view for pollers.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EngineState {
    pub state: ControllerState,
    pub config: Configuration,
    pub automation: AutomationConfig,
    pub portfolio_health: PortfolioHealth,
    pub allocation_status: AllocationStatus,
    pub profit_secured_today: Decimal,
    pub last_rebalance: Option<DateTime<Utc>>,
    pub stats: AutomationStats,
    pub pending_actions: usize,
    pub executed_actions: usize,
}

struct Settings {
    config: Configuration,
    automation: AutomationConfig,
}

struct Books {
    ledger: ActionLedger,
    stats: AutomationStats,
    health: PortfolioHealth,
    status: AllocationStatus,
    cycle: u64,
}

/// Releases the processing flag on drop, including on unwind.
pub(crate) struct CycleGuard<'a> {
    flag: &'a AtomicBool,
}

impl Drop for CycleGuard<'_> {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
    }
}

pub struct AutomationController {
    settings: RwLock<Settings>,
    books: Mutex<Books>,
    is_processing: AtomicBool,
}

impl AutomationController {
    /// Fails when `automation` is out of range; `config` is already
    /// validated by [`Configuration::load`].
    pub fn new(config: Configuration, automation: AutomationConfig) -> Result<Self, ConfigError> {
        automation.validate()?;
        let status = AllocationStatus {
            total_allocated: Decimal::ZERO,
            cash_available: config.total_capital(),
            rebalancing_needed: false,
        };
        tracing::info!(
            enabled = automation.enabled,
            interval_ms = automation.monitoring_interval_ms,
            asset_classes = config.asset_classes().len(),
            risk_buckets = config.risk_buckets().len(),
            "Automation controller created"
        );
        Ok(Self {
            settings: RwLock::new(Settings { config, automation }),
            books: Mutex::new(Books {
                ledger: ActionLedger::new(),
                stats: AutomationStats::new(Local::now().date_naive()),
                health: PortfolioHealth::default(),
                status,
                cycle: 0,
            }),
            is_processing: AtomicBool::new(false),
        })
    }

    fn settings(&self) -> RwLockReadGuard<'_, Settings> {
        self.settings.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn settings_mut(&self) -> RwLockWriteGuard<'_, Settings> {
        self.settings.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn books(&self) -> MutexGuard<'_, Books> {
        self.books.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn state(&self) -> ControllerState {
        if self.is_processing.load(Ordering::Acquire) {
            ControllerState::Evaluating
        } else if self.settings().automation.enabled {
            ControllerState::Idle
        } else {
            ControllerState::Disabled
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.settings().automation.enabled
    }

    pub fn enable_automation(&self) {
        let mut settings = self.settings_mut();
        if !settings.automation.enabled {
            settings.automation.enabled = true;
            tracing::info!("Automation enabled");
        }
    }

    /// An in-flight cycle runs to completion; later triggers are skipped.
    pub fn disable_automation(&self) {
        let mut settings = self.settings_mut();
        if settings.automation.enabled {
            settings.automation.enabled = false;
            tracing::info!("Automation disabled");
        }
    }

    pub fn automation_config(&self) -> AutomationConfig {
        self.settings().automation.clone()
    }

    pub fn configuration(&self) -> Configuration {
        self.settings().config.clone()
    }

    /// Merge `patch` into the automation settings. Rejected patches leave the
    /// current settings untouched.
    pub fn update_config(&self, patch: &AutomationConfigPatch) -> Result<AutomationConfig, ConfigError> {
        let mut settings = self.settings_mut();
        let updated = settings.automation.apply(patch).map_err(|e| {
            tracing::warn!("Automation config patch rejected: {}", e);
            e
        })?;
        if updated.enabled != settings.automation.enabled {
            tracing::info!(enabled = updated.enabled, "Automation switch changed by config update");
        }
        settings.automation = updated.clone();
        tracing::info!(
            interval_ms = updated.monitoring_interval_ms,
            rebalance_threshold = updated.rebalance_threshold_pct,
            profit_threshold = updated.profit_taking_threshold_pct,
            "Automation config updated"
        );
        Ok(updated)
    }

    /// Replace the portfolio configuration wholesale.
    pub fn update_configuration(&self, raw: RawConfiguration) -> Result<(), ConfigError> {
        let config = Configuration::load(raw)?;
        self.install_configuration(config);
        Ok(())
    }

    pub fn install_configuration(&self, config: Configuration) {
        let mut settings = self.settings_mut();
        settings.config = config;
        tracing::info!(
            total_capital = %settings.config.total_capital(),
            "Portfolio configuration replaced"
        );
    }

    /// Claim the single cycle slot.
    pub(crate) fn begin_cycle(&self) -> Result<CycleGuard<'_>, StateError> {
        self.is_processing
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| StateError::AlreadyEvaluating)?;
        Ok(CycleGuard {
            flag: &self.is_processing,
        })
    }

    /// Run one evaluation cycle over `positions`.
    pub fn monitor_portfolio(&self, positions: &[Position]) -> CycleOutcome {
        self.monitor_portfolio_at(positions, Local::now())
    }

    pub(crate) fn monitor_portfolio_at(
        &self,
        positions: &[Position],
        now: DateTime<Local>,
    ) -> CycleOutcome {
        let (config, automation) = {
            let settings = self.settings();
            if !settings.automation.enabled {
                tracing::debug!("Monitoring skipped: automation disabled");
                return CycleOutcome::Skipped(StateError::Disabled);
            }
            (settings.config.clone(), settings.automation.clone())
        };

        let _guard = match self.begin_cycle() {
            Ok(guard) => guard,
            Err(e) => {
                tracing::debug!("Monitoring skipped: {}", e);
                return CycleOutcome::Skipped(e);
            }
        };

        let threshold = automation.rebalance_threshold_pct;
        let snapshot = AllocationMonitor::recompute(&config, positions, threshold);
        let accepted = snapshot.accepted_positions(positions);
        let profit_actions =
            ProfitPreservationEngine::check_profit_preservation(&accepted, config.profit_zones());
        let suggestions = RebalancingAdvisor::analyze_rebalancing_needs(&snapshot, &config, threshold);

        let candidates = queueable(&automation, &profit_actions, &suggestions);

        let mut books = self.books();
        books.cycle += 1;
        let cycle = books.cycle;
        let merge = books
            .ledger
            .merge(candidates, cycle, config.rebalancing_frequency(), now);

        let profit_state = ProfitState {
            stale_opportunities: books.ledger.stale_profit_opportunities(cycle),
        };
        let health = HealthScorer::new(threshold).score(&snapshot, &profit_state, &suggestions);

        books.health = health.clone();
        books.status = snapshot.status.clone();
        books.stats.record_monitoring(now);

        if snapshot.risk_buckets.iter().any(|b| b.is_breached()) {
            tracing::warn!(cycle, "Risk bucket cap breached");
        }
        tracing::info!(
            cycle,
            score = health.overall_score,
            rebalancing_needed = snapshot.status.rebalancing_needed,
            added = merge.added,
            duplicates = merge.duplicates,
            superseded = merge.superseded,
            pending = books.ledger.pending().len(),
            "Evaluation cycle complete"
        );

        CycleOutcome::Completed(CycleReport {
            cycle,
            allocation_status: snapshot.status,
            portfolio_health: health,
            profit_actions_found: profit_actions.len(),
            rebalancing_suggestions_found: suggestions.len(),
            merge,
            pending_actions: books.ledger.pending().len(),
        })
    }

    /// Preview: profit actions for the positions the current configuration
    /// can place. Ledgers are not consulted or changed.
    pub fn check_profit_preservation(&self, positions: &[Position]) -> Vec<ProfitSecuringAction> {
        let settings = self.settings();
        let snapshot = AllocationMonitor::recompute(
            &settings.config,
            positions,
            settings.automation.rebalance_threshold_pct,
        );
        ProfitPreservationEngine::check_profit_preservation(
            &snapshot.accepted_positions(positions),
            settings.config.profit_zones(),
        )
    }

    /// Preview: rebalancing suggestions for `positions`. Ledgers are not
    /// consulted or changed.
    pub fn analyze_rebalancing_needs(&self, positions: &[Position]) -> Vec<RebalancingSuggestion> {
        let settings = self.settings();
        let threshold = settings.automation.rebalance_threshold_pct;
        let snapshot = AllocationMonitor::recompute(&settings.config, positions, threshold);
        RebalancingAdvisor::analyze_rebalancing_needs(&snapshot, &settings.config, threshold)
    }

    pub fn get_state(&self) -> EngineState {
        let state = self.state();
        let (config, automation) = {
            let settings = self.settings();
            (settings.config.clone(), settings.automation.clone())
        };
        let mut books = self.books();
        books.stats.roll_over(Local::now().date_naive());
        EngineState {
            state,
            config,
            automation,
            portfolio_health: books.health.clone(),
            allocation_status: books.status.clone(),
            profit_secured_today: books.stats.profit_secured_today,
            last_rebalance: books.stats.last_rebalance,
            stats: books.stats.clone(),
            pending_actions: books.ledger.pending().len(),
            executed_actions: books.ledger.executed().len(),
        }
    }

    pub fn stats(&self) -> AutomationStats {
        let mut books = self.books();
        books.stats.roll_over(Local::now().date_naive());
        books.stats.clone()
    }

    pub fn pending_actions(&self) -> Vec<PendingAction> {
        self.books().ledger.pending().to_vec()
    }

    pub fn executed_actions(&self) -> Vec<ExecutedAction> {
        self.books().ledger.executed().to_vec()
    }

    /// Drop every pending action. The executed ledger is untouched.
    pub fn cancel_pending_actions(&self) -> usize {
        let dropped = self.books().ledger.cancel_all();
        tracing::info!(dropped, "Pending actions cancelled");
        dropped
    }

    pub fn accept_action(&self, id: u64) -> Result<(), StateError> {
        self.books().ledger.accept(id)?;
        tracing::debug!(id, "Action accepted");
        Ok(())
    }

    pub fn cancel_action(&self, id: u64) -> Result<PendingAction, StateError> {
        let cancelled = self.books().ledger.cancel(id)?;
        tracing::debug!(id, symbol = %cancelled.payload.symbol(), "Action cancelled");
        Ok(cancelled)
    }

    /// Executor callback for an accepted action. Returns the ledger entry
    /// when the execution succeeded.
    pub fn report_execution(
        &self,
        id: u64,
        success: bool,
    ) -> Result<Option<ExecutedAction>, StateError> {
        self.report_execution_at(id, success, Local::now())
    }

    pub(crate) fn report_execution_at(
        &self,
        id: u64,
        success: bool,
        now: DateTime<Local>,
    ) -> Result<Option<ExecutedAction>, StateError> {
        let mut books = self.books();
        let executed = books.ledger.complete(id, success, now.with_timezone(&Utc))?;
        if let Some(action) = &executed {
            books.stats.record_execution(action, now);
            tracing::info!(
                id,
                symbol = %action.payload.symbol(),
                total_executed = books.stats.total_actions_executed,
                "Action executed"
            );
        }
        Ok(executed)
    }

    pub fn clear_executed_ledger(&self) {
        self.books().ledger.clear_executed();
        tracing::info!("Executed ledger cleared");
    }
}

/// Candidates that the automation toggles allow into the pending queue.
fn queueable(
    automation: &AutomationConfig,
    profit_actions: &[ProfitSecuringAction],
    suggestions: &[RebalancingSuggestion],
) -> Vec<ActionPayload> {
    let mut candidates = Vec::new();
    if automation.auto_profit_taking {
        candidates.extend(
            profit_actions
                .iter()
                .filter(|a| a.current_profit_pct >= automation.profit_taking_threshold_pct)
                .cloned()
                .map(ActionPayload::Profit),
        );
    }
    if automation.auto_rebalance {
        candidates.extend(suggestions.iter().cloned().map(ActionPayload::Rebalance));
    }
    candidates
}
