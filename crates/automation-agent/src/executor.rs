use allocation_engine::{ActionPayload, ActionStatus, AutomationController, PendingAction};
use rust_decimal::Decimal;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExecutionSummary {
    pub executed: u64,
    pub failed: u64,
}

/// Simulated executor: accepts every proposed action and reports it back.
///
/// Rebalancing suggestions shrunk to a zero amount have nothing to trade and
/// are reported as failed, which drops them from the queue.
#[derive(Debug, Default)]
pub struct PaperExecutor;

impl PaperExecutor {
    pub fn new() -> Self {
        Self
    }

    pub fn execute_pending(&self, controller: &AutomationController) -> ExecutionSummary {
        let mut summary = ExecutionSummary::default();

        for action in controller.pending_actions() {
            if action.status == ActionStatus::Proposed {
                if let Err(e) = controller.accept_action(action.id) {
                    tracing::warn!(id = action.id, "Paper accept failed: {}", e);
                    continue;
                }
            }

            let success = Self::fill(&action);
            match controller.report_execution(action.id, success) {
                Ok(Some(_)) => summary.executed += 1,
                Ok(None) => summary.failed += 1,
                Err(e) => {
                    tracing::warn!(id = action.id, "Paper execution report rejected: {}", e);
                    summary.failed += 1;
                }
            }
        }

        if summary.executed > 0 || summary.failed > 0 {
            tracing::info!(
                executed = summary.executed,
                failed = summary.failed,
                "Paper execution pass complete"
            );
        }
        summary
    }

    fn fill(action: &PendingAction) -> bool {
        match &action.payload {
            ActionPayload::Profit(profit) => {
                tracing::info!(
                    "PAPER {} {} at {:+.1}% (zone {:.1}%, est. {})",
                    profit.action_type.as_str(),
                    profit.symbol,
                    profit.current_profit_pct,
                    profit.profit_level_achieved,
                    profit.estimated_amount
                );
                true
            }
            ActionPayload::Rebalance(suggestion) => {
                if suggestion.suggested_amount <= Decimal::ZERO {
                    tracing::info!(
                        symbol = %suggestion.symbol,
                        "PAPER skip: no compliant amount to {}",
                        suggestion.action.as_str()
                    );
                    return false;
                }
                tracing::info!(
                    "PAPER {} {} of {} ({:?} priority)",
                    suggestion.action.as_str().to_uppercase(),
                    suggestion.suggested_amount,
                    suggestion.symbol,
                    suggestion.priority
                );
                true
            }
        }
    }
}
