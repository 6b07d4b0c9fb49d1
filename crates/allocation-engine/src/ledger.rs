//! Pending and executed action ledgers.
//!
//! Lifecycle of an entry: `proposed -> (accepted | cancelled) -> executed`.
//! Cancelled entries leave the pending queue immediately; failed executions
//! are dropped. Only successful executions reach the executed ledger.

use chrono::{DateTime, Datelike, Local, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::StateError;
use crate::models::*;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "action", rename_all = "snake_case")]
pub enum ActionPayload {
    Profit(ProfitSecuringAction),
    Rebalance(RebalancingSuggestion),
}

impl ActionPayload {
    pub fn symbol(&self) -> &str {
        match self {
            ActionPayload::Profit(a) => &a.symbol,
            ActionPayload::Rebalance(s) => &s.symbol,
        }
    }

    pub fn is_profit(&self) -> bool {
        matches!(self, ActionPayload::Profit(_))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActionStatus {
    Proposed,
    Accepted,
    Cancelled,
    Executed,
}

impl ActionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionStatus::Proposed => "proposed",
            ActionStatus::Accepted => "accepted",
            ActionStatus::Cancelled => "cancelled",
            ActionStatus::Executed => "executed",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingAction {
    pub id: u64,
    pub payload: ActionPayload,
    pub status: ActionStatus,
    pub proposed_at: DateTime<Utc>,
    /// Evaluation cycle that proposed it.
    pub cycle: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutedAction {
    pub id: u64,
    pub payload: ActionPayload,
    pub proposed_at: DateTime<Utc>,
    pub executed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergeOutcome {
    pub added: usize,
    pub duplicates: usize,
    pub superseded: usize,
}

/// Identifies one rebalancing period for the given frequency.
/// `None` for [`RebalanceFrequency::Auto`], which has no period.
pub fn rebalancing_period(frequency: RebalanceFrequency, date: NaiveDate) -> Option<String> {
    match frequency {
        RebalanceFrequency::Daily => Some(date.format("%Y-%m-%d").to_string()),
        RebalanceFrequency::Weekly => {
            let week = date.iso_week();
            Some(format!("{}-W{:02}", week.year(), week.week()))
        }
        RebalanceFrequency::Monthly => Some(date.format("%Y-%m").to_string()),
        RebalanceFrequency::Auto => None,
    }
}

#[derive(Debug, Default)]
pub struct ActionLedger {
    next_id: u64,
    pending: Vec<PendingAction>,
    executed: Vec<ExecutedAction>,
}

impl ActionLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn pending(&self) -> &[PendingAction] {
        &self.pending
    }

    pub fn executed(&self) -> &[ExecutedAction] {
        &self.executed
    }

    /// Whether `payload` is already covered by the pending queue or the
    /// executed ledger.
    ///
    /// A profit zone is covered by any pending or executed action for the
    /// same symbol at that level or higher. A rebalancing signature
    /// (symbol, direction) is covered while pending, and once executed for
    /// the rest of the current rebalancing period.
    pub fn is_known(
        &self,
        payload: &ActionPayload,
        frequency: RebalanceFrequency,
        now: DateTime<Local>,
    ) -> bool {
        match payload {
            ActionPayload::Profit(action) => {
                let covers = |p: &ActionPayload| match p {
                    ActionPayload::Profit(other) => {
                        other.symbol == action.symbol
                            && other.profit_level_achieved >= action.profit_level_achieved
                    }
                    ActionPayload::Rebalance(_) => false,
                };
                self.pending.iter().any(|p| covers(&p.payload))
                    || self.executed.iter().any(|e| covers(&e.payload))
            }
            ActionPayload::Rebalance(suggestion) => {
                let same = |p: &ActionPayload| match p {
                    ActionPayload::Rebalance(other) => {
                        other.symbol == suggestion.symbol && other.action == suggestion.action
                    }
                    ActionPayload::Profit(_) => false,
                };
                if self.pending.iter().any(|p| same(&p.payload)) {
                    return true;
                }
                let Some(current) = rebalancing_period(frequency, now.date_naive()) else {
                    return false;
                };
                self.executed.iter().any(|e| {
                    same(&e.payload)
                        && rebalancing_period(
                            frequency,
                            e.executed_at.with_timezone(&Local).date_naive(),
                        )
                        .as_deref()
                            == Some(current.as_str())
                })
            }
        }
    }

    /// Drop executed rebalances from earlier rebalancing periods. They no
    /// longer block anything; executed profit actions are kept until
    /// [`clear_executed`](Self::clear_executed).
    pub fn prune_expired_rebalances(&mut self, frequency: RebalanceFrequency, now: DateTime<Local>) -> usize {
        let current = rebalancing_period(frequency, now.date_naive());
        let before = self.executed.len();
        self.executed.retain(|e| match &e.payload {
            ActionPayload::Profit(_) => true,
            ActionPayload::Rebalance(_) => {
                current.is_some()
                    && rebalancing_period(frequency, e.executed_at.with_timezone(&Local).date_naive())
                        == current
            }
        });
        let pruned = before - self.executed.len();
        if pruned > 0 {
            tracing::debug!(pruned, "Expired rebalances pruned from executed ledger");
        }
        pruned
    }

    /// Queue every payload not already known. A newly queued profit action
    /// removes still-proposed lower-zone actions for the same symbol.
    pub fn merge(
        &mut self,
        payloads: Vec<ActionPayload>,
        cycle: u64,
        frequency: RebalanceFrequency,
        now: DateTime<Local>,
    ) -> MergeOutcome {
        self.prune_expired_rebalances(frequency, now);
        let mut outcome = MergeOutcome::default();

        for payload in payloads {
            if self.is_known(&payload, frequency, now) {
                outcome.duplicates += 1;
                continue;
            }

            if let ActionPayload::Profit(action) = &payload {
                let before = self.pending.len();
                self.pending.retain(|p| match &p.payload {
                    ActionPayload::Profit(other) => {
                        !(p.status == ActionStatus::Proposed
                            && other.symbol == action.symbol
                            && other.profit_level_achieved < action.profit_level_achieved)
                    }
                    ActionPayload::Rebalance(_) => true,
                });
                outcome.superseded += before - self.pending.len();
            }

            self.next_id += 1;
            tracing::debug!(
                id = self.next_id,
                symbol = %payload.symbol(),
                cycle,
                "Action queued"
            );
            self.pending.push(PendingAction {
                id: self.next_id,
                payload,
                status: ActionStatus::Proposed,
                proposed_at: now.with_timezone(&Utc),
                cycle,
            });
            outcome.added += 1;
        }

        outcome
    }

    pub fn accept(&mut self, id: u64) -> Result<(), StateError> {
        let entry = self
            .pending
            .iter_mut()
            .find(|p| p.id == id)
            .ok_or(StateError::UnknownAction(id))?;
        if entry.status != ActionStatus::Proposed {
            return Err(StateError::InvalidTransition {
                id,
                from: entry.status.as_str(),
                to: ActionStatus::Accepted.as_str(),
            });
        }
        entry.status = ActionStatus::Accepted;
        Ok(())
    }

    pub fn cancel(&mut self, id: u64) -> Result<PendingAction, StateError> {
        let index = self
            .pending
            .iter()
            .position(|p| p.id == id)
            .ok_or(StateError::UnknownAction(id))?;
        let mut entry = self.pending.remove(index);
        entry.status = ActionStatus::Cancelled;
        Ok(entry)
    }

    /// Empty the pending queue. Returns how many entries were dropped.
    pub fn cancel_all(&mut self) -> usize {
        let dropped = self.pending.len();
        self.pending.clear();
        dropped
    }

    /// Record the executor's verdict on an accepted action. Success moves it
    /// to the executed ledger; failure drops it.
    pub fn complete(
        &mut self,
        id: u64,
        success: bool,
        now: DateTime<Utc>,
    ) -> Result<Option<ExecutedAction>, StateError> {
        let index = self
            .pending
            .iter()
            .position(|p| p.id == id)
            .ok_or(StateError::UnknownAction(id))?;
        if self.pending[index].status != ActionStatus::Accepted {
            return Err(StateError::InvalidTransition {
                id,
                from: self.pending[index].status.as_str(),
                to: ActionStatus::Executed.as_str(),
            });
        }

        let entry = self.pending.remove(index);
        if !success {
            tracing::info!(id, symbol = %entry.payload.symbol(), "Execution failed, action dropped");
            return Ok(None);
        }

        let executed = ExecutedAction {
            id: entry.id,
            payload: entry.payload,
            proposed_at: entry.proposed_at,
            executed_at: now,
        };
        self.executed.push(executed.clone());
        Ok(Some(executed))
    }

    pub fn clear_executed(&mut self) {
        self.executed.clear();
    }

    /// Profit actions still pending from cycles before `current_cycle`.
    pub fn stale_profit_opportunities(&self, current_cycle: u64) -> usize {
        self.pending
            .iter()
            .filter(|p| p.payload.is_profit() && p.cycle < current_cycle)
            .count()
    }
}

/// Daily automation counters. Per-day counters reset when the local date
/// changes; `total_actions_executed` never resets.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AutomationStats {
    pub total_actions_executed: u64,
    pub profit_actions_today: u32,
    pub rebalance_actions_today: u32,
    pub profit_secured_today: Decimal,
    pub last_monitoring_time: Option<DateTime<Utc>>,
    pub last_rebalance: Option<DateTime<Utc>>,
    day: NaiveDate,
}

impl AutomationStats {
    pub fn new(today: NaiveDate) -> Self {
        Self {
            total_actions_executed: 0,
            profit_actions_today: 0,
            rebalance_actions_today: 0,
            profit_secured_today: Decimal::ZERO,
            last_monitoring_time: None,
            last_rebalance: None,
            day: today,
        }
    }

    pub fn roll_over(&mut self, today: NaiveDate) {
        if today == self.day {
            return;
        }
        tracing::info!(
            previous = %self.day,
            profit_actions = self.profit_actions_today,
            rebalance_actions = self.rebalance_actions_today,
            "Daily automation counters reset"
        );
        self.profit_actions_today = 0;
        self.rebalance_actions_today = 0;
        self.profit_secured_today = Decimal::ZERO;
        self.day = today;
    }

    pub fn record_monitoring(&mut self, now: DateTime<Local>) {
        self.roll_over(now.date_naive());
        self.last_monitoring_time = Some(now.with_timezone(&Utc));
    }

    pub fn record_execution(&mut self, action: &ExecutedAction, now: DateTime<Local>) {
        self.roll_over(now.date_naive());
        self.total_actions_executed += 1;
        match &action.payload {
            ActionPayload::Profit(profit) => {
                self.profit_actions_today += 1;
                self.profit_secured_today += profit.estimated_amount;
            }
            ActionPayload::Rebalance(_) => {
                self.rebalance_actions_today += 1;
                self.last_rebalance = Some(action.executed_at);
            }
        }
    }
}
