//! Portfolio Health Scoring
//!
//! Scores three dimensions on a 0-100 scale and collects one warning per
//! breached cap or badly drifted asset class, plus one recommendation per
//! high-priority rebalancing suggestion.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::models::*;
use crate::monitor::AllocationSnapshot;

/// Points lost per profit opportunity left pending past its cycle.
pub const STALE_PROFIT_PENALTY: f64 = 10.0;

/// Profit-side inputs tracked by the controller.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ProfitState {
    /// Pending profit actions proposed in an earlier cycle.
    pub stale_opportunities: usize,
}

pub struct HealthScorer {
    rebalance_threshold_pct: f64,
}

impl HealthScorer {
    pub fn new(rebalance_threshold_pct: f64) -> Self {
        Self {
            rebalance_threshold_pct,
        }
    }

    pub fn score(
        &self,
        snapshot: &AllocationSnapshot,
        profit_state: &ProfitState,
        suggestions: &[RebalancingSuggestion],
    ) -> PortfolioHealth {
        let allocation_health = Self::allocation_health(&snapshot.asset_classes);
        let risk_health = Self::risk_health(&snapshot.risk_buckets);
        let profit_health = Self::profit_health(profit_state);

        let mean = (allocation_health + risk_health + profit_health) / 3.0;
        let overall_score = mean.round().clamp(0.0, 100.0) as u8;

        let warnings = self.warnings(snapshot);
        let recommendations = suggestions
            .iter()
            .filter(|s| s.priority == Priority::High)
            .map(|s| {
                format!(
                    "{} {} of {} to move from {:.1}% toward its {:.1}% target",
                    capitalize(s.action.as_str()),
                    s.suggested_amount.round_dp(2),
                    s.symbol,
                    s.current_allocation,
                    s.target_allocation
                )
            })
            .collect();

        PortfolioHealth {
            overall_score,
            allocation_health,
            risk_health,
            profit_health,
            warnings,
            recommendations,
        }
    }

    /// Average absolute deviation, so one outlier class does not dominate.
    pub fn allocation_health(asset_classes: &[AssetClass]) -> f64 {
        if asset_classes.is_empty() {
            return 100.0;
        }
        let avg = asset_classes
            .iter()
            .map(|a| a.deviation().abs())
            .sum::<f64>()
            / asset_classes.len() as f64;
        100.0 - avg.clamp(0.0, 100.0)
    }

    /// Only excess over a cap costs points.
    pub fn risk_health(risk_buckets: &[RiskBucket]) -> f64 {
        let excess: f64 = risk_buckets.iter().map(RiskBucket::excess).sum();
        (100.0 - excess.max(0.0)).clamp(0.0, 100.0)
    }

    pub fn profit_health(profit_state: &ProfitState) -> f64 {
        let penalty = profit_state.stale_opportunities as f64 * STALE_PROFIT_PENALTY;
        (100.0 - penalty).clamp(0.0, 100.0)
    }

    fn warnings(&self, snapshot: &AllocationSnapshot) -> Vec<String> {
        let mut warnings = Vec::new();

        for bucket in snapshot.risk_buckets.iter().filter(|b| b.is_breached()) {
            warnings.push(format!(
                "Risk bucket '{}' at {:.1}% exceeds its {:.1}% cap",
                bucket.name, bucket.current_allocation_pct, bucket.max_allocation_pct
            ));
        }

        let severe = 2.0 * self.rebalance_threshold_pct;
        for class in snapshot
            .asset_classes
            .iter()
            .filter(|a| a.deviation().abs() > severe)
        {
            warnings.push(format!(
                "{} is {:+.1} points from its {:.1}% target (beyond {:.1})",
                class.name,
                class.deviation(),
                class.target_allocation_pct,
                severe
            ));
        }

        if snapshot.status.cash_available < Decimal::ZERO {
            warnings.push(format!(
                "Positions exceed total capital by {}",
                (-snapshot.status.cash_available).round_dp(2)
            ));
        }

        for skipped in &snapshot.skipped {
            warnings.push(format!("Skipped position: {}", skipped));
        }

        warnings
    }
}

fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}
