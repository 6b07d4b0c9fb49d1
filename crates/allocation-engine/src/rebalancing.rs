use std::cmp::Ordering;
use std::collections::HashMap;

use rust_decimal::prelude::*;
use rust_decimal::Decimal;

use crate::config::Configuration;
use crate::models::*;
use crate::monitor::AllocationSnapshot;

pub struct RebalancingAdvisor;

impl RebalancingAdvisor {
    /// Buy/sell suggestions for every asset class drifting more than
    /// `rebalance_threshold_pct` (exclusive) from target.
    ///
    /// Buys are shrunk to the remaining headroom of the class's risk bucket,
    /// consumed in order of largest drift first, so the whole batch stays
    /// within caps. A shrunk suggestion is still returned, possibly with a
    /// zero amount. Output is ordered by priority, then drift, then symbol.
    pub fn analyze_rebalancing_needs(
        snapshot: &AllocationSnapshot,
        config: &Configuration,
        rebalance_threshold_pct: f64,
    ) -> Vec<RebalancingSuggestion> {
        let capital = config.total_capital();
        let severe = 2.0 * rebalance_threshold_pct;

        let mut drifted: Vec<&AssetClass> = snapshot
            .asset_classes
            .iter()
            .filter(|a| a.deviation().abs() > rebalance_threshold_pct)
            .collect();
        drifted.sort_by(|a, b| by_drift_then_name(a.deviation(), &a.name, b.deviation(), &b.name));

        let mut headroom: HashMap<&str, f64> = snapshot
            .risk_buckets
            .iter()
            .map(|b| (b.name.as_str(), b.headroom_pct()))
            .collect();

        let mut suggestions = Vec::with_capacity(drifted.len());

        for class in drifted {
            let deviation = class.deviation();
            let action = if deviation < 0.0 {
                RebalanceAction::Buy
            } else {
                RebalanceAction::Sell
            };

            // A buy may land in the class's mapped bucket or in any bucket its
            // holdings already occupy, so it must fit all of them.
            let buckets = snapshot.buckets_for_class(class);

            let mut amount_pct = deviation.abs();
            let mut cap_breach = buckets.iter().any(|b| b.is_breached());

            if action == RebalanceAction::Buy && !buckets.is_empty() {
                let room = buckets
                    .iter()
                    .filter_map(|b| headroom.get(b.name.as_str()).copied())
                    .fold(f64::INFINITY, f64::min);
                if amount_pct > room {
                    cap_breach = true;
                    tracing::debug!(
                        symbol = %class.name,
                        buckets = buckets.len(),
                        wanted = amount_pct,
                        allowed = room,
                        "Buy shrunk to risk bucket headroom"
                    );
                    amount_pct = room;
                }
                for bucket in &buckets {
                    if let Some(left) = headroom.get_mut(bucket.name.as_str()) {
                        *left -= amount_pct;
                    }
                }
            }

            let priority = if deviation.abs() > severe || cap_breach {
                Priority::High
            } else {
                Priority::Medium
            };

            let fraction = Decimal::from_f64(amount_pct / 100.0).unwrap_or_default();
            let suggested_amount = match capital.checked_mul(fraction) {
                Some(amount) => amount.round_dp_with_strategy(2, RoundingStrategy::ToZero),
                None => {
                    tracing::warn!(symbol = %class.name, "Suggested amount out of range, using zero");
                    Decimal::ZERO
                }
            };

            let mut reason = format!(
                "{} at {:.2}% vs {:.2}% target ({:+.2} points)",
                class.name, class.current_allocation_pct, class.target_allocation_pct, deviation
            );
            if cap_breach {
                for bucket in &buckets {
                    reason.push_str(&format!(
                        "; risk bucket '{}' limited to {:.2}%",
                        bucket.name, bucket.max_allocation_pct
                    ));
                }
            }

            suggestions.push(RebalancingSuggestion {
                symbol: class.name.clone(),
                action,
                priority,
                reason,
                suggested_amount,
                current_allocation: class.current_allocation_pct,
                target_allocation: class.target_allocation_pct,
            });
        }

        suggestions.sort_by(|a, b| {
            b.priority
                .cmp(&a.priority)
                .then_with(|| by_drift_then_name(a.deviation(), &a.symbol, b.deviation(), &b.symbol))
        });

        suggestions
    }
}

/// Larger absolute drift first, then name for a stable order.
fn by_drift_then_name(dev_a: f64, name_a: &str, dev_b: f64, name_b: &str) -> Ordering {
    dev_b
        .abs()
        .partial_cmp(&dev_a.abs())
        .unwrap_or(Ordering::Equal)
        .then_with(|| name_a.cmp(name_b))
}
