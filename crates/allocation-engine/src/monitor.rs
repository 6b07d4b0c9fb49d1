use std::collections::{BTreeMap, BTreeSet, HashMap};

use rust_decimal::prelude::*;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::config::Configuration;
use crate::error::DataError;
use crate::models::*;

/// Live allocation state derived from one position snapshot.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct AllocationSnapshot {
    pub asset_classes: Vec<AssetClass>,
    pub risk_buckets: Vec<RiskBucket>,
    pub status: AllocationStatus,
    /// Risk buckets each asset class's holdings currently count against.
    #[serde(default)]
    pub class_buckets: BTreeMap<String, BTreeSet<String>>,
    /// Indices into the input positions that made it into the totals.
    #[serde(skip)]
    pub accepted: Vec<usize>,
    /// Records left out of the totals.
    #[serde(skip)]
    pub skipped: Vec<DataError>,
}

impl AllocationSnapshot {
    pub fn asset_class(&self, name: &str) -> Option<&AssetClass> {
        self.asset_classes.iter().find(|a| a.name == name)
    }

    pub fn risk_bucket(&self, name: &str) -> Option<&RiskBucket> {
        self.risk_buckets.iter().find(|b| b.name == name)
    }

    /// Buckets a buy of `class` can land in: its mapped bucket plus every
    /// bucket its current holdings sit in.
    pub fn buckets_for_class(&self, class: &AssetClass) -> Vec<&RiskBucket> {
        let mut names: BTreeSet<&str> = BTreeSet::new();
        if let Some(name) = class.risk_bucket.as_deref() {
            names.insert(name);
        }
        if let Some(held) = self.class_buckets.get(&class.name) {
            names.extend(held.iter().map(String::as_str));
        }
        names
            .into_iter()
            .filter_map(|name| self.risk_bucket(name))
            .collect()
    }

    /// The subset of `positions` (the same slice given to
    /// [`AllocationMonitor::recompute`]) that was not skipped.
    pub fn accepted_positions(&self, positions: &[Position]) -> Vec<Position> {
        self.accepted
            .iter()
            .filter_map(|&i| positions.get(i).cloned())
            .collect()
    }
}

pub struct AllocationMonitor;

impl AllocationMonitor {
    /// Compare current holdings to configured targets and caps.
    ///
    /// Malformed positions, including ones whose value cannot be
    /// represented, are excluded from every total and reported in
    /// [`AllocationSnapshot::skipped`].
    pub fn recompute(
        config: &Configuration,
        positions: &[Position],
        rebalance_threshold_pct: f64,
    ) -> AllocationSnapshot {
        let capital = config.total_capital();
        let mut class_values: HashMap<&str, Decimal> = HashMap::new();
        let mut bucket_values: HashMap<&str, Decimal> = HashMap::new();
        let mut class_buckets: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
        let mut total_allocated = Decimal::ZERO;
        let mut accepted = Vec::new();
        let mut skipped = Vec::new();

        for (index, position) in positions.iter().enumerate() {
            let classified = Self::classify(config, position).and_then(|bucket| {
                let mv = position.market_value()?;
                let overflow = || DataError::MalformedPosition {
                    symbol: position.symbol.clone(),
                    reason: format!("market value {} overflows portfolio totals", mv),
                };
                let total = total_allocated.checked_add(mv).ok_or_else(overflow)?;
                let class_total = class_values
                    .get(position.asset_class.as_str())
                    .copied()
                    .unwrap_or(Decimal::ZERO)
                    .checked_add(mv)
                    .ok_or_else(overflow)?;
                let bucket_total = match bucket {
                    Some(name) => Some(
                        bucket_values
                            .get(name)
                            .copied()
                            .unwrap_or(Decimal::ZERO)
                            .checked_add(mv)
                            .ok_or_else(overflow)?,
                    ),
                    None => None,
                };
                Ok((bucket, total, class_total, bucket_total))
            });

            let (bucket, total, class_total, bucket_total) = match classified {
                Ok(sums) => sums,
                Err(e) => {
                    tracing::warn!(symbol = %position.symbol, "Skipping position: {}", e);
                    skipped.push(e);
                    continue;
                }
            };

            total_allocated = total;
            class_values.insert(position.asset_class.as_str(), class_total);
            if let (Some(name), Some(value)) = (bucket, bucket_total) {
                bucket_values.insert(name, value);
                class_buckets
                    .entry(position.asset_class.clone())
                    .or_default()
                    .insert(name.to_string());
            }
            accepted.push(index);
        }

        let asset_classes: Vec<AssetClass> = config
            .asset_classes()
            .iter()
            .map(|class| AssetClass {
                current_allocation_pct: percent_of(
                    class_values.get(class.name.as_str()).copied(),
                    capital,
                ),
                ..class.clone()
            })
            .collect();

        let risk_buckets: Vec<RiskBucket> = config
            .risk_buckets()
            .iter()
            .map(|bucket| RiskBucket {
                current_allocation_pct: percent_of(
                    bucket_values.get(bucket.name.as_str()).copied(),
                    capital,
                ),
                ..bucket.clone()
            })
            .collect();

        let drifted = asset_classes
            .iter()
            .any(|a| a.deviation().abs() > rebalance_threshold_pct);
        let breached = risk_buckets.iter().any(RiskBucket::is_breached);

        for bucket in risk_buckets.iter().filter(|b| b.is_breached()) {
            tracing::warn!(
                bucket = %bucket.name,
                current = format!("{:.2}%", bucket.current_allocation_pct),
                max = format!("{:.2}%", bucket.max_allocation_pct),
                "Risk bucket above cap"
            );
        }

        let status = AllocationStatus {
            total_allocated,
            cash_available: capital - total_allocated,
            rebalancing_needed: drifted || breached,
        };

        tracing::debug!(
            positions = positions.len(),
            skipped = skipped.len(),
            total_allocated = %status.total_allocated,
            rebalancing_needed = status.rebalancing_needed,
            "Allocation recomputed"
        );

        AllocationSnapshot {
            asset_classes,
            risk_buckets,
            status,
            class_buckets,
            accepted,
            skipped,
        }
    }

    /// Resolve the risk bucket a position counts against, rejecting records
    /// the configuration cannot place.
    fn classify<'a>(
        config: &'a Configuration,
        position: &'a Position,
    ) -> Result<Option<&'a str>, DataError> {
        position.check_fields()?;

        let malformed = |reason: String| DataError::MalformedPosition {
            symbol: position.symbol.clone(),
            reason,
        };

        let class = config
            .asset_class(&position.asset_class)
            .ok_or_else(|| malformed(format!("unknown asset class '{}'", position.asset_class)))?;

        match position.risk_bucket.as_deref().or(class.risk_bucket.as_deref()) {
            Some(name) => match config.risk_bucket(name) {
                Some(bucket) => Ok(Some(bucket.name.as_str())),
                None => Err(malformed(format!("unknown risk bucket '{}'", name))),
            },
            None => Ok(None),
        }
    }
}

fn percent_of(value: Option<Decimal>, capital: Decimal) -> f64 {
    match value {
        Some(v) if capital > Decimal::ZERO => v
            .checked_mul(Decimal::ONE_HUNDRED)
            .and_then(|scaled| scaled.checked_div(capital))
            .and_then(|pct| pct.to_f64())
            .unwrap_or_else(|| {
                // Out of Decimal range; f64 keeps the magnitude.
                v.to_f64().unwrap_or(0.0) / capital.to_f64().unwrap_or(1.0) * 100.0
            }),
        _ => 0.0,
    }
}
