//! Portfolio configuration and automation settings.
//!
//! A [`Configuration`] can only be obtained through [`Configuration::load`],
//! so every instance the engine holds has passed validation. Automation
//! settings change through [`AutomationConfig::apply`], which either returns
//! a fully validated copy or an error and never a half-applied patch.

use std::collections::HashSet;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::models::{AssetClass, ProfitZone, RebalanceFrequency, RiskBucket, ZoneAction};

/// Tolerance for "sums to 100" checks.
pub const ALLOCATION_EPSILON: f64 = 0.01;
pub const MIN_MONITORING_INTERVAL_MS: u64 = 5_000;
pub const MAX_MONITORING_INTERVAL_MS: u64 = 300_000;

/// Unvalidated configuration as read from storage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawConfiguration {
    pub total_capital: Decimal,
    pub asset_classes: Vec<AssetClass>,
    #[serde(default)]
    pub risk_buckets: Vec<RiskBucket>,
    #[serde(default = "ProfitZone::default_ladder")]
    pub profit_zones: Vec<ProfitZone>,
    #[serde(default)]
    pub rebalancing_frequency: RebalanceFrequency,
}

/// Validated, immutable portfolio configuration.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Configuration {
    total_capital: Decimal,
    asset_classes: Vec<AssetClass>,
    risk_buckets: Vec<RiskBucket>,
    profit_zones: Vec<ProfitZone>,
    rebalancing_frequency: RebalanceFrequency,
}

impl Configuration {
    pub fn load(raw: RawConfiguration) -> Result<Self, ConfigError> {
        let mut errors: Vec<String> = Vec::new();

        validate_capital(&raw, &mut errors);
        validate_asset_classes(&raw, &mut errors);
        validate_risk_buckets(&raw, &mut errors);
        validate_profit_zones(&raw, &mut errors);

        if !errors.is_empty() {
            let detail = format!(
                "{} error{}: {}",
                errors.len(),
                if errors.len() == 1 { "" } else { "s" },
                errors.join("; ")
            );
            tracing::warn!("Rejected portfolio configuration ({})", detail);
            return Err(ConfigError::Invariant(detail));
        }

        // Live percentages are owned by the allocation monitor.
        let asset_classes = raw
            .asset_classes
            .into_iter()
            .map(|a| AssetClass {
                current_allocation_pct: 0.0,
                ..a
            })
            .collect();
        let risk_buckets = raw
            .risk_buckets
            .into_iter()
            .map(|b| RiskBucket {
                current_allocation_pct: 0.0,
                ..b
            })
            .collect();

        Ok(Self {
            total_capital: raw.total_capital,
            asset_classes,
            risk_buckets,
            profit_zones: raw.profit_zones,
            rebalancing_frequency: raw.rebalancing_frequency,
        })
    }

    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let raw: RawConfiguration =
            serde_json::from_str(json).map_err(|e| ConfigError::Parse(e.to_string()))?;
        Self::load(raw)
    }

    pub fn total_capital(&self) -> Decimal {
        self.total_capital
    }

    pub fn asset_classes(&self) -> &[AssetClass] {
        &self.asset_classes
    }

    pub fn risk_buckets(&self) -> &[RiskBucket] {
        &self.risk_buckets
    }

    /// Ascending by level.
    pub fn profit_zones(&self) -> &[ProfitZone] {
        &self.profit_zones
    }

    pub fn rebalancing_frequency(&self) -> RebalanceFrequency {
        self.rebalancing_frequency
    }

    pub fn asset_class(&self, name: &str) -> Option<&AssetClass> {
        self.asset_classes.iter().find(|a| a.name == name)
    }

    pub fn risk_bucket(&self, name: &str) -> Option<&RiskBucket> {
        self.risk_buckets.iter().find(|b| b.name == name)
    }
}

fn validate_capital(raw: &RawConfiguration, errors: &mut Vec<String>) {
    if raw.total_capital <= Decimal::ZERO {
        errors.push(format!(
            "total_capital must be > 0, got {}",
            raw.total_capital
        ));
    }
}

fn validate_asset_classes(raw: &RawConfiguration, errors: &mut Vec<String>) {
    if raw.asset_classes.is_empty() {
        errors.push("asset_classes: at least one asset class is required".into());
        return;
    }

    let mut seen = HashSet::new();
    for class in &raw.asset_classes {
        if class.name.trim().is_empty() {
            errors.push("asset_classes: name is empty".into());
        } else if !seen.insert(class.name.as_str()) {
            errors.push(format!("asset_classes.{}: duplicate name", class.name));
        }

        let target = class.target_allocation_pct;
        if !target.is_finite() || !(0.0..=100.0).contains(&target) {
            errors.push(format!(
                "asset_classes.{}: target_allocation_pct {} not within 0..=100",
                class.name, target
            ));
        }

        if let Some(bucket) = &class.risk_bucket {
            if !raw.risk_buckets.iter().any(|b| &b.name == bucket) {
                errors.push(format!(
                    "asset_classes.{}: unknown risk bucket '{}'",
                    class.name, bucket
                ));
            }
        }
    }

    let total: f64 = raw
        .asset_classes
        .iter()
        .map(|a| a.target_allocation_pct)
        .sum();
    if (total - 100.0).abs() > ALLOCATION_EPSILON {
        errors.push(format!(
            "asset_classes: target allocations sum to {:.4}, expected 100",
            total
        ));
    }
}

fn validate_risk_buckets(raw: &RawConfiguration, errors: &mut Vec<String>) {
    let mut seen = HashSet::new();
    for bucket in &raw.risk_buckets {
        if bucket.name.trim().is_empty() {
            errors.push("risk_buckets: name is empty".into());
        } else if !seen.insert(bucket.name.as_str()) {
            errors.push(format!("risk_buckets.{}: duplicate name", bucket.name));
        }

        let max = bucket.max_allocation_pct;
        if !max.is_finite() || !(0.0..=100.0).contains(&max) {
            errors.push(format!(
                "risk_buckets.{}: max_allocation_pct {} not within 0..=100",
                bucket.name, max
            ));
        }
    }
}

fn validate_profit_zones(raw: &RawConfiguration, errors: &mut Vec<String>) {
    for (i, zone) in raw.profit_zones.iter().enumerate() {
        if !zone.level_pct.is_finite() || zone.level_pct < 0.0 {
            errors.push(format!(
                "profit_zones[{}]: level_pct {} must be a non-negative number",
                i, zone.level_pct
            ));
        }

        if i > 0 && zone.level_pct <= raw.profit_zones[i - 1].level_pct {
            errors.push(format!(
                "profit_zones[{}]: level {} is not above previous level {}",
                i,
                zone.level_pct,
                raw.profit_zones[i - 1].level_pct
            ));
        }

        if zone.action == ZoneAction::Secure {
            if !(zone.percentage_to_secure > 0.0 && zone.percentage_to_secure <= 100.0) {
                errors.push(format!(
                    "profit_zones[{}]: percentage_to_secure {} not within (0, 100]",
                    i, zone.percentage_to_secure
                ));
            }
            let split = zone.percentage_to_secure + zone.remaining_percentage;
            if (split - 100.0).abs() > ALLOCATION_EPSILON {
                errors.push(format!(
                    "profit_zones[{}]: secure + remaining = {}, expected 100",
                    i, split
                ));
            }
        }
    }
}

/// Switches and thresholds for the automation controller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AutomationConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_monitoring_interval_ms")]
    pub monitoring_interval_ms: u64,
    #[serde(default = "default_true")]
    pub auto_profit_taking: bool,
    #[serde(default = "default_profit_taking_threshold")]
    pub profit_taking_threshold_pct: f64,
    #[serde(default = "default_true")]
    pub auto_rebalance: bool,
    #[serde(default = "default_rebalance_threshold")]
    pub rebalance_threshold_pct: f64,
}

fn default_monitoring_interval_ms() -> u64 { 30_000 }
fn default_true() -> bool { true }
fn default_profit_taking_threshold() -> f64 { 5.0 }
fn default_rebalance_threshold() -> f64 { 5.0 }

impl Default for AutomationConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            monitoring_interval_ms: default_monitoring_interval_ms(),
            auto_profit_taking: true,
            profit_taking_threshold_pct: default_profit_taking_threshold(),
            auto_rebalance: true,
            rebalance_threshold_pct: default_rebalance_threshold(),
        }
    }
}

/// Partial update for [`AutomationConfig`]. Unknown keys are rejected.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AutomationConfigPatch {
    #[serde(default)]
    pub enabled: Option<bool>,
    #[serde(default)]
    pub monitoring_interval_ms: Option<u64>,
    #[serde(default)]
    pub auto_profit_taking: Option<bool>,
    #[serde(default)]
    pub profit_taking_threshold_pct: Option<f64>,
    #[serde(default)]
    pub auto_rebalance: Option<bool>,
    #[serde(default)]
    pub rebalance_threshold_pct: Option<f64>,
}

impl AutomationConfigPatch {
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        serde_json::from_str(json).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

impl AutomationConfig {
    /// Interval within `[MIN_MONITORING_INTERVAL_MS, MAX_MONITORING_INTERVAL_MS]`,
    /// thresholds finite percentages.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let ms = self.monitoring_interval_ms;
        if !(MIN_MONITORING_INTERVAL_MS..=MAX_MONITORING_INTERVAL_MS).contains(&ms) {
            return Err(ConfigError::OutOfRange {
                field: "monitoring_interval_ms",
                value: ms as f64,
                min: MIN_MONITORING_INTERVAL_MS as f64,
                max: MAX_MONITORING_INTERVAL_MS as f64,
            });
        }
        check_percentage("profit_taking_threshold_pct", self.profit_taking_threshold_pct)?;
        check_percentage("rebalance_threshold_pct", self.rebalance_threshold_pct)
    }

    /// Build the merged copy and validate it as a whole. `self` is never
    /// modified, so a rejected patch changes nothing.
    pub fn apply(&self, patch: &AutomationConfigPatch) -> Result<AutomationConfig, ConfigError> {
        let merged = AutomationConfig {
            enabled: patch.enabled.unwrap_or(self.enabled),
            monitoring_interval_ms: patch
                .monitoring_interval_ms
                .unwrap_or(self.monitoring_interval_ms),
            auto_profit_taking: patch.auto_profit_taking.unwrap_or(self.auto_profit_taking),
            profit_taking_threshold_pct: patch
                .profit_taking_threshold_pct
                .unwrap_or(self.profit_taking_threshold_pct),
            auto_rebalance: patch.auto_rebalance.unwrap_or(self.auto_rebalance),
            rebalance_threshold_pct: patch
                .rebalance_threshold_pct
                .unwrap_or(self.rebalance_threshold_pct),
        };
        merged.validate()?;
        Ok(merged)
    }
}

fn check_percentage(field: &'static str, value: f64) -> Result<(), ConfigError> {
    if value.is_finite() && (0.0..=100.0).contains(&value) {
        Ok(())
    } else {
        Err(ConfigError::OutOfRange {
            field,
            value,
            min: 0.0,
            max: 100.0,
        })
    }
}
