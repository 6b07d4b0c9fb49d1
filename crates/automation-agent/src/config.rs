use std::env;
use std::path::PathBuf;
use std::str::FromStr;

use allocation_engine::AutomationConfigPatch;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    // Inputs
    pub portfolio_config_path: PathBuf, // portfolio.json
    pub positions_path: PathBuf,        // positions.json

    // Automation overrides, applied through the controller's validation
    pub automation_enabled: Option<bool>,
    pub monitoring_interval_ms: Option<u64>,
    pub auto_profit_taking: Option<bool>,
    pub profit_taking_threshold: Option<f64>,
    pub auto_rebalance: Option<bool>,
    pub rebalance_threshold: Option<f64>,

    // Agent behaviour
    pub paper_execution: bool,           // accept + execute every pending action
    pub metrics_log_interval_cycles: u64, // 10
}

impl AgentConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub(crate) fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let config = Self {
            portfolio_config_path: get("PORTFOLIO_CONFIG_PATH")
                .unwrap_or_else(|| "portfolio.json".to_string())
                .into(),
            positions_path: get("POSITIONS_PATH")
                .unwrap_or_else(|| "positions.json".to_string())
                .into(),

            automation_enabled: optional(&get, "AUTOMATION_ENABLED")?,
            monitoring_interval_ms: optional(&get, "MONITORING_INTERVAL_MS")?,
            auto_profit_taking: optional(&get, "AUTO_PROFIT_TAKING")?,
            profit_taking_threshold: optional(&get, "PROFIT_TAKING_THRESHOLD")?,
            auto_rebalance: optional(&get, "AUTO_REBALANCE")?,
            rebalance_threshold: optional(&get, "REBALANCE_THRESHOLD")?,

            paper_execution: optional(&get, "PAPER_EXECUTION")?.unwrap_or(false),
            metrics_log_interval_cycles: optional(&get, "METRICS_LOG_INTERVAL_CYCLES")?
                .unwrap_or(10),
        };

        Ok(config)
    }

    /// Environment overrides as a controller patch.
    pub fn automation_patch(&self) -> AutomationConfigPatch {
        AutomationConfigPatch {
            enabled: self.automation_enabled,
            monitoring_interval_ms: self.monitoring_interval_ms,
            auto_profit_taking: self.auto_profit_taking,
            profit_taking_threshold_pct: self.profit_taking_threshold,
            auto_rebalance: self.auto_rebalance,
            rebalance_threshold_pct: self.rebalance_threshold,
        }
    }
}

fn optional<T>(get: &impl Fn(&str) -> Option<String>, key: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match get(key) {
        Some(raw) if !raw.trim().is_empty() => {
            let value = raw
                .trim()
                .parse::<T>()
                .with_context(|| format!("{key} has invalid value '{raw}'"))?;
            Ok(Some(value))
        }
        _ => Ok(None),
    }
}
