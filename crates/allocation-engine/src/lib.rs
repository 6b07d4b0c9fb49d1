pub mod automation;
pub mod config;
pub mod error;
pub mod health;
pub mod ledger;
pub mod models;
pub mod monitor;
pub mod profit;
pub mod rebalancing;
#[cfg(test)]
mod tests;

pub use automation::{AutomationController, ControllerState, CycleOutcome, CycleReport, EngineState};
pub use config::{AutomationConfig, AutomationConfigPatch, Configuration, RawConfiguration};
pub use error::{ConfigError, DataError, StateError};
pub use health::{HealthScorer, ProfitState};
pub use ledger::{
    ActionLedger, ActionPayload, ActionStatus, AutomationStats, ExecutedAction, MergeOutcome,
    PendingAction,
};
pub use models::*;
pub use monitor::{AllocationMonitor, AllocationSnapshot};
pub use profit::ProfitPreservationEngine;
pub use rebalancing::RebalancingAdvisor;
