use rust_decimal::prelude::*;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::DataError;

/// A named bucket of holdings with a target share of total capital.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssetClass {
    pub name: String,
    pub target_allocation_pct: f64,
    #[serde(default)]
    pub current_allocation_pct: f64,
    /// Risk bucket this class's holdings count against when a position
    /// does not name one itself.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub risk_bucket: Option<String>,
}

impl AssetClass {
    /// Current minus target, in percentage points.
    pub fn deviation(&self) -> f64 {
        self.current_allocation_pct - self.target_allocation_pct
    }
}

/// A risk tier with a hard allocation cap.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskBucket {
    pub name: String,
    #[serde(default)]
    pub current_allocation_pct: f64,
    pub max_allocation_pct: f64,
}

impl RiskBucket {
    /// Percentage points above the cap; zero when at or under it.
    pub fn excess(&self) -> f64 {
        (self.current_allocation_pct - self.max_allocation_pct).max(0.0)
    }

    pub fn is_breached(&self) -> bool {
        self.excess() > 0.0
    }

    /// Percentage points that can still be added before hitting the cap.
    pub fn headroom_pct(&self) -> f64 {
        (self.max_allocation_pct - self.current_allocation_pct).max(0.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ZoneAction {
    /// Close part of the position.
    Secure,
    /// Tighten a trailing stop, keep the whole position.
    Trail,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProfitZone {
    pub level_pct: f64,
    pub action: ZoneAction,
    #[serde(default)]
    pub percentage_to_secure: f64,
    #[serde(default = "full_remaining")]
    pub remaining_percentage: f64,
}

fn full_remaining() -> f64 {
    100.0
}

impl ProfitZone {
    pub fn secure(level_pct: f64, percentage_to_secure: f64) -> Self {
        Self {
            level_pct,
            action: ZoneAction::Secure,
            percentage_to_secure,
            remaining_percentage: 100.0 - percentage_to_secure,
        }
    }

    pub fn trail(level_pct: f64) -> Self {
        Self {
            level_pct,
            action: ZoneAction::Trail,
            percentage_to_secure: 0.0,
            remaining_percentage: 100.0,
        }
    }

    /// Move the stop at +5%, bank a quarter at +10%, half at +20%.
    pub fn default_ladder() -> Vec<ProfitZone> {
        vec![
            ProfitZone::trail(5.0),
            ProfitZone::secure(10.0, 25.0),
            ProfitZone::secure(20.0, 50.0),
        ]
    }
}

/// How long an executed rebalance blocks an identical proposal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RebalanceFrequency {
    #[default]
    Daily,
    Weekly,
    Monthly,
    /// Driven by drift alone; executed rebalances never block.
    Auto,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PositionSide {
    #[default]
    Long,
    Short,
}

/// One open position as supplied by the position feed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub symbol: String,
    #[serde(default)]
    pub side: PositionSide,
    pub entry_price: f64,
    pub quantity: f64,
    pub unrealized_pnl_pct: f64,
    #[serde(default)]
    pub current_price: Option<f64>,
    pub asset_class: String,
    #[serde(default)]
    pub risk_bucket: Option<String>,
}

impl Position {
    /// Absolute exposure in account currency. Fails when the value is not
    /// a finite number that fits in a [`Decimal`].
    pub fn market_value(&self) -> Result<Decimal, DataError> {
        let price = self
            .current_price
            .unwrap_or(self.entry_price * (1.0 + self.unrealized_pnl_pct / 100.0));
        let value = (self.quantity * price).abs();
        Decimal::from_f64(value).ok_or_else(|| DataError::MalformedPosition {
            symbol: self.symbol.clone(),
            reason: format!("market value {} cannot be represented", value),
        })
    }

    /// Field-level sanity checks that need no configuration.
    pub fn check_fields(&self) -> Result<(), DataError> {
        let reason = if self.symbol.trim().is_empty() {
            Some("empty symbol".to_string())
        } else if !self.quantity.is_finite() || self.quantity <= 0.0 {
            Some(format!("invalid quantity {}", self.quantity))
        } else if !self.entry_price.is_finite() || self.entry_price <= 0.0 {
            Some(format!("invalid entry price {}", self.entry_price))
        } else if !self.unrealized_pnl_pct.is_finite() {
            Some("non-finite unrealized P/L".to_string())
        } else if let Some(price) = self.current_price.filter(|p| !p.is_finite() || *p <= 0.0) {
            Some(format!("invalid current price {price}"))
        } else {
            None
        };

        match reason {
            Some(reason) => Err(DataError::MalformedPosition {
                symbol: self.symbol.clone(),
                reason,
            }),
            None => Ok(()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct AllocationStatus {
    pub total_allocated: Decimal,
    pub cash_available: Decimal,
    pub rebalancing_needed: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PortfolioHealth {
    pub overall_score: u8,
    pub allocation_health: f64,
    pub risk_health: f64,
    pub profit_health: f64,
    pub warnings: Vec<String>,
    pub recommendations: Vec<String>,
}

impl Default for PortfolioHealth {
    fn default() -> Self {
        Self {
            overall_score: 100,
            allocation_health: 100.0,
            risk_health: 100.0,
            profit_health: 100.0,
            warnings: Vec::new(),
            recommendations: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProfitActionType {
    SecureProfit,
    TrailStop,
}

impl ProfitActionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProfitActionType::SecureProfit => "SECURE_PROFIT",
            ProfitActionType::TrailStop => "TRAIL_STOP",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProfitSecuringAction {
    pub symbol: String,
    pub action_type: ProfitActionType,
    /// Level of the zone that fired.
    pub profit_level_achieved: f64,
    pub current_profit_pct: f64,
    /// Fraction of the position to close; zero for trailing stops.
    pub percentage_to_secure: f64,
    pub estimated_amount: Decimal,
    pub reason: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RebalanceAction {
    Buy,
    Sell,
}

impl RebalanceAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            RebalanceAction::Buy => "buy",
            RebalanceAction::Sell => "sell",
        }
    }
}

/// Ordered so that `High > Medium > Low`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    Medium,
    High,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RebalancingSuggestion {
    pub symbol: String,
    pub action: RebalanceAction,
    pub priority: Priority,
    pub reason: String,
    pub suggested_amount: Decimal,
    pub current_allocation: f64,
    pub target_allocation: f64,
}

impl RebalancingSuggestion {
    pub fn deviation(&self) -> f64 {
        self.current_allocation - self.target_allocation
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn position(symbol: &str, quantity: f64, entry: f64, pnl_pct: f64) -> Position {
        Position {
            symbol: symbol.to_string(),
            side: PositionSide::Long,
            entry_price: entry,
            quantity,
            unrealized_pnl_pct: pnl_pct,
            current_price: None,
            asset_class: "Large".to_string(),
            risk_bucket: None,
        }
    }

    #[test]
    fn test_market_value_prefers_current_price() {
        let mut p = position("AAPL", 10.0, 100.0, 50.0);
        assert_eq!(p.market_value().unwrap(), Decimal::from(1500));

        p.current_price = Some(120.0);
        assert_eq!(p.market_value().unwrap(), Decimal::from(1200));
    }

    #[test]
    fn test_short_counts_absolute_exposure() {
        let mut p = position("TSLA", 5.0, 200.0, 0.0);
        p.side = PositionSide::Short;
        assert_eq!(p.market_value().unwrap(), Decimal::from(1000));
    }

    #[test]
    fn test_market_value_beyond_decimal_range_is_an_error() {
        let p = position("HUGE", 1e20, 1e10, 0.0);
        assert!(p.check_fields().is_ok());
        assert!(matches!(
            p.market_value(),
            Err(DataError::MalformedPosition { ref symbol, .. }) if symbol == "HUGE"
        ));
    }

    #[test]
    fn test_check_fields_rejects_bad_records() {
        assert!(position("AAPL", 1.0, 10.0, 0.0).check_fields().is_ok());
        assert!(position("", 1.0, 10.0, 0.0).check_fields().is_err());
        assert!(position("AAPL", 0.0, 10.0, 0.0).check_fields().is_err());
        assert!(position("AAPL", 1.0, f64::NAN, 0.0).check_fields().is_err());
        assert!(position("AAPL", 1.0, 10.0, f64::INFINITY).check_fields().is_err());

        let mut p = position("AAPL", 1.0, 10.0, 0.0);
        p.current_price = Some(-1.0);
        assert!(matches!(
            p.check_fields(),
            Err(DataError::MalformedPosition { .. })
        ));
    }

    #[test]
    fn test_bucket_excess_and_headroom() {
        let bucket = RiskBucket {
            name: "high".to_string(),
            current_allocation_pct: 25.0,
            max_allocation_pct: 20.0,
        };
        assert!((bucket.excess() - 5.0).abs() < 1e-9);
        assert!(bucket.is_breached());
        assert_eq!(bucket.headroom_pct(), 0.0);

        let at_cap = RiskBucket {
            current_allocation_pct: 20.0,
            ..bucket
        };
        assert!(!at_cap.is_breached());
    }

    #[test]
    fn test_priority_ordering() {
        assert!(Priority::High > Priority::Medium);
        assert!(Priority::Medium > Priority::Low);
    }

    #[test]
    fn test_profit_action_type_wire_names() {
        let json = serde_json::to_string(&ProfitActionType::SecureProfit).unwrap();
        assert_eq!(json, "\"SECURE_PROFIT\"");
        assert_eq!(ProfitActionType::TrailStop.as_str(), "TRAIL_STOP");
    }
}
