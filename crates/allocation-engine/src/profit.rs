use rust_decimal::prelude::*;
use rust_decimal::Decimal;

use crate::models::*;

/// Maps open positions onto the profit-zone ladder.
///
/// Stateless: whether a zone has already been acted on is the controller's
/// concern, tracked in its ledgers.
pub struct ProfitPreservationEngine;

impl ProfitPreservationEngine {
    /// One action per position whose profit reaches at least one zone.
    ///
    /// Only the highest qualifying zone fires; lower zones are superseded.
    /// A zone qualifies when `level_pct <= unrealized_pnl_pct`.
    pub fn check_profit_preservation(
        positions: &[Position],
        profit_zones: &[ProfitZone],
    ) -> Vec<ProfitSecuringAction> {
        let mut actions = Vec::new();

        for position in positions {
            let market_value = match position.check_fields().and_then(|_| position.market_value()) {
                Ok(value) => value,
                Err(e) => {
                    tracing::debug!("Profit check skipped: {}", e);
                    continue;
                }
            };

            let profit_pct = position.unrealized_pnl_pct;
            let Some(zone) = Self::highest_qualifying_zone(profit_pct, profit_zones) else {
                continue;
            };

            let action = match zone.action {
                ZoneAction::Secure => {
                    let fraction = Decimal::from_f64(zone.percentage_to_secure / 100.0)
                        .unwrap_or_default();
                    ProfitSecuringAction {
                        symbol: position.symbol.clone(),
                        action_type: ProfitActionType::SecureProfit,
                        profit_level_achieved: zone.level_pct,
                        current_profit_pct: profit_pct,
                        percentage_to_secure: zone.percentage_to_secure,
                        estimated_amount: market_value
                            .checked_mul(fraction)
                            .map(|amount| amount.round_dp(2))
                            .unwrap_or_default(),
                        reason: format!(
                            "Profit {:+.1}% reached the {:.1}% zone: secure {:.0}% of the position",
                            profit_pct, zone.level_pct, zone.percentage_to_secure
                        ),
                    }
                }
                ZoneAction::Trail => ProfitSecuringAction {
                    symbol: position.symbol.clone(),
                    action_type: ProfitActionType::TrailStop,
                    profit_level_achieved: zone.level_pct,
                    current_profit_pct: profit_pct,
                    percentage_to_secure: 0.0,
                    estimated_amount: Decimal::ZERO,
                    reason: format!(
                        "Profit {:+.1}% reached the {:.1}% zone: trail the stop",
                        profit_pct, zone.level_pct
                    ),
                },
            };

            tracing::debug!(
                symbol = %action.symbol,
                zone = action.profit_level_achieved,
                action = action.action_type.as_str(),
                "Profit zone reached"
            );
            actions.push(action);
        }

        actions
    }

    /// Zones must be ascending by level.
    pub fn highest_qualifying_zone(profit_pct: f64, zones: &[ProfitZone]) -> Option<&ProfitZone> {
        zones
            .iter()
            .take_while(|z| z.level_pct <= profit_pct)
            .last()
    }
}
