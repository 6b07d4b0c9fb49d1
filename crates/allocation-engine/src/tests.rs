#[cfg(test)]
mod controller_tests {
    use chrono::{DateTime, Local, TimeZone};
    use rust_decimal::Decimal;

    use crate::automation::{AutomationController, ControllerState, CycleOutcome, CycleReport};
    use crate::config::{AutomationConfig, AutomationConfigPatch, Configuration, RawConfiguration};
    use crate::error::{ConfigError, StateError};
    use crate::ledger::ActionPayload;
    use crate::models::*;

    fn raw_config(frequency: RebalanceFrequency) -> RawConfiguration {
        let class = |name: &str, target: f64, bucket: &str| AssetClass {
            name: name.to_string(),
            target_allocation_pct: target,
            current_allocation_pct: 0.0,
            risk_bucket: Some(bucket.to_string()),
        };
        let bucket = |name: &str, max: f64| RiskBucket {
            name: name.to_string(),
            current_allocation_pct: 0.0,
            max_allocation_pct: max,
        };
        RawConfiguration {
            total_capital: Decimal::from(100_000),
            asset_classes: vec![
                class("Large", 60.0, "Core"),
                class("Mid", 30.0, "Growth"),
                class("Small", 10.0, "Growth"),
            ],
            risk_buckets: vec![bucket("Core", 70.0), bucket("Growth", 60.0)],
            profit_zones: vec![
                ProfitZone::secure(10.0, 25.0),
                ProfitZone::secure(20.0, 50.0),
                ProfitZone::trail(50.0),
            ],
            rebalancing_frequency: frequency,
        }
    }

    fn controller_with(frequency: RebalanceFrequency, automation: AutomationConfig) -> AutomationController {
        let config = Configuration::load(raw_config(frequency)).unwrap();
        AutomationController::new(config, automation).unwrap()
    }

    fn enabled_controller() -> AutomationController {
        controller_with(
            RebalanceFrequency::Daily,
            AutomationConfig {
                enabled: true,
                ..AutomationConfig::default()
            },
        )
    }

    /// `value` is the position's market value.
    fn position(symbol: &str, class: &str, value: f64, pnl: f64) -> Position {
        Position {
            symbol: symbol.to_string(),
            side: PositionSide::Long,
            entry_price: value / 100.0 / (1.0 + pnl / 100.0),
            quantity: 100.0,
            unrealized_pnl_pct: pnl,
            current_price: Some(value / 100.0),
            asset_class: class.to_string(),
            risk_bucket: None,
        }
    }

    fn balanced(aapl_pnl: f64) -> Vec<Position> {
        vec![
            position("AAPL", "Large", 60_000.0, aapl_pnl),
            position("CRWD", "Mid", 30_000.0, 1.0),
            position("IWM", "Small", 10_000.0, -2.0),
        ]
    }

    fn completed(outcome: CycleOutcome) -> CycleReport {
        match outcome {
            CycleOutcome::Completed(report) => report,
            CycleOutcome::Skipped(reason) => panic!("cycle skipped: {reason}"),
        }
    }

    fn profit_levels(controller: &AutomationController) -> Vec<(String, f64)> {
        controller
            .pending_actions()
            .iter()
            .filter_map(|p| match &p.payload {
                ActionPayload::Profit(a) => Some((a.symbol.clone(), a.profit_level_achieved)),
                ActionPayload::Rebalance(_) => None,
            })
            .collect()
    }

    fn at(y: i32, m: u32, d: u32) -> DateTime<Local> {
        Local.with_ymd_and_hms(y, m, d, 10, 0, 0).unwrap()
    }

    #[test]
    fn test_zone_fires_then_higher_zone_supersedes() {
        let controller = enabled_controller();

        let report = completed(controller.monitor_portfolio(&balanced(15.0)));
        assert_eq!(report.merge.added, 1);
        assert!(!report.allocation_status.rebalancing_needed);
        let pending = controller.pending_actions();
        assert_eq!(pending.len(), 1);
        match &pending[0].payload {
            ActionPayload::Profit(a) => {
                assert_eq!(a.action_type, ProfitActionType::SecureProfit);
                assert_eq!(a.profit_level_achieved, 10.0);
                assert_eq!(a.percentage_to_secure, 25.0);
                assert_eq!(a.estimated_amount, Decimal::from(15_000));
            }
            other => panic!("unexpected payload {other:?}"),
        }

        let report = completed(controller.monitor_portfolio(&balanced(22.0)));
        assert_eq!(report.merge.added, 1);
        assert_eq!(report.merge.superseded, 1);
        assert_eq!(profit_levels(&controller), vec![("AAPL".to_string(), 20.0)]);
    }

    #[test]
    fn test_executed_zone_does_not_refire_until_ledger_cleared() {
        let controller = enabled_controller();
        completed(controller.monitor_portfolio(&balanced(15.0)));
        let id = controller.pending_actions()[0].id;
        controller.accept_action(id).unwrap();
        let executed = controller.report_execution(id, true).unwrap();
        assert!(executed.is_some());

        let report = completed(controller.monitor_portfolio(&balanced(16.0)));
        assert_eq!(report.merge.added, 0);
        assert_eq!(report.merge.duplicates, 1);
        assert!(controller.pending_actions().is_empty());

        controller.clear_executed_ledger();
        let report = completed(controller.monitor_portfolio(&balanced(16.0)));
        assert_eq!(report.merge.added, 1);
    }

    #[test]
    fn test_repeated_cycles_do_not_duplicate_pending() {
        let controller = enabled_controller();
        let mut positions = balanced(15.0);
        positions[1] = position("CRWD", "Mid", 40_000.0, 1.0);

        let first = completed(controller.monitor_portfolio(&positions));
        let second = completed(controller.monitor_portfolio(&positions));
        assert!(first.merge.added > 0);
        assert_eq!(second.merge.added, 0);
        assert_eq!(second.merge.duplicates, first.merge.added);
        assert_eq!(controller.pending_actions().len(), first.merge.added);
    }

    #[test]
    fn test_disabled_controller_is_a_silent_noop() {
        let controller = controller_with(RebalanceFrequency::Daily, AutomationConfig::default());
        assert_eq!(controller.state(), ControllerState::Disabled);

        let outcome = controller.monitor_portfolio(&balanced(15.0));
        assert_eq!(outcome, CycleOutcome::Skipped(StateError::Disabled));
        assert!(controller.pending_actions().is_empty());
        assert!(controller.stats().last_monitoring_time.is_none());

        controller.enable_automation();
        assert_eq!(controller.state(), ControllerState::Idle);
        assert!(controller.monitor_portfolio(&balanced(15.0)).is_completed());

        controller.disable_automation();
        assert_eq!(controller.state(), ControllerState::Disabled);
        assert_eq!(
            controller.monitor_portfolio(&balanced(15.0)),
            CycleOutcome::Skipped(StateError::Disabled)
        );
    }

    #[test]
    fn test_trigger_while_evaluating_is_skipped() {
        let controller = enabled_controller();

        let guard = controller.begin_cycle().unwrap();
        assert_eq!(controller.state(), ControllerState::Evaluating);
        assert_eq!(
            controller.monitor_portfolio(&balanced(15.0)),
            CycleOutcome::Skipped(StateError::AlreadyEvaluating)
        );
        assert!(controller.pending_actions().is_empty());
        drop(guard);

        assert_eq!(controller.state(), ControllerState::Idle);
        let report = completed(controller.monitor_portfolio(&balanced(15.0)));
        assert_eq!(report.cycle, 1);
    }

    #[test]
    fn test_racing_triggers_merge_once() {
        let controller = enabled_controller();
        let positions = balanced(15.0);

        let outcomes: Vec<CycleOutcome> = std::thread::scope(|s| {
            let handles: Vec<_> = (0..8)
                .map(|_| s.spawn(|| controller.monitor_portfolio(&positions)))
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });

        let added: usize = outcomes
            .iter()
            .filter_map(|o| match o {
                CycleOutcome::Completed(r) => Some(r.merge.added),
                CycleOutcome::Skipped(_) => None,
            })
            .sum();
        assert!(outcomes.iter().any(|o| o.is_completed()));
        assert!(outcomes.iter().all(|o| matches!(
            o,
            CycleOutcome::Completed(_) | CycleOutcome::Skipped(StateError::AlreadyEvaluating)
        )));
        assert_eq!(added, 1);
        assert_eq!(controller.pending_actions().len(), 1);
        assert_eq!(controller.state(), ControllerState::Idle);
    }

    #[test]
    fn test_cancel_pending_actions() {
        let controller = enabled_controller();
        assert_eq!(controller.cancel_pending_actions(), 0);

        completed(controller.monitor_portfolio(&balanced(15.0)));
        let id = controller.pending_actions()[0].id;
        controller.accept_action(id).unwrap();
        controller.report_execution(id, true).unwrap();

        completed(controller.monitor_portfolio(&balanced(25.0)));
        assert_eq!(controller.pending_actions().len(), 1);
        assert_eq!(controller.cancel_pending_actions(), 1);
        assert!(controller.pending_actions().is_empty());
        assert_eq!(controller.executed_actions().len(), 1);
    }

    #[test]
    fn test_update_config_rejects_whole_patch() {
        let controller = enabled_controller();
        let before = controller.automation_config();

        let patch = AutomationConfigPatch {
            monitoring_interval_ms: Some(4_000),
            rebalance_threshold_pct: Some(3.0),
            ..Default::default()
        };
        assert!(matches!(
            controller.update_config(&patch),
            Err(ConfigError::OutOfRange { field: "monitoring_interval_ms", .. })
        ));
        assert_eq!(controller.automation_config(), before);

        let patch = AutomationConfigPatch {
            monitoring_interval_ms: Some(5_000),
            rebalance_threshold_pct: Some(3.0),
            ..Default::default()
        };
        let updated = controller.update_config(&patch).unwrap();
        assert_eq!(updated.monitoring_interval_ms, 5_000);
        assert_eq!(updated.rebalance_threshold_pct, 3.0);
        assert!(updated.enabled);
    }

    #[test]
    fn test_invalid_configuration_keeps_prior() {
        let controller = enabled_controller();
        let before = controller.configuration();

        let mut raw = raw_config(RebalanceFrequency::Daily);
        raw.asset_classes[0].target_allocation_pct = 50.0;
        assert!(matches!(
            controller.update_configuration(raw),
            Err(ConfigError::Invariant(_))
        ));
        assert_eq!(controller.configuration(), before);

        let mut raw = raw_config(RebalanceFrequency::Monthly);
        raw.total_capital = Decimal::from(200_000);
        controller.update_configuration(raw).unwrap();
        assert_eq!(controller.configuration().total_capital(), Decimal::from(200_000));
        assert_eq!(
            controller.configuration().rebalancing_frequency(),
            RebalanceFrequency::Monthly
        );
    }

    #[test]
    fn test_toggles_gate_queueing_but_not_previews() {
        let controller = controller_with(
            RebalanceFrequency::Daily,
            AutomationConfig {
                enabled: true,
                auto_profit_taking: false,
                auto_rebalance: false,
                ..AutomationConfig::default()
            },
        );
        let mut positions = balanced(15.0);
        positions[1] = position("CRWD", "Mid", 40_000.0, 1.0);

        let report = completed(controller.monitor_portfolio(&positions));
        assert_eq!(report.profit_actions_found, 1);
        assert!(report.rebalancing_suggestions_found > 0);
        assert!(controller.pending_actions().is_empty());

        assert_eq!(controller.check_profit_preservation(&positions).len(), 1);
        assert!(!controller.analyze_rebalancing_needs(&positions).is_empty());
    }

    #[test]
    fn test_profit_threshold_gates_queueing() {
        let controller = controller_with(
            RebalanceFrequency::Daily,
            AutomationConfig {
                enabled: true,
                profit_taking_threshold_pct: 20.0,
                ..AutomationConfig::default()
            },
        );
        completed(controller.monitor_portfolio(&balanced(15.0)));
        assert!(controller.pending_actions().is_empty());

        completed(controller.monitor_portfolio(&balanced(21.0)));
        assert_eq!(profit_levels(&controller), vec![("AAPL".to_string(), 20.0)]);
    }

    #[test]
    fn test_rebalancing_preview_example() {
        let controller = controller_with(
            RebalanceFrequency::Daily,
            AutomationConfig {
                rebalance_threshold_pct: 1.5,
                ..AutomationConfig::default()
            },
        );
        let positions = vec![
            position("AAPL", "Large", 58_000.0, 1.0),
            position("CRWD", "Mid", 32_000.0, 1.0),
            position("IWM", "Small", 10_000.0, 1.0),
        ];

        let suggestions = controller.analyze_rebalancing_needs(&positions);
        assert_eq!(suggestions.len(), 2);
        let mid = suggestions.iter().find(|s| s.symbol == "Mid").unwrap();
        assert_eq!(mid.action, RebalanceAction::Sell);
        assert_eq!(mid.priority, Priority::Medium);
        assert_eq!(mid.suggested_amount, Decimal::from(2_000));
        let large = suggestions.iter().find(|s| s.symbol == "Large").unwrap();
        assert_eq!(large.action, RebalanceAction::Buy);

        // Previews never touch the ledgers.
        assert!(controller.pending_actions().is_empty());
    }

    #[test]
    fn test_executed_rebalance_blocks_until_next_week() {
        let controller = controller_with(
            RebalanceFrequency::Weekly,
            AutomationConfig {
                enabled: true,
                ..AutomationConfig::default()
            },
        );
        let positions = vec![
            position("AAPL", "Large", 50_000.0, 1.0),
            position("CRWD", "Mid", 40_000.0, 1.0),
            position("IWM", "Small", 10_000.0, 1.0),
        ];
        let mid_sells = |c: &AutomationController| {
            c.pending_actions()
                .iter()
                .filter(|p| {
                    matches!(&p.payload, ActionPayload::Rebalance(s)
                        if s.symbol == "Mid" && s.action == RebalanceAction::Sell)
                })
                .count()
        };

        let monday = at(2026, 3, 2);
        completed(controller.monitor_portfolio_at(&positions, monday));
        assert_eq!(mid_sells(&controller), 1);
        for id in controller.pending_actions().iter().map(|p| p.id).collect::<Vec<_>>() {
            controller.accept_action(id).unwrap();
            controller.report_execution_at(id, true, monday).unwrap();
        }

        completed(controller.monitor_portfolio_at(&positions, at(2026, 3, 6)));
        assert_eq!(mid_sells(&controller), 0);

        completed(controller.monitor_portfolio_at(&positions, at(2026, 3, 9)));
        assert_eq!(mid_sells(&controller), 1);
    }

    #[test]
    fn test_stats_and_state_snapshot() {
        let controller = enabled_controller();
        completed(controller.monitor_portfolio(&balanced(15.0)));
        let id = controller.pending_actions()[0].id;
        controller.accept_action(id).unwrap();
        controller.report_execution(id, true).unwrap();

        let state = controller.get_state();
        assert_eq!(state.state, ControllerState::Idle);
        assert_eq!(state.stats.total_actions_executed, 1);
        assert_eq!(state.stats.profit_actions_today, 1);
        assert_eq!(state.stats.rebalance_actions_today, 0);
        assert_eq!(state.profit_secured_today, Decimal::from(15_000));
        assert!(state.last_rebalance.is_none());
        assert!(state.stats.last_monitoring_time.is_some());
        assert_eq!(state.executed_actions, 1);
        assert_eq!(state.pending_actions, 0);
        assert_eq!(
            state.allocation_status.total_allocated + state.allocation_status.cash_available,
            state.config.total_capital()
        );
    }

    #[test]
    fn test_failed_execution_is_dropped_and_can_refire() {
        let controller = enabled_controller();
        completed(controller.monitor_portfolio(&balanced(15.0)));
        let id = controller.pending_actions()[0].id;

        assert!(matches!(
            controller.report_execution(id, true),
            Err(StateError::InvalidTransition { .. })
        ));
        controller.accept_action(id).unwrap();
        assert!(controller.report_execution(id, false).unwrap().is_none());
        assert!(controller.executed_actions().is_empty());
        assert_eq!(controller.stats().total_actions_executed, 0);

        let report = completed(controller.monitor_portfolio(&balanced(15.0)));
        assert_eq!(report.merge.added, 1);
    }

    #[test]
    fn test_stale_profit_action_lowers_profit_health() {
        let controller = enabled_controller();
        let first = completed(controller.monitor_portfolio(&balanced(15.0)));
        assert_eq!(first.portfolio_health.profit_health, 100.0);

        let second = completed(controller.monitor_portfolio(&balanced(15.0)));
        assert_eq!(second.portfolio_health.profit_health, 90.0);

        let id = controller.pending_actions()[0].id;
        controller.cancel_action(id).unwrap();
        let third = completed(controller.monitor_portfolio(&balanced(9.0)));
        assert_eq!(third.portfolio_health.profit_health, 100.0);
    }

    #[test]
    fn test_malformed_position_becomes_warning() {
        let controller = enabled_controller();
        let mut positions = balanced(1.0);
        positions.push(position("BAD", "Unknown", 5_000.0, 1.0));
        positions.push(Position {
            quantity: f64::NAN,
            ..position("NAN", "Large", 1_000.0, 1.0)
        });

        let report = completed(controller.monitor_portfolio(&positions));
        let skipped: Vec<&String> = report
            .portfolio_health
            .warnings
            .iter()
            .filter(|w| w.contains("BAD") || w.contains("NAN"))
            .collect();
        assert_eq!(skipped.len(), 2);
        assert_eq!(report.allocation_status.total_allocated, Decimal::from(100_000));
    }

    #[test]
    fn test_skipped_position_queues_no_profit_action() {
        let controller = enabled_controller();
        let mut positions = balanced(15.0);
        positions.push(position("GHOST", "Unknown", 5_000.0, 15.0));

        let report = completed(controller.monitor_portfolio(&positions));
        assert!(report.portfolio_health.warnings.iter().any(|w| w.contains("GHOST")));
        assert_eq!(report.profit_actions_found, 1);
        assert_eq!(profit_levels(&controller), vec![("AAPL".to_string(), 10.0)]);

        let preview = controller.check_profit_preservation(&positions);
        assert_eq!(preview.len(), 1);
        assert_eq!(preview[0].symbol, "AAPL");
    }

    #[test]
    fn test_oversized_position_does_not_abort_cycle() {
        let controller = enabled_controller();
        let mut positions = balanced(1.0);
        positions.push(Position {
            quantity: 1e15,
            current_price: Some(1e13),
            ..position("HUGE", "Large", 1_000.0, 1.0)
        });

        let outcome = controller.monitor_portfolio(&positions);
        assert!(outcome.is_completed());
    }

    #[test]
    fn test_new_rejects_out_of_range_settings() {
        let config = Configuration::load(raw_config(RebalanceFrequency::Daily)).unwrap();
        let result = AutomationController::new(
            config,
            AutomationConfig {
                monitoring_interval_ms: 0,
                ..AutomationConfig::default()
            },
        );
        assert!(matches!(
            result,
            Err(ConfigError::OutOfRange { field: "monitoring_interval_ms", .. })
        ));
    }
}
