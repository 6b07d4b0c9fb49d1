use std::time::Duration;

use allocation_engine::{AutomationConfig, AutomationController, CycleOutcome, StateError};
use anyhow::{Context, Result};
use tokio::signal::unix::SignalKind;
use tokio::time;

mod config;
mod executor;
mod feed;
mod metrics;

use config::AgentConfig;
use executor::PaperExecutor;
use metrics::AgentMetrics;

#[tokio::main]
async fn main() -> Result<()> {
    // 1. Load .env, init tracing
    dotenvy::dotenv().ok();

    let json_logging = std::env::var("RUST_LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);
    if json_logging {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
            )
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
            )
            .init();
    }

    std::panic::set_hook(Box::new(|info| {
        eprintln!("PANIC: {info}");
        tracing::error!("PANIC: {info}");
    }));

    tracing::info!("Starting portfolio automation agent");

    // 2. Agent settings and portfolio configuration
    let agent_config = AgentConfig::from_env()?;
    let portfolio = feed::load_configuration(&agent_config.portfolio_config_path).await?;
    tracing::info!(
        "Portfolio configuration loaded from {}",
        agent_config.portfolio_config_path.display()
    );
    tracing::info!("  Total capital: {}", portfolio.total_capital());
    tracing::info!("  Asset classes: {}", portfolio.asset_classes().len());
    tracing::info!("  Risk buckets: {}", portfolio.risk_buckets().len());
    tracing::info!("  Rebalancing: {:?}", portfolio.rebalancing_frequency());

    // 3. Controller, with environment overrides validated like any other patch
    let controller = AutomationController::new(portfolio, AutomationConfig::default())
        .context("Automation settings rejected")?;
    let patch = agent_config.automation_patch();
    if !patch.is_empty() {
        controller
            .update_config(&patch)
            .context("Automation settings from environment rejected")?;
    }
    let automation = controller.automation_config();
    tracing::info!(
        "  Automation: {} (every {} ms, profit taking {}, rebalance {})",
        if automation.enabled { "enabled" } else { "disabled" },
        automation.monitoring_interval_ms,
        automation.auto_profit_taking,
        automation.auto_rebalance
    );
    if agent_config.paper_execution {
        tracing::info!("  Paper execution: pending actions are filled after every cycle");
    }

    let executor = agent_config.paper_execution.then(PaperExecutor::new);
    let mut agent_metrics = AgentMetrics::new(agent_config.metrics_log_interval_cycles);

    // 4. Main loop with graceful shutdown (SIGINT + SIGTERM)
    let mut interval = time::interval(Duration::from_millis(automation.monitoring_interval_ms));
    interval.set_missed_tick_behavior(time::MissedTickBehavior::Skip);
    let mut sigterm = tokio::signal::unix::signal(SignalKind::terminate())?;
    let shutdown = async {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Received SIGINT");
            }
            _ = sigterm.recv() => {
                tracing::info!("Received SIGTERM");
            }
        }
    };
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = interval.tick() => {
                run_cycle(&controller, &agent_config, executor.as_ref(), &mut agent_metrics).await;
            }
            _ = &mut shutdown => {
                tracing::info!("Shutdown signal received, exiting gracefully...");
                let state = controller.get_state();
                tracing::info!(
                    pending = state.pending_actions,
                    executed = state.executed_actions,
                    total_executed = state.stats.total_actions_executed,
                    profit_secured_today = %state.profit_secured_today,
                    "Final engine state"
                );
                agent_metrics.log_metrics();
                break;
            }
        }
    }

    tracing::info!("Automation agent shut down.");
    Ok(())
}

async fn run_cycle(
    controller: &AutomationController,
    config: &AgentConfig,
    executor: Option<&PaperExecutor>,
    metrics: &mut AgentMetrics,
) {
    let cycle_start = AgentMetrics::start_timer();

    if !controller.is_enabled() {
        tracing::debug!("Automation disabled, position feed not read");
        metrics.record_outcome(&CycleOutcome::Skipped(StateError::Disabled));
        metrics.finish_cycle(cycle_start);
        return;
    }

    let positions = match feed::load_positions(&config.positions_path).await {
        Ok(positions) => positions,
        Err(e) => {
            tracing::warn!("Position feed unavailable, cycle skipped: {:#}", e);
            metrics.record_feed_error();
            metrics.finish_cycle(cycle_start);
            return;
        }
    };

    let outcome = controller.monitor_portfolio(&positions);
    metrics.record_outcome(&outcome);

    if let CycleOutcome::Completed(report) = &outcome {
        for warning in &report.portfolio_health.warnings {
            tracing::warn!("Portfolio health: {}", warning);
        }
        for recommendation in &report.portfolio_health.recommendations {
            tracing::info!("Recommendation: {}", recommendation);
        }
        if let Some(executor) = executor {
            metrics.record_execution(executor.execute_pending(controller));
        }
    }

    metrics.finish_cycle(cycle_start);
}
