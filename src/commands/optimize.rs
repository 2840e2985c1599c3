//! Optimize command implementation

use anyhow::{Context, Result};
use risk_engine::data::{MarketDataSource, StaticDataSource};
use risk_engine::{Config, RiskManager, Symbol};
use std::collections::HashMap;
use tracing::info;

pub fn run(
    config_path: String,
    data_path: String,
    returns_path: String,
    risk_aversion: f64,
) -> Result<()> {
    info!("Starting portfolio optimization");

    let config = Config::from_file(&config_path)?;
    info!("Loaded configuration from: {}", config_path);

    let source = StaticDataSource::from_file(&data_path)?;
    let (positions, snapshot) = source.fetch()?;

    let raw = std::fs::read_to_string(&returns_path)
        .with_context(|| format!("failed to read expected returns from {}", returns_path))?;
    let expected_returns: HashMap<Symbol, f64> = serde_json::from_str(&raw)
        .with_context(|| format!("failed to parse expected returns from {}", returns_path))?;
    info!(
        "Loaded expected returns for {} symbols from: {}",
        expected_returns.len(),
        returns_path
    );

    let manager = RiskManager::new(config);

    // One ingestion cycle so weights, sectors, and breakers are current.
    let metrics = manager.update_risk_metrics(positions.clone(), snapshot.clone())?;
    let current: HashMap<Symbol, f64> = positions
        .iter()
        .map(|p| (p.symbol.clone(), p.market_value / metrics.gross_exposure))
        .collect();

    let runtime = tokio::runtime::Runtime::new()?;
    let result = runtime.block_on(manager.optimize(
        expected_returns,
        current,
        snapshot,
        risk_aversion,
    ))?;

    println!("\n{}", "=".repeat(60));
    println!("OPTIMIZATION RESULT");
    println!("{}", "=".repeat(60));
    println!("Recommendation:      {:?}", result.recommendation);
    println!("Expected Return:     {:.2}%", result.expected_return * 100.0);
    println!("Expected Risk:       {:.2}%", result.expected_risk * 100.0);
    println!("Sharpe Ratio:        {:.2}", result.sharpe_ratio);
    println!("Turnover:            {:.2}%", result.turnover * 100.0);
    println!("Est. Total Cost:     {:.2}", result.costs.total_cost);
    println!(
        "  spread {:.2} / impact {:.2} / slippage {:.2} / commission {:.2} / financing {:.2}",
        result.costs.spread_cost,
        result.costs.market_impact,
        result.costs.slippage_cost,
        result.costs.commission_cost,
        result.costs.financing_cost
    );

    if !result.violations.is_empty() {
        println!("\nConstraint Violations:");
        for v in &result.violations {
            println!("  - {}", v);
        }
    }

    if !result.data_gaps.is_empty() {
        println!("\nExcluded (no market data):");
        for sym in &result.data_gaps {
            println!("  - {}", sym);
        }
    }

    println!("\nTarget Weights:");
    let mut weights: Vec<_> = result.weights.iter().collect();
    weights.sort_by(|a, b| b.1.abs().total_cmp(&a.1.abs()));
    for (symbol, weight) in weights {
        println!("  {:<10} {:>8.2}%", symbol, weight * 100.0);
    }

    if !result.execution_plan.is_empty() {
        println!(
            "\nExecution Plan ({} steps, ~{} min):",
            result.execution_plan.len(),
            result.estimated_execution_minutes
        );
        for step in &result.execution_plan {
            println!(
                "  {:<10} {:>12.2} shares  [{:?}, {} min]",
                step.symbol, step.quantity, step.urgency, step.time_horizon_minutes
            );
        }
    }

    Ok(())
}
