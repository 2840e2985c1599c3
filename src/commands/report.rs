//! Report command implementation

use anyhow::Result;
use risk_engine::data::{MarketDataSource, StaticDataSource};
use risk_engine::{Config, RiskManager, VarMethod};
use tracing::info;

pub fn run(
    config_path: String,
    data_path: String,
    var_method_override: Option<String>,
    stress: bool,
) -> Result<()> {
    info!("Starting risk report");

    let mut config = Config::from_file(&config_path)?;
    info!("Loaded configuration from: {}", config_path);

    if let Some(method) = var_method_override {
        config.engine.var_method = parse_var_method(&method)?;
        info!("Overriding VaR method to: {}", config.engine.var_method);
    }

    let source = StaticDataSource::from_file(&data_path)?;
    let (positions, snapshot) = source.fetch()?;
    info!(
        "Loaded {} positions, {} snapshot entries from: {}",
        positions.len(),
        snapshot.entries.len(),
        data_path
    );

    let manager = RiskManager::new(config);
    let metrics = manager.update_risk_metrics(positions.clone(), snapshot)?;

    println!("\n{}", "=".repeat(60));
    println!("RISK REPORT");
    println!("{}", "=".repeat(60));
    println!("Portfolio Value:     {:.2}", metrics.portfolio_value);
    println!("Gross Exposure:      {:.2}", metrics.gross_exposure);
    println!(
        "VaR 95% (1d):        {:.2}  ({:.2}% of gross)",
        metrics.var_95,
        100.0 * metrics.var_95 / metrics.gross_exposure
    );
    println!(
        "VaR 99% (1d):        {:.2}  ({:.2}% of gross)",
        metrics.var_99,
        100.0 * metrics.var_99 / metrics.gross_exposure
    );
    println!("CVaR 95% (1d):       {:.2}", metrics.conditional_var);
    if let Some(method) = metrics.var_method {
        println!("VaR Method:          {}", method);
    }
    println!("Volatility (ann.):   {:.2}%", metrics.volatility * 100.0);
    println!("Sharpe Ratio:        {:.2}", metrics.sharpe_ratio);
    println!("Max Drawdown:        {:.2}%", metrics.max_drawdown * 100.0);
    println!("Concentration (HHI): {:.3}", metrics.concentration_risk);
    println!("Avg Correlation:     {:.3}", metrics.correlation_risk);

    let status = manager.circuit_breaker_status();
    println!("\nCircuit Breakers:");
    let mut kinds: Vec<_> = status.keys().copied().collect();
    kinds.sort_by_key(|k| format!("{k}"));
    for kind in kinds {
        let s = &status[&kind];
        println!("  {:<18} {:?}", format!("{kind}:"), s.state);
    }

    let alerts = manager.active_alerts();
    println!("\nActive Alerts: {}", alerts.len());
    for alert in &alerts {
        println!(
            "  [{:?}] {:?}: {}",
            alert.severity, alert.alert_type, alert.message
        );
    }

    if stress {
        let runtime = tokio::runtime::Runtime::new()?;
        let results = runtime.block_on(manager.run_stress_tests(positions))?;

        println!("\n{}", "=".repeat(60));
        println!("STRESS SCENARIOS");
        println!("{}", "=".repeat(60));
        for result in &results {
            println!(
                "{:<22} {:+.2}%",
                result.scenario, result.portfolio_change_percent
            );
            if let Some((symbol, loss)) = &result.worst_asset {
                println!("  worst asset:         {} (loss {:.2})", symbol, loss);
            }
            for breach in &result.breached_limits {
                println!("  breached:            {}", breach);
            }
        }
    }

    Ok(())
}

fn parse_var_method(s: &str) -> Result<VarMethod> {
    match s.to_lowercase().as_str() {
        "parametric" => Ok(VarMethod::Parametric),
        "historical" => Ok(VarMethod::Historical),
        "monte_carlo" | "montecarlo" | "mc" => Ok(VarMethod::MonteCarlo),
        other => anyhow::bail!(
            "Unknown VaR method: {}. Available: parametric, historical, monte_carlo",
            other
        ),
    }
}
