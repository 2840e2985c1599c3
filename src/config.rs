//! Configuration management
//!
//! Handles loading and parsing of JSON configuration files. All limits are
//! fractions of portfolio value unless noted otherwise; the engine is
//! currency-agnostic as long as prices and capital share a denomination.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::VarMethod;

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub limits: RiskLimitsConfig,
    #[serde(default)]
    pub optimizer: OptimizerConfig,
    #[serde(default)]
    pub costs: CostConfig,
    #[serde(default)]
    pub alerts: AlertConfig,
    #[serde(default)]
    pub engine: EngineConfig,
}

impl Config {
    /// Load configuration from JSON file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let contents = fs::read_to_string(path.as_ref()).context("Failed to read config file")?;
        let config: Config =
            serde_json::from_str(&contents).context("Failed to parse config JSON")?;
        Ok(config)
    }
}

/// Hard risk limits evaluated on every metrics recompute
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskLimitsConfig {
    /// Max weight of any single position.
    pub max_position_size: f64,
    /// Max combined weight per sector.
    pub max_sector_exposure: f64,
    /// Peak-to-trough decline that trips the drawdown breaker.
    pub max_drawdown: f64,
    /// Daily loss (fraction of portfolio value) that trips the loss breaker.
    pub max_daily_loss: f64,
    /// 95% VaR as a fraction of portfolio value that trips the VaR breaker.
    pub max_var: f64,
    pub max_leverage: f64,
    /// Symbols with a liquidity score below this are excluded by the optimizer.
    pub min_liquidity: f64,
    /// Weighted-average correlation above this raises a diversification alert.
    pub correlation_threshold: f64,
    /// Portfolio volatility above this raises an alert.
    pub volatility_threshold: f64,
    pub enable_circuit_breakers: bool,
    /// Scales how aggressively the optimizer trades toward its target.
    pub risk_adjustment_speed: f64,
}

impl Default for RiskLimitsConfig {
    fn default() -> Self {
        RiskLimitsConfig {
            max_position_size: 0.20,
            max_sector_exposure: 0.40,
            max_drawdown: 0.15,
            max_daily_loss: 0.05,
            max_var: 0.03,
            max_leverage: 1.0,
            min_liquidity: 0.30,
            correlation_threshold: 0.70,
            volatility_threshold: 0.40,
            enable_circuit_breakers: true,
            risk_adjustment_speed: 1.0,
        }
    }
}

impl RiskLimitsConfig {
    /// Set maximum single-position weight
    pub fn with_max_position_size(mut self, max: f64) -> Self {
        self.max_position_size = max;
        self
    }

    /// Set the VaR limit as a fraction of portfolio value
    pub fn with_max_var(mut self, max_var: f64) -> Self {
        self.max_var = max_var;
        self
    }

    /// Set maximum drawdown threshold
    pub fn with_max_drawdown(mut self, dd: f64) -> Self {
        self.max_drawdown = dd;
        self
    }

    /// Set maximum daily loss threshold
    pub fn with_max_daily_loss(mut self, loss: f64) -> Self {
        self.max_daily_loss = loss;
        self
    }

    /// Set maximum leverage
    pub fn with_max_leverage(mut self, leverage: f64) -> Self {
        self.max_leverage = leverage;
        self
    }

    /// Enable or disable circuit breakers
    pub fn with_circuit_breakers(mut self, enabled: bool) -> Self {
        self.enable_circuit_breakers = enabled;
        self
    }
}

/// Optimizer behaviour and constraint set
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OptimizerConfig {
    /// Max turnover per rebalance, in [0, 2].
    pub max_turnover: f64,
    pub max_iterations: usize,
    /// Gradient-norm stopping tolerance.
    pub tolerance: f64,
    pub step_size: f64,
    /// Net benefit (fraction of portfolio) per unit turnover required for
    /// an Execute verdict; below it but positive yields Partial.
    pub benefit_threshold: f64,
    /// Empty means all sectors allowed.
    #[serde(default)]
    pub allowed_sectors: Vec<String>,
    #[serde(default)]
    pub forbidden_assets: Vec<String>,
    /// Holding horizon assumed for financing costs, in days.
    pub holding_horizon_days: f64,
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        OptimizerConfig {
            max_turnover: 0.25,
            max_iterations: 500,
            tolerance: 1e-6,
            step_size: 0.05,
            benefit_threshold: 0.001,
            allowed_sectors: Vec::new(),
            forbidden_assets: Vec::new(),
            holding_horizon_days: 5.0,
        }
    }
}

/// One commission tier: the rate applied to notional at or above the floor
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct CommissionTier {
    pub notional_floor: f64,
    pub rate: f64,
}

/// Transaction cost model coefficients
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CostConfig {
    /// Square-root-law impact coefficient.
    pub impact_coefficient: f64,
    /// Slippage coefficient applied to volatility x participation.
    pub slippage_coefficient: f64,
    /// Progressive commission schedule, ascending by notional floor.
    pub commission_tiers: Vec<CommissionTier>,
    pub min_commission: f64,
    /// Annualized financing rate on levered notional.
    pub financing_rate: f64,
}

impl Default for CostConfig {
    fn default() -> Self {
        CostConfig {
            impact_coefficient: 0.1,
            slippage_coefficient: 0.05,
            commission_tiers: vec![
                CommissionTier {
                    notional_floor: 0.0,
                    rate: 0.0010,
                },
                CommissionTier {
                    notional_floor: 100_000.0,
                    rate: 0.0007,
                },
                CommissionTier {
                    notional_floor: 1_000_000.0,
                    rate: 0.0004,
                },
            ],
            min_commission: 1.0,
            financing_rate: 0.05,
        }
    }
}

/// Alert retention and duplicate suppression
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertConfig {
    /// Alerts older than this stop counting as active.
    pub retention_secs: u64,
    /// Identical unacknowledged (type, symbol) alerts are suppressed
    /// within this window.
    pub cooldown_secs: u64,
}

impl Default for AlertConfig {
    fn default() -> Self {
        AlertConfig {
            retention_secs: 24 * 3600,
            cooldown_secs: 300,
        }
    }
}

/// Engine-level knobs: estimator choice, windows, task budgets
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    pub var_method: VarMethod,
    /// VaR/CVaR horizon confidence levels are fixed at 95/99; this is the
    /// return-history window (periods) feeding the estimators.
    pub history_window: usize,
    /// Minimum joint history rows before historical / Monte Carlo VaR is
    /// trusted; below it the engine falls back to parametric.
    pub min_history: usize,
    pub monte_carlo_paths: usize,
    /// Seed for Monte Carlo draws; fixed so repeated runs are comparable.
    pub monte_carlo_seed: u64,
    pub stress_timeout_ms: u64,
    pub optimize_timeout_ms: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            var_method: VarMethod::Parametric,
            history_window: 252,
            min_history: 30,
            monte_carlo_paths: 10_000,
            monte_carlo_seed: 42,
            stress_timeout_ms: 5_000,
            optimize_timeout_ms: 10_000,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_sane() {
        let cfg = Config::default();
        assert!(cfg.limits.max_var > 0.0);
        assert!(cfg.limits.max_position_size <= 1.0);
        assert!(cfg.optimizer.max_turnover <= 2.0);
        assert!(!cfg.costs.commission_tiers.is_empty());
    }

    #[test]
    fn test_builder_methods() {
        let limits = RiskLimitsConfig::default()
            .with_max_var(0.05)
            .with_max_drawdown(0.10)
            .with_circuit_breakers(false);
        assert_eq!(limits.max_var, 0.05);
        assert_eq!(limits.max_drawdown, 0.10);
        assert!(!limits.enable_circuit_breakers);
    }

    #[test]
    fn test_config_round_trips_json() {
        let cfg = Config::default();
        let json = serde_json::to_string(&cfg).unwrap();
        let parsed: Config = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.limits.max_var, cfg.limits.max_var);
        assert_eq!(parsed.engine.history_window, cfg.engine.history_window);
    }
}
