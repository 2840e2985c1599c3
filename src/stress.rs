//! Scenario stress testing
//!
//! Applies a fixed catalog of named shocks to the current position set and
//! reports the portfolio-level impact. Scenarios are deterministic: the
//! same positions and catalog always produce bit-identical results.

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::info;

use crate::config::{CostConfig, RiskLimitsConfig};
use crate::costs::{TradeIntent, TransactionCostModel};
use crate::{MarketSnapshot, Position, Symbol};

/// Named scenarios in the catalog
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Scenario {
    MarketCrash,
    InterestRateShock,
    SectorRotation,
    LiquidityCrisis,
}

impl Scenario {
    pub const ALL: [Scenario; 4] = [
        Scenario::MarketCrash,
        Scenario::InterestRateShock,
        Scenario::SectorRotation,
        Scenario::LiquidityCrisis,
    ];
}

impl std::fmt::Display for Scenario {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Scenario::MarketCrash => write!(f, "MARKET_CRASH"),
            Scenario::InterestRateShock => write!(f, "INTEREST_RATE_SHOCK"),
            Scenario::SectorRotation => write!(f, "SECTOR_ROTATION"),
            Scenario::LiquidityCrisis => write!(f, "LIQUIDITY_CRISIS"),
        }
    }
}

/// Per-scenario shock definition: fractional price moves per sector, a
/// default for unlisted sectors, and for the liquidity scenario a spread
/// widening multiplier applied through the cost model instead of prices.
#[derive(Debug, Clone)]
struct ShockTable {
    sector_shocks: HashMap<&'static str, f64>,
    default_shock: f64,
    spread_multiplier: f64,
}

fn shock_table(scenario: Scenario) -> ShockTable {
    match scenario {
        Scenario::MarketCrash => ShockTable {
            sector_shocks: HashMap::from([
                ("tech", -0.25),
                ("financials", -0.22),
                ("energy", -0.18),
                ("utilities", -0.10),
                ("crypto", -0.40),
            ]),
            default_shock: -0.20,
            spread_multiplier: 1.0,
        },
        Scenario::InterestRateShock => ShockTable {
            sector_shocks: HashMap::from([
                ("tech", -0.12),
                ("financials", 0.03),
                ("utilities", -0.09),
                ("real_estate", -0.15),
            ]),
            default_shock: -0.05,
            spread_multiplier: 1.0,
        },
        Scenario::SectorRotation => ShockTable {
            sector_shocks: HashMap::from([
                ("tech", -0.15),
                ("energy", 0.10),
                ("financials", 0.05),
                ("utilities", 0.04),
            ]),
            default_shock: -0.02,
            spread_multiplier: 1.0,
        },
        // Prices barely move; the damage is the cost of getting out
        // through a market whose spreads have blown out.
        Scenario::LiquidityCrisis => ShockTable {
            sector_shocks: HashMap::new(),
            default_shock: -0.03,
            spread_multiplier: 8.0,
        },
    }
}

/// Result of running one scenario
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScenarioResult {
    pub scenario: Scenario,
    pub portfolio_change_percent: f64,
    /// Symbol with the largest single-position loss, with that loss.
    pub worst_asset: Option<(Symbol, f64)>,
    /// Configured limits exceeded under the shocked portfolio.
    pub breached_limits: Vec<String>,
}

pub struct StressTestEngine {
    limits: RiskLimitsConfig,
    cost_model: TransactionCostModel,
}

impl StressTestEngine {
    pub fn new(limits: RiskLimitsConfig, costs: CostConfig) -> Self {
        StressTestEngine {
            limits,
            cost_model: TransactionCostModel::new(costs),
        }
    }

    /// Run the whole catalog. Scenarios are independent, so they run on
    /// the rayon pool.
    pub fn run_all(&self, positions: &[Position], snapshot: &MarketSnapshot) -> Vec<ScenarioResult> {
        let mut results: Vec<ScenarioResult> = Scenario::ALL
            .par_iter()
            .map(|&s| self.run_scenario(s, positions, snapshot))
            .collect();
        // par_iter preserves order, but be explicit for stable output.
        results.sort_by_key(|r| Scenario::ALL.iter().position(|s| *s == r.scenario));
        for r in &results {
            info!(
                "Stress {}: {:+.2}% (breaches: {})",
                r.scenario,
                r.portfolio_change_percent,
                r.breached_limits.len()
            );
        }
        results
    }

    pub fn run_scenario(
        &self,
        scenario: Scenario,
        positions: &[Position],
        snapshot: &MarketSnapshot,
    ) -> ScenarioResult {
        let table = shock_table(scenario);
        let pre_total: f64 = positions.iter().map(|p| p.market_value).sum();

        let mut post_total = 0.0;
        let mut liquidation_penalty = 0.0;
        let mut worst_asset: Option<(Symbol, f64)> = None;

        for pos in positions {
            let shock = *table
                .sector_shocks
                .get(pos.sector.as_str())
                .unwrap_or(&table.default_shock);
            let shocked_price = pos.current_price * (1.0 + shock);
            let shocked_value = pos.quantity * shocked_price;
            post_total += shocked_value;

            let mut loss = pos.market_value - shocked_value;

            if table.spread_multiplier > 1.0 {
                if let Some(entry) = snapshot.get(&pos.symbol) {
                    let mut widened = entry.clone();
                    widened.spread *= table.spread_multiplier;
                    let exit_cost = self
                        .cost_model
                        .estimate(
                            &TradeIntent {
                                quantity: -pos.quantity,
                                price: shocked_price.max(f64::MIN_POSITIVE),
                            },
                            &widened,
                            1.0,
                            0.0,
                        )
                        .total_cost;
                    liquidation_penalty += exit_cost;
                    loss += exit_cost;
                }
            }

            match &worst_asset {
                Some((_, worst)) if loss <= *worst => {}
                _ => worst_asset = Some((pos.symbol.clone(), loss)),
            }
        }

        let change = post_total - pre_total - liquidation_penalty;
        let portfolio_change_percent = if pre_total.abs() > 0.0 {
            change / pre_total * 100.0
        } else {
            0.0
        };

        let breached_limits = self.breaches(pre_total, change);

        ScenarioResult {
            scenario,
            portfolio_change_percent,
            worst_asset,
            breached_limits,
        }
    }

    /// Evaluate configured limits against the post-shock state.
    fn breaches(&self, pre_total: f64, change: f64) -> Vec<String> {
        let mut breached = Vec::new();
        if pre_total <= 0.0 || change >= 0.0 {
            return breached;
        }
        let loss_frac = -change / pre_total;
        if loss_frac > self.limits.max_drawdown {
            breached.push(format!(
                "max_drawdown: shocked loss {:.2}% exceeds {:.2}%",
                loss_frac * 100.0,
                self.limits.max_drawdown * 100.0
            ));
        }
        if loss_frac > self.limits.max_daily_loss {
            breached.push(format!(
                "max_daily_loss: shocked loss {:.2}% exceeds {:.2}%",
                loss_frac * 100.0,
                self.limits.max_daily_loss * 100.0
            ));
        }
        if loss_frac > self.limits.max_var {
            breached.push(format!(
                "max_var: shocked loss {:.2}% exceeds {:.2}%",
                loss_frac * 100.0,
                self.limits.max_var * 100.0
            ));
        }
        breached
    }
}
