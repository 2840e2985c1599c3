//! Transaction cost model
//!
//! Estimates the cost components of a proposed trade: half-spread,
//! square-root-law market impact, volatility/participation slippage, a
//! tiered commission schedule, and financing on levered notional. The
//! optimizer compares these totals against expected return before it
//! recommends a rebalance.

use std::collections::HashMap;
use tracing::debug;

use crate::config::CostConfig;
use crate::{CostBreakdown, MarketSnapshot, Symbol, SymbolData};

/// A proposed trade: signed quantity at the snapshot price
#[derive(Debug, Clone)]
pub struct TradeIntent {
    pub quantity: f64,
    pub price: f64,
}

impl TradeIntent {
    pub fn notional(&self) -> f64 {
        self.quantity.abs() * self.price
    }
}

pub struct TransactionCostModel {
    config: CostConfig,
}

impl TransactionCostModel {
    pub fn new(config: CostConfig) -> Self {
        TransactionCostModel { config }
    }

    /// Estimate the full cost breakdown of one trade.
    ///
    /// `leverage` is the portfolio gross leverage assumed while holding the
    /// resulting position; financing is charged only on the levered part.
    pub fn estimate(
        &self,
        trade: &TradeIntent,
        entry: &SymbolData,
        leverage: f64,
        holding_days: f64,
    ) -> CostBreakdown {
        let notional = trade.notional();
        if notional == 0.0 {
            return CostBreakdown::default();
        }

        // Half the quoted spread, paid on the full notional.
        let spread_cost = 0.5 * (entry.spread / entry.price) * notional;

        // Square-root law: convex in relative trade size.
        let adv_notional = (entry.volume * entry.price).max(1.0);
        let participation = notional / adv_notional;
        let market_impact =
            self.config.impact_coefficient * entry.volatility * participation.sqrt() * notional;

        // Slippage grows with volatility and participation rate.
        let slippage_cost =
            self.config.slippage_coefficient * entry.volatility * participation * notional;

        let commission_cost = self.commission(notional);

        // Financing applies to the levered share of notional over the horizon.
        let levered_fraction = (leverage - 1.0).max(0.0);
        let financing_cost =
            levered_fraction * notional * self.config.financing_rate * holding_days / 365.0;

        let total_cost =
            spread_cost + market_impact + slippage_cost + commission_cost + financing_cost;

        debug!(
            "Cost estimate for {}: notional={:.0} total={:.2} (spread={:.2} impact={:.2} slip={:.2} comm={:.2} fin={:.2})",
            entry.symbol, notional, total_cost, spread_cost, market_impact, slippage_cost,
            commission_cost, financing_cost
        );

        CostBreakdown {
            spread_cost,
            market_impact,
            slippage_cost,
            commission_cost,
            financing_cost,
            total_cost,
        }
    }

    /// Price the full trade list implied by moving from `current` to
    /// `target` weights. Leverage is inferred from the target gross
    /// exposure; symbols without market data are skipped.
    pub fn estimate_rebalance(
        &self,
        current: &HashMap<Symbol, f64>,
        target: &HashMap<Symbol, f64>,
        snapshot: &MarketSnapshot,
        portfolio_value: f64,
        holding_days: f64,
    ) -> CostBreakdown {
        let leverage = target.values().sum::<f64>().max(1.0);
        let mut symbols: Vec<&Symbol> = current.keys().chain(target.keys()).collect();
        symbols.sort();
        symbols.dedup();

        let mut total = CostBreakdown::default();
        for sym in symbols {
            let delta = *target.get(sym).unwrap_or(&0.0) - *current.get(sym).unwrap_or(&0.0);
            if delta.abs() < 1e-9 {
                continue;
            }
            if let Some(entry) = snapshot.get(sym) {
                let quantity = delta * portfolio_value / entry.price;
                let costs = self.estimate(
                    &TradeIntent {
                        quantity,
                        price: entry.price,
                    },
                    entry,
                    leverage,
                    holding_days,
                );
                total.accumulate(&costs);
            }
        }
        total
    }

    /// Commission from the tier table: the highest floor at or below the
    /// notional wins, regardless of the order tiers appear in the config.
    fn commission(&self, notional: f64) -> f64 {
        let rate = self
            .config
            .commission_tiers
            .iter()
            .filter(|t| notional >= t.notional_floor)
            .max_by(|a, b| a.notional_floor.total_cmp(&b.notional_floor))
            .map(|t| t.rate)
            .unwrap_or(0.0);
        (notional * rate).max(self.config.min_commission)
    }
}
