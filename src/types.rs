//! Core data types used across the risk engine

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;

/// Validation errors for market snapshot entries
#[derive(Debug, Error)]
pub enum SnapshotValidationError {
    #[error("price ({0}) must be positive and finite")]
    BadPrice(f64),

    #[error("volume ({0}) must be >= 0")]
    NegativeVolume(f64),

    #[error("spread ({0}) must be >= 0")]
    NegativeSpread(f64),

    #[error("volatility ({0}) must be >= 0 and finite")]
    BadVolatility(f64),

    #[error("liquidity score ({0}) must be within [0, 1]")]
    LiquidityOutOfRange(f64),
}

/// Validation errors for positions
#[derive(Debug, Error)]
pub enum PositionValidationError {
    #[error("current price ({0}) must be positive and finite")]
    BadPrice(f64),

    #[error("quantity ({0}) must be finite and non-zero")]
    BadQuantity(f64),

    #[error("average cost ({0}) must be >= 0 and finite")]
    BadAverageCost(f64),
}

/// Instrument symbol using Arc<str> for cheap cloning
///
/// Symbols are cloned on every snapshot entry, alert, and execution step.
/// Arc<str> keeps those clones to a refcount bump instead of a heap copy.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Symbol(#[serde(with = "arc_str_serde")] std::sync::Arc<str>);

/// Custom serde for Arc<str>
mod arc_str_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::sync::Arc;

    pub fn serialize<S>(value: &Arc<str>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(value)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Arc<str>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Ok(Arc::from(s.as_str()))
    }
}

impl Symbol {
    pub fn new(s: impl AsRef<str>) -> Self {
        Symbol(std::sync::Arc::from(s.as_ref()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Symbol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A held position. Mutated only by snapshot ingestion; the optimizer
/// produces a new target weight map and never touches these in place.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    pub symbol: Symbol,
    /// Signed quantity; negative means short.
    pub quantity: f64,
    pub current_price: f64,
    pub market_value: f64,
    /// Fraction of total portfolio value, set during ingestion.
    #[serde(default)]
    pub weight: f64,
    #[serde(default)]
    pub daily_pnl: f64,
    #[serde(default)]
    pub unrealized_pnl: f64,
    pub average_cost: f64,
    #[serde(default)]
    pub risk_contribution: f64,
    /// Sector / asset-class label, used by stress scenarios and
    /// sector-exposure constraints.
    pub sector: String,
}

impl Position {
    /// Create a new position with validation. Market value is derived,
    /// never trusted from the caller.
    pub fn new(
        symbol: Symbol,
        quantity: f64,
        current_price: f64,
        average_cost: f64,
        sector: impl Into<String>,
    ) -> Result<Self, PositionValidationError> {
        if !current_price.is_finite() || current_price <= 0.0 {
            return Err(PositionValidationError::BadPrice(current_price));
        }
        if !quantity.is_finite() || quantity == 0.0 {
            return Err(PositionValidationError::BadQuantity(quantity));
        }
        if !average_cost.is_finite() || average_cost < 0.0 {
            return Err(PositionValidationError::BadAverageCost(average_cost));
        }

        Ok(Position {
            symbol,
            quantity,
            current_price,
            market_value: quantity * current_price,
            weight: 0.0,
            daily_pnl: 0.0,
            unrealized_pnl: quantity * (current_price - average_cost),
            average_cost,
            risk_contribution: 0.0,
            sector: sector.into(),
        })
    }

    /// Refresh the position against a new snapshot entry.
    pub fn apply_snapshot(&mut self, entry: &SymbolData) {
        let prev_price = self.current_price;
        self.current_price = entry.price;
        self.market_value = self.quantity * entry.price;
        self.daily_pnl = self.quantity * (entry.price - prev_price);
        self.unrealized_pnl = self.quantity * (entry.price - self.average_cost);
    }
}

/// Per-symbol market observation within a snapshot
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SymbolData {
    pub symbol: Symbol,
    pub price: f64,
    pub volume: f64,
    /// Absolute bid/ask spread in price units.
    pub spread: f64,
    /// Annualized volatility.
    pub volatility: f64,
    /// 0 = untradeable, 1 = perfectly liquid.
    pub liquidity_score: f64,
}

impl SymbolData {
    pub fn new(
        symbol: Symbol,
        price: f64,
        volume: f64,
        spread: f64,
        volatility: f64,
        liquidity_score: f64,
    ) -> Result<Self, SnapshotValidationError> {
        let entry = SymbolData {
            symbol,
            price,
            volume,
            spread,
            volatility,
            liquidity_score,
        };
        entry.validate()?;
        Ok(entry)
    }

    pub fn validate(&self) -> Result<(), SnapshotValidationError> {
        if !self.price.is_finite() || self.price <= 0.0 {
            return Err(SnapshotValidationError::BadPrice(self.price));
        }
        if self.volume < 0.0 {
            return Err(SnapshotValidationError::NegativeVolume(self.volume));
        }
        if self.spread < 0.0 {
            return Err(SnapshotValidationError::NegativeSpread(self.spread));
        }
        if !self.volatility.is_finite() || self.volatility < 0.0 {
            return Err(SnapshotValidationError::BadVolatility(self.volatility));
        }
        if !(0.0..=1.0).contains(&self.liquidity_score) {
            return Err(SnapshotValidationError::LiquidityOutOfRange(
                self.liquidity_score,
            ));
        }
        Ok(())
    }
}

/// Immutable per-tick view of the market: one entry per symbol
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MarketSnapshot {
    pub as_of: DateTime<Utc>,
    pub entries: HashMap<Symbol, SymbolData>,
}

impl MarketSnapshot {
    pub fn new(as_of: DateTime<Utc>, entries: Vec<SymbolData>) -> Self {
        MarketSnapshot {
            as_of,
            entries: entries.into_iter().map(|e| (e.symbol.clone(), e)).collect(),
        }
    }

    pub fn get(&self, symbol: &Symbol) -> Option<&SymbolData> {
        self.entries.get(symbol)
    }

    /// Drop stale entries for symbols no longer tracked.
    pub fn retain_tracked(&mut self, tracked: &[Symbol]) {
        self.entries.retain(|sym, _| tracked.contains(sym));
    }
}

/// Which estimator produced a VaR figure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum VarMethod {
    Historical,
    Parametric,
    MonteCarlo,
}

impl std::fmt::Display for VarMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            VarMethod::Historical => write!(f, "historical"),
            VarMethod::Parametric => write!(f, "parametric"),
            VarMethod::MonteCarlo => write!(f, "monte_carlo"),
        }
    }
}

/// Portfolio risk metrics, recomputed wholesale each ingestion cycle.
/// VaR and CVaR are positive loss magnitudes in portfolio currency.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RiskMetrics {
    pub var_95: f64,
    pub var_99: f64,
    pub conditional_var: f64,
    pub sharpe_ratio: f64,
    pub max_drawdown: f64,
    /// Annualized portfolio volatility.
    pub volatility: f64,
    /// Herfindahl index of weights, in [0, 1].
    pub concentration_risk: f64,
    /// Weighted-average pairwise correlation among held symbols.
    pub correlation_risk: f64,
    pub var_method: Option<VarMethod>,
    /// Net portfolio value; can be zero or negative for short-heavy books.
    pub portfolio_value: f64,
    /// Sum of absolute position values; the normalizer for
    /// fraction-of-book limits.
    pub gross_exposure: f64,
}

impl RiskMetrics {
    /// Check the structural invariants of a freshly computed record.
    pub fn validate(&self) -> Result<(), String> {
        if self.var_95 < 0.0 || self.var_99 + 1e-9 < self.var_95 {
            return Err(format!(
                "VaR ordering violated: var_99={} var_95={}",
                self.var_99, self.var_95
            ));
        }
        if !(0.0..=1.0 + 1e-9).contains(&self.concentration_risk) {
            return Err(format!(
                "concentration risk {} outside [0, 1]",
                self.concentration_risk
            ));
        }
        if self.max_drawdown < 0.0 {
            return Err(format!("negative max drawdown {}", self.max_drawdown));
        }
        if self.conditional_var + 1e-9 < self.var_95 {
            return Err(format!(
                "CVaR {} below VaR {}",
                self.conditional_var, self.var_95
            ));
        }
        Ok(())
    }
}

/// Alert severity
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

/// Alert category
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AlertType {
    LimitBreach,
    CircuitBreaker,
    Concentration,
    Correlation,
    Volatility,
    DataQuality,
}

/// An emitted alert. Immutable except for the acknowledged flag.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Alert {
    pub id: u64,
    pub alert_type: AlertType,
    pub severity: Severity,
    pub symbol: Option<Symbol>,
    pub message: String,
    pub timestamp: DateTime<Utc>,
    pub acknowledged: bool,
}

/// Circuit breaker categories
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BreakerKind {
    VarBreach,
    DrawdownLimit,
    DailyLossLimit,
}

impl std::fmt::Display for BreakerKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BreakerKind::VarBreach => write!(f, "var_breach"),
            BreakerKind::DrawdownLimit => write!(f, "drawdown_limit"),
            BreakerKind::DailyLossLimit => write!(f, "daily_loss_limit"),
        }
    }
}

/// Circuit breaker state. Triggered latches until an explicit reset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BreakerState {
    Normal,
    Triggered,
}

/// Per-breaker status record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CircuitBreakerStatus {
    pub kind: BreakerKind,
    pub state: BreakerState,
    pub triggered_at: Option<DateTime<Utc>>,
    /// Metric value observed at trigger time.
    pub trigger_value: Option<f64>,
    pub reset_at: Option<DateTime<Utc>>,
}

impl CircuitBreakerStatus {
    pub fn normal(kind: BreakerKind) -> Self {
        CircuitBreakerStatus {
            kind,
            state: BreakerState::Normal,
            triggered_at: None,
            trigger_value: None,
            reset_at: None,
        }
    }
}

/// Verdict on whether a computed rebalance is worth executing net of cost
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Recommendation {
    Execute,
    Partial,
    Hold,
}

/// Execution urgency tier
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Urgency {
    Low,
    Medium,
    High,
}

/// One step of the optimal execution plan
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionStep {
    pub symbol: Symbol,
    /// Signed quantity to trade.
    pub quantity: f64,
    pub urgency: Urgency,
    pub time_horizon_minutes: u64,
}

/// Per-trade cost components, all in portfolio currency
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct CostBreakdown {
    pub spread_cost: f64,
    pub market_impact: f64,
    pub slippage_cost: f64,
    pub commission_cost: f64,
    pub financing_cost: f64,
    pub total_cost: f64,
}

impl CostBreakdown {
    pub fn accumulate(&mut self, other: &CostBreakdown) {
        self.spread_cost += other.spread_cost;
        self.market_impact += other.market_impact;
        self.slippage_cost += other.slippage_cost;
        self.commission_cost += other.commission_cost;
        self.financing_cost += other.financing_cost;
        self.total_cost += other.total_cost;
    }
}

/// Result of a portfolio optimization run. Immutable snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OptimizationResult {
    pub weights: HashMap<Symbol, f64>,
    pub expected_return: f64,
    /// Annualized portfolio volatility at the target weights.
    pub expected_risk: f64,
    pub sharpe_ratio: f64,
    /// Half the sum of absolute weight changes, in [0, 2].
    pub turnover: f64,
    pub costs: CostBreakdown,
    pub recommendation: Recommendation,
    pub execution_plan: Vec<ExecutionStep>,
    /// Constraints the unconstrained optimum would have violated.
    pub violations: Vec<String>,
    /// Candidates excluded for missing market data. A data hole, not a
    /// constraint conflict; it never forces the recommendation to Hold.
    pub data_gaps: Vec<Symbol>,
    /// Max time horizon across steps (parallel execution assumption).
    pub estimated_execution_minutes: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_symbol_data_validation() {
        let sym = Symbol::new("AAPL");
        assert!(SymbolData::new(sym.clone(), 180.0, 1e6, 0.02, 0.25, 0.9).is_ok());
        assert!(SymbolData::new(sym.clone(), -1.0, 1e6, 0.02, 0.25, 0.9).is_err());
        assert!(SymbolData::new(sym.clone(), 180.0, 1e6, 0.02, 0.25, 1.5).is_err());
        assert!(SymbolData::new(sym, 180.0, -5.0, 0.02, 0.25, 0.9).is_err());
    }

    #[test]
    fn test_position_derives_market_value() {
        let pos = Position::new(Symbol::new("AAPL"), 100.0, 180.0, 150.0, "tech").unwrap();
        assert_eq!(pos.market_value, 18_000.0);
        assert_eq!(pos.unrealized_pnl, 3_000.0);
    }

    #[test]
    fn test_position_rejects_zero_quantity() {
        assert!(Position::new(Symbol::new("AAPL"), 0.0, 180.0, 150.0, "tech").is_err());
    }

    #[test]
    fn test_snapshot_retain_tracked() {
        let aapl = Symbol::new("AAPL");
        let msft = Symbol::new("MSFT");
        let entries = vec![
            SymbolData::new(aapl.clone(), 180.0, 1e6, 0.02, 0.25, 0.9).unwrap(),
            SymbolData::new(msft.clone(), 410.0, 8e5, 0.03, 0.22, 0.9).unwrap(),
        ];
        let mut snap = MarketSnapshot::new(Utc::now(), entries);
        snap.retain_tracked(&[aapl.clone()]);
        assert!(snap.get(&aapl).is_some());
        assert!(snap.get(&msft).is_none());
    }

    #[test]
    fn test_risk_metrics_invariants() {
        let mut m = RiskMetrics {
            var_95: 100.0,
            var_99: 150.0,
            conditional_var: 160.0,
            concentration_risk: 0.4,
            ..Default::default()
        };
        assert!(m.validate().is_ok());

        m.var_99 = 50.0;
        assert!(m.validate().is_err());
    }
}
