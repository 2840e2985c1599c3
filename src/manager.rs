//! Risk manager coordinator
//!
//! Owns the calculator, circuit breakers, and alert store, and exposes the
//! API the transport layer consumes. Risk recomputes run under a single
//! writer lock; readers get the published snapshot through an atomic
//! pointer swap and never block on a cycle in progress. Stress tests and
//! optimization are CPU-bound, so they run on the blocking pool with a
//! timeout instead of stalling the ingestion cadence.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;
use tracing::{info, warn};

use crate::alerts::AlertManager;
use crate::breaker::CircuitBreakerController;
use crate::config::Config;
use crate::costs::TransactionCostModel;
use crate::error::{RiskError, RiskResult};
use crate::metrics::RiskMetricsCalculator;
use crate::optimizer::PortfolioOptimizer;
use crate::stress::{ScenarioResult, StressTestEngine};
use crate::{
    Alert, AlertType, BreakerKind, CircuitBreakerStatus, MarketSnapshot, OptimizationResult,
    Position, Recommendation, RiskMetrics, Severity, Symbol,
};

/// Published view of the latest risk computation. `stale` is set when a
/// later cycle failed and this snapshot is older than the caller expects.
#[derive(Debug, Clone)]
pub struct RiskReport {
    pub metrics: Arc<RiskMetrics>,
    pub computed_at: DateTime<Utc>,
    pub stale: bool,
}

/// Single-writer internals: everything a recompute cycle touches.
struct EngineState {
    calculator: RiskMetricsCalculator,
    breakers: CircuitBreakerController,
    alerts: AlertManager,
    last_snapshot: Option<Arc<MarketSnapshot>>,
    sectors: HashMap<Symbol, String>,
}

pub struct RiskManager {
    config: Config,
    state: Mutex<EngineState>,
    published: RwLock<RiskReport>,
}

impl RiskManager {
    pub fn new(config: Config) -> Self {
        let state = EngineState {
            calculator: RiskMetricsCalculator::new(config.engine.clone()),
            breakers: CircuitBreakerController::new(config.limits.clone()),
            alerts: AlertManager::new(config.alerts.clone()),
            last_snapshot: None,
            sectors: HashMap::new(),
        };
        let published = RiskReport {
            metrics: Arc::new(RiskMetrics::default()),
            computed_at: Utc::now(),
            stale: true,
        };
        RiskManager {
            config,
            state: Mutex::new(state),
            published: RwLock::new(published),
        }
    }

    /// Run one ingestion cycle: refresh positions against the snapshot,
    /// recompute metrics, evaluate breakers, and emit alerts. Breaker
    /// transitions and their alerts happen under one lock, so a reader
    /// never observes a tripped breaker without its alert.
    pub fn update_risk_metrics(
        &self,
        mut positions: Vec<Position>,
        mut snapshot: MarketSnapshot,
    ) -> RiskResult<Arc<RiskMetrics>> {
        let tracked: Vec<Symbol> = positions.iter().map(|p| p.symbol.clone()).collect();
        snapshot.retain_tracked(&tracked);

        for pos in positions.iter_mut() {
            if let Some(entry) = snapshot.get(&pos.symbol) {
                pos.apply_snapshot(entry);
            }
        }
        // Weights are signed fractions of gross exposure, so a short-heavy
        // or hedged book still normalizes sensibly.
        let gross: f64 = positions.iter().map(|p| p.market_value.abs()).sum();
        if gross > 0.0 {
            for pos in positions.iter_mut() {
                pos.weight = pos.market_value / gross;
            }
        }
        // Each position's share of |weight|-times-volatility risk.
        let total_risk: f64 = positions
            .iter()
            .map(|p| {
                let vol = snapshot.get(&p.symbol).map(|e| e.volatility).unwrap_or(0.0);
                p.weight.abs() * vol
            })
            .sum();
        if total_risk > 0.0 {
            for pos in positions.iter_mut() {
                let vol = snapshot.get(&pos.symbol).map(|e| e.volatility).unwrap_or(0.0);
                pos.risk_contribution = pos.weight.abs() * vol / total_risk;
            }
        }
        let daily_pnl: f64 = positions.iter().map(|p| p.daily_pnl).sum();
        let daily_loss_frac = if gross > 0.0 {
            (-daily_pnl / gross).max(0.0)
        } else {
            0.0
        };

        let mut state = self.state.lock().expect("engine state lock poisoned");

        let metrics = match state.calculator.compute(&positions, &snapshot) {
            Ok(m) => m,
            Err(e) => {
                // Previous snapshot stays live but is flagged stale.
                warn!("Risk cycle failed, keeping previous snapshot: {e}");
                self.published
                    .write()
                    .expect("published lock poisoned")
                    .stale = true;
                return Err(e);
            }
        };

        self.emit_limit_alerts(&mut state, &positions, &snapshot, &metrics);

        let trips = state.breakers.evaluate(&metrics, daily_loss_frac);
        for trip in &trips {
            state.alerts.create(
                AlertType::CircuitBreaker,
                Severity::Critical,
                None,
                format!(
                    "circuit breaker {} triggered: {:.4} > limit {:.4}",
                    trip.kind, trip.observed, trip.limit
                ),
            );
        }

        state.sectors = positions
            .iter()
            .map(|p| (p.symbol.clone(), p.sector.clone()))
            .collect();
        state.last_snapshot = Some(Arc::new(snapshot));
        drop(state);

        let metrics = Arc::new(metrics);
        // Atomic publish: build off to the side, swap under a short write.
        *self.published.write().expect("published lock poisoned") = RiskReport {
            metrics: Arc::clone(&metrics),
            computed_at: Utc::now(),
            stale: false,
        };

        info!(
            "Risk metrics published: var95={:.0} vol={:.3} breaker_trips={}",
            metrics.var_95,
            metrics.volatility,
            trips.len()
        );
        Ok(metrics)
    }

    /// Limit-breach style alerts from the freshly computed metrics.
    fn emit_limit_alerts(
        &self,
        state: &mut EngineState,
        positions: &[Position],
        snapshot: &MarketSnapshot,
        metrics: &RiskMetrics,
    ) {
        let limits = &self.config.limits;

        for pos in positions {
            if snapshot.get(&pos.symbol).is_none() {
                state.alerts.create(
                    AlertType::DataQuality,
                    Severity::Medium,
                    Some(pos.symbol.clone()),
                    format!("no market data for held position {}", pos.symbol),
                );
            }
        }

        let var_frac = if metrics.gross_exposure > 0.0 {
            metrics.var_95 / metrics.gross_exposure
        } else {
            0.0
        };
        if var_frac > limits.max_var {
            state.alerts.create(
                AlertType::LimitBreach,
                Severity::High,
                None,
                format!(
                    "95% VaR {:.2}% of portfolio exceeds limit {:.2}%",
                    var_frac * 100.0,
                    limits.max_var * 100.0
                ),
            );
        }

        if metrics.volatility > limits.volatility_threshold {
            state.alerts.create(
                AlertType::Volatility,
                Severity::Medium,
                None,
                format!(
                    "portfolio volatility {:.1}% above threshold {:.1}%",
                    metrics.volatility * 100.0,
                    limits.volatility_threshold * 100.0
                ),
            );
        }

        if metrics.correlation_risk > limits.correlation_threshold {
            state.alerts.create(
                AlertType::Correlation,
                Severity::Medium,
                None,
                format!(
                    "average pairwise correlation {:.2} erodes diversification",
                    metrics.correlation_risk
                ),
            );
        }

        for pos in positions {
            if pos.weight.abs() > limits.max_position_size {
                state.alerts.create(
                    AlertType::Concentration,
                    Severity::High,
                    Some(pos.symbol.clone()),
                    format!(
                        "{} weight {:.1}% exceeds position cap {:.1}%",
                        pos.symbol,
                        pos.weight * 100.0,
                        limits.max_position_size * 100.0
                    ),
                );
            }
        }

        let mut sector_weights: HashMap<&str, f64> = HashMap::new();
        for pos in positions {
            *sector_weights.entry(pos.sector.as_str()).or_default() += pos.weight.abs();
        }
        for (sector, weight) in sector_weights {
            if weight > limits.max_sector_exposure {
                state.alerts.create(
                    AlertType::Concentration,
                    Severity::Medium,
                    None,
                    format!(
                        "sector {} exposure {:.1}% exceeds cap {:.1}%",
                        sector,
                        weight * 100.0,
                        limits.max_sector_exposure * 100.0
                    ),
                );
            }
        }
    }

    /// Latest published metrics. Never fails: a failed cycle leaves the
    /// previous snapshot in place with the stale flag raised.
    pub fn current_risk_metrics(&self) -> RiskReport {
        self.published
            .read()
            .expect("published lock poisoned")
            .clone()
    }

    pub fn active_alerts(&self) -> Vec<Alert> {
        self.state
            .lock()
            .expect("engine state lock poisoned")
            .alerts
            .active()
    }

    pub fn acknowledge_alert(&self, id: u64) -> RiskResult<()> {
        self.state
            .lock()
            .expect("engine state lock poisoned")
            .alerts
            .acknowledge(id)
    }

    pub fn circuit_breaker_status(&self) -> HashMap<BreakerKind, CircuitBreakerStatus> {
        self.state
            .lock()
            .expect("engine state lock poisoned")
            .breakers
            .status()
    }

    /// Explicitly reset all breakers. The only way back to normal trading.
    pub fn reset_circuit_breakers(&self) {
        self.state
            .lock()
            .expect("engine state lock poisoned")
            .breakers
            .reset_all();
    }

    /// Run the full scenario catalog on the blocking pool, bounded by the
    /// configured budget. Uses the snapshot from the latest ingestion cycle.
    pub async fn run_stress_tests(
        &self,
        positions: Vec<Position>,
    ) -> RiskResult<Vec<ScenarioResult>> {
        let snapshot = {
            let state = self.state.lock().expect("engine state lock poisoned");
            state.last_snapshot.clone()
        }
        .ok_or_else(|| RiskError::Data {
            symbol: Symbol::new("*"),
            reason: "no market snapshot ingested yet".into(),
        })?;

        let limits = self.config.limits.clone();
        let costs = self.config.costs.clone();
        let budget_ms = self.config.engine.stress_timeout_ms;

        let task = tokio::task::spawn_blocking(move || {
            StressTestEngine::new(limits, costs).run_all(&positions, &snapshot)
        });
        match tokio::time::timeout(Duration::from_millis(budget_ms), task).await {
            Ok(Ok(results)) => Ok(results),
            Ok(Err(join_err)) => Err(RiskError::InvariantViolation(format!(
                "stress task panicked: {join_err}"
            ))),
            Err(_) => Err(RiskError::Timeout {
                what: "stress tests",
                budget_ms,
            }),
        }
    }

    /// Run the optimizer on the blocking pool, bounded by the configured
    /// budget. While any circuit breaker is triggered the Execute verdict
    /// is suppressed; the advisory result is still returned. This is the
    /// single gating authority for optimizer-driven execution.
    pub async fn optimize(
        &self,
        expected_returns: HashMap<Symbol, f64>,
        current_portfolio: HashMap<Symbol, f64>,
        snapshot: MarketSnapshot,
        risk_aversion: f64,
    ) -> RiskResult<OptimizationResult> {
        let sectors = {
            let state = self.state.lock().expect("engine state lock poisoned");
            state.sectors.clone()
        };
        let portfolio_value = {
            let report = self.current_risk_metrics();
            if report.metrics.gross_exposure > 0.0 {
                report.metrics.gross_exposure
            } else {
                warn!("Optimizing before any risk cycle; cost estimates use unit notional");
                1.0
            }
        };

        let limits = self.config.limits.clone();
        let opt_config = self.config.optimizer.clone();
        let cost_config = self.config.costs.clone();
        let budget_ms = self.config.engine.optimize_timeout_ms;

        let task = tokio::task::spawn_blocking(move || {
            let optimizer = PortfolioOptimizer::new(
                limits,
                opt_config,
                TransactionCostModel::new(cost_config),
            );
            optimizer.optimize(
                &expected_returns,
                &current_portfolio,
                &snapshot,
                risk_aversion,
                &sectors,
                portfolio_value,
            )
        });

        let mut result = match tokio::time::timeout(Duration::from_millis(budget_ms), task).await {
            Ok(Ok(result)) => result,
            Ok(Err(join_err)) => {
                return Err(RiskError::InvariantViolation(format!(
                    "optimization task panicked: {join_err}"
                )))
            }
            Err(_) => {
                return Err(RiskError::Timeout {
                    what: "optimization",
                    budget_ms,
                })
            }
        };

        // Gate against breaker state as of completion, not submission.
        let halted = {
            let mut state = self.state.lock().expect("engine state lock poisoned");
            for sym in &result.data_gaps {
                state.alerts.create(
                    AlertType::DataQuality,
                    Severity::Medium,
                    Some(sym.clone()),
                    format!("no market data for optimizer candidate {sym}"),
                );
            }
            state.breakers.any_triggered()
        };
        if halted && result.recommendation == Recommendation::Execute {
            warn!("Circuit breaker active: suppressing Execute recommendation");
            result.recommendation = Recommendation::Hold;
            result
                .violations
                .push("circuit breaker triggered: execution halted".into());
        }
        Ok(result)
    }
}
