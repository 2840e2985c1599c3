//! Portfolio risk metrics
//!
//! Converts positions plus a market snapshot into a fresh RiskMetrics
//! record: VaR (historical, parametric, Monte Carlo), expected shortfall,
//! volatility, Sharpe, drawdown, concentration and correlation risk.
//! Each cycle produces a whole new record; nothing is patched in place.

use itertools::Itertools;
use nalgebra::{Cholesky, DMatrix, DVector};
use rand::rngs::StdRng;
use rand::SeedableRng;
use rand_distr::{Distribution, StandardNormal};
use rayon::prelude::*;
use statrs::distribution::{Continuous, ContinuousCDF, Normal};
use std::collections::{HashMap, VecDeque};
use tracing::{debug, warn};

use crate::config::EngineConfig;
use crate::error::{RiskError, RiskResult};
use crate::{MarketSnapshot, Position, RiskMetrics, Symbol, VarMethod};

const TRADING_DAYS: f64 = 252.0;

/// Daily covariance over the symbols that survived data validation
struct CovarianceEstimate {
    symbols: Vec<Symbol>,
    matrix: DMatrix<f64>,
    /// False when built from snapshot volatilities instead of return history.
    from_history: bool,
}

pub struct RiskMetricsCalculator {
    config: EngineConfig,
    /// Rolling daily returns per symbol, newest last.
    history: HashMap<Symbol, VecDeque<f64>>,
    last_price: HashMap<Symbol, f64>,
    /// Rolling portfolio values, newest last.
    equity: VecDeque<f64>,
}

impl RiskMetricsCalculator {
    pub fn new(config: EngineConfig) -> Self {
        RiskMetricsCalculator {
            config,
            history: HashMap::new(),
            last_price: HashMap::new(),
            equity: VecDeque::new(),
        }
    }

    /// Inject return history for a symbol, e.g. from a warm-start fixture.
    pub fn extend_history(&mut self, symbol: Symbol, returns: &[f64]) {
        let window = self.config.history_window;
        let buf = self.history.entry(symbol).or_default();
        for &r in returns {
            buf.push_back(r);
            if buf.len() > window {
                buf.pop_front();
            }
        }
    }

    /// Full recompute for one ingestion cycle.
    pub fn compute(
        &mut self,
        positions: &[Position],
        snapshot: &MarketSnapshot,
    ) -> RiskResult<RiskMetrics> {
        let portfolio_value: f64 = positions.iter().map(|p| p.market_value).sum();
        // Gross exposure normalizes fraction-of-book figures; net value can
        // legitimately be zero or negative for hedged or short-heavy books.
        let gross_exposure: f64 = positions.iter().map(|p| p.market_value.abs()).sum();
        if !gross_exposure.is_finite() || gross_exposure <= 0.0 {
            return Err(RiskError::InvariantViolation(format!(
                "no gross exposure ({gross_exposure})"
            )));
        }

        self.observe_returns(snapshot);

        // Symbols with a valid snapshot entry participate in the covariance
        // estimate; the rest still count toward concentration.
        let mut included: Vec<&Position> = Vec::new();
        for pos in positions {
            match snapshot.get(&pos.symbol) {
                Some(entry) if entry.validate().is_ok() => included.push(pos),
                Some(entry) => {
                    warn!(
                        "Excluding {} from covariance: invalid snapshot entry ({:?})",
                        pos.symbol,
                        entry.validate().err()
                    );
                }
                None => {
                    warn!("Excluding {} from covariance: no snapshot entry", pos.symbol);
                }
            }
        }

        let exposures: Vec<f64> = included.iter().map(|p| p.market_value).collect();
        let cov = self.estimate_covariance(&included, snapshot);

        // Daily portfolio variance from w' Σ w over included exposures.
        let expo = DVector::from_vec(exposures.clone());
        let daily_variance = (expo.transpose() * &cov.matrix * &expo)[(0, 0)];
        let daily_vol_value = daily_variance.max(0.0).sqrt();
        let volatility = (daily_vol_value / gross_exposure) * TRADING_DAYS.sqrt();

        let (var_95, var_99, conditional_var, var_method) =
            self.value_at_risk(&included, &exposures, &cov, daily_vol_value)?;

        let concentration_risk = herfindahl(positions);
        let correlation_risk = weighted_avg_correlation(&included, &cov);

        // The equity curve only makes sense for positive net value; a
        // hedged or net-short cycle contributes no new point.
        if portfolio_value > 0.0 {
            self.equity.push_back(portfolio_value);
            if self.equity.len() > self.config.history_window {
                self.equity.pop_front();
            }
        }
        let (sharpe_ratio, max_drawdown) = equity_curve_stats(&self.equity);

        let metrics = RiskMetrics {
            var_95,
            var_99,
            conditional_var,
            sharpe_ratio,
            max_drawdown,
            volatility,
            concentration_risk,
            correlation_risk,
            var_method: Some(var_method),
            portfolio_value,
            gross_exposure,
        };
        metrics.validate().map_err(RiskError::InvariantViolation)?;

        debug!(
            "Risk cycle: value={:.0} var95={:.0} var99={:.0} cvar={:.0} vol={:.3} hhi={:.3} ({})",
            portfolio_value, var_95, var_99, conditional_var, volatility, concentration_risk,
            var_method
        );
        Ok(metrics)
    }

    /// Record per-symbol daily returns implied by successive snapshots.
    fn observe_returns(&mut self, snapshot: &MarketSnapshot) {
        let window = self.config.history_window;
        for (symbol, entry) in &snapshot.entries {
            if entry.validate().is_err() {
                continue;
            }
            if let Some(prev) = self.last_price.get(symbol) {
                if *prev > 0.0 && entry.price != *prev {
                    let r = entry.price / prev - 1.0;
                    let buf = self.history.entry(symbol.clone()).or_default();
                    buf.push_back(r);
                    if buf.len() > window {
                        buf.pop_front();
                    }
                }
            }
            self.last_price.insert(symbol.clone(), entry.price);
        }
    }

    /// Daily covariance: sample estimate from rolling returns when both
    /// symbols carry enough history, otherwise diagonal from snapshot
    /// volatilities with zero cross terms.
    fn estimate_covariance(
        &self,
        included: &[&Position],
        snapshot: &MarketSnapshot,
    ) -> CovarianceEstimate {
        let n = included.len();
        let min_rows = self.config.min_history;
        let symbols: Vec<Symbol> = included.iter().map(|p| p.symbol.clone()).collect();

        let with_history: Vec<bool> = symbols
            .iter()
            .map(|s| self.history.get(s).map_or(0, VecDeque::len) >= min_rows)
            .collect();
        let all_history = with_history.iter().all(|&b| b) && n > 0;

        let mut matrix = DMatrix::zeros(n, n);
        for i in 0..n {
            for j in i..n {
                let value = if with_history[i] && with_history[j] {
                    sample_covariance(
                        self.history.get(&symbols[i]).unwrap_or(&VecDeque::new()),
                        self.history.get(&symbols[j]).unwrap_or(&VecDeque::new()),
                    )
                } else if i == j {
                    // Annualized snapshot vol de-annualized to daily variance.
                    let annual = snapshot
                        .get(&symbols[i])
                        .map(|e| e.volatility)
                        .unwrap_or(0.0);
                    (annual * annual) / TRADING_DAYS
                } else {
                    0.0
                };
                matrix[(i, j)] = value;
                matrix[(j, i)] = value;
            }
        }

        CovarianceEstimate {
            symbols,
            matrix,
            from_history: all_history,
        }
    }

    /// Dispatch to the configured VaR estimator, falling back to
    /// parametric when history is too thin for the empirical methods.
    fn value_at_risk(
        &self,
        included: &[&Position],
        exposures: &[f64],
        cov: &CovarianceEstimate,
        daily_vol_value: f64,
    ) -> RiskResult<(f64, f64, f64, VarMethod)> {
        let requested = self.config.var_method;
        let method = match requested {
            VarMethod::Parametric => VarMethod::Parametric,
            VarMethod::Historical | VarMethod::MonteCarlo if cov.from_history => requested,
            other => {
                debug!(
                    "Insufficient return history for {} VaR; falling back to parametric",
                    other
                );
                VarMethod::Parametric
            }
        };

        match method {
            VarMethod::Parametric => {
                let (v95, v99, cvar) = parametric_var(daily_vol_value);
                Ok((v95, v99, cvar, VarMethod::Parametric))
            }
            VarMethod::Historical => {
                let losses = self.historical_losses(included, exposures);
                let (v95, v99, cvar) = empirical_var(losses);
                Ok((v95, v99, cvar, VarMethod::Historical))
            }
            VarMethod::MonteCarlo => {
                let losses = self.monte_carlo_losses(exposures, cov)?;
                let (v95, v99, cvar) = empirical_var(losses);
                Ok((v95, v99, cvar, VarMethod::MonteCarlo))
            }
        }
    }

    /// Portfolio loss distribution replayed over the joint return history.
    fn historical_losses(&self, included: &[&Position], exposures: &[f64]) -> Vec<f64> {
        let rows = included
            .iter()
            .map(|p| self.history.get(&p.symbol).map_or(0, VecDeque::len))
            .min()
            .unwrap_or(0);

        (0..rows)
            .map(|t| {
                let pnl: f64 = included
                    .iter()
                    .zip(exposures)
                    .map(|(pos, mv)| {
                        let buf = &self.history[&pos.symbol];
                        // Align on the newest `rows` observations.
                        let r = buf[buf.len() - rows + t];
                        mv * r
                    })
                    .sum();
                -pnl
            })
            .collect()
    }

    /// Correlated normal draws through the Cholesky factor of the
    /// covariance estimate. Seeded per chunk so the result is reproducible
    /// and the chunks can run on the rayon pool.
    fn monte_carlo_losses(
        &self,
        exposures: &[f64],
        cov: &CovarianceEstimate,
    ) -> RiskResult<Vec<f64>> {
        let n = cov.symbols.len();
        let chol = cholesky_with_jitter(&cov.matrix).ok_or_else(|| {
            RiskError::InvariantViolation("covariance matrix not positive definite".into())
        })?;

        let paths = self.config.monte_carlo_paths;
        let seed = self.config.monte_carlo_seed;
        const CHUNK: usize = 1_000;
        let chunks = paths.div_ceil(CHUNK);

        let losses: Vec<f64> = (0..chunks)
            .into_par_iter()
            .flat_map_iter(|c| {
                let mut rng = StdRng::seed_from_u64(seed.wrapping_add(c as u64));
                let count = CHUNK.min(paths - c * CHUNK);
                let l = chol.l();
                let exposures = exposures.to_vec();
                (0..count)
                    .map(move |_| {
                        let z = DVector::from_fn(n, |_, _| {
                            StandardNormal.sample(&mut rng)
                        });
                        let r = &l * z;
                        let pnl: f64 = exposures.iter().zip(r.iter()).map(|(mv, ri)| mv * ri).sum();
                        -pnl
                    })
                    .collect::<Vec<_>>()
            })
            .collect();

        Ok(losses)
    }
}

/// Parametric VaR and CVaR for a normal P&L with the given daily sigma
/// (in currency). CVaR uses the closed-form normal tail expectation.
fn parametric_var(daily_vol_value: f64) -> (f64, f64, f64) {
    let normal = Normal::new(0.0, 1.0).expect("unit normal");
    let z95 = normal.inverse_cdf(0.95);
    let z99 = normal.inverse_cdf(0.99);
    let var_95 = z95 * daily_vol_value;
    let var_99 = z99 * daily_vol_value;
    // E[L | L > VaR] = sigma * phi(z) / (1 - alpha)
    let cvar = daily_vol_value * normal.pdf(z95) / 0.05;
    (var_95.max(0.0), var_99.max(0.0), cvar.max(var_95.max(0.0)))
}

/// Empirical VaR/CVaR from a loss distribution (positive = loss).
fn empirical_var(mut losses: Vec<f64>) -> (f64, f64, f64) {
    if losses.is_empty() {
        return (0.0, 0.0, 0.0);
    }
    losses.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let n = losses.len();
    let q = |alpha: f64| -> f64 {
        let idx = ((alpha * n as f64).ceil() as usize).clamp(1, n) - 1;
        losses[idx].max(0.0)
    };
    let var_95 = q(0.95);
    let var_99 = q(0.99).max(var_95);

    let tail_start = ((0.95 * n as f64).ceil() as usize).clamp(1, n) - 1;
    let tail = &losses[tail_start..];
    let cvar = (tail.iter().sum::<f64>() / tail.len() as f64).max(var_95);
    (var_95, var_99, cvar)
}

/// Herfindahl index of portfolio weights: 1/N for N equal positions,
/// 1.0 for a single position.
fn herfindahl(positions: &[Position]) -> f64 {
    let gross: f64 = positions.iter().map(|p| p.market_value.abs()).sum();
    if gross <= 0.0 {
        return 0.0;
    }
    positions
        .iter()
        .map(|p| {
            let w = p.market_value.abs() / gross;
            w * w
        })
        .sum::<f64>()
        .min(1.0)
}

/// |weight|-weighted average pairwise correlation.
fn weighted_avg_correlation(included: &[&Position], cov: &CovarianceEstimate) -> f64 {
    let n = included.len();
    if n < 2 {
        return 0.0;
    }
    let gross: f64 = included.iter().map(|p| p.market_value.abs()).sum();
    if gross <= 0.0 {
        return 0.0;
    }
    let weights: Vec<f64> = included
        .iter()
        .map(|p| p.market_value.abs() / gross)
        .collect();

    let mut num = 0.0;
    let mut den = 0.0;
    for (i, j) in (0..n).tuple_combinations() {
        let vi = cov.matrix[(i, i)];
        let vj = cov.matrix[(j, j)];
        if vi <= 0.0 || vj <= 0.0 {
            continue;
        }
        let rho = cov.matrix[(i, j)] / (vi.sqrt() * vj.sqrt());
        let w = weights[i] * weights[j];
        num += w * rho;
        den += w;
    }
    if den > 0.0 {
        num / den
    } else {
        0.0
    }
}

/// Annualized Sharpe and peak-to-trough drawdown over the equity curve.
fn equity_curve_stats(equity: &VecDeque<f64>) -> (f64, f64) {
    if equity.len() < 2 {
        return (0.0, 0.0);
    }

    let values: Vec<f64> = equity.iter().copied().collect();
    let returns: Vec<f64> = values.windows(2).map(|w| w[1] / w[0] - 1.0).collect();
    let mean = returns.iter().sum::<f64>() / returns.len() as f64;
    let variance =
        returns.iter().map(|r| (r - mean).powi(2)).sum::<f64>() / returns.len() as f64;
    let std_dev = variance.sqrt();
    let sharpe = if std_dev > 0.0 {
        mean / std_dev * TRADING_DAYS.sqrt()
    } else {
        0.0
    };

    let mut peak = values[0];
    let mut max_dd: f64 = 0.0;
    for &v in &values {
        if v > peak {
            peak = v;
        }
        if peak > 0.0 {
            max_dd = max_dd.max((peak - v) / peak);
        }
    }
    (sharpe, max_dd)
}

fn sample_covariance(a: &VecDeque<f64>, b: &VecDeque<f64>) -> f64 {
    let n = a.len().min(b.len());
    if n < 2 {
        return 0.0;
    }
    let a: Vec<f64> = a.iter().skip(a.len() - n).copied().collect();
    let b: Vec<f64> = b.iter().skip(b.len() - n).copied().collect();
    let ma = a.iter().sum::<f64>() / n as f64;
    let mb = b.iter().sum::<f64>() / n as f64;
    a.iter()
        .zip(&b)
        .map(|(x, y)| (x - ma) * (y - mb))
        .sum::<f64>()
        / (n - 1) as f64
}

/// Cholesky with escalating diagonal jitter for nearly-singular matrices.
fn cholesky_with_jitter(matrix: &DMatrix<f64>) -> Option<Cholesky<f64, nalgebra::Dyn>> {
    if let Some(c) = Cholesky::new(matrix.clone()) {
        return Some(c);
    }
    let mut jitter = 1e-12;
    for _ in 0..8 {
        let mut m = matrix.clone();
        for i in 0..m.nrows() {
            m[(i, i)] += jitter;
        }
        if let Some(c) = Cholesky::new(m) {
            return Some(c);
        }
        jitter *= 10.0;
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::SymbolData;
    use approx::assert_relative_eq;
    use chrono::Utc;

    fn position(sym: &str, qty: f64, price: f64) -> Position {
        Position::new(Symbol::new(sym), qty, price, price, "tech").unwrap()
    }

    fn snapshot(entries: Vec<(&str, f64, f64)>) -> MarketSnapshot {
        MarketSnapshot::new(
            Utc::now(),
            entries
                .into_iter()
                .map(|(s, price, vol)| {
                    SymbolData::new(Symbol::new(s), price, 1e6, 0.02, vol, 0.9).unwrap()
                })
                .collect(),
        )
    }

    fn calculator(method: VarMethod) -> RiskMetricsCalculator {
        RiskMetricsCalculator::new(EngineConfig {
            var_method: method,
            ..Default::default()
        })
    }

    #[test]
    fn test_concentration_single_position() {
        let positions = vec![position("AAPL", 100.0, 180.0)];
        assert_relative_eq!(herfindahl(&positions), 1.0);
    }

    #[test]
    fn test_concentration_equal_weights() {
        let positions = vec![
            position("A", 100.0, 100.0),
            position("B", 100.0, 100.0),
            position("C", 100.0, 100.0),
            position("D", 100.0, 100.0),
        ];
        assert_relative_eq!(herfindahl(&positions), 0.25, epsilon = 1e-12);
    }

    #[test]
    fn test_parametric_var_ordering() {
        let mut calc = calculator(VarMethod::Parametric);
        let positions = vec![position("AAPL", 100.0, 180.0)];
        let snap = snapshot(vec![("AAPL", 180.0, 0.25)]);
        let m = calc.compute(&positions, &snap).unwrap();

        assert!(m.var_95 > 0.0);
        assert!(m.var_99 >= m.var_95);
        assert!(m.conditional_var >= m.var_95);
        assert_eq!(m.var_method, Some(VarMethod::Parametric));
    }

    #[test]
    fn test_parametric_var_magnitude() {
        let mut calc = calculator(VarMethod::Parametric);
        let positions = vec![position("AAPL", 100.0, 180.0)];
        let snap = snapshot(vec![("AAPL", 180.0, 0.25)]);
        let m = calc.compute(&positions, &snap).unwrap();

        // z95 * (0.25/sqrt(252)) * 18000
        let expected = 1.6448536 * (0.25 / 252.0_f64.sqrt()) * 18_000.0;
        assert_relative_eq!(m.var_95, expected, epsilon = 1.0);
    }

    #[test]
    fn test_net_short_book_still_computes() {
        let mut calc = calculator(VarMethod::Parametric);
        // Long 18k AAPL against short 20.5k MSFT: net value is negative,
        // gross exposure is 38.5k.
        let positions = vec![
            position("AAPL", 100.0, 180.0),
            position("MSFT", -50.0, 410.0),
        ];
        let snap = snapshot(vec![("AAPL", 180.0, 0.25), ("MSFT", 410.0, 0.20)]);
        let m = calc.compute(&positions, &snap).unwrap();

        assert_relative_eq!(m.gross_exposure, 38_500.0, epsilon = 1e-6);
        assert_relative_eq!(m.portfolio_value, -2_500.0, epsilon = 1e-6);
        assert!(m.var_95 >= 0.0);
        assert!(m.volatility.is_finite() && m.volatility >= 0.0);
    }

    #[test]
    fn test_historical_falls_back_without_history() {
        let mut calc = calculator(VarMethod::Historical);
        let positions = vec![position("AAPL", 100.0, 180.0)];
        let snap = snapshot(vec![("AAPL", 180.0, 0.25)]);
        let m = calc.compute(&positions, &snap).unwrap();
        assert_eq!(m.var_method, Some(VarMethod::Parametric));
    }

    #[test]
    fn test_historical_var_with_seeded_history() {
        let mut calc = calculator(VarMethod::Historical);
        let sym = Symbol::new("AAPL");
        // Alternating +/-1% with a few -5% tail days.
        let mut returns: Vec<f64> = (0..100)
            .map(|i| if i % 2 == 0 { 0.01 } else { -0.01 })
            .collect();
        returns[10] = -0.05;
        returns[50] = -0.06;
        returns[90] = -0.07;
        calc.extend_history(sym, &returns);

        let positions = vec![position("AAPL", 100.0, 180.0)];
        let snap = snapshot(vec![("AAPL", 180.0, 0.25)]);
        let m = calc.compute(&positions, &snap).unwrap();

        assert_eq!(m.var_method, Some(VarMethod::Historical));
        assert!(m.var_99 >= m.var_95);
        assert!(m.conditional_var >= m.var_95);
        // The worst tail day is a 7% loss on an 18k book.
        assert!(m.var_99 <= 0.07 * 18_000.0 + 1e-6);
    }

    #[test]
    fn test_monte_carlo_is_reproducible() {
        let positions = vec![position("AAPL", 100.0, 180.0), position("MSFT", 50.0, 410.0)];
        let snap = snapshot(vec![("AAPL", 180.0, 0.25), ("MSFT", 410.0, 0.22)]);
        let returns: Vec<f64> = (0..120).map(|i| 0.012 * ((i % 5) as f64 - 2.0)).collect();

        let run = || {
            let mut calc = calculator(VarMethod::MonteCarlo);
            calc.extend_history(Symbol::new("AAPL"), &returns);
            calc.extend_history(Symbol::new("MSFT"), &returns);
            calc.compute(&positions, &snap).unwrap()
        };
        let a = run();
        let b = run();
        assert_eq!(a.var_method, Some(VarMethod::MonteCarlo));
        assert_eq!(a.var_95, b.var_95);
        assert_eq!(a.var_99, b.var_99);
    }

    #[test]
    fn test_missing_symbol_excluded_but_counted_in_concentration() {
        let mut calc = calculator(VarMethod::Parametric);
        let positions = vec![position("AAPL", 100.0, 180.0), position("GHOST", 10.0, 100.0)];
        // Snapshot only covers AAPL.
        let snap = snapshot(vec![("AAPL", 180.0, 0.25)]);
        let m = calc.compute(&positions, &snap).unwrap();

        // Concentration reflects both positions (not 1.0).
        assert!(m.concentration_risk < 1.0);
        // VaR still computed from the one covered symbol.
        assert!(m.var_95 > 0.0);
    }

    #[test]
    fn test_drawdown_from_equity_curve() {
        let mut eq = VecDeque::new();
        for v in [100_000.0, 110_000.0, 99_000.0, 104_500.0] {
            eq.push_back(v);
        }
        let (_, dd) = equity_curve_stats(&eq);
        assert_relative_eq!(dd, 0.1, epsilon = 1e-12);
    }

    #[test]
    fn test_empty_portfolio_rejected() {
        let mut calc = calculator(VarMethod::Parametric);
        let snap = snapshot(vec![]);
        assert!(matches!(
            calc.compute(&[], &snap),
            Err(RiskError::InvariantViolation(_))
        ));
    }

    #[test]
    fn test_correlated_symbols_raise_correlation_risk() {
        let mut calc = calculator(VarMethod::Parametric);
        let base: Vec<f64> = (0..100).map(|i| 0.01 * ((i % 7) as f64 - 3.0)).collect();
        calc.extend_history(Symbol::new("A"), &base);
        calc.extend_history(Symbol::new("B"), &base);

        let positions = vec![position("A", 100.0, 100.0), position("B", 100.0, 100.0)];
        let snap = snapshot(vec![("A", 100.0, 0.2), ("B", 100.0, 0.2)]);
        let m = calc.compute(&positions, &snap).unwrap();
        assert_relative_eq!(m.correlation_risk, 1.0, epsilon = 1e-9);
    }
}
