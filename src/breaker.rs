//! Circuit breaker state machines
//!
//! One latching breaker per limit class. Transition to Triggered is
//! automatic on a qualifying metrics update; transition back to Normal
//! happens only through an explicit reset, never by the metric recovering.

use chrono::Utc;
use std::collections::HashMap;
use tracing::{info, warn};

use crate::config::RiskLimitsConfig;
use crate::{BreakerKind, BreakerState, CircuitBreakerStatus, RiskMetrics};

/// A breaker transition produced by an evaluation pass
#[derive(Debug, Clone)]
pub struct BreakerTrip {
    pub kind: BreakerKind,
    pub observed: f64,
    pub limit: f64,
}

pub struct CircuitBreakerController {
    limits: RiskLimitsConfig,
    breakers: HashMap<BreakerKind, CircuitBreakerStatus>,
}

impl CircuitBreakerController {
    pub fn new(limits: RiskLimitsConfig) -> Self {
        let breakers = [
            BreakerKind::VarBreach,
            BreakerKind::DrawdownLimit,
            BreakerKind::DailyLossLimit,
        ]
        .into_iter()
        .map(|k| (k, CircuitBreakerStatus::normal(k)))
        .collect();

        CircuitBreakerController { limits, breakers }
    }

    /// Evaluate fresh metrics against configured limits. Returns the
    /// breakers that newly tripped on this pass; already-triggered
    /// breakers stay triggered and are not re-reported.
    pub fn evaluate(&mut self, metrics: &RiskMetrics, daily_loss_frac: f64) -> Vec<BreakerTrip> {
        if !self.limits.enable_circuit_breakers {
            return Vec::new();
        }

        let var_frac = if metrics.gross_exposure > 0.0 {
            metrics.var_95 / metrics.gross_exposure
        } else {
            0.0
        };

        let checks = [
            (BreakerKind::VarBreach, var_frac, self.limits.max_var),
            (
                BreakerKind::DrawdownLimit,
                metrics.max_drawdown,
                self.limits.max_drawdown,
            ),
            (
                BreakerKind::DailyLossLimit,
                daily_loss_frac,
                self.limits.max_daily_loss,
            ),
        ];

        let mut trips = Vec::new();
        for (kind, observed, limit) in checks {
            if observed <= limit {
                continue;
            }
            let status = self
                .breakers
                .get_mut(&kind)
                .expect("all breaker kinds initialized in new()");
            if status.state == BreakerState::Triggered {
                continue;
            }
            status.state = BreakerState::Triggered;
            status.triggered_at = Some(Utc::now());
            status.trigger_value = Some(observed);
            warn!(
                "Circuit breaker {} TRIGGERED: observed {:.4} > limit {:.4}",
                kind, observed, limit
            );
            trips.push(BreakerTrip {
                kind,
                observed,
                limit,
            });
        }
        trips
    }

    /// True while any breaker is triggered; gates trade execution.
    pub fn any_triggered(&self) -> bool {
        self.breakers
            .values()
            .any(|s| s.state == BreakerState::Triggered)
    }

    /// Reset one breaker to Normal, leaving the others latched.
    pub fn reset(&mut self, kind: BreakerKind) {
        if let Some(status) = self.breakers.get_mut(&kind) {
            if status.state == BreakerState::Triggered {
                info!("Circuit breaker {} reset to normal", kind);
                status.state = BreakerState::Normal;
                status.reset_at = Some(Utc::now());
                status.trigger_value = None;
            }
        }
    }

    /// Reset every breaker to Normal. The only path out of Triggered.
    pub fn reset_all(&mut self) {
        let now = Utc::now();
        for status in self.breakers.values_mut() {
            if status.state == BreakerState::Triggered {
                info!("Circuit breaker {} reset to normal", status.kind);
                status.state = BreakerState::Normal;
                status.reset_at = Some(now);
                status.trigger_value = None;
            }
        }
    }

    pub fn status(&self) -> HashMap<BreakerKind, CircuitBreakerStatus> {
        self.breakers.clone()
    }
}
