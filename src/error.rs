//! Engine error taxonomy
//!
//! Every failure mode a caller can observe maps to one variant here.
//! Metric/alert read paths never return these; they serve the last
//! known-good snapshot with a staleness flag instead.

use thiserror::Error;

use crate::Symbol;

#[derive(Debug, Error)]
pub enum RiskError {
    /// Missing or invalid market data for one symbol. Recovered locally
    /// by excluding the symbol; the cycle continues.
    #[error("market data error for {symbol}: {reason}")]
    Data { symbol: Symbol, reason: String },

    /// Unknown alert id on acknowledge.
    #[error("alert {0} not found")]
    NotFound(u64),

    /// A stress test or optimization exceeded its time budget.
    #[error("{what} exceeded its {budget_ms}ms budget")]
    Timeout { what: &'static str, budget_ms: u64 },

    /// A computed record failed its structural invariants. Fatal for
    /// the cycle; the previously published snapshot stays live.
    #[error("invariant violation: {0}")]
    InvariantViolation(String),
}

pub type RiskResult<T> = Result<T, RiskError>;
