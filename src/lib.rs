//! Portfolio Risk Engine
//!
//! A real-time risk management system for trading portfolios, featuring
//! VaR/CVaR estimation, scenario stress testing, transaction cost modeling,
//! cost-aware portfolio optimization, and latching circuit breakers.

pub mod alerts;
pub mod breaker;
pub mod config;
pub mod costs;
pub mod data;
pub mod error;
pub mod manager;
pub mod metrics;
pub mod optimizer;
pub mod stress;
pub mod types;

pub use config::Config;
pub use error::{RiskError, RiskResult};
pub use manager::{RiskManager, RiskReport};
pub use types::*;
