//! Market data sources
//!
//! The engine never generates its own market data: everything arrives
//! through a `MarketDataSource`, so tests and demos inject deterministic
//! fixtures and a missing feed surfaces as an error instead of silently
//! falling back to synthetic numbers.

use anyhow::{Context, Result};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::info;

use crate::error::{RiskError, RiskResult};
use crate::{MarketSnapshot, Position, Symbol, SymbolData};

/// Anything that can supply the current book and market snapshot
pub trait MarketDataSource: Send + Sync {
    fn fetch(&self) -> RiskResult<(Vec<Position>, MarketSnapshot)>;
}

/// On-disk fixture format for positions
#[derive(Debug, Serialize, Deserialize)]
struct PositionFixture {
    symbol: String,
    quantity: f64,
    price: f64,
    average_cost: f64,
    sector: String,
}

/// On-disk fixture format for snapshot entries
#[derive(Debug, Serialize, Deserialize)]
struct EntryFixture {
    symbol: String,
    price: f64,
    volume: f64,
    spread: f64,
    volatility: f64,
    liquidity_score: f64,
}

#[derive(Debug, Serialize, Deserialize)]
struct Fixture {
    positions: Vec<PositionFixture>,
    market: Vec<EntryFixture>,
}

/// A fixed data set loaded once from a JSON fixture file.
/// Every `fetch` returns the same book with a fresh timestamp.
pub struct StaticDataSource {
    positions: Vec<Position>,
    entries: Vec<SymbolData>,
}

impl StaticDataSource {
    /// Load positions and market data from a JSON fixture file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let contents = std::fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read fixture {}", path.as_ref().display()))?;
        let fixture: Fixture =
            serde_json::from_str(&contents).context("Failed to parse fixture JSON")?;

        let positions = fixture
            .positions
            .into_iter()
            .map(|p| {
                Position::new(
                    Symbol::new(&p.symbol),
                    p.quantity,
                    p.price,
                    p.average_cost,
                    p.sector,
                )
                .with_context(|| format!("invalid position fixture for {}", p.symbol))
            })
            .collect::<Result<Vec<_>>>()?;

        let entries = fixture
            .market
            .into_iter()
            .map(|e| {
                SymbolData::new(
                    Symbol::new(&e.symbol),
                    e.price,
                    e.volume,
                    e.spread,
                    e.volatility,
                    e.liquidity_score,
                )
                .with_context(|| format!("invalid market fixture for {}", e.symbol))
            })
            .collect::<Result<Vec<_>>>()?;

        info!(
            "Loaded fixture: {} positions, {} market entries",
            positions.len(),
            entries.len()
        );
        Ok(StaticDataSource { positions, entries })
    }

    pub fn new(positions: Vec<Position>, entries: Vec<SymbolData>) -> Self {
        StaticDataSource { positions, entries }
    }
}

impl MarketDataSource for StaticDataSource {
    fn fetch(&self) -> RiskResult<(Vec<Position>, MarketSnapshot)> {
        if self.positions.is_empty() {
            return Err(RiskError::Data {
                symbol: Symbol::new("*"),
                reason: "data source holds no positions".into(),
            });
        }
        let snapshot = MarketSnapshot::new(Utc::now(), self.entries.clone());
        Ok((self.positions.clone(), snapshot))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_source_surfaces_data_error() {
        let source = StaticDataSource::new(Vec::new(), Vec::new());
        assert!(matches!(source.fetch(), Err(RiskError::Data { .. })));
    }

    #[test]
    fn test_fixture_round_trip() {
        let positions = vec![
            Position::new(Symbol::new("AAPL"), 100.0, 180.0, 150.0, "tech").unwrap(),
        ];
        let entries = vec![
            SymbolData::new(Symbol::new("AAPL"), 180.0, 1e6, 0.02, 0.25, 0.9).unwrap(),
        ];
        let source = StaticDataSource::new(positions, entries);
        let (pos, snap) = source.fetch().unwrap();
        assert_eq!(pos.len(), 1);
        assert!(snap.get(&Symbol::new("AAPL")).is_some());
    }

    #[test]
    fn test_from_file_parses_fixture() {
        let json = r#"{
            "positions": [
                {"symbol": "AAPL", "quantity": 100, "price": 180.0,
                 "average_cost": 150.0, "sector": "tech"}
            ],
            "market": [
                {"symbol": "AAPL", "price": 180.0, "volume": 1000000,
                 "spread": 0.02, "volatility": 0.25, "liquidity_score": 0.9}
            ]
        }"#;
        let dir = std::env::temp_dir();
        let path = dir.join("risk_engine_fixture_test.json");
        std::fs::write(&path, json).unwrap();

        let source = StaticDataSource::from_file(&path).unwrap();
        let (pos, snap) = source.fetch().unwrap();
        assert_eq!(pos[0].market_value, 18_000.0);
        assert_eq!(snap.get(&Symbol::new("AAPL")).unwrap().volatility, 0.25);

        std::fs::remove_file(&path).ok();
    }
}
