//! Historical market data providers
//!
//! Every provider returns bars sorted ascending by timestamp. Gaps and
//! duplicate timestamps are passed through untouched; the simulation is
//! index-driven.

pub mod csv;
pub mod synthetic;

use std::collections::HashMap;
use std::str::FromStr;

use async_trait::async_trait;
use chrono::Duration;
use serde::{Deserialize, Serialize};

use crate::error::DataError;
use crate::types::Bar;

pub use self::csv::CsvDataProvider;
pub use self::synthetic::SyntheticDataProvider;

/// Source of historical OHLCV bars
#[async_trait]
pub trait DataProvider: Send + Sync {
    fn name(&self) -> &str;

    async fn historical_bars(&self, symbol: &str, timeframe: Timeframe)
        -> Result<Vec<Bar>, DataError>;
}

/// Bar spacing
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Timeframe {
    #[default]
    #[serde(rename = "1m")]
    M1,
    #[serde(rename = "5m")]
    M5,
    #[serde(rename = "15m")]
    M15,
    #[serde(rename = "30m")]
    M30,
    #[serde(rename = "1h")]
    H1,
    #[serde(rename = "4h")]
    H4,
    #[serde(rename = "1d")]
    D1,
}

impl Timeframe {
    pub fn duration(&self) -> Duration {
        match self {
            Timeframe::M1 => Duration::minutes(1),
            Timeframe::M5 => Duration::minutes(5),
            Timeframe::M15 => Duration::minutes(15),
            Timeframe::M30 => Duration::minutes(30),
            Timeframe::H1 => Duration::hours(1),
            Timeframe::H4 => Duration::hours(4),
            Timeframe::D1 => Duration::days(1),
        }
    }

    /// Number of bars covering `days` calendar days
    pub fn bars_per_days(&self, days: u32) -> usize {
        (Duration::days(days as i64).num_seconds() / self.duration().num_seconds()) as usize
    }
}

impl std::fmt::Display for Timeframe {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            Timeframe::M1 => "1m",
            Timeframe::M5 => "5m",
            Timeframe::M15 => "15m",
            Timeframe::M30 => "30m",
            Timeframe::H1 => "1h",
            Timeframe::H4 => "4h",
            Timeframe::D1 => "1d",
        };
        write!(f, "{}", label)
    }
}

impl FromStr for Timeframe {
    type Err = DataError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "1m" | "1min" => Ok(Timeframe::M1),
            "5m" | "5min" => Ok(Timeframe::M5),
            "15m" | "15min" => Ok(Timeframe::M15),
            "30m" | "30min" => Ok(Timeframe::M30),
            "1h" | "60m" => Ok(Timeframe::H1),
            "4h" => Ok(Timeframe::H4),
            "1d" | "d" | "daily" => Ok(Timeframe::D1),
            _ => Err(DataError::Timeframe(s.to_string())),
        }
    }
}

/// Canonical symbol for the short aliases users type
pub fn normalize_symbol(symbol: &str) -> String {
    let upper = symbol.trim().to_uppercase();
    match upper.as_str() {
        "BTC" => "BTCUSD".to_string(),
        "EUR" => "EURUSD".to_string(),
        "XAU" | "GOLD" => "XAUUSD".to_string(),
        _ => upper,
    }
}

/// Serves pre-loaded bar sets keyed by normalized symbol
#[derive(Debug, Default, Clone)]
pub struct InMemoryDataProvider {
    series: HashMap<String, Vec<Bar>>,
}

impl InMemoryDataProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_series(mut self, symbol: &str, bars: Vec<Bar>) -> Self {
        self.insert(symbol, bars);
        self
    }

    /// Replace the bars held for `symbol`
    pub fn insert(&mut self, symbol: &str, mut bars: Vec<Bar>) {
        bars.sort_by_key(|b| b.timestamp);
        self.series.insert(normalize_symbol(symbol), bars);
    }
}

#[async_trait]
impl DataProvider for InMemoryDataProvider {
    fn name(&self) -> &str {
        "memory"
    }

    async fn historical_bars(
        &self,
        symbol: &str,
        _timeframe: Timeframe,
    ) -> Result<Vec<Bar>, DataError> {
        self.series
            .get(&normalize_symbol(symbol))
            .cloned()
            .ok_or_else(|| DataError::UnknownSymbol(symbol.to_string()))
    }
}
