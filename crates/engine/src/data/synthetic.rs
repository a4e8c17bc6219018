//! Seeded random-walk bars, used when no real dataset is available

use async_trait::async_trait;
use chrono::{DateTime, DurationRound, Utc};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::info;

use super::{normalize_symbol, DataProvider, Timeframe};
use crate::error::DataError;
use crate::types::Bar;

pub const DEFAULT_DAYS: u32 = 30;

/// Per-step drift: a uniform draw is centred at 0.48, biasing slightly upward
const DRIFT_CENTER: f64 = 0.48;

/// Starting price and per-bar volatility for a symbol
fn profile(symbol: &str) -> (f64, f64) {
    match symbol {
        "BTCUSD" => (50_000.0, 0.02),
        "XAUUSD" => (2_000.0, 0.01),
        _ => (1.1, 0.005),
    }
}

/// Two decimals, or four for sub-10 instruments so FX pairs keep their pips
fn round_price(value: f64, reference: f64) -> f64 {
    let scale = if reference < 10.0 { 10_000.0 } else { 100.0 };
    (value * scale).round() / scale
}

#[derive(Debug, Clone)]
pub struct SyntheticDataProvider {
    seed: u64,
    bars: Option<usize>,
    start: Option<DateTime<Utc>>,
}

impl SyntheticDataProvider {
    pub fn new(seed: u64) -> Self {
        Self {
            seed,
            bars: None,
            start: None,
        }
    }

    /// Fixed bar count instead of `DEFAULT_DAYS` worth of bars
    pub fn with_bars(mut self, bars: usize) -> Self {
        self.bars = Some(bars);
        self
    }

    pub fn with_start(mut self, start: DateTime<Utc>) -> Self {
        self.start = Some(start);
        self
    }

    pub fn generate(&self, symbol: &str, timeframe: Timeframe) -> Vec<Bar> {
        let symbol = normalize_symbol(symbol);
        let (mut price, volatility) = profile(&symbol);
        let count = self
            .bars
            .unwrap_or_else(|| timeframe.bars_per_days(DEFAULT_DAYS));
        let step = timeframe.duration();
        let start = self.start.unwrap_or_else(|| {
            let now = Utc::now();
            let anchored = now.duration_trunc(step).unwrap_or(now);
            anchored - step * count as i32
        });

        let mut rng = StdRng::seed_from_u64(self.seed);
        let mut bars = Vec::with_capacity(count);
        let mut timestamp = start;

        for _ in 0..count {
            let change = (rng.gen::<f64>() - DRIFT_CENTER) * volatility;
            price *= 1.0 + change;

            let high = price * (1.0 + rng.gen::<f64>() * 0.01);
            let low = price * (1.0 - rng.gen::<f64>() * 0.01);
            let close = price * (1.0 + (rng.gen::<f64>() - 0.5) * 0.005);
            let volume = (rng.gen::<f64>() * 1_000_000.0).round();

            bars.push(Bar {
                timestamp,
                open: round_price(price, price),
                high: round_price(high, price),
                low: round_price(low, price),
                close: round_price(close, price),
                volume,
            });
            timestamp = timestamp + step;
        }

        bars
    }
}

#[async_trait]
impl DataProvider for SyntheticDataProvider {
    fn name(&self) -> &str {
        "synthetic"
    }

    async fn historical_bars(&self, symbol: &str, timeframe: Timeframe) -> Result<Vec<Bar>, DataError> {
        let bars = self.generate(symbol, timeframe);
        if bars.is_empty() {
            return Err(DataError::Empty(symbol.to_string()));
        }
        info!(symbol, bars = bars.len(), seed = self.seed, "Generated synthetic data");
        Ok(bars)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn provider(seed: u64) -> SyntheticDataProvider {
        SyntheticDataProvider::new(seed)
            .with_bars(500)
            .with_start(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap())
    }

    #[test]
    fn test_same_seed_same_bars() {
        let a = provider(7).generate("BTCUSD", Timeframe::M1);
        let b = provider(7).generate("BTCUSD", Timeframe::M1);
        assert_eq!(a, b);

        let c = provider(8).generate("BTCUSD", Timeframe::M1);
        assert_ne!(a, c);
    }

    #[test]
    fn test_bars_are_spaced_and_ordered() {
        let bars = provider(1).generate("XAUUSD", Timeframe::M5);
        assert_eq!(bars.len(), 500);
        for pair in bars.windows(2) {
            assert_eq!(pair[1].timestamp - pair[0].timestamp, chrono::Duration::minutes(5));
        }
    }

    #[test]
    fn test_prices_follow_symbol_profile() {
        let btc = provider(3).generate("btc", Timeframe::M1);
        assert!(btc[0].open > 40_000.0 && btc[0].open < 60_000.0);

        let eur = provider(3).generate("EURUSD", Timeframe::M1);
        assert!(eur[0].open > 1.0 && eur[0].open < 1.2);
        // four-decimal rounding
        assert_eq!((eur[0].close * 10_000.0).round() / 10_000.0, eur[0].close);
    }

    #[test]
    fn test_default_length_covers_thirty_days() {
        let bars = SyntheticDataProvider::new(0).generate("EURUSD", Timeframe::H1);
        assert_eq!(bars.len(), 30 * 24);
    }

    #[tokio::test]
    async fn test_provider_returns_bars() {
        let bars = provider(11).historical_bars("BTCUSD", Timeframe::M1).await.unwrap();
        assert_eq!(bars.len(), 500);
        assert!(bars.iter().all(|b| b.low <= b.high));
    }
}
