//! Strategy Lab Engine: SMA crossover backtesting with performance reporting
//!
//! Provides:
//! - Deterministic bar-by-bar simulation with stop-loss / take-profit exits
//! - Risk and return metrics over the resulting equity curve
//! - CSV, synthetic and in-memory market data providers
//! - Natural-language strategy conversion over an OpenAI-compatible API
//! - Request runner with timeout and graceful fallbacks

pub mod converter;
pub mod data;
pub mod engine;
pub mod error;
pub mod ledger;
pub mod metrics;
pub mod runner;
pub mod series;
pub mod types;

// Re-exports for convenience
pub use converter::{
    default_strategy, FixedStrategyConverter, LlmConfig, LlmStrategyConverter, ParsedStrategy,
    StrategyConverter,
};
pub use data::{
    normalize_symbol, CsvDataProvider, DataProvider, InMemoryDataProvider, SyntheticDataProvider,
    Timeframe,
};
pub use engine::{run_backtest, BacktestEngine};
pub use error::{ConvertError, DataError, EngineError, EngineResult};
pub use metrics::round2;
pub use runner::{
    BacktestRequest, BacktestResponse, BacktestRunner, DataSource, RunConfig, RunOutcome,
};
pub use types::*;
