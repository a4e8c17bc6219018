//! Request orchestration: strategy conversion, data fetch, bounded core run
//!
//! Collaborator failures degrade instead of failing the request: a failed
//! conversion uses [`default_strategy`], a failed or empty fetch uses the
//! fallback provider, and an overrun produces a zero-metric fallback response.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{info, warn};

use crate::converter::{default_strategy, ParsedStrategy, StrategyConverter};
use crate::data::{normalize_symbol, DataProvider, Timeframe};
use crate::engine::BacktestEngine;
use crate::error::{DataError, EngineError, EngineResult};
use crate::types::{Bar, BacktestMetrics, Trade};

pub const DEFAULT_SYMBOL: &str = "BTCUSD";
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

/// Run configuration as entered by the user
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RunConfig {
    pub assets: Vec<String>,
    /// Descriptive only
    pub indicators: Vec<String>,
    pub initial_capital: f64,
    /// Percent; overrides the converted strategy's stop when set
    pub stop_loss: Option<f64>,
    /// Percent; overrides the converted strategy's target when set
    pub take_profit: Option<f64>,
    /// Percent per side (0.1 = 0.1%)
    pub commission: f64,
    pub timeframe: Timeframe,
    /// Echoed only, no leverage is simulated
    pub margin: f64,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            assets: vec![DEFAULT_SYMBOL.to_string()],
            indicators: Vec::new(),
            initial_capital: 10_000.0,
            stop_loss: None,
            take_profit: None,
            commission: 0.1,
            timeframe: Timeframe::default(),
            margin: 1.0,
        }
    }
}

impl RunConfig {
    pub fn validate(&self) -> EngineResult<()> {
        if !self.initial_capital.is_finite() || self.initial_capital <= 0.0 {
            return Err(EngineError::InvalidConfig(format!(
                "initial capital must be positive, got {}",
                self.initial_capital
            )));
        }
        if !(0.0..100.0).contains(&self.commission) {
            return Err(EngineError::InvalidConfig(format!(
                "commission must be in [0, 100) percent, got {}",
                self.commission
            )));
        }
        for (name, value) in [("stop loss", self.stop_loss), ("take profit", self.take_profit)] {
            if let Some(v) = value {
                if !v.is_finite() || v < 0.0 {
                    return Err(EngineError::InvalidConfig(format!(
                        "{} must be a non-negative percent, got {}",
                        name, v
                    )));
                }
            }
        }
        Ok(())
    }

    /// Fraction applied by the core (percent / 100)
    pub fn commission_rate(&self) -> f64 {
        self.commission / 100.0
    }

    pub fn primary_symbol(&self) -> String {
        self.assets
            .first()
            .map(|s| normalize_symbol(s))
            .unwrap_or_else(|| DEFAULT_SYMBOL.to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BacktestRequest {
    pub strategy: String,
    #[serde(default)]
    pub config: RunConfig,
}

impl BacktestRequest {
    pub fn new(strategy: impl Into<String>, config: RunConfig) -> Self {
        Self {
            strategy: strategy.into(),
            config,
        }
    }

    /// SHA-256 of the request's JSON form, hex encoded
    pub fn params_hash(&self) -> String {
        let json = serde_json::to_string(self).unwrap_or_default();
        format!("{:x}", Sha256::digest(json.as_bytes()))
    }
}

/// Where the simulated bars came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataSource {
    Primary,
    Synthetic,
    /// No bars were used (the run did not finish)
    Unavailable,
}

impl std::fmt::Display for DataSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DataSource::Primary => write!(f, "primary"),
            DataSource::Synthetic => write!(f, "synthetic"),
            DataSource::Unavailable => write!(f, "unavailable"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunOutcome {
    Completed,
    /// Placeholder result; see `fallback_reason`
    Fallback,
}

impl std::fmt::Display for RunOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunOutcome::Completed => write!(f, "completed"),
            RunOutcome::Fallback => write!(f, "fallback"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BacktestResponse {
    pub results: BacktestMetrics,
    pub trades: Vec<Trade>,
    pub parsed_strategy: ParsedStrategy,
    pub symbol: String,
    pub timeframe: Timeframe,
    pub data_points: usize,
    pub data_source: DataSource,
    pub outcome: RunOutcome,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fallback_reason: Option<String>,
    pub params_hash: String,
}

pub struct BacktestRunner {
    converter: Arc<dyn StrategyConverter>,
    provider: Arc<dyn DataProvider>,
    fallback: Arc<dyn DataProvider>,
    timeout: Duration,
}

impl BacktestRunner {
    pub fn new(
        converter: Arc<dyn StrategyConverter>,
        provider: Arc<dyn DataProvider>,
        fallback: Arc<dyn DataProvider>,
    ) -> Self {
        Self {
            converter,
            provider,
            fallback,
            timeout: DEFAULT_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Run one request end to end.
    ///
    /// Only an invalid configuration or an unusable fallback provider is an
    /// error; everything else degrades into the response.
    pub async fn run(&self, request: &BacktestRequest) -> EngineResult<BacktestResponse> {
        request.config.validate()?;
        let params_hash = request.params_hash();
        let symbol = request.config.primary_symbol();

        info!(
            %symbol,
            timeframe = %request.config.timeframe,
            hash = %params_hash,
            "Backtest request received"
        );

        match tokio::time::timeout(self.timeout, self.execute(request, &symbol, &params_hash)).await {
            Ok(result) => result,
            Err(_) => {
                let reason = format!("backtest exceeded {}s time limit", self.timeout.as_secs_f64());
                warn!(%symbol, %reason, "Returning fallback result");
                Ok(BacktestResponse {
                    results: BacktestMetrics::default(),
                    trades: Vec::new(),
                    parsed_strategy: default_strategy(),
                    symbol,
                    timeframe: request.config.timeframe,
                    data_points: 0,
                    data_source: DataSource::Unavailable,
                    outcome: RunOutcome::Fallback,
                    fallback_reason: Some(reason),
                    params_hash,
                })
            }
        }
    }

    async fn execute(
        &self,
        request: &BacktestRequest,
        symbol: &str,
        params_hash: &str,
    ) -> EngineResult<BacktestResponse> {
        let config = &request.config;
        let parsed_strategy = self.convert(&request.strategy, config).await;
        let (bars, data_source) = self.fetch(symbol, config.timeframe).await?;
        let data_points = bars.len();

        let logic = parsed_strategy.logic.clone();
        let capital = config.initial_capital;
        let rate = config.commission_rate();
        let result = tokio::task::spawn_blocking(move || {
            BacktestEngine::new(&bars, capital, rate).run(&logic)
        })
        .await?;

        info!(
            %symbol,
            trades = result.metrics.total_trades,
            net_profit = result.metrics.net_profit,
            %data_source,
            "Backtest request complete"
        );

        Ok(BacktestResponse {
            results: result.metrics,
            trades: result.trades,
            parsed_strategy,
            symbol: symbol.to_string(),
            timeframe: config.timeframe,
            data_points,
            data_source,
            outcome: RunOutcome::Completed,
            fallback_reason: None,
            params_hash: params_hash.to_string(),
        })
    }

    async fn convert(&self, description: &str, config: &RunConfig) -> ParsedStrategy {
        let mut parsed = if description.trim().is_empty() {
            default_strategy()
        } else {
            match self.converter.convert(description).await {
                Ok(parsed) => parsed,
                Err(e) => {
                    warn!(error = %e, "Strategy conversion failed, using default strategy");
                    default_strategy()
                }
            }
        };

        let risk = &mut parsed.logic.risk_management;
        if let Some(stop_loss) = config.stop_loss {
            risk.stop_loss = stop_loss;
        }
        if let Some(take_profit) = config.take_profit {
            risk.take_profit = take_profit;
        }
        parsed
    }

    async fn fetch(&self, symbol: &str, timeframe: Timeframe) -> Result<(Vec<Bar>, DataSource), DataError> {
        match self.provider.historical_bars(symbol, timeframe).await {
            Ok(bars) if !bars.is_empty() => return Ok((bars, DataSource::Primary)),
            Ok(_) => warn!(
                symbol,
                provider = self.provider.name(),
                "Provider returned no bars, falling back"
            ),
            Err(e) => warn!(
                symbol,
                provider = self.provider.name(),
                error = %e,
                "Data fetch failed, falling back"
            ),
        }

        let bars = self.fallback.historical_bars(symbol, timeframe).await?;
        if bars.is_empty() {
            return Err(DataError::Empty(symbol.to_string()));
        }
        Ok((bars, DataSource::Synthetic))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::converter::FixedStrategyConverter;
    use crate::data::{InMemoryDataProvider, SyntheticDataProvider};
    use crate::error::ConvertError;
    use async_trait::async_trait;
    use chrono::{Duration as ChronoDuration, TimeZone, Utc};

    struct FailingConverter;

    #[async_trait]
    impl StrategyConverter for FailingConverter {
        async fn convert(&self, _description: &str) -> Result<ParsedStrategy, ConvertError> {
            Err(ConvertError::EmptyResponse)
        }
    }

    struct SlowConverter;

    #[async_trait]
    impl StrategyConverter for SlowConverter {
        async fn convert(&self, _description: &str) -> Result<ParsedStrategy, ConvertError> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(default_strategy())
        }
    }

    fn ramp_bars() -> Vec<Bar> {
        let mut prices = vec![100.0; 60];
        prices.extend((1..=200).map(|k| 100.0 + 0.5 * k as f64));
        prices.extend((1..=200).map(|k| 200.0 - 0.5 * k as f64));

        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        prices
            .iter()
            .enumerate()
            .map(|(i, &p)| Bar {
                timestamp: start + ChronoDuration::minutes(i as i64),
                open: p,
                high: p,
                low: p,
                close: p,
                volume: 1.0,
            })
            .collect()
    }

    fn runner(converter: Arc<dyn StrategyConverter>, provider: InMemoryDataProvider) -> BacktestRunner {
        let fallback = SyntheticDataProvider::new(42)
            .with_bars(300)
            .with_start(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap());
        BacktestRunner::new(converter, Arc::new(provider), Arc::new(fallback))
    }

    #[tokio::test]
    async fn test_run_with_primary_data() {
        let provider = InMemoryDataProvider::new().with_series("BTCUSD", ramp_bars());
        let runner = runner(Arc::new(FixedStrategyConverter::default()), provider);
        let request = BacktestRequest::new("golden cross", RunConfig::default());

        let response = runner.run(&request).await.unwrap();
        assert_eq!(response.outcome, RunOutcome::Completed);
        assert_eq!(response.data_source, DataSource::Primary);
        assert_eq!(response.data_points, 460);
        assert_eq!(response.results.total_trades, 1);
        // commission 0.1% per side
        assert_eq!(response.results.net_profit, 38.65);
        assert_eq!(response.trades.len(), 1);
        assert_eq!(response.params_hash, request.params_hash());
    }

    #[tokio::test]
    async fn test_risk_overrides_apply() {
        let provider = InMemoryDataProvider::new().with_series("BTCUSD", ramp_bars());
        let runner = runner(Arc::new(FixedStrategyConverter::default()), provider);
        let config = RunConfig {
            take_profit: Some(500.0),
            stop_loss: Some(99.0),
            ..RunConfig::default()
        };

        let response = runner.run(&BacktestRequest::new("x", config)).await.unwrap();
        let risk = response.parsed_strategy.logic.risk_management;
        assert_eq!(risk.take_profit, 500.0);
        assert_eq!(risk.stop_loss, 99.0);
        assert_eq!(
            response.trades[0].exit_reason,
            Some(crate::types::ExitReason::Signal)
        );
    }

    #[tokio::test]
    async fn test_conversion_failure_uses_default() {
        let provider = InMemoryDataProvider::new().with_series("BTCUSD", ramp_bars());
        let runner = runner(Arc::new(FailingConverter), provider);

        let response = runner
            .run(&BacktestRequest::new("buy the dip", RunConfig::default()))
            .await
            .unwrap();
        assert_eq!(response.parsed_strategy, default_strategy());
        assert_eq!(response.outcome, RunOutcome::Completed);
    }

    #[tokio::test]
    async fn test_missing_data_falls_back_to_synthetic() {
        let runner = runner(
            Arc::new(FixedStrategyConverter::default()),
            InMemoryDataProvider::new(),
        );
        let config = RunConfig {
            assets: vec!["xau".to_string()],
            ..RunConfig::default()
        };

        let response = runner.run(&BacktestRequest::new("x", config)).await.unwrap();
        assert_eq!(response.data_source, DataSource::Synthetic);
        assert_eq!(response.data_points, 300);
        assert_eq!(response.symbol, "XAUUSD");
        assert_eq!(response.results.equity_curve.len(), 299);
    }

    #[tokio::test]
    async fn test_timeout_returns_fallback() {
        let provider = InMemoryDataProvider::new().with_series("BTCUSD", ramp_bars());
        let runner =
            runner(Arc::new(SlowConverter), provider).with_timeout(Duration::from_millis(50));

        let response = runner
            .run(&BacktestRequest::new("slow", RunConfig::default()))
            .await
            .unwrap();
        assert_eq!(response.outcome, RunOutcome::Fallback);
        assert!(response.fallback_reason.is_some());
        assert_eq!(response.results, BacktestMetrics::default());
        assert_eq!(response.data_points, 0);
    }

    #[tokio::test]
    async fn test_invalid_config_rejected() {
        let runner = runner(
            Arc::new(FixedStrategyConverter::default()),
            InMemoryDataProvider::new(),
        );
        for config in [
            RunConfig {
                initial_capital: 0.0,
                ..RunConfig::default()
            },
            RunConfig {
                initial_capital: f64::NAN,
                ..RunConfig::default()
            },
            RunConfig {
                commission: 100.0,
                ..RunConfig::default()
            },
            RunConfig {
                commission: -1.0,
                ..RunConfig::default()
            },
        ] {
            let result = runner.run(&BacktestRequest::new("x", config)).await;
            assert!(matches!(result, Err(EngineError::InvalidConfig(_))));
        }
    }

    #[test]
    fn test_params_hash_is_stable_and_sensitive() {
        let a = BacktestRequest::new("golden cross", RunConfig::default());
        let b = BacktestRequest::new("golden cross", RunConfig::default());
        assert_eq!(a.params_hash(), b.params_hash());
        assert_eq!(a.params_hash().len(), 64);

        let c = BacktestRequest::new(
            "golden cross",
            RunConfig {
                commission: 0.2,
                ..RunConfig::default()
            },
        );
        assert_ne!(a.params_hash(), c.params_hash());
    }

    #[test]
    fn test_request_json_shape() {
        let json = r#"{
            "strategy": "buy when fast crosses slow",
            "config": {
                "assets": ["EUR"],
                "initialCapital": 5000,
                "commission": 0.05,
                "timeframe": "1h",
                "stopLoss": 1.0
            }
        }"#;
        let request: BacktestRequest = serde_json::from_str(json).unwrap();
        assert_eq!(request.config.primary_symbol(), "EURUSD");
        assert_eq!(request.config.timeframe, Timeframe::H1);
        assert_eq!(request.config.stop_loss, Some(1.0));
        assert_eq!(request.config.take_profit, None);
        assert!((request.config.commission_rate() - 0.0005).abs() < 1e-15);
    }
}
