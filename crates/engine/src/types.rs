//! Types for the backtesting engine

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A single OHLCV observation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bar {
    pub timestamp: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

/// Stop-loss / take-profit thresholds, both in percent (2.0 = 2%)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RiskManagement {
    pub stop_loss: f64,
    pub take_profit: f64,
}

impl Default for RiskManagement {
    fn default() -> Self {
        Self {
            stop_loss: 2.0,
            take_profit: 4.0,
        }
    }
}

/// Structured strategy as produced by the strategy-structuring service.
///
/// Condition and indicator labels are descriptive only. The engine reads
/// nothing but `risk_management`.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StrategyLogic {
    #[serde(default)]
    pub entry_conditions: Vec<String>,
    #[serde(default)]
    pub exit_conditions: Vec<String>,
    #[serde(default)]
    pub indicators: Vec<String>,
    #[serde(default)]
    pub risk_management: RiskManagement,
}

/// Side of a trade. Only `Long` is ever produced by the simulation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TradeSide {
    Long,
    Short,
}

/// Why a trade was closed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExitReason {
    StopLoss,
    TakeProfit,
    Signal,
    EndOfData,
}

impl std::fmt::Display for ExitReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExitReason::StopLoss => write!(f, "stop_loss"),
            ExitReason::TakeProfit => write!(f, "take_profit"),
            ExitReason::Signal => write!(f, "signal"),
            ExitReason::EndOfData => write!(f, "end_of_data"),
        }
    }
}

/// A single simulated position.
///
/// Open while `exit_time` is `None`; `exit_price` and `pnl` stay at 0 until close.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Trade {
    pub entry_time: DateTime<Utc>,
    pub exit_time: Option<DateTime<Utc>>,
    pub entry_price: f64,
    pub exit_price: f64,
    pub quantity: u64,
    pub side: TradeSide,
    /// Realized P&L excluding commission
    pub pnl: f64,
    /// Entry + exit commission accrued so far
    pub commission: f64,
    pub exit_reason: Option<ExitReason>,
}

impl Trade {
    pub fn is_open(&self) -> bool {
        self.exit_time.is_none()
    }

    /// Mark-to-market P&L at `price`, ignoring commission
    pub fn unrealized_pnl(&self, price: f64) -> f64 {
        match self.side {
            TradeSide::Long => (price - self.entry_price) * self.quantity as f64,
            TradeSide::Short => (self.entry_price - price) * self.quantity as f64,
        }
    }
}

/// A point on the equity curve
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EquityPoint {
    pub timestamp: DateTime<Utc>,
    pub value: f64,
}

/// Final performance report of a backtest run
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BacktestMetrics {
    pub profit_factor: f64,
    pub sharpe_ratio: f64,
    pub sortino_ratio: f64,
    pub calmar_ratio: f64,
    pub z_score: f64,
    pub lr_correlation: f64,
    pub net_profit: f64,
    pub balance_drawdown_absolute: f64,
    pub balance_drawdown_relative: f64,
    pub total_trades: u32,
    pub trades_won: u32,
    pub trades_lost: u32,
    /// Fraction in 0..=1, not a percentage
    pub win_rate: f64,
    pub avg_win: f64,
    pub avg_loss: f64,
    pub max_drawdown: f64,
    pub max_drawdown_duration: u32,
    pub volatility: f64,
    pub equity_curve: Vec<EquityPoint>,
}

impl BacktestMetrics {
    /// All-zero report carrying whatever equity curve was accumulated
    pub fn empty(equity_curve: Vec<EquityPoint>) -> Self {
        Self {
            equity_curve,
            ..Default::default()
        }
    }
}

/// Metrics plus the full trade list and the strategy labels that produced them
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BacktestResult {
    pub metrics: BacktestMetrics,
    pub trades: Vec<Trade>,
    pub strategy: StrategyLogic,
    pub bars_processed: usize,
}
