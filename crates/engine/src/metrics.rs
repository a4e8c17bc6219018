//! Performance statistics derived from closed trades and the equity curve.
//!
//! Everything is computed at full `f64` precision; [`round2`] is applied only
//! when the public [`BacktestMetrics`] fields are populated. Non-finite inputs
//! (a zero-priced bar, for instance) are not guarded and flow through as NaN
//! or infinity.

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;

use crate::types::{BacktestMetrics, EquityPoint, Trade};

/// Annualization factor, daily-bar convention applied to every timeframe
pub const TRADING_DAYS_PER_YEAR: f64 = 252.0;

/// Sortino value reported when there is no downside but a positive mean
const SORTINO_NO_DOWNSIDE: f64 = 100.0;

/// Round to 2 decimals as `floor(value * 100 + 0.5) / 100`.
///
/// The scaled value is taken in binary first, so ties go toward +infinity
/// (`-0.125` gives `-0.12`) and values stored just under a tie round down
/// (`1.005` gives `1.0`). Non-finite values pass through.
pub fn round2(value: f64) -> f64 {
    if !value.is_finite() {
        return value;
    }
    let scaled = value * 100.0;
    let cents = Decimal::from_f64_retain(scaled)
        .map(|d| (d + Decimal::new(5, 1)).floor())
        .and_then(|d| d.to_f64())
        .unwrap_or_else(|| (scaled + 0.5).floor());
    cents / 100.0
}

/// Per-bar simple returns of the equity curve
pub fn returns(equity_curve: &[EquityPoint]) -> Vec<f64> {
    equity_curve
        .windows(2)
        .map(|pair| (pair[1].value - pair[0].value) / pair[0].value)
        .collect()
}

fn mean(values: &[f64]) -> f64 {
    values.iter().sum::<f64>() / values.len() as f64
}

/// Population standard deviation
fn std_dev(values: &[f64]) -> f64 {
    let avg = mean(values);
    let variance = values.iter().map(|v| (v - avg).powi(2)).sum::<f64>() / values.len() as f64;
    variance.sqrt()
}

pub fn sharpe_ratio(returns: &[f64]) -> f64 {
    if returns.is_empty() {
        return 0.0;
    }
    let sd = std_dev(returns);
    if sd == 0.0 {
        return 0.0;
    }
    mean(returns) / sd * TRADING_DAYS_PER_YEAR.sqrt()
}

/// Sortino ratio with RMS of negative returns as downside deviation
pub fn sortino_ratio(returns: &[f64]) -> f64 {
    if returns.is_empty() {
        return 0.0;
    }
    let avg = mean(returns);
    let no_downside = if avg > 0.0 { SORTINO_NO_DOWNSIDE } else { 0.0 };

    let negative: Vec<f64> = returns.iter().copied().filter(|r| *r < 0.0).collect();
    if negative.is_empty() {
        return no_downside;
    }

    let downside = (negative.iter().map(|r| r * r).sum::<f64>() / negative.len() as f64).sqrt();
    if downside == 0.0 {
        return no_downside;
    }
    avg / downside * TRADING_DAYS_PER_YEAR.sqrt()
}

/// Annualized population standard deviation of returns
pub fn volatility(returns: &[f64]) -> f64 {
    if returns.is_empty() {
        return 0.0;
    }
    std_dev(returns) * TRADING_DAYS_PER_YEAR.sqrt()
}

/// Standard score of the last per-bar return against the whole sample
pub fn z_score(returns: &[f64]) -> f64 {
    let Some(last) = returns.last() else {
        return 0.0;
    };
    let sd = std_dev(returns);
    if sd == 0.0 {
        return 0.0;
    }
    (last - mean(returns)) / sd
}

/// Pearson correlation between bar index and equity value
pub fn lr_correlation(equity_curve: &[EquityPoint]) -> f64 {
    if equity_curve.len() < 2 {
        return 0.0;
    }

    let n = equity_curve.len() as f64;
    let (mut sum_x, mut sum_y, mut sum_xy, mut sum_xx, mut sum_yy) = (0.0, 0.0, 0.0, 0.0, 0.0);
    for (i, point) in equity_curve.iter().enumerate() {
        let x = i as f64;
        let y = point.value;
        sum_x += x;
        sum_y += y;
        sum_xy += x * y;
        sum_xx += x * x;
        sum_yy += y * y;
    }

    let numerator = n * sum_xy - sum_x * sum_y;
    let denominator = ((n * sum_xx - sum_x * sum_x) * (n * sum_yy - sum_y * sum_y)).sqrt();
    if denominator == 0.0 {
        return 0.0;
    }
    numerator / denominator
}

/// Peak-to-trough statistics of an equity curve
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Drawdown {
    /// Largest absolute drop below the running peak
    pub max_drawdown: f64,
    /// Longest run of consecutive bars strictly below the running peak
    pub max_duration: u32,
}

/// Walk the curve with a running peak seeded at `initial_capital`
pub fn drawdown(equity_curve: &[EquityPoint], initial_capital: f64) -> Drawdown {
    let mut peak = initial_capital;
    let mut result = Drawdown::default();
    let mut duration = 0u32;

    for point in equity_curve {
        if point.value > peak {
            peak = point.value;
            duration = 0;
        } else if point.value < peak {
            result.max_drawdown = result.max_drawdown.max(peak - point.value);
            duration += 1;
            result.max_duration = result.max_duration.max(duration);
        } else {
            duration = 0;
        }
    }

    result
}

/// Trade-level aggregates over closed trades
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct TradeStats {
    pub total: u32,
    pub won: u32,
    pub lost: u32,
    pub gross_profit: f64,
    pub gross_loss: f64,
    pub total_commission: f64,
}

impl TradeStats {
    pub fn from_trades<'a>(trades: impl IntoIterator<Item = &'a Trade>) -> Self {
        let mut stats = Self::default();
        let mut losses = 0.0;

        for trade in trades.into_iter().filter(|t| !t.is_open()) {
            stats.total += 1;
            if trade.pnl > 0.0 {
                stats.won += 1;
                stats.gross_profit += trade.pnl;
            } else {
                stats.lost += 1;
                losses += trade.pnl;
            }
            stats.total_commission += trade.commission;
        }

        stats.gross_loss = losses.abs();
        stats
    }

    pub fn net_profit(&self) -> f64 {
        self.gross_profit - self.gross_loss - self.total_commission
    }

    /// Gross profit over gross loss; equals gross profit when nothing was lost
    pub fn profit_factor(&self) -> f64 {
        if self.gross_loss > 0.0 {
            self.gross_profit / self.gross_loss
        } else {
            self.gross_profit
        }
    }

    pub fn win_rate(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            self.won as f64 / self.total as f64
        }
    }

    pub fn avg_win(&self) -> f64 {
        if self.won == 0 {
            0.0
        } else {
            self.gross_profit / self.won as f64
        }
    }

    pub fn avg_loss(&self) -> f64 {
        if self.lost == 0 {
            0.0
        } else {
            self.gross_loss / self.lost as f64
        }
    }
}

/// Build the final report. Zero closed trades yields [`BacktestMetrics::empty`].
pub fn calculate(
    trades: &[Trade],
    equity_curve: Vec<EquityPoint>,
    initial_capital: f64,
) -> BacktestMetrics {
    let stats = TradeStats::from_trades(trades);
    if stats.total == 0 {
        return BacktestMetrics::empty(equity_curve);
    }

    let rets = returns(&equity_curve);
    let dd = drawdown(&equity_curve, initial_capital);
    let net_profit = stats.net_profit();

    let calmar = if dd.max_drawdown > 0.0 {
        (net_profit / initial_capital) / (dd.max_drawdown / initial_capital)
    } else {
        0.0
    };

    BacktestMetrics {
        profit_factor: round2(stats.profit_factor()),
        sharpe_ratio: round2(sharpe_ratio(&rets)),
        sortino_ratio: round2(sortino_ratio(&rets)),
        calmar_ratio: round2(calmar),
        z_score: round2(z_score(&rets)),
        lr_correlation: round2(lr_correlation(&equity_curve)),
        net_profit: round2(net_profit),
        balance_drawdown_absolute: round2(dd.max_drawdown),
        balance_drawdown_relative: round2(dd.max_drawdown / initial_capital * 100.0),
        total_trades: stats.total,
        trades_won: stats.won,
        trades_lost: stats.lost,
        win_rate: round2(stats.win_rate()),
        avg_win: round2(stats.avg_win()),
        avg_loss: round2(stats.avg_loss()),
        max_drawdown: round2(dd.max_drawdown),
        max_drawdown_duration: dd.max_duration,
        volatility: round2(volatility(&rets)),
        equity_curve,
    }
}
