//! Bar-by-bar backtesting engine
//!
//! Entries fire on an SMA(20)/SMA(50) golden cross. Each open trade exits on
//! stop-loss, take-profit or a death cross, checked in that order. Whatever is
//! still open after the last bar is closed at its price.

use tracing::{debug, info};

use crate::ledger::TradeLedger;
use crate::metrics;
use crate::series::{BarSeries, Cross, SmaCrossover};
use crate::types::*;

pub const FAST_SMA_PERIOD: usize = 20;
pub const SLOW_SMA_PERIOD: usize = 50;

/// Fraction of current equity committed to each new trade
pub const POSITION_SIZE_FRACTION: f64 = 0.1;

/// Backtesting engine that simulates bar-by-bar execution.
///
/// Holds only immutable inputs; every [`run`](Self::run) builds its own
/// ledger and equity curve, so one engine can serve repeated runs.
pub struct BacktestEngine<'a> {
    series: BarSeries<'a>,
    initial_capital: f64,
    commission_rate: f64,
}

impl<'a> BacktestEngine<'a> {
    /// `commission_rate` is a fraction per side (0.001 = 0.1%)
    pub fn new(bars: &'a [Bar], initial_capital: f64, commission_rate: f64) -> Self {
        Self {
            series: BarSeries::new(bars),
            initial_capital,
            commission_rate,
        }
    }

    /// Run the strategy over the whole series
    pub fn run(&self, strategy: &StrategyLogic) -> BacktestResult {
        let risk = strategy.risk_management;
        let bars = self.series.bars();
        let crossover = SmaCrossover::new(&self.series, FAST_SMA_PERIOD, SLOW_SMA_PERIOD);

        let mut ledger = TradeLedger::new(self.commission_rate);
        let mut equity = self.initial_capital;
        let mut equity_curve: Vec<EquityPoint> = Vec::with_capacity(bars.len().saturating_sub(1));

        info!(
            bars = bars.len(),
            capital = self.initial_capital,
            commission_rate = self.commission_rate,
            stop_loss = risk.stop_loss,
            take_profit = risk.take_profit,
            "Starting backtest"
        );

        let progress_step = (bars.len() / 10).max(1);

        for (i, bar) in bars.iter().enumerate().skip(1) {
            if i % progress_step == 0 {
                debug!(pct = i * 100 / bars.len(), "Backtest progress");
            }

            let cross = crossover.cross_at(i);

            if cross == Some(Cross::Golden) {
                let quantity = position_size(equity, bar.close);
                if quantity > 0 {
                    ledger.open_long(bar, quantity);
                    debug!(
                        price = bar.close,
                        quantity,
                        time = %bar.timestamp,
                        "Opened LONG position"
                    );
                }
            }

            for index in ledger.open_indices() {
                let Some(trade) = ledger.get(index) else {
                    continue;
                };
                let pnl_pct = (bar.close - trade.entry_price) / trade.entry_price * 100.0;

                let reason = if pnl_pct <= -risk.stop_loss {
                    Some(ExitReason::StopLoss)
                } else if pnl_pct >= risk.take_profit {
                    Some(ExitReason::TakeProfit)
                } else if cross == Some(Cross::Death) {
                    Some(ExitReason::Signal)
                } else {
                    None
                };

                if let Some(reason) = reason {
                    if let Some(closed) = ledger.close(index, bar, reason) {
                        debug!(
                            entry = closed.entry_price,
                            exit = closed.exit_price,
                            pnl = closed.pnl,
                            %reason,
                            "Closed position"
                        );
                    }
                }
            }

            equity = ledger.equity(self.initial_capital, bar.close);
            equity_curve.push(EquityPoint {
                timestamp: bar.timestamp,
                value: equity,
            });
        }

        if let Some(last) = self.series.last() {
            let forced = ledger.close_all(last, ExitReason::EndOfData);
            if forced > 0 {
                debug!(forced, price = last.close, "Closed remaining positions at end of data");
            }
        }

        let trades = ledger.into_trades();
        let metrics = metrics::calculate(&trades, equity_curve, self.initial_capital);

        info!(
            total_trades = metrics.total_trades,
            trades_won = metrics.trades_won,
            win_rate = metrics.win_rate,
            net_profit = metrics.net_profit,
            max_drawdown = metrics.max_drawdown,
            "Backtest complete"
        );

        BacktestResult {
            metrics,
            trades,
            strategy: strategy.clone(),
            bars_processed: bars.len(),
        }
    }
}

/// Whole units affordable with [`POSITION_SIZE_FRACTION`] of `equity`
fn position_size(equity: f64, price: f64) -> u64 {
    let units = (equity * POSITION_SIZE_FRACTION / price).floor();
    if units > 0.0 {
        units as u64
    } else {
        0
    }
}

/// Run a single backtest and return its metrics.
///
/// Fewer than two bars yields the all-zero report with an empty equity curve.
pub fn run_backtest(
    bars: &[Bar],
    initial_capital: f64,
    commission_rate: f64,
    strategy: &StrategyLogic,
) -> BacktestMetrics {
    BacktestEngine::new(bars, initial_capital, commission_rate)
        .run(strategy)
        .metrics
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};

    fn make_bars(prices: &[f64]) -> Vec<Bar> {
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        prices
            .iter()
            .enumerate()
            .map(|(i, &p)| Bar {
                timestamp: start + Duration::days(i as i64),
                open: p,
                high: p + 1.0,
                low: p - 1.0,
                close: p,
                volume: 100.0,
            })
            .collect()
    }

    fn strategy(stop_loss: f64, take_profit: f64) -> StrategyLogic {
        StrategyLogic {
            entry_conditions: vec!["SMA_20 crosses above SMA_50".to_string()],
            exit_conditions: vec!["SMA_20 crosses below SMA_50".to_string()],
            indicators: vec!["SMA_20".to_string(), "SMA_50".to_string()],
            risk_management: RiskManagement {
                stop_loss,
                take_profit,
            },
        }
    }

    /// 60 flat bars at 100, +0.5 per bar up to 200, then -0.5 per bar back to 100
    fn ramp_up_then_down() -> Vec<f64> {
        let mut prices = vec![100.0; 60];
        prices.extend((1..=200).map(|k| 100.0 + 0.5 * k as f64));
        prices.extend((1..=200).map(|k| 200.0 - 0.5 * k as f64));
        prices
    }

    #[test]
    fn test_empty_bars() {
        let metrics = run_backtest(&[], 10_000.0, 0.001, &strategy(2.0, 4.0));
        assert_eq!(metrics, BacktestMetrics::default());
        assert!(metrics.equity_curve.is_empty());
    }

    #[test]
    fn test_single_bar() {
        let bars = make_bars(&[100.0]);
        let result = BacktestEngine::new(&bars, 10_000.0, 0.001).run(&strategy(2.0, 4.0));
        assert!(result.trades.is_empty());
        assert_eq!(result.metrics, BacktestMetrics::default());
    }

    #[test]
    fn test_linear_series_under_slow_window_never_trades() {
        let prices: Vec<f64> = (0..49).map(|i| 100.0 + i as f64).collect();
        let bars = make_bars(&prices);
        let metrics = run_backtest(&bars, 10_000.0, 0.001, &strategy(2.0, 4.0));
        assert_eq!(metrics.total_trades, 0);
        assert_eq!(metrics.sharpe_ratio, 0.0);
        assert_eq!(metrics.profit_factor, 0.0);
        assert_eq!(metrics.equity_curve.len(), 48);
    }

    #[test]
    fn test_flat_oscillation_never_trades() {
        // +/-1% around a 100 base
        let prices: Vec<f64> = (0..100)
            .map(|i| if i % 2 == 0 { 101.0 } else { 99.0 })
            .collect();
        let bars = make_bars(&prices);
        let metrics = run_backtest(&bars, 10_000.0, 0.001, &strategy(2.0, 4.0));

        assert_eq!(metrics.total_trades, 0);
        assert_eq!(metrics.sortino_ratio, 0.0);
        assert_eq!(metrics.equity_curve.len(), 99);
        assert!(metrics.equity_curve.iter().all(|p| p.value == 10_000.0));
    }

    #[test]
    fn test_ramp_scenario_single_profitable_trade() {
        let bars = make_bars(&ramp_up_then_down());
        let result = BacktestEngine::new(&bars, 10_000.0, 0.001).run(&strategy(2.0, 4.0));

        assert_eq!(result.trades.len(), 1);
        let trade = &result.trades[0];
        // golden cross on the first rising bar
        assert_eq!(trade.entry_time, bars[60].timestamp);
        assert_eq!(trade.entry_price, 100.5);
        assert_eq!(trade.quantity, 9);
        assert_eq!(trade.side, TradeSide::Long);
        assert_eq!(trade.exit_reason, Some(ExitReason::TakeProfit));
        assert_eq!(trade.exit_price, 105.0);

        let m = &result.metrics;
        assert_eq!(m.total_trades, 1);
        assert_eq!(m.trades_won, 1);
        assert!(m.net_profit > 0.0);
        assert_eq!(m.net_profit, 38.65);
        // no losses: profit factor is gross profit itself
        assert_eq!(m.profit_factor, 40.5);
        assert_eq!(m.equity_curve.len(), bars.len() - 1);
    }

    #[test]
    fn test_commission_conservation() {
        let bars = make_bars(&ramp_up_then_down());
        let rate = 0.001;
        let result = BacktestEngine::new(&bars, 10_000.0, rate).run(&strategy(2.0, 4.0));

        for trade in &result.trades {
            let q = trade.quantity as f64;
            let expected = q * trade.entry_price * rate + q * trade.exit_price * rate;
            assert!((trade.commission - expected).abs() < 1e-9);
        }
    }

    #[test]
    fn test_stop_loss_exit() {
        let mut prices = vec![100.0; 60];
        prices.push(101.0);
        prices.extend(vec![98.0; 60]);
        let bars = make_bars(&prices);
        let result = BacktestEngine::new(&bars, 10_000.0, 0.001).run(&strategy(2.0, 4.0));

        assert_eq!(result.trades.len(), 1);
        let trade = &result.trades[0];
        assert_eq!(trade.exit_reason, Some(ExitReason::StopLoss));
        assert_eq!(trade.exit_time, Some(bars[61].timestamp));
        assert_eq!(trade.pnl, -27.0);

        let m = &result.metrics;
        assert_eq!(m.trades_lost, 1);
        assert_eq!(m.win_rate, 0.0);
        assert_eq!(m.profit_factor, 0.0);
        assert!(m.net_profit < -27.0);
        assert!(m.max_drawdown > 0.0);
    }

    #[test]
    fn test_second_entry_sized_from_current_equity() {
        // golden at 60, stop-loss and death cross at 61, averages meet at 50, golden again at 120
        let mut prices = vec![100.0; 60];
        prices.push(101.0);
        prices.extend(vec![50.0; 59]);
        prices.extend(vec![51.0; 11]);
        let bars = make_bars(&prices);
        let rate = 0.001;
        let result = BacktestEngine::new(&bars, 10_000.0, rate).run(&strategy(2.0, 4.0));

        assert_eq!(result.trades.len(), 2);
        let first = &result.trades[0];
        assert_eq!(first.quantity, 9);
        assert_eq!(first.exit_reason, Some(ExitReason::StopLoss));
        assert_eq!(first.exit_time, Some(bars[61].timestamp));
        assert_eq!(first.pnl, -459.0);

        let second = &result.trades[1];
        assert_eq!(second.entry_time, bars[120].timestamp);
        assert_eq!(second.entry_price, 51.0);
        // equity_curve[k] is the equity after bar k + 1
        let equity_before_entry = result.metrics.equity_curve[118].value;
        assert!((equity_before_entry - 9_539.641).abs() < 1e-9);
        let expected = (equity_before_entry * POSITION_SIZE_FRACTION / 51.0).floor() as u64;
        assert_eq!(second.quantity, expected);
        assert_eq!(second.quantity, 18);
        // sizing off initial capital would give 19
        assert_ne!(second.quantity, position_size(10_000.0, 51.0));
        assert_eq!(second.exit_reason, Some(ExitReason::EndOfData));

        let m = &result.metrics;
        assert_eq!(m.total_trades, 2);
        assert_eq!(m.trades_won + m.trades_lost, m.total_trades);
        for trade in &result.trades {
            let q = trade.quantity as f64;
            let expected = q * trade.entry_price * rate + q * trade.exit_price * rate;
            assert!((trade.commission - expected).abs() < 1e-9);
        }
    }

    #[test]
    fn test_death_cross_exit_with_wide_thresholds() {
        let bars = make_bars(&ramp_up_then_down());
        let result = BacktestEngine::new(&bars, 10_000.0, 0.0).run(&strategy(99.0, 500.0));

        assert_eq!(result.trades.len(), 1);
        let trade = &result.trades[0];
        assert_eq!(trade.exit_reason, Some(ExitReason::Signal));
        assert!(trade.exit_price > trade.entry_price);
    }

    #[test]
    fn test_open_trade_closed_at_end_of_data() {
        let mut prices = vec![100.0; 60];
        prices.extend((1..=10).map(|k| 100.0 + 0.1 * k as f64));
        let bars = make_bars(&prices);
        let result = BacktestEngine::new(&bars, 10_000.0, 0.001).run(&strategy(2.0, 4.0));

        assert_eq!(result.trades.len(), 1);
        let trade = &result.trades[0];
        assert_eq!(trade.exit_reason, Some(ExitReason::EndOfData));
        assert_eq!(trade.exit_time, Some(bars.last().unwrap().timestamp));
        assert!(result.trades.iter().all(|t| !t.is_open()));
    }

    #[test]
    fn test_trade_conservation_and_determinism() {
        let bars = make_bars(&ramp_up_then_down());
        let engine = BacktestEngine::new(&bars, 25_000.0, 0.002);
        let first = engine.run(&strategy(1.5, 3.0));
        let second = engine.run(&strategy(1.5, 3.0));

        assert_eq!(first, second);
        let m = &first.metrics;
        assert_eq!(m.trades_won + m.trades_lost, m.total_trades);
        assert!(m.max_drawdown >= 0.0);
        assert!(first.trades.iter().all(|t| t.exit_time.is_some()));
    }

    #[test]
    fn test_position_size() {
        assert_eq!(position_size(10_000.0, 100.5), 9);
        assert_eq!(position_size(10_000.0, 2_000.0), 0);
        assert_eq!(position_size(0.0, 10.0), 0);
    }
}
