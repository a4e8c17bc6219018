//! Bar series and the moving-average indicators the simulation reads.
//!
//! Each SMA pass is computed once per run. Window sums are taken in bar
//! order over exactly `period` closes, so a value never depends on bars
//! after the one it is aligned to.

use crate::types::Bar;

/// Simple moving average of `closes` over a trailing window of `period`.
///
/// Returns `closes.len() - period + 1` values; element `k` is aligned to
/// close `k + period - 1`. Empty when fewer than `period` closes exist.
pub fn sma(closes: &[f64], period: usize) -> Vec<f64> {
    if period == 0 || closes.len() < period {
        return Vec::new();
    }

    closes
        .windows(period)
        .map(|window| window.iter().fold(0.0, |acc, c| acc + c) / period as f64)
        .collect()
}

/// Ordered, read-only OHLCV input of one run
#[derive(Debug, Clone, Copy)]
pub struct BarSeries<'a> {
    bars: &'a [Bar],
}

impl<'a> BarSeries<'a> {
    pub fn new(bars: &'a [Bar]) -> Self {
        Self { bars }
    }

    pub fn len(&self) -> usize {
        self.bars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bars.is_empty()
    }

    pub fn bars(&self) -> &'a [Bar] {
        self.bars
    }

    pub fn get(&self, index: usize) -> Option<&'a Bar> {
        self.bars.get(index)
    }

    pub fn last(&self) -> Option<&'a Bar> {
        self.bars.last()
    }

    pub fn closes(&self) -> Vec<f64> {
        self.bars.iter().map(|b| b.close).collect()
    }

    /// SMA of the close price, see [`sma`]
    pub fn sma(&self, period: usize) -> Vec<f64> {
        sma(&self.closes(), period)
    }
}

/// Direction of a fast/slow moving-average crossing at a bar
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cross {
    /// Fast moved from at-or-below slow to strictly above
    Golden,
    /// Fast moved from at-or-above slow to strictly below
    Death,
}

/// Precomputed fast/slow SMA pair, indexable by bar position
#[derive(Debug, Clone)]
pub struct SmaCrossover {
    fast_period: usize,
    slow_period: usize,
    fast: Vec<f64>,
    slow: Vec<f64>,
}

impl SmaCrossover {
    pub fn new(series: &BarSeries<'_>, fast_period: usize, slow_period: usize) -> Self {
        let closes = series.closes();
        Self {
            fast_period,
            slow_period,
            fast: sma(&closes, fast_period),
            slow: sma(&closes, slow_period),
        }
    }

    /// (fast, slow) aligned to bar `index`, once both windows are full
    pub fn pair_at(&self, index: usize) -> Option<(f64, f64)> {
        let fast = self.fast.get(index.checked_sub(self.fast_period.checked_sub(1)?)?)?;
        let slow = self.slow.get(index.checked_sub(self.slow_period.checked_sub(1)?)?)?;
        Some((*fast, *slow))
    }

    /// Crossing between bar `index - 1` and bar `index`.
    ///
    /// `None` until both averages have at least two values up to `index`.
    pub fn cross_at(&self, index: usize) -> Option<Cross> {
        let (prev_fast, prev_slow) = self.pair_at(index.checked_sub(1)?)?;
        let (fast, slow) = self.pair_at(index)?;

        if prev_fast <= prev_slow && fast > slow {
            Some(Cross::Golden)
        } else if prev_fast >= prev_slow && fast < slow {
            Some(Cross::Death)
        } else {
            None
        }
    }
}
