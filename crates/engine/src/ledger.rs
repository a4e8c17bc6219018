//! Trade ledger: owns every trade of a run, open and closed

use crate::types::{Bar, ExitReason, Trade, TradeSide};

/// Indexed trade collection. Trades are appended on entry and closed in
/// place; a closed trade is never reopened.
#[derive(Debug, Default)]
pub struct TradeLedger {
    trades: Vec<Trade>,
    commission_rate: f64,
}

impl TradeLedger {
    pub fn new(commission_rate: f64) -> Self {
        Self {
            trades: Vec::new(),
            commission_rate,
        }
    }

    /// Open a long trade at the bar's close, accruing entry commission
    pub fn open_long(&mut self, bar: &Bar, quantity: u64) -> usize {
        let commission = quantity as f64 * bar.close * self.commission_rate;
        self.trades.push(Trade {
            entry_time: bar.timestamp,
            exit_time: None,
            entry_price: bar.close,
            exit_price: 0.0,
            quantity,
            side: TradeSide::Long,
            pnl: 0.0,
            commission,
            exit_reason: None,
        });
        self.trades.len() - 1
    }

    /// Close the trade at `index` on `bar`'s close. No-op if already closed.
    pub fn close(&mut self, index: usize, bar: &Bar, reason: ExitReason) -> Option<&Trade> {
        let rate = self.commission_rate;
        let trade = self.trades.get_mut(index)?;
        if !trade.is_open() {
            return None;
        }

        trade.exit_time = Some(bar.timestamp);
        trade.exit_price = bar.close;
        trade.pnl = trade.unrealized_pnl(bar.close);
        trade.commission += trade.quantity as f64 * trade.exit_price * rate;
        trade.exit_reason = Some(reason);
        Some(&*trade)
    }

    /// Force-close everything still open
    pub fn close_all(&mut self, bar: &Bar, reason: ExitReason) -> usize {
        let open = self.open_indices();
        for &index in &open {
            self.close(index, bar, reason);
        }
        open.len()
    }

    /// Indices of open trades in entry order
    pub fn open_indices(&self) -> Vec<usize> {
        self.trades
            .iter()
            .enumerate()
            .filter(|(_, t)| t.is_open())
            .map(|(i, _)| i)
            .collect()
    }

    pub fn get(&self, index: usize) -> Option<&Trade> {
        self.trades.get(index)
    }

    /// Capital plus closed P&L net of commission plus open mark-to-market.
    ///
    /// Summed in entry order; open trades contribute no commission until closed.
    pub fn equity(&self, initial_capital: f64, price: f64) -> f64 {
        self.trades.iter().fold(initial_capital, |equity, trade| {
            if trade.is_open() {
                equity + trade.unrealized_pnl(price)
            } else {
                equity + (trade.pnl - trade.commission)
            }
        })
    }

    pub fn len(&self) -> usize {
        self.trades.len()
    }

    pub fn is_empty(&self) -> bool {
        self.trades.is_empty()
    }

    pub fn trades(&self) -> &[Trade] {
        &self.trades
    }

    pub fn closed_trades(&self) -> impl Iterator<Item = &Trade> {
        self.trades.iter().filter(|t| !t.is_open())
    }

    pub fn into_trades(self) -> Vec<Trade> {
        self.trades
    }
}
