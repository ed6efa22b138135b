//! Open-position book.
//!
//! Holds every position the engine currently owns, keyed by symbol, together
//! with realized-P&L aggregates over closed trades. At most one open position
//! per symbol; a second entry in the same name must be rejected before any
//! order is sent.

use dashmap::DashMap;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::RwLock;

use broker_core::types::{Position, PositionState};
use broker_core::{Error, Result};

/// Point-in-time aggregate view of the book.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BookStats {
    pub open_positions: usize,
    pub market_value: Decimal,
    pub cost_basis: Decimal,
    pub unrealized_pnl: Decimal,
    pub realized_pnl: Decimal,
    pub closed_trades: u32,
    pub wins: u32,
    pub losses: u32,
}

impl BookStats {
    /// Fraction of closed trades that ended positive. `None` until at least
    /// one trade has closed.
    pub fn win_rate(&self) -> Option<Decimal> {
        if self.closed_trades == 0 {
            return None;
        }
        Some(Decimal::from(self.wins) / Decimal::from(self.closed_trades))
    }
}

#[derive(Debug, Default)]
struct RealizedTotals {
    pnl: Decimal,
    closed: u32,
    wins: u32,
    losses: u32,
}

/// Positions held by the engine, plus realized totals that survive closes.
#[derive(Debug, Default)]
pub struct PositionBook {
    positions: DashMap<String, Position>,
    realized: RwLock<RealizedTotals>,
}

impl PositionBook {
    pub fn new() -> Self {
        Self::default()
    }

    /// Admit a freshly opened position. Rejects a second open position in
    /// the same symbol.
    pub fn open(&self, position: Position) -> Result<()> {
        if self.positions.contains_key(&position.symbol) {
            return Err(Error::Validation(format!(
                "position already open for {}",
                position.symbol
            )));
        }
        self.positions.insert(position.symbol.clone(), position);
        Ok(())
    }

    pub fn get(&self, symbol: &str) -> Option<Position> {
        self.positions.get(symbol).map(|entry| entry.clone())
    }

    pub fn contains(&self, symbol: &str) -> bool {
        self.positions.contains_key(symbol)
    }

    /// Number of open positions.
    pub fn len(&self) -> usize {
        self.positions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    /// Snapshot of every open position. Order is unspecified.
    pub fn open_positions(&self) -> Vec<Position> {
        self.positions
            .iter()
            .filter(|entry| entry.is_open())
            .map(|entry| entry.clone())
            .collect()
    }

    /// Apply a closure to one position in place. Returns false when the
    /// symbol has no open position.
    pub fn update<F>(&self, symbol: &str, f: F) -> bool
    where
        F: FnOnce(&mut Position),
    {
        match self.positions.get_mut(symbol) {
            Some(mut entry) => {
                f(&mut entry);
                true
            }
            None => false,
        }
    }

    /// Record a partial sale fill against the held position.
    pub fn apply_partial_sale(&self, symbol: &str, quantity: Decimal, price: Decimal) -> Result<()> {
        let mut entry = self
            .positions
            .get_mut(symbol)
            .ok_or_else(|| Error::Validation(format!("no open position for {symbol}")))?;
        let before = entry.realized_pnl;
        entry
            .apply_partial_sale(quantity, price)
            .map_err(Error::Validation)?;
        let delta = entry.realized_pnl - before;
        drop(entry);
        if let Ok(mut totals) = self.realized.write() {
            totals.pnl += delta;
        }
        Ok(())
    }

    /// Close the remaining shares at `price`, fold the result into the
    /// realized totals, and drop the entry from the book.
    pub fn close(&self, symbol: &str, price: Decimal) -> Result<Position> {
        let (_, mut position) = self
            .positions
            .remove(symbol)
            .ok_or_else(|| Error::Validation(format!("no open position for {symbol}")))?;
        let before = position.realized_pnl;
        if let Err(message) = position.close(price) {
            // Put it back untouched so a bad close is not a silent drop.
            self.positions.insert(symbol.to_string(), position);
            return Err(Error::Validation(message));
        }
        let delta = position.realized_pnl - before;
        if let Ok(mut totals) = self.realized.write() {
            totals.pnl += delta;
            totals.closed += 1;
            if position.realized_pnl > Decimal::ZERO {
                totals.wins += 1;
            } else if position.realized_pnl < Decimal::ZERO {
                totals.losses += 1;
            }
        }
        Ok(position)
    }

    /// Dollar amount lost if every open position stopped out at its current
    /// stop level. The sizer's risk budget check runs against this.
    pub fn open_risk_value(&self) -> Decimal {
        self.positions
            .iter()
            .filter(|entry| entry.is_open())
            .map(|entry| (entry.avg_price - entry.stop_loss).max(Decimal::ZERO) * entry.quantity)
            .sum()
    }

    pub fn stats(&self) -> BookStats {
        let mut stats = BookStats::default();
        for entry in self.positions.iter() {
            if entry.state == PositionState::Closed {
                continue;
            }
            stats.open_positions += 1;
            stats.market_value += entry.market_value();
            stats.cost_basis += entry.cost_basis();
            stats.unrealized_pnl += entry.unrealized_pnl;
        }
        if let Ok(totals) = self.realized.read() {
            stats.realized_pnl = totals.pnl;
            stats.closed_trades = totals.closed;
            stats.wins = totals.wins;
            stats.losses = totals.losses;
        }
        stats
    }
}
