//! Equity position lifecycle types.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Current state of a position in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PositionState {
    /// Full size held, no profit tranche taken yet.
    Open,
    /// The first profit tranche has been sold; remainder still held.
    PartiallyClosed,
    /// Fully exited. Terminal.
    Closed,
}

/// A long equity position held by the engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    /// Unique identifier for this position.
    pub id: Uuid,
    pub symbol: String,
    /// Shares currently held. Positive while the position is open.
    pub quantity: Decimal,
    /// Average entry price.
    pub avg_price: Decimal,
    /// Latest observed price.
    pub current_price: Decimal,
    /// Active stop level; raised over time when trailing is enabled.
    pub stop_loss: Decimal,
    /// Take-profit target.
    pub target_price: Decimal,
    /// Set once the first profit tranche fires. One-way.
    pub partial_sold: bool,
    /// Current lifecycle state.
    pub state: PositionState,
    pub entry_time: DateTime<Utc>,
    pub exit_time: Option<DateTime<Utc>>,
    /// P&L locked in by partial and full sells.
    pub realized_pnl: Decimal,
    /// P&L of the shares still held, at `current_price`.
    pub unrealized_pnl: Decimal,
    pub last_updated: DateTime<Utc>,
}

impl Position {
    /// Create a freshly filled position.
    ///
    /// Requires `stop_loss < avg_price < target_price` and a positive
    /// quantity; anything else is a sizing or stop computation bug upstream.
    pub fn open(
        symbol: String,
        quantity: Decimal,
        avg_price: Decimal,
        stop_loss: Decimal,
        target_price: Decimal,
    ) -> std::result::Result<Self, String> {
        if quantity <= Decimal::ZERO {
            return Err(format!("position quantity must be positive, got {quantity}"));
        }
        if !(stop_loss < avg_price && avg_price < target_price) {
            return Err(format!(
                "expected stop < entry < target, got {stop_loss} / {avg_price} / {target_price}"
            ));
        }
        let now = Utc::now();
        Ok(Self {
            id: Uuid::new_v4(),
            symbol,
            quantity,
            avg_price,
            current_price: avg_price,
            stop_loss,
            target_price,
            partial_sold: false,
            state: PositionState::Open,
            entry_time: now,
            exit_time: None,
            realized_pnl: Decimal::ZERO,
            unrealized_pnl: Decimal::ZERO,
            last_updated: now,
        })
    }

    /// Refresh the mark price and recompute unrealized P&L.
    pub fn update_price(&mut self, price: Decimal) {
        self.current_price = price;
        self.unrealized_pnl = (price - self.avg_price) * self.quantity;
        self.last_updated = Utc::now();
    }

    /// Fractional gain/loss versus entry, e.g. 0.05 = +5%.
    pub fn unrealized_return(&self) -> Decimal {
        if self.avg_price.is_zero() {
            return Decimal::ZERO;
        }
        (self.current_price - self.avg_price) / self.avg_price
    }

    /// Value of the shares still held, at the current price.
    pub fn market_value(&self) -> Decimal {
        self.quantity * self.current_price
    }

    pub fn cost_basis(&self) -> Decimal {
        self.quantity * self.avg_price
    }

    /// Raise the stop level. Lowering is ignored: stops only move in the
    /// profit-protecting direction.
    pub fn raise_stop(&mut self, new_stop: Decimal) {
        if new_stop > self.stop_loss {
            self.stop_loss = new_stop;
            self.last_updated = Utc::now();
        }
    }

    /// Sell part of the position, locking in P&L on the sold shares.
    /// Only valid while open, and only for less than the full quantity.
    pub fn apply_partial_sale(
        &mut self,
        quantity_sold: Decimal,
        price: Decimal,
    ) -> std::result::Result<(), String> {
        if self.state == PositionState::Closed {
            return Err("cannot partially sell a closed position".to_string());
        }
        if quantity_sold <= Decimal::ZERO || quantity_sold >= self.quantity {
            return Err(format!(
                "partial sale quantity {} out of range (held {})",
                quantity_sold, self.quantity
            ));
        }
        self.realized_pnl += (price - self.avg_price) * quantity_sold;
        self.quantity -= quantity_sold;
        self.current_price = price;
        self.unrealized_pnl = (price - self.avg_price) * self.quantity;
        self.partial_sold = true;
        self.state = PositionState::PartiallyClosed;
        self.last_updated = Utc::now();
        Ok(())
    }

    /// Sell all remaining shares and mark the position terminal.
    pub fn close(&mut self, price: Decimal) -> std::result::Result<(), String> {
        if self.state == PositionState::Closed {
            return Err("position is already closed".to_string());
        }
        self.realized_pnl += (price - self.avg_price) * self.quantity;
        self.quantity = Decimal::ZERO;
        self.current_price = price;
        self.unrealized_pnl = Decimal::ZERO;
        self.state = PositionState::Closed;
        let now = Utc::now();
        self.exit_time = Some(now);
        self.last_updated = now;
        Ok(())
    }

    /// Check if the position still holds shares.
    pub fn is_open(&self) -> bool {
        matches!(
            self.state,
            PositionState::Open | PositionState::PartiallyClosed
        )
    }
}
