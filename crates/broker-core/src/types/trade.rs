//! Journal and notification payloads.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::order::OrderSide;

/// Why a trade was placed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TradeReason {
    Entry,
    PartialProfit,
    TakeProfit,
    StopLoss,
    TrailingStop,
    TimeExit,
    RiskReduction,
    Manual,
}

/// One executed trade, as recorded in the journal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeRecord {
    pub id: Uuid,
    pub symbol: String,
    pub side: OrderSide,
    pub quantity: Decimal,
    pub price: Decimal,
    pub reason: TradeReason,
    /// P&L realized by this fill; `None` for entries.
    pub realized_pnl: Option<Decimal>,
    pub executed_at: DateTime<Utc>,
}

impl TradeRecord {
    pub fn new(
        symbol: impl Into<String>,
        side: OrderSide,
        quantity: Decimal,
        price: Decimal,
        reason: TradeReason,
        realized_pnl: Option<Decimal>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            symbol: symbol.into(),
            side,
            quantity,
            price,
            reason,
            realized_pnl,
            executed_at: Utc::now(),
        }
    }
}

/// End-of-day rollup appended to the journal, keyed by date. These records
/// are read back to seed the Kelly calculator's return history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DailySummary {
    pub date: NaiveDate,
    pub realized_pnl: Decimal,
    /// Day P&L as a fraction of starting equity.
    pub return_pct: Decimal,
    pub trades: u32,
    pub wins: u32,
    pub losses: u32,
}

/// Events pushed to the notifier. One-way; the engine never waits on
/// delivery.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum AlertEvent {
    PositionOpened {
        symbol: String,
        quantity: Decimal,
        price: Decimal,
    },
    PositionClosed {
        symbol: String,
        realized_pnl: Decimal,
        reason: TradeReason,
    },
    PartialProfitTaken {
        symbol: String,
        quantity_sold: Decimal,
        price: Decimal,
    },
    BreakerTriggered {
        stage: u8,
        position_reduction: Decimal,
    },
    BreakerReleased,
    DrawdownAlert {
        level: String,
        current_drawdown: Decimal,
    },
    EngineHalted {
        reason: String,
    },
}
