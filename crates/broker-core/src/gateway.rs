//! Abstract collaborator contracts.
//!
//! Everything the engine consumes from the outside world goes through these
//! traits: market data, order execution, regime detection, candidate
//! screening, journaling, and notification. Implementations own their
//! transport, auth, and timeouts; a call that exceeds its budget must return
//! an error rather than hang.

use async_trait::async_trait;
use rust_decimal::Decimal;

use crate::types::{
    AccountBalance, AlertEvent, Candle, DailySummary, OrderReceipt, OrderRequest, Quote,
    RegimeReading, TradeCandidate, TradeRecord,
};
use crate::Result;

/// Quote and OHLCV history provider.
#[async_trait]
pub trait MarketDataClient: Send + Sync {
    /// Latest quote for one symbol.
    async fn current_price(&self, symbol: &str) -> Result<Quote>;

    /// Daily OHLCV bars, oldest first, covering up to `days` trading days.
    async fn ohlcv(&self, symbol: &str, days: u32) -> Result<Vec<Candle>>;
}

/// Order placement and account state.
///
/// A broker-side rejection (the "success: false" case) surfaces as
/// [`crate::Error::Gateway`]; `Ok` always carries a usable receipt.
#[async_trait]
pub trait OrderGateway: Send + Sync {
    async fn place_order(&self, request: &OrderRequest) -> Result<OrderReceipt>;

    async fn balance(&self) -> Result<AccountBalance>;
}

/// Optional market-regime detector. When absent, sizing simply skips the
/// regime adjustment.
#[async_trait]
pub trait RegimeSource: Send + Sync {
    async fn detect_regime(&self) -> Result<RegimeReading>;
}

/// Daily entry-candidate screener. Returns candidates ranked best-first.
#[async_trait]
pub trait CandidateSource: Send + Sync {
    async fn ranked_candidates(&self) -> Result<Vec<TradeCandidate>>;
}

/// Append-only trade journal. Also serves the historical daily returns that
/// seed Kelly sizing; the storage format is the implementation's business.
#[async_trait]
pub trait TradeJournal: Send + Sync {
    async fn record_trade(&self, record: &TradeRecord) -> Result<()>;

    async fn record_daily_summary(&self, summary: &DailySummary) -> Result<()>;

    /// Most recent daily returns, oldest first, at most `limit` entries.
    async fn daily_returns(&self, limit: u32) -> Result<Vec<Decimal>>;
}

/// One-way alert sink.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, event: &AlertEvent) -> Result<()>;
}
