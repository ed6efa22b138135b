//! Paper-trading implementations of the gateway traits.
//!
//! `PaperGateway` is a scriptable in-memory brokerage: quotes and candles
//! are set by the caller, orders fill instantly at the current price, and
//! cash and holdings are tracked so `balance()` reports a real equity curve.
//! `MemoryJournal`, `LogNotifier`, `StaticCandidates`, and `FixedRegime`
//! complete the kit. The engine runs against these by default; live trading
//! swaps in real implementations behind the same traits.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::RwLock;

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use rust_decimal::Decimal;
use tracing::{debug, info, warn};

use broker_core::gateway::{
    CandidateSource, MarketDataClient, Notifier, OrderGateway, RegimeSource, TradeJournal,
};
use broker_core::types::{
    AccountBalance, AlertEvent, Candle, DailySummary, MarketRegime, OrderReceipt, OrderRequest,
    OrderSide, OrderType, Quote, RegimeReading, TradeCandidate, TradeRecord,
};
use broker_core::{Error, Result};

/// Simulated brokerage and market-data feed.
#[derive(Debug)]
pub struct PaperGateway {
    prices: DashMap<String, Decimal>,
    candles: DashMap<String, Vec<Candle>>,
    cash: RwLock<Decimal>,
    /// Shares held per symbol, updated on every fill.
    holdings: DashMap<String, Decimal>,
    /// Orders left to reject before filling normally again.
    fail_orders: AtomicU32,
}

impl PaperGateway {
    pub fn new(starting_cash: Decimal) -> Self {
        Self {
            prices: DashMap::new(),
            candles: DashMap::new(),
            cash: RwLock::new(starting_cash),
            holdings: DashMap::new(),
            fail_orders: AtomicU32::new(0),
        }
    }

    /// Script the current price for a symbol.
    pub fn set_price(&self, symbol: &str, price: Decimal) {
        self.prices.insert(symbol.to_string(), price);
    }

    /// Script the OHLCV history for a symbol, oldest first.
    pub fn set_candles(&self, symbol: &str, candles: Vec<Candle>) {
        self.candles.insert(symbol.to_string(), candles);
    }

    /// Overwrite the cash balance, e.g. to simulate an external drawdown.
    pub fn set_cash(&self, cash: Decimal) {
        if let Ok(mut current) = self.cash.write() {
            *current = cash;
        }
    }

    /// Reject the next `n` orders with a gateway error.
    pub fn fail_next_orders(&self, n: u32) {
        self.fail_orders.store(n, Ordering::SeqCst);
    }

    /// Shares currently held in a symbol.
    pub fn held(&self, symbol: &str) -> Decimal {
        self.holdings
            .get(symbol)
            .map(|qty| *qty)
            .unwrap_or(Decimal::ZERO)
    }

    fn price_of(&self, symbol: &str) -> Result<Decimal> {
        self.prices
            .get(symbol)
            .map(|price| *price)
            .ok_or_else(|| Error::Gateway {
                message: format!("no paper price for {symbol}"),
            })
    }

    fn take_failure(&self) -> bool {
        self.fail_orders
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[async_trait]
impl MarketDataClient for PaperGateway {
    async fn current_price(&self, symbol: &str) -> Result<Quote> {
        let price = self.price_of(symbol)?;
        Ok(Quote {
            symbol: symbol.to_string(),
            price,
            bid: None,
            ask: None,
            volume: None,
            as_of: Utc::now(),
        })
    }

    async fn ohlcv(&self, symbol: &str, days: u32) -> Result<Vec<Candle>> {
        let candles = self
            .candles
            .get(symbol)
            .ok_or_else(|| Error::InsufficientData(format!("no paper candles for {symbol}")))?;
        let skip = candles.len().saturating_sub(days as usize);
        Ok(candles[skip..].to_vec())
    }
}

#[async_trait]
impl OrderGateway for PaperGateway {
    async fn place_order(&self, request: &OrderRequest) -> Result<OrderReceipt> {
        if self.take_failure() {
            return Err(Error::Gateway {
                message: "simulated gateway failure".to_string(),
            });
        }
        request.validate()?;

        let fill_price = match request.order_type {
            OrderType::Market => self.price_of(&request.symbol)?,
            OrderType::Limit => request.limit_price.ok_or_else(|| {
                Error::Validation("limit order without a limit price".to_string())
            })?,
        };
        let notional = request.quantity * fill_price;

        match request.side {
            OrderSide::Buy => {
                let mut cash = self.cash.write().map_err(|_| Error::Gateway {
                    message: "paper cash lock poisoned".to_string(),
                })?;
                if notional > *cash {
                    return Err(Error::Gateway {
                        message: format!(
                            "insufficient paper cash: need {notional}, have {cash}",
                            cash = *cash
                        ),
                    });
                }
                *cash -= notional;
                *self
                    .holdings
                    .entry(request.symbol.clone())
                    .or_insert(Decimal::ZERO) += request.quantity;
            }
            OrderSide::Sell => {
                let held = self.held(&request.symbol);
                if request.quantity > held {
                    return Err(Error::Gateway {
                        message: format!(
                            "insufficient paper holdings in {}: selling {}, have {held}",
                            request.symbol, request.quantity
                        ),
                    });
                }
                let remaining = held - request.quantity;
                if remaining.is_zero() {
                    self.holdings.remove(&request.symbol);
                } else {
                    self.holdings.insert(request.symbol.clone(), remaining);
                }
                let mut cash = self.cash.write().map_err(|_| Error::Gateway {
                    message: "paper cash lock poisoned".to_string(),
                })?;
                *cash += notional;
            }
        }

        info!(
            symbol = %request.symbol,
            side = ?request.side,
            quantity = %request.quantity,
            price = %fill_price,
            "[PAPER] order filled"
        );

        Ok(OrderReceipt {
            order_id: format!("paper-{}", request.client_id),
            symbol: request.symbol.clone(),
            side: request.side,
            quantity: request.quantity,
            fill_price,
            filled_at: Utc::now(),
        })
    }

    async fn balance(&self) -> Result<AccountBalance> {
        let cash = *self.cash.read().map_err(|_| Error::Gateway {
            message: "paper cash lock poisoned".to_string(),
        })?;
        let mut holdings_value = Decimal::ZERO;
        for entry in self.holdings.iter() {
            match self.price_of(entry.key()) {
                Ok(price) => holdings_value += *entry.value() * price,
                Err(_) => {
                    warn!(symbol = %entry.key(), "held symbol has no paper price, valuing at zero");
                }
            }
        }
        Ok(AccountBalance {
            total_equity: cash + holdings_value,
            cash,
            open_positions: self.holdings.len() as u32,
        })
    }
}

/// Journal backed by plain vectors. Everything is retained for inspection.
#[derive(Debug, Default)]
pub struct MemoryJournal {
    trades: RwLock<Vec<TradeRecord>>,
    summaries: RwLock<Vec<DailySummary>>,
}

impl MemoryJournal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn trades(&self) -> Vec<TradeRecord> {
        self.trades.read().map(|t| t.clone()).unwrap_or_default()
    }

    pub fn summaries(&self) -> Vec<DailySummary> {
        self.summaries.read().map(|s| s.clone()).unwrap_or_default()
    }

    /// Backfill synthetic daily summaries, one per return, dated backwards
    /// from yesterday. Used to seed the Kelly calculator's history.
    pub fn seed_daily_returns(&self, returns: &[Decimal]) {
        if let Ok(mut summaries) = self.summaries.write() {
            let today = Utc::now().date_naive();
            for (i, ret) in returns.iter().enumerate() {
                let age = (returns.len() - i) as i64;
                summaries.push(DailySummary {
                    date: today - chrono::Duration::days(age),
                    realized_pnl: Decimal::ZERO,
                    return_pct: *ret,
                    trades: 1,
                    wins: u32::from(*ret > Decimal::ZERO),
                    losses: u32::from(*ret < Decimal::ZERO),
                });
            }
        }
    }
}

#[async_trait]
impl TradeJournal for MemoryJournal {
    async fn record_trade(&self, record: &TradeRecord) -> Result<()> {
        let mut trades = self.trades.write().map_err(|_| Error::Gateway {
            message: "journal lock poisoned".to_string(),
        })?;
        debug!(symbol = %record.symbol, reason = ?record.reason, "journaled trade");
        trades.push(record.clone());
        Ok(())
    }

    async fn record_daily_summary(&self, summary: &DailySummary) -> Result<()> {
        let mut summaries = self.summaries.write().map_err(|_| Error::Gateway {
            message: "journal lock poisoned".to_string(),
        })?;
        summaries.push(summary.clone());
        Ok(())
    }

    async fn daily_returns(&self, limit: u32) -> Result<Vec<Decimal>> {
        let summaries = self.summaries.read().map_err(|_| Error::Gateway {
            message: "journal lock poisoned".to_string(),
        })?;
        let skip = summaries.len().saturating_sub(limit as usize);
        Ok(summaries[skip..].iter().map(|s| s.return_pct).collect())
    }
}

/// Notifier that writes alerts to the log as JSON.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, event: &AlertEvent) -> Result<()> {
        let payload = serde_json::to_string(event)?;
        info!(event = %payload, "alert");
        Ok(())
    }
}

/// Candidate source returning a fixed, pre-ranked list.
#[derive(Debug, Default)]
pub struct StaticCandidates {
    candidates: RwLock<Vec<TradeCandidate>>,
}

impl StaticCandidates {
    pub fn new(candidates: Vec<TradeCandidate>) -> Self {
        Self {
            candidates: RwLock::new(candidates),
        }
    }

    pub fn set(&self, candidates: Vec<TradeCandidate>) {
        if let Ok(mut current) = self.candidates.write() {
            *current = candidates;
        }
    }
}

#[async_trait]
impl CandidateSource for StaticCandidates {
    async fn ranked_candidates(&self) -> Result<Vec<TradeCandidate>> {
        self.candidates
            .read()
            .map(|c| c.clone())
            .map_err(|_| Error::Gateway {
                message: "candidate lock poisoned".to_string(),
            })
    }
}

/// Regime source that always reports the same regime.
#[derive(Debug, Clone, Copy)]
pub struct FixedRegime(pub MarketRegime);

#[async_trait]
impl RegimeSource for FixedRegime {
    async fn detect_regime(&self) -> Result<RegimeReading> {
        Ok(RegimeReading {
            regime: self.0,
            confidence: 1.0,
            as_of: Utc::now(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create_test_gateway() -> PaperGateway {
        let gateway = PaperGateway::new(Decimal::new(100_000, 0));
        gateway.set_price("AAPL", Decimal::new(200, 0));
        gateway
    }

    #[tokio::test]
    async fn test_buy_then_sell_round_trips_cash() {
        let gateway = create_test_gateway();
        let buy = OrderRequest::market("AAPL", OrderSide::Buy, Decimal::new(100, 0));
        let receipt = gateway.place_order(&buy).await.unwrap();
        assert_eq!(receipt.fill_price, Decimal::new(200, 0));
        assert_eq!(gateway.held("AAPL"), Decimal::new(100, 0));

        let balance = gateway.balance().await.unwrap();
        assert_eq!(balance.cash, Decimal::new(80_000, 0));
        // Equity unchanged: cash down, holdings up
        assert_eq!(balance.total_equity, Decimal::new(100_000, 0));

        gateway.set_price("AAPL", Decimal::new(210, 0));
        let sell = OrderRequest::market("AAPL", OrderSide::Sell, Decimal::new(100, 0));
        gateway.place_order(&sell).await.unwrap();

        let balance = gateway.balance().await.unwrap();
        assert_eq!(balance.cash, Decimal::new(101_000, 0));
        assert_eq!(balance.open_positions, 0);
    }

    #[tokio::test]
    async fn test_rejects_overdraft_and_overselling() {
        let gateway = PaperGateway::new(Decimal::new(1_000, 0));
        gateway.set_price("AAPL", Decimal::new(200, 0));

        let buy = OrderRequest::market("AAPL", OrderSide::Buy, Decimal::new(100, 0));
        assert!(matches!(
            gateway.place_order(&buy).await.unwrap_err(),
            Error::Gateway { .. }
        ));

        let sell = OrderRequest::market("AAPL", OrderSide::Sell, Decimal::ONE);
        assert!(gateway.place_order(&sell).await.is_err());
    }

    #[tokio::test]
    async fn test_scripted_failures_then_recovery() {
        let gateway = create_test_gateway();
        gateway.fail_next_orders(2);

        let buy = OrderRequest::market("AAPL", OrderSide::Buy, Decimal::ONE);
        assert!(gateway.place_order(&buy).await.is_err());
        assert!(gateway.place_order(&buy).await.is_err());
        assert!(gateway.place_order(&buy).await.is_ok());
    }

    #[tokio::test]
    async fn test_ohlcv_limits_to_requested_days() {
        let gateway = create_test_gateway();
        let candles: Vec<Candle> = (0..30i64)
            .map(|i| Candle {
                open: Decimal::new(100, 0),
                high: Decimal::new(101, 0),
                low: Decimal::new(99, 0),
                close: Decimal::new(100 + i, 0),
                volume: Decimal::new(1_000_000, 0),
                timestamp: Utc::now() - chrono::Duration::days(30 - i),
            })
            .collect();
        gateway.set_candles("AAPL", candles);

        let recent = gateway.ohlcv("AAPL", 10).await.unwrap();
        assert_eq!(recent.len(), 10);
        assert_eq!(recent.last().unwrap().close, Decimal::new(129, 0));

        assert!(matches!(
            gateway.ohlcv("MSFT", 10).await.unwrap_err(),
            Error::InsufficientData(_)
        ));
    }

    #[tokio::test]
    async fn test_journal_returns_most_recent_in_order() {
        let journal = MemoryJournal::new();
        journal.seed_daily_returns(&[
            Decimal::new(1, 2),
            Decimal::new(-2, 2),
            Decimal::new(3, 2),
        ]);

        let returns = journal.daily_returns(2).await.unwrap();
        assert_eq!(returns, vec![Decimal::new(-2, 2), Decimal::new(3, 2)]);

        let all = journal.daily_returns(50).await.unwrap();
        assert_eq!(all.len(), 3);
    }
}
