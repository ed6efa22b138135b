//! Market data types: quotes and OHLCV history.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// A point-in-time quote for one symbol.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Quote {
    pub symbol: String,
    /// Last traded price.
    pub price: Decimal,
    pub bid: Option<Decimal>,
    pub ask: Option<Decimal>,
    pub volume: Option<Decimal>,
    pub as_of: DateTime<Utc>,
}

impl Quote {
    /// Mid price when both sides are quoted, otherwise the last price.
    pub fn mid(&self) -> Decimal {
        match (self.bid, self.ask) {
            (Some(bid), Some(ask)) => (bid + ask) / Decimal::TWO,
            _ => self.price,
        }
    }
}

/// One OHLCV bar of price history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Candle {
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    pub volume: Decimal,
    pub timestamp: DateTime<Utc>,
}

impl Candle {
    /// Bar range (high − low). Always non-negative for well-formed data.
    pub fn range(&self) -> Decimal {
        self.high - self.low
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quote_mid_prefers_bid_ask() {
        let quote = Quote {
            symbol: "AAPL".to_string(),
            price: Decimal::new(1000, 1), // 100.0
            bid: Some(Decimal::new(999, 1)),
            ask: Some(Decimal::new(1001, 1)),
            volume: None,
            as_of: Utc::now(),
        };
        // (99.9 + 100.1) / 2 = 100.0
        assert_eq!(quote.mid(), Decimal::new(1000, 1));
    }

    #[test]
    fn test_quote_mid_falls_back_to_last() {
        let quote = Quote {
            symbol: "AAPL".to_string(),
            price: Decimal::new(1000, 1),
            bid: None,
            ask: Some(Decimal::new(1001, 1)),
            volume: None,
            as_of: Utc::now(),
        };
        assert_eq!(quote.mid(), Decimal::new(1000, 1));
    }
}
