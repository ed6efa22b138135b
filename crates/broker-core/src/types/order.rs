//! Order types for broker execution.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{Error, Result};

/// Side of the order (buy or sell).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderSide {
    Buy,
    Sell,
}

/// Type of order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderType {
    /// Executes immediately at the best available price.
    Market,
    /// Executes at the limit price or better.
    Limit,
}

/// An order to be submitted through the gateway.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderRequest {
    /// Client-side identifier, assigned at creation.
    pub client_id: Uuid,
    pub symbol: String,
    pub side: OrderSide,
    pub quantity: Decimal,
    pub order_type: OrderType,
    /// Required for limit orders, ignored for market orders.
    pub limit_price: Option<Decimal>,
    pub created_at: DateTime<Utc>,
}

impl OrderRequest {
    pub fn market(symbol: impl Into<String>, side: OrderSide, quantity: Decimal) -> Self {
        Self {
            client_id: Uuid::new_v4(),
            symbol: symbol.into(),
            side,
            quantity,
            order_type: OrderType::Market,
            limit_price: None,
            created_at: Utc::now(),
        }
    }

    pub fn limit(
        symbol: impl Into<String>,
        side: OrderSide,
        quantity: Decimal,
        limit_price: Decimal,
    ) -> Self {
        Self {
            client_id: Uuid::new_v4(),
            symbol: symbol.into(),
            side,
            quantity,
            order_type: OrderType::Limit,
            limit_price: Some(limit_price),
            created_at: Utc::now(),
        }
    }

    /// Reject malformed orders before any network call is made.
    pub fn validate(&self) -> Result<()> {
        if self.symbol.trim().is_empty() {
            return Err(Error::Validation("order symbol is empty".to_string()));
        }
        if self.quantity <= Decimal::ZERO {
            return Err(Error::Validation(format!(
                "order quantity must be positive, got {}",
                self.quantity
            )));
        }
        match (self.order_type, self.limit_price) {
            (OrderType::Limit, None) => Err(Error::Validation(
                "limit order is missing a limit price".to_string(),
            )),
            (OrderType::Limit, Some(price)) if price <= Decimal::ZERO => Err(Error::Validation(
                format!("limit price must be positive, got {}", price),
            )),
            _ => Ok(()),
        }
    }

    pub fn notional(&self, reference_price: Decimal) -> Decimal {
        let price = self.limit_price.unwrap_or(reference_price);
        self.quantity * price
    }
}

/// Confirmation returned by the gateway for an accepted order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderReceipt {
    /// Broker-assigned order identifier.
    pub order_id: String,
    pub symbol: String,
    pub side: OrderSide,
    pub quantity: Decimal,
    pub fill_price: Decimal,
    pub filled_at: DateTime<Utc>,
}

/// Account snapshot returned by the gateway.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountBalance {
    pub total_equity: Decimal,
    pub cash: Decimal,
    pub open_positions: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_market_order_validates() {
        let order = OrderRequest::market("AAPL", OrderSide::Buy, Decimal::new(10, 0));
        assert!(order.validate().is_ok());
    }

    #[test]
    fn test_empty_symbol_rejected() {
        let order = OrderRequest::market("  ", OrderSide::Buy, Decimal::new(10, 0));
        assert!(matches!(order.validate(), Err(Error::Validation(_))));
    }

    #[test]
    fn test_non_positive_quantity_rejected() {
        let order = OrderRequest::market("AAPL", OrderSide::Sell, Decimal::ZERO);
        assert!(matches!(order.validate(), Err(Error::Validation(_))));

        let order = OrderRequest::market("AAPL", OrderSide::Sell, Decimal::new(-5, 0));
        assert!(order.validate().is_err());
    }

    #[test]
    fn test_limit_order_requires_price() {
        let mut order = OrderRequest::limit(
            "MSFT",
            OrderSide::Buy,
            Decimal::new(5, 0),
            Decimal::new(400, 0),
        );
        assert!(order.validate().is_ok());

        order.limit_price = None;
        assert!(order.validate().is_err());

        order.limit_price = Some(Decimal::ZERO);
        assert!(order.validate().is_err());
    }

    #[test]
    fn test_notional_uses_limit_price_when_present() {
        let order = OrderRequest::limit(
            "MSFT",
            OrderSide::Buy,
            Decimal::new(5, 0),
            Decimal::new(400, 0),
        );
        // 5 * 400 = 2000 regardless of the reference price
        assert_eq!(order.notional(Decimal::new(390, 0)), Decimal::new(2000, 0));

        let market = OrderRequest::market("MSFT", OrderSide::Buy, Decimal::new(5, 0));
        assert_eq!(market.notional(Decimal::new(390, 0)), Decimal::new(1950, 0));
    }
}
