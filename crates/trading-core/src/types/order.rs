//! Order types for trading execution.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Side of the order (buy or sell).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderSide {
    Buy,
    Sell,
}

impl OrderSide {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderSide::Buy => "buy",
            OrderSide::Sell => "sell",
        }
    }
}

impl fmt::Display for OrderSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Type of order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderType {
    #[default]
    Market,
    Limit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeInForce {
    #[default]
    Day,
    Gtc,
}

/// Broker-side status of an order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    New,
    Accepted,
    Pending,
    PartiallyFilled,
    Filled,
    Canceled,
    Rejected,
    Expired,
    /// Short-circuited locally; never reached the broker.
    Blocked,
    Unknown,
}

impl OrderStatus {
    /// Map a broker status string onto the local lifecycle.
    pub fn from_broker(raw: &str) -> Self {
        match raw.to_ascii_lowercase().as_str() {
            "new" => OrderStatus::New,
            "accepted" | "accepted_for_bidding" => OrderStatus::Accepted,
            "pending" | "pending_new" | "pending_replace" => OrderStatus::Pending,
            "partially_filled" => OrderStatus::PartiallyFilled,
            "filled" => OrderStatus::Filled,
            "canceled" | "cancelled" | "pending_cancel" => OrderStatus::Canceled,
            "rejected" => OrderStatus::Rejected,
            "expired" | "done_for_day" => OrderStatus::Expired,
            "blocked" => OrderStatus::Blocked,
            _ => OrderStatus::Unknown,
        }
    }

    /// Still resting at the broker with nothing filled.
    pub fn is_unfilled_open(&self) -> bool {
        matches!(
            self,
            OrderStatus::New | OrderStatus::Accepted | OrderStatus::Pending
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::New => "new",
            OrderStatus::Accepted => "accepted",
            OrderStatus::Pending => "pending",
            OrderStatus::PartiallyFilled => "partially_filled",
            OrderStatus::Filled => "filled",
            OrderStatus::Canceled => "canceled",
            OrderStatus::Rejected => "rejected",
            OrderStatus::Expired => "expired",
            OrderStatus::Blocked => "blocked",
            OrderStatus::Unknown => "unknown",
        }
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An order as submitted to the broker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderRequest {
    pub symbol: String,
    pub side: OrderSide,
    pub quantity: u64,
    pub order_type: OrderType,
    pub limit_price: Option<Decimal>,
    pub time_in_force: TimeInForce,
    /// Deduplication token; also sent as the broker's client order id.
    pub idempotency_key: Option<String>,
    pub stop_loss: Option<Decimal>,
    pub take_profit: Option<Decimal>,
}

impl OrderRequest {
    pub fn market(symbol: impl Into<String>, side: OrderSide, quantity: u64) -> Self {
        Self {
            symbol: symbol.into(),
            side,
            quantity,
            order_type: OrderType::Market,
            limit_price: None,
            time_in_force: TimeInForce::Day,
            idempotency_key: None,
            stop_loss: None,
            take_profit: None,
        }
    }

    pub fn limit(symbol: impl Into<String>, side: OrderSide, quantity: u64, price: Decimal) -> Self {
        Self {
            order_type: OrderType::Limit,
            limit_price: Some(price),
            ..Self::market(symbol, side, quantity)
        }
    }

    pub fn with_bracket(mut self, stop_loss: Decimal, take_profit: Decimal) -> Self {
        self.stop_loss = Some(stop_loss);
        self.take_profit = Some(take_profit);
        self
    }

    pub fn with_idempotency_key(mut self, key: impl Into<String>) -> Self {
        self.idempotency_key = Some(key.into());
        self
    }

    pub fn is_bracket(&self) -> bool {
        self.stop_loss.is_some() && self.take_profit.is_some()
    }
}

/// Raw broker response to a submission.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderResult {
    pub order_id: String,
    pub symbol: String,
    pub status: OrderStatus,
    pub filled_qty: u64,
    pub average_fill_price: Option<Decimal>,
    #[serde(default)]
    pub raw: HashMap<String, String>,
}

/// Locally tracked outcome of a submission.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionReport {
    pub order_id: String,
    pub symbol: String,
    pub side: OrderSide,
    pub status: OrderStatus,
    pub requested_qty: u64,
    pub filled_qty: u64,
    pub average_fill_price: Option<Decimal>,
    pub idempotency_key: Option<String>,
    pub error_message: Option<String>,
    pub reported_at: DateTime<Utc>,
}

impl ExecutionReport {
    pub fn from_result(request: &OrderRequest, result: OrderResult, now: DateTime<Utc>) -> Self {
        Self {
            order_id: result.order_id,
            symbol: result.symbol,
            side: request.side,
            status: result.status,
            requested_qty: request.quantity,
            filled_qty: result.filled_qty,
            average_fill_price: result.average_fill_price,
            idempotency_key: request.idempotency_key.clone(),
            error_message: None,
            reported_at: now,
        }
    }

    pub fn blocked(request: &OrderRequest, reason: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            order_id: "blocked-mock".to_string(),
            symbol: request.symbol.clone(),
            side: request.side,
            status: OrderStatus::Blocked,
            requested_qty: request.quantity,
            filled_qty: 0,
            average_fill_price: None,
            idempotency_key: request.idempotency_key.clone(),
            error_message: Some(reason.into()),
            reported_at: now,
        }
    }

    /// Reached the broker and was not refused.
    pub fn is_accepted(&self) -> bool {
        !matches!(
            self.status,
            OrderStatus::Blocked | OrderStatus::Rejected | OrderStatus::Canceled | OrderStatus::Expired
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_from_broker() {
        assert_eq!(OrderStatus::from_broker("pending_new"), OrderStatus::Pending);
        assert_eq!(OrderStatus::from_broker("FILLED"), OrderStatus::Filled);
        assert_eq!(OrderStatus::from_broker("cancelled"), OrderStatus::Canceled);
        assert_eq!(OrderStatus::from_broker("held"), OrderStatus::Unknown);
        assert!(OrderStatus::Accepted.is_unfilled_open());
        assert!(!OrderStatus::PartiallyFilled.is_unfilled_open());
    }

    #[test]
    fn test_limit_order_builder() {
        let order = OrderRequest::limit("AAPL", OrderSide::Buy, 10, Decimal::new(150, 0))
            .with_idempotency_key("cycle-1-AAPL");
        assert_eq!(order.order_type, OrderType::Limit);
        assert_eq!(order.limit_price, Some(Decimal::new(150, 0)));
        assert_eq!(order.idempotency_key.as_deref(), Some("cycle-1-AAPL"));
        assert!(!order.is_bracket());
    }
}
