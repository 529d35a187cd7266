//! Account, portfolio, and persisted trade types.

use chrono::{DateTime, Utc};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::OrderSide;

/// Broker account summary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Account {
    pub cash: Decimal,
    /// Total portfolio value; falls back to cash when the broker omits it.
    pub portfolio_value: Option<Decimal>,
    pub buying_power: Option<Decimal>,
    pub positions: usize,
}

/// An open position held at the broker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BrokerPosition {
    pub symbol: String,
    pub qty: Decimal,
    pub market_value: Decimal,
    pub avg_entry_price: Decimal,
}

/// Point-in-time view of cash and equity, rebuilt every cycle.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PortfolioSnapshot {
    pub cash: Decimal,
    pub equity: Decimal,
    pub open_positions: usize,
}

impl PortfolioSnapshot {
    pub fn from_account(account: &Account) -> Self {
        Self {
            cash: account.cash,
            equity: account.portfolio_value.unwrap_or(account.cash),
            open_positions: account.positions,
        }
    }

    /// Fraction of equity held as cash.
    pub fn cash_ratio(&self) -> f64 {
        if self.equity <= Decimal::ZERO {
            return 0.0;
        }
        (self.cash / self.equity).to_f64().unwrap_or(0.0)
    }

    /// Fraction of equity deployed in positions.
    pub fn exposure(&self) -> f64 {
        if self.equity <= Decimal::ZERO {
            return 0.0;
        }
        1.0 - self.cash_ratio()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TradeStatus {
    Open,
    Closed,
}

impl TradeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TradeStatus::Open => "open",
            TradeStatus::Closed => "closed",
        }
    }
}

/// A persisted trade.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trade {
    pub id: i64,
    pub symbol: String,
    pub side: OrderSide,
    pub quantity: u64,
    pub entry: Decimal,
    pub stop: Decimal,
    pub take_profit: Decimal,
    pub status: TradeStatus,
    pub opened_at: DateTime<Utc>,
    pub closed_at: Option<DateTime<Utc>>,
    pub exit_price: Option<Decimal>,
    pub exit_reason: Option<String>,
}

impl Trade {
    pub fn is_open(&self) -> bool {
        self.status == TradeStatus::Open
    }

    /// Whole days elapsed since the trade opened.
    pub fn days_held(&self, now: DateTime<Utc>) -> i64 {
        (now - self.opened_at).num_days()
    }

    /// Realized P&L if closed at `exit`.
    pub fn pnl_at(&self, exit: Decimal) -> Decimal {
        let qty = Decimal::from(self.quantity);
        match self.side {
            OrderSide::Buy => (exit - self.entry) * qty,
            OrderSide::Sell => (self.entry - exit) * qty,
        }
    }
}

/// Fields required to open a trade.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewTrade {
    pub symbol: String,
    pub side: OrderSide,
    pub quantity: u64,
    pub entry: Decimal,
    pub stop: Decimal,
    pub take_profit: Decimal,
}
