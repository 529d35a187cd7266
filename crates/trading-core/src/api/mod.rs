//! Broker and market-data capabilities.

pub mod alpaca;
pub mod cache;
pub mod mock;

pub use alpaca::AlpacaClient;
pub use cache::CachedMarketData;
pub use mock::MockBroker;

use crate::types::{Account, Bar, BrokerPosition, OrderRequest, OrderResult};
use crate::Result;

/// Order routing and account access at a brokerage.
#[async_trait::async_trait]
pub trait Broker: Send + Sync {
    async fn get_account(&self) -> Result<Account>;

    async fn list_positions(&self) -> Result<Vec<BrokerPosition>>;

    async fn submit_order(&self, request: &OrderRequest) -> Result<OrderResult>;

    async fn cancel_order(&self, order_id: &str) -> Result<()>;

    /// Whether this broker is an in-process simulation.
    fn is_mock(&self) -> bool {
        false
    }
}

/// Historical daily bars.
#[async_trait::async_trait]
pub trait MarketData: Send + Sync {
    /// Bars in ascending time order, at most `limit` of them.
    async fn get_daily_bars(&self, symbol: &str, limit: usize) -> Result<Vec<Bar>>;
}
