//! Deferred entries waiting for funding.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use trading_core::{Error, Result, Store};

/// A queued entry as returned to callers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueuedTrade {
    pub id: i64,
    pub symbol: String,
    pub payload: serde_json::Value,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    /// Recomputed at read time.
    pub expired: bool,
}

/// Store-backed queue with a fixed time to live.
#[derive(Clone)]
pub struct TradeQueue {
    store: Store,
    ttl_hours: i64,
}

impl TradeQueue {
    pub fn new(store: Store, ttl_hours: i64) -> Self {
        Self { store, ttl_hours }
    }

    pub async fn enqueue(&self, symbol: &str, payload: &serde_json::Value) -> Result<i64> {
        let id = self
            .store
            .enqueue_trade(symbol, &payload.to_string(), self.ttl_hours)
            .await?;
        info!(id, symbol, ttl_hours = self.ttl_hours, "Trade queued");
        Ok(id)
    }

    /// Purge expired rows, then return what is left.
    pub async fn list_active(&self) -> Result<Vec<QueuedTrade>> {
        let purged = self.store.purge_expired_queue().await?;
        if purged > 0 {
            debug!(purged, "Expired queued trades removed");
        }
        let now = self.store.clock().now();
        self.store
            .list_trade_queue()
            .await?
            .into_iter()
            .map(|row| -> Result<QueuedTrade> {
                let payload = serde_json::from_str(&row.payload)
                    .map_err(|e| Error::Corrupt(format!("queue payload {}: {e}", row.id)))?;
                Ok(QueuedTrade {
                    id: row.id,
                    symbol: row.symbol,
                    payload,
                    expired: row.expires_at < now,
                    expires_at: row.expires_at,
                    created_at: row.created_at,
                })
            })
            .collect()
    }
}
