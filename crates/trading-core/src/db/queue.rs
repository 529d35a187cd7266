//! Deferred trade queue rows.

use super::{format_ts, parse_ts, Store};
use crate::Result;
use chrono::{DateTime, Duration, Utc};
use sqlx::Row;

/// A queued trade as stored.
#[derive(Debug, Clone)]
pub struct QueueRow {
    pub id: i64,
    pub symbol: String,
    pub payload: String,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

impl Store {
    /// Persist a payload that expires `ttl_hours` from now.
    pub async fn enqueue_trade(&self, symbol: &str, payload: &str, ttl_hours: i64) -> Result<i64> {
        let now = self.clock.now();
        let result = sqlx::query(
            "INSERT INTO trade_queue (symbol, payload, expires_at, created_at) VALUES (?, ?, ?, ?)",
        )
        .bind(symbol)
        .bind(payload)
        .bind(format_ts(now + Duration::hours(ttl_hours)))
        .bind(format_ts(now))
        .execute(&self.pool)
        .await?;
        Ok(result.last_insert_rowid())
    }

    /// Newest entries first, expired or not.
    pub async fn list_trade_queue(&self) -> Result<Vec<QueueRow>> {
        let rows = sqlx::query(
            "SELECT id, symbol, payload, expires_at, created_at FROM trade_queue \
             ORDER BY created_at DESC, id DESC",
        )
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| -> Result<QueueRow> {
                Ok(QueueRow {
                    id: row.try_get("id")?,
                    symbol: row.try_get("symbol")?,
                    payload: row.try_get("payload")?,
                    expires_at: parse_ts(&row.try_get::<String, _>("expires_at")?)?,
                    created_at: parse_ts(&row.try_get::<String, _>("created_at")?)?,
                })
            })
            .collect()
    }

    /// Delete rows whose expiry has passed; returns how many were removed.
    pub async fn purge_expired_queue(&self) -> Result<u64> {
        let result = sqlx::query("DELETE FROM trade_queue WHERE expires_at < ?")
            .bind(self.now_text())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}
