//! Trade and fill persistence.

use super::{parse_decimal, parse_ts, Store};
use crate::types::{NewTrade, OrderSide, Trade, TradeStatus};
use crate::{Error, Result};
use rust_decimal::Decimal;
use sqlx::sqlite::SqliteRow;
use sqlx::Row;

const TRADE_COLUMNS: &str = "id, symbol, side, quantity, entry, stop, take_profit, status, \
                             opened_at, closed_at, exit_price, exit_reason";

impl Store {
    /// Insert an open trade and return its id.
    pub async fn add_trade(&self, trade: &NewTrade) -> Result<i64> {
        let quantity = quantity_param(trade.quantity)?;
        let result = sqlx::query(
            r#"
            INSERT INTO trades (symbol, side, quantity, entry, stop, take_profit, status, opened_at)
            VALUES (?, ?, ?, ?, ?, ?, 'open', ?)
            "#,
        )
        .bind(&trade.symbol)
        .bind(trade.side.as_str())
        .bind(quantity)
        .bind(trade.entry.to_string())
        .bind(trade.stop.to_string())
        .bind(trade.take_profit.to_string())
        .bind(self.now_text())
        .execute(&self.pool)
        .await?;
        Ok(result.last_insert_rowid())
    }

    /// Mark a trade closed. Returns false if it was not open.
    pub async fn close_trade(
        &self,
        trade_id: i64,
        exit_price: Option<Decimal>,
        exit_reason: Option<&str>,
    ) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE trades SET status = 'closed', closed_at = ?, exit_price = ?, exit_reason = ?
            WHERE id = ? AND status = 'open'
            "#,
        )
        .bind(self.now_text())
        .bind(exit_price.map(|p| p.to_string()))
        .bind(exit_reason)
        .bind(trade_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn update_trade_stop(&self, trade_id: i64, new_stop: Decimal) -> Result<()> {
        sqlx::query("UPDATE trades SET stop = ? WHERE id = ? AND status = 'open'")
            .bind(new_stop.to_string())
            .bind(trade_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Open trades, oldest first.
    pub async fn list_open_trades(&self) -> Result<Vec<Trade>> {
        let sql = format!(
            "SELECT {TRADE_COLUMNS} FROM trades WHERE status = 'open' ORDER BY opened_at, id"
        );
        let rows = sqlx::query(&sql).fetch_all(&self.pool).await?;
        rows.iter().map(trade_from_row).collect()
    }

    pub async fn get_trade(&self, trade_id: i64) -> Result<Option<Trade>> {
        let sql = format!("SELECT {TRADE_COLUMNS} FROM trades WHERE id = ?");
        let row = sqlx::query(&sql)
            .bind(trade_id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(trade_from_row).transpose()
    }

    /// Most recent trades first.
    pub async fn list_trades(&self, limit: i64) -> Result<Vec<Trade>> {
        let sql = format!("SELECT {TRADE_COLUMNS} FROM trades ORDER BY opened_at DESC, id DESC LIMIT ?");
        let rows = sqlx::query(&sql).bind(limit).fetch_all(&self.pool).await?;
        rows.iter().map(trade_from_row).collect()
    }

    pub async fn add_fill(
        &self,
        trade_id: Option<i64>,
        order_id: Option<&str>,
        symbol: &str,
        quantity: u64,
        price: Decimal,
    ) -> Result<()> {
        let quantity = quantity_param(quantity)?;
        sqlx::query(
            r#"
            INSERT INTO fills (trade_id, order_id, symbol, quantity, price, filled_at)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(trade_id)
        .bind(order_id)
        .bind(symbol)
        .bind(quantity)
        .bind(price.to_string())
        .bind(self.now_text())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn count_fills(&self, trade_id: i64) -> Result<i64> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM fills WHERE trade_id = ?")
            .bind(trade_id)
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }
}

/// SQLite integers are signed.
#[allow(clippy::result_large_err)]
fn quantity_param(quantity: u64) -> Result<i64> {
    i64::try_from(quantity).map_err(|_| Error::order(format!("quantity {quantity} out of range")))
}

#[allow(clippy::result_large_err)]
fn trade_from_row(row: &SqliteRow) -> Result<Trade> {
    let side = match row.try_get::<String, _>("side")?.as_str() {
        "buy" => OrderSide::Buy,
        "sell" => OrderSide::Sell,
        other => return Err(Error::Corrupt(format!("trade side {other}"))),
    };
    let status = match row.try_get::<String, _>("status")?.as_str() {
        "open" => TradeStatus::Open,
        "closed" => TradeStatus::Closed,
        other => return Err(Error::Corrupt(format!("trade status {other}"))),
    };
    let quantity: i64 = row.try_get("quantity")?;
    Ok(Trade {
        id: row.try_get("id")?,
        symbol: row.try_get("symbol")?,
        side,
        quantity: u64::try_from(quantity)
            .map_err(|_| Error::Corrupt(format!("trade quantity {quantity}")))?,
        entry: parse_decimal(&row.try_get::<String, _>("entry")?)?,
        stop: parse_decimal(&row.try_get::<String, _>("stop")?)?,
        take_profit: parse_decimal(&row.try_get::<String, _>("take_profit")?)?,
        status,
        opened_at: parse_ts(&row.try_get::<String, _>("opened_at")?)?,
        closed_at: row
            .try_get::<Option<String>, _>("closed_at")?
            .as_deref()
            .map(parse_ts)
            .transpose()?,
        exit_price: row
            .try_get::<Option<String>, _>("exit_price")?
            .as_deref()
            .map(parse_decimal)
            .transpose()?,
        exit_reason: row.try_get("exit_reason")?,
    })
}
