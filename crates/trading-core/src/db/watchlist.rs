//! Watchlist persistence.

use super::Store;
use crate::Result;

impl Store {
    /// Symbols in alphabetical order.
    pub async fn get_watchlist(&self) -> Result<Vec<String>> {
        let rows: Vec<(String,)> = sqlx::query_as("SELECT symbol FROM watchlist ORDER BY symbol")
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().map(|(s,)| s).collect())
    }

    /// Replace the whole watchlist in one transaction.
    pub async fn set_watchlist(&self, symbols: &[String]) -> Result<()> {
        let now = self.now_text();
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM watchlist").execute(&mut *tx).await?;
        for symbol in symbols {
            sqlx::query("INSERT OR IGNORE INTO watchlist (symbol, created_at) VALUES (?, ?)")
                .bind(normalize(symbol))
                .bind(&now)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    /// Populate the watchlist only if it is empty.
    pub async fn seed_watchlist(&self, symbols: &[String]) -> Result<bool> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM watchlist")
            .fetch_one(&self.pool)
            .await?;
        if count > 0 {
            return Ok(false);
        }
        self.set_watchlist(symbols).await?;
        Ok(true)
    }

    pub async fn add_to_watchlist(&self, symbol: &str) -> Result<()> {
        sqlx::query("INSERT OR IGNORE INTO watchlist (symbol, created_at) VALUES (?, ?)")
            .bind(normalize(symbol))
            .bind(self.now_text())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn remove_from_watchlist(&self, symbol: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM watchlist WHERE symbol = ?")
            .bind(normalize(symbol))
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}

fn normalize(symbol: &str) -> String {
    symbol.trim().to_ascii_uppercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_watchlist_crud() {
        let store = Store::in_memory().await.unwrap();
        let seeded = store
            .seed_watchlist(&["msft".to_string(), "AAPL".to_string()])
            .await
            .unwrap();
        assert!(seeded);
        assert!(!store.seed_watchlist(&["SPY".to_string()]).await.unwrap());
        assert_eq!(store.get_watchlist().await.unwrap(), vec!["AAPL", "MSFT"]);

        store.add_to_watchlist("nvda").await.unwrap();
        assert!(store.remove_from_watchlist("AAPL").await.unwrap());
        assert!(!store.remove_from_watchlist("AAPL").await.unwrap());
        assert_eq!(store.get_watchlist().await.unwrap(), vec!["MSFT", "NVDA"]);
    }
}
