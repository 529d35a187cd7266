//! SQLite persistence layer.
//!
//! The database runs in WAL mode with a busy timeout so scheduled cycles,
//! manual cycles, and exit handling can write concurrently; every public
//! method is a single statement or a single transaction.

pub mod journal;
pub mod queue;
pub mod trades;
pub mod watchlist;

pub use journal::{FundingAlertRecord, LogEntry, LogLevel};
pub use queue::QueueRow;

use crate::clock::{system_clock, SharedClock};
use crate::config::StorageSettings;
use crate::{Error, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use rust_decimal::Decimal;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration as StdDuration;
use tracing::info;

/// Handle to the bot's database.
#[derive(Clone)]
pub struct Store {
    pool: SqlitePool,
    clock: SharedClock,
}

impl Store {
    /// Open (creating if needed) the configured database and run migrations.
    pub async fn connect(settings: &StorageSettings) -> Result<Self> {
        let url = settings.database_url.as_str();
        if let Some(path) = url
            .strip_prefix("sqlite://")
            .or_else(|| url.strip_prefix("sqlite:"))
            .filter(|p| !p.starts_with(":memory:"))
        {
            if let Some(parent) = Path::new(path).parent().filter(|p| !p.as_os_str().is_empty()) {
                tokio::fs::create_dir_all(parent)
                    .await
                    .map_err(|e| Error::config(format!("cannot create {}: {e}", parent.display())))?;
            }
        }

        let options = SqliteConnectOptions::from_str(url)?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(StdDuration::from_millis(settings.busy_timeout_ms))
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(settings.max_connections)
            .connect_with(options)
            .await?;

        let store = Self {
            pool,
            clock: system_clock(),
        };
        store.migrate().await?;
        info!(url = %settings.database_url, "Database ready");
        Ok(store)
    }

    /// Private in-memory database; one connection so the data survives.
    pub async fn in_memory() -> Result<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?.foreign_keys(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;
        let store = Self {
            pool,
            clock: system_clock(),
        };
        store.migrate().await?;
        Ok(store)
    }

    pub fn with_clock(mut self, clock: SharedClock) -> Self {
        self.clock = clock;
        self
    }

    pub fn clock(&self) -> &SharedClock {
        &self.clock
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("../../migrations").run(&self.pool).await?;
        Ok(())
    }

    fn now_text(&self) -> String {
        format_ts(self.clock.now())
    }
}

/// Fixed-width, lexically sortable timestamp.
pub(crate) fn format_ts(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

#[allow(clippy::result_large_err)]
pub(crate) fn parse_ts(raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| Error::Corrupt(format!("timestamp {raw}: {e}")))
}

#[allow(clippy::result_large_err)]
pub(crate) fn parse_decimal(raw: &str) -> Result<Decimal> {
    Decimal::from_str(raw).map_err(|e| Error::Corrupt(format!("decimal {raw}: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_timestamp_format_round_trips() {
        let ts = Utc.with_ymd_and_hms(2026, 3, 4, 5, 6, 7).unwrap();
        let text = format_ts(ts);
        assert_eq!(text, "2026-03-04T05:06:07.000Z");
        assert_eq!(parse_ts(&text).unwrap(), ts);
    }

    #[tokio::test]
    async fn test_in_memory_store_migrates() {
        let store = Store::in_memory().await.unwrap();
        let tables: Vec<(String,)> =
            sqlx::query_as("SELECT name FROM sqlite_master WHERE type = 'table' ORDER BY name")
                .fetch_all(store.pool())
                .await
                .unwrap();
        let names: Vec<&str> = tables.iter().map(|t| t.0.as_str()).collect();
        for expected in ["fills", "funding_alerts", "logs", "trade_queue", "trades", "watchlist"] {
            assert!(names.contains(&expected), "missing table {expected}");
        }
    }
}
