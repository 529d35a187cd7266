//! Signals, funding alerts, and operator log rows.

use super::{parse_decimal, parse_ts, Store};
use crate::types::{FinalSignal, FundingAlert};
use crate::Result;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::Row;
use std::fmt;

/// Severity of an operator-facing log row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Info,
    Warning,
    Error,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Info => "info",
            LogLevel::Warning => "warning",
            LogLevel::Error => "error",
        }
    }

    fn parse(raw: &str) -> Self {
        match raw {
            "warning" => LogLevel::Warning,
            "error" => LogLevel::Error,
            _ => LogLevel::Info,
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEntry {
    pub id: i64,
    pub level: LogLevel,
    pub message: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FundingAlertRecord {
    pub id: i64,
    pub symbol: String,
    pub missing_cash: Decimal,
    pub proposed_actions: String,
    pub details: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

impl Store {
    pub async fn add_signal(&self, signal: &FinalSignal) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO signals (symbol, score, entry, stop, take_profit, reasons, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&signal.symbol)
        .bind(signal.score)
        .bind(signal.entry.to_string())
        .bind(signal.stop.to_string())
        .bind(signal.take_profit.to_string())
        .bind(signal.reasons.join(", "))
        .bind(self.now_text())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn count_signals(&self) -> Result<i64> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM signals")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    pub async fn add_funding_alert(&self, alert: &FundingAlert) -> Result<i64> {
        let result = sqlx::query(
            r#"
            INSERT INTO funding_alerts (symbol, missing_cash, proposed_actions, details, created_at)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(&alert.symbol)
        .bind(alert.missing_cash.to_string())
        .bind(alert.actions_label())
        .bind(serde_json::to_string(&alert.details)?)
        .bind(super::format_ts(alert.created_at))
        .execute(&self.pool)
        .await?;
        Ok(result.last_insert_rowid())
    }

    /// Most recent alerts first.
    pub async fn list_funding_alerts(&self, limit: i64) -> Result<Vec<FundingAlertRecord>> {
        let rows = sqlx::query(
            r#"
            SELECT id, symbol, missing_cash, proposed_actions, details, created_at
            FROM funding_alerts ORDER BY created_at DESC, id DESC LIMIT ?
            "#,
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| -> Result<FundingAlertRecord> {
                Ok(FundingAlertRecord {
                    id: row.try_get("id")?,
                    symbol: row.try_get("symbol")?,
                    missing_cash: parse_decimal(&row.try_get::<String, _>("missing_cash")?)?,
                    proposed_actions: row.try_get("proposed_actions")?,
                    details: serde_json::from_str(&row.try_get::<String, _>("details")?)?,
                    created_at: parse_ts(&row.try_get::<String, _>("created_at")?)?,
                })
            })
            .collect()
    }

    pub async fn add_log(&self, level: LogLevel, message: &str) -> Result<()> {
        sqlx::query("INSERT INTO logs (level, message, created_at) VALUES (?, ?, ?)")
            .bind(level.as_str())
            .bind(message)
            .bind(self.now_text())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Most recent log rows first.
    pub async fn list_logs(&self, limit: i64) -> Result<Vec<LogEntry>> {
        let rows = sqlx::query(
            "SELECT id, level, message, created_at FROM logs ORDER BY created_at DESC, id DESC LIMIT ?",
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| -> Result<LogEntry> {
                Ok(LogEntry {
                    id: row.try_get("id")?,
                    level: LogLevel::parse(&row.try_get::<String, _>("level")?),
                    message: row.try_get("message")?,
                    created_at: parse_ts(&row.try_get::<String, _>("created_at")?)?,
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::FundingAction;
    use std::collections::BTreeMap;

    #[tokio::test]
    async fn test_funding_alert_round_trip() {
        let store = Store::in_memory().await.unwrap();
        let alert = FundingAlert {
            symbol: "NVDA".to_string(),
            missing_cash: Decimal::new(2_500, 0),
            proposed_actions: FundingAction::ALL.to_vec(),
            details: BTreeMap::from([
                ("cash_required".to_string(), Decimal::new(12_500, 0)),
                ("available_cash".to_string(), Decimal::new(10_000, 0)),
            ]),
            created_at: Utc::now(),
        };
        store.add_funding_alert(&alert).await.unwrap();

        let alerts = store.list_funding_alerts(10).await.unwrap();
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].missing_cash, Decimal::new(2_500, 0));
        assert_eq!(alerts[0].proposed_actions, "swap, trim, partial_entry, trade_queue");
        assert!(alerts[0].details.get("cash_required").is_some());
    }

    #[tokio::test]
    async fn test_logs_newest_first() {
        let store = Store::in_memory().await.unwrap();
        store.add_log(LogLevel::Info, "first").await.unwrap();
        store.add_log(LogLevel::Warning, "second").await.unwrap();
        let logs = store.list_logs(10).await.unwrap();
        assert_eq!(logs[0].message, "second");
        assert_eq!(logs[0].level, LogLevel::Warning);
        assert_eq!(logs.len(), 2);
    }
}
