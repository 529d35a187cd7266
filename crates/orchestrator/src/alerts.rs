//! Operator alerts with per-key cooldown.
//!
//! Every alert is logged. When a Telegram bot token and chat id are
//! configured the message is also posted there; delivery failures are logged
//! and never reach the caller.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use risk_manager::AlertSink;
use std::collections::HashMap;
use std::time::Duration as StdDuration;
use tokio::sync::Mutex;
use tracing::{debug, warn};
use trading_core::clock::{system_clock, SharedClock};
use trading_core::config::AlertSettings;

const TELEGRAM_API: &str = "https://api.telegram.org";

#[derive(Debug, Clone)]
struct TelegramTarget {
    token: String,
    chat_id: String,
}

/// Deduplicating alert dispatcher.
pub struct AlertManager {
    cooldown: Duration,
    telegram: Option<TelegramTarget>,
    http_client: reqwest::Client,
    last_sent: Mutex<HashMap<String, DateTime<Utc>>>,
    clock: SharedClock,
}

impl AlertManager {
    pub fn new(settings: &AlertSettings) -> Self {
        let telegram = match (&settings.telegram_bot_token, &settings.telegram_chat_id) {
            (Some(token), Some(chat_id)) if !token.is_empty() && !chat_id.is_empty() => {
                Some(TelegramTarget {
                    token: token.clone(),
                    chat_id: chat_id.clone(),
                })
            }
            _ => None,
        };
        let http_client = reqwest::Client::builder()
            .timeout(StdDuration::from_secs(10))
            .build()
            .unwrap_or_default();
        Self {
            cooldown: Duration::seconds(settings.cooldown_seconds),
            telegram,
            http_client,
            last_sent: Mutex::new(HashMap::new()),
            clock: system_clock(),
        }
    }

    pub fn with_clock(mut self, clock: SharedClock) -> Self {
        self.clock = clock;
        self
    }

    /// Dispatch an alert unless `key` fired within the cooldown.
    ///
    /// Returns whether the alert was dispatched.
    pub async fn dispatch(&self, key: &str, title: &str, message: &str) -> bool {
        let now = self.clock.now();
        {
            let mut last_sent = self.last_sent.lock().await;
            if let Some(previous) = last_sent.get(key) {
                if now - *previous < self.cooldown {
                    debug!(key, "Alert suppressed by cooldown");
                    return false;
                }
            }
            last_sent.insert(key.to_string(), now);
        }

        warn!(key, title, message, "ALERT");

        if let Some(target) = &self.telegram {
            let text = format!("{title}\n{message}");
            if let Err(e) = self.send_telegram(target, &text).await {
                warn!(key, error = %e, "Failed to send Telegram alert");
            }
        }
        true
    }

    async fn send_telegram(&self, target: &TelegramTarget, text: &str) -> reqwest::Result<()> {
        let url = format!("{TELEGRAM_API}/bot{}/sendMessage", target.token);
        self.http_client
            .post(&url)
            .json(&serde_json::json!({
                "chat_id": target.chat_id,
                "text": text,
            }))
            .send()
            .await?
            .error_for_status()?;
        debug!("Sent Telegram alert");
        Ok(())
    }
}

#[async_trait]
impl AlertSink for AlertManager {
    async fn send_alert(&self, key: &str, title: &str, message: &str) {
        self.dispatch(key, title, message).await;
    }
}
