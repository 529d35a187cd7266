//! Error classification and retry policy.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration as StdDuration;
use tracing::{error, warn};
use trading_core::config::ErrorSettings;
use trading_core::{Classification, Error, Result};

/// Destination for operator alerts.
#[async_trait::async_trait]
pub trait AlertSink: Send + Sync {
    async fn send_alert(&self, key: &str, title: &str, message: &str);
}

/// Retry settings.
#[derive(Debug, Clone)]
pub struct ErrorHandlerConfig {
    /// Extra attempts after the first failure.
    pub max_retries: u32,
    pub retry_delay: StdDuration,
}

impl Default for ErrorHandlerConfig {
    fn default() -> Self {
        Self::from(&ErrorSettings::default())
    }
}

impl From<&ErrorSettings> for ErrorHandlerConfig {
    fn from(settings: &ErrorSettings) -> Self {
        Self {
            max_retries: settings.max_retries,
            retry_delay: StdDuration::from_millis(settings.retry_delay_ms),
        }
    }
}

/// Logs, classifies, and optionally alerts on errors.
#[derive(Clone)]
pub struct ErrorHandler {
    config: ErrorHandlerConfig,
    alert_hook: Option<Arc<dyn AlertSink>>,
}

impl ErrorHandler {
    pub fn new(config: ErrorHandlerConfig) -> Self {
        Self {
            config,
            alert_hook: None,
        }
    }

    pub fn with_alert_hook(mut self, hook: Arc<dyn AlertSink>) -> Self {
        self.alert_hook = Some(hook);
        self
    }

    pub fn classify(&self, err: &Error) -> Classification {
        err.classification()
    }

    /// Log `err` with its context and return its classification.
    pub async fn handle(&self, err: &Error, context: &str) -> Classification {
        let classification = self.classify(err);
        match classification {
            Classification::Recoverable => {
                warn!(context, classification = %classification, error = %err, "Recoverable error")
            }
            Classification::Fatal | Classification::Unknown => {
                error!(context, classification = %classification, error = ?err, "Error")
            }
        }
        if let Some(hook) = &self.alert_hook {
            hook.send_alert(
                &format!("error:{context}"),
                "Error",
                &format!("{classification}: {context} -> {err}"),
            )
            .await;
        }
        classification
    }

    /// Run `op`, retrying retryable errors with a fixed delay.
    ///
    /// Intermediate failures are only logged. The last error goes through
    /// [`ErrorHandler::handle`] once and is returned when retries are
    /// exhausted or a non-retryable error occurs.
    pub async fn retry<T, F, Fut>(&self, context: &str, mut op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempt = 0;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(err) => {
                    if !err.is_retryable() || attempt >= self.config.max_retries {
                        self.handle(&err, context).await;
                        return Err(err);
                    }
                    attempt += 1;
                    warn!(context, attempt, error = %err, "Retrying after error");
                    tokio::time::sleep(self.config.retry_delay).await;
                }
            }
        }
    }
}
