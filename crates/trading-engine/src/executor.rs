//! Live-trading safety gate in front of the order manager.
//!
//! In live mode, entries require an unlocked session. Exit orders may bypass
//! the lock so risk-reducing trades are never held back by it.

use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{info, warn};
use trading_core::api::Broker;
use trading_core::clock::{system_clock, SharedClock};
use trading_core::config::{LiveSafetySettings, TradingMode};
use trading_core::types::{ExecutionReport, OrderRequest, OrderType};
use trading_core::{Error, Result};

use crate::order_manager::OrderManager;

/// Operator input required to unlock live trading.
#[derive(Debug, Clone, Default)]
pub struct LiveCredentials {
    pub live_checkbox: bool,
    pub pin: Option<String>,
    pub phrase: Option<String>,
}

/// Per-submission flags.
#[derive(Debug, Clone, Default)]
pub struct SubmitOptions {
    /// Credentials checked when no live session is active.
    pub credentials: Option<LiveCredentials>,
    /// Skip the live lock for risk-reducing exits.
    pub allow_exit_without_unlock: bool,
    /// Closes an open trade; left working at the broker past the order TTL.
    pub closing: bool,
}

impl SubmitOptions {
    pub fn exit() -> Self {
        Self {
            credentials: None,
            allow_exit_without_unlock: true,
            closing: true,
        }
    }
}

/// Validates orders and enforces the live lock before delegating.
pub struct ExecutionService {
    mode: TradingMode,
    safety: LiveSafetySettings,
    broker: Arc<dyn Broker>,
    orders: Arc<OrderManager>,
    live_session_until: RwLock<Option<DateTime<Utc>>>,
    clock: SharedClock,
}

impl ExecutionService {
    pub fn new(
        mode: TradingMode,
        safety: LiveSafetySettings,
        broker: Arc<dyn Broker>,
        orders: Arc<OrderManager>,
    ) -> Self {
        Self {
            mode,
            safety,
            broker,
            orders,
            live_session_until: RwLock::new(None),
            clock: system_clock(),
        }
    }

    pub fn with_clock(mut self, clock: SharedClock) -> Self {
        self.clock = clock;
        self
    }

    pub fn mode(&self) -> TradingMode {
        self.mode
    }

    pub fn order_manager(&self) -> &Arc<OrderManager> {
        &self.orders
    }

    /// Check operator credentials and open a live session.
    pub async fn unlock_live_session(&self, credentials: &LiveCredentials) -> Result<DateTime<Utc>> {
        self.enforce_live_lock(credentials)?;
        let until = self.clock.now() + Duration::minutes(self.safety.session_minutes);
        *self.live_session_until.write().await = Some(until);
        warn!(until = %until, "Live trading session unlocked");
        Ok(until)
    }

    pub async fn lock_live_session(&self) {
        *self.live_session_until.write().await = None;
        info!("Live trading session locked");
    }

    pub async fn session_active(&self) -> bool {
        self.live_session_until
            .read()
            .await
            .is_some_and(|until| self.clock.now() < until)
    }

    pub async fn session_expires_at(&self) -> Option<DateTime<Utc>> {
        *self.live_session_until.read().await
    }

    /// Submit an order through the live lock and shape checks.
    ///
    /// Returns `Error::LiveLock` when live mode is locked and `Error::Order`
    /// for malformed requests. Live-mode submissions against a mock broker are
    /// reported as blocked without reaching it.
    pub async fn submit_order(
        &self,
        request: &OrderRequest,
        options: &SubmitOptions,
    ) -> Result<ExecutionReport> {
        let live = self.mode == TradingMode::Live;
        if live && !options.allow_exit_without_unlock && !self.session_active().await {
            match &options.credentials {
                Some(credentials) => self.enforce_live_lock(credentials)?,
                None if self.safety.lock_enabled => {
                    return Err(Error::LiveLock("live session is locked".to_string()));
                }
                None => {}
            }
        }

        validate_shape(request)?;

        if live && self.broker.is_mock() {
            warn!(symbol = %request.symbol, "Live order against mock broker blocked");
            return Ok(ExecutionReport::blocked(
                request,
                "live order blocked on mock broker",
                self.clock.now(),
            ));
        }

        if options.closing {
            self.orders.submit_exit(request).await
        } else {
            self.orders.submit(request).await
        }
    }

    #[allow(clippy::result_large_err)]
    fn enforce_live_lock(&self, credentials: &LiveCredentials) -> Result<()> {
        if !self.safety.lock_enabled {
            return Ok(());
        }
        if !credentials.live_checkbox {
            return Err(Error::LiveLock("live checkbox not confirmed".to_string()));
        }
        let Some(expected_pin) = self.safety.unlock_pin.as_deref() else {
            return Err(Error::LiveLock("LIVE_UNLOCK_PIN is not configured".to_string()));
        };
        if credentials.pin.as_deref().map(str::trim) != Some(expected_pin.trim()) {
            return Err(Error::LiveLock("PIN mismatch".to_string()));
        }
        let phrase = self.safety.confirm_phrase.trim();
        if !phrase.is_empty() && credentials.phrase.as_deref().unwrap_or("").trim() != phrase {
            return Err(Error::LiveLock("confirmation phrase mismatch".to_string()));
        }
        Ok(())
    }
}

#[allow(clippy::result_large_err)]
fn validate_shape(request: &OrderRequest) -> Result<()> {
    if request.quantity == 0 {
        return Err(Error::order(format!(
            "{} orders must have positive quantity",
            request.side.as_str()
        )));
    }
    if request.order_type == OrderType::Limit && request.limit_price.is_none() {
        return Err(Error::order("limit orders require a limit price"));
    }
    Ok(())
}
