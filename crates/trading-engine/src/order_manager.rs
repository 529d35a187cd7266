//! Idempotent order submission and lifecycle tracking.
//!
//! Orders carrying an idempotency key are remembered for the lifetime of the
//! process, so a retried submission returns the original report instead of
//! reaching the broker twice. Refused or cancelled orders are forgotten on the
//! next submission under their key, so the order can be tried again. Unfilled
//! entry orders older than the TTL are cancelled at the start of each cycle;
//! exit orders are left working at the broker.

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use trading_core::api::Broker;
use trading_core::clock::{system_clock, SharedClock};
use trading_core::types::{ExecutionReport, OrderRequest, OrderStatus};
use trading_core::Result;

/// A submission remembered under its idempotency key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManagedOrder {
    pub request: OrderRequest,
    pub report: ExecutionReport,
    pub created_at: DateTime<Utc>,
    /// Exit orders close a trade as soon as they are accepted and are never
    /// cancelled by the TTL purge.
    #[serde(default)]
    pub exit: bool,
}

impl ManagedOrder {
    fn is_stale(&self, now: DateTime<Utc>, ttl: Duration) -> bool {
        !self.exit && now - self.created_at > ttl && self.report.status.is_unfilled_open()
    }
}

/// Submits orders to the broker at most once per idempotency key.
pub struct OrderManager {
    broker: Arc<dyn Broker>,
    ttl: Duration,
    orders: DashMap<String, ManagedOrder>,
    /// Serializes the check-then-submit sequence.
    submit_lock: Mutex<()>,
    clock: SharedClock,
}

impl OrderManager {
    pub fn new(broker: Arc<dyn Broker>, ttl_minutes: i64) -> Self {
        Self::with_clock(broker, ttl_minutes, system_clock())
    }

    pub fn with_clock(broker: Arc<dyn Broker>, ttl_minutes: i64, clock: SharedClock) -> Self {
        Self {
            broker,
            ttl: Duration::minutes(ttl_minutes),
            orders: DashMap::new(),
            submit_lock: Mutex::new(()),
            clock,
        }
    }

    /// Submit `request`, or return the recorded report if its key was seen.
    pub async fn submit(&self, request: &OrderRequest) -> Result<ExecutionReport> {
        self.submit_tracked(request, false).await
    }

    /// Submit a closing order. Same idempotency rules as [`Self::submit`],
    /// but the order is exempt from the TTL purge.
    pub async fn submit_exit(&self, request: &OrderRequest) -> Result<ExecutionReport> {
        self.submit_tracked(request, true).await
    }

    async fn submit_tracked(&self, request: &OrderRequest, exit: bool) -> Result<ExecutionReport> {
        let _guard = self.submit_lock.lock().await;

        if let Some(key) = &request.idempotency_key {
            let cached = self.orders.get(key).map(|existing| existing.report.clone());
            match cached {
                Some(report) if report.is_accepted() => {
                    debug!(key = %key, order_id = %report.order_id, "Duplicate submission suppressed");
                    return Ok(report);
                }
                Some(report) => {
                    debug!(key = %key, status = %report.status, "Previous submission not live, resubmitting");
                    self.orders.remove(key);
                }
                None => {}
            }
        }

        let result = self.broker.submit_order(request).await?;
        let now = self.clock.now();
        let report = ExecutionReport::from_result(request, result, now);

        info!(
            order_id = %report.order_id,
            symbol = %report.symbol,
            side = %report.side.as_str(),
            quantity = request.quantity,
            status = %report.status,
            "Order submitted"
        );

        if let Some(key) = &request.idempotency_key {
            self.orders.insert(
                key.clone(),
                ManagedOrder {
                    request: request.clone(),
                    report: report.clone(),
                    created_at: now,
                    exit,
                },
            );
        }
        Ok(report)
    }

    /// Apply a fill to a tracked order. Returns the updated report.
    pub fn record_fill(
        &self,
        key: &str,
        filled_qty: u64,
        average_price: Option<Decimal>,
    ) -> Option<ExecutionReport> {
        let mut managed = self.orders.get_mut(key)?;
        managed.report.status = if filled_qty >= managed.request.quantity {
            OrderStatus::Filled
        } else {
            OrderStatus::PartiallyFilled
        };
        managed.report.filled_qty = filled_qty;
        managed.report.average_fill_price = average_price;
        managed.report.reported_at = self.clock.now();
        Some(managed.report.clone())
    }

    /// Cancel tracked entry orders still unfilled after the TTL.
    ///
    /// Returns the keys that were cancelled. Orders whose cancellation fails
    /// stay tracked and are retried on the next call.
    pub async fn purge_stale_orders(&self) -> Vec<String> {
        let now = self.clock.now();
        let stale: Vec<(String, String)> = self
            .orders
            .iter()
            .filter(|entry| entry.value().is_stale(now, self.ttl))
            .map(|entry| (entry.key().clone(), entry.value().report.order_id.clone()))
            .collect();

        let mut purged = Vec::with_capacity(stale.len());
        for (key, order_id) in stale {
            if let Err(e) = self.broker.cancel_order(&order_id).await {
                warn!(key = %key, order_id = %order_id, error = %e, "Failed to cancel stale order");
                continue;
            }
            if let Some(mut managed) = self.orders.get_mut(&key) {
                managed.report.status = OrderStatus::Canceled;
                managed.report.reported_at = now;
            }
            info!(key = %key, order_id = %order_id, "Stale order cancelled");
            purged.push(key);
        }
        purged
    }

    /// Cancel an order at the broker and mark any tracked copy cancelled.
    pub async fn cancel(&self, order_id: &str) -> Result<()> {
        self.broker.cancel_order(order_id).await?;
        for mut entry in self.orders.iter_mut() {
            if entry.report.order_id == order_id {
                entry.report.status = OrderStatus::Canceled;
            }
        }
        Ok(())
    }

    pub fn get(&self, key: &str) -> Option<ManagedOrder> {
        self.orders.get(key).map(|entry| entry.value().clone())
    }

    /// Number of remembered submissions.
    pub fn tracked(&self) -> usize {
        self.orders.len()
    }
}
