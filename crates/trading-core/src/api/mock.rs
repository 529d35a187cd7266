//! Deterministic in-process broker used for paper runs and tests.

use crate::api::{Broker, MarketData};
use crate::clock::{system_clock, SharedClock};
use crate::types::{
    Account, Bar, BrokerPosition, OrderRequest, OrderResult, OrderStatus,
};
use crate::{Error, Result};
use chrono::Duration;
use rust_decimal::Decimal;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::RwLock;
use tracing::debug;
use uuid::Uuid;

#[derive(Debug)]
struct MockState {
    cash: Decimal,
    portfolio_value: Option<Decimal>,
    positions: Vec<BrokerPosition>,
    order_status: OrderStatus,
    fill_price: Decimal,
    bars: HashMap<String, Vec<Bar>>,
    failing_symbols: HashSet<String>,
    submitted: Vec<OrderRequest>,
    cancelled: Vec<String>,
}

/// Mock broker that always succeeds with predictable payloads.
#[derive(Debug)]
pub struct MockBroker {
    state: RwLock<MockState>,
    submit_calls: AtomicUsize,
    cancel_calls: AtomicUsize,
    clock: SharedClock,
}

impl Default for MockBroker {
    fn default() -> Self {
        Self::new()
    }
}

impl MockBroker {
    pub fn new() -> Self {
        Self::with_clock(system_clock())
    }

    pub fn with_clock(clock: SharedClock) -> Self {
        Self {
            state: RwLock::new(MockState {
                cash: Decimal::new(100_000, 0),
                portfolio_value: None,
                positions: Vec::new(),
                order_status: OrderStatus::Filled,
                fill_price: Decimal::new(100, 0),
                bars: HashMap::new(),
                failing_symbols: HashSet::new(),
                submitted: Vec::new(),
                cancelled: Vec::new(),
            }),
            submit_calls: AtomicUsize::new(0),
            cancel_calls: AtomicUsize::new(0),
            clock,
        }
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, MockState> {
        self.state.write().unwrap_or_else(|e| e.into_inner())
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, MockState> {
        self.state.read().unwrap_or_else(|e| e.into_inner())
    }

    pub fn set_cash(&self, cash: Decimal) {
        self.write().cash = cash;
    }

    pub fn set_portfolio_value(&self, value: Decimal) {
        self.write().portfolio_value = Some(value);
    }

    pub fn set_positions(&self, positions: Vec<BrokerPosition>) {
        self.write().positions = positions;
    }

    /// Status returned by subsequent submissions.
    pub fn set_order_status(&self, status: OrderStatus) {
        self.write().order_status = status;
    }

    pub fn set_fill_price(&self, price: Decimal) {
        self.write().fill_price = price;
    }

    /// Replace the generated series for one symbol.
    pub fn set_bars(&self, symbol: &str, bars: Vec<Bar>) {
        self.write().bars.insert(symbol.to_string(), bars);
    }

    /// Make bar requests for `symbol` fail with a connectivity error.
    pub fn fail_bars_for(&self, symbol: &str) {
        self.write().failing_symbols.insert(symbol.to_string());
    }

    pub fn submit_count(&self) -> usize {
        self.submit_calls.load(Ordering::SeqCst)
    }

    pub fn cancel_count(&self) -> usize {
        self.cancel_calls.load(Ordering::SeqCst)
    }

    pub fn submitted(&self) -> Vec<OrderRequest> {
        self.read().submitted.clone()
    }

    pub fn cancelled(&self) -> Vec<String> {
        self.read().cancelled.clone()
    }

    /// Rising series from 100 to 120 with a small deterministic wiggle.
    fn generated_bars(&self, limit: usize) -> Vec<Bar> {
        let now = self.clock.now();
        let n = limit.max(1);
        let step = if n > 1 { 20.0 / (n - 1) as f64 } else { 0.0 };
        (0..n)
            .map(|i| {
                let close = 100.0 + step * i as f64 + 0.3 * (i as f64 * 0.7).sin();
                Bar {
                    ts: now - Duration::days((n - i) as i64),
                    open: close - 0.2,
                    high: close + 1.0,
                    low: close - 1.0,
                    close,
                    volume: 1_000_000.0 + 1_000.0 * i as f64,
                }
            })
            .collect()
    }
}

#[async_trait::async_trait]
impl Broker for MockBroker {
    async fn get_account(&self) -> Result<Account> {
        let state = self.read();
        Ok(Account {
            cash: state.cash,
            portfolio_value: state.portfolio_value,
            buying_power: Some(state.cash),
            positions: state.positions.len(),
        })
    }

    async fn list_positions(&self) -> Result<Vec<BrokerPosition>> {
        Ok(self.read().positions.clone())
    }

    async fn submit_order(&self, request: &OrderRequest) -> Result<OrderResult> {
        self.submit_calls.fetch_add(1, Ordering::SeqCst);
        let mut state = self.write();
        state.submitted.push(request.clone());

        let status = state.order_status;
        let filled = status == OrderStatus::Filled;
        let order_id = format!("mock-{}", Uuid::new_v4());
        debug!(order_id = %order_id, symbol = %request.symbol, "Mock order accepted");

        Ok(OrderResult {
            order_id,
            symbol: request.symbol.clone(),
            status,
            filled_qty: if filled { request.quantity } else { 0 },
            average_fill_price: filled.then_some(request.limit_price.unwrap_or(state.fill_price)),
            raw: HashMap::from([("mock".to_string(), "true".to_string())]),
        })
    }

    async fn cancel_order(&self, order_id: &str) -> Result<()> {
        self.cancel_calls.fetch_add(1, Ordering::SeqCst);
        self.write().cancelled.push(order_id.to_string());
        Ok(())
    }

    fn is_mock(&self) -> bool {
        true
    }
}

#[async_trait::async_trait]
impl MarketData for MockBroker {
    async fn get_daily_bars(&self, symbol: &str, limit: usize) -> Result<Vec<Bar>> {
        let state = self.read();
        if state.failing_symbols.contains(symbol) {
            return Err(Error::Connectivity(format!("bars unavailable for {symbol}")));
        }
        if let Some(bars) = state.bars.get(symbol) {
            let skip = bars.len().saturating_sub(limit);
            return Ok(bars[skip..].to_vec());
        }
        drop(state);
        Ok(self.generated_bars(limit))
    }
}
