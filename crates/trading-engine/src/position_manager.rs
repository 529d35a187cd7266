//! Exit management for open trades.
//!
//! Each open trade is re-priced from fresh daily bars. The trailing stop is
//! ratcheted first, then the first matching trigger closes the trade:
//! stop loss, take profit, then maximum holding time.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tracing::{info, warn};
use trading_core::api::MarketData;
use trading_core::config::Settings;
use trading_core::features::FeatureEngine;
use trading_core::types::{price_from_f64, OrderRequest, OrderSide, OrderStatus, Trade};
use trading_core::validator::BarValidator;
use trading_core::{Result, Store};

use crate::executor::{ExecutionService, SubmitOptions};

const MIN_TRAILING_ATR: f64 = 0.01;

/// Exit rule parameters.
#[derive(Debug, Clone)]
pub struct ExitConfig {
    pub max_hold_days: i64,
    pub trailing_stop_enabled: bool,
    pub trailing_atr_multiplier: f64,
    /// Daily bars fetched per open trade.
    pub bars_limit: usize,
    pub outlier_quantile: f64,
}

impl Default for ExitConfig {
    fn default() -> Self {
        Self::from(&Settings::default())
    }
}

impl From<&Settings> for ExitConfig {
    fn from(settings: &Settings) -> Self {
        Self {
            max_hold_days: settings.risk.max_hold_days,
            trailing_stop_enabled: settings.risk.trailing_stop_enabled,
            trailing_atr_multiplier: settings.risk.trailing_atr_multiplier,
            bars_limit: settings.app.exit_bars_limit,
            outlier_quantile: settings.data.outlier_quantile,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExitReason {
    StopLoss,
    TakeProfit,
    TimeExit,
}

impl ExitReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExitReason::StopLoss => "stop_loss",
            ExitReason::TakeProfit => "take_profit",
            ExitReason::TimeExit => "time_exit",
        }
    }
}

impl fmt::Display for ExitReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Something the exit pass did (or failed to do) for one trade.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum ExitAction {
    TrailingStop {
        trade_id: i64,
        symbol: String,
        old_stop: Decimal,
        new_stop: Decimal,
    },
    Exit {
        trade_id: i64,
        symbol: String,
        reason: ExitReason,
        price: Decimal,
        quantity: u64,
        pnl: Decimal,
        order_id: String,
    },
    /// The sell was not accepted, so the trade stays open.
    ExitNotExecuted {
        trade_id: i64,
        symbol: String,
        reason: ExitReason,
        status: OrderStatus,
    },
    Failed {
        trade_id: i64,
        symbol: String,
        error: String,
    },
}

impl ExitAction {
    /// One-line operator-facing description.
    pub fn describe(&self) -> String {
        match self {
            ExitAction::TrailingStop {
                symbol, new_stop, ..
            } => format!("trailing stop updated for {symbol} -> {new_stop:.2}"),
            ExitAction::Exit {
                symbol,
                reason,
                price,
                ..
            } => format!("exit {symbol} triggered by {reason} at {price:.2}"),
            ExitAction::ExitNotExecuted {
                symbol,
                reason,
                status,
                ..
            } => format!("exit {symbol} triggered by {reason} but order was {status}"),
            ExitAction::Failed { symbol, error, .. } => {
                format!("exit check failed for {symbol}: {error}")
            }
        }
    }
}

/// Evaluates and executes exits for every open trade.
pub struct PositionManager {
    market_data: Arc<dyn MarketData>,
    features: Arc<dyn FeatureEngine>,
    execution: Arc<ExecutionService>,
    store: Store,
    validator: BarValidator,
    config: ExitConfig,
}

impl PositionManager {
    pub fn new(
        market_data: Arc<dyn MarketData>,
        features: Arc<dyn FeatureEngine>,
        execution: Arc<ExecutionService>,
        store: Store,
        config: ExitConfig,
    ) -> Self {
        Self {
            market_data,
            features,
            execution,
            store,
            validator: BarValidator {
                outlier_quantile: config.outlier_quantile,
            },
            config,
        }
    }

    /// Run the exit pass. Only listing open trades can fail the whole pass;
    /// per-trade problems are reported as [`ExitAction::Failed`].
    pub async fn evaluate_exits(&self) -> Result<Vec<ExitAction>> {
        let trades = self.store.list_open_trades().await?;
        let mut actions = Vec::new();
        for trade in &trades {
            if let Err(e) = self.evaluate_trade(trade, &mut actions).await {
                warn!(trade_id = trade.id, symbol = %trade.symbol, error = %e, "Exit evaluation failed");
                actions.push(ExitAction::Failed {
                    trade_id: trade.id,
                    symbol: trade.symbol.clone(),
                    error: e.to_string(),
                });
            }
        }
        Ok(actions)
    }

    async fn evaluate_trade(&self, trade: &Trade, actions: &mut Vec<ExitAction>) -> Result<()> {
        let bars = self
            .market_data
            .get_daily_bars(&trade.symbol, self.config.bars_limit)
            .await?;
        let bars = self.validator.validate(&trade.symbol, bars)?;
        let features = self.features.compute(&trade.symbol, &bars)?;

        let close = features.close();
        let (low, high) = features
            .last_bar
            .as_ref()
            .map_or((close, close), |bar| (bar.low, bar.high));

        let mut stop = trade.stop;
        if self.config.trailing_stop_enabled {
            let atr = features.atr().max(MIN_TRAILING_ATR);
            let candidate = price_from_f64(close - atr * self.config.trailing_atr_multiplier);
            if candidate > stop {
                self.store.update_trade_stop(trade.id, candidate).await?;
                info!(trade_id = trade.id, symbol = %trade.symbol, old_stop = %stop, new_stop = %candidate, "Trailing stop raised");
                actions.push(ExitAction::TrailingStop {
                    trade_id: trade.id,
                    symbol: trade.symbol.clone(),
                    old_stop: stop,
                    new_stop: candidate,
                });
                stop = candidate;
            }
        }

        let now = self.store.clock().now();
        let reason = if price_from_f64(low) <= stop {
            ExitReason::StopLoss
        } else if price_from_f64(high) >= trade.take_profit {
            ExitReason::TakeProfit
        } else if trade.days_held(now) >= self.config.max_hold_days {
            ExitReason::TimeExit
        } else {
            return Ok(());
        };

        let request = OrderRequest::market(&trade.symbol, OrderSide::Sell, trade.quantity)
            .with_idempotency_key(format!("exit-{}", trade.id));
        let report = self
            .execution
            .submit_order(&request, &SubmitOptions::exit())
            .await?;

        if !report.is_accepted() {
            warn!(trade_id = trade.id, symbol = %trade.symbol, reason = %reason, status = %report.status, "Exit order not accepted");
            actions.push(ExitAction::ExitNotExecuted {
                trade_id: trade.id,
                symbol: trade.symbol.clone(),
                reason,
                status: report.status,
            });
            return Ok(());
        }

        let price = price_from_f64(close);
        self.store
            .close_trade(trade.id, Some(price), Some(reason.as_str()))
            .await?;
        self.store
            .add_fill(Some(trade.id), Some(&report.order_id), &trade.symbol, trade.quantity, price)
            .await?;

        let pnl = trade.pnl_at(price);
        info!(trade_id = trade.id, symbol = %trade.symbol, reason = %reason, price = %price, pnl = %pnl, "Trade exited");
        actions.push(ExitAction::Exit {
            trade_id: trade.id,
            symbol: trade.symbol.clone(),
            reason,
            price,
            quantity: trade.quantity,
            pnl,
            order_id: report.order_id,
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::order_manager::OrderManager;
    use chrono::{Duration, Utc};
    use trading_core::api::MockBroker;
    use trading_core::clock::ManualClock;
    use trading_core::config::{LiveSafetySettings, TradingMode};
    use trading_core::features::IndicatorEngine;
    use trading_core::types::{Bar, NewTrade, TradeStatus};

    /// 20 rising bars ending at `last_close`, then a final bar with the given range.
    fn bars(last_close: f64, last_low: f64, last_high: f64) -> Vec<Bar> {
        let start = Utc::now() - Duration::days(25);
        let mut bars: Vec<Bar> = (0..20)
            .map(|i| {
                let close = last_close - 5.0 + 5.0 * i as f64 / 19.0;
                Bar {
                    ts: start + Duration::days(i),
                    open: close,
                    high: close + 1.0,
                    low: close - 1.0,
                    close,
                    volume: 1_000.0,
                }
            })
            .collect();
        bars.push(Bar {
            ts: start + Duration::days(20),
            open: last_close,
            high: last_high,
            low: last_low,
            close: last_close,
            volume: 1_000.0,
        });
        bars
    }

    struct Harness {
        broker: Arc<MockBroker>,
        store: Store,
        clock: Arc<ManualClock>,
        orders: Arc<OrderManager>,
        manager: PositionManager,
    }

    async fn harness(mode: TradingMode, config: ExitConfig) -> Harness {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let broker = Arc::new(MockBroker::with_clock(clock.clone()));
        let store = Store::in_memory().await.unwrap().with_clock(clock.clone());
        let orders = Arc::new(OrderManager::with_clock(broker.clone(), 30, clock.clone()));
        let execution = Arc::new(
            ExecutionService::new(mode, LiveSafetySettings::default(), broker.clone(), orders.clone())
                .with_clock(clock.clone()),
        );
        let manager = PositionManager::new(
            broker.clone(),
            Arc::new(IndicatorEngine::default().with_clock(clock.clone())),
            execution,
            store.clone(),
            config,
        );
        Harness {
            broker,
            store,
            clock,
            orders,
            manager,
        }
    }

    fn no_trailing() -> ExitConfig {
        ExitConfig {
            trailing_stop_enabled: false,
            ..Default::default()
        }
    }

    async fn open_trade(store: &Store, stop: i64, take_profit: i64) -> i64 {
        store
            .add_trade(&NewTrade {
                symbol: "AAPL".to_string(),
                side: OrderSide::Buy,
                quantity: 50,
                entry: Decimal::new(100, 0),
                stop: Decimal::new(stop, 0),
                take_profit: Decimal::new(take_profit, 0),
            })
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_stop_loss_sells_full_quantity_and_closes() {
        let h = harness(TradingMode::Paper, no_trailing()).await;
        h.broker.set_bars("AAPL", bars(100.0, 94.0, 101.0));
        let id = open_trade(&h.store, 95, 110).await;

        let actions = h.manager.evaluate_exits().await.unwrap();
        assert_eq!(actions.len(), 1);
        assert!(matches!(
            &actions[0],
            ExitAction::Exit { reason: ExitReason::StopLoss, quantity: 50, .. }
        ));
        assert_eq!(actions[0].describe(), "exit AAPL triggered by stop_loss at 100.00");

        let submitted = h.broker.submitted();
        assert_eq!(submitted.len(), 1);
        assert_eq!(submitted[0].side, OrderSide::Sell);
        assert_eq!(submitted[0].quantity, 50);

        let trade = h.store.get_trade(id).await.unwrap().unwrap();
        assert_eq!(trade.status, TradeStatus::Closed);
        assert_eq!(trade.exit_reason.as_deref(), Some("stop_loss"));
        assert_eq!(h.store.count_fills(id).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_take_profit() {
        let h = harness(TradingMode::Paper, no_trailing()).await;
        h.broker.set_bars("AAPL", bars(109.0, 108.0, 111.0));
        open_trade(&h.store, 90, 110).await;

        let actions = h.manager.evaluate_exits().await.unwrap();
        match &actions[0] {
            ExitAction::Exit { reason, pnl, .. } => {
                assert_eq!(*reason, ExitReason::TakeProfit);
                assert_eq!(*pnl, Decimal::new(450, 0));
            }
            other => panic!("unexpected action {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_time_exit_after_max_hold() {
        let h = harness(TradingMode::Paper, no_trailing()).await;
        h.broker.set_bars("AAPL", bars(102.0, 101.0, 103.0));
        open_trade(&h.store, 90, 120).await;

        assert!(h.manager.evaluate_exits().await.unwrap().is_empty());

        h.clock.advance(Duration::days(14));
        let actions = h.manager.evaluate_exits().await.unwrap();
        assert!(matches!(
            &actions[0],
            ExitAction::Exit { reason: ExitReason::TimeExit, .. }
        ));
        assert!(h.store.list_open_trades().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_trailing_stop_only_moves_up() {
        let h = harness(TradingMode::Paper, ExitConfig::default()).await;
        h.broker.set_bars("AAPL", bars(105.0, 104.0, 106.0));
        let id = open_trade(&h.store, 95, 120).await;

        let actions = h.manager.evaluate_exits().await.unwrap();
        assert_eq!(actions.len(), 1);
        let ExitAction::TrailingStop { new_stop, .. } = &actions[0] else {
            panic!("expected trailing stop, got {actions:?}");
        };
        assert!(*new_stop > Decimal::new(95, 0));
        let trade = h.store.get_trade(id).await.unwrap().unwrap();
        assert_eq!(trade.stop, *new_stop);
        assert_eq!(trade.status, TradeStatus::Open);

        // A lower close never loosens the stop.
        h.broker.set_bars("AAPL", bars(103.0, 102.5, 104.0));
        let actions = h.manager.evaluate_exits().await.unwrap();
        assert!(actions
            .iter()
            .all(|a| !matches!(a, ExitAction::TrailingStop { .. })));
    }

    #[tokio::test]
    async fn test_live_mode_exit_bypasses_lock_but_mock_blocks() {
        let h = harness(TradingMode::Live, no_trailing()).await;
        h.broker.set_bars("AAPL", bars(100.0, 94.0, 101.0));
        let id = open_trade(&h.store, 95, 110).await;

        let actions = h.manager.evaluate_exits().await.unwrap();
        assert!(matches!(
            &actions[0],
            ExitAction::ExitNotExecuted { status: OrderStatus::Blocked, .. }
        ));
        assert!(h.store.get_trade(id).await.unwrap().unwrap().is_open());
    }

    #[tokio::test]
    async fn test_rejected_exit_is_retried_next_pass() {
        let h = harness(TradingMode::Paper, no_trailing()).await;
        h.broker.set_bars("AAPL", bars(100.0, 94.0, 101.0));
        let id = open_trade(&h.store, 95, 110).await;

        h.broker.set_order_status(OrderStatus::Rejected);
        let actions = h.manager.evaluate_exits().await.unwrap();
        assert!(matches!(
            &actions[0],
            ExitAction::ExitNotExecuted { status: OrderStatus::Rejected, .. }
        ));
        assert!(h.store.get_trade(id).await.unwrap().unwrap().is_open());

        h.broker.set_order_status(OrderStatus::Filled);
        let actions = h.manager.evaluate_exits().await.unwrap();
        assert!(matches!(
            &actions[0],
            ExitAction::Exit { reason: ExitReason::StopLoss, .. }
        ));
        assert_eq!(h.broker.submit_count(), 2);
        assert!(h.store.list_open_trades().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_working_exit_order_is_not_purged() {
        let h = harness(TradingMode::Paper, no_trailing()).await;
        h.broker.set_bars("AAPL", bars(100.0, 94.0, 101.0));
        let id = open_trade(&h.store, 95, 110).await;

        h.broker.set_order_status(OrderStatus::Accepted);
        let actions = h.manager.evaluate_exits().await.unwrap();
        assert!(matches!(&actions[0], ExitAction::Exit { .. }));
        assert!(!h.store.get_trade(id).await.unwrap().unwrap().is_open());

        h.clock.advance(Duration::minutes(31));
        assert!(h.orders.purge_stale_orders().await.is_empty());
        assert_eq!(h.broker.cancel_count(), 0);
        assert_eq!(
            h.orders.get(&format!("exit-{id}")).unwrap().report.status,
            OrderStatus::Accepted
        );
    }

    #[tokio::test]
    async fn test_data_failure_is_isolated_per_trade() {
        let h = harness(TradingMode::Paper, no_trailing()).await;
        h.broker.fail_bars_for("AAPL");
        open_trade(&h.store, 95, 110).await;

        let actions = h.manager.evaluate_exits().await.unwrap();
        assert!(matches!(&actions[0], ExitAction::Failed { .. }));
        assert!(actions[0].describe().starts_with("exit check failed for AAPL"));
    }
}
