//! Cycle scheduler and the risk-controlled entry pipeline.
//!
//! The orchestrator owns a `stopped -> running <-> paused -> stopped` state
//! machine. While running, a background task runs one cycle per interval over
//! the stored watchlist. Manual cycles go through the same pipeline, and a
//! cycle lock keeps at most one cycle in flight per instance.
//!
//! Within a cycle, stale orders are purged and exits are handled before any
//! entry is considered. Symbols are processed in order, and a failure on one
//! symbol is recorded against the circuit breaker without aborting the rest.

use chrono::{DateTime, Utc};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration as StdDuration;
use tokio::sync::{watch, Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use risk_manager::circuit_breaker::REASON_CONNECTIVITY;
use risk_manager::{
    AlertSink, CircuitBreaker, CircuitBreakerConfig, CircuitBreakerState, CorrelationManager,
    ErrorHandler, ErrorHandlerConfig, PerformanceMonitor, PerformanceStats, RiskConfig,
    RiskManager, StressTestResult, StressTester,
};
use trading_core::api::{Broker, MarketData};
use trading_core::clock::SharedClock;
use trading_core::config::{Settings, TradingMode};
use trading_core::db::LogLevel;
use trading_core::features::{FeatureEngine, IndicatorEngine};
use trading_core::types::{
    Bar, FinalSignal, NewTrade, OrderRequest, OrderSide, OrderStatus, PortfolioSnapshot,
    RiskDecision,
};
use trading_core::validator::BarValidator;
use trading_core::{Classification, Error, Result, Store};
use trading_engine::{
    build_strategies, EnsembleAggregator, ExecutionService, ExitAction, ExitConfig,
    LiveCredentials, OrderManager, PositionManager, SetupGate, SlippageModel, Strategy,
    SubmitOptions, TradeQueue,
};

use crate::advisory::AdvisoryGate;
use crate::alerts::AlertManager;

/// Run state of the orchestrator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Stopped,
    Running,
    Paused,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Stopped => "stopped",
            RunStatus::Running => "running",
            RunStatus::Paused => "paused",
        }
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Scheduler and pipeline settings.
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    pub cycle_interval: StdDuration,
    pub pause_poll: StdDuration,
    pub stop_timeout: StdDuration,
    pub bars_limit: usize,
    pub max_open_positions: usize,
    pub low_cash_ratio: f64,
    pub setup_gate_enabled: bool,
    pub correlation_checks_enabled: bool,
    pub funding_alerts_enabled: bool,
    pub trade_queue_enabled: bool,
    pub sectors: HashMap<String, String>,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self::from(&Settings::default())
    }
}

impl From<&Settings> for OrchestratorConfig {
    fn from(settings: &Settings) -> Self {
        Self {
            cycle_interval: StdDuration::from_secs(settings.app.cycle_interval_secs),
            pause_poll: StdDuration::from_millis(settings.app.pause_poll_ms),
            stop_timeout: StdDuration::from_secs(settings.app.stop_timeout_secs),
            bars_limit: settings.app.bars_limit,
            max_open_positions: settings.risk.max_open_positions,
            low_cash_ratio: settings.risk.low_cash_ratio,
            setup_gate_enabled: settings.strategies.enable_setup_gate,
            correlation_checks_enabled: settings.risk.correlation_checks_enabled,
            funding_alerts_enabled: settings.funding_alert.enabled,
            trade_queue_enabled: settings.funding_alert.trade_queue_enabled,
            sectors: settings.universe.sectors.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CycleStatus {
    Completed,
    /// The circuit breaker refused trading.
    Halted,
    /// Not run because the orchestrator was stopped.
    Stopped,
    /// Not run because the orchestrator was paused.
    Paused,
}

/// What happened to one symbol in a cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum SymbolOutcome {
    GateBlocked {
        reason: String,
    },
    NoSignal,
    AdvisoryBlocked {
        advisor: String,
        reason: String,
    },
    Vetoed {
        reason: String,
    },
    FundingDeferred {
        missing_cash: Decimal,
        queue_id: Option<i64>,
    },
    CorrelationBlocked {
        reason: String,
    },
    OrderBlocked {
        reason: String,
    },
    OrderRejected {
        status: OrderStatus,
    },
    Submitted {
        order_id: String,
        trade_id: i64,
        shares: u64,
        price: Decimal,
        estimated_cost: Decimal,
    },
}

/// A symbol that failed with an error.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SymbolFailure {
    pub classification: Classification,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SymbolReport {
    pub symbol: String,
    pub result: std::result::Result<SymbolOutcome, SymbolFailure>,
}

/// Result of one `run_cycle` call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CycleSummary {
    pub cycle_id: Option<String>,
    pub status: CycleStatus,
    /// Symbols attempted before the cycle finished or hit the position cap.
    pub processed: usize,
    pub message: Option<String>,
    pub decisions: Vec<RiskDecision>,
    pub symbols: Vec<SymbolReport>,
    pub exit_actions: Vec<String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl CycleSummary {
    fn skipped(status: RunStatus, now: DateTime<Utc>) -> Self {
        let status = match status {
            RunStatus::Paused => CycleStatus::Paused,
            RunStatus::Stopped | RunStatus::Running => CycleStatus::Stopped,
        };
        Self {
            cycle_id: None,
            status,
            processed: 0,
            message: Some("orchestrator is not running; call start() first".to_string()),
            decisions: Vec::new(),
            symbols: Vec::new(),
            exit_actions: Vec::new(),
            started_at: now,
            finished_at: now,
        }
    }

    pub fn outcome(&self, symbol: &str) -> Option<&SymbolOutcome> {
        self.symbols
            .iter()
            .find(|r| r.symbol == symbol)
            .and_then(|r| r.result.as_ref().ok())
    }

    pub fn failure(&self, symbol: &str) -> Option<&SymbolFailure> {
        self.symbols
            .iter()
            .find(|r| r.symbol == symbol)
            .and_then(|r| r.result.as_ref().err())
    }

    pub fn submitted(&self) -> usize {
        self.symbols
            .iter()
            .filter(|r| matches!(r.result, Ok(SymbolOutcome::Submitted { .. })))
            .count()
    }
}

/// Health view for operators.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusReport {
    pub status: RunStatus,
    pub mode: TradingMode,
    pub started_at: DateTime<Utc>,
    pub uptime_secs: i64,
    pub last_cycle_at: Option<DateTime<Utc>>,
    pub circuit_breaker: CircuitBreakerState,
    pub performance: PerformanceStats,
    pub live_session_until: Option<DateTime<Utc>>,
    pub tracked_orders: usize,
}

/// Payload stored in the trade queue for a funding-deferred entry.
#[derive(Debug, Serialize)]
struct DeferredEntry<'a> {
    signal: &'a FinalSignal,
    shares: u64,
    cash_required: Decimal,
    missing_cash: Decimal,
}

/// State shared by the symbols of one cycle.
struct CycleContext {
    cycle_id: String,
    snapshot: PortfolioSnapshot,
    /// Held symbol to portfolio weight.
    holdings: HashMap<String, f64>,
    history: HashMap<String, Vec<Bar>>,
    history_loaded: bool,
    decisions: Vec<RiskDecision>,
    connectivity_failed: bool,
}

/// Bars fetched per holding for stress scenarios; only the last close is used.
const STRESS_BARS: usize = 5;

/// Drives the trading loop.
pub struct Orchestrator {
    config: OrchestratorConfig,
    mode: TradingMode,
    broker: Arc<dyn Broker>,
    market_data: Arc<dyn MarketData>,
    features: Arc<dyn FeatureEngine>,
    store: Store,
    validator: BarValidator,
    setup_gate: SetupGate,
    strategies: Vec<Box<dyn Strategy>>,
    ensemble: EnsembleAggregator,
    risk: RiskManager,
    correlation: CorrelationManager,
    stress: StressTester,
    slippage: SlippageModel,
    breaker: CircuitBreaker,
    error_config: ErrorHandlerConfig,
    error_handler: ErrorHandler,
    alerts: Arc<dyn AlertSink>,
    advisory: Option<Arc<dyn AdvisoryGate>>,
    execution: Arc<ExecutionService>,
    positions: PositionManager,
    queue: TradeQueue,
    performance: RwLock<PerformanceMonitor>,
    /// False when the previous cycle saw connectivity errors.
    connectivity_ok: AtomicBool,
    status: watch::Sender<RunStatus>,
    scheduler: Mutex<Option<JoinHandle<()>>>,
    cycle_lock: Mutex<()>,
    last_summary: RwLock<Option<CycleSummary>>,
    clock: SharedClock,
    started_at: DateTime<Utc>,
}

impl Orchestrator {
    /// Wire every component from `settings`. All of them share the store's clock.
    pub fn new(
        settings: &Settings,
        broker: Arc<dyn Broker>,
        market_data: Arc<dyn MarketData>,
        store: Store,
    ) -> Self {
        let clock = store.clock().clone();
        let features: Arc<dyn FeatureEngine> =
            Arc::new(IndicatorEngine::default().with_clock(clock.clone()));
        let orders = Arc::new(OrderManager::with_clock(
            broker.clone(),
            settings.orders.ttl_minutes,
            clock.clone(),
        ));
        let execution = Arc::new(
            ExecutionService::new(
                settings.app.mode,
                settings.live_safety.clone(),
                broker.clone(),
                orders,
            )
            .with_clock(clock.clone()),
        );
        let positions = PositionManager::new(
            market_data.clone(),
            features.clone(),
            execution.clone(),
            store.clone(),
            ExitConfig::from(settings),
        );
        let alerts: Arc<dyn AlertSink> =
            Arc::new(AlertManager::new(&settings.alerts).with_clock(clock.clone()));
        let error_config = ErrorHandlerConfig::from(&settings.errors);
        let error_handler = ErrorHandler::new(error_config.clone()).with_alert_hook(alerts.clone());
        let (status, _) = watch::channel(RunStatus::Stopped);

        Self {
            config: OrchestratorConfig::from(settings),
            mode: settings.app.mode,
            broker,
            market_data,
            features,
            queue: TradeQueue::new(store.clone(), settings.funding_alert.trade_queue_ttl_hours),
            store,
            validator: BarValidator::from(settings),
            setup_gate: SetupGate::from(&settings.setup_gate),
            strategies: build_strategies(&settings.strategies),
            ensemble: EnsembleAggregator::new(settings.ensemble.min_final_score_to_trade),
            risk: RiskManager::new(RiskConfig::from(&settings.risk)).with_clock(clock.clone()),
            correlation: CorrelationManager::from(&settings.risk),
            stress: StressTester::from(&settings.stress),
            slippage: SlippageModel::from(&settings.slippage),
            breaker: CircuitBreaker::with_clock(
                CircuitBreakerConfig::from(&settings.circuit_breaker),
                clock.clone(),
            ),
            error_config,
            error_handler,
            alerts,
            advisory: None,
            execution,
            positions,
            performance: RwLock::new(PerformanceMonitor::new()),
            connectivity_ok: AtomicBool::new(true),
            status,
            scheduler: Mutex::new(None),
            cycle_lock: Mutex::new(()),
            last_summary: RwLock::new(None),
            started_at: clock.now(),
            clock,
        }
    }

    /// Replace the built-in strategy set.
    pub fn with_strategies(mut self, strategies: Vec<Box<dyn Strategy>>) -> Self {
        self.strategies = strategies;
        self
    }

    pub fn with_advisory_gate(mut self, gate: Arc<dyn AdvisoryGate>) -> Self {
        self.advisory = Some(gate);
        self
    }

    /// Route alerts, including error alerts, to `sink`.
    pub fn with_alert_sink(mut self, sink: Arc<dyn AlertSink>) -> Self {
        self.error_handler = ErrorHandler::new(self.error_config.clone()).with_alert_hook(sink.clone());
        self.alerts = sink;
        self
    }

    pub fn status(&self) -> RunStatus {
        *self.status.borrow()
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn trade_queue(&self) -> &TradeQueue {
        &self.queue
    }

    pub fn execution(&self) -> &Arc<ExecutionService> {
        &self.execution
    }

    /// Enter `running` and make sure the scheduler task is alive.
    ///
    /// Idempotent while running; resumes without restarting when paused.
    pub async fn start(self: &Arc<Self>) {
        let previous = self.status.send_replace(RunStatus::Running);
        {
            let mut scheduler = self.scheduler.lock().await;
            if !scheduler.as_ref().is_some_and(|handle| !handle.is_finished()) {
                let this = Arc::clone(self);
                *scheduler = Some(tokio::spawn(async move { this.run_loop().await }));
            }
        }
        match previous {
            RunStatus::Running => debug!("Start requested while already running"),
            RunStatus::Paused => {
                info!("Orchestrator resumed");
                self.journal(LogLevel::Info, "orchestrator resumed").await;
            }
            RunStatus::Stopped => {
                info!(
                    interval_secs = self.config.cycle_interval.as_secs(),
                    mode = ?self.mode,
                    "Orchestrator started"
                );
                self.journal(LogLevel::Info, "orchestrator started").await;
            }
        }
    }

    /// Enter `running` without the background scheduler.
    ///
    /// Cycles then only run through [`Orchestrator::run_cycle`].
    pub async fn start_manual(&self) {
        if self.status.send_replace(RunStatus::Running) != RunStatus::Running {
            info!("Orchestrator running in manual mode");
            self.journal(LogLevel::Info, "orchestrator started (manual)").await;
        }
    }

    /// Suspend future cycles. The scheduler keeps polling so `start` resumes quickly.
    pub async fn pause(&self) {
        let paused = self.status.send_if_modified(|status| {
            if *status == RunStatus::Running {
                *status = RunStatus::Paused;
                true
            } else {
                false
            }
        });
        if paused {
            info!("Orchestrator paused");
            self.journal(LogLevel::Info, "orchestrator paused").await;
        }
    }

    /// Stop the scheduler, waiting up to the stop timeout for it to exit.
    ///
    /// A cycle already in flight is allowed to finish; no new one starts.
    pub async fn stop(&self) {
        let previous = self.status.send_replace(RunStatus::Stopped);
        let mut scheduler = self.scheduler.lock().await;
        if let Some(handle) = scheduler.as_mut() {
            match tokio::time::timeout(self.config.stop_timeout, handle).await {
                Ok(joined) => {
                    if let Err(e) = joined {
                        error!(error = %e, "Scheduler task ended abnormally");
                    }
                    *scheduler = None;
                }
                Err(_) => warn!(
                    timeout_secs = self.config.stop_timeout.as_secs(),
                    "Scheduler still finishing a cycle; it will exit afterwards"
                ),
            }
        }
        info!(previous = %previous, "Orchestrator stopped");
        self.journal(LogLevel::Info, "orchestrator stopped").await;
    }

    async fn run_loop(self: Arc<Self>) {
        let mut status_rx = self.status.subscribe();
        info!("Scheduler loop started");
        loop {
            let status = *status_rx.borrow_and_update();
            match status {
                RunStatus::Stopped => break,
                RunStatus::Paused => {
                    tokio::select! {
                        _ = status_rx.changed() => {}
                        _ = tokio::time::sleep(self.config.pause_poll) => {}
                    }
                    continue;
                }
                RunStatus::Running => {}
            }

            match self.store.get_watchlist().await {
                Ok(symbols) => {
                    if let Err(e) = self.run_cycle(&symbols).await {
                        if self.error_handler.handle(&e, "cycle").await == Classification::Fatal {
                            error!(error = %e, "Fatal error in scheduled cycle, stopping");
                            self.journal(LogLevel::Error, &format!("scheduler stopped: {e}"))
                                .await;
                            self.status.send_replace(RunStatus::Stopped);
                            break;
                        }
                    }
                }
                Err(e) => {
                    self.error_handler.handle(&e, "watchlist").await;
                }
            }

            if !self.wait_for_next_cycle(&mut status_rx).await {
                break;
            }
        }
        info!("Scheduler loop exited");
    }

    /// Sleep one interval, waking early on a status change.
    /// Returns false once stopped.
    async fn wait_for_next_cycle(&self, status_rx: &mut watch::Receiver<RunStatus>) -> bool {
        let deadline = tokio::time::Instant::now() + self.config.cycle_interval;
        loop {
            tokio::select! {
                _ = tokio::time::sleep_until(deadline) => return true,
                changed = status_rx.changed() => {
                    if changed.is_err() {
                        return false;
                    }
                    let status = *status_rx.borrow_and_update();
                    match status {
                        RunStatus::Stopped => return false,
                        RunStatus::Paused => return true,
                        RunStatus::Running => {}
                    }
                }
            }
        }
    }

    /// Run one full cycle over `symbols`.
    ///
    /// Returns a not-run summary unless the status is `running`. Errors that
    /// leave the cycle without a portfolio (account, positions, open trades)
    /// are returned; per-symbol errors are reported in the summary.
    pub async fn run_cycle(&self, symbols: &[String]) -> Result<CycleSummary> {
        let _cycle = self.cycle_lock.lock().await;

        let status = self.status();
        if status != RunStatus::Running {
            debug!(status = %status, "Cycle skipped");
            return Ok(CycleSummary::skipped(status, self.clock.now()));
        }

        let cycle_id = format!("cycle-{}", Uuid::new_v4().simple());
        let started_at = self.clock.now();
        info!(cycle_id = %cycle_id, symbols = symbols.len(), "Cycle started");

        let purged = self.execution.order_manager().purge_stale_orders().await;
        if !purged.is_empty() {
            self.journal(
                LogLevel::Info,
                &format!("purged {} stale orders", purged.len()),
            )
            .await;
        }

        let exit_actions = self.handle_exits(&cycle_id).await?;

        let account = self.broker.get_account().await?;
        let snapshot = PortfolioSnapshot::from_account(&account);
        let drawdown = {
            let mut performance = self.performance.write().await;
            performance.update_equity(snapshot.equity.to_f64().unwrap_or(0.0), snapshot.exposure());
            performance.current_drawdown()
        };

        let permission = self
            .breaker
            .can_trade(drawdown, self.connectivity_ok.load(Ordering::SeqCst))
            .await;
        if !permission.allowed {
            warn!(cycle_id = %cycle_id, reason = %permission.reason, drawdown, "Trading halted by circuit breaker");
            self.alerts
                .send_alert(
                    "circuit_breaker",
                    "Trading halted",
                    &format!("circuit breaker refused trading: {}", permission.reason),
                )
                .await;
            self.journal(
                LogLevel::Warning,
                &format!("cycle halted: {}", permission.reason),
            )
            .await;
            let summary = CycleSummary {
                cycle_id: Some(cycle_id),
                status: CycleStatus::Halted,
                processed: 0,
                message: Some(permission.reason),
                decisions: Vec::new(),
                symbols: Vec::new(),
                exit_actions,
                started_at,
                finished_at: self.clock.now(),
            };
            *self.last_summary.write().await = Some(summary.clone());
            return Ok(summary);
        }

        let cash_ratio = snapshot.cash_ratio();
        if cash_ratio < self.config.low_cash_ratio {
            self.alerts
                .send_alert(
                    "low_cash",
                    "Low cash",
                    &format!(
                        "cash ratio {cash_ratio:.2} is below {:.2}",
                        self.config.low_cash_ratio
                    ),
                )
                .await;
        }

        let positions = self.broker.list_positions().await?;
        let holdings: HashMap<String, f64> = positions
            .iter()
            .map(|p| (p.symbol.clone(), weight(p.market_value, snapshot.equity)))
            .collect();
        let mut open_positions = snapshot.open_positions.max(positions.len());

        let mut ctx = CycleContext {
            cycle_id: cycle_id.clone(),
            snapshot,
            holdings,
            history: HashMap::new(),
            history_loaded: false,
            decisions: Vec::new(),
            connectivity_failed: false,
        };
        let mut reports = Vec::with_capacity(symbols.len());
        let mut processed = 0;

        for symbol in symbols {
            if open_positions >= self.config.max_open_positions {
                info!(
                    open_positions,
                    max_open_positions = self.config.max_open_positions,
                    "Max open positions reached, skipping remaining symbols"
                );
                break;
            }
            processed += 1;
            let result = self.process_symbol(&mut ctx, symbol).await;
            if matches!(result, Ok(SymbolOutcome::Submitted { .. })) {
                open_positions += 1;
            }
            reports.push(SymbolReport {
                symbol: symbol.clone(),
                result,
            });
        }

        self.connectivity_ok
            .store(!ctx.connectivity_failed, Ordering::SeqCst);

        let summary = CycleSummary {
            cycle_id: Some(cycle_id),
            status: CycleStatus::Completed,
            processed,
            message: None,
            decisions: ctx.decisions,
            symbols: reports,
            exit_actions,
            started_at,
            finished_at: self.clock.now(),
        };
        info!(
            cycle_id = ?summary.cycle_id,
            processed = summary.processed,
            submitted = summary.submitted(),
            "Cycle completed"
        );
        *self.last_summary.write().await = Some(summary.clone());
        Ok(summary)
    }

    async fn handle_exits(&self, cycle_id: &str) -> Result<Vec<String>> {
        let actions = self.positions.evaluate_exits().await?;
        let mut lines = Vec::with_capacity(actions.len());
        for action in &actions {
            let line = action.describe();
            info!(cycle_id, action = %line, "Exit action");
            let level = match action {
                ExitAction::Failed { .. } | ExitAction::ExitNotExecuted { .. } => LogLevel::Warning,
                ExitAction::TrailingStop { .. } | ExitAction::Exit { .. } => LogLevel::Info,
            };
            self.journal(level, &line).await;
            if let ExitAction::Exit { pnl, .. } = action {
                self.performance.write().await.record_trade(*pnl);
            }
            lines.push(line);
        }
        Ok(lines)
    }

    async fn process_symbol(
        &self,
        ctx: &mut CycleContext,
        symbol: &str,
    ) -> std::result::Result<SymbolOutcome, SymbolFailure> {
        let bars = match self.fetch_bars(symbol).await {
            Ok(bars) => bars,
            Err(e) => return Err(self.symbol_failure(ctx, symbol, &e, true).await),
        };
        match self.evaluate_symbol(ctx, symbol, bars).await {
            Ok(outcome) => {
                self.breaker.record_success().await;
                debug!(symbol, outcome = ?outcome, "Symbol processed");
                Ok(outcome)
            }
            Err(e) => Err(self.symbol_failure(ctx, symbol, &e, false).await),
        }
    }

    /// Daily bars with retry on transient errors. The final error is already
    /// routed through the error handler.
    async fn fetch_bars(&self, symbol: &str) -> Result<Vec<Bar>> {
        let market_data = &self.market_data;
        let limit = self.config.bars_limit;
        self.error_handler
            .retry(&format!("bars:{symbol}"), move || {
                market_data.get_daily_bars(symbol, limit)
            })
            .await
    }

    async fn symbol_failure(
        &self,
        ctx: &mut CycleContext,
        symbol: &str,
        err: &Error,
        handled: bool,
    ) -> SymbolFailure {
        let classification = if handled {
            self.error_handler.classify(err)
        } else {
            self.error_handler
                .handle(err, &format!("symbol:{symbol}"))
                .await
        };
        if err.is_retryable() {
            ctx.connectivity_failed = true;
        }
        if classification != Classification::Fatal {
            let reason = if err.is_retryable() {
                REASON_CONNECTIVITY.to_string()
            } else {
                format!("{classification}_error")
            };
            self.breaker.record_failure(&reason).await;
        }
        self.journal(LogLevel::Error, &format!("{symbol} failed: {err}"))
            .await;
        SymbolFailure {
            classification,
            message: err.to_string(),
        }
    }

    async fn evaluate_symbol(
        &self,
        ctx: &mut CycleContext,
        symbol: &str,
        bars: Vec<Bar>,
    ) -> Result<SymbolOutcome> {
        let bars = self.validator.validate(symbol, bars)?;
        let features = self.features.compute(symbol, &bars)?;

        if self.config.setup_gate_enabled {
            let (allowed, reason) = self.setup_gate.allow(&features);
            if !allowed {
                debug!(symbol, reason, "Setup gate blocked");
                return Ok(SymbolOutcome::GateBlocked {
                    reason: reason.to_string(),
                });
            }
        }

        let intents = self
            .strategies
            .iter()
            .filter_map(|strategy| strategy.generate(&features))
            .collect();
        let Some(signal) = self.ensemble.aggregate(intents) else {
            return Ok(SymbolOutcome::NoSignal);
        };
        self.store.add_signal(&signal).await?;
        info!(symbol, score = signal.score, entry = %signal.entry, stop = %signal.stop, "Final signal");

        if let Some(advisor) = &self.advisory {
            match advisor.review(&signal).await {
                Ok(verdict) if !verdict.allowed => {
                    info!(symbol, advisor = advisor.name(), reason = %verdict.reason, "Advisory gate blocked");
                    return Ok(SymbolOutcome::AdvisoryBlocked {
                        advisor: advisor.name().to_string(),
                        reason: verdict.reason,
                    });
                }
                Ok(verdict) => {
                    debug!(symbol, advisor = advisor.name(), score = ?verdict.score, "Advisory gate passed")
                }
                Err(e) => {
                    warn!(symbol, advisor = advisor.name(), error = %e, "Advisory gate unavailable, continuing")
                }
            }
        }

        let (decision, funding) = self.risk.evaluate(&signal, &ctx.snapshot);
        ctx.decisions.push(decision.clone());

        if !decision.approved {
            let Some(alert) = funding else {
                info!(symbol, reason = %decision.reason(), "Risk veto");
                return Ok(SymbolOutcome::Vetoed {
                    reason: decision.reason(),
                });
            };
            let missing_cash = alert.missing_cash;
            if self.config.funding_alerts_enabled {
                self.store.add_funding_alert(&alert).await?;
                self.alerts
                    .send_alert(
                        &format!("funding:{symbol}"),
                        "Funding alert",
                        &format!(
                            "{symbol} needs {missing_cash:.2} more cash; options: {}",
                            alert.actions_label()
                        ),
                    )
                    .await;
            }
            let queue_id = if self.config.trade_queue_enabled {
                let entry = DeferredEntry {
                    signal: &signal,
                    shares: decision.shares,
                    cash_required: decision.cash_required,
                    missing_cash,
                };
                Some(
                    self.queue
                        .enqueue(symbol, &serde_json::to_value(&entry)?)
                        .await?,
                )
            } else {
                None
            };
            self.journal(
                LogLevel::Warning,
                &format!("{symbol} deferred: missing cash {missing_cash:.2}"),
            )
            .await;
            return Ok(SymbolOutcome::FundingDeferred {
                missing_cash,
                queue_id,
            });
        }

        if self.config.correlation_checks_enabled {
            let candidate_weight = weight(decision.cash_required, ctx.snapshot.equity);
            if !ctx.holdings.is_empty() {
                self.load_holdings_history(ctx).await;
            }
            ctx.history.insert(symbol.to_string(), bars);
            for check in [
                self.correlation
                    .check_symbol(symbol, candidate_weight, &ctx.holdings, &ctx.history),
                self.correlation.check_sector(
                    symbol,
                    candidate_weight,
                    &ctx.holdings,
                    &self.config.sectors,
                ),
            ] {
                if !check.passed {
                    info!(symbol, reason = %check.reason, "Concentration limit blocked entry");
                    return Ok(SymbolOutcome::CorrelationBlocked {
                        reason: check.reason,
                    });
                }
            }
        }

        let request = OrderRequest::market(symbol, OrderSide::Buy, decision.shares)
            .with_bracket(signal.stop, signal.take_profit)
            .with_idempotency_key(format!("{}-{symbol}", ctx.cycle_id));
        let report = match self
            .execution
            .submit_order(&request, &SubmitOptions::default())
            .await
        {
            Ok(report) => report,
            Err(Error::LiveLock(reason)) => {
                warn!(symbol, reason = %reason, "Entry blocked by live lock");
                self.journal(LogLevel::Warning, &format!("{symbol} blocked: {reason}"))
                    .await;
                return Ok(SymbolOutcome::OrderBlocked { reason });
            }
            Err(e) => return Err(e),
        };

        if report.status == OrderStatus::Blocked {
            let reason = report
                .error_message
                .unwrap_or_else(|| OrderStatus::Blocked.to_string());
            self.journal(LogLevel::Warning, &format!("{symbol} blocked: {reason}"))
                .await;
            return Ok(SymbolOutcome::OrderBlocked { reason });
        }
        if !report.is_accepted() {
            warn!(symbol, status = %report.status, "Entry order not accepted");
            return Ok(SymbolOutcome::OrderRejected {
                status: report.status,
            });
        }

        let price = report.average_fill_price.unwrap_or(signal.entry);
        let trade_id = self
            .store
            .add_trade(&NewTrade {
                symbol: symbol.to_string(),
                side: OrderSide::Buy,
                quantity: decision.shares,
                entry: price,
                stop: signal.stop,
                take_profit: signal.take_profit,
            })
            .await?;
        self.store
            .add_fill(
                Some(trade_id),
                Some(&report.order_id),
                symbol,
                decision.shares,
                price,
            )
            .await?;

        // Later candidates in this cycle are checked against this entry.
        ctx.holdings.insert(
            symbol.to_string(),
            weight(decision.cash_required, ctx.snapshot.equity),
        );
        ctx.snapshot.cash -= decision.cash_required;
        ctx.snapshot.open_positions += 1;

        let estimated_cost = self.slippage.estimate_cost(price, decision.shares);
        self.performance.write().await.record_slippage(estimated_cost);

        info!(
            symbol,
            trade_id,
            order_id = %report.order_id,
            shares = decision.shares,
            price = %price,
            estimated_cost = %estimated_cost,
            "Entry submitted"
        );
        self.journal(
            LogLevel::Info,
            &format!("bought {} {symbol} at {price:.2}", decision.shares),
        )
        .await;

        Ok(SymbolOutcome::Submitted {
            order_id: report.order_id,
            trade_id,
            shares: decision.shares,
            price,
            estimated_cost,
        })
    }

    /// Fetch bars for held symbols once per cycle. Missing history only
    /// weakens the correlation check, so fetch errors are skipped.
    async fn load_holdings_history(&self, ctx: &mut CycleContext) {
        if ctx.history_loaded {
            return;
        }
        ctx.history_loaded = true;
        let mut held: Vec<String> = ctx.holdings.keys().cloned().collect();
        held.sort();
        for symbol in held {
            if ctx.history.contains_key(&symbol) {
                continue;
            }
            let bars = match self
                .market_data
                .get_daily_bars(&symbol, self.config.bars_limit)
                .await
                .and_then(|bars| self.validator.validate(&symbol, bars))
            {
                Ok(bars) => bars,
                Err(e) => {
                    debug!(symbol = %symbol, error = %e, "No history for held symbol");
                    continue;
                }
            };
            ctx.history.insert(symbol, bars);
        }
    }

    pub async fn last_run_summary(&self) -> Option<CycleSummary> {
        self.last_summary.read().await.clone()
    }

    pub async fn status_report(&self) -> StatusReport {
        let now = self.clock.now();
        let last_cycle_at = self
            .last_summary
            .read()
            .await
            .as_ref()
            .map(|summary| summary.finished_at);
        StatusReport {
            status: self.status(),
            mode: self.mode,
            started_at: self.started_at,
            uptime_secs: (now - self.started_at).num_seconds(),
            last_cycle_at,
            circuit_breaker: self.breaker.state().await,
            performance: self.performance.read().await.stats(),
            live_session_until: self.execution.session_expires_at().await,
            tracked_orders: self.execution.order_manager().tracked(),
        }
    }

    /// Apply the configured shock scenarios to current broker positions.
    ///
    /// Holdings whose bars cannot be fetched are reported with no impact.
    pub async fn stress_test(&self) -> Result<Vec<StressTestResult>> {
        let account = self.broker.get_account().await?;
        let equity = PortfolioSnapshot::from_account(&account).equity;
        let positions = self.broker.list_positions().await?;

        let mut weights = HashMap::with_capacity(positions.len());
        let mut history = HashMap::with_capacity(positions.len());
        for position in &positions {
            weights.insert(position.symbol.clone(), weight(position.market_value, equity));
            match self
                .market_data
                .get_daily_bars(&position.symbol, STRESS_BARS)
                .await
            {
                Ok(bars) => {
                    history.insert(position.symbol.clone(), bars);
                }
                Err(e) => {
                    warn!(symbol = %position.symbol, error = %e, "No bars for stress test")
                }
            }
        }

        let results = self.stress.run(&history, &weights);
        if let Some(worst) = risk_manager::worst_case(&results) {
            info!(
                scenario = %worst.scenario,
                portfolio_return = worst.portfolio_return,
                holdings = positions.len(),
                "Stress test complete"
            );
        }
        Ok(results)
    }

    /// Allow trading for `minutes` regardless of breaker state.
    pub async fn manual_override(&self, minutes: i64) {
        self.breaker.manual_override(minutes).await;
        self.journal(
            LogLevel::Warning,
            &format!("circuit breaker manual override for {minutes} minutes"),
        )
        .await;
    }

    pub async fn reset_circuit_breaker(&self) {
        self.breaker.reset().await;
        self.journal(LogLevel::Info, "circuit breaker reset").await;
    }

    pub async fn unlock_live_session(&self, credentials: &LiveCredentials) -> Result<DateTime<Utc>> {
        match self.execution.unlock_live_session(credentials).await {
            Ok(until) => {
                self.journal(LogLevel::Warning, &format!("live session unlocked until {until}"))
                    .await;
                Ok(until)
            }
            Err(e) => {
                self.journal(LogLevel::Warning, &format!("live unlock rejected: {e}"))
                    .await;
                Err(e)
            }
        }
    }

    pub async fn lock_live_session(&self) {
        self.execution.lock_live_session().await;
        self.journal(LogLevel::Info, "live session locked").await;
    }

    /// Append an operator-facing log row. Storage errors are only traced.
    async fn journal(&self, level: LogLevel, message: &str) {
        if let Err(e) = self.store.add_log(level, message).await {
            warn!(error = %e, "Failed to write log row");
        }
    }
}

/// `amount / equity` as a fraction, 0 for empty accounts.
fn weight(amount: Decimal, equity: Decimal) -> f64 {
    if equity <= Decimal::ZERO {
        return 0.0;
    }
    (amount / equity).to_f64().unwrap_or(0.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::advisory::AdvisoryVerdict;
    use mockall::mock;
    use tokio_test::assert_ok;
    use trading_core::api::MockBroker;
    use trading_core::clock::ManualClock;
    use trading_core::config::LiveSafetySettings;
    use trading_core::types::{
        BrokerPosition, Direction, Features, SignalIntent, SignalStrength,
    };

    /// Fires on every symbol with a fixed confidence.
    struct FixedStrategy(f64);

    impl Strategy for FixedStrategy {
        fn name(&self) -> &'static str {
            "fixed"
        }

        fn required_features(&self) -> &'static [&'static str] {
            &["close"]
        }

        fn generate(&self, features: &Features) -> Option<SignalIntent> {
            let close = Decimal::from_f64_retain(features.close())?.round_dp(2);
            Some(SignalIntent {
                symbol: features.symbol.clone(),
                direction: Direction::Long,
                confidence: self.0,
                entry: close,
                stop: close - Decimal::new(5, 0),
                take_profit: close + Decimal::new(10, 0),
                reasons: vec!["fixed".to_string()],
                strategy: "fixed".to_string(),
                strength: SignalStrength::Strong,
                ts: features.computed_at,
            })
        }
    }

    mock! {
        pub Advisor {}

        #[async_trait::async_trait]
        impl AdvisoryGate for Advisor {
            fn name(&self) -> &str;
            async fn review(&self, signal: &FinalSignal) -> Result<AdvisoryVerdict>;
        }
    }

    fn settings() -> Settings {
        let mut settings = Settings::default();
        settings.strategies.enable_setup_gate = false;
        settings.errors.retry_delay_ms = 1;
        settings.app.pause_poll_ms = 10;
        settings.app.stop_timeout_secs = 2;
        settings
    }

    struct Harness {
        broker: Arc<MockBroker>,
        store: Store,
        orchestrator: Arc<Orchestrator>,
    }

    async fn harness_with(settings: Settings, confidence: f64) -> Harness {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let broker = Arc::new(MockBroker::with_clock(clock.clone()));
        let store = Store::in_memory().await.unwrap().with_clock(clock);
        let orchestrator = Orchestrator::new(&settings, broker.clone(), broker.clone(), store.clone())
            .with_strategies(vec![Box::new(FixedStrategy(confidence))]);
        Harness {
            broker,
            store,
            orchestrator: Arc::new(orchestrator),
        }
    }

    async fn harness() -> Harness {
        harness_with(settings(), 0.8).await
    }

    fn symbols(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn test_cycle_refused_unless_running() {
        let h = harness().await;
        let summary = h.orchestrator.run_cycle(&symbols(&["AAPL"])).await.unwrap();
        assert_eq!(summary.status, CycleStatus::Stopped);
        assert_eq!(summary.processed, 0);
        assert!(summary.message.is_some());
        assert_eq!(h.broker.submit_count(), 0);
        assert!(h.orchestrator.last_run_summary().await.is_none());

        h.orchestrator.start_manual().await;
        h.orchestrator.pause().await;
        let summary = h.orchestrator.run_cycle(&symbols(&["AAPL"])).await.unwrap();
        assert_eq!(summary.status, CycleStatus::Paused);
    }

    #[tokio::test]
    async fn test_cycle_submits_and_persists_trade() {
        let h = harness().await;
        h.orchestrator.start_manual().await;

        let summary = h.orchestrator.run_cycle(&symbols(&["AAPL"])).await.unwrap();
        assert_eq!(summary.status, CycleStatus::Completed);
        assert_eq!(summary.processed, 1);
        assert_eq!(summary.decisions.len(), 1);
        assert!(summary.decisions[0].approved);

        let Some(SymbolOutcome::Submitted { shares, trade_id, .. }) = summary.outcome("AAPL") else {
            panic!("expected submission, got {:?}", summary.symbols);
        };
        let trade = h.store.get_trade(*trade_id).await.unwrap().unwrap();
        assert!(trade.is_open());
        assert_eq!(trade.quantity, *shares);

        let submitted = h.broker.submitted();
        assert_eq!(submitted.len(), 1);
        assert!(submitted[0].is_bracket());
        assert!(submitted[0]
            .idempotency_key
            .as_deref()
            .is_some_and(|key| key.ends_with("-AAPL")));

        let last = h.orchestrator.last_run_summary().await.unwrap();
        assert_eq!(last.cycle_id, summary.cycle_id);
        let report = h.orchestrator.status_report().await;
        assert!(report.performance.total_slippage > Decimal::ZERO);
        assert_eq!(report.tracked_orders, 1);
    }

    #[tokio::test]
    async fn test_low_confidence_produces_no_signal() {
        let h = harness_with(settings(), 0.5).await;
        h.orchestrator.start_manual().await;
        let summary = h.orchestrator.run_cycle(&symbols(&["AAPL"])).await.unwrap();
        assert_eq!(summary.outcome("AAPL"), Some(&SymbolOutcome::NoSignal));
        assert!(summary.decisions.is_empty());
    }

    #[tokio::test]
    async fn test_symbol_failure_is_isolated() {
        let h = harness().await;
        h.broker.fail_bars_for("BAD");
        h.orchestrator.start_manual().await;

        let summary = assert_ok!(h.orchestrator.run_cycle(&symbols(&["BAD", "AAPL"])).await);
        assert_eq!(summary.processed, 2);
        let failure = summary.failure("BAD").unwrap();
        assert_eq!(failure.classification, Classification::Recoverable);
        assert!(matches!(
            summary.outcome("AAPL"),
            Some(SymbolOutcome::Submitted { .. })
        ));

        // AAPL succeeded after BAD, which reset the failure counter.
        let report = h.orchestrator.status_report().await;
        assert_eq!(report.circuit_breaker.consecutive_failures, 0);
        let logs = h.store.list_logs(20).await.unwrap();
        assert!(logs.iter().any(|l| l.message.starts_with("BAD failed")));
    }

    #[tokio::test]
    async fn test_repeated_failures_halt_next_cycle() {
        let h = harness().await;
        for symbol in ["X1", "X2", "X3"] {
            h.broker.fail_bars_for(symbol);
        }
        h.orchestrator.start_manual().await;
        let summary = h
            .orchestrator
            .run_cycle(&symbols(&["X1", "X2", "X3"]))
            .await
            .unwrap();
        assert_eq!(summary.status, CycleStatus::Completed);

        let summary = h.orchestrator.run_cycle(&symbols(&["AAPL"])).await.unwrap();
        assert_eq!(summary.status, CycleStatus::Halted);
        assert_eq!(summary.message.as_deref(), Some(REASON_CONNECTIVITY));
        assert_eq!(h.broker.submit_count(), 0);
    }

    #[tokio::test]
    async fn test_drawdown_halts_until_manual_override() {
        let h = harness().await;
        h.orchestrator.start_manual().await;
        h.orchestrator.run_cycle(&[]).await.unwrap();

        h.broker.set_portfolio_value(Decimal::new(80_000, 0));
        let summary = h.orchestrator.run_cycle(&symbols(&["AAPL"])).await.unwrap();
        assert_eq!(summary.status, CycleStatus::Halted);
        assert_eq!(summary.message.as_deref(), Some("drawdown_limit"));
        assert_eq!(summary.processed, 0);

        h.orchestrator.manual_override(30).await;
        let summary = h.orchestrator.run_cycle(&symbols(&["AAPL"])).await.unwrap();
        assert_eq!(summary.status, CycleStatus::Completed);
        assert_eq!(summary.processed, 1);
    }

    #[tokio::test]
    async fn test_funding_shortfall_is_deferred_to_queue() {
        let h = harness().await;
        h.broker.set_cash(Decimal::new(1_000, 0));
        h.broker.set_portfolio_value(Decimal::new(100_000, 0));
        h.orchestrator.start_manual().await;

        let summary = h.orchestrator.run_cycle(&symbols(&["AAPL"])).await.unwrap();
        let Some(SymbolOutcome::FundingDeferred { missing_cash, queue_id }) = summary.outcome("AAPL")
        else {
            panic!("expected deferral, got {:?}", summary.symbols);
        };
        assert!(*missing_cash > Decimal::ZERO);
        assert!(queue_id.is_some());
        assert_eq!(h.broker.submit_count(), 0);

        let queued = h.orchestrator.trade_queue().list_active().await.unwrap();
        assert_eq!(queued.len(), 1);
        assert_eq!(queued[0].symbol, "AAPL");
        assert_eq!(h.store.list_funding_alerts(10).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_stops_at_max_open_positions() {
        let mut settings = settings();
        settings.risk.max_open_positions = 2;
        // Generated bars are identical across symbols.
        settings.risk.correlation_checks_enabled = false;
        let h = harness_with(settings, 0.8).await;
        h.broker.set_positions(vec![BrokerPosition {
            symbol: "SPY".to_string(),
            qty: Decimal::new(10, 0),
            market_value: Decimal::new(5_000, 0),
            avg_entry_price: Decimal::new(500, 0),
        }]);
        h.orchestrator.start_manual().await;

        let summary = h
            .orchestrator
            .run_cycle(&symbols(&["AAPL", "MSFT", "NVDA"]))
            .await
            .unwrap();
        assert_eq!(summary.processed, 1);
        assert_eq!(summary.submitted(), 1);
    }

    #[tokio::test]
    async fn test_correlated_candidate_is_blocked() {
        let h = harness().await;
        h.broker.set_positions(vec![BrokerPosition {
            symbol: "QQQ".to_string(),
            qty: Decimal::new(10, 0),
            market_value: Decimal::new(4_000, 0),
            avg_entry_price: Decimal::new(400, 0),
        }]);
        h.orchestrator.start_manual().await;

        let summary = h.orchestrator.run_cycle(&symbols(&["AAPL"])).await.unwrap();
        assert!(matches!(
            summary.outcome("AAPL"),
            Some(SymbolOutcome::CorrelationBlocked { reason }) if reason.contains("QQQ")
        ));
        assert!(summary.decisions[0].approved);
        assert_eq!(h.broker.submit_count(), 0);
    }

    #[tokio::test]
    async fn test_same_cycle_entries_count_toward_sector_cap() {
        let mut settings = settings();
        settings.risk.max_sector_weight = 0.20;
        settings.risk.max_symbol_correlation = 1.5;
        settings.universe.sectors = HashMap::from([
            ("AAPL".to_string(), "tech".to_string()),
            ("MSFT".to_string(), "tech".to_string()),
        ]);
        let h = harness_with(settings, 0.8).await;
        h.orchestrator.start_manual().await;

        let summary = h
            .orchestrator
            .run_cycle(&symbols(&["AAPL", "MSFT"]))
            .await
            .unwrap();
        assert!(matches!(
            summary.outcome("AAPL"),
            Some(SymbolOutcome::Submitted { .. })
        ));
        assert!(matches!(
            summary.outcome("MSFT"),
            Some(SymbolOutcome::CorrelationBlocked { reason }) if reason.starts_with("sector_weight")
        ));
        assert_eq!(h.broker.submit_count(), 1);
    }

    #[tokio::test]
    async fn test_same_cycle_entries_count_toward_correlation() {
        let h = harness().await;
        h.orchestrator.start_manual().await;

        let summary = h
            .orchestrator
            .run_cycle(&symbols(&["AAPL", "NVDA"]))
            .await
            .unwrap();
        assert_eq!(summary.submitted(), 1);
        assert!(matches!(
            summary.outcome("NVDA"),
            Some(SymbolOutcome::CorrelationBlocked { reason }) if reason.contains("AAPL")
        ));
    }

    #[tokio::test]
    async fn test_stress_test_weights_current_positions() {
        let h = harness().await;
        h.broker.set_positions(vec![
            BrokerPosition {
                symbol: "AAPL".to_string(),
                qty: Decimal::new(100, 0),
                market_value: Decimal::new(20_000, 0),
                avg_entry_price: Decimal::new(200, 0),
            },
            BrokerPosition {
                symbol: "BAD".to_string(),
                qty: Decimal::new(10, 0),
                market_value: Decimal::new(10_000, 0),
                avg_entry_price: Decimal::new(1_000, 0),
            },
        ]);
        h.broker.fail_bars_for("BAD");

        let results = h.orchestrator.stress_test().await.unwrap();
        assert_eq!(results.len(), 3);
        let down_10 = results.iter().find(|r| r.scenario == "down_10").unwrap();
        // AAPL is 20% of 100k equity; BAD has no bars.
        assert!((down_10.portfolio_return + 0.02).abs() < 1e-9);
        assert_eq!(down_10.details["BAD"], 0.0);
        assert_eq!(h.broker.submit_count(), 0);
    }

    #[tokio::test]
    async fn test_advisory_gate_can_block() {
        let mut advisor = MockAdvisor::new();
        advisor.expect_name().return_const("news".to_string());
        advisor
            .expect_review()
            .returning(|_| Ok(AdvisoryVerdict::block("negative headlines").with_score(-0.6)));

        let h = harness().await;
        let orchestrator = Arc::try_unwrap(h.orchestrator)
            .ok()
            .unwrap()
            .with_advisory_gate(Arc::new(advisor));
        orchestrator.start_manual().await;

        let summary = orchestrator.run_cycle(&symbols(&["AAPL"])).await.unwrap();
        assert_eq!(
            summary.outcome("AAPL"),
            Some(&SymbolOutcome::AdvisoryBlocked {
                advisor: "news".to_string(),
                reason: "negative headlines".to_string(),
            })
        );
        assert_eq!(h.broker.submit_count(), 0);
    }

    #[tokio::test]
    async fn test_live_lock_blocks_entries_without_failing() {
        let mut settings = settings();
        settings.app.mode = TradingMode::Live;
        settings.live_safety = LiveSafetySettings {
            unlock_pin: Some("1234".to_string()),
            ..Default::default()
        };
        let h = harness_with(settings, 0.8).await;
        h.orchestrator.start_manual().await;

        let summary = h.orchestrator.run_cycle(&symbols(&["AAPL"])).await.unwrap();
        assert!(matches!(
            summary.outcome("AAPL"),
            Some(SymbolOutcome::OrderBlocked { reason }) if reason.contains("locked")
        ));
        let report = h.orchestrator.status_report().await;
        assert_eq!(report.circuit_breaker.consecutive_failures, 0);
        assert!(h.store.list_open_trades().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_scheduler_lifecycle() {
        let mut settings = settings();
        settings.app.cycle_interval_secs = 3600;
        let h = harness_with(settings, 0.8).await;
        h.store.set_watchlist(&symbols(&["AAPL"])).await.unwrap();
        let orchestrator = h.orchestrator.clone();

        orchestrator.start().await;
        assert_eq!(orchestrator.status(), RunStatus::Running);
        orchestrator.start().await;

        // The first scheduled cycle runs immediately.
        tokio::time::timeout(StdDuration::from_secs(5), async {
            while orchestrator.last_run_summary().await.is_none() {
                tokio::time::sleep(StdDuration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();
        assert_eq!(h.broker.submit_count(), 1);

        orchestrator.pause().await;
        assert_eq!(orchestrator.status(), RunStatus::Paused);
        orchestrator.start().await;
        assert_eq!(orchestrator.status(), RunStatus::Running);

        orchestrator.stop().await;
        assert_eq!(orchestrator.status(), RunStatus::Stopped);
        assert!(orchestrator.scheduler.lock().await.is_none());

        // Pausing a stopped orchestrator is a no-op.
        orchestrator.pause().await;
        assert_eq!(orchestrator.status(), RunStatus::Stopped);
    }
}
