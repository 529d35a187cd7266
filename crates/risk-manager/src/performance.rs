//! Running performance statistics fed once per cycle.

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Snapshot of [`PerformanceMonitor`] for status reports.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PerformanceStats {
    pub equity: f64,
    pub peak_equity: f64,
    pub current_drawdown: f64,
    pub max_drawdown: f64,
    pub exposure: f64,
    pub trades: usize,
    pub win_rate: f64,
    pub consecutive_losses: u32,
    pub total_slippage: Decimal,
}

/// Equity curve, drawdown, and trade outcome tracking.
#[derive(Debug, Clone, Default)]
pub struct PerformanceMonitor {
    equity_curve: Vec<f64>,
    peak_equity: f64,
    max_drawdown: f64,
    exposure: f64,
    trade_pnls: Vec<f64>,
    consecutive_losses: u32,
    total_slippage: Decimal,
}

impl PerformanceMonitor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update_equity(&mut self, equity: f64, exposure: f64) {
        self.equity_curve.push(equity);
        if equity > self.peak_equity {
            self.peak_equity = equity;
        }
        self.max_drawdown = self.max_drawdown.max(self.current_drawdown());
        self.exposure = exposure;
    }

    pub fn record_trade(&mut self, pnl: Decimal) {
        let pnl = pnl.to_f64().unwrap_or(0.0);
        self.trade_pnls.push(pnl);
        if pnl < 0.0 {
            self.consecutive_losses += 1;
        } else {
            self.consecutive_losses = 0;
        }
    }

    pub fn record_slippage(&mut self, cost: Decimal) {
        self.total_slippage += cost;
    }

    pub fn win_rate(&self) -> f64 {
        if self.trade_pnls.is_empty() {
            return 0.0;
        }
        let wins = self.trade_pnls.iter().filter(|&&pnl| pnl > 0.0).count();
        wins as f64 / self.trade_pnls.len() as f64
    }

    /// Largest peak-to-trough drop seen so far.
    pub fn drawdown(&self) -> f64 {
        self.max_drawdown
    }

    /// Drop of the latest equity point from the running peak.
    pub fn current_drawdown(&self) -> f64 {
        match self.equity_curve.last() {
            Some(&equity) if self.peak_equity > 0.0 => {
                ((self.peak_equity - equity) / self.peak_equity).max(0.0)
            }
            _ => 0.0,
        }
    }

    pub fn consecutive_losses(&self) -> u32 {
        self.consecutive_losses
    }

    pub fn stats(&self) -> PerformanceStats {
        PerformanceStats {
            equity: self.equity_curve.last().copied().unwrap_or(0.0),
            peak_equity: self.peak_equity,
            current_drawdown: self.current_drawdown(),
            max_drawdown: self.max_drawdown,
            exposure: self.exposure,
            trades: self.trade_pnls.len(),
            win_rate: self.win_rate(),
            consecutive_losses: self.consecutive_losses,
            total_slippage: self.total_slippage,
        }
    }
}
