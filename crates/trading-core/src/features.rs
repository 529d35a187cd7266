//! Technical indicator computation.

use crate::clock::{system_clock, SharedClock};
use crate::types::{Bar, Features};
use crate::{Error, Result};

/// Turns a bar series into a feature set.
pub trait FeatureEngine: Send + Sync {
    #[allow(clippy::result_large_err)]
    fn compute(&self, symbol: &str, bars: &[Bar]) -> Result<Features>;
}

/// Indicator periods used by [`IndicatorEngine`].
#[derive(Debug, Clone)]
pub struct IndicatorConfig {
    pub atr_period: usize,
    pub rsi_period: usize,
    pub ema_fast: usize,
    pub ema_slow: usize,
    pub volume_window: usize,
    pub swing_window: usize,
}

impl Default for IndicatorConfig {
    fn default() -> Self {
        Self {
            atr_period: 14,
            rsi_period: 14,
            ema_fast: 12,
            ema_slow: 26,
            volume_window: 20,
            swing_window: 20,
        }
    }
}

/// ATR, RSI, EMA trend, volume and swing-level indicators.
#[derive(Debug, Clone)]
pub struct IndicatorEngine {
    config: IndicatorConfig,
    clock: SharedClock,
}

impl Default for IndicatorEngine {
    fn default() -> Self {
        Self::new(IndicatorConfig::default())
    }
}

impl IndicatorEngine {
    pub fn new(config: IndicatorConfig) -> Self {
        Self {
            config,
            clock: system_clock(),
        }
    }

    pub fn with_clock(mut self, clock: SharedClock) -> Self {
        self.clock = clock;
        self
    }

    /// Simple mean of the trailing `period` true ranges; 0 when too short.
    fn atr(bars: &[Bar], period: usize) -> f64 {
        if bars.len() < period + 1 || period == 0 {
            return 0.0;
        }
        let ranges: Vec<f64> = bars
            .windows(2)
            .map(|w| {
                let prev_close = w[0].close;
                let b = &w[1];
                (b.high - b.low)
                    .max((b.high - prev_close).abs())
                    .max((b.low - prev_close).abs())
            })
            .collect();
        let tail = &ranges[ranges.len() - period..];
        tail.iter().sum::<f64>() / period as f64
    }

    fn rsi(closes: &[f64], period: usize) -> f64 {
        if closes.len() < period + 1 || period == 0 {
            return 0.0;
        }
        let deltas: Vec<f64> = closes.windows(2).map(|w| w[1] - w[0]).collect();
        let tail = &deltas[deltas.len() - period..];
        let gain = tail.iter().filter(|d| **d > 0.0).sum::<f64>() / period as f64;
        let loss = -tail.iter().filter(|d| **d < 0.0).sum::<f64>() / period as f64;
        if loss == 0.0 {
            return if gain > 0.0 { 100.0 } else { 50.0 };
        }
        100.0 - 100.0 / (1.0 + gain / loss)
    }

    /// Recursive EMA seeded with the first close.
    fn ema(closes: &[f64], span: usize) -> f64 {
        let alpha = 2.0 / (span as f64 + 1.0);
        let mut iter = closes.iter();
        let Some(first) = iter.next() else {
            return 0.0;
        };
        iter.fold(*first, |acc, c| alpha * c + (1.0 - alpha) * acc)
    }

    fn trailing_mean(values: &[f64], window: usize) -> f64 {
        if values.len() < window || window == 0 {
            return 0.0;
        }
        values[values.len() - window..].iter().sum::<f64>() / window as f64
    }
}

impl FeatureEngine for IndicatorEngine {
    fn compute(&self, symbol: &str, bars: &[Bar]) -> Result<Features> {
        let Some(last) = bars.last() else {
            return Err(Error::DataValidation(format!("{symbol}: no bars to compute")));
        };
        let cfg = &self.config;
        let closes: Vec<f64> = bars.iter().map(|b| b.close).collect();
        let volumes: Vec<f64> = bars.iter().map(|b| b.volume).collect();

        let ema_fast = Self::ema(&closes, cfg.ema_fast);
        let ema_slow = Self::ema(&closes, cfg.ema_slow);
        let swing = &bars[bars.len().saturating_sub(cfg.swing_window)..];
        let swing_high = swing.iter().map(|b| b.high).fold(f64::MIN, f64::max);
        let swing_low = swing.iter().map(|b| b.low).fold(f64::MAX, f64::min);

        let mut features = Features::new(symbol, self.clock.now())
            .with_value("close", last.close)
            .with_value("atr", Self::atr(bars, cfg.atr_period))
            .with_value("rsi", Self::rsi(&closes, cfg.rsi_period))
            .with_value("ema_fast", ema_fast)
            .with_value("ema_slow", ema_slow)
            .with_value("trend", ema_fast - ema_slow)
            .with_value("vol_avg", Self::trailing_mean(&volumes, cfg.volume_window))
            .with_value("swing_high", swing_high)
            .with_value("swing_low", swing_low);

        if bars.len() >= 2 {
            let prev = &bars[bars.len() - 2];
            features = features
                .with_value("prev_open", prev.open)
                .with_value("prev_high", prev.high)
                .with_value("prev_low", prev.low)
                .with_value("prev_close", prev.close);
        }
        features.last_bar = Some(last.clone());
        Ok(features)
    }
}
