//! Built-in signal generators.
//!
//! Each strategy inspects one feature set and either proposes a long entry
//! or stays silent. Stops and targets are ATR multiples around the close.

use trading_core::config::StrategyToggles;
use trading_core::types::{price_from_f64, Direction, Features, SignalIntent, SignalStrength};

/// A signal generator over computed features.
pub trait Strategy: Send + Sync {
    fn name(&self) -> &'static str;

    /// Feature names the strategy reads.
    fn required_features(&self) -> &'static [&'static str];

    fn generate(&self, features: &Features) -> Option<SignalIntent>;
}

const MIN_ATR: f64 = 0.1;
const STOP_ATR: f64 = 2.0;
const TARGET_ATR: f64 = 4.0;

fn build_intent(features: &Features, confidence: f64, reason: &str, strategy: &str) -> SignalIntent {
    let close = features.close();
    let atr = features.value_or("atr", MIN_ATR).max(MIN_ATR);
    SignalIntent {
        symbol: features.symbol.clone(),
        direction: Direction::Long,
        confidence,
        entry: price_from_f64(close),
        stop: price_from_f64(close - STOP_ATR * atr),
        take_profit: price_from_f64(close + TARGET_ATR * atr),
        reasons: vec![reason.to_string()],
        strategy: strategy.to_string(),
        strength: if confidence > 0.75 {
            SignalStrength::Strong
        } else {
            SignalStrength::Medium
        },
        ts: features.computed_at,
    }
}

fn has_all(features: &Features, names: &[&str]) -> bool {
    names.iter().all(|name| features.get(name).is_some())
}

/// Fast EMA above slow EMA.
#[derive(Debug, Default, Clone, Copy)]
pub struct TrendFollowing;

impl Strategy for TrendFollowing {
    fn name(&self) -> &'static str {
        "trend_following"
    }

    fn required_features(&self) -> &'static [&'static str] {
        &["trend", "ema_fast", "ema_slow"]
    }

    fn generate(&self, features: &Features) -> Option<SignalIntent> {
        if !has_all(features, self.required_features()) {
            return None;
        }
        (features.value_or("trend", 0.0) > 0.0)
            .then(|| build_intent(features, 0.72, "ema trend up", self.name()))
    }
}

/// Close above the base level on live volume.
#[derive(Debug, Clone, Copy)]
pub struct Breakout {
    pub base_level: f64,
}

impl Default for Breakout {
    fn default() -> Self {
        Self { base_level: 100.0 }
    }
}

impl Strategy for Breakout {
    fn name(&self) -> &'static str {
        "breakout"
    }

    fn required_features(&self) -> &'static [&'static str] {
        &["close", "vol_avg"]
    }

    fn generate(&self, features: &Features) -> Option<SignalIntent> {
        if !has_all(features, self.required_features()) {
            return None;
        }
        (features.close() > self.base_level && features.value_or("vol_avg", 0.0) > 0.0)
            .then(|| build_intent(features, 0.70, "price breakout above base", self.name()))
    }
}

/// Fast EMA just above slow EMA: a shallow pullback inside an uptrend.
#[derive(Debug, Default, Clone, Copy)]
pub struct PullbackRetest;

impl Strategy for PullbackRetest {
    fn name(&self) -> &'static str {
        "pullback_retest"
    }

    fn required_features(&self) -> &'static [&'static str] {
        &["ema_fast", "ema_slow"]
    }

    fn generate(&self, features: &Features) -> Option<SignalIntent> {
        if !has_all(features, self.required_features()) {
            return None;
        }
        let gap = features.value_or("ema_fast", 0.0) - features.value_or("ema_slow", 0.0);
        (gap > 0.0 && gap < 1.0)
            .then(|| build_intent(features, 0.68, "pullback near trend support", self.name()))
    }
}

/// RSI inside the swing momentum band.
#[derive(Debug, Default, Clone, Copy)]
pub struct RsiMomentum;

impl Strategy for RsiMomentum {
    fn name(&self) -> &'static str {
        "rsi_momentum"
    }

    fn required_features(&self) -> &'static [&'static str] {
        &["rsi"]
    }

    fn generate(&self, features: &Features) -> Option<SignalIntent> {
        let rsi = features.get("rsi")?;
        (55.0..=70.0)
            .contains(&rsi)
            .then(|| build_intent(features, 0.66, "rsi momentum in swing zone", self.name()))
    }
}

/// Any traded volume at all.
#[derive(Debug, Default, Clone, Copy)]
pub struct VolumeConfirm;

impl Strategy for VolumeConfirm {
    fn name(&self) -> &'static str {
        "volume_confirm"
    }

    fn required_features(&self) -> &'static [&'static str] {
        &["vol_avg"]
    }

    fn generate(&self, features: &Features) -> Option<SignalIntent> {
        (features.get("vol_avg")? > 0.0)
            .then(|| build_intent(features, 0.63, "volume confirmation", self.name()))
    }
}

/// The enabled built-in strategies, in a fixed order.
pub fn build_strategies(toggles: &StrategyToggles) -> Vec<Box<dyn Strategy>> {
    let mut strategies: Vec<Box<dyn Strategy>> = Vec::new();
    if toggles.enable_trend_following {
        strategies.push(Box::new(TrendFollowing));
    }
    if toggles.enable_breakout {
        strategies.push(Box::new(Breakout::default()));
    }
    if toggles.enable_pullback_retest {
        strategies.push(Box::new(PullbackRetest));
    }
    if toggles.enable_rsi_momentum {
        strategies.push(Box::new(RsiMomentum));
    }
    if toggles.enable_volume_confirm {
        strategies.push(Box::new(VolumeConfirm));
    }
    strategies
}
