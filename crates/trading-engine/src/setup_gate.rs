//! Technical pre-filter applied before any strategy runs.

use trading_core::config::SetupGateSettings;
use trading_core::types::Features;

/// Uptrend, momentum, and price-above-trend checks.
#[derive(Debug, Clone, Copy)]
pub struct SetupGate {
    pub min_trend: f64,
    pub min_rsi: f64,
}

impl Default for SetupGate {
    fn default() -> Self {
        Self::from(&SetupGateSettings::default())
    }
}

impl From<&SetupGateSettings> for SetupGate {
    fn from(settings: &SetupGateSettings) -> Self {
        Self {
            min_trend: settings.min_trend,
            min_rsi: settings.min_rsi,
        }
    }
}

impl SetupGate {
    /// First failing check wins.
    pub fn allow(&self, features: &Features) -> (bool, &'static str) {
        let close = features.close();
        if features.value_or("trend", 0.0) <= self.min_trend {
            return (false, "trend not positive");
        }
        if features.value_or("rsi", 0.0) < self.min_rsi {
            return (false, "rsi below momentum threshold");
        }
        if close < features.value_or("ema_slow", close) {
            return (false, "price below slow ema");
        }
        (true, "gate passed")
    }
}
