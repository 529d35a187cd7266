//! Market data and derived feature types.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Schema version stamped on every feature set.
pub const FEATURE_SCHEMA_VERSION: &str = "v1";

/// One daily OHLCV observation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bar {
    pub ts: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

/// Named indicator values computed for one symbol.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Features {
    pub schema_version: String,
    pub symbol: String,
    pub computed_at: DateTime<Utc>,
    pub values: BTreeMap<String, f64>,
    /// Most recent bar the values were computed from.
    pub last_bar: Option<Bar>,
}

impl Features {
    pub fn new(symbol: impl Into<String>, computed_at: DateTime<Utc>) -> Self {
        Self {
            schema_version: FEATURE_SCHEMA_VERSION.to_string(),
            symbol: symbol.into(),
            computed_at,
            values: BTreeMap::new(),
            last_bar: None,
        }
    }

    pub fn with_value(mut self, name: &str, value: f64) -> Self {
        self.values.insert(name.to_string(), value);
        self
    }

    pub fn get(&self, name: &str) -> Option<f64> {
        self.values.get(name).copied()
    }

    /// Value or a fallback when the indicator is absent.
    pub fn value_or(&self, name: &str, default: f64) -> f64 {
        self.get(name).unwrap_or(default)
    }

    pub fn close(&self) -> f64 {
        self.value_or("close", 0.0)
    }

    pub fn atr(&self) -> f64 {
        self.value_or("atr", 0.0)
    }
}

/// Convert an indicator-space float into a price, rounded to 4 places.
pub fn price_from_f64(value: f64) -> Decimal {
    Decimal::from_f64_retain(value)
        .map(|d| d.round_dp(4))
        .unwrap_or(Decimal::ZERO)
}
