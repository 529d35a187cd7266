//! Strategy intents and ensemble output.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Trade direction. The bot is long-only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Direction {
    #[default]
    Long,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SignalStrength {
    Weak,
    #[default]
    Medium,
    Strong,
}

/// A single strategy's proposed trade.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignalIntent {
    pub symbol: String,
    pub direction: Direction,
    /// Confidence in [0, 1].
    pub confidence: f64,
    pub entry: Decimal,
    pub stop: Decimal,
    pub take_profit: Decimal,
    pub reasons: Vec<String>,
    pub strategy: String,
    pub strength: SignalStrength,
    pub ts: DateTime<Utc>,
}

/// Aggregated trade proposal for one symbol.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FinalSignal {
    pub symbol: String,
    pub direction: Direction,
    /// Mean confidence of the contributing intents.
    pub score: f64,
    pub entry: Decimal,
    pub stop: Decimal,
    pub take_profit: Decimal,
    pub reasons: Vec<String>,
    pub intents: Vec<SignalIntent>,
    pub ts: DateTime<Utc>,
}
