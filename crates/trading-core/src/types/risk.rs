//! Risk decisions and funding alerts.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskOutcome {
    Approved,
    Veto,
}

/// Result of sizing a final signal against the portfolio.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskDecision {
    pub symbol: String,
    pub outcome: RiskOutcome,
    pub approved: bool,
    pub shares: u64,
    pub cash_required: Decimal,
    pub reasons: Vec<String>,
    pub constraints: BTreeMap<String, Decimal>,
}

impl RiskDecision {
    pub fn veto(symbol: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            symbol: symbol.into(),
            outcome: RiskOutcome::Veto,
            approved: false,
            shares: 0,
            cash_required: Decimal::ZERO,
            reasons: vec![reason.into()],
            constraints: BTreeMap::new(),
        }
    }

    pub fn approve(
        symbol: impl Into<String>,
        shares: u64,
        cash_required: Decimal,
        constraints: BTreeMap<String, Decimal>,
    ) -> Self {
        Self {
            symbol: symbol.into(),
            outcome: RiskOutcome::Approved,
            approved: true,
            shares,
            cash_required,
            reasons: vec!["risk checks passed".to_string()],
            constraints,
        }
    }

    pub fn reason(&self) -> String {
        self.reasons.join("; ")
    }
}

/// Remedies offered when a trade cannot be funded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FundingAction {
    Swap,
    Trim,
    PartialEntry,
    TradeQueue,
}

impl FundingAction {
    pub const ALL: [FundingAction; 4] = [
        FundingAction::Swap,
        FundingAction::Trim,
        FundingAction::PartialEntry,
        FundingAction::TradeQueue,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            FundingAction::Swap => "swap",
            FundingAction::Trim => "trim",
            FundingAction::PartialEntry => "partial_entry",
            FundingAction::TradeQueue => "trade_queue",
        }
    }
}

impl fmt::Display for FundingAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Raised when an otherwise valid trade exceeds available cash.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FundingAlert {
    pub symbol: String,
    pub missing_cash: Decimal,
    pub proposed_actions: Vec<FundingAction>,
    pub details: BTreeMap<String, Decimal>,
    pub created_at: DateTime<Utc>,
}

impl FundingAlert {
    pub fn actions_label(&self) -> String {
        self.proposed_actions
            .iter()
            .map(|a| a.as_str())
            .collect::<Vec<_>>()
            .join(", ")
    }
}
