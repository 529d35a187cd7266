//! Position sizing and trade veto.
//!
//! Rules are evaluated in a fixed order and the first failure wins:
//! entry/stop sanity, risk per share, minimum size, then cash. Only the
//! cash rule produces a [`FundingAlert`].

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use trading_core::clock::{system_clock, SharedClock};
use trading_core::config::RiskSettings;
use trading_core::types::{
    FinalSignal, FundingAction, FundingAlert, PortfolioSnapshot, RiskDecision,
};
use tracing::debug;

/// Sizing parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskConfig {
    /// Fraction of equity lost if the stop is hit.
    pub risk_per_trade: Decimal,
    /// Fraction of equity a single position may occupy.
    pub max_position_weight: Decimal,
    /// Fraction of cash never committed to entries.
    pub cash_buffer: Decimal,
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self::from(&RiskSettings::default())
    }
}

impl From<&RiskSettings> for RiskConfig {
    fn from(settings: &RiskSettings) -> Self {
        Self {
            risk_per_trade: settings.risk_per_trade,
            max_position_weight: settings.max_position_weight,
            cash_buffer: settings.cash_buffer,
        }
    }
}

/// Sizes positions and vetoes trades that break risk rules.
#[derive(Debug, Clone)]
pub struct RiskManager {
    config: RiskConfig,
    clock: SharedClock,
}

impl RiskManager {
    pub fn new(config: RiskConfig) -> Self {
        Self {
            config,
            clock: system_clock(),
        }
    }

    pub fn with_clock(mut self, clock: SharedClock) -> Self {
        self.clock = clock;
        self
    }

    pub fn config(&self) -> &RiskConfig {
        &self.config
    }

    fn constraints(&self) -> BTreeMap<String, Decimal> {
        BTreeMap::from([
            (
                "max_position_weight".to_string(),
                self.config.max_position_weight,
            ),
            ("risk_per_trade".to_string(), self.config.risk_per_trade),
        ])
    }

    pub fn evaluate(
        &self,
        signal: &FinalSignal,
        portfolio: &PortfolioSnapshot,
    ) -> (RiskDecision, Option<FundingAlert>) {
        let symbol = signal.symbol.as_str();

        if signal.entry <= Decimal::ZERO
            || signal.stop <= Decimal::ZERO
            || signal.entry <= signal.stop
        {
            return (
                RiskDecision::veto(symbol, "invalid entry/stop configuration"),
                None,
            );
        }

        let risk_per_share = signal.entry - signal.stop;
        if risk_per_share <= Decimal::ZERO {
            return (RiskDecision::veto(symbol, "invalid risk per share"), None);
        }

        let max_cash = portfolio.equity * self.config.max_position_weight;
        let target_risk_cash = portfolio.equity * self.config.risk_per_trade;
        let raw_shares = (max_cash / signal.entry).min(target_risk_cash / risk_per_share);
        let shares = raw_shares.floor().to_u64().unwrap_or(0);
        if shares == 0 {
            return (RiskDecision::veto(symbol, "position size below minimum"), None);
        }

        let cash_required = Decimal::from(shares) * signal.entry;
        let available_cash = portfolio.cash * (Decimal::ONE - self.config.cash_buffer);
        if cash_required > available_cash {
            let missing_cash = cash_required - available_cash;
            debug!(
                symbol,
                cash_required = %cash_required,
                available_cash = %available_cash,
                "Insufficient cash for sized position"
            );
            let alert = FundingAlert {
                symbol: symbol.to_string(),
                missing_cash,
                proposed_actions: FundingAction::ALL.to_vec(),
                details: BTreeMap::from([
                    ("cash_required".to_string(), cash_required),
                    ("available_cash".to_string(), available_cash),
                ]),
                created_at: self.clock.now(),
            };
            let decision = RiskDecision {
                cash_required,
                constraints: self.constraints(),
                ..RiskDecision::veto(symbol, "insufficient cash, funding alert created")
            };
            return (decision, Some(alert));
        }

        (
            RiskDecision::approve(symbol, shares, cash_required, self.constraints()),
            None,
        )
    }
}
