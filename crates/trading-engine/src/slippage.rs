//! Transaction cost estimate recorded against each entry.

use rust_decimal::Decimal;
use trading_core::config::SlippageSettings;

const BPS: Decimal = Decimal::from_parts(10_000, 0, 0, false, 0);

/// Spread plus fee, both in basis points of notional.
#[derive(Debug, Clone, Copy)]
pub struct SlippageModel {
    pub spread_bps: Decimal,
    pub fee_bps: Decimal,
}

impl From<&SlippageSettings> for SlippageModel {
    fn from(settings: &SlippageSettings) -> Self {
        Self {
            spread_bps: settings.spread_bps,
            fee_bps: settings.fee_bps,
        }
    }
}

impl SlippageModel {
    pub fn estimate_cost(&self, price: Decimal, shares: u64) -> Decimal {
        let notional = price * Decimal::from(shares);
        notional * (self.spread_bps + self.fee_bps) / BPS
    }
}
