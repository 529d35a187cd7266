//! Scenario shocks applied to the current book.
//!
//! Each scenario moves every held symbol's last close by the same fraction
//! and reports the weighted portfolio return. Holdings without price history
//! contribute nothing.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use tracing::debug;
use trading_core::config::StressSettings;
use trading_core::types::Bar;

/// Outcome of one shock scenario.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StressTestResult {
    pub scenario: String,
    pub shock: f64,
    /// Weighted return of the book under the shock.
    pub portfolio_return: f64,
    /// Per-symbol return, 0 where no history was available.
    pub details: BTreeMap<String, f64>,
}

#[derive(Debug, Clone, Default)]
pub struct StressTester {
    scenarios: BTreeMap<String, f64>,
}

impl From<&StressSettings> for StressTester {
    fn from(settings: &StressSettings) -> Self {
        Self::new(settings.scenarios.clone())
    }
}

impl StressTester {
    pub fn new(scenarios: BTreeMap<String, f64>) -> Self {
        Self { scenarios }
    }

    pub fn scenarios(&self) -> &BTreeMap<String, f64> {
        &self.scenarios
    }

    /// Run every configured scenario, in scenario-name order.
    ///
    /// `weights` maps held symbols to portfolio weight.
    pub fn run(
        &self,
        price_history: &HashMap<String, Vec<Bar>>,
        weights: &HashMap<String, f64>,
    ) -> Vec<StressTestResult> {
        self.scenarios
            .iter()
            .map(|(scenario, shock)| {
                let mut details = BTreeMap::new();
                let mut portfolio_return = 0.0;
                for (symbol, weight) in weights {
                    let last_close = price_history
                        .get(symbol)
                        .and_then(|bars| bars.last())
                        .map(|bar| bar.close)
                        .filter(|close| *close > 0.0);
                    let symbol_return = match last_close {
                        Some(close) => (close * (1.0 + shock) - close) / close,
                        None => 0.0,
                    };
                    portfolio_return += symbol_return * weight;
                    details.insert(symbol.clone(), symbol_return);
                }
                debug!(scenario = %scenario, shock, portfolio_return, "Stress scenario");
                StressTestResult {
                    scenario: scenario.clone(),
                    shock: *shock,
                    portfolio_return,
                    details,
                }
            })
            .collect()
    }
}

/// Scenario with the lowest portfolio return.
pub fn worst_case(results: &[StressTestResult]) -> Option<&StressTestResult> {
    results
        .iter()
        .min_by(|a, b| a.portfolio_return.total_cmp(&b.portfolio_return))
}
