//! Concentration limits: pairwise return correlation and sector weight.
//!
//! Both checks are permissive when data is missing. Only a measured breach
//! blocks a candidate.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use statrs::statistics::Statistics;
use std::collections::{BTreeMap, HashMap};
use tracing::debug;
use trading_core::config::RiskSettings;
use trading_core::types::Bar;

/// Result of a concentration check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConstraintCheck {
    pub passed: bool,
    pub reason: String,
}

impl ConstraintCheck {
    pub fn pass(reason: impl Into<String>) -> Self {
        Self {
            passed: true,
            reason: reason.into(),
        }
    }

    pub fn block(reason: impl Into<String>) -> Self {
        Self {
            passed: false,
            reason: reason.into(),
        }
    }
}

/// Vetoes candidates that are too correlated with, or share a sector with,
/// too much of the current book.
#[derive(Debug, Clone)]
pub struct CorrelationManager {
    pub max_symbol_correlation: f64,
    pub max_sector_weight: f64,
    /// Trailing bars used for return correlation.
    pub window: usize,
}

impl Default for CorrelationManager {
    fn default() -> Self {
        Self::from(&RiskSettings::default())
    }
}

impl From<&RiskSettings> for CorrelationManager {
    fn from(settings: &RiskSettings) -> Self {
        Self::new(
            settings.max_symbol_correlation,
            settings.max_sector_weight,
            settings.correlation_window,
        )
    }
}

impl CorrelationManager {
    pub fn new(max_symbol_correlation: f64, max_sector_weight: f64, window: usize) -> Self {
        Self {
            max_symbol_correlation,
            max_sector_weight,
            window,
        }
    }

    /// Block `candidate` if its trailing returns correlate at or above the
    /// limit with any held symbol.
    ///
    /// `holdings` maps held symbols to portfolio weight; `price_history`
    /// holds daily bars for the candidate and whichever holdings are known.
    pub fn check_symbol(
        &self,
        candidate: &str,
        _candidate_weight: f64,
        holdings: &HashMap<String, f64>,
        price_history: &HashMap<String, Vec<Bar>>,
    ) -> ConstraintCheck {
        if holdings.is_empty() {
            return ConstraintCheck::pass("no_holdings");
        }
        let Some(candidate_bars) = price_history.get(candidate) else {
            return ConstraintCheck::pass("no_history");
        };
        let candidate_returns = self.returns(candidate_bars);
        if candidate_returns.is_empty() {
            return ConstraintCheck::pass("no_returns");
        }

        let mut held: Vec<&String> = holdings
            .keys()
            .filter(|symbol| symbol.as_str() != candidate)
            .collect();
        held.sort();

        for symbol in held {
            let Some(bars) = price_history.get(symbol) else {
                continue;
            };
            let returns = self.returns(bars);
            let (a, b): (Vec<f64>, Vec<f64>) = candidate_returns
                .iter()
                .filter_map(|(ts, r)| returns.get(ts).map(|other| (*r, *other)))
                .unzip();
            let Some(corr) = pearson(&a, &b) else {
                continue;
            };
            debug!(candidate, symbol = %symbol, corr, "Pairwise correlation");
            if corr >= self.max_symbol_correlation {
                return ConstraintCheck::block(format!("correlation {corr:.2} with {symbol}"));
            }
        }
        ConstraintCheck::pass("ok")
    }

    /// Block `candidate` if its sector would exceed the sector cap.
    pub fn check_sector(
        &self,
        candidate: &str,
        candidate_weight: f64,
        holdings: &HashMap<String, f64>,
        sector_map: &HashMap<String, String>,
    ) -> ConstraintCheck {
        if sector_map.is_empty() {
            return ConstraintCheck::pass("no_sector_map");
        }
        let Some(sector) = sector_map.get(candidate).filter(|s| !s.is_empty()) else {
            return ConstraintCheck::pass("unknown_sector");
        };

        let sector_weight = candidate_weight
            + holdings
                .iter()
                .filter(|(symbol, _)| sector_map.get(symbol.as_str()) == Some(sector))
                .map(|(_, weight)| weight)
                .sum::<f64>();

        if sector_weight > self.max_sector_weight {
            return ConstraintCheck::block(format!("sector_weight {sector_weight:.2} exceeds limit"));
        }
        ConstraintCheck::pass("ok")
    }

    /// Percent-change series over the trailing window, keyed by bar time.
    fn returns(&self, bars: &[Bar]) -> BTreeMap<DateTime<Utc>, f64> {
        let skip = bars.len().saturating_sub(self.window);
        bars[skip..]
            .windows(2)
            .filter(|w| w[0].close != 0.0)
            .map(|w| (w[1].ts, w[1].close / w[0].close - 1.0))
            .collect()
    }
}

/// Sample Pearson correlation; `None` when undefined.
fn pearson(a: &[f64], b: &[f64]) -> Option<f64> {
    if a.len() < 2 || a.len() != b.len() {
        return None;
    }
    let sd_a = a.iter().std_dev();
    let sd_b = b.iter().std_dev();
    if !(sd_a > 0.0 && sd_b > 0.0) {
        return None;
    }
    let corr = a.iter().covariance(b.iter()) / (sd_a * sd_b);
    corr.is_finite().then_some(corr)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn bars(closes: &[f64]) -> Vec<Bar> {
        let start = Utc::now() - Duration::days(closes.len() as i64);
        closes
            .iter()
            .enumerate()
            .map(|(i, &close)| Bar {
                ts: start + Duration::days(i as i64),
                open: close,
                high: close + 1.0,
                low: close - 1.0,
                close,
                volume: 1_000.0,
            })
            .collect()
    }

    fn holdings(entries: &[(&str, f64)]) -> HashMap<String, f64> {
        entries.iter().map(|(s, w)| (s.to_string(), *w)).collect()
    }

    #[test]
    fn test_blocks_highly_correlated_holding() {
        let manager = CorrelationManager::new(0.5, 0.3, 5);
        let series = bars(&[100.0, 101.0, 102.0, 103.0, 104.0, 105.0]);
        let history = HashMap::from([
            ("AAPL".to_string(), series.clone()),
            ("MSFT".to_string(), series),
        ]);

        let check = manager.check_symbol("AAPL", 0.1, &holdings(&[("MSFT", 0.2)]), &history);
        assert!(!check.passed);
        assert!(check.reason.starts_with("correlation 1.00 with MSFT"));
    }

    #[test]
    fn test_uncorrelated_holding_passes() {
        let manager = CorrelationManager::new(0.5, 0.3, 10);
        let history = HashMap::from([
            ("AAPL".to_string(), bars(&[100.0, 102.0, 101.0, 103.0, 102.0, 104.0])),
            ("XOM".to_string(), bars(&[50.0, 49.0, 50.5, 49.2, 50.8, 49.0])),
        ]);

        let check = manager.check_symbol("AAPL", 0.1, &holdings(&[("XOM", 0.2)]), &history);
        assert_eq!(check, ConstraintCheck::pass("ok"));
    }

    #[test]
    fn test_missing_data_passes_through() {
        let manager = CorrelationManager::new(0.5, 0.3, 60);
        let empty = HashMap::new();
        assert_eq!(
            manager.check_symbol("AAPL", 0.1, &HashMap::new(), &empty).reason,
            "no_holdings"
        );

        let held = holdings(&[("MSFT", 0.2)]);
        assert_eq!(manager.check_symbol("AAPL", 0.1, &held, &empty).reason, "no_history");

        let single = HashMap::from([("AAPL".to_string(), bars(&[100.0]))]);
        assert_eq!(manager.check_symbol("AAPL", 0.1, &held, &single).reason, "no_returns");
    }

    #[test]
    fn test_flat_series_is_ignored() {
        let manager = CorrelationManager::new(0.5, 0.3, 10);
        let history = HashMap::from([
            ("AAPL".to_string(), bars(&[100.0, 101.0, 102.0, 103.0])),
            ("CASH".to_string(), bars(&[1.0, 1.0, 1.0, 1.0])),
        ]);
        assert!(manager
            .check_symbol("AAPL", 0.1, &holdings(&[("CASH", 0.5)]), &history)
            .passed);
    }

    #[test]
    fn test_sector_within_limit() {
        let manager = CorrelationManager::new(0.9, 0.4, 5);
        let sectors = HashMap::from([
            ("AAPL".to_string(), "tech".to_string()),
            ("MSFT".to_string(), "tech".to_string()),
        ]);
        let check = manager.check_sector("AAPL", 0.1, &holdings(&[("MSFT", 0.2)]), &sectors);
        assert_eq!(check, ConstraintCheck::pass("ok"));
    }

    #[test]
    fn test_sector_over_limit_blocks() {
        let manager = CorrelationManager::new(0.9, 0.3, 5);
        let sectors = HashMap::from([
            ("AAPL".to_string(), "tech".to_string()),
            ("MSFT".to_string(), "tech".to_string()),
            ("XOM".to_string(), "energy".to_string()),
        ]);
        let held = holdings(&[("MSFT", 0.25), ("XOM", 0.5)]);
        let check = manager.check_sector("AAPL", 0.1, &held, &sectors);
        assert!(!check.passed);
        assert_eq!(check.reason, "sector_weight 0.35 exceeds limit");
    }

    #[test]
    fn test_sector_unknowns_pass() {
        let manager = CorrelationManager::new(0.9, 0.1, 5);
        let held = holdings(&[("MSFT", 0.9)]);
        assert_eq!(
            manager.check_sector("AAPL", 0.5, &held, &HashMap::new()).reason,
            "no_sector_map"
        );
        let sectors = HashMap::from([("MSFT".to_string(), "tech".to_string())]);
        assert_eq!(
            manager.check_sector("AAPL", 0.5, &held, &sectors).reason,
            "unknown_sector"
        );
    }
}
