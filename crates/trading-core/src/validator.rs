//! Sanity checks applied to bar series before feature computation.

use crate::config::Settings;
use crate::types::Bar;
use crate::{Error, Result};
use statrs::statistics::{Data, OrderStatistics};
use tracing::{debug, info};

/// Default lower/upper quantile used for outlier capping.
pub const DEFAULT_OUTLIER_QUANTILE: f64 = 0.001;

const COLUMNS: [&str; 5] = ["open", "high", "low", "close", "volume"];

/// Validates and normalizes daily bar series.
#[derive(Debug, Clone, Copy)]
pub struct BarValidator {
    /// Columns are clipped to `[q, 1 - q]` quantiles. 0 disables capping.
    pub outlier_quantile: f64,
}

impl Default for BarValidator {
    fn default() -> Self {
        Self {
            outlier_quantile: DEFAULT_OUTLIER_QUANTILE,
        }
    }
}

impl From<&Settings> for BarValidator {
    fn from(settings: &Settings) -> Self {
        Self {
            outlier_quantile: settings.data.outlier_quantile,
        }
    }
}

impl BarValidator {
    /// Return the series sorted by timestamp, deduplicated, gap-filled and
    /// outlier-capped.
    ///
    /// Missing (non-finite) values are forward filled, then back filled.
    /// Fails on empty input, a column with no usable value, non-positive
    /// prices, inverted high/low ranges, and negative volume.
    #[allow(clippy::result_large_err)]
    pub fn validate(&self, symbol: &str, bars: Vec<Bar>) -> Result<Vec<Bar>> {
        if bars.is_empty() {
            return Err(Error::DataValidation(format!("{symbol}: market data is empty")));
        }

        let before = bars.len();
        let mut bars = bars;
        bars.sort_by_key(|b| b.ts);
        bars.dedup_by_key(|b| b.ts);
        if bars.len() != before {
            debug!(symbol, dropped = before - bars.len(), "Dropped duplicate bars");
        }

        for (index, name) in COLUMNS.iter().enumerate() {
            let filled = fill_missing(&mut bars, index);
            if filled.is_none() {
                return Err(Error::DataValidation(format!(
                    "{symbol}: {name} has no usable values"
                )));
            }
            if let Some(count) = filled.filter(|count| *count > 0) {
                debug!(symbol, column = name, filled = count, "Filled missing values");
            }
        }

        for bar in &bars {
            let prices = [bar.open, bar.high, bar.low, bar.close];
            if prices.iter().any(|p| *p <= 0.0) {
                return Err(Error::DataValidation(format!(
                    "{symbol}: non-positive price at {}",
                    bar.ts
                )));
            }
            if bar.high < bar.low {
                return Err(Error::DataValidation(format!(
                    "{symbol}: high below low at {}",
                    bar.ts
                )));
            }
            if bar.volume < 0.0 {
                return Err(Error::DataValidation(format!(
                    "{symbol}: negative volume at {}",
                    bar.ts
                )));
            }
        }

        if self.outlier_quantile > 0.0 {
            self.cap_outliers(symbol, &mut bars);
        }
        Ok(bars)
    }

    /// Clip each column to its quantile band, then restore the bar range
    /// so high and low still bound open and close.
    fn cap_outliers(&self, symbol: &str, bars: &mut [Bar]) {
        let lower = self.outlier_quantile;
        let upper = 1.0 - self.outlier_quantile;
        let mut capped_any = false;

        for (index, name) in COLUMNS.iter().enumerate() {
            let mut data = Data::new(bars.iter().map(|b| value(b, index)).collect::<Vec<f64>>());
            let q_low = data.quantile(lower);
            let q_high = data.quantile(upper);
            if !q_low.is_finite() || !q_high.is_finite() || q_low == q_high {
                continue;
            }
            let mut capped = 0usize;
            for bar in bars.iter_mut() {
                let slot = column(bar, index);
                let clipped = slot.clamp(q_low, q_high);
                if clipped != *slot {
                    *slot = clipped;
                    capped += 1;
                }
            }
            if capped > 0 {
                capped_any = true;
                info!(symbol, column = name, capped, lower, upper, "Capped outliers");
            }
        }

        if capped_any {
            for bar in bars.iter_mut() {
                bar.high = bar.high.max(bar.open).max(bar.close);
                bar.low = bar.low.min(bar.open).min(bar.close);
            }
        }
    }
}

fn value(bar: &Bar, index: usize) -> f64 {
    match index {
        0 => bar.open,
        1 => bar.high,
        2 => bar.low,
        3 => bar.close,
        _ => bar.volume,
    }
}

fn column(bar: &mut Bar, index: usize) -> &mut f64 {
    match index {
        0 => &mut bar.open,
        1 => &mut bar.high,
        2 => &mut bar.low,
        3 => &mut bar.close,
        _ => &mut bar.volume,
    }
}

/// Forward fill, then back fill, non-finite values in one column.
///
/// Returns the number of values filled, or `None` when the column has no
/// finite value at all.
fn fill_missing(bars: &mut [Bar], index: usize) -> Option<usize> {
    let mut last = bars
        .iter()
        .map(|b| value(b, index))
        .find(|v| v.is_finite())?;
    let mut filled = 0;
    for bar in bars.iter_mut() {
        let slot = column(bar, index);
        if slot.is_finite() {
            last = *slot;
        } else {
            *slot = last;
            filled += 1;
        }
    }
    Some(filled)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};
    use tokio_test::{assert_err, assert_ok};

    fn bar(offset_days: i64, close: f64) -> Bar {
        Bar {
            ts: Utc::now() - Duration::days(offset_days),
            open: close,
            high: close + 1.0,
            low: close - 1.0,
            close,
            volume: 1000.0,
        }
    }

    fn flat_series(n: i64) -> Vec<Bar> {
        (0..n).map(|i| bar(n - i, 100.0)).collect()
    }

    #[test]
    fn test_rejects_empty() {
        let err = BarValidator::default().validate("AAPL", vec![]).unwrap_err();
        assert!(matches!(err, Error::DataValidation(_)));
    }

    #[test]
    fn test_rejects_non_positive_price() {
        let mut bad = bar(1, 10.0);
        bad.low = 0.0;
        assert_err!(BarValidator::default().validate("AAPL", vec![bad]));
    }

    #[test]
    fn test_rejects_inverted_range() {
        let mut bad = bar(1, 10.0);
        bad.high = 8.0;
        assert_err!(BarValidator::default().validate("AAPL", vec![bad]));
    }

    #[test]
    fn test_sorts_and_dedups() {
        let a = bar(3, 10.0);
        let b = bar(2, 11.0);
        let dup = b.clone();
        let bars = assert_ok!(BarValidator::default().validate("AAPL", vec![b, a.clone(), dup]));
        assert_eq!(bars.len(), 2);
        assert_eq!(bars[0], a);
    }

    #[test]
    fn test_fills_gaps_forward_then_backward() {
        let mut bars = vec![bar(4, 10.0), bar(3, 11.0), bar(2, 12.0), bar(1, 13.0)];
        bars[0].close = f64::NAN;
        bars[2].close = f64::NAN;
        bars[3].volume = f64::INFINITY;

        let bars = assert_ok!(BarValidator::default().validate("AAPL", bars));
        assert_eq!(bars[0].close, 11.0);
        assert_eq!(bars[2].close, 11.0);
        assert_eq!(bars[3].volume, 1000.0);
    }

    #[test]
    fn test_rejects_column_without_values() {
        let mut bars = vec![bar(2, 10.0), bar(1, 11.0)];
        for b in &mut bars {
            b.volume = f64::NAN;
        }
        assert_err!(BarValidator::default().validate("AAPL", bars));
    }

    #[test]
    fn test_caps_volume_spike() {
        let mut bars = flat_series(30);
        bars[15].volume = 1.0e9;
        let validator = BarValidator {
            outlier_quantile: 0.05,
        };

        let bars = assert_ok!(validator.validate("AAPL", bars));
        assert!(bars[15].volume < 1.0e9);
        assert!(bars[15].volume > 1000.0);
        // Constant columns are left alone.
        assert!(bars.iter().all(|b| b.close == 100.0 && b.high == 101.0));
    }

    #[test]
    fn test_capping_disabled_or_short_series_untouched() {
        let mut bars = flat_series(30);
        bars[10].volume = 1.0e9;
        let off = BarValidator {
            outlier_quantile: 0.0,
        };
        let kept = assert_ok!(off.validate("AAPL", bars.clone()));
        assert_eq!(kept[10].volume, 1.0e9);

        // Too few bars for the default quantile to reach past the extremes.
        let kept = assert_ok!(BarValidator::default().validate("AAPL", bars));
        assert_eq!(kept[10].volume, 1.0e9);
    }
}
