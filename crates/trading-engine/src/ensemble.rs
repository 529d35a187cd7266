//! Combines strategy intents into a single trade proposal.

use trading_core::types::{FinalSignal, SignalIntent};

/// Mean-confidence ensemble with a minimum score.
#[derive(Debug, Clone, Copy)]
pub struct EnsembleAggregator {
    /// Inclusive lower bound on the mean confidence.
    pub min_score: f64,
}

impl Default for EnsembleAggregator {
    fn default() -> Self {
        Self { min_score: 0.7 }
    }
}

impl EnsembleAggregator {
    pub fn new(min_score: f64) -> Self {
        Self { min_score }
    }

    /// `None` for no intents or a mean confidence below the minimum.
    ///
    /// Prices come from the most confident intent; ties keep the earliest.
    pub fn aggregate(&self, intents: Vec<SignalIntent>) -> Option<FinalSignal> {
        if intents.is_empty() {
            return None;
        }
        let score = intents.iter().map(|i| i.confidence).sum::<f64>() / intents.len() as f64;
        if score < self.min_score {
            return None;
        }

        let top = intents
            .iter()
            .fold(&intents[0], |best, i| if i.confidence > best.confidence { i } else { best });
        let reasons = intents.iter().flat_map(|i| i.reasons.iter().cloned()).collect();

        Some(FinalSignal {
            symbol: top.symbol.clone(),
            direction: top.direction,
            score,
            entry: top.entry,
            stop: top.stop,
            take_profit: top.take_profit,
            reasons,
            ts: top.ts,
            intents,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use rust_decimal::Decimal;
    use trading_core::types::{Direction, SignalStrength};

    fn intent(strategy: &str, confidence: f64, stop: i64, reason: &str) -> SignalIntent {
        SignalIntent {
            symbol: "AAPL".to_string(),
            direction: Direction::Long,
            confidence,
            entry: Decimal::new(100, 0),
            stop: Decimal::new(stop, 0),
            take_profit: Decimal::new(110, 0),
            reasons: vec![reason.to_string()],
            strategy: strategy.to_string(),
            strength: SignalStrength::Medium,
            ts: Utc::now(),
        }
    }

    #[test]
    fn test_empty_is_none() {
        assert!(EnsembleAggregator::new(0.0).aggregate(Vec::new()).is_none());
    }

    #[test]
    fn test_aggregate_uses_top_intent_and_all_reasons() {
        let intents = vec![
            intent("volume_confirm", 0.7, 96, "volume"),
            intent("trend_following", 0.8, 95, "trend"),
            intent("breakout", 0.8, 94, "volume"),
        ];
        let signal = EnsembleAggregator::new(0.6).aggregate(intents).unwrap();
        assert!((signal.score - 2.3 / 3.0).abs() < 1e-9);
        assert_eq!(signal.stop, Decimal::new(95, 0));
        assert_eq!(signal.reasons, vec!["volume", "trend", "volume"]);
        assert_eq!(signal.intents.len(), 3);
    }

    #[test]
    fn test_minimum_is_inclusive() {
        let at_threshold = vec![intent("a", 0.75, 95, "x"), intent("b", 0.75, 95, "y")];
        assert!(EnsembleAggregator::new(0.75).aggregate(at_threshold).is_some());

        let below = vec![intent("a", 0.7, 95, "x"), intent("b", 0.6, 95, "y")];
        assert!(EnsembleAggregator::new(0.7).aggregate(below).is_none());
    }
}
