//! Optional second opinion on a final signal before it is sized.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use trading_core::types::FinalSignal;
use trading_core::Result;

/// Verdict from an advisory source such as a sentiment or news filter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdvisoryVerdict {
    pub allowed: bool,
    /// Source-specific score, recorded for the operator.
    pub score: Option<f64>,
    pub reason: String,
}

impl AdvisoryVerdict {
    pub fn allow(reason: impl Into<String>) -> Self {
        Self {
            allowed: true,
            score: None,
            reason: reason.into(),
        }
    }

    pub fn block(reason: impl Into<String>) -> Self {
        Self {
            allowed: false,
            score: None,
            reason: reason.into(),
        }
    }

    pub fn with_score(mut self, score: f64) -> Self {
        self.score = Some(score);
        self
    }
}

/// Advisory check consulted after aggregation.
///
/// Errors are treated as a pass: an unavailable advisor never blocks trading.
#[async_trait]
pub trait AdvisoryGate: Send + Sync {
    fn name(&self) -> &str;

    async fn review(&self, signal: &FinalSignal) -> Result<AdvisoryVerdict>;
}
