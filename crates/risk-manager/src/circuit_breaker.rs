//! Circuit breaker for emergency trading halts.
//!
//! A halt is triggered by drawdown, by consecutive failures while
//! connectivity is down, or directly by `record_failure` once the failure
//! threshold is reached. Every halt opens a fresh cooldown window. A manual
//! override takes precedence over everything, including an active halt.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{error, info, warn};
use trading_core::clock::{system_clock, SharedClock};
use trading_core::config::CircuitBreakerSettings;

pub const REASON_OK: &str = "ok";
pub const REASON_MANUAL_OVERRIDE: &str = "manual_override";
pub const REASON_DRAWDOWN: &str = "drawdown_limit";
pub const REASON_CONNECTIVITY: &str = "connectivity_failures";
pub const REASON_COOLDOWN: &str = "cooldown";

/// Configuration for circuit breaker thresholds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures before halt.
    pub max_failures: u32,
    /// Drawdown from peak (fraction, e.g. 0.10 = 10%) that halts trading.
    pub drawdown_limit: f64,
    /// Cooldown period after a halt (in minutes).
    pub cooldown_minutes: i64,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self::from(&CircuitBreakerSettings::default())
    }
}

impl From<&CircuitBreakerSettings> for CircuitBreakerConfig {
    fn from(settings: &CircuitBreakerSettings) -> Self {
        Self {
            max_failures: settings.max_failures,
            drawdown_limit: settings.drawdown_limit,
            cooldown_minutes: settings.cooldown_minutes,
        }
    }
}

/// Current state of the circuit breaker.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CircuitBreakerState {
    pub consecutive_failures: u32,
    /// Trading refused until this instant.
    pub halted_until: Option<DateTime<Utc>>,
    /// Trading allowed regardless of other state until this instant.
    pub manual_override_until: Option<DateTime<Utc>>,
    pub last_reason: String,
    pub last_triggered_at: Option<DateTime<Utc>>,
    /// Halts since the process started.
    pub trips: u32,
}

/// Answer to "may the bot trade right now?".
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TradePermission {
    pub allowed: bool,
    pub reason: String,
}

impl TradePermission {
    fn allow(reason: &str) -> Self {
        Self {
            allowed: true,
            reason: reason.to_string(),
        }
    }

    fn refuse(reason: impl Into<String>) -> Self {
        Self {
            allowed: false,
            reason: reason.into(),
        }
    }
}

/// Circuit breaker for emergency trading halts.
#[derive(Debug)]
pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    state: Arc<RwLock<CircuitBreakerState>>,
    /// Fast path flag for checking if a halt is in force.
    is_tripped: AtomicBool,
    clock: SharedClock,
}

impl CircuitBreaker {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self::with_clock(config, system_clock())
    }

    pub fn with_clock(config: CircuitBreakerConfig, clock: SharedClock) -> Self {
        Self {
            config,
            state: Arc::new(RwLock::new(CircuitBreakerState::default())),
            is_tripped: AtomicBool::new(false),
            clock,
        }
    }

    /// Whether the last observed state was halted (fast path, may be stale).
    pub fn is_tripped(&self) -> bool {
        self.is_tripped.load(Ordering::SeqCst)
    }

    /// Decide whether trading may proceed.
    pub async fn can_trade(&self, drawdown: f64, connectivity_ok: bool) -> TradePermission {
        let now = self.clock.now();
        let mut state = self.state.write().await;

        if state.manual_override_until.is_some_and(|until| now < until) {
            return TradePermission::allow(REASON_MANUAL_OVERRIDE);
        }

        if let Some(until) = state.halted_until {
            if now < until {
                let reason = if state.last_reason.is_empty() {
                    REASON_COOLDOWN.to_string()
                } else {
                    state.last_reason.clone()
                };
                return TradePermission::refuse(reason);
            }
            if self.is_tripped.swap(false, Ordering::SeqCst) {
                info!(reason = %state.last_reason, "Circuit breaker cooldown expired");
            }
        }

        if drawdown >= self.config.drawdown_limit {
            self.trigger(&mut state, REASON_DRAWDOWN);
            return TradePermission::refuse(REASON_DRAWDOWN);
        }

        if !connectivity_ok && state.consecutive_failures >= self.config.max_failures {
            self.trigger(&mut state, REASON_CONNECTIVITY);
            return TradePermission::refuse(REASON_CONNECTIVITY);
        }

        TradePermission::allow(REASON_OK)
    }

    /// Count a failure; halts immediately once the threshold is reached.
    pub async fn record_failure(&self, reason: &str) {
        let mut state = self.state.write().await;
        state.consecutive_failures += 1;
        warn!(
            reason,
            consecutive_failures = state.consecutive_failures,
            max_failures = self.config.max_failures,
            "Circuit breaker recorded failure"
        );
        if state.consecutive_failures >= self.config.max_failures {
            self.trigger(&mut state, reason);
        }
    }

    pub async fn record_success(&self) {
        let mut state = self.state.write().await;
        state.consecutive_failures = 0;
    }

    /// Allow trading for `minutes` regardless of halts or drawdown.
    pub async fn manual_override(&self, minutes: i64) {
        let until = self.clock.now() + Duration::minutes(minutes);
        let mut state = self.state.write().await;
        state.manual_override_until = Some(until);
        warn!(until = %until, "Circuit breaker manual override engaged");
    }

    /// Clear halts, overrides, and the failure counter.
    pub async fn reset(&self) {
        let mut state = self.state.write().await;
        state.consecutive_failures = 0;
        state.halted_until = None;
        state.manual_override_until = None;
        state.last_reason.clear();
        self.is_tripped.store(false, Ordering::SeqCst);
        info!("Circuit breaker reset");
    }

    /// Get current state.
    pub async fn state(&self) -> CircuitBreakerState {
        self.state.read().await.clone()
    }

    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    fn trigger(&self, state: &mut CircuitBreakerState, reason: &str) {
        let now = self.clock.now();
        let resume_at = now + Duration::minutes(self.config.cooldown_minutes);

        state.last_reason = reason.to_string();
        state.last_triggered_at = Some(now);
        state.halted_until = Some(resume_at);
        state.trips += 1;

        self.is_tripped.store(true, Ordering::SeqCst);

        error!(
            reason,
            resume_at = %resume_at,
            consecutive_failures = state.consecutive_failures,
            "Circuit breaker TRIPPED - trading halted"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use trading_core::clock::ManualClock;

    fn breaker(clock: Arc<ManualClock>) -> CircuitBreaker {
        let config = CircuitBreakerConfig {
            max_failures: 3,
            drawdown_limit: 0.10,
            cooldown_minutes: 30,
        };
        CircuitBreaker::with_clock(config, clock)
    }

    #[tokio::test]
    async fn test_normal_state_allows() {
        let breaker = breaker(Arc::new(ManualClock::new(Utc::now())));
        let permission = breaker.can_trade(0.0, true).await;
        assert!(permission.allowed);
        assert_eq!(permission.reason, REASON_OK);
        assert!(!breaker.is_tripped());
    }

    #[tokio::test]
    async fn test_failures_trip_until_cooldown_elapses() {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let breaker = breaker(clock.clone());

        for _ in 0..3 {
            breaker.record_failure(REASON_CONNECTIVITY).await;
        }
        assert!(breaker.is_tripped());

        let permission = breaker.can_trade(0.0, false).await;
        assert!(!permission.allowed);
        assert_eq!(permission.reason, REASON_CONNECTIVITY);

        clock.advance(Duration::minutes(29));
        assert!(!breaker.can_trade(0.0, true).await.allowed);

        // Counter was never reset, so connectivity still down re-trips.
        clock.advance(Duration::minutes(2));
        let permission = breaker.can_trade(0.0, false).await;
        assert_eq!(permission.reason, REASON_CONNECTIVITY);

        clock.advance(Duration::minutes(31));
        breaker.record_success().await;
        let permission = breaker.can_trade(0.0, false).await;
        assert!(permission.allowed);
        assert!(!breaker.is_tripped());
    }

    #[tokio::test]
    async fn test_failures_below_threshold_do_not_halt() {
        let breaker = breaker(Arc::new(ManualClock::new(Utc::now())));
        breaker.record_failure("data").await;
        breaker.record_failure("data").await;
        assert!(breaker.can_trade(0.0, false).await.allowed);

        breaker.record_success().await;
        breaker.record_failure("data").await;
        breaker.record_failure("data").await;
        assert!(breaker.can_trade(0.0, false).await.allowed);
        assert_eq!(breaker.state().await.consecutive_failures, 2);
    }

    #[tokio::test]
    async fn test_drawdown_limit_halts() {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let breaker = breaker(clock.clone());

        let permission = breaker.can_trade(0.10, true).await;
        assert!(!permission.allowed);
        assert_eq!(permission.reason, REASON_DRAWDOWN);

        // Cooldown holds even after drawdown recovers.
        let permission = breaker.can_trade(0.0, true).await;
        assert_eq!(permission.reason, REASON_DRAWDOWN);

        clock.advance(Duration::minutes(31));
        assert!(breaker.can_trade(0.02, true).await.allowed);
    }

    #[tokio::test]
    async fn test_manual_override_beats_drawdown_and_halt() {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let breaker = breaker(clock.clone());

        assert!(!breaker.can_trade(0.5, true).await.allowed);
        breaker.manual_override(10).await;

        let permission = breaker.can_trade(0.5, true).await;
        assert!(permission.allowed);
        assert_eq!(permission.reason, REASON_MANUAL_OVERRIDE);

        clock.advance(Duration::minutes(11));
        let permission = breaker.can_trade(0.5, true).await;
        assert!(!permission.allowed);
    }

    #[tokio::test]
    async fn test_retrigger_sets_fresh_cooldown() {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let breaker = breaker(clock.clone());

        for _ in 0..3 {
            breaker.record_failure("first").await;
        }
        let first = breaker.state().await.halted_until.unwrap();

        clock.advance(Duration::minutes(10));
        breaker.record_failure("second").await;
        let state = breaker.state().await;
        assert_eq!(state.halted_until.unwrap(), first + Duration::minutes(10));
        assert_eq!(state.last_reason, "second");
        assert_eq!(state.trips, 2);
    }

    #[tokio::test]
    async fn test_reset_clears_halt() {
        let breaker = breaker(Arc::new(ManualClock::new(Utc::now())));
        breaker.can_trade(0.9, true).await;
        assert!(breaker.is_tripped());
        breaker.reset().await;
        assert!(!breaker.is_tripped());
        assert!(breaker.can_trade(0.0, true).await.allowed);
    }
}
