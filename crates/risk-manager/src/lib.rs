//! Risk Manager
//!
//! Position sizing, concentration limits, circuit breakers, stress
//! scenarios, and error classification for trading safety.

pub mod circuit_breaker;
pub mod correlation;
pub mod error_handler;
pub mod performance;
pub mod sizing;
pub mod stress;

pub use circuit_breaker::{
    CircuitBreaker, CircuitBreakerConfig, CircuitBreakerState, TradePermission,
};
pub use correlation::{ConstraintCheck, CorrelationManager};
pub use error_handler::{AlertSink, ErrorHandler, ErrorHandlerConfig};
pub use performance::{PerformanceMonitor, PerformanceStats};
pub use sizing::{RiskConfig, RiskManager};
pub use stress::{worst_case, StressTestResult, StressTester};
