//! Swing Bot: long-only equities swing trading with risk-controlled execution
//!
//! This root crate re-exports the workspace crates for integration tests and
//! benchmarks. For actual functionality, use the individual crates directly:
//!
//! - `trading-core`: Types, settings, broker clients, indicators, storage
//! - `trading-engine`: Strategies, ensemble, execution, exits, trade queue
//! - `risk-manager`: Sizing, concentration limits, circuit breaker, errors
//! - `orchestrator`: Scheduler, cycle pipeline, alerts, CLI binary

pub use orchestrator as bot;
pub use risk_manager as risk;
pub use trading_core as core;
pub use trading_engine as trading;
