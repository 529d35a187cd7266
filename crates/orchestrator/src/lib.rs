//! Orchestrator
//!
//! Scheduling, the per-cycle entry pipeline, and operator alerting for the
//! swing trading bot.

pub mod advisory;
pub mod alerts;
pub mod service;

pub use advisory::{AdvisoryGate, AdvisoryVerdict};
pub use alerts::AlertManager;
pub use service::{
    CycleStatus, CycleSummary, Orchestrator, OrchestratorConfig, RunStatus, StatusReport,
    SymbolFailure, SymbolOutcome, SymbolReport,
};
