//! Trading Engine
//!
//! Signal generation, idempotent order routing behind the live-trading lock,
//! exit management, and the funding-deferred trade queue.

pub mod ensemble;
pub mod executor;
pub mod order_manager;
pub mod position_manager;
pub mod setup_gate;
pub mod slippage;
pub mod strategies;
pub mod trade_queue;

pub use ensemble::EnsembleAggregator;
pub use executor::{ExecutionService, LiveCredentials, SubmitOptions};
pub use order_manager::{ManagedOrder, OrderManager};
pub use position_manager::{ExitAction, ExitConfig, ExitReason, PositionManager};
pub use setup_gate::SetupGate;
pub use slippage::SlippageModel;
pub use strategies::{build_strategies, Strategy};
pub use trade_queue::{QueuedTrade, TradeQueue};
