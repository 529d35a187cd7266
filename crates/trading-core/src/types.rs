//! Core domain types for the swing trading bot.

pub mod market;
pub mod order;
pub mod position;
pub mod risk;
pub mod signal;

pub use market::*;
pub use order::*;
pub use position::*;
pub use risk::*;
pub use signal::*;
