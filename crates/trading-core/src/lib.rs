//! Trading Core Library
//!
//! Shared types, broker clients, feature computation, and persistence for the
//! swing trading bot.

pub mod api;
pub mod clock;
pub mod config;
pub mod db;
pub mod error;
pub mod features;
pub mod types;
pub mod validator;

pub use clock::{Clock, ManualClock, SharedClock, SystemClock};
pub use config::Settings;
pub use db::Store;
pub use error::{Classification, Error, Result};
