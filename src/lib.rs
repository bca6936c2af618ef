//! Autonomous forex trading loop against an OANDA-style broker.
//!
//! Each cycle fetches candles, computes indicators, turns them into one signal
//! per instrument, and opens or closes positions within the risk budget.

pub mod brokers;
pub mod clock;
pub mod config;
pub mod error;
pub mod indicators;
pub mod ledger;
pub mod market;
pub mod metrics;
pub mod monitoring;
pub mod orders;
pub mod positions;
pub mod retry;
pub mod risk;
pub mod scheduler;
pub mod strategy;

pub use config::Config;
pub use error::{BrokerError, ConfigError, LifecycleError};
pub use scheduler::{CycleReport, Scheduler};
