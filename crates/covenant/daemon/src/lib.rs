//! Covenant daemon library
//!
//! This module provides the pieces `covenantd` is assembled from:
//! - Layered configuration
//! - Telegram Bot API actuator
//! - Engine wiring for the configured ledger and mode
//! - Read-only ledger reports

pub mod app;
pub mod config;
pub mod error;
pub mod report;
pub mod telegram;

pub use config::{DaemonConfig, StorageConfig};
pub use error::{DaemonError, DaemonResult};
pub use telegram::TelegramActuator;
