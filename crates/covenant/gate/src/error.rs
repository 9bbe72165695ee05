//! Error types for the gatekeeper

use covenant_ledger::StorageError;
use std::time::Duration;
use thiserror::Error;

/// Failures reported by the chat platform boundary
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PlatformError {
    /// Member cannot be messaged directly (blocked the bot, never started it)
    #[error("member unreachable: {0}")]
    Unreachable(String),

    /// Platform refused the call (missing rights, unknown message, ...)
    #[error("platform rejected call: {0}")]
    Rejected(String),

    /// Network or protocol failure
    #[error("transport error: {0}")]
    Transport(String),

    /// Call did not finish in time
    #[error("call timed out after {0:?}")]
    Timeout(Duration),
}

/// Errors from the gatekeeper engine
#[derive(Debug, Error)]
pub enum GateError {
    /// Event could not be interpreted; only this event is rejected
    #[error("malformed event: {0}")]
    MalformedEvent(String),

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// A dispatched event task panicked or was cancelled
    #[error("event task failed: {0}")]
    TaskFailed(String),
}

/// Result type for gatekeeper operations
pub type GateResult<T> = Result<T, GateError>;
