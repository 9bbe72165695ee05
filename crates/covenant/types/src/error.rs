//! Error types for value construction and parsing

use thiserror::Error;

/// Errors raised while building or parsing core values
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TypeError {
    /// Policy version was empty after trimming
    #[error("policy version must not be empty")]
    EmptyVersion,

    /// Policy version collides with the reserved sentinel marker
    #[error("policy version '{0}' is reserved")]
    ReservedVersion(String),

    /// Acknowledgement token did not have the `agree_<space>` shape
    #[error("malformed acknowledgement token: {0}")]
    MalformedToken(String),

    /// Unknown capability name
    #[error("unknown capability: {0}")]
    UnknownCapability(String),
}
