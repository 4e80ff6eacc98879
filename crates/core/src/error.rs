//! Domain error model.

use thiserror::Error;

/// Result type used across the domain layer.
pub type DomainResult<T> = Result<T, DomainError>;

/// Deterministic domain failures: bad input, illegal lifecycle moves, lookups
/// that came back empty. Gateway and serial-line failures have their own
/// error types in the crates that own those boundaries.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// Request input rejected (non-positive quantity, bad calibration blob).
    #[error("validation failed: {0}")]
    Validation(String),

    /// An operation was asked to move out of a state that does not allow it.
    #[error("invariant violated: {0}")]
    InvariantViolation(String),

    #[error("invalid identifier: {0}")]
    InvalidId(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),
}

impl DomainError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn invariant(msg: impl Into<String>) -> Self {
        Self::InvariantViolation(msg.into())
    }

    pub fn invalid_id(msg: impl Into<String>) -> Self {
        Self::InvalidId(msg.into())
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict(msg.into())
    }

    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound(what.into())
    }
}
