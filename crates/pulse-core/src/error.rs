//! Domain-specific error types following panic-free policy.

use thiserror::Error;

/// Errors that can occur in domain operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// A metric key or label that no sampler produces
    #[error("Unknown metric: {0}")]
    UnknownMetric(String),
}

/// Result type for domain operations.
pub type DomainResult<T> = Result<T, DomainError>;
