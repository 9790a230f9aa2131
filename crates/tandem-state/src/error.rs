//! Error types for the Tandem state store.

use tandem_core::ReleaseError;
use thiserror::Error;

/// Result type alias for state store operations.
pub type StateResult<T> = Result<T, StateError>;

/// Errors that can occur during state store operations.
#[derive(Debug, Error)]
pub enum StateError {
    #[error("failed to open database: {0}")]
    Open(String),

    #[error("transaction error: {0}")]
    Transaction(String),

    #[error("table error: {0}")]
    Table(String),

    #[error("read error: {0}")]
    Read(String),

    #[error("write error: {0}")]
    Write(String),

    #[error("serialization error: {0}")]
    Serialize(String),

    #[error("deserialization error: {0}")]
    Deserialize(String),

    #[error("not found: {0}")]
    NotFound(String),

    /// A compare-and-swap found a different value than expected.
    #[error("conflict: {0}")]
    Conflict(String),
}

impl From<StateError> for ReleaseError {
    fn from(e: StateError) -> Self {
        match e {
            StateError::Conflict(msg) => ReleaseError::ConcurrencyConflict(msg),
            other => ReleaseError::State(other.to_string()),
        }
    }
}
