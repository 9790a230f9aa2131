//! Routing configuration errors.

use tandem_core::ReleaseError;
use thiserror::Error;

pub type RoutingResult<T> = Result<T, RoutingError>;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RoutingError {
    #[error("listener {listener}: duplicate rule priority {priority}")]
    DuplicatePriority { listener: String, priority: u32 },

    #[error("allow-list is empty")]
    EmptyAllowList,

    #[error("invalid CIDR block '{0}'")]
    InvalidCidr(String),

    #[error("listener {0} has no default action")]
    MissingDefault(String),

    #[error("listener {listener}: {reason}")]
    InvalidRule { listener: String, reason: String },

    #[error("unknown listener {0}")]
    UnknownListener(String),

    #[error("listener {0} does not forward by default and cannot be repointed")]
    DefaultNotForwarding(String),
}

impl From<RoutingError> for ReleaseError {
    fn from(e: RoutingError) -> Self {
        ReleaseError::Configuration(e.to_string())
    }
}
