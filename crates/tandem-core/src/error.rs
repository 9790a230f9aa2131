//! Release error taxonomy.
//!
//! Every failure that can end a pipeline run or a traffic shift is one of
//! these variants. Payloads are plain strings so an error can be cloned
//! into the persisted run record and reported back over the API verbatim.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type alias for release operations.
pub type ReleaseResult<T> = Result<T, ReleaseError>;

/// Errors surfaced by routing, pipelines, promotion, and traffic shifts.
#[derive(Debug, Clone, Error, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "message", rename_all = "snake_case")]
pub enum ReleaseError {
    /// Invalid setup (empty allow-list, duplicate rule priority, ...).
    /// Fatal before any traffic is served.
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("source fetch failed: {0}")]
    SourceFetch(String),

    #[error("build failed: {0}")]
    Build(String),

    /// A promoted tag was never successfully built and pushed.
    #[error("artifact not found: {0}")]
    ArtifactNotFound(String),

    #[error("health check timed out: {0}")]
    HealthCheckTimeout(String),

    #[error("deployment launch failed: {0}")]
    DeployLaunch(String),

    /// A trigger arrived while a conflicting run or shift was active.
    #[error("concurrency conflict: {0}")]
    ConcurrencyConflict(String),

    #[error("aborted: {0}")]
    Aborted(String),

    #[error("invalid transition: {0}")]
    InvalidTransition(String),

    #[error("state error: {0}")]
    State(String),
}

impl ReleaseError {
    /// Stable machine-readable name of the variant.
    pub fn kind(&self) -> &'static str {
        match self {
            ReleaseError::Configuration(_) => "configuration",
            ReleaseError::SourceFetch(_) => "source_fetch",
            ReleaseError::Build(_) => "build",
            ReleaseError::ArtifactNotFound(_) => "artifact_not_found",
            ReleaseError::HealthCheckTimeout(_) => "health_check_timeout",
            ReleaseError::DeployLaunch(_) => "deploy_launch",
            ReleaseError::ConcurrencyConflict(_) => "concurrency_conflict",
            ReleaseError::Aborted(_) => "aborted",
            ReleaseError::InvalidTransition(_) => "invalid_transition",
            ReleaseError::State(_) => "state",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serializes_with_kind_tag() {
        let err = ReleaseError::ArtifactNotFound("abc1234".to_string());
        let json = serde_json::to_value(&err).unwrap();
        assert_eq!(json["kind"], "artifact_not_found");
        assert_eq!(json["message"], "abc1234");
    }
}
