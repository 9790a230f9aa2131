//! Pipeline settings resolved from `tandem.toml`.

use std::time::Duration;

use tandem_core::{EnvironmentName, EnvironmentSpec, ReleaseResult, TandemConfig};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineSettings {
    /// Image repository builds push into.
    pub repository: String,
    /// Branch whose pushes trigger staging.
    pub tracked_branch: String,
    pub build_timeout: Duration,
    pub staging: EnvironmentSpec,
    pub production: EnvironmentSpec,
    /// Deployment group the production shift runs against.
    pub deployment_group: String,
}

impl PipelineSettings {
    pub fn from_config(config: &TandemConfig) -> ReleaseResult<Self> {
        Ok(Self {
            repository: config.artifact.repository.clone(),
            tracked_branch: config.source.branch.clone(),
            build_timeout: config.build_timeout()?,
            staging: config.environment(EnvironmentName::Green),
            production: config.environment(EnvironmentName::Blue),
            deployment_group: config.production.deployment_group.clone(),
        })
    }
}
