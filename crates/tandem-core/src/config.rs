//! tandem.toml configuration parser.
//!
//! Validation is fail-closed: anything ambiguous (an empty allow-list, a
//! duration that does not parse, blue/green shape drift) aborts startup
//! before any traffic is served.

use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::duration::parse_duration;
use crate::error::ReleaseError;
use crate::types::{
    check_parity, ComputeShape, EnvironmentName, EnvironmentSpec, HealthCheckSpec, TargetGroupId,
};

/// Errors raised while loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(String),

    #[error("invalid value for {field}: {reason}")]
    Invalid { field: String, reason: String },
}

impl ConfigError {
    pub fn invalid(field: &str, reason: impl Into<String>) -> Self {
        ConfigError::Invalid {
            field: field.to_string(),
            reason: reason.into(),
        }
    }
}

impl From<ConfigError> for ReleaseError {
    fn from(e: ConfigError) -> Self {
        ReleaseError::Configuration(e.to_string())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TandemConfig {
    pub artifact: ArtifactConfig,
    pub source: SourceConfig,
    #[serde(default)]
    pub build: BuildConfig,
    pub environments: EnvironmentsConfig,
    pub staging: StagingConfig,
    pub production: ProductionConfig,
    #[serde(default)]
    pub platform: PlatformConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArtifactConfig {
    /// Repository coordinate images are pushed to and pulled from.
    pub repository: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    /// The single tracked branch whose pushes trigger staging.
    pub branch: String,
    /// Shell command that fetches a revision into the working copy.
    pub fetch_command: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuildConfig {
    /// Shell command that builds and pushes an image.
    pub command: Option<String>,
    /// Upper bound on a single build invocation.
    #[serde(default = "default_build_timeout")]
    pub timeout: String,
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            command: None,
            timeout: default_build_timeout(),
        }
    }
}

fn default_build_timeout() -> String {
    "15m".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnvironmentsConfig {
    pub blue: EnvironmentConfig,
    pub green: EnvironmentConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnvironmentConfig {
    pub desired_count: u32,
    pub shape: ComputeShape,
    pub container_name: String,
    pub container_port: u16,
    pub health_check: HealthCheckSpec,
}

impl EnvironmentConfig {
    fn spec(&self, name: EnvironmentName) -> EnvironmentSpec {
        EnvironmentSpec {
            name,
            desired_count: self.desired_count,
            shape: self.shape,
            container_name: self.container_name.clone(),
            container_port: self.container_port,
            health_check: self.health_check.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StagingConfig {
    #[serde(default = "default_staging_listener")]
    pub listener: String,
    /// Target group the staging service registers into.
    pub target_group: String,
    /// CIDR blocks allowed to reach staging. Everyone else gets 403.
    pub allow_list: Vec<String>,
}

fn default_staging_listener() -> String {
    "staging".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProductionConfig {
    #[serde(default = "default_production_listener")]
    pub listener: String,
    #[serde(default = "default_deployment_group")]
    pub deployment_group: String,
    /// The two fixed target-group identities that alternate between the
    /// live and shadow roles. The first one starts live.
    pub target_groups: Vec<String>,
    #[serde(default = "default_health_timeout")]
    pub health_timeout: String,
    #[serde(default = "default_health_interval")]
    pub health_interval: String,
}

fn default_production_listener() -> String {
    "production".to_string()
}

fn default_deployment_group() -> String {
    "production".to_string()
}

fn default_health_timeout() -> String {
    "5m".to_string()
}

fn default_health_interval() -> String {
    "10s".to_string()
}

/// Shell hooks used by the command-backed compute platform.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PlatformConfig {
    /// In-place service update (staging).
    pub update_command: Option<String>,
    /// Launch a task set into a target group.
    pub launch_command: Option<String>,
    /// Deregister and stop a task set.
    pub deregister_command: Option<String>,
    /// Addresses (`ip:port`) probed for each target group's health.
    #[serde(default)]
    pub probe_addresses: BTreeMap<String, Vec<String>>,
}

impl TandemConfig {
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        toml::from_str(content).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Static descriptor for one environment.
    pub fn environment(&self, name: EnvironmentName) -> EnvironmentSpec {
        match name {
            EnvironmentName::Blue => self.environments.blue.spec(name),
            EnvironmentName::Green => self.environments.green.spec(name),
        }
    }

    /// The production target groups as (initially live, initially shadow).
    pub fn production_target_groups(&self) -> Result<(TargetGroupId, TargetGroupId), ConfigError> {
        match self.production.target_groups.as_slice() {
            [a, b] if a != b => Ok((TargetGroupId::new(a.as_str()), TargetGroupId::new(b.as_str()))),
            [_, _] => Err(ConfigError::invalid(
                "production.target_groups",
                "the two target groups must be distinct",
            )),
            other => Err(ConfigError::invalid(
                "production.target_groups",
                format!("expected exactly 2 target groups, got {}", other.len()),
            )),
        }
    }

    pub fn build_timeout(&self) -> Result<Duration, ConfigError> {
        duration_field("build.timeout", &self.build.timeout)
    }

    pub fn health_timeout(&self) -> Result<Duration, ConfigError> {
        duration_field("production.health_timeout", &self.production.health_timeout)
    }

    pub fn health_interval(&self) -> Result<Duration, ConfigError> {
        duration_field("production.health_interval", &self.production.health_interval)
    }

    /// Both production target groups list at least
    /// `environments.blue.desired_count` health-check addresses. Required
    /// when the health gate polls `platform.probe_addresses` over HTTP.
    pub fn check_health_address_coverage(&self) -> Result<(), ConfigError> {
        let required = self.environments.blue.desired_count as usize;
        let (a, b) = self.production_target_groups()?;
        for tg in [a, b] {
            let listed = self
                .platform
                .probe_addresses
                .get(tg.as_str())
                .map_or(0, Vec::len);
            if listed < required {
                return Err(ConfigError::invalid(
                    &format!("platform.probe_addresses.{tg}"),
                    format!("lists {listed} address(es), the health gate needs at least {required}"),
                ));
            }
        }
        Ok(())
    }

    /// Check every invariant that must hold before traffic is served.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.artifact.repository.trim().is_empty() {
            return Err(ConfigError::invalid("artifact.repository", "must not be empty"));
        }
        if self.source.branch.trim().is_empty() {
            return Err(ConfigError::invalid("source.branch", "must not be empty"));
        }

        self.build_timeout()?;
        self.health_timeout()?;
        self.health_interval()?;

        let blue = self.environment(EnvironmentName::Blue);
        let green = self.environment(EnvironmentName::Green);
        for env in [&blue, &green] {
            if env.desired_count == 0 {
                return Err(ConfigError::invalid(
                    &format!("environments.{}.desired_count", env.name),
                    "must be at least 1",
                ));
            }
            for (field, value) in [
                ("interval", &env.health_check.interval),
                ("timeout", &env.health_check.timeout),
            ] {
                duration_field(
                    &format!("environments.{}.health_check.{field}", env.name),
                    value,
                )?;
            }
        }
        check_parity(&blue, &green)?;

        if self.staging.allow_list.is_empty() {
            return Err(ConfigError::invalid(
                "staging.allow_list",
                "an empty allow-list would expose nothing; refusing to treat it as allow-all",
            ));
        }
        if self.staging.allow_list.iter().any(|entry| entry.trim().is_empty()) {
            return Err(ConfigError::invalid("staging.allow_list", "contains an empty entry"));
        }

        let (a, b) = self.production_target_groups()?;
        if self.staging.target_group == a.as_str() || self.staging.target_group == b.as_str() {
            return Err(ConfigError::invalid(
                "staging.target_group",
                "staging and production must not share a target group",
            ));
        }

        let listeners: HashSet<&str> = [self.staging.listener.as_str(), self.production.listener.as_str()]
            .into_iter()
            .collect();
        if listeners.len() != 2 {
            return Err(ConfigError::invalid(
                "production.listener",
                "staging and production must use different listeners",
            ));
        }

        Ok(())
    }
}

/// Longest duration any single setting may hold.
const MAX_CONFIG_DURATION: Duration = Duration::from_secs(7 * 24 * 3600);

fn duration_field(field: &str, value: &str) -> Result<Duration, ConfigError> {
    let d = parse_duration(value).ok_or_else(|| ConfigError::invalid(field, format!("'{value}' is not a duration")))?;
    if d > MAX_CONFIG_DURATION {
        return Err(ConfigError::invalid(field, format!("'{value}' exceeds the 7d ceiling")));
    }
    Ok(d)
}
