//! Environments, target groups, and artifact references.

use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::config::ConfigError;
use crate::tag::ImageTag;

// ── Environment ───────────────────────────────────────────────────

/// The two environments of the topology.
///
/// Blue serves production traffic; green is the staging environment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EnvironmentName {
    Blue,
    Green,
}

impl EnvironmentName {
    pub fn as_str(&self) -> &'static str {
        match self {
            EnvironmentName::Blue => "blue",
            EnvironmentName::Green => "green",
        }
    }

    /// The release role the environment plays.
    pub fn role(&self) -> &'static str {
        match self {
            EnvironmentName::Blue => "production",
            EnvironmentName::Green => "staging",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "blue" | "production" => Some(EnvironmentName::Blue),
            "green" | "staging" => Some(EnvironmentName::Green),
            _ => None,
        }
    }
}

impl fmt::Display for EnvironmentName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// CPU/memory shape of a single task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComputeShape {
    /// CPU units (1024 = one vCPU).
    pub cpu_units: u32,
    /// Memory in MiB.
    pub memory_mib: u32,
}

/// Protocol used by a target group's health checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    #[default]
    Http,
    Https,
}

/// Health check parameters for tasks registered in a target group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthCheckSpec {
    /// HTTP path to probe (e.g., "/healthz").
    pub path: String,
    #[serde(default)]
    pub protocol: Protocol,
    /// Probe interval (e.g., "10s").
    #[serde(default = "default_interval")]
    pub interval: String,
    /// Timeout per probe (e.g., "5s").
    #[serde(default = "default_timeout")]
    pub timeout: String,
    /// Consecutive successes before a target counts as healthy.
    #[serde(default = "default_healthy_threshold")]
    pub healthy_threshold: u32,
    /// Consecutive failures before a target counts as unhealthy.
    #[serde(default = "default_unhealthy_threshold")]
    pub unhealthy_threshold: u32,
}

fn default_interval() -> String {
    "10s".to_string()
}

fn default_timeout() -> String {
    "5s".to_string()
}

fn default_healthy_threshold() -> u32 {
    2
}

fn default_unhealthy_threshold() -> u32 {
    3
}

/// Static definition of one environment's compute shape, port, and health check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvironmentSpec {
    pub name: EnvironmentName,
    pub desired_count: u32,
    pub shape: ComputeShape,
    pub container_name: String,
    pub container_port: u16,
    pub health_check: HealthCheckSpec,
}

/// Blue and green must be behaviourally identical; only the image may differ.
pub fn check_parity(blue: &EnvironmentSpec, green: &EnvironmentSpec) -> Result<(), ConfigError> {
    if blue.shape != green.shape {
        return Err(ConfigError::invalid(
            "environments.shape",
            format!(
                "blue ({}cpu/{}MiB) and green ({}cpu/{}MiB) differ",
                blue.shape.cpu_units,
                blue.shape.memory_mib,
                green.shape.cpu_units,
                green.shape.memory_mib
            ),
        ));
    }
    if blue.container_port != green.container_port {
        return Err(ConfigError::invalid(
            "environments.container_port",
            format!(
                "blue ({}) and green ({}) differ",
                blue.container_port, green.container_port
            ),
        ));
    }
    if blue.container_name != green.container_name {
        return Err(ConfigError::invalid(
            "environments.container_name",
            format!(
                "blue ({}) and green ({}) differ",
                blue.container_name, green.container_name
            ),
        ));
    }
    Ok(())
}

// ── Target groups ─────────────────────────────────────────────────

/// Identity of a target group. Identities never change; only the role
/// ("live" or "shadow") assigned to them does.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TargetGroupId(String);

impl TargetGroupId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TargetGroupId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TargetGroupId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// A named, health-checked pool of tasks a listener can route to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetGroup {
    pub id: TargetGroupId,
    pub environment: EnvironmentName,
    pub health_check_path: String,
    pub protocol: Protocol,
}

impl TargetGroup {
    /// Target group for an environment, inheriting its health check.
    pub fn for_environment(id: impl Into<String>, env: &EnvironmentSpec) -> Self {
        Self {
            id: TargetGroupId::new(id),
            environment: env.name,
            health_check_path: env.health_check.path.clone(),
            protocol: env.health_check.protocol,
        }
    }
}

// ── Artifacts ─────────────────────────────────────────────────────

/// A container image in the artifact store, addressed by tag.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ArtifactRef {
    /// Repository coordinate, e.g. `registry.example.com/shop/web`.
    pub repository: String,
    pub tag: ImageTag,
}

impl ArtifactRef {
    pub fn new(repository: impl Into<String>, tag: ImageTag) -> Self {
        Self {
            repository: repository.into(),
            tag,
        }
    }

    /// Full image reference (`repository:tag`).
    pub fn image(&self) -> String {
        format!("{}:{}", self.repository, self.tag)
    }
}

impl fmt::Display for ArtifactRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.repository, self.tag)
    }
}

/// Current Unix epoch in seconds.
pub fn epoch_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
