//! Deployment descriptors rendered by the Building stage and consumed by
//! Deploying: a task definition referencing the resolved image, and the
//! load-balancer binding naming the container and port to register.

use serde::{Deserialize, Serialize};

use crate::types::{ArtifactRef, ComputeShape, EnvironmentName, EnvironmentSpec};

/// Task/service definition for one environment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskDefinition {
    /// Task family, `{container}-{environment}`.
    pub family: String,
    pub environment: EnvironmentName,
    pub container_name: String,
    /// Full image reference including the resolved tag.
    pub image: String,
    pub shape: ComputeShape,
    pub container_port: u16,
    pub desired_count: u32,
}

/// Which container and port the load balancer registers as targets.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoadBalancerBinding {
    pub container_name: String,
    pub container_port: u16,
}

/// Both descriptors, as produced by a single Building stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeploymentDescriptors {
    pub artifact: ArtifactRef,
    /// Revision of the source checkout the descriptors were rendered from.
    pub source_revision: String,
    pub task_definition: TaskDefinition,
    pub binding: LoadBalancerBinding,
}

impl DeploymentDescriptors {
    /// Render descriptors for `env` running `artifact`, from the source
    /// checkout at `source_revision`.
    pub fn render(env: &EnvironmentSpec, artifact: &ArtifactRef, source_revision: &str) -> Self {
        Self {
            artifact: artifact.clone(),
            source_revision: source_revision.to_string(),
            task_definition: TaskDefinition {
                family: format!("{}-{}", env.container_name, env.name),
                environment: env.name,
                container_name: env.container_name.clone(),
                image: artifact.image(),
                shape: env.shape,
                container_port: env.container_port,
                desired_count: env.desired_count,
            },
            binding: LoadBalancerBinding {
                container_name: env.container_name.clone(),
                container_port: env.container_port,
            },
        }
    }

    /// Image tag the task definition runs.
    pub fn tag(&self) -> &str {
        self.artifact.tag.as_str()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tag::ImageTag;
    use crate::types::{HealthCheckSpec, Protocol};

    #[test]
    fn render_references_resolved_tag() {
        let env = EnvironmentSpec {
            name: EnvironmentName::Blue,
            desired_count: 3,
            shape: ComputeShape {
                cpu_units: 512,
                memory_mib: 1024,
            },
            container_name: "web".to_string(),
            container_port: 8080,
            health_check: HealthCheckSpec {
                path: "/healthz".to_string(),
                protocol: Protocol::Http,
                interval: "10s".to_string(),
                timeout: "5s".to_string(),
                healthy_threshold: 2,
                unhealthy_threshold: 3,
            },
        };
        let artifact = ArtifactRef::new("registry.local/web", ImageTag::parse("abc1234").unwrap());

        let d = DeploymentDescriptors::render(&env, &artifact, "abc1234def5678");
        assert_eq!(d.task_definition.image, "registry.local/web:abc1234");
        assert_eq!(d.task_definition.family, "web-blue");
        assert_eq!(d.task_definition.desired_count, 3);
        assert_eq!(d.binding.container_port, 8080);
        assert_eq!(d.tag(), "abc1234");
        assert_eq!(d.source_revision, "abc1234def5678");

        let json = serde_json::to_value(&d).unwrap();
        assert_eq!(json["binding"]["container_name"], "web");
    }
}
