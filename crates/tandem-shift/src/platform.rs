//! Contracts with the compute platform and the load balancer.

use async_trait::async_trait;

use tandem_core::{DeploymentDescriptors, EnvironmentName, ReleaseError, ReleaseResult, TargetGroupId};
use tandem_routing::RoutingTable;

/// The container platform that runs task sets.
///
/// Task set IDs are chosen by the caller, so a launch interrupted midway
/// can still be deregistered.
#[async_trait]
pub trait ComputePlatform: Send + Sync {
    /// Replace the environment's running task set in place (no shadow, no
    /// health gate).
    async fn update_in_place(
        &self,
        environment: EnvironmentName,
        task_set: &str,
        descriptors: &DeploymentDescriptors,
    ) -> ReleaseResult<()>;

    /// Launch `task_set` and register its tasks in `target_group`.
    async fn launch_task_set(
        &self,
        target_group: &TargetGroupId,
        task_set: &str,
        descriptors: &DeploymentDescriptors,
    ) -> ReleaseResult<()>;

    /// Deregister and stop `task_set`. Unknown task sets are a no-op.
    async fn deregister_task_set(&self, target_group: &TargetGroupId, task_set: &str) -> ReleaseResult<()>;
}

/// The listener configuration surface of the load balancer.
#[async_trait]
pub trait LoadBalancer: Send + Sync {
    /// Point `listener`'s default rule at `target`, returning the previous
    /// target.
    async fn repoint_default(&self, listener: &str, target: &TargetGroupId) -> ReleaseResult<TargetGroupId>;
}

#[async_trait]
impl LoadBalancer for RoutingTable {
    async fn repoint_default(&self, listener: &str, target: &TargetGroupId) -> ReleaseResult<TargetGroupId> {
        RoutingTable::repoint_default(self, listener, target).map_err(ReleaseError::from)
    }
}
