//! In-memory compute platform for tests.
//!
//! `ScriptedPlatform` keeps task sets in memory, reports the targets they
//! register as a [`TargetHealthSource`], and can be told to fail launches
//! or to launch tasks that never turn healthy.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;

use tandem_core::{DeploymentDescriptors, EnvironmentName, ReleaseError, ReleaseResult, TargetGroupId};
use tandem_health::{HealthStatus, TargetHealth, TargetHealthSource};

use crate::platform::ComputePlatform;

/// A call made against the platform, in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlatformCall {
    UpdateInPlace {
        environment: EnvironmentName,
        task_set: String,
        image: String,
        source_revision: String,
    },
    Launch {
        target_group: TargetGroupId,
        task_set: String,
        image: String,
        source_revision: String,
    },
    Deregister {
        target_group: TargetGroupId,
        task_set: String,
    },
}

#[derive(Debug, Clone)]
struct TaskSet {
    target_group: TargetGroupId,
    image: String,
    desired_count: u32,
}

struct Inner {
    task_sets: BTreeMap<String, TaskSet>,
    in_place: HashMap<EnvironmentName, (String, String)>,
    launch_health: HealthStatus,
    fail_launch: Option<String>,
    fail_update: Option<String>,
    launch_delay: Duration,
    calls: Vec<PlatformCall>,
}

pub struct ScriptedPlatform {
    inner: Mutex<Inner>,
}

impl Default for ScriptedPlatform {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptedPlatform {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                task_sets: BTreeMap::new(),
                in_place: HashMap::new(),
                launch_health: HealthStatus::Healthy,
                fail_launch: None,
                fail_update: None,
                launch_delay: Duration::ZERO,
                calls: Vec::new(),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Health every newly launched target reports.
    pub fn set_launch_health(&self, status: HealthStatus) {
        self.lock().launch_health = status;
    }

    pub fn fail_launches(&self, reason: &str) {
        self.lock().fail_launch = Some(reason.to_string());
    }

    pub fn fail_updates(&self, reason: &str) {
        self.lock().fail_update = Some(reason.to_string());
    }

    /// Make each launch take this long before registering targets.
    pub fn set_launch_delay(&self, delay: Duration) {
        self.lock().launch_delay = delay;
    }

    /// Register an already-running task set, e.g. the initial live one.
    pub fn seed_task_set(&self, target_group: &TargetGroupId, task_set: &str, image: &str, desired_count: u32) {
        self.lock().task_sets.insert(
            task_set.to_string(),
            TaskSet {
                target_group: target_group.clone(),
                image: image.to_string(),
                desired_count,
            },
        );
    }

    pub fn calls(&self) -> Vec<PlatformCall> {
        self.lock().calls.clone()
    }

    /// Task sets currently registered in `target_group`.
    pub fn task_sets_in(&self, target_group: &TargetGroupId) -> Vec<String> {
        self.lock()
            .task_sets
            .iter()
            .filter(|(_, ts)| &ts.target_group == target_group)
            .map(|(id, _)| id.clone())
            .collect()
    }

    /// Image registered in `target_group`, if exactly one task set is.
    pub fn image_in(&self, target_group: &TargetGroupId) -> Option<String> {
        let inner = self.lock();
        let mut images = inner
            .task_sets
            .values()
            .filter(|ts| &ts.target_group == target_group)
            .map(|ts| ts.image.clone());
        match (images.next(), images.next()) {
            (Some(image), None) => Some(image),
            _ => None,
        }
    }

    /// Image an environment runs after in-place updates.
    pub fn in_place_image(&self, environment: EnvironmentName) -> Option<String> {
        self.lock().in_place.get(&environment).map(|(_, image)| image.clone())
    }
}

#[async_trait]
impl ComputePlatform for ScriptedPlatform {
    async fn update_in_place(
        &self,
        environment: EnvironmentName,
        task_set: &str,
        descriptors: &DeploymentDescriptors,
    ) -> ReleaseResult<()> {
        let mut inner = self.lock();
        let image = descriptors.task_definition.image.clone();
        inner.calls.push(PlatformCall::UpdateInPlace {
            environment,
            task_set: task_set.to_string(),
            image: image.clone(),
            source_revision: descriptors.source_revision.clone(),
        });
        if let Some(reason) = &inner.fail_update {
            return Err(ReleaseError::DeployLaunch(reason.clone()));
        }
        inner.in_place.insert(environment, (task_set.to_string(), image));
        Ok(())
    }

    async fn launch_task_set(
        &self,
        target_group: &TargetGroupId,
        task_set: &str,
        descriptors: &DeploymentDescriptors,
    ) -> ReleaseResult<()> {
        let delay = {
            let mut inner = self.lock();
            inner.calls.push(PlatformCall::Launch {
                target_group: target_group.clone(),
                task_set: task_set.to_string(),
                image: descriptors.task_definition.image.clone(),
                source_revision: descriptors.source_revision.clone(),
            });
            if let Some(reason) = &inner.fail_launch {
                return Err(ReleaseError::DeployLaunch(reason.clone()));
            }
            inner.launch_delay
        };
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        self.seed_task_set(
            target_group,
            task_set,
            &descriptors.task_definition.image,
            descriptors.task_definition.desired_count,
        );
        Ok(())
    }

    async fn deregister_task_set(&self, target_group: &TargetGroupId, task_set: &str) -> ReleaseResult<()> {
        let mut inner = self.lock();
        inner.calls.push(PlatformCall::Deregister {
            target_group: target_group.clone(),
            task_set: task_set.to_string(),
        });
        inner.task_sets.remove(task_set);
        Ok(())
    }
}

#[async_trait]
impl TargetHealthSource for ScriptedPlatform {
    async fn target_health(&self, target_group: &TargetGroupId) -> ReleaseResult<Vec<TargetHealth>> {
        let inner = self.lock();
        let status = inner.launch_health;
        let report = inner
            .task_sets
            .iter()
            .filter(|(_, ts)| &ts.target_group == target_group)
            .flat_map(|(id, ts)| {
                (0..ts.desired_count)
                    .map(move |i| TargetHealth::new(format!("{id}/{i}"), status))
            })
            .collect();
        Ok(report)
    }
}
