//! Shift controller: drives a [`TrafficShift`] against the platform, the
//! health gate, the load balancer, and the persisted live pointer.
//!
//! At most one shift runs per environment, enforced by the durable shift
//! lock. The live pointer flips only after the listener has been
//! repointed at a healthy shadow target group; any failure before that
//! point rolls back.
//!
//! Each shift persists a [`ShiftRecord`] before launching anything, so a
//! process that dies mid-shift leaves enough behind for
//! [`ShiftController::recover`] to remove the stray task set.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{error, info, warn};

use tandem_core::{epoch_secs, DeploymentDescriptors, EnvironmentName, ReleaseError, ReleaseResult};
use tandem_health::{GateParams, HealthGate};
use tandem_state::{DeploymentGroupRecord, LockOutcome, ShiftRecord, StateError, StateStore};

use crate::machine::{ShiftPhase, TrafficShift};
use crate::platform::{ComputePlatform, LoadBalancer};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShiftParams {
    /// Upper bound on HealthChecking.
    pub health_timeout: Duration,
    pub health_interval: Duration,
}

/// A shift that did not settle.
#[derive(Debug)]
pub struct ShiftFailure {
    pub error: ReleaseError,
    /// The rolled-back shift; `None` when the shift never started (lock
    /// conflict, unknown deployment group).
    pub shift: Option<Box<TrafficShift>>,
}

impl From<ReleaseError> for ShiftFailure {
    fn from(error: ReleaseError) -> Self {
        Self { error, shift: None }
    }
}

impl From<StateError> for ShiftFailure {
    fn from(e: StateError) -> Self {
        Self::from(ReleaseError::from(e))
    }
}

impl From<ShiftFailure> for ReleaseError {
    fn from(f: ShiftFailure) -> Self {
        f.error
    }
}

#[derive(Clone)]
pub struct ShiftController {
    store: StateStore,
    platform: Arc<dyn ComputePlatform>,
    load_balancer: Arc<dyn LoadBalancer>,
    gate: HealthGate,
    params: ShiftParams,
}

impl ShiftController {
    pub fn new(
        store: StateStore,
        platform: Arc<dyn ComputePlatform>,
        load_balancer: Arc<dyn LoadBalancer>,
        gate: HealthGate,
        params: ShiftParams,
    ) -> Self {
        Self {
            store,
            platform,
            load_balancer,
            gate,
            params,
        }
    }

    /// Cut `group_name` over to a new task set running `descriptors`.
    ///
    /// Returns the settled shift, or the failure together with the
    /// rolled-back shift. Flipping `abort` to true while the shift is in
    /// flight takes the rollback path.
    pub async fn execute(
        &self,
        group_name: &str,
        descriptors: &DeploymentDescriptors,
        mut abort: watch::Receiver<bool>,
    ) -> Result<TrafficShift, ShiftFailure> {
        let snapshot = self.load_group(group_name)?;
        let shift_id = uuid::Uuid::new_v4().to_string();
        let group = self.acquire(&snapshot, &shift_id)?;

        let result = self.run(&group, &shift_id, descriptors, &mut abort).await;

        self.release(group.environment, &shift_id);
        result
    }

    fn load_group(&self, group_name: &str) -> ReleaseResult<DeploymentGroupRecord> {
        self.store.get_deployment_group(group_name)?.ok_or_else(|| {
            ReleaseError::Configuration(format!("deployment group {group_name} is not bootstrapped"))
        })
    }

    /// Take the environment's shift lock, then read the group again. A
    /// shift that settled after `snapshot` was read has moved the live
    /// pointer, and this one must start from where that one left it.
    fn acquire(&self, snapshot: &DeploymentGroupRecord, shift_id: &str) -> ReleaseResult<DeploymentGroupRecord> {
        let environment = snapshot.environment;
        if let LockOutcome::Held(held) = self.store.try_lock_shift(environment, shift_id, epoch_secs())? {
            warn!(%environment, holder = %held.holder, "shift rejected, one already in flight");
            return Err(ReleaseError::ConcurrencyConflict(format!(
                "environment {environment} already has shift {} in flight",
                held.holder
            )));
        }

        match self.load_group(&snapshot.name) {
            Ok(group) => {
                if group.live != snapshot.live {
                    info!(group = %group.name, live = %group.live_target(), "live pointer moved before lock, using current");
                }
                Ok(group)
            }
            Err(e) => {
                self.release(environment, shift_id);
                Err(e)
            }
        }
    }

    fn release(&self, environment: EnvironmentName, shift_id: &str) {
        if let Err(e) = self.store.clear_shift_record(environment, shift_id) {
            error!(shift = %shift_id, error = %e, "failed to clear shift record");
        }
        match self.store.unlock_shift(environment, shift_id) {
            Ok(true) => {}
            Ok(false) => warn!(shift = %shift_id, "shift lock was not held at release"),
            Err(e) => error!(shift = %shift_id, error = %e, "failed to release shift lock"),
        }
    }

    /// Clean up after a shift whose process stopped before it settled or
    /// rolled back, then release its lock.
    ///
    /// If the live pointer already names the shift's task set, the swap
    /// committed and only the previous task set is drained. Otherwise the
    /// shift's task set is deregistered and the pointer is left as it is.
    /// Listeners are reconciled from the pointer by routing sync.
    pub async fn recover(&self, environment: EnvironmentName) -> ReleaseResult<Option<ShiftRecord>> {
        let Some(record) = self.store.shift_record(environment)? else {
            return Ok(None);
        };
        let group = self.load_group(&record.group)?;

        if group.live_task_set.as_deref() == Some(record.task_set.as_str()) {
            if let Some(previous) = &record.previous_task_set {
                self.platform
                    .deregister_task_set(&record.previous_target_group, previous)
                    .await?;
            }
            info!(shift = %record.shift_id, live = %record.task_set, "interrupted shift had settled, previous task set drained");
        } else {
            self.platform
                .deregister_task_set(&record.target_group, &record.task_set)
                .await?;
            warn!(
                shift = %record.shift_id,
                target_group = %record.target_group,
                task_set = %record.task_set,
                "interrupted shift rolled back"
            );
        }

        self.release(environment, &record.shift_id);
        Ok(Some(record))
    }

    async fn run(
        &self,
        group: &DeploymentGroupRecord,
        shift_id: &str,
        descriptors: &DeploymentDescriptors,
        abort: &mut watch::Receiver<bool>,
    ) -> Result<TrafficShift, ShiftFailure> {
        let tag = descriptors.artifact.tag.clone();
        let short_id = shift_id.get(..8).unwrap_or(shift_id);
        let task_set = format!("{}-{}-{}", descriptors.task_definition.family, tag, short_id);
        let mut shift = TrafficShift::new(
            shift_id,
            &group.name,
            group.environment,
            group.live_target().clone(),
            group.shadow_target().clone(),
            tag,
            &task_set,
        );
        self.store.put_shift_record(&ShiftRecord {
            shift_id: shift_id.to_string(),
            group: group.name.clone(),
            environment: group.environment,
            target_group: shift.to.clone(),
            task_set: task_set.clone(),
            previous_target_group: shift.from.clone(),
            previous_task_set: group.live_task_set.clone(),
            started_at: epoch_secs(),
        })?;
        info!(
            shift = %shift.id,
            group = %group.name,
            from = %shift.from,
            to = %shift.to,
            tag = %shift.tag,
            "traffic shift started"
        );

        if let Err(error) = self.advance(&mut shift, group, descriptors, abort).await {
            self.roll_back(&mut shift, &group.listener, &error).await;
            return Err(ShiftFailure {
                error,
                shift: Some(Box::new(shift)),
            });
        }

        self.drain_previous(&shift, group).await;
        info!(shift = %shift.id, live = %shift.to, tag = %shift.tag, "traffic shift settled");
        Ok(shift)
    }

    async fn advance(
        &self,
        shift: &mut TrafficShift,
        group: &DeploymentGroupRecord,
        descriptors: &DeploymentDescriptors,
        abort: &mut watch::Receiver<bool>,
    ) -> ReleaseResult<()> {
        shift.transition(ShiftPhase::Provisioning)?;
        until_aborted(
            abort,
            self.platform
                .launch_task_set(&shift.to, &shift.task_set, descriptors),
        )
        .await?;

        shift.transition(ShiftPhase::HealthChecking)?;
        let params = GateParams {
            min_healthy: descriptors.task_definition.desired_count,
            timeout: self.params.health_timeout,
            interval: self.params.health_interval,
        };
        self.gate.wait_healthy(&shift.to, &params, abort).await?;

        shift.transition(ShiftPhase::Shifting)?;
        check_abort(abort)?;
        self.load_balancer
            .repoint_default(&group.listener, &shift.to)
            .await?;
        shift.listener_repointed = true;
        self.store.swap_live_target(
            &group.name,
            &shift.from,
            &shift.task_set,
            &shift.tag,
            epoch_secs(),
        )?;

        shift.transition(ShiftPhase::Settled)
    }

    /// Undo an in-flight shift: restore the listener if it moved, then
    /// remove the shadow task set. The live pointer was never flipped.
    async fn roll_back(&self, shift: &mut TrafficShift, listener: &str, cause: &ReleaseError) {
        if let Err(e) = shift.begin_rollback(&cause.to_string()) {
            error!(shift = %shift.id, error = %e, "cannot enter rollback");
            return;
        }

        if shift.listener_repointed {
            match self.load_balancer.repoint_default(listener, &shift.from).await {
                Ok(_) => shift.listener_repointed = false,
                Err(e) => error!(
                    shift = %shift.id,
                    %listener,
                    target_group = %shift.from,
                    error = %e,
                    "failed to restore listener during rollback"
                ),
            }
        }

        if let Err(e) = self
            .platform
            .deregister_task_set(&shift.to, &shift.task_set)
            .await
        {
            error!(
                shift = %shift.id,
                task_set = %shift.task_set,
                error = %e,
                "failed to deregister shadow task set"
            );
        }

        if let Err(e) = shift.finish_rollback() {
            error!(shift = %shift.id, error = %e, "cannot finish rollback");
        }
    }

    /// The previously live target group keeps its identity and goes idle.
    async fn drain_previous(&self, shift: &TrafficShift, group: &DeploymentGroupRecord) {
        let Some(previous) = &group.live_task_set else {
            return;
        };
        match self.platform.deregister_task_set(&shift.from, previous).await {
            Ok(()) => info!(target_group = %shift.from, task_set = %previous, "previous task set drained"),
            Err(e) => warn!(
                target_group = %shift.from,
                task_set = %previous,
                error = %e,
                "failed to drain previous task set"
            ),
        }
    }
}

fn check_abort(abort: &watch::Receiver<bool>) -> ReleaseResult<()> {
    if *abort.borrow() {
        return Err(ReleaseError::Aborted("shift aborted".to_string()));
    }
    Ok(())
}

/// Run `fut` unless `abort` flips first.
async fn until_aborted<T>(
    abort: &mut watch::Receiver<bool>,
    fut: impl Future<Output = ReleaseResult<T>>,
) -> ReleaseResult<T> {
    check_abort(abort)?;
    tokio::select! {
        res = fut => res,
        () = aborted(abort) => Err(ReleaseError::Aborted("shift aborted".to_string())),
    }
}

async fn aborted(abort: &mut watch::Receiver<bool>) {
    loop {
        if abort.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
        if *abort.borrow_and_update() {
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use tandem_core::{
        ArtifactRef, ComputeShape, EnvironmentName, EnvironmentSpec, HealthCheckSpec, ImageTag,
        Protocol, TargetGroupId,
    };
    use tandem_health::HealthStatus;
    use tandem_routing::{Listener, RequestInfo, RoutingSync, RoutingTable};

    use crate::testing::{PlatformCall, ScriptedPlatform};

    struct Fixture {
        store: StateStore,
        table: RoutingTable,
        platform: Arc<ScriptedPlatform>,
    }

    fn fixture() -> Fixture {
        let store = StateStore::open_in_memory().unwrap();
        let mut group = DeploymentGroupRecord::new(
            "production",
            EnvironmentName::Blue,
            "production",
            TargetGroupId::new("blue-a"),
            TargetGroupId::new("blue-b"),
            1000,
        );
        group.live_task_set = Some("web-blue-old".to_string());
        store.put_deployment_group(&group).unwrap();

        let table = RoutingTable::new();
        table.install(Listener::open("production", TargetGroupId::new("blue-a")).unwrap());

        let platform = Arc::new(ScriptedPlatform::new());
        platform.seed_task_set(&TargetGroupId::new("blue-a"), "web-blue-old", "registry/web:0000000", 2);

        Fixture {
            store,
            table,
            platform,
        }
    }

    fn controller_with(f: &Fixture, lb: Arc<dyn LoadBalancer>, timeout_ms: u64) -> ShiftController {
        ShiftController::new(
            f.store.clone(),
            f.platform.clone(),
            lb,
            HealthGate::new(f.platform.clone()),
            ShiftParams {
                health_timeout: Duration::from_millis(timeout_ms),
                health_interval: Duration::from_millis(5),
            },
        )
    }

    fn controller(f: &Fixture, timeout_ms: u64) -> ShiftController {
        controller_with(f, Arc::new(f.table.clone()), timeout_ms)
    }

    fn descriptors(tag: &str) -> DeploymentDescriptors {
        let env = EnvironmentSpec {
            name: EnvironmentName::Blue,
            desired_count: 2,
            shape: ComputeShape {
                cpu_units: 256,
                memory_mib: 512,
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
        DeploymentDescriptors::render(
            &env,
            &ArtifactRef::new("registry/web", ImageTag::parse(tag).unwrap()),
            "0123456789abcdef",
        )
    }

    fn listener_target(table: &RoutingTable) -> String {
        table
            .evaluate("production", &RequestInfo::from_raw(Some("8.8.8.8"), None))
            .unwrap()
            .action
            .target()
            .unwrap()
            .to_string()
    }

    fn no_abort() -> watch::Receiver<bool> {
        watch::channel(false).1
    }

    #[tokio::test]
    async fn healthy_shift_settles_and_swaps_live() {
        let f = fixture();
        let shift = controller(&f, 1000)
            .execute("production", &descriptors("abc1234"), no_abort())
            .await
            .unwrap();

        assert_eq!(shift.phase, ShiftPhase::Settled);
        assert_eq!(
            shift.history,
            vec![
                ShiftPhase::Idle,
                ShiftPhase::Provisioning,
                ShiftPhase::HealthChecking,
                ShiftPhase::Shifting,
                ShiftPhase::Settled,
            ]
        );
        assert_eq!(listener_target(&f.table), "blue-b");

        let group = f.store.get_deployment_group("production").unwrap().unwrap();
        assert_eq!(group.live_target().as_str(), "blue-b");
        assert_eq!(group.live_tag.unwrap().as_str(), "abc1234");
        assert_eq!(group.live_task_set.as_deref(), Some(shift.task_set.as_str()));

        // Old live drained, target group identities unchanged.
        assert!(f.platform.task_sets_in(&TargetGroupId::new("blue-a")).is_empty());
        assert_eq!(
            f.platform.image_in(&TargetGroupId::new("blue-b")).as_deref(),
            Some("registry/web:abc1234")
        );
        assert_eq!(group.target_groups[0].as_str(), "blue-a");
        assert!(f.store.shift_lock(EnvironmentName::Blue).unwrap().is_none());
        assert!(f.store.shift_record(EnvironmentName::Blue).unwrap().is_none());
    }

    #[tokio::test]
    async fn health_timeout_rolls_back_without_swapping() {
        let f = fixture();
        f.platform.set_launch_health(HealthStatus::Unhealthy);

        let failure = controller(&f, 40)
            .execute("production", &descriptors("abc1234"), no_abort())
            .await
            .unwrap_err();

        assert!(matches!(failure.error, ReleaseError::HealthCheckTimeout(_)));
        let shift = failure.shift.unwrap();
        assert!(matches!(shift.phase, ShiftPhase::RolledBack { .. }));
        assert!(shift.history.iter().any(|p| matches!(p, ShiftPhase::RollingBack { .. })));
        assert!(!shift.history.contains(&ShiftPhase::Shifting));

        assert_eq!(listener_target(&f.table), "blue-a");
        let group = f.store.get_deployment_group("production").unwrap().unwrap();
        assert_eq!(group.live_target().as_str(), "blue-a");
        assert_eq!(group.live_task_set.as_deref(), Some("web-blue-old"));

        // Only the shadow task set was deregistered.
        let deregistered: Vec<_> = f
            .platform
            .calls()
            .into_iter()
            .filter_map(|c| match c {
                PlatformCall::Deregister { task_set, .. } => Some(task_set),
                _ => None,
            })
            .collect();
        assert_eq!(deregistered, vec![shift.task_set.clone()]);
        assert_eq!(f.platform.task_sets_in(&TargetGroupId::new("blue-a")), vec!["web-blue-old"]);
        assert!(f.platform.task_sets_in(&TargetGroupId::new("blue-b")).is_empty());
        assert!(f.store.shift_lock(EnvironmentName::Blue).unwrap().is_none());
    }

    #[tokio::test]
    async fn launch_failure_rolls_back() {
        let f = fixture();
        f.platform.fail_launches("capacity exhausted");

        let failure = controller(&f, 1000)
            .execute("production", &descriptors("abc1234"), no_abort())
            .await
            .unwrap_err();

        assert_eq!(failure.error, ReleaseError::DeployLaunch("capacity exhausted".to_string()));
        assert!(matches!(failure.shift.unwrap().phase, ShiftPhase::RolledBack { .. }));
        assert_eq!(listener_target(&f.table), "blue-a");
    }

    #[tokio::test]
    async fn abort_during_health_check_rolls_back() {
        let f = fixture();
        f.platform.set_launch_health(HealthStatus::Unknown);
        let ctrl = controller(&f, 10_000);
        let (tx, rx) = watch::channel(false);

        let handle = tokio::spawn(async move { ctrl.execute("production", &descriptors("abc1234"), rx).await });
        tokio::time::sleep(Duration::from_millis(30)).await;
        tx.send(true).unwrap();

        let failure = handle.await.unwrap().unwrap_err();
        assert!(matches!(failure.error, ReleaseError::Aborted(_)));
        assert!(matches!(failure.shift.unwrap().phase, ShiftPhase::RolledBack { .. }));
        assert_eq!(listener_target(&f.table), "blue-a");
        assert!(f.platform.task_sets_in(&TargetGroupId::new("blue-b")).is_empty());
    }

    #[tokio::test]
    async fn abort_during_provisioning_rolls_back() {
        let f = fixture();
        f.platform.set_launch_delay(Duration::from_secs(10));
        let ctrl = controller(&f, 1000);
        let (tx, rx) = watch::channel(false);

        let handle = tokio::spawn(async move { ctrl.execute("production", &descriptors("abc1234"), rx).await });
        tokio::time::sleep(Duration::from_millis(20)).await;
        tx.send(true).unwrap();

        let failure = handle.await.unwrap().unwrap_err();
        assert!(matches!(failure.error, ReleaseError::Aborted(_)));
        let shift = failure.shift.unwrap();
        assert_eq!(
            shift.history[..3],
            [
                ShiftPhase::Idle,
                ShiftPhase::Provisioning,
                ShiftPhase::RollingBack {
                    reason: failure.error.to_string()
                }
            ]
        );
    }

    #[tokio::test]
    async fn second_shift_on_same_environment_is_rejected() {
        let f = fixture();
        f.store
            .try_lock_shift(EnvironmentName::Blue, "other-shift", 1)
            .unwrap();

        let failure = controller(&f, 1000)
            .execute("production", &descriptors("abc1234"), no_abort())
            .await
            .unwrap_err();

        assert!(matches!(failure.error, ReleaseError::ConcurrencyConflict(_)));
        assert!(failure.shift.is_none());
        assert!(f.platform.calls().is_empty());
        // The other holder keeps its lock.
        assert_eq!(
            f.store.shift_lock(EnvironmentName::Blue).unwrap().unwrap().holder,
            "other-shift"
        );
    }

    #[tokio::test]
    async fn unknown_group_is_a_configuration_error() {
        let f = fixture();
        let failure = controller(&f, 1000)
            .execute("nope", &descriptors("abc1234"), no_abort())
            .await
            .unwrap_err();
        assert!(matches!(failure.error, ReleaseError::Configuration(_)));
    }

    /// Repoints normally but lets a rival writer flip the live pointer
    /// first, so the persisted swap conflicts.
    struct RacingLoadBalancer {
        table: RoutingTable,
        store: StateStore,
    }

    #[async_trait]
    impl LoadBalancer for RacingLoadBalancer {
        async fn repoint_default(&self, listener: &str, target: &TargetGroupId) -> ReleaseResult<TargetGroupId> {
            if target.as_str() == "blue-b" {
                let _ = self.store.swap_live_target(
                    "production",
                    &TargetGroupId::new("blue-a"),
                    "rival",
                    &ImageTag::parse("fffffff").unwrap(),
                    5,
                );
            }
            LoadBalancer::repoint_default(&self.table, listener, target).await
        }
    }

    #[tokio::test]
    async fn failed_pointer_swap_restores_listener() {
        let f = fixture();
        let lb = Arc::new(RacingLoadBalancer {
            table: f.table.clone(),
            store: f.store.clone(),
        });

        let failure = controller_with(&f, lb, 1000)
            .execute("production", &descriptors("abc1234"), no_abort())
            .await
            .unwrap_err();

        assert!(matches!(failure.error, ReleaseError::ConcurrencyConflict(_)));
        let shift = failure.shift.unwrap();
        assert!(!shift.listener_repointed);
        assert!(matches!(shift.phase, ShiftPhase::RolledBack { .. }));
        assert_eq!(listener_target(&f.table), "blue-a");
    }

    #[tokio::test]
    async fn consecutive_shifts_alternate_target_groups() {
        let f = fixture();
        let ctrl = controller(&f, 1000);

        let first = ctrl
            .execute("production", &descriptors("abc1234"), no_abort())
            .await
            .unwrap();
        assert_eq!(first.to.as_str(), "blue-b");

        let second = ctrl
            .execute("production", &descriptors("def5678"), no_abort())
            .await
            .unwrap();
        assert_eq!(second.from.as_str(), "blue-b");
        assert_eq!(second.to.as_str(), "blue-a");
        assert_eq!(listener_target(&f.table), "blue-a");

        // First shift's task set was drained by the second.
        assert!(f.platform.task_sets_in(&TargetGroupId::new("blue-b")).is_empty());
        assert_eq!(
            f.platform.image_in(&TargetGroupId::new("blue-a")).as_deref(),
            Some("registry/web:def5678")
        );
    }

    /// Repoints through the routing table and then runs a routing sync
    /// pass, as the daemon's sync loop may at any moment.
    struct SyncingLoadBalancer {
        table: RoutingTable,
        store: StateStore,
        seen: std::sync::Mutex<Vec<Option<ShiftRecord>>>,
    }

    #[async_trait]
    impl LoadBalancer for SyncingLoadBalancer {
        async fn repoint_default(&self, listener: &str, target: &TargetGroupId) -> ReleaseResult<TargetGroupId> {
            let previous = LoadBalancer::repoint_default(&self.table, listener, target).await?;
            RoutingSync::new(self.table.clone()).sync(&self.store)?;
            let record = self.store.shift_record(EnvironmentName::Blue)?;
            self.seen.lock().unwrap().push(record);
            Ok(previous)
        }
    }

    #[tokio::test]
    async fn routing_sync_mid_shift_keeps_the_new_target() {
        let f = fixture();
        let lb = Arc::new(SyncingLoadBalancer {
            table: f.table.clone(),
            store: f.store.clone(),
            seen: std::sync::Mutex::new(Vec::new()),
        });

        let shift = controller_with(&f, lb.clone(), 1000)
            .execute("production", &descriptors("abc1234"), no_abort())
            .await
            .unwrap();

        assert_eq!(shift.phase, ShiftPhase::Settled);
        assert_eq!(listener_target(&f.table), "blue-b");
        let group = f.store.get_deployment_group("production").unwrap().unwrap();
        assert_eq!(group.live_target().as_str(), "blue-b");

        // The record was in place while the listener moved.
        let seen = lb.seen.lock().unwrap().clone();
        assert_eq!(seen.len(), 1);
        let record = seen[0].clone().unwrap();
        assert_eq!(record.task_set, shift.task_set);
        assert_eq!(record.previous_task_set.as_deref(), Some("web-blue-old"));

        // After settling, sync agrees with the listener.
        let stats = RoutingSync::new(f.table.clone()).sync(&f.store).unwrap();
        assert_eq!(stats.unchanged, 1);
        assert_eq!(listener_target(&f.table), "blue-b");
    }

    #[tokio::test]
    async fn shift_starts_from_the_pointer_current_at_lock_time() {
        let f = fixture();
        let ctrl = controller(&f, 1000);
        let stale = f.store.get_deployment_group("production").unwrap().unwrap();

        let first = ctrl
            .execute("production", &descriptors("abc1234"), no_abort())
            .await
            .unwrap();

        let group = ctrl.acquire(&stale, "late-shift").unwrap();
        assert_eq!(group.live_target().as_str(), "blue-b");
        assert_eq!(group.shadow_target().as_str(), "blue-a");
        assert_eq!(group.live_task_set.as_deref(), Some(first.task_set.as_str()));
        ctrl.release(group.environment, "late-shift");
        assert!(f.store.shift_lock(EnvironmentName::Blue).unwrap().is_none());
    }

    #[tokio::test]
    async fn acquire_reports_a_held_lock_as_conflict() {
        let f = fixture();
        let ctrl = controller(&f, 1000);
        let group = f.store.get_deployment_group("production").unwrap().unwrap();
        f.store.try_lock_shift(EnvironmentName::Blue, "other", 1).unwrap();

        let err = ctrl.acquire(&group, "mine").unwrap_err();
        assert!(matches!(err, ReleaseError::ConcurrencyConflict(_)));
        assert_eq!(f.store.shift_lock(EnvironmentName::Blue).unwrap().unwrap().holder, "other");
    }

    fn interrupted_shift(f: &Fixture, task_set: &str) -> ShiftRecord {
        f.platform
            .seed_task_set(&TargetGroupId::new("blue-b"), task_set, "registry/web:abc1234", 2);
        f.store.try_lock_shift(EnvironmentName::Blue, "dead-shift", 10).unwrap();
        let record = ShiftRecord {
            shift_id: "dead-shift".to_string(),
            group: "production".to_string(),
            environment: EnvironmentName::Blue,
            target_group: TargetGroupId::new("blue-b"),
            task_set: task_set.to_string(),
            previous_target_group: TargetGroupId::new("blue-a"),
            previous_task_set: Some("web-blue-old".to_string()),
            started_at: 10,
        };
        f.store.put_shift_record(&record).unwrap();
        record
    }

    #[tokio::test]
    async fn recovery_removes_task_set_of_an_unfinished_shift() {
        let f = fixture();
        let ctrl = controller(&f, 1000);
        let record = interrupted_shift(&f, "web-abc1234-deadbeef");

        let recovered = ctrl.recover(EnvironmentName::Blue).await.unwrap();
        assert_eq!(recovered, Some(record));
        assert!(f.platform.task_sets_in(&TargetGroupId::new("blue-b")).is_empty());
        assert_eq!(f.platform.task_sets_in(&TargetGroupId::new("blue-a")), vec!["web-blue-old"]);
        assert!(f.store.shift_lock(EnvironmentName::Blue).unwrap().is_none());
        assert!(f.store.shift_record(EnvironmentName::Blue).unwrap().is_none());

        // The next shift lands in a clean shadow target group.
        let shift = ctrl
            .execute("production", &descriptors("def5678"), no_abort())
            .await
            .unwrap();
        assert_eq!(
            f.platform.task_sets_in(&TargetGroupId::new("blue-b")),
            vec![shift.task_set.clone()]
        );
        assert_eq!(
            f.platform.image_in(&TargetGroupId::new("blue-b")).as_deref(),
            Some("registry/web:def5678")
        );
    }

    #[tokio::test]
    async fn recovery_after_committed_swap_drains_previous() {
        let f = fixture();
        let ctrl = controller(&f, 1000);
        interrupted_shift(&f, "web-abc1234-deadbeef");
        f.store
            .swap_live_target(
                "production",
                &TargetGroupId::new("blue-a"),
                "web-abc1234-deadbeef",
                &ImageTag::parse("abc1234").unwrap(),
                20,
            )
            .unwrap();

        ctrl.recover(EnvironmentName::Blue).await.unwrap().unwrap();
        assert!(f.platform.task_sets_in(&TargetGroupId::new("blue-a")).is_empty());
        assert_eq!(
            f.platform.task_sets_in(&TargetGroupId::new("blue-b")),
            vec!["web-abc1234-deadbeef"]
        );
        let group = f.store.get_deployment_group("production").unwrap().unwrap();
        assert_eq!(group.live_target().as_str(), "blue-b");
        assert!(f.store.shift_lock(EnvironmentName::Blue).unwrap().is_none());
    }

    #[tokio::test]
    async fn recovery_without_a_record_does_nothing() {
        let f = fixture();
        assert!(controller(&f, 1000).recover(EnvironmentName::Blue).await.unwrap().is_none());
        assert!(f.platform.calls().is_empty());
    }
}
