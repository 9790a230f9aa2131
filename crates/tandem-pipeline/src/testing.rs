//! In-memory collaborators and a fully wired harness for tests.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;

use tandem_core::{
    content_digest, ArtifactRef, ComputeShape, EnvironmentName, EnvironmentSpec, HealthCheckSpec, ImageTag,
    Protocol, ReleaseError, ReleaseResult, TargetGroupId,
};
use tandem_health::HealthGate;
use tandem_routing::{IpSet, Listener, RequestInfo, RoutingTable};
use tandem_shift::testing::ScriptedPlatform;
use tandem_shift::{ShiftController, ShiftParams};
use tandem_state::{DeploymentGroupRecord, StateStore, DEFAULT_PROMOTION_CHANNEL};

use crate::artifacts::StateArtifactStore;
use crate::collaborators::{BuildCollaborator, BuildOutput, SourceRepository, SourceSnapshot};
use crate::coordinator::RunCoordinator;
use crate::promotion::{Promoter, StorePromotionChannel};
use crate::settings::PipelineSettings;
use crate::stages::{Collaborators, RunExecutor};

/// Source repository that knows every revision it is asked for.
pub struct FakeSource {
    heads: Mutex<HashMap<String, String>>,
    fail: Mutex<Option<String>>,
}

impl Default for FakeSource {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeSource {
    pub fn new() -> Self {
        Self {
            heads: Mutex::new(HashMap::new()),
            fail: Mutex::new(None),
        }
    }

    pub fn set_head(&self, branch: &str, revision: &str) {
        self.heads
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .insert(branch.to_string(), revision.to_string());
    }

    pub fn fail_with(&self, reason: &str) {
        *self.fail.lock().unwrap_or_else(|p| p.into_inner()) = Some(reason.to_string());
    }

    fn check(&self) -> ReleaseResult<()> {
        match self.fail.lock().unwrap_or_else(|p| p.into_inner()).as_ref() {
            Some(reason) => Err(ReleaseError::SourceFetch(reason.clone())),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl SourceRepository for FakeSource {
    async fn fetch_revision(&self, revision: &str) -> ReleaseResult<SourceSnapshot> {
        self.check()?;
        Ok(SourceSnapshot {
            revision: revision.to_string(),
        })
    }

    async fn fetch_branch(&self, branch: &str) -> ReleaseResult<SourceSnapshot> {
        self.check()?;
        let heads = self.heads.lock().unwrap_or_else(|p| p.into_inner());
        let revision = heads
            .get(branch)
            .ok_or_else(|| ReleaseError::SourceFetch(format!("unknown branch {branch}")))?;
        Ok(SourceSnapshot {
            revision: revision.clone(),
        })
    }
}

struct BuilderScript {
    delay: Duration,
    fail: Option<String>,
    reported_tag: Option<ImageTag>,
}

/// Build collaborator that "builds" instantly unless scripted otherwise.
pub struct FakeBuilder {
    script: Mutex<BuilderScript>,
}

impl Default for FakeBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeBuilder {
    pub fn new() -> Self {
        Self {
            script: Mutex::new(BuilderScript {
                delay: Duration::ZERO,
                fail: None,
                reported_tag: None,
            }),
        }
    }

    fn script(&self) -> MutexGuard<'_, BuilderScript> {
        self.script.lock().unwrap_or_else(|p| p.into_inner())
    }

    pub fn set_delay(&self, delay: Duration) {
        self.script().delay = delay;
    }

    pub fn fail_with(&self, reason: &str) {
        self.script().fail = Some(reason.to_string());
    }

    /// Report `tag` regardless of the revision built.
    pub fn report_tag(&self, tag: ImageTag) {
        self.script().reported_tag = Some(tag);
    }
}

#[async_trait]
impl BuildCollaborator for FakeBuilder {
    async fn build(&self, revision: &str, target: &ArtifactRef) -> ReleaseResult<BuildOutput> {
        let (delay, fail, reported) = {
            let script = self.script();
            (script.delay, script.fail.clone(), script.reported_tag.clone())
        };
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        if let Some(reason) = fail {
            return Err(ReleaseError::Build(reason));
        }
        Ok(BuildOutput {
            tag: reported.unwrap_or_else(|| target.tag.clone()),
            digest: Some(content_digest(format!("{}@{revision}", target.image()).as_bytes())),
        })
    }
}

pub const REPOSITORY: &str = "registry.example.com/shop/web";

fn environment(name: EnvironmentName, desired_count: u32) -> EnvironmentSpec {
    EnvironmentSpec {
        name,
        desired_count,
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
    }
}

/// Settings matching the harness topology: branch `main`, staging behind
/// `green-tg`, production group `production` over `blue-a`/`blue-b`.
pub fn sample_settings() -> PipelineSettings {
    PipelineSettings {
        repository: REPOSITORY.to_string(),
        tracked_branch: "main".to_string(),
        build_timeout: Duration::from_secs(1),
        staging: environment(EnvironmentName::Green, 1),
        production: environment(EnvironmentName::Blue, 2),
        deployment_group: "production".to_string(),
    }
}

/// Every component wired together over in-memory fakes.
pub struct Harness {
    pub store: StateStore,
    pub table: RoutingTable,
    pub platform: Arc<ScriptedPlatform>,
    pub source: Arc<FakeSource>,
    pub builder: Arc<FakeBuilder>,
    pub coordinator: RunCoordinator,
    pub promoter: Promoter,
}

impl Default for Harness {
    fn default() -> Self {
        Self::new()
    }
}

impl Harness {
    pub fn new() -> Self {
        Self::with_health_timeout(Duration::from_secs(2))
    }

    pub fn with_health_timeout(health_timeout: Duration) -> Self {
        let store = StateStore::open_in_memory().unwrap_or_else(|e| panic!("in-memory store: {e}"));
        let settings = sample_settings();

        let mut group = DeploymentGroupRecord::new(
            &settings.deployment_group,
            EnvironmentName::Blue,
            "production",
            TargetGroupId::new("blue-a"),
            TargetGroupId::new("blue-b"),
            0,
        );
        group.live_task_set = Some("web-blue-initial".to_string());
        store
            .bootstrap_deployment_group(&group)
            .unwrap_or_else(|e| panic!("seed deployment group: {e}"));

        let table = RoutingTable::new();
        let allow = IpSet::parse(&["1.2.3.4/32"]).unwrap_or_else(|e| panic!("allow-list: {e}"));
        for listener in [
            Listener::restricted("staging", allow, TargetGroupId::new("green-tg")),
            Listener::open("production", TargetGroupId::new("blue-a")),
        ] {
            table.install(listener.unwrap_or_else(|e| panic!("listener: {e}")));
        }

        let platform = Arc::new(ScriptedPlatform::new());
        platform.seed_task_set(
            &TargetGroupId::new("blue-a"),
            "web-blue-initial",
            &format!("{REPOSITORY}:0000000"),
            2,
        );

        let source = Arc::new(FakeSource::new());
        source.set_head("main", "abc1234def5678");
        let builder = Arc::new(FakeBuilder::new());
        let artifacts = Arc::new(StateArtifactStore::new(store.clone()));
        let promotion = Arc::new(StorePromotionChannel::new(store.clone(), DEFAULT_PROMOTION_CHANNEL));

        let shift = ShiftController::new(
            store.clone(),
            platform.clone(),
            Arc::new(table.clone()),
            HealthGate::new(platform.clone()),
            ShiftParams {
                health_timeout,
                health_interval: Duration::from_millis(10),
            },
        );
        let executor = RunExecutor::new(
            store.clone(),
            settings,
            Collaborators {
                source: source.clone(),
                builder: builder.clone(),
                artifacts: artifacts.clone(),
                platform: platform.clone(),
                promotion: promotion.clone(),
            },
            shift,
        );

        Self {
            coordinator: RunCoordinator::new(store.clone(), executor),
            promoter: Promoter::new(promotion, artifacts),
            store,
            table,
            platform,
            source,
            builder,
        }
    }

    /// Target the production listener currently forwards to.
    pub fn live_target(&self) -> String {
        self.table
            .evaluate("production", &RequestInfo::from_raw(Some("203.0.113.9"), None))
            .ok()
            .and_then(|decision| decision.action.target().map(|t| t.to_string()))
            .unwrap_or_default()
    }
}
