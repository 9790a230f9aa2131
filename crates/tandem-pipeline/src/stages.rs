//! Stage logic for both pipelines.
//!
//! Staging: fetch the pushed revision, build and push its image, update
//! the staging environment in place. Production: re-fetch the tracked
//! branch, snapshot the promotion record and pull the promoted image,
//! then hand the rendered descriptors to the traffic shift controller.
//!
//! Abort is honoured at every stage boundary and while a source fetch,
//! build, or artifact pull is outstanding. An in-place staging update
//! that has started runs to completion; a production shift in flight
//! takes its own rollback path.

use std::future::Future;
use std::sync::Arc;

use tokio::sync::watch;
use tracing::{error, info, warn};

use tandem_core::{
    epoch_secs, ArtifactRef, DeploymentDescriptors, EnvironmentName, ImageTag, PipelineKind, PipelineRun,
    ReleaseError, ReleaseResult, RunStage, RunTrigger,
};
use tandem_shift::{ComputePlatform, ShiftController};
use tandem_state::{ArtifactRecord, EnvironmentStatus, StateStore};

use crate::collaborators::{ArtifactStore, BuildCollaborator, SourceRepository};
use crate::promotion::PromotionChannel;
use crate::settings::PipelineSettings;

/// Everything outside the orchestrator a run talks to.
#[derive(Clone)]
pub struct Collaborators {
    pub source: Arc<dyn SourceRepository>,
    pub builder: Arc<dyn BuildCollaborator>,
    pub artifacts: Arc<dyn ArtifactStore>,
    pub platform: Arc<dyn ComputePlatform>,
    pub promotion: Arc<dyn PromotionChannel>,
}

#[derive(Clone)]
pub struct RunExecutor {
    store: StateStore,
    settings: PipelineSettings,
    collaborators: Collaborators,
    shift: ShiftController,
}

impl RunExecutor {
    pub fn new(
        store: StateStore,
        settings: PipelineSettings,
        collaborators: Collaborators,
        shift: ShiftController,
    ) -> Self {
        Self {
            store,
            settings,
            collaborators,
            shift,
        }
    }

    pub fn settings(&self) -> &PipelineSettings {
        &self.settings
    }

    pub fn shift(&self) -> &ShiftController {
        &self.shift
    }

    /// Drive `run` to a terminal stage. Every error lands in the run's
    /// failure record; the final state is persisted.
    pub async fn execute(&self, run: &mut PipelineRun, mut abort: watch::Receiver<bool>) {
        let result = match run.pipeline {
            PipelineKind::Staging => self.staging(run, &mut abort).await,
            PipelineKind::Production => self.production(run, &mut abort).await,
        };

        match result {
            Ok(()) => info!(pipeline = %run.pipeline, run = %run.id, "run succeeded"),
            Err(e) => {
                error!(
                    pipeline = %run.pipeline,
                    run = %run.id,
                    stage = %run.stage,
                    kind = e.kind(),
                    error = %e,
                    "run failed"
                );
                if let Err(te) = run.fail(e, epoch_secs()) {
                    error!(run = %run.id, error = %te, "cannot mark run failed");
                }
            }
        }

        if let Err(e) = self.store.put_run(run) {
            error!(run = %run.id, error = %e, "failed to persist final run state");
        }
    }

    fn enter(&self, run: &mut PipelineRun, stage: RunStage, abort: &watch::Receiver<bool>) -> ReleaseResult<()> {
        if *abort.borrow() {
            return Err(ReleaseError::Aborted(format!("run {} aborted before {stage}", run.id)));
        }
        run.advance(stage, epoch_secs())?;
        self.store.put_run(run)?;
        info!(pipeline = %run.pipeline, run = %run.id, %stage, "stage entered");
        Ok(())
    }

    fn finish(&self, run: &mut PipelineRun) -> ReleaseResult<()> {
        run.advance(RunStage::Succeeded, epoch_secs())
    }

    fn record_environment(&self, environment: EnvironmentName, tag: &ImageTag, task_set: &str) -> ReleaseResult<()> {
        self.store.put_environment_status(&EnvironmentStatus {
            environment,
            tag: Some(tag.clone()),
            task_set: Some(task_set.to_string()),
            updated_at: epoch_secs(),
        })?;
        Ok(())
    }

    async fn staging(&self, run: &mut PipelineRun, abort: &mut watch::Receiver<bool>) -> ReleaseResult<()> {
        let RunTrigger::Push { revision, .. } = run.trigger.clone() else {
            return Err(ReleaseError::Configuration(
                "staging runs are started by source pushes".to_string(),
            ));
        };

        self.enter(run, RunStage::Sourcing, abort)?;
        let snapshot = until_aborted(abort, self.collaborators.source.fetch_revision(&revision)).await?;

        self.enter(run, RunStage::Building, abort)?;
        let tag = ImageTag::from_revision(&snapshot.revision)?;
        let target = ArtifactRef::new(self.settings.repository.as_str(), tag.clone());
        let build = tokio::time::timeout(
            self.settings.build_timeout,
            self.collaborators.builder.build(&snapshot.revision, &target),
        );
        let output = match until_aborted(abort, async { Ok(build.await) }).await? {
            Ok(result) => result?,
            Err(_) => {
                return Err(ReleaseError::Build(format!(
                    "build of {} exceeded {:?}",
                    snapshot.revision, self.settings.build_timeout
                )));
            }
        };
        if output.tag != tag {
            return Err(ReleaseError::Build(format!(
                "build reported tag {}, expected {tag} for revision {}",
                output.tag, snapshot.revision
            )));
        }
        self.collaborators
            .artifacts
            .push(ArtifactRecord {
                repository: self.settings.repository.clone(),
                tag: tag.clone(),
                digest: output.digest,
                revision: snapshot.revision.clone(),
                pushed_at: epoch_secs(),
            })
            .await?;
        run.artifact = Some(target.clone());

        self.enter(run, RunStage::Deploying, abort)?;
        let descriptors = DeploymentDescriptors::render(&self.settings.staging, &target, &snapshot.revision);
        let task_set = task_set_name(&descriptors, &run.id);
        let environment = run.pipeline.environment();
        self.collaborators
            .platform
            .update_in_place(environment, &task_set, &descriptors)
            .await?;
        self.record_environment(environment, &tag, &task_set)?;
        info!(run = %run.id, %tag, %task_set, "staging updated in place");

        self.finish(run)
    }

    async fn production(&self, run: &mut PipelineRun, abort: &mut watch::Receiver<bool>) -> ReleaseResult<()> {
        self.enter(run, RunStage::Sourcing, abort)?;
        let snapshot = until_aborted(
            abort,
            self.collaborators
                .source
                .fetch_branch(&self.settings.tracked_branch),
        )
        .await?;
        info!(run = %run.id, revision = %snapshot.revision, "descriptor source fetched");

        self.enter(run, RunStage::Building, abort)?;
        let promotion = self.collaborators.promotion.get()?.ok_or_else(|| {
            ReleaseError::ArtifactNotFound("no tag has been promoted to production".to_string())
        })?;
        info!(
            run = %run.id,
            tag = %promotion.tag,
            version = promotion.version,
            "promotion snapshot taken"
        );
        let image = until_aborted(abort, self.collaborators.artifacts.pull(&promotion.tag)).await?;
        let target = ArtifactRef::new(image.repository, promotion.tag.clone());
        let descriptors = DeploymentDescriptors::render(&self.settings.production, &target, &snapshot.revision);
        run.artifact = Some(target);

        self.enter(run, RunStage::Deploying, abort)?;
        let shift = match self
            .shift
            .execute(&self.settings.deployment_group, &descriptors, abort.clone())
            .await
        {
            Ok(shift) => shift,
            Err(failure) => {
                if let Some(shift) = &failure.shift {
                    warn!(
                        run = %run.id,
                        shift = %shift.id,
                        phase = shift.phase.name(),
                        live = %shift.serving_target(),
                        "traffic shift did not settle"
                    );
                }
                return Err(failure.error);
            }
        };
        self.record_environment(run.pipeline.environment(), &shift.tag, &shift.task_set)?;

        self.finish(run)
    }
}

fn task_set_name(descriptors: &DeploymentDescriptors, run_id: &str) -> String {
    let short_id = run_id.get(..8).unwrap_or(run_id);
    format!("{}-{}-{}", descriptors.task_definition.family, descriptors.tag(), short_id)
}

/// Run `fut` unless `abort` flips first.
async fn until_aborted<T>(
    abort: &mut watch::Receiver<bool>,
    fut: impl Future<Output = ReleaseResult<T>>,
) -> ReleaseResult<T> {
    if *abort.borrow_and_update() {
        return Err(ReleaseError::Aborted("run aborted".to_string()));
    }
    tokio::select! {
        res = fut => res,
        () = aborted(abort) => Err(ReleaseError::Aborted("run aborted".to_string())),
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
