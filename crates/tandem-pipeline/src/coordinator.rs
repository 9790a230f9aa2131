//! Run lifecycle: trigger handling, per-pipeline locking, abort, recovery.
//!
//! At most one run per pipeline identity is in flight. A trigger that
//! arrives while the pipeline lock is held is rejected with
//! `ConcurrencyConflict`; nothing is queued.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::{error, info, warn};
use uuid::Uuid;

use tandem_core::{epoch_secs, PipelineKind, PipelineRun, ReleaseError, ReleaseResult, RunTrigger};
use tandem_state::{LockOutcome, StateStore};

use crate::stages::RunExecutor;

/// What a source push led to.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum PushOutcome {
    Started { run: PipelineRun },
    /// The push was for a branch the staging pipeline does not track.
    Ignored { branch: String },
}

struct ActiveRun {
    abort: watch::Sender<bool>,
    done: watch::Receiver<bool>,
}

struct Inner {
    store: StateStore,
    executor: RunExecutor,
    active: Mutex<HashMap<String, ActiveRun>>,
}

#[derive(Clone)]
pub struct RunCoordinator {
    inner: Arc<Inner>,
}

impl RunCoordinator {
    pub fn new(store: StateStore, executor: RunExecutor) -> Self {
        Self {
            inner: Arc::new(Inner {
                store,
                executor,
                active: Mutex::new(HashMap::new()),
            }),
        }
    }

    fn active(&self) -> MutexGuard<'_, HashMap<String, ActiveRun>> {
        self.inner.active.lock().unwrap_or_else(|p| p.into_inner())
    }

    pub fn tracked_branch(&self) -> &str {
        &self.inner.executor.settings().tracked_branch
    }

    /// Handle a push notification from the source repository.
    ///
    /// Must be called from within a Tokio runtime; the run executes on a
    /// spawned task.
    pub fn on_push(&self, branch: &str, revision: &str) -> ReleaseResult<PushOutcome> {
        if branch != self.tracked_branch() {
            info!(branch, tracked = self.tracked_branch(), "push ignored");
            return Ok(PushOutcome::Ignored {
                branch: branch.to_string(),
            });
        }
        let run = self.start(
            PipelineKind::Staging,
            RunTrigger::Push {
                branch: branch.to_string(),
                revision: revision.to_string(),
            },
        )?;
        Ok(PushOutcome::Started { run })
    }

    /// Explicit start of the production pipeline.
    pub fn start_production(&self, requested_by: Option<&str>) -> ReleaseResult<PipelineRun> {
        self.start(
            PipelineKind::Production,
            RunTrigger::ExplicitStart {
                requested_by: requested_by.map(str::to_string),
            },
        )
    }

    fn start(&self, pipeline: PipelineKind, trigger: RunTrigger) -> ReleaseResult<PipelineRun> {
        let id = Uuid::new_v4().to_string();
        let now = epoch_secs();

        if let LockOutcome::Held(lock) = self.inner.store.try_lock_pipeline(pipeline, &id, now)? {
            warn!(%pipeline, holder = %lock.holder, "trigger rejected, pipeline busy");
            return Err(ReleaseError::ConcurrencyConflict(format!(
                "{pipeline} pipeline already has run {} in flight",
                lock.holder
            )));
        }

        let run = PipelineRun::new(id.clone(), pipeline, trigger, now);
        if let Err(e) = self.inner.store.put_run(&run) {
            if let Err(ue) = self.inner.store.unlock_pipeline(pipeline, &id) {
                error!(run = %id, error = %ue, "failed to release pipeline lock");
            }
            return Err(e.into());
        }

        let (abort_tx, abort_rx) = watch::channel(false);
        let (done_tx, done_rx) = watch::channel(false);
        self.active().insert(
            id.clone(),
            ActiveRun {
                abort: abort_tx,
                done: done_rx,
            },
        );

        let coordinator = self.clone();
        let mut task_run = run.clone();
        tokio::spawn(async move {
            coordinator.inner.executor.execute(&mut task_run, abort_rx).await;
            coordinator.release(&task_run);
            let _ = done_tx.send(true);
        });

        info!(%pipeline, run = %id, "run started");
        Ok(run)
    }

    fn release(&self, run: &PipelineRun) {
        match self.inner.store.unlock_pipeline(run.pipeline, &run.id) {
            Ok(true) => {}
            Ok(false) => warn!(run = %run.id, "pipeline lock was not held by this run"),
            Err(e) => error!(run = %run.id, error = %e, "failed to release pipeline lock"),
        }
        self.active().remove(&run.id);
    }

    pub fn get_run(&self, run_id: &str) -> ReleaseResult<Option<PipelineRun>> {
        Ok(self.inner.store.get_run(run_id)?)
    }

    pub fn list_runs(&self, pipeline: Option<PipelineKind>) -> ReleaseResult<Vec<PipelineRun>> {
        Ok(self.inner.store.list_runs(pipeline)?)
    }

    pub fn is_active(&self, run_id: &str) -> bool {
        self.active().contains_key(run_id)
    }

    /// Ask an in-flight run to stop. It fails with `Aborted` at the next
    /// stage boundary, or rolls back if a traffic shift is under way.
    ///
    /// `Ok(None)` for an unknown run; `InvalidTransition` for one that
    /// already finished.
    pub fn abort(&self, run_id: &str) -> ReleaseResult<Option<PipelineRun>> {
        let signalled = self
            .active()
            .get(run_id)
            .map(|active| active.abort.send_replace(true))
            .is_some();

        let Some(run) = self.inner.store.get_run(run_id)? else {
            return Ok(None);
        };
        if signalled {
            info!(run = %run_id, stage = %run.stage, "abort requested");
            return Ok(Some(run));
        }
        if run.is_terminal() {
            return Err(ReleaseError::InvalidTransition(format!(
                "run {run_id} already finished as {}",
                run.stage
            )));
        }
        Err(ReleaseError::State(format!(
            "run {run_id} is not executing in this process"
        )))
    }

    /// Wait until `run_id` is no longer executing, then return its record.
    pub async fn wait(&self, run_id: &str) -> ReleaseResult<Option<PipelineRun>> {
        let done = self.active().get(run_id).map(|active| active.done.clone());
        if let Some(mut done) = done {
            let _ = done.wait_for(|finished| *finished).await;
        }
        self.get_run(run_id)
    }

    /// Settle whatever a previous process left behind: runs that never
    /// reached a terminal stage are failed as aborted, every lock they
    /// held is released, and an interrupted traffic shift has its task
    /// sets cleaned up.
    pub async fn recover(&self) -> ReleaseResult<Vec<PipelineRun>> {
        let store = &self.inner.store;
        let now = epoch_secs();
        let mut recovered = Vec::new();

        for mut run in store.list_runs(None)? {
            if run.is_terminal() || self.is_active(&run.id) {
                continue;
            }
            run.fail(
                ReleaseError::Aborted("orchestrator restarted while the run was in flight".to_string()),
                now,
            )?;
            store.put_run(&run)?;
            store.unlock_pipeline(run.pipeline, &run.id)?;
            warn!(pipeline = %run.pipeline, run = %run.id, "stale run failed during recovery");
            recovered.push(run);
        }

        for pipeline in [PipelineKind::Staging, PipelineKind::Production] {
            let Some(lock) = store.pipeline_lock(pipeline)? else {
                continue;
            };
            if self.is_active(&lock.holder) {
                continue;
            }
            let finished = store.get_run(&lock.holder)?.is_none_or(|run| run.is_terminal());
            if finished {
                store.unlock_pipeline(pipeline, &lock.holder)?;
                warn!(%pipeline, holder = %lock.holder, "released orphaned pipeline lock");
            }
        }

        let production_idle = store.pipeline_lock(PipelineKind::Production)?.is_none();
        if production_idle {
            let environment = PipelineKind::Production.environment();
            if let Some(shift) = self.inner.executor.shift().recover(environment).await? {
                warn!(shift = %shift.shift_id, task_set = %shift.task_set, "recovered interrupted traffic shift");
            }
            // A lock taken without a record never launched anything.
            if let Some(lock) = store.shift_lock(environment)? {
                store.unlock_shift(environment, &lock.holder)?;
                warn!(shift = %lock.holder, "released orphaned shift lock");
            }
        }

        Ok(recovered)
    }
}
