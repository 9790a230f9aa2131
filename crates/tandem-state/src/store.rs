//! StateStore: redb-backed state persistence for Tandem.
//!
//! Provides typed operations over promotion records, pipeline runs, locks,
//! deployment groups, artifacts, and environment status. All values are
//! JSON-serialized into redb's `&[u8]` value columns. The store supports
//! both on-disk and in-memory backends (the latter for testing).

use std::path::Path;
use std::sync::Arc;

use redb::{Database, ReadableDatabase, ReadableTable};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, info};

use tandem_core::{EnvironmentName, ImageTag, PipelineKind, PipelineRun, TargetGroupId};

use crate::error::{StateError, StateResult};
use crate::tables::*;
use crate::types::*;

/// Convert any `Display` error into a `StateError` variant via a closure factory.
macro_rules! map_err {
    ($variant:ident) => {
        |e| StateError::$variant(e.to_string())
    };
}

/// Thread-safe state store backed by redb.
#[derive(Clone)]
pub struct StateStore {
    db: Arc<Database>,
}

impl StateStore {
    /// Open (or create) a persistent state store at the given path.
    pub fn open(path: &Path) -> StateResult<Self> {
        let db = Database::create(path).map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!(?path, "state store opened");
        Ok(store)
    }

    /// Create an ephemeral in-memory state store (for testing).
    pub fn open_in_memory() -> StateResult<Self> {
        let backend = redb::backends::InMemoryBackend::new();
        let db = Database::builder()
            .create_with_backend(backend)
            .map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!("in-memory state store opened");
        Ok(store)
    }

    /// Create all tables if they don't exist yet.
    fn ensure_tables(&self) -> StateResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        // Opening a table in a write transaction creates it if absent.
        for table in ALL_TABLES {
            txn.open_table(table).map_err(map_err!(Table))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    // ── Generic JSON access ────────────────────────────────────────

    fn put_json<T: Serialize>(&self, table: JsonTable, key: &str, value: &T) -> StateResult<()> {
        let bytes = serde_json::to_vec(value).map_err(map_err!(Serialize))?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(table).map_err(map_err!(Table))?;
            table
                .insert(key, bytes.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    fn get_json<T: DeserializeOwned>(&self, table: JsonTable, key: &str) -> StateResult<Option<T>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(table).map_err(map_err!(Table))?;
        match table.get(key).map_err(map_err!(Read))? {
            Some(guard) => {
                let value: T =
                    serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?;
                Ok(Some(value))
            }
            None => Ok(None),
        }
    }

    fn list_json<T: DeserializeOwned>(&self, table: JsonTable) -> StateResult<Vec<T>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(table).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in table.iter().map_err(map_err!(Read))? {
            let (_, value) = entry.map_err(map_err!(Read))?;
            let item: T = serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
            results.push(item);
        }
        Ok(results)
    }

    // ── Promotion ──────────────────────────────────────────────────

    /// Read the current promotion record of a channel.
    pub fn get_promotion(&self, channel: &str) -> StateResult<Option<PromotionRecord>> {
        self.get_json(PROMOTIONS, channel)
    }

    /// Overwrite the promoted tag of a channel, bumping its version.
    ///
    /// Read-modify-write happens in one write transaction so concurrent
    /// promoters never produce duplicate versions.
    pub fn put_promotion(
        &self,
        channel: &str,
        tag: &ImageTag,
        promoted_by: Option<&str>,
        now: u64,
    ) -> StateResult<PromotionRecord> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let record;
        {
            let mut table = txn.open_table(PROMOTIONS).map_err(map_err!(Table))?;
            let previous_version = match table.get(channel).map_err(map_err!(Read))? {
                Some(guard) => {
                    let prev: PromotionRecord =
                        serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?;
                    prev.version
                }
                None => 0,
            };
            record = PromotionRecord {
                channel: channel.to_string(),
                tag: tag.clone(),
                version: previous_version + 1,
                promoted_by: promoted_by.map(str::to_string),
                updated_at: now,
            };
            let bytes = serde_json::to_vec(&record).map_err(map_err!(Serialize))?;
            table
                .insert(channel, bytes.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        info!(%channel, tag = %record.tag, version = record.version, "promotion record written");
        Ok(record)
    }

    // ── Runs ───────────────────────────────────────────────────────

    /// Insert or update a pipeline run.
    pub fn put_run(&self, run: &PipelineRun) -> StateResult<()> {
        self.put_json(RUNS, &run.id, run)?;
        debug!(run = %run.id, stage = %run.stage, "run stored");
        Ok(())
    }

    pub fn get_run(&self, id: &str) -> StateResult<Option<PipelineRun>> {
        self.get_json(RUNS, id)
    }

    /// List runs, oldest first, optionally filtered by pipeline.
    pub fn list_runs(&self, pipeline: Option<PipelineKind>) -> StateResult<Vec<PipelineRun>> {
        let mut runs: Vec<PipelineRun> = self
            .list_json(RUNS)?
            .into_iter()
            .filter(|r: &PipelineRun| pipeline.is_none_or(|p| r.pipeline == p))
            .collect();
        runs.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(runs)
    }

    // ── Locks ──────────────────────────────────────────────────────

    fn try_lock(&self, table: JsonTable, key: &str, holder: &str, now: u64) -> StateResult<LockOutcome> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let outcome;
        {
            let mut table = txn.open_table(table).map_err(map_err!(Table))?;
            let existing: Option<LockRecord> = match table.get(key).map_err(map_err!(Read))? {
                Some(guard) => Some(
                    serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?,
                ),
                None => None,
            };
            match existing {
                Some(held) => outcome = LockOutcome::Held(held),
                None => {
                    let record = LockRecord {
                        holder: holder.to_string(),
                        acquired_at: now,
                    };
                    let bytes = serde_json::to_vec(&record).map_err(map_err!(Serialize))?;
                    table
                        .insert(key, bytes.as_slice())
                        .map_err(map_err!(Write))?;
                    outcome = LockOutcome::Acquired;
                }
            }
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(outcome)
    }

    /// Remove `key` if its current value satisfies `owned`, in one write
    /// transaction. Returns true if it was removed.
    fn remove_if<T: DeserializeOwned>(
        &self,
        table: JsonTable,
        key: &str,
        owned: impl FnOnce(&T) -> bool,
    ) -> StateResult<bool> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let removed;
        {
            let mut table = txn.open_table(table).map_err(map_err!(Table))?;
            let matches = match table.get(key).map_err(map_err!(Read))? {
                Some(guard) => {
                    let current: T = serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?;
                    owned(&current)
                }
                None => false,
            };
            if matches {
                table.remove(key).map_err(map_err!(Write))?;
            }
            removed = matches;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(removed)
    }

    /// Release a lock if `holder` owns it. Returns true if it was released.
    fn unlock(&self, table: JsonTable, key: &str, holder: &str) -> StateResult<bool> {
        self.remove_if(table, key, |held: &LockRecord| held.holder == holder)
    }

    /// Claim the single in-flight slot of a pipeline for `run_id`.
    pub fn try_lock_pipeline(&self, pipeline: PipelineKind, run_id: &str, now: u64) -> StateResult<LockOutcome> {
        let outcome = self.try_lock(RUN_LOCKS, pipeline.as_str(), run_id, now)?;
        debug!(%pipeline, run = %run_id, ?outcome, "pipeline lock attempt");
        Ok(outcome)
    }

    pub fn unlock_pipeline(&self, pipeline: PipelineKind, run_id: &str) -> StateResult<bool> {
        self.unlock(RUN_LOCKS, pipeline.as_str(), run_id)
    }

    pub fn pipeline_lock(&self, pipeline: PipelineKind) -> StateResult<Option<LockRecord>> {
        self.get_json(RUN_LOCKS, pipeline.as_str())
    }

    /// Claim the single in-flight traffic shift slot of an environment.
    pub fn try_lock_shift(&self, environment: EnvironmentName, shift_id: &str, now: u64) -> StateResult<LockOutcome> {
        let outcome = self.try_lock(SHIFT_LOCKS, environment.as_str(), shift_id, now)?;
        debug!(%environment, shift = %shift_id, ?outcome, "shift lock attempt");
        Ok(outcome)
    }

    pub fn unlock_shift(&self, environment: EnvironmentName, shift_id: &str) -> StateResult<bool> {
        self.unlock(SHIFT_LOCKS, environment.as_str(), shift_id)
    }

    pub fn shift_lock(&self, environment: EnvironmentName) -> StateResult<Option<LockRecord>> {
        self.get_json(SHIFT_LOCKS, environment.as_str())
    }

    // ── Shift records ──────────────────────────────────────────────

    pub fn put_shift_record(&self, record: &ShiftRecord) -> StateResult<()> {
        self.put_json(SHIFTS, record.environment.as_str(), record)?;
        debug!(environment = %record.environment, shift = %record.shift_id, task_set = %record.task_set, "shift recorded");
        Ok(())
    }

    pub fn shift_record(&self, environment: EnvironmentName) -> StateResult<Option<ShiftRecord>> {
        self.get_json(SHIFTS, environment.as_str())
    }

    /// Drop the environment's shift record if it belongs to `shift_id`.
    pub fn clear_shift_record(&self, environment: EnvironmentName, shift_id: &str) -> StateResult<bool> {
        self.remove_if(SHIFTS, environment.as_str(), |r: &ShiftRecord| r.shift_id == shift_id)
    }

    // ── Deployment groups ──────────────────────────────────────────

    pub fn put_deployment_group(&self, group: &DeploymentGroupRecord) -> StateResult<()> {
        self.put_json(DEPLOYMENT_GROUPS, &group.name, group)
    }

    pub fn get_deployment_group(&self, name: &str) -> StateResult<Option<DeploymentGroupRecord>> {
        self.get_json(DEPLOYMENT_GROUPS, name)
    }

    pub fn list_deployment_groups(&self) -> StateResult<Vec<DeploymentGroupRecord>> {
        self.list_json(DEPLOYMENT_GROUPS)
    }

    /// Create the deployment group if absent; an existing record (and its
    /// live pointer) is kept as-is.
    pub fn bootstrap_deployment_group(&self, group: &DeploymentGroupRecord) -> StateResult<DeploymentGroupRecord> {
        if let Some(existing) = self.get_deployment_group(&group.name)? {
            return Ok(existing);
        }
        self.put_deployment_group(group)?;
        info!(group = %group.name, live = %group.live_target(), "deployment group bootstrapped");
        Ok(group.clone())
    }

    /// Flip the live pointer from `expected_live` to the other target group,
    /// recording the task set and tag now serving.
    ///
    /// Fails with `Conflict` if the group's live target is not `expected_live`.
    pub fn swap_live_target(
        &self,
        name: &str,
        expected_live: &TargetGroupId,
        task_set: &str,
        tag: &ImageTag,
        now: u64,
    ) -> StateResult<DeploymentGroupRecord> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let updated;
        {
            let mut table = txn.open_table(DEPLOYMENT_GROUPS).map_err(map_err!(Table))?;
            let mut group: DeploymentGroupRecord = match table.get(name).map_err(map_err!(Read))? {
                Some(guard) => serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?,
                None => return Err(StateError::NotFound(format!("deployment group {name}"))),
            };
            if group.live_target() != expected_live {
                return Err(StateError::Conflict(format!(
                    "deployment group {name}: live target is {}, expected {expected_live}",
                    group.live_target()
                )));
            }
            group.live = group.live.other();
            group.live_task_set = Some(task_set.to_string());
            group.live_tag = Some(tag.clone());
            group.updated_at = now;
            let bytes = serde_json::to_vec(&group).map_err(map_err!(Serialize))?;
            table
                .insert(name, bytes.as_slice())
                .map_err(map_err!(Write))?;
            updated = group;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        info!(group = %name, live = %updated.live_target(), "live target swapped");
        Ok(updated)
    }

    // ── Artifacts ──────────────────────────────────────────────────

    pub fn put_artifact(&self, artifact: &ArtifactRecord) -> StateResult<()> {
        self.put_json(ARTIFACTS, artifact.tag.as_str(), artifact)
    }

    pub fn get_artifact(&self, tag: &str) -> StateResult<Option<ArtifactRecord>> {
        self.get_json(ARTIFACTS, tag)
    }

    pub fn list_artifacts(&self) -> StateResult<Vec<ArtifactRecord>> {
        self.list_json(ARTIFACTS)
    }

    // ── Environments ───────────────────────────────────────────────

    pub fn put_environment_status(&self, status: &EnvironmentStatus) -> StateResult<()> {
        self.put_json(ENVIRONMENTS, status.environment.as_str(), status)
    }

    pub fn get_environment_status(&self, environment: EnvironmentName) -> StateResult<Option<EnvironmentStatus>> {
        self.get_json(ENVIRONMENTS, environment.as_str())
    }
}
