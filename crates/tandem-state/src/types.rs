//! Persisted records.
//!
//! Pipeline runs themselves are `tandem_core::PipelineRun`; the records
//! here are the coordination state shared between pipelines.

use serde::{Deserialize, Serialize};
use tandem_core::{EnvironmentName, ImageTag, TargetGroupId};

/// Default name of the promotion hand-off channel.
pub const DEFAULT_PROMOTION_CHANNEL: &str = "production";

// ── Promotion ─────────────────────────────────────────────────────

/// The latest tag approved for production.
///
/// A channel has no record at bootstrap; each promotion overwrites the
/// previous value and bumps `version`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PromotionRecord {
    pub channel: String,
    pub tag: ImageTag,
    /// Starts at 1 and increments on every write.
    pub version: u64,
    pub promoted_by: Option<String>,
    pub updated_at: u64,
}

// ── Locks ─────────────────────────────────────────────────────────

/// Holder of an exclusive lock (a run ID or shift ID).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LockRecord {
    pub holder: String,
    pub acquired_at: u64,
}

/// Result of a lock attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LockOutcome {
    Acquired,
    /// Someone else holds the lock.
    Held(LockRecord),
}

// ── Deployment group ──────────────────────────────────────────────

/// Which of the two fixed target groups is currently live.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum LiveSlot {
    First,
    Second,
}

impl LiveSlot {
    pub fn other(self) -> Self {
        match self {
            LiveSlot::First => LiveSlot::Second,
            LiveSlot::Second => LiveSlot::First,
        }
    }
}

/// Binds the production environment, its two target groups, and the
/// listener under traffic-shift control.
///
/// Target-group identities never move; only `live` flips, and only
/// through [`crate::StateStore::swap_live_target`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DeploymentGroupRecord {
    pub name: String,
    pub environment: EnvironmentName,
    pub listener: String,
    pub target_groups: [TargetGroupId; 2],
    pub live: LiveSlot,
    /// Task set registered in the live target group, if any.
    pub live_task_set: Option<String>,
    /// Image tag the live task set runs.
    pub live_tag: Option<ImageTag>,
    pub updated_at: u64,
}

impl DeploymentGroupRecord {
    pub fn new(
        name: &str,
        environment: EnvironmentName,
        listener: &str,
        initial_live: TargetGroupId,
        initial_shadow: TargetGroupId,
        now: u64,
    ) -> Self {
        Self {
            name: name.to_string(),
            environment,
            listener: listener.to_string(),
            target_groups: [initial_live, initial_shadow],
            live: LiveSlot::First,
            live_task_set: None,
            live_tag: None,
            updated_at: now,
        }
    }

    pub fn live_target(&self) -> &TargetGroupId {
        self.slot(self.live)
    }

    pub fn shadow_target(&self) -> &TargetGroupId {
        self.slot(self.live.other())
    }

    fn slot(&self, slot: LiveSlot) -> &TargetGroupId {
        match slot {
            LiveSlot::First => &self.target_groups[0],
            LiveSlot::Second => &self.target_groups[1],
        }
    }
}

// ── Shifts ────────────────────────────────────────────────────────

/// Footprint of a traffic shift on the platform, written before its task
/// set is launched and cleared once the shift settles or rolls back. A
/// record that outlives its process tells recovery what to clean up.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ShiftRecord {
    pub shift_id: String,
    pub group: String,
    pub environment: EnvironmentName,
    /// Shadow target group the new task set goes into.
    pub target_group: TargetGroupId,
    pub task_set: String,
    /// Target group that was live when the shift started.
    pub previous_target_group: TargetGroupId,
    /// Task set serving from `previous_target_group`, drained on settle.
    pub previous_task_set: Option<String>,
    pub started_at: u64,
}

// ── Artifacts ─────────────────────────────────────────────────────

/// An image known to be present in the artifact store.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ArtifactRecord {
    pub repository: String,
    pub tag: ImageTag,
    /// Content digest (`sha256:...`), absent when the build did not report one.
    #[serde(default)]
    pub digest: Option<String>,
    /// Source revision the image was built from.
    pub revision: String,
    pub pushed_at: u64,
}

// ── Environments ──────────────────────────────────────────────────

/// What an environment is currently running.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EnvironmentStatus {
    pub environment: EnvironmentName,
    pub tag: Option<ImageTag>,
    pub task_set: Option<String>,
    pub updated_at: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn live_and_shadow_are_complementary() {
        let mut group = DeploymentGroupRecord::new(
            "production",
            EnvironmentName::Blue,
            "production",
            TargetGroupId::new("blue-a"),
            TargetGroupId::new("blue-b"),
            1000,
        );
        assert_eq!(group.live_target().as_str(), "blue-a");
        assert_eq!(group.shadow_target().as_str(), "blue-b");

        group.live = group.live.other();
        assert_eq!(group.live_target().as_str(), "blue-b");
        assert_eq!(group.shadow_target().as_str(), "blue-a");
        // Identities are untouched by the role swap.
        assert_eq!(group.target_groups[0].as_str(), "blue-a");
    }
}
