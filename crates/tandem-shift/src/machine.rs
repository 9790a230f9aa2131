//! Traffic shift state machine.
//!
//! Pure bookkeeping: which phase a shift is in, which moves are legal,
//! and what happened so far. The controller drives it; nothing here
//! touches the platform or the load balancer.

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use tandem_core::{EnvironmentName, ImageTag, ReleaseError, ReleaseResult, TargetGroupId};

/// Current phase of a traffic shift.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "phase", rename_all = "snake_case")]
pub enum ShiftPhase {
    Idle,
    /// Shadow task set launching into the shadow target group.
    Provisioning,
    /// Waiting for every shadow target to report healthy.
    HealthChecking,
    /// Listener default being repointed and the live pointer flipped.
    Shifting,
    /// Shadow is live; the previous live task set has been drained.
    Settled,
    RollingBack { reason: String },
    RolledBack { reason: String },
}

impl ShiftPhase {
    pub fn name(&self) -> &'static str {
        match self {
            ShiftPhase::Idle => "idle",
            ShiftPhase::Provisioning => "provisioning",
            ShiftPhase::HealthChecking => "health_checking",
            ShiftPhase::Shifting => "shifting",
            ShiftPhase::Settled => "settled",
            ShiftPhase::RollingBack { .. } => "rolling_back",
            ShiftPhase::RolledBack { .. } => "rolled_back",
        }
    }

    /// Phases during which the environment is being changed.
    pub fn is_in_flight(&self) -> bool {
        matches!(
            self,
            ShiftPhase::Provisioning | ShiftPhase::HealthChecking | ShiftPhase::Shifting
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, ShiftPhase::Settled | ShiftPhase::RolledBack { .. })
    }
}

fn is_legal(from: &ShiftPhase, to: &ShiftPhase) -> bool {
    use ShiftPhase::*;
    match (from, to) {
        (Idle, Provisioning) => true,
        (Provisioning, HealthChecking) => true,
        (HealthChecking, Shifting) => true,
        (Shifting, Settled) => true,
        (Provisioning | HealthChecking | Shifting, RollingBack { .. }) => true,
        (RollingBack { .. }, RolledBack { .. }) => true,
        _ => false,
    }
}

/// One cutover of a deployment group from its live target group to its
/// shadow target group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrafficShift {
    pub id: String,
    pub deployment_group: String,
    pub environment: EnvironmentName,
    /// Target group serving traffic when the shift began.
    pub from: TargetGroupId,
    /// Shadow target group the new task set lands in.
    pub to: TargetGroupId,
    pub tag: ImageTag,
    /// Task set launched by this shift.
    pub task_set: String,
    pub phase: ShiftPhase,
    /// Whether the listener default currently points at `to`.
    pub listener_repointed: bool,
    pub history: Vec<ShiftPhase>,
}

impl TrafficShift {
    pub fn new(
        id: &str,
        deployment_group: &str,
        environment: EnvironmentName,
        from: TargetGroupId,
        to: TargetGroupId,
        tag: ImageTag,
        task_set: &str,
    ) -> Self {
        Self {
            id: id.to_string(),
            deployment_group: deployment_group.to_string(),
            environment,
            from,
            to,
            tag,
            task_set: task_set.to_string(),
            phase: ShiftPhase::Idle,
            listener_repointed: false,
            history: vec![ShiftPhase::Idle],
        }
    }

    /// Move to `next`, rejecting anything but the legal successors.
    pub fn transition(&mut self, next: ShiftPhase) -> ReleaseResult<()> {
        if !is_legal(&self.phase, &next) {
            return Err(ReleaseError::InvalidTransition(format!(
                "shift {}: {} -> {}",
                self.id,
                self.phase.name(),
                next.name()
            )));
        }
        debug!(shift = %self.id, from = self.phase.name(), to = next.name(), "shift transition");
        self.history.push(next.clone());
        self.phase = next;
        Ok(())
    }

    /// Enter RollingBack with the failure that caused it.
    pub fn begin_rollback(&mut self, reason: &str) -> ReleaseResult<()> {
        warn!(shift = %self.id, phase = self.phase.name(), %reason, "rolling back shift");
        self.transition(ShiftPhase::RollingBack {
            reason: reason.to_string(),
        })
    }

    /// Finish a rollback started by [`Self::begin_rollback`].
    pub fn finish_rollback(&mut self) -> ReleaseResult<()> {
        let reason = match &self.phase {
            ShiftPhase::RollingBack { reason } => reason.clone(),
            other => {
                return Err(ReleaseError::InvalidTransition(format!(
                    "shift {}: {} -> rolled_back",
                    self.id,
                    other.name()
                )));
            }
        };
        self.transition(ShiftPhase::RolledBack { reason })?;
        info!(shift = %self.id, live = %self.from, "shift rolled back");
        Ok(())
    }

    /// Target group serving traffic in the current phase.
    pub fn serving_target(&self) -> &TargetGroupId {
        if self.listener_repointed { &self.to } else { &self.from }
    }
}
