//! Pipeline identities and the forward-only run record.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{ReleaseError, ReleaseResult};
use crate::types::{ArtifactRef, EnvironmentName};

/// The two independently triggered pipelines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PipelineKind {
    Staging,
    Production,
}

impl PipelineKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            PipelineKind::Staging => "staging",
            PipelineKind::Production => "production",
        }
    }

    /// The environment this pipeline deploys to. The two pipelines never
    /// share a target environment.
    pub fn environment(&self) -> EnvironmentName {
        match self {
            PipelineKind::Staging => EnvironmentName::Green,
            PipelineKind::Production => EnvironmentName::Blue,
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "staging" => Some(PipelineKind::Staging),
            "production" => Some(PipelineKind::Production),
            _ => None,
        }
    }
}

impl fmt::Display for PipelineKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What started a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RunTrigger {
    /// Source-repository push on the tracked branch (staging only).
    Push { branch: String, revision: String },
    /// Explicit start request (production only).
    ExplicitStart { requested_by: Option<String> },
}

/// Stage of a pipeline run. Stages only ever move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStage {
    Pending,
    Sourcing,
    Building,
    Deploying,
    Succeeded,
    Failed,
}

impl RunStage {
    fn ordinal(self) -> u8 {
        match self {
            RunStage::Pending => 0,
            RunStage::Sourcing => 1,
            RunStage::Building => 2,
            RunStage::Deploying => 3,
            RunStage::Succeeded | RunStage::Failed => 4,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, RunStage::Succeeded | RunStage::Failed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RunStage::Pending => "pending",
            RunStage::Sourcing => "sourcing",
            RunStage::Building => "building",
            RunStage::Deploying => "deploying",
            RunStage::Succeeded => "succeeded",
            RunStage::Failed => "failed",
        }
    }
}

impl fmt::Display for RunStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why and where a run failed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunFailure {
    /// Stage that was executing when the error surfaced.
    pub stage: RunStage,
    pub error: ReleaseError,
}

/// One execution of a pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineRun {
    pub id: String,
    pub pipeline: PipelineKind,
    pub trigger: RunTrigger,
    pub stage: RunStage,
    /// Artifact resolved by the Building stage.
    pub artifact: Option<ArtifactRef>,
    pub failure: Option<RunFailure>,
    /// Stages entered, in order.
    pub history: Vec<RunStage>,
    pub created_at: u64,
    pub updated_at: u64,
}

impl PipelineRun {
    pub fn new(id: impl Into<String>, pipeline: PipelineKind, trigger: RunTrigger, now: u64) -> Self {
        Self {
            id: id.into(),
            pipeline,
            trigger,
            stage: RunStage::Pending,
            artifact: None,
            failure: None,
            history: vec![RunStage::Pending],
            created_at: now,
            updated_at: now,
        }
    }

    /// Move to the immediately following stage. Skips, backward moves,
    /// moves out of a terminal stage, and moves into `Failed` (use
    /// [`PipelineRun::fail`]) are rejected.
    pub fn advance(&mut self, next: RunStage, now: u64) -> ReleaseResult<()> {
        if self.stage.is_terminal()
            || next == RunStage::Failed
            || next.ordinal() != self.stage.ordinal() + 1
        {
            return Err(ReleaseError::InvalidTransition(format!(
                "run {}: {} -> {}",
                self.id, self.stage, next
            )));
        }
        self.stage = next;
        self.history.push(next);
        self.updated_at = now;
        Ok(())
    }

    /// Terminate the run as failed, recording the error against the
    /// stage that was executing.
    pub fn fail(&mut self, error: ReleaseError, now: u64) -> ReleaseResult<()> {
        if self.stage.is_terminal() {
            return Err(ReleaseError::InvalidTransition(format!(
                "run {}: {} -> failed",
                self.id, self.stage
            )));
        }
        self.failure = Some(RunFailure {
            stage: self.stage,
            error,
        });
        self.stage = RunStage::Failed;
        self.history.push(RunStage::Failed);
        self.updated_at = now;
        Ok(())
    }

    pub fn is_terminal(&self) -> bool {
        self.stage.is_terminal()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run() -> PipelineRun {
        PipelineRun::new(
            "run-1",
            PipelineKind::Staging,
            RunTrigger::Push {
                branch: "main".to_string(),
                revision: "abc1234d".to_string(),
            },
            1000,
        )
    }

    #[test]
    fn stages_advance_in_order() {
        let mut run = run();
        run.advance(RunStage::Sourcing, 1001).unwrap();
        run.advance(RunStage::Building, 1002).unwrap();
        run.advance(RunStage::Deploying, 1003).unwrap();
        run.advance(RunStage::Succeeded, 1004).unwrap();
        assert!(run.is_terminal());
        assert_eq!(run.updated_at, 1004);
        assert_eq!(
            run.history,
            vec![
                RunStage::Pending,
                RunStage::Sourcing,
                RunStage::Building,
                RunStage::Deploying,
                RunStage::Succeeded
            ]
        );
    }

    #[test]
    fn backward_transition_is_rejected() {
        let mut run = run();
        run.advance(RunStage::Sourcing, 1001).unwrap();
        run.advance(RunStage::Building, 1002).unwrap();
        let err = run.advance(RunStage::Sourcing, 1003).unwrap_err();
        assert!(matches!(err, ReleaseError::InvalidTransition(_)));
        assert_eq!(run.stage, RunStage::Building);
    }

    #[test]
    fn skipping_a_stage_is_rejected() {
        let mut run = run();
        assert!(run.advance(RunStage::Deploying, 1001).is_err());
        assert_eq!(run.stage, RunStage::Pending);
    }

    #[test]
    fn terminal_run_cannot_move() {
        let mut run = run();
        run.fail(ReleaseError::Build("exit 2".into()), 1001).unwrap();
        assert!(run.advance(RunStage::Deploying, 1002).is_err());
        assert!(run.fail(ReleaseError::Aborted("again".into()), 1002).is_err());
    }

    #[test]
    fn failure_records_stage() {
        let mut run = run();
        run.advance(RunStage::Sourcing, 1001).unwrap();
        run.advance(RunStage::Building, 1002).unwrap();
        run.fail(ReleaseError::Build("compiler crashed".into()), 1003).unwrap();

        let failure = run.failure.unwrap();
        assert_eq!(failure.stage, RunStage::Building);
        assert_eq!(failure.error.kind(), "build");
        assert_eq!(run.stage, RunStage::Failed);
    }

    #[test]
    fn advance_into_failed_is_rejected() {
        let mut run = run();
        assert!(run.advance(RunStage::Failed, 1001).is_err());
    }

    #[test]
    fn pipelines_target_distinct_environments() {
        assert_eq!(PipelineKind::Staging.environment(), EnvironmentName::Green);
        assert_eq!(PipelineKind::Production.environment(), EnvironmentName::Blue);
    }
}
