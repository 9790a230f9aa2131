//! Health gate: a bounded wait for a target group to become fully healthy.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use tandem_core::{ReleaseError, ReleaseResult, TargetGroupId};

use crate::checker::HealthStatus;

/// Health of one target registered in a target group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetHealth {
    /// Target identity (task ID or address).
    pub target: String,
    pub status: HealthStatus,
}

impl TargetHealth {
    pub fn new(target: impl Into<String>, status: HealthStatus) -> Self {
        Self {
            target: target.into(),
            status,
        }
    }
}

/// Reports the targets registered in a target group and their health.
#[async_trait]
pub trait TargetHealthSource: Send + Sync {
    async fn target_health(&self, target_group: &TargetGroupId) -> ReleaseResult<Vec<TargetHealth>>;

    /// Forget accumulated health state before a new wait begins.
    fn reset(&self, _target_group: &TargetGroupId) {}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GateParams {
    /// Targets that must be registered (the environment's desired count).
    pub min_healthy: u32,
    pub timeout: Duration,
    pub interval: Duration,
}

#[derive(Clone)]
pub struct HealthGate {
    source: Arc<dyn TargetHealthSource>,
}

impl HealthGate {
    pub fn new(source: Arc<dyn TargetHealthSource>) -> Self {
        Self { source }
    }

    /// Poll until every registered target is healthy and at least
    /// `min_healthy` are registered.
    ///
    /// Fails with `HealthCheckTimeout` once `params.timeout` elapses and
    /// with `Aborted` as soon as `abort` flips to true. Source errors are
    /// treated as "not healthy yet".
    pub async fn wait_healthy(
        &self,
        target_group: &TargetGroupId,
        params: &GateParams,
        abort: &mut watch::Receiver<bool>,
    ) -> ReleaseResult<Vec<TargetHealth>> {
        let required = params.min_healthy.max(1) as usize;
        let deadline = Instant::now().checked_add(params.timeout).ok_or_else(|| {
            ReleaseError::Configuration(format!("health timeout {:?} is out of range", params.timeout))
        })?;
        let mut last_seen: Vec<TargetHealth> = Vec::new();
        let mut polls = 0u32;

        self.source.reset(target_group);
        debug!(%target_group, required, timeout = ?params.timeout, "health gate waiting");

        loop {
            if *abort.borrow_and_update() {
                warn!(%target_group, "health gate aborted");
                return Err(ReleaseError::Aborted(format!(
                    "aborted while waiting for {target_group} to become healthy"
                )));
            }

            polls += 1;
            match tokio::time::timeout_at(deadline, self.source.target_health(target_group)).await {
                Ok(Ok(targets)) => {
                    if passes(&targets, required) {
                        info!(%target_group, targets = targets.len(), polls, "target group healthy");
                        return Ok(targets);
                    }
                    last_seen = targets;
                }
                Ok(Err(e)) => {
                    warn!(%target_group, error = %e, "target health query failed");
                }
                Err(_) => {}
            }

            let now = Instant::now();
            if now >= deadline {
                let healthy = last_seen
                    .iter()
                    .filter(|t| t.status == HealthStatus::Healthy)
                    .count();
                warn!(%target_group, healthy, registered = last_seen.len(), required, "health gate timed out");
                return Err(ReleaseError::HealthCheckTimeout(format!(
                    "{target_group}: {healthy}/{} registered targets healthy, {required} required, after {:?}",
                    last_seen.len(),
                    params.timeout
                )));
            }

            let nap = params.interval.min(deadline - now);
            tokio::select! {
                _ = tokio::time::sleep(nap) => {}
                changed = abort.changed() => {
                    // Sender gone: no abort can arrive any more.
                    if changed.is_err() {
                        tokio::time::sleep(nap).await;
                    }
                }
            }
        }
    }
}

fn passes(targets: &[TargetHealth], required: usize) -> bool {
    targets.len() >= required && targets.iter().all(|t| t.status == HealthStatus::Healthy)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    /// Replays a fixed sequence of reports; the last one repeats.
    struct Scripted {
        reports: Mutex<Vec<Vec<TargetHealth>>>,
    }

    impl Scripted {
        fn new(mut reports: Vec<Vec<TargetHealth>>) -> Arc<Self> {
            reports.reverse();
            Arc::new(Self {
                reports: Mutex::new(reports),
            })
        }
    }

    #[async_trait]
    impl TargetHealthSource for Scripted {
        async fn target_health(&self, _tg: &TargetGroupId) -> ReleaseResult<Vec<TargetHealth>> {
            let mut reports = self.reports.lock().unwrap();
            if reports.len() > 1 {
                Ok(reports.pop().unwrap())
            } else {
                Ok(reports.last().cloned().unwrap_or_default())
            }
        }
    }

    fn params(min: u32, timeout_ms: u64) -> GateParams {
        GateParams {
            min_healthy: min,
            timeout: Duration::from_millis(timeout_ms),
            interval: Duration::from_millis(5),
        }
    }

    fn healthy(id: &str) -> TargetHealth {
        TargetHealth::new(id, HealthStatus::Healthy)
    }

    #[tokio::test]
    async fn passes_once_all_targets_healthy() {
        let source = Scripted::new(vec![
            vec![TargetHealth::new("t1", HealthStatus::Unknown), healthy("t2")],
            vec![healthy("t1"), healthy("t2")],
        ]);
        let (_tx, mut rx) = watch::channel(false);
        let gate = HealthGate::new(source);
        let targets = gate
            .wait_healthy(&TargetGroupId::new("blue-b"), &params(2, 1000), &mut rx)
            .await
            .unwrap();
        assert_eq!(targets.len(), 2);
    }

    #[tokio::test]
    async fn too_few_registered_targets_times_out() {
        let source = Scripted::new(vec![vec![healthy("t1")]]);
        let (_tx, mut rx) = watch::channel(false);
        let err = HealthGate::new(source)
            .wait_healthy(&TargetGroupId::new("blue-b"), &params(2, 50), &mut rx)
            .await
            .unwrap_err();
        assert!(matches!(err, ReleaseError::HealthCheckTimeout(_)));
    }

    #[tokio::test]
    async fn one_unhealthy_target_blocks_the_gate() {
        let source = Scripted::new(vec![vec![
            healthy("t1"),
            healthy("t2"),
            TargetHealth::new("t3", HealthStatus::Unhealthy),
        ]]);
        let (_tx, mut rx) = watch::channel(false);
        let err = HealthGate::new(source)
            .wait_healthy(&TargetGroupId::new("blue-b"), &params(2, 50), &mut rx)
            .await
            .unwrap_err();
        assert!(matches!(err, ReleaseError::HealthCheckTimeout(_)));
    }

    #[tokio::test]
    async fn empty_target_group_never_passes() {
        let source = Scripted::new(vec![vec![]]);
        let (_tx, mut rx) = watch::channel(false);
        let err = HealthGate::new(source)
            .wait_healthy(&TargetGroupId::new("blue-b"), &params(0, 30), &mut rx)
            .await
            .unwrap_err();
        assert!(matches!(err, ReleaseError::HealthCheckTimeout(_)));
    }

    #[tokio::test]
    async fn abort_interrupts_the_wait() {
        let source = Scripted::new(vec![vec![]]);
        let (tx, mut rx) = watch::channel(false);
        let gate = HealthGate::new(source);
        let handle = tokio::spawn(async move {
            gate.wait_healthy(&TargetGroupId::new("blue-b"), &params(1, 10_000), &mut rx)
                .await
        });
        tokio::time::sleep(Duration::from_millis(20)).await;
        tx.send(true).unwrap();
        let err = handle.await.unwrap().unwrap_err();
        assert!(matches!(err, ReleaseError::Aborted(_)));
    }

    #[tokio::test]
    async fn unrepresentable_timeout_is_a_configuration_error() {
        let source = Scripted::new(vec![vec![healthy("t1")]]);
        let (_tx, mut rx) = watch::channel(false);
        let huge = GateParams {
            min_healthy: 1,
            timeout: Duration::from_secs(u64::MAX),
            interval: Duration::from_millis(5),
        };
        let err = HealthGate::new(source)
            .wait_healthy(&TargetGroupId::new("blue-b"), &huge, &mut rx)
            .await
            .unwrap_err();
        assert!(matches!(err, ReleaseError::Configuration(_)));
    }

    #[tokio::test]
    async fn dropped_abort_sender_does_not_spin() {
        let source = Scripted::new(vec![vec![], vec![healthy("t1")]]);
        let (tx, mut rx) = watch::channel(false);
        drop(tx);
        let targets = HealthGate::new(source)
            .wait_healthy(&TargetGroupId::new("blue-b"), &params(1, 1000), &mut rx)
            .await
            .unwrap();
        assert_eq!(targets, vec![healthy("t1")]);
    }
}
