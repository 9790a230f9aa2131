//! HTTP-probing health source.
//!
//! Probes every address configured for a target group on each poll and
//! feeds the result into a per-address [`HealthTracker`], so the gate sees
//! thresholded health rather than single probe outcomes.

use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use tandem_core::{HealthCheckSpec, ReleaseResult, TargetGroupId};

use crate::checker::{http_probe, probe_timeout, HealthStatus, HealthTracker, ProbeResult};
use crate::gate::{TargetHealth, TargetHealthSource};

pub struct HttpProbeSource {
    /// Target group → `host:port` addresses of its registered targets.
    addresses: BTreeMap<String, Vec<String>>,
    spec: HealthCheckSpec,
    timeout: Duration,
    trackers: Mutex<HashMap<String, HealthTracker>>,
}

impl HttpProbeSource {
    pub fn new(addresses: BTreeMap<String, Vec<String>>, spec: HealthCheckSpec) -> Self {
        let timeout = probe_timeout(&spec);
        Self {
            addresses,
            spec,
            timeout,
            trackers: Mutex::new(HashMap::new()),
        }
    }

    fn record(&self, address: &str, result: ProbeResult) -> HealthStatus {
        let mut trackers = self.trackers.lock().unwrap_or_else(|p| p.into_inner());
        trackers
            .entry(address.to_string())
            .or_insert_with(|| HealthTracker::new(&self.spec))
            .record(result)
    }
}

#[async_trait]
impl TargetHealthSource for HttpProbeSource {
    async fn target_health(&self, target_group: &TargetGroupId) -> ReleaseResult<Vec<TargetHealth>> {
        let Some(addresses) = self.addresses.get(target_group.as_str()) else {
            debug!(%target_group, "no probe addresses configured");
            return Ok(Vec::new());
        };

        let mut report = Vec::with_capacity(addresses.len());
        for address in addresses {
            let result = http_probe(address, &self.spec.path, self.timeout).await;
            let status = self.record(address, result);
            debug!(%target_group, %address, ?result, ?status, "probed target");
            report.push(TargetHealth::new(address.clone(), status));
        }
        Ok(report)
    }

    fn reset(&self, target_group: &TargetGroupId) {
        if let Some(addresses) = self.addresses.get(target_group.as_str()) {
            let mut trackers = self.trackers.lock().unwrap_or_else(|p| p.into_inner());
            for address in addresses {
                trackers.remove(address);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tandem_core::Protocol;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    fn spec() -> HealthCheckSpec {
        HealthCheckSpec {
            path: "/healthz".to_string(),
            protocol: Protocol::Http,
            interval: "1s".to_string(),
            timeout: "1s".to_string(),
            healthy_threshold: 2,
            unhealthy_threshold: 2,
        }
    }

    async fn always_ok() -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        tokio::spawn(async move {
            loop {
                let Ok((mut socket, _)) = listener.accept().await else { break };
                tokio::spawn(async move {
                    let mut buf = [0u8; 1024];
                    let _ = socket.read(&mut buf).await;
                    let _ = socket
                        .write_all(b"HTTP/1.1 200 OK\r\ncontent-length: 0\r\n\r\n")
                        .await;
                });
            }
        });
        addr
    }

    #[tokio::test]
    async fn unknown_target_group_reports_nothing() {
        let source = HttpProbeSource::new(BTreeMap::new(), spec());
        let report = source.target_health(&TargetGroupId::new("blue-b")).await.unwrap();
        assert!(report.is_empty());
    }

    #[tokio::test]
    async fn healthy_after_threshold_and_reset_starts_over() {
        let addr = always_ok().await;
        let mut addresses = BTreeMap::new();
        addresses.insert("blue-b".to_string(), vec![addr]);
        let source = HttpProbeSource::new(addresses, spec());
        let tg = TargetGroupId::new("blue-b");

        let first = source.target_health(&tg).await.unwrap();
        assert_eq!(first[0].status, HealthStatus::Unknown);
        let second = source.target_health(&tg).await.unwrap();
        assert_eq!(second[0].status, HealthStatus::Healthy);

        source.reset(&tg);
        let after_reset = source.target_health(&tg).await.unwrap();
        assert_eq!(after_reset[0].status, HealthStatus::Unknown);
    }
}
