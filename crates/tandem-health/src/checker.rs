//! Single-target probing and threshold tracking.
//!
//! A probe answers one question about one address. [`HealthTracker`] turns
//! a series of answers into a status using the environment's
//! `healthy_threshold` and `unhealthy_threshold`.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use tandem_core::{parse_duration, HealthCheckSpec};

const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// Health of a single registered target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    /// Registered but not yet past either threshold.
    Unknown,
    Healthy,
    Unhealthy,
}

/// Outcome of one probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeResult {
    /// 2xx from the health endpoint.
    Healthy,
    /// Any other status code.
    Unhealthy,
    /// No HTTP answer at all: refused, reset, or timed out.
    Failed,
}

impl ProbeResult {
    fn passed(self) -> bool {
        matches!(self, ProbeResult::Healthy)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Streak {
    None,
    Passing(u32),
    Failing(u32),
}

/// Thresholded health of one target address.
///
/// A status only changes once a run of identical outcomes reaches its
/// threshold; a single contrary probe restarts the run but leaves the
/// status where it was.
#[derive(Debug, Clone)]
pub struct HealthTracker {
    status: HealthStatus,
    streak: Streak,
    healthy_after: u32,
    unhealthy_after: u32,
}

impl HealthTracker {
    pub fn new(spec: &HealthCheckSpec) -> Self {
        Self::with_thresholds(spec.unhealthy_threshold, spec.healthy_threshold)
    }

    /// Thresholds below one are treated as one.
    pub fn with_thresholds(unhealthy_threshold: u32, healthy_threshold: u32) -> Self {
        Self {
            status: HealthStatus::Unknown,
            streak: Streak::None,
            healthy_after: healthy_threshold.max(1),
            unhealthy_after: unhealthy_threshold.max(1),
        }
    }

    /// Fold one probe outcome in and return the resulting status.
    pub fn record(&mut self, result: ProbeResult) -> HealthStatus {
        self.streak = match (self.streak, result.passed()) {
            (Streak::Passing(n), true) => Streak::Passing(n.saturating_add(1)),
            (_, true) => Streak::Passing(1),
            (Streak::Failing(n), false) => Streak::Failing(n.saturating_add(1)),
            (_, false) => Streak::Failing(1),
        };

        let next = match self.streak {
            Streak::Passing(n) if n >= self.healthy_after => HealthStatus::Healthy,
            Streak::Failing(n) if n >= self.unhealthy_after => HealthStatus::Unhealthy,
            _ => self.status,
        };
        if next != self.status {
            match next {
                HealthStatus::Healthy => debug!(streak = ?self.streak, "target passed healthy threshold"),
                HealthStatus::Unhealthy => warn!(
                    streak = ?self.streak,
                    threshold = self.unhealthy_after,
                    "target crossed unhealthy threshold"
                ),
                HealthStatus::Unknown => {}
            }
        }
        self.status = next;
        self.status
    }

    pub fn status(&self) -> HealthStatus {
        self.status
    }

    /// Length of the current failing run, zero while passing.
    pub fn consecutive_failures(&self) -> u32 {
        match self.streak {
            Streak::Failing(n) => n,
            _ => 0,
        }
    }
}

/// Per-probe timeout from `health_check.timeout`. Unparseable values fall
/// back to five seconds.
pub fn probe_timeout(spec: &HealthCheckSpec) -> Duration {
    parse_duration(&spec.timeout).unwrap_or(DEFAULT_PROBE_TIMEOUT)
}

/// GET `path` on `address` (`host:port`) over plain HTTP/1.1.
pub async fn http_probe(address: &str, path: &str, timeout: Duration) -> ProbeResult {
    match tokio::time::timeout(timeout, fetch_status(address, path)).await {
        Ok(Ok(status)) if status.is_success() => ProbeResult::Healthy,
        Ok(Ok(status)) => {
            debug!(address, path, %status, "health endpoint answered non-2xx");
            ProbeResult::Unhealthy
        }
        Ok(Err(reason)) => {
            debug!(address, path, %reason, "health probe failed");
            ProbeResult::Failed
        }
        Err(_) => {
            debug!(address, path, ?timeout, "health probe timed out");
            ProbeResult::Failed
        }
    }
}

async fn fetch_status(address: &str, path: &str) -> Result<http::StatusCode, String> {
    let stream = tokio::net::TcpStream::connect(address)
        .await
        .map_err(|e| format!("connect: {e}"))?;
    let (mut sender, conn) = hyper::client::conn::http1::handshake(hyper_util::rt::TokioIo::new(stream))
        .await
        .map_err(|e| format!("handshake: {e}"))?;
    tokio::spawn(async move {
        let _ = conn.await;
    });

    let request = http::Request::get(format!("http://{address}{path}"))
        .header(http::header::HOST, address)
        .header(http::header::USER_AGENT, "tandem-health/0.1")
        .body(http_body_util::Empty::<bytes::Bytes>::new())
        .map_err(|e| format!("request: {e}"))?;
    let response = sender
        .send_request(request)
        .await
        .map_err(|e| format!("send: {e}"))?;
    Ok(response.status())
}
