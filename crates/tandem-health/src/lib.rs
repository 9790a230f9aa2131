//! tandem-health: target-group health checking for Tandem.
//!
//! Provides HTTP health probes, consecutive-result tracking against the
//! environment's health-check thresholds, and the bounded health gate the
//! traffic shift controller waits on before repointing a listener.
//!
//! # Architecture
//!
//! ```text
//! HealthGate::wait_healthy(target_group)
//!   ├── TargetHealthSource::target_health() → Vec<TargetHealth>
//!   │     └── HttpProbeSource: http_probe() per address → HealthTracker
//!   ├── pass: every registered target healthy, at least min_healthy registered
//!   └── fail: HealthCheckTimeout after the deadline, Aborted on signal
//! ```

pub mod checker;
pub mod gate;
pub mod probe;

pub use checker::{http_probe, probe_timeout, HealthStatus, HealthTracker, ProbeResult};
pub use gate::{GateParams, HealthGate, TargetHealth, TargetHealthSource};
pub use probe::HttpProbeSource;
