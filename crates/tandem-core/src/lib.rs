//! tandem-core: shared domain model for the Tandem release orchestrator.
//!
//! Everything here is synchronous and free of I/O except for reading
//! `tandem.toml`. The other crates build on these types:
//!
//! - **`types`**: environments, target groups, artifact references
//! - **`tag`**: deterministic image tags derived from source revisions
//! - **`run`**: pipeline identities and the forward-only run record
//! - **`descriptor`**: task definition and load-balancer binding rendering
//! - **`config`**: `tandem.toml` parsing and validation
//! - **`error`**: the release error taxonomy shared by every crate

pub mod config;
pub mod descriptor;
pub mod duration;
pub mod error;
pub mod run;
pub mod tag;
pub mod types;

pub use config::{ConfigError, TandemConfig};
pub use descriptor::{DeploymentDescriptors, LoadBalancerBinding, TaskDefinition};
pub use duration::parse_duration;
pub use error::{ReleaseError, ReleaseResult};
pub use run::{PipelineKind, PipelineRun, RunFailure, RunStage, RunTrigger};
pub use tag::{ImageTag, TAG_LEN, content_digest};
pub use types::*;
