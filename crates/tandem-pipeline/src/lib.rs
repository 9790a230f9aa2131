//! tandem-pipeline: the staging and production release pipelines.
//!
//! Two independent pipeline identities share nothing in-process. They
//! coordinate only through durable state: the promotion record, the run
//! locks, and the deployment group's live pointer.
//!
//! # Components
//!
//! - **`collaborators`**: source, build, and artifact store contracts
//! - **`artifacts`**: the artifact index kept in the state store
//! - **`promotion`**: the versioned hand-off channel and the promoter
//! - **`settings`**: per-pipeline settings resolved from `tandem.toml`
//! - **`stages`**: Sourcing, Building, and Deploying for each pipeline
//! - **`coordinator`**: run lifecycle, locking, abort, and recovery
//! - **`testing`**: in-memory collaborators and a wired harness

pub mod artifacts;
pub mod collaborators;
pub mod coordinator;
pub mod promotion;
pub mod settings;
pub mod stages;
pub mod testing;

pub use artifacts::StateArtifactStore;
pub use collaborators::{ArtifactStore, BuildCollaborator, BuildOutput, SourceRepository, SourceSnapshot};
pub use coordinator::{PushOutcome, RunCoordinator};
pub use promotion::{PromotionChannel, Promoter, StorePromotionChannel};
pub use settings::PipelineSettings;
pub use stages::{Collaborators, RunExecutor};
