//! Contracts with the systems a pipeline drives but does not own.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use tandem_core::{ArtifactRef, ImageTag, ReleaseResult};
use tandem_state::ArtifactRecord;

/// A checked-out revision of the source repository.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceSnapshot {
    /// Full revision identifier that was fetched.
    pub revision: String,
}

#[async_trait]
pub trait SourceRepository: Send + Sync {
    /// Fetch an exact revision.
    async fn fetch_revision(&self, revision: &str) -> ReleaseResult<SourceSnapshot>;

    /// Fetch the current head of `branch`.
    async fn fetch_branch(&self, branch: &str) -> ReleaseResult<SourceSnapshot>;
}

/// What a successful build reports back.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildOutput {
    pub tag: ImageTag,
    /// Content digest of the pushed image, when the builder reported one.
    pub digest: Option<String>,
}

/// Builds an image for a revision and pushes it under `target`.
///
/// On success the image is present in the artifact store under the
/// returned tag.
#[async_trait]
pub trait BuildCollaborator: Send + Sync {
    async fn build(&self, revision: &str, target: &ArtifactRef) -> ReleaseResult<BuildOutput>;
}

/// Images known to exist, keyed by tag.
#[async_trait]
pub trait ArtifactStore: Send + Sync {
    /// Record that an image was pushed.
    async fn push(&self, record: ArtifactRecord) -> ReleaseResult<()>;

    /// Fetch the image pushed under `tag`. A tag never pushed is
    /// `ArtifactNotFound`.
    async fn pull(&self, tag: &ImageTag) -> ReleaseResult<ArtifactRecord>;

    async fn contains(&self, tag: &ImageTag) -> ReleaseResult<bool>;
}
