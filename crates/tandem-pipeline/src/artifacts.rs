//! Artifact index persisted in the state store.

use async_trait::async_trait;
use tracing::debug;

use tandem_core::{ImageTag, ReleaseError, ReleaseResult};
use tandem_state::{ArtifactRecord, StateStore};

use crate::collaborators::ArtifactStore;

#[derive(Clone)]
pub struct StateArtifactStore {
    store: StateStore,
}

impl StateArtifactStore {
    pub fn new(store: StateStore) -> Self {
        Self { store }
    }
}

#[async_trait]
impl ArtifactStore for StateArtifactStore {
    async fn push(&self, record: ArtifactRecord) -> ReleaseResult<()> {
        self.store.put_artifact(&record)?;
        debug!(tag = %record.tag, digest = ?record.digest, "artifact recorded");
        Ok(())
    }

    async fn pull(&self, tag: &ImageTag) -> ReleaseResult<ArtifactRecord> {
        self.store
            .get_artifact(tag.as_str())?
            .ok_or_else(|| ReleaseError::ArtifactNotFound(format!("no image was pushed under tag {tag}")))
    }

    async fn contains(&self, tag: &ImageTag) -> ReleaseResult<bool> {
        Ok(self.store.get_artifact(tag.as_str())?.is_some())
    }
}
