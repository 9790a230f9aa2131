//! Promotion hand-off: a single named, versioned tag value.
//!
//! Promoting and starting production are separate actions. The production
//! Building stage reads the channel once, at the moment it runs.

use std::sync::Arc;

use tracing::info;

use tandem_core::{epoch_secs, ImageTag, ReleaseError, ReleaseResult};
use tandem_state::{PromotionRecord, StateStore};

use crate::collaborators::ArtifactStore;

/// Get/put access to the promoted tag, with overwrite semantics.
pub trait PromotionChannel: Send + Sync {
    /// `None` until the first promotion.
    fn get(&self) -> ReleaseResult<Option<PromotionRecord>>;

    fn put(&self, tag: &ImageTag, promoted_by: Option<&str>) -> ReleaseResult<PromotionRecord>;
}

/// Channel stored in the state store under a fixed name.
#[derive(Clone)]
pub struct StorePromotionChannel {
    store: StateStore,
    channel: String,
}

impl StorePromotionChannel {
    pub fn new(store: StateStore, channel: &str) -> Self {
        Self {
            store,
            channel: channel.to_string(),
        }
    }
}

impl PromotionChannel for StorePromotionChannel {
    fn get(&self) -> ReleaseResult<Option<PromotionRecord>> {
        Ok(self.store.get_promotion(&self.channel)?)
    }

    fn put(&self, tag: &ImageTag, promoted_by: Option<&str>) -> ReleaseResult<PromotionRecord> {
        Ok(self
            .store
            .put_promotion(&self.channel, tag, promoted_by, epoch_secs())?)
    }
}

/// Validates and writes promotions.
#[derive(Clone)]
pub struct Promoter {
    channel: Arc<dyn PromotionChannel>,
    artifacts: Arc<dyn ArtifactStore>,
}

impl Promoter {
    pub fn new(channel: Arc<dyn PromotionChannel>, artifacts: Arc<dyn ArtifactStore>) -> Self {
        Self { channel, artifacts }
    }

    pub fn current(&self) -> ReleaseResult<Option<PromotionRecord>> {
        self.channel.get()
    }

    /// Approve `tag` for production. The tag must name an image that was
    /// actually built and pushed.
    pub async fn promote(&self, tag: &str, promoted_by: Option<&str>) -> ReleaseResult<PromotionRecord> {
        let tag = ImageTag::parse(tag)?;
        if !self.artifacts.contains(&tag).await? {
            return Err(ReleaseError::ArtifactNotFound(format!(
                "tag {tag} was never built and pushed; refusing to promote it"
            )));
        }
        let record = self.channel.put(&tag, promoted_by)?;
        info!(
            tag = %record.tag,
            version = record.version,
            promoted_by = record.promoted_by.as_deref().unwrap_or("-"),
            "tag promoted"
        );
        Ok(record)
    }
}
