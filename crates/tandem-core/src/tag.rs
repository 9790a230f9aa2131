//! Deterministic image tags.
//!
//! A build of revision `abc1234d...` is always tagged `abc1234`, so a
//! rebuild of the same revision lands on the same tag and every tag can
//! be traced back to source history.

use std::fmt;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::{ReleaseError, ReleaseResult};

/// Number of revision characters kept in a derived tag.
pub const TAG_LEN: usize = 7;

/// Longest tag accepted by the artifact store.
const MAX_TAG_LEN: usize = 128;

/// A validated image tag.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ImageTag(String);

impl ImageTag {
    /// Derive the tag for a source revision (a commit hash).
    pub fn from_revision(revision: &str) -> ReleaseResult<Self> {
        let revision = revision.trim();
        if revision.len() < TAG_LEN {
            return Err(ReleaseError::SourceFetch(format!(
                "revision '{revision}' is shorter than {TAG_LEN} characters"
            )));
        }
        if !revision.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(ReleaseError::SourceFetch(format!(
                "revision '{revision}' is not a hex commit hash"
            )));
        }
        Ok(Self(revision[..TAG_LEN].to_ascii_lowercase()))
    }

    /// Validate an externally supplied tag (e.g. a promotion request).
    pub fn parse(tag: &str) -> ReleaseResult<Self> {
        let tag = tag.trim();
        let mut chars = tag.chars();
        let valid_first = chars
            .next()
            .is_some_and(|c| c.is_ascii_alphanumeric() || c == '_');
        let valid_rest = chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-'));
        if !valid_first || !valid_rest || tag.len() > MAX_TAG_LEN {
            return Err(ReleaseError::Configuration(format!("malformed image tag '{tag}'")));
        }
        Ok(Self(tag.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ImageTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for ImageTag {
    type Error = ReleaseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<ImageTag> for String {
    fn from(tag: ImageTag) -> Self {
        tag.0
    }
}

/// Content digest of an image manifest, `sha256:<hex>`.
pub fn content_digest(bytes: &[u8]) -> String {
    format!("sha256:{}", hex::encode(Sha256::digest(bytes)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derives_fixed_length_prefix() {
        let tag = ImageTag::from_revision("abc1234d").unwrap();
        assert_eq!(tag.as_str(), "abc1234");
    }

    #[test]
    fn tagging_same_revision_twice_is_stable() {
        let rev = "9f86d081884c7d659a2feaa0c55ad015a3bf4f1b";
        assert_eq!(
            ImageTag::from_revision(rev).unwrap(),
            ImageTag::from_revision(rev).unwrap()
        );
    }

    #[test]
    fn uppercase_revision_is_normalized() {
        let tag = ImageTag::from_revision("ABC1234DEF").unwrap();
        assert_eq!(tag.as_str(), "abc1234");
    }

    #[test]
    fn short_or_non_hex_revision_is_rejected() {
        assert!(matches!(
            ImageTag::from_revision("abc12"),
            Err(ReleaseError::SourceFetch(_))
        ));
        assert!(matches!(
            ImageTag::from_revision("main-branch"),
            Err(ReleaseError::SourceFetch(_))
        ));
    }

    #[test]
    fn parse_accepts_docker_tag_grammar() {
        assert!(ImageTag::parse("abc1234").is_ok());
        assert!(ImageTag::parse("v1.2.3-rc_1").is_ok());
        assert!(ImageTag::parse("").is_err());
        assert!(ImageTag::parse(".hidden").is_err());
        assert!(ImageTag::parse("has space").is_err());
        assert!(ImageTag::parse(&"a".repeat(129)).is_err());
    }

    #[test]
    fn deserialization_validates() {
        let ok: ImageTag = serde_json::from_str("\"abc1234\"").unwrap();
        assert_eq!(ok.as_str(), "abc1234");
        assert!(serde_json::from_str::<ImageTag>("\"bad tag\"").is_err());
    }

    #[test]
    fn digest_is_prefixed_sha256() {
        let digest = content_digest(b"manifest");
        assert!(digest.starts_with("sha256:"));
        assert_eq!(digest.len(), "sha256:".len() + 64);
    }
}
