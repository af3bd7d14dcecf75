//! Artifact identity and metadata
//!
//! An [`Artifact`] describes one rendered document awaiting signature. It is
//! immutable once created: re-registering the same card produces a new
//! [`ArtifactId`], never a mutation of an existing one.

use crate::hash::ContentHash;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use ulid::Ulid;

/// Unique artifact identifier (ULID for sortability)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ArtifactId(Ulid);

impl ArtifactId {
    /// Generate a fresh identifier
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self(Ulid::new())
    }
}

impl Default for ArtifactId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ArtifactId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for ArtifactId {
    type Err = ulid::DecodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ulid::from_string(s).map(Self)
    }
}

/// Project-board card identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CardId(pub u64);

impl fmt::Display for CardId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One rendered document awaiting signature
///
/// # Invariants
/// - `byte_length` and `content_hash` describe the exact staged bytes
/// - never mutated after staging
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Artifact {
    pub artifact_id: ArtifactId,
    pub card_id: CardId,
    /// Template the render was produced from
    pub source_file_name: String,
    /// Name of the rendered file (extension follows the converter)
    pub file_name: String,
    pub media_type: String,
    pub byte_length: u64,
    pub content_hash: ContentHash,
    pub created_at: DateTime<Utc>,
}

impl Artifact {
    /// Describe freshly rendered bytes under a new identifier
    #[must_use]
    pub fn describe(
        card_id: CardId,
        source_file_name: impl Into<String>,
        file_name: impl Into<String>,
        media_type: impl Into<String>,
        bytes: &[u8],
    ) -> Self {
        Self {
            artifact_id: ArtifactId::new(),
            card_id,
            source_file_name: source_file_name.into(),
            file_name: file_name.into(),
            media_type: media_type.into(),
            byte_length: bytes.len() as u64,
            content_hash: ContentHash::compute(bytes),
            created_at: Utc::now(),
        }
    }

    /// Check that `bytes` are exactly the bytes this artifact was created from
    #[must_use]
    pub fn matches(&self, bytes: &[u8]) -> bool {
        bytes.len() as u64 == self.byte_length && self.content_hash.matches(bytes)
    }

    /// File extension of the rendered file, without the dot
    #[must_use]
    pub fn extension(&self) -> Option<&str> {
        self.file_name.rsplit_once('.').map(|(_, ext)| ext)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn describe_records_length_and_hash() {
        let artifact = Artifact::describe(CardId(7), "исх_a.docx", "исх_a.pdf", "application/pdf", b"pdf");
        assert_eq!(artifact.byte_length, 3);
        assert!(artifact.matches(b"pdf"));
        assert!(!artifact.matches(b"pdF"));
        assert_eq!(artifact.extension(), Some("pdf"));
    }

    #[test]
    fn each_description_gets_a_new_id() {
        let a = Artifact::describe(CardId(1), "t.docx", "t.pdf", "application/pdf", b"same");
        let b = Artifact::describe(CardId(1), "t.docx", "t.pdf", "application/pdf", b"same");
        assert_ne!(a.artifact_id, b.artifact_id);
        assert_eq!(a.content_hash, b.content_hash);
    }

    #[test]
    fn artifact_id_round_trips_through_text() {
        let id = ArtifactId::new();
        let parsed: ArtifactId = id.to_string().parse().unwrap();
        assert_eq!(parsed, id);
        assert!("not-a-ulid".parse::<ArtifactId>().is_err());
    }
}
