//! Error types for artifact preparation and storage

use crate::artifact::ArtifactId;

/// Errors raised while preparing, converting or storing artifacts
#[derive(Debug, thiserror::Error)]
pub enum ArtifactError {
    /// The chosen file is not a fillable outgoing template
    #[error("unsupported format for \"{file_name}\": {reason}")]
    UnsupportedFormat { file_name: String, reason: String },

    /// Nothing is staged or placed under this identifier
    #[error("artifact not found: {0}")]
    NotFound(ArtifactId),

    /// The template could not be fetched from its source
    #[error("template source unavailable: {0}")]
    SourceUnavailable(String),

    /// Conversion to the fixed-layout format failed
    #[error("conversion failed: {0}")]
    ConversionFailed(String),

    /// Stored bytes no longer match the recorded hash
    #[error("stored content of artifact {0} does not match its recorded hash")]
    ContentMismatch(ArtifactId),

    /// Path escapes the storage root
    #[error("path outside storage root: {0}")]
    InvalidPath(String),

    #[error("storage error: {0}")]
    Storage(#[from] std::io::Error),

    #[error("package error: {0}")]
    Package(#[from] zip::result::ZipError),

    #[error("metadata error: {0}")]
    Metadata(#[from] serde_json::Error),
}

impl ArtifactError {
    /// Build an unsupported-format error
    pub fn unsupported(file_name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::UnsupportedFormat {
            file_name: file_name.into(),
            reason: reason.into(),
        }
    }

    /// Storage-side faults a caller may retry
    #[inline]
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::SourceUnavailable(_) | Self::ConversionFailed(_) | Self::Storage(_)
        )
    }
}
