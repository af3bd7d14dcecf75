//! Error taxonomy shared by every stage of registration
//!
//! [`ErrorKind`] is the stable classification that crosses crate and HTTP
//! boundaries. Each crate keeps its own error enum and maps into it.

use outbox_artifact::ArtifactError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Stable failure classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    /// Storage or allocator fault; a fresh attempt is safe
    AllocationUnavailable,
    /// The chosen source file is not a fillable template
    UnsupportedFormat,
    AgentUnavailable,
    NoEligibleCredential,
    SigningFailed,
    /// Signature does not verify against the stored bytes
    SignatureInvalid,
    /// A journal entry already holds this number
    SequenceNumberReused,
    NotFound,
    InvalidRequest,
    Cancelled,
    Internal,
}

impl ErrorKind {
    /// Whether re-entering the flow can succeed without manual action
    #[inline]
    #[must_use]
    pub const fn is_retryable(self) -> bool {
        matches!(
            self,
            Self::AllocationUnavailable
                | Self::AgentUnavailable
                | Self::NoEligibleCredential
                | Self::SigningFailed
        )
    }

    /// Faults that need manual investigation and are never retried
    #[inline]
    #[must_use]
    pub const fn is_integrity_fault(self) -> bool {
        matches!(self, Self::SignatureInvalid | Self::SequenceNumberReused)
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::AllocationUnavailable => "AllocationUnavailable",
            Self::UnsupportedFormat => "UnsupportedFormat",
            Self::AgentUnavailable => "AgentUnavailable",
            Self::NoEligibleCredential => "NoEligibleCredential",
            Self::SigningFailed => "SigningFailed",
            Self::SignatureInvalid => "SignatureInvalid",
            Self::SequenceNumberReused => "SequenceNumberReused",
            Self::NotFound => "NotFound",
            Self::InvalidRequest => "InvalidRequest",
            Self::Cancelled => "Cancelled",
            Self::Internal => "Internal",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Ledger errors
#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    /// The backing store could not durably record the change
    #[error("ledger storage unavailable: {0}")]
    AllocationUnavailable(String),

    #[error("signature invalid: {0}")]
    SignatureInvalid(String),

    #[error("sequence number {year}/{numeric} is already referenced by entry {entry_id}")]
    SequenceNumberReused {
        year: i32,
        numeric: u64,
        entry_id: u64,
    },

    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// The audit chain does not verify
    #[error("ledger integrity violation at event {seq}: {reason}")]
    Integrity { seq: u64, reason: String },

    #[error(transparent)]
    Artifact(#[from] ArtifactError),
}

impl LedgerError {
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::AllocationUnavailable(_) => ErrorKind::AllocationUnavailable,
            Self::SignatureInvalid(_) => ErrorKind::SignatureInvalid,
            Self::SequenceNumberReused { .. } => ErrorKind::SequenceNumberReused,
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::InvalidRequest(_) => ErrorKind::InvalidRequest,
            Self::Integrity { .. } => ErrorKind::Internal,
            Self::Artifact(e) => artifact_kind(e),
        }
    }

    #[inline]
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Artifact(e) => e.is_retryable(),
            other => other.kind().is_retryable(),
        }
    }

    #[inline]
    #[must_use]
    pub fn is_integrity_fault(&self) -> bool {
        self.kind().is_integrity_fault()
    }
}

/// Classify artifact-layer failures
#[must_use]
pub fn artifact_kind(error: &ArtifactError) -> ErrorKind {
    match error {
        ArtifactError::UnsupportedFormat { .. } => ErrorKind::UnsupportedFormat,
        ArtifactError::NotFound(_) => ErrorKind::NotFound,
        ArtifactError::InvalidPath(_) => ErrorKind::InvalidRequest,
        ArtifactError::ContentMismatch(_) => ErrorKind::SignatureInvalid,
        _ => ErrorKind::Internal,
    }
}
