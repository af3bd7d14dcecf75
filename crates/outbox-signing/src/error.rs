//! Signing errors

use crate::state::SessionState;
use outbox_ledger::{ErrorKind, Thumbprint};

#[derive(Debug, thiserror::Error)]
pub enum SigningError {
    /// The agent never answered within the discovery budget
    #[error("signing agent not available after {attempts} attempts")]
    AgentUnavailable { attempts: u32 },

    /// No credential with a private key and a valid certificate
    #[error("no eligible credential: {found} found, {eligible} eligible")]
    NoEligibleCredential { found: usize, eligible: usize },

    /// Agent diagnostic, passed through verbatim
    #[error("signing failed: {0}")]
    SigningFailed(String),

    #[error("credential {0} is not among the eligible credentials")]
    UnknownCredential(Thumbprint),

    /// Artifact bytes no longer match what was prepared
    #[error("artifact content changed since preparation: {0}")]
    ArtifactMismatch(String),

    /// The ledger refused the submission; never retried
    #[error("submission rejected ({kind}): {reason}")]
    SubmissionRejected { kind: ErrorKind, reason: String },

    /// Transport kept failing; the same payload may be resubmitted
    #[error("submission failed after {attempts} attempts: {last_error}")]
    SubmissionFailed { attempts: u32, last_error: String },

    #[error("session cancelled")]
    Cancelled,

    #[error("illegal session transition {from} -> {to}")]
    IllegalTransition { from: SessionState, to: SessionState },

    #[error("artifact unavailable: {0}")]
    ArtifactUnavailable(String),
}

impl SigningError {
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::AgentUnavailable { .. } => ErrorKind::AgentUnavailable,
            Self::NoEligibleCredential { .. } => ErrorKind::NoEligibleCredential,
            Self::SigningFailed(_) => ErrorKind::SigningFailed,
            Self::UnknownCredential(_) | Self::IllegalTransition { .. } => ErrorKind::InvalidRequest,
            Self::ArtifactMismatch(_) => ErrorKind::SignatureInvalid,
            Self::SubmissionRejected { kind, .. } => *kind,
            Self::SubmissionFailed { .. } => ErrorKind::AllocationUnavailable,
            Self::Cancelled => ErrorKind::Cancelled,
            Self::ArtifactUnavailable(_) => ErrorKind::Internal,
        }
    }

    #[inline]
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        self.kind().is_retryable()
    }

    #[inline]
    #[must_use]
    pub fn is_integrity_fault(&self) -> bool {
        self.kind().is_integrity_fault()
    }

    /// Failures after which the session stays open for another credential
    #[inline]
    #[must_use]
    pub fn keeps_session_open(&self) -> bool {
        matches!(self, Self::SigningFailed(_) | Self::UnknownCredential(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classification() {
        assert!(SigningError::AgentUnavailable { attempts: 30 }.is_retryable());
        assert!(SigningError::SigningFailed("PIN".into()).keeps_session_open());
        assert!(SigningError::ArtifactMismatch("x".into()).is_integrity_fault());
        let rejected = SigningError::SubmissionRejected {
            kind: ErrorKind::SequenceNumberReused,
            reason: "dup".into(),
        };
        assert!(rejected.is_integrity_fault());
        assert!(!rejected.is_retryable());
        assert_eq!(
            SigningError::NoEligibleCredential { found: 3, eligible: 0 }.to_string(),
            "no eligible credential: 3 found, 0 eligible"
        );
    }
}
