//! Service errors and their HTTP rendering

use crate::board::BoardError;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use outbox_artifact::ArtifactError;
use outbox_ledger::{artifact_kind, ErrorKind, LedgerError};
use serde::{Deserialize, Serialize};
use tracing::{error, warn};

#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error(transparent)]
    Ledger(#[from] LedgerError),

    #[error(transparent)]
    Artifact(#[from] ArtifactError),

    #[error(transparent)]
    Board(#[from] BoardError),

    #[error("{0}")]
    InvalidRequest(String),

    #[error("missing or unknown bearer token")]
    Unauthorized,
}

impl ServiceError {
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Ledger(e) => e.kind(),
            Self::Artifact(e) => artifact_kind(e),
            Self::Board(BoardError::CardNotFound(_) | BoardError::FileNotFound { .. }) => ErrorKind::NotFound,
            Self::Board(BoardError::Unavailable(_)) => ErrorKind::Internal,
            Self::InvalidRequest(_) | Self::Unauthorized => ErrorKind::InvalidRequest,
        }
    }

    #[must_use]
    pub fn status(&self) -> StatusCode {
        if matches!(self, Self::Unauthorized) {
            return StatusCode::UNAUTHORIZED;
        }
        status_for(self.kind())
    }
}

/// One status per kind
#[must_use]
pub fn status_for(kind: ErrorKind) -> StatusCode {
    match kind {
        ErrorKind::AllocationUnavailable | ErrorKind::AgentUnavailable => StatusCode::SERVICE_UNAVAILABLE,
        ErrorKind::UnsupportedFormat => StatusCode::UNPROCESSABLE_ENTITY,
        ErrorKind::NoEligibleCredential => StatusCode::PRECONDITION_FAILED,
        ErrorKind::SigningFailed => StatusCode::BAD_GATEWAY,
        ErrorKind::SignatureInvalid | ErrorKind::SequenceNumberReused | ErrorKind::Cancelled => {
            StatusCode::CONFLICT
        }
        ErrorKind::NotFound => StatusCode::NOT_FOUND,
        ErrorKind::InvalidRequest => StatusCode::BAD_REQUEST,
        ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorDetail {
    pub kind: ErrorKind,
    pub message: String,
    pub retryable: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub success: bool,
    pub error: ErrorDetail,
}

impl ErrorBody {
    #[must_use]
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            success: false,
            error: ErrorDetail {
                kind,
                message: message.into(),
                retryable: kind.is_retryable(),
            },
        }
    }
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        let kind = self.kind();
        let status = self.status();
        if kind.is_integrity_fault() {
            error!(kind = %kind, error = %self, "integrity fault");
        } else if status.is_server_error() {
            warn!(kind = %kind, error = %self, "request failed");
        }
        (status, Json(ErrorBody::new(kind, self.to_string()))).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use outbox_artifact::CardId;

    #[test]
    fn statuses_follow_kinds() {
        assert_eq!(status_for(ErrorKind::AllocationUnavailable), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(status_for(ErrorKind::UnsupportedFormat), StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(status_for(ErrorKind::NoEligibleCredential), StatusCode::PRECONDITION_FAILED);
        assert_eq!(status_for(ErrorKind::SigningFailed), StatusCode::BAD_GATEWAY);
        assert_eq!(status_for(ErrorKind::SequenceNumberReused), StatusCode::CONFLICT);
        assert_eq!(ServiceError::Unauthorized.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(
            ServiceError::Board(BoardError::CardNotFound(CardId(3))).status(),
            StatusCode::NOT_FOUND
        );
    }

    #[test]
    fn body_carries_kind_and_retryability() {
        let body = ErrorBody::new(ErrorKind::AllocationUnavailable, "disk full");
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["success"], false);
        assert_eq!(json["error"]["kind"], "AllocationUnavailable");
        assert_eq!(json["error"]["retryable"], true);
    }
}
