//! Seams between the orchestrator and the server side

use async_trait::async_trait;
use outbox_artifact::{ArtifactError, ArtifactId, ArtifactStore};
use outbox_ledger::{CommitRequest, ErrorKind, JournalEntry};
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GatewayError {
    /// Nothing is known about the outcome; resubmitting the same payload is safe
    #[error("transport error: {0}")]
    Transport(String),

    /// The committer answered with a rejection
    #[error("rejected ({kind}): {reason}")]
    Rejected { kind: ErrorKind, reason: String },
}

/// Delivers a commit request to the Ledger Committer
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait LedgerGateway: Send + Sync {
    async fn submit(&self, request: &CommitRequest) -> Result<JournalEntry, GatewayError>;
}

/// Gives the orchestrator the exact bytes it is about to sign
#[async_trait]
pub trait ArtifactSource: Send + Sync {
    async fn fetch(&self, artifact_id: ArtifactId) -> Result<Vec<u8>, ArtifactError>;
}

/// Reads straight from an artifact store
#[derive(Clone)]
pub struct StoreArtifactSource {
    store: Arc<dyn ArtifactStore>,
}

impl StoreArtifactSource {
    pub fn new(store: Arc<dyn ArtifactStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl ArtifactSource for StoreArtifactSource {
    async fn fetch(&self, artifact_id: ArtifactId) -> Result<Vec<u8>, ArtifactError> {
        self.store.read(artifact_id).await
    }
}
