//! Shared setup for ledger integration tests

#![allow(dead_code)]

use chrono::{Duration, NaiveDate, Utc};
use ed25519_dalek::{Signer, SigningKey};
use outbox_artifact::{Artifact, ArtifactStore, CardId, MemoryArtifactStore};
use outbox_ledger::{
    CommitRequest, Ed25519Verifier, JournalFields, JournalQuery, Ledger, LedgerCommitter,
    MemoryBackend, NumberingRule, SequenceAllocator, SequenceNumber, SignatureBlob, Thumbprint,
};
use rand::rngs::OsRng;
use std::sync::Arc;

pub struct Harness {
    pub backend: Arc<MemoryBackend>,
    pub ledger: Arc<Ledger>,
    pub allocator: SequenceAllocator,
    pub committer: LedgerCommitter,
    pub query: JournalQuery,
    pub store: Arc<MemoryArtifactStore>,
    pub key: SigningKey,
    pub thumbprint: Thumbprint,
}

impl Harness {
    pub fn new() -> Self {
        let backend = Arc::new(MemoryBackend::new());
        let ledger = Arc::new(Ledger::open(backend.clone()).unwrap());
        let store = Arc::new(MemoryArtifactStore::new());
        let verifier = Arc::new(Ed25519Verifier::new());
        let key = SigningKey::generate(&mut OsRng);
        let thumbprint = verifier.trust(key.verifying_key(), Some("Test Signer".into()));
        Self {
            backend,
            allocator: SequenceAllocator::new(ledger.clone()),
            committer: LedgerCommitter::new(ledger.clone(), store.clone(), verifier),
            query: JournalQuery::new(ledger.clone()),
            ledger,
            store,
            key,
            thumbprint,
        }
    }

    /// Stage `bytes` as a new artifact and bind a freshly allocated number
    pub async fn prepared(&self, year: i32, bytes: &[u8]) -> (Artifact, SequenceNumber) {
        self.prepared_ago(year, bytes, Duration::zero()).await
    }

    /// Like `prepared`, with staging and reservation backdated by `age`
    pub async fn prepared_ago(&self, year: i32, bytes: &[u8], age: Duration) -> (Artifact, SequenceNumber) {
        let mut artifact = Artifact::describe(CardId(1), "исх_letter.docx", "letter.pdf", "application/pdf", bytes);
        artifact.created_at -= age;
        self.store.stage(&artifact, bytes).await.unwrap();
        let number = self.allocator.allocate(year, &NumberingRule::default()).unwrap();
        self.allocator.bind(artifact.artifact_id, &number).unwrap();
        if age > Duration::zero() {
            let id = artifact.artifact_id;
            self.ledger
                .transact(|s| {
                    if let Some(r) = s.reservations.get_mut(&id) {
                        r.reserved_at = Utc::now() - age;
                    }
                    Ok(())
                })
                .unwrap();
        }
        (artifact, number)
    }

    pub fn sign(&self, bytes: &[u8]) -> SignatureBlob {
        SignatureBlob::new(self.key.sign(bytes).to_bytes().to_vec())
    }

    pub fn request(&self, artifact: &Artifact, number: &SequenceNumber, signed: &[u8]) -> CommitRequest {
        CommitRequest {
            artifact_id: artifact.artifact_id,
            signature: self.sign(signed),
            credential_thumbprint: self.thumbprint.clone(),
            signer_name: None,
            sequence_number: number.clone(),
            journal_fields: fields(date(number.year, 3, 5)),
        }
    }

    pub fn entry_count(&self) -> usize {
        self.ledger.read(|s| s.entries.len())
    }
}

pub fn date(year: i32, month: u32, day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(year, month, day).unwrap()
}

pub fn fields(outgoing_date: NaiveDate) -> JournalFields {
    JournalFields {
        outgoing_date,
        to_whom: "Department of Roads".into(),
        executor: "Petrova A.".into(),
    }
}
