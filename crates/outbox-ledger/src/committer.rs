//! Ledger Committer
//!
//! Turns an accepted signature into exactly one journal entry. Commits for
//! the same artifact are serialized; a repeat submission gets the entry the
//! first one created.
//!
//! # Commit order
//!
//! 1. artifact already referenced → return that entry
//! 2. submitted number must be the one bound at preparation
//! 3. stored bytes must still match the recorded hash, and the signature must
//!    verify over them (`SignatureInvalid` otherwise)
//! 4. number must be unreferenced (`SequenceNumberReused` otherwise)
//! 5. files are placed in the entry folder, then the entry is persisted; if
//!    persisting fails the folder is removed again
//!
//! Reservations whose signature never arrives are released by
//! [`LedgerCommitter::sweep_abandoned`].

use crate::audit::AuditAction;
use crate::error::LedgerError;
use crate::journal::{ArtifactRef, EntryEdit, EntryId, JournalEntry, JournalFields};
use crate::ledger::Ledger;
use crate::sequence::SequenceNumber;
use crate::signature::{SignatureBlob, SignatureVerifier, Thumbprint};
use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use outbox_artifact::{
    sanitize_segment, ArtifactError, ArtifactId, ArtifactStore, ContentHash, StoredFile,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Everything the signing side delivers at the commit point
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitRequest {
    pub artifact_id: ArtifactId,
    pub signature: SignatureBlob,
    pub credential_thumbprint: Thumbprint,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signer_name: Option<String>,
    pub sequence_number: SequenceNumber,
    pub journal_fields: JournalFields,
}

/// Written beside the artifact in the entry folder
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignatureManifest {
    pub artifact_id: ArtifactId,
    pub sequence_number: SequenceNumber,
    pub file_name: String,
    pub content_hash: ContentHash,
    pub credential_thumbprint: Thumbprint,
    pub signer_name: Option<String>,
    pub signed_at: DateTime<Utc>,
}

pub const MANIFEST_FILE: &str = "signature.json";

/// Relative folder of an entry
#[must_use]
pub fn entry_folder(number: &SequenceNumber) -> String {
    format!(
        "journal/{}/{:05}_{}",
        number.year,
        number.numeric,
        sanitize_segment(&number.formatted)
    )
}

/// Outcome of [`LedgerCommitter::sweep_abandoned`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    /// Reservations dropped; their numbers stay allocated as gaps
    pub reservations_released: usize,
    pub staged_discarded: usize,
}

pub struct LedgerCommitter {
    ledger: Arc<Ledger>,
    store: Arc<dyn ArtifactStore>,
    verifier: Arc<dyn SignatureVerifier>,
    in_flight: DashMap<ArtifactId, Arc<tokio::sync::Mutex<()>>>,
}

impl LedgerCommitter {
    pub fn new(
        ledger: Arc<Ledger>,
        store: Arc<dyn ArtifactStore>,
        verifier: Arc<dyn SignatureVerifier>,
    ) -> Self {
        Self {
            ledger,
            store,
            verifier,
            in_flight: DashMap::new(),
        }
    }

    fn artifact_lock(&self, id: ArtifactId) -> Arc<tokio::sync::Mutex<()>> {
        self.in_flight.entry(id).or_default().clone()
    }

    /// Drop the lock entry once nobody else holds or waits on it
    fn release_lock(&self, id: ArtifactId) {
        self.in_flight
            .remove_if(&id, |_, lock| Arc::strong_count(lock) == 1);
    }

    /// Artifacts with a commit currently holding or waiting on their lock
    #[must_use]
    pub fn in_flight_count(&self) -> usize {
        self.in_flight.len()
    }

    /// Commit a signed artifact
    ///
    /// # Errors
    /// `NotFound`, `InvalidRequest`, `SignatureInvalid`,
    /// `SequenceNumberReused` or `AllocationUnavailable`; nothing is
    /// committed in any of these cases.
    pub async fn commit(&self, request: CommitRequest) -> Result<JournalEntry, LedgerError> {
        let id = request.artifact_id;
        let lock = self.artifact_lock(id);
        let result = {
            let _guard = lock.lock().await;
            self.commit_locked(request).await
        };
        drop(lock);
        self.release_lock(id);
        result
    }

    async fn commit_locked(&self, request: CommitRequest) -> Result<JournalEntry, LedgerError> {
        let id = request.artifact_id;
        if let Some(existing) = self.ledger.read(|s| s.entry_for_artifact(id).cloned()) {
            info!(artifact_id = %id, entry_id = %existing.id, "artifact already committed, returning existing entry");
            return Ok(existing);
        }

        let reservation = self.ledger.read(|s| s.reservations.get(&id).cloned());
        let Some(reservation) = reservation else {
            return Err(match self.store.describe(id).await {
                Err(ArtifactError::NotFound(_)) => {
                    LedgerError::NotFound(format!("artifact {id}"))
                }
                Err(e) => e.into(),
                Ok(_) => LedgerError::InvalidRequest(format!(
                    "artifact {id} has no allocated sequence number"
                )),
            });
        };
        if !reservation
            .sequence_number
            .same_allocation(&request.sequence_number)
        {
            return Err(LedgerError::InvalidRequest(format!(
                "sequence number {}/{} was not allocated for artifact {id}",
                request.sequence_number.year, request.sequence_number.numeric
            )));
        }

        let artifact = self.store.describe(id).await.map_err(not_found)?;
        let bytes = self.store.read(id).await.map_err(not_found)?;
        if !artifact.matches(&bytes) {
            error!(artifact_id = %id, "stored artifact bytes changed since preparation");
            return Err(LedgerError::SignatureInvalid(
                "stored artifact no longer matches its recorded hash".into(),
            ));
        }

        let signer = self
            .verifier
            .verify(&bytes, &request.signature, &request.credential_thumbprint)
            .await
            .map_err(|e| {
                warn!(artifact_id = %id, thumbprint = %request.credential_thumbprint, error = %e, "signature rejected");
                LedgerError::SignatureInvalid(e.to_string())
            })?;

        let number = reservation.sequence_number;
        if let Some(holder) = self
            .ledger
            .read(|s| s.entry_for_sequence(number.year, number.numeric).map(|e| e.id))
        {
            error!(year = number.year, numeric = number.numeric, entry_id = %holder, "sequence number already referenced");
            return Err(LedgerError::SequenceNumberReused {
                year: number.year,
                numeric: number.numeric,
                entry_id: holder.0,
            });
        }

        let signer_name = request.signer_name.clone().or(signer.common_name);
        let folder = entry_folder(&number);
        let stem = sanitize_segment(&number.formatted);
        let file_name = match artifact.extension() {
            Some(ext) => format!("{stem}.{ext}"),
            None => stem,
        };
        let signed_at = Utc::now();
        let manifest = SignatureManifest {
            artifact_id: id,
            sequence_number: number.clone(),
            file_name: file_name.clone(),
            content_hash: artifact.content_hash,
            credential_thumbprint: request.credential_thumbprint.clone(),
            signer_name: signer_name.clone(),
            signed_at,
        };
        let files = vec![
            StoredFile::new(format!("{file_name}.sig"), request.signature.as_bytes().to_vec()),
            StoredFile::new(MANIFEST_FILE, serde_json::to_vec_pretty(&manifest).map_err(ArtifactError::from)?),
            StoredFile::new(file_name.clone(), bytes),
        ];
        let folder = self.store.place(&folder, files).await?;

        let fields = request.journal_fields;
        let template = JournalEntry {
            id: EntryId(0),
            sequence_number: number.clone(),
            outgoing_date: fields.outgoing_date,
            to_whom: fields.to_whom,
            executor: fields.executor,
            folder_path: folder.clone(),
            storage_folder: folder.clone(),
            artifact_ref: ArtifactRef {
                artifact_id: id,
                file_name,
                content_hash: artifact.content_hash,
                credential_thumbprint: request.credential_thumbprint,
                signer_name,
            },
            committed_revision: 0,
            created_at: signed_at,
            updated_at: None,
        };
        let result = self
            .ledger
            .transact_async(move |s| {
                if let Some(holder) = s.entry_for_sequence(number.year, number.numeric) {
                    return Err(LedgerError::SequenceNumberReused {
                        year: number.year,
                        numeric: number.numeric,
                        entry_id: holder.id.0,
                    });
                }
                let committed_revision = s.revision + 1;
                let entry_id = s.insert_entry(|entry_id| JournalEntry {
                    id: entry_id,
                    committed_revision,
                    ..template
                });
                s.reservations.remove(&id);
                s.audit.append(
                    AuditAction::Commit,
                    entry_id,
                    format!("{}/{} {} artifact={id}", number.year, number.numeric, number.formatted),
                    signed_at,
                );
                Ok(s.entries[&entry_id].clone())
            })
            .await;

        let entry = match result {
            Ok(entry) => entry,
            Err(e) => {
                warn!(artifact_id = %id, folder = %folder, error = %e, "commit failed, removing placed folder");
                if let Err(cleanup) = self.store.remove_folder(&folder).await {
                    warn!(folder = %folder, error = %cleanup, "could not remove folder of failed commit");
                }
                return Err(e);
            }
        };

        if let Err(e) = self.store.discard_staged(id).await {
            warn!(artifact_id = %id, error = %e, "staged copy not discarded");
        }
        info!(
            entry_id = %entry.id,
            artifact_id = %id,
            number = %entry.sequence_number,
            thumbprint = %entry.artifact_ref.credential_thumbprint,
            "journal entry committed"
        );
        Ok(entry)
    }

    /// Change editable fields of an entry
    ///
    /// # Errors
    /// `NotFound` for unknown ids, `InvalidRequest` for rejected edits.
    pub async fn edit(&self, id: EntryId, edit: &EntryEdit) -> Result<JournalEntry, LedgerError> {
        let edit = edit.clone();
        let entry = self
            .ledger
            .transact_async(move |s| {
                let entry = s
                    .entries
                    .get_mut(&id)
                    .ok_or_else(|| LedgerError::NotFound(format!("journal entry {id}")))?;
                let changed = edit.apply(entry)?;
                let now = Utc::now();
                entry.updated_at = Some(now);
                let updated = entry.clone();
                s.audit
                    .append(AuditAction::Edit, id, changed.join(","), now);
                Ok(updated)
            })
            .await?;
        info!(entry_id = %id, number = %entry.sequence_number, "journal entry edited");
        Ok(entry)
    }

    /// Remove an entry and the folder its files were placed in
    ///
    /// The entry is removed first; a folder that cannot be removed is logged
    /// and left behind. An edited `folder_path` is never deleted.
    ///
    /// # Errors
    /// `NotFound` for unknown ids.
    pub async fn delete(&self, id: EntryId) -> Result<JournalEntry, LedgerError> {
        let removed = self
            .ledger
            .transact_async(move |s| {
                let removed = s
                    .remove_entry(id)
                    .ok_or_else(|| LedgerError::NotFound(format!("journal entry {id}")))?;
                s.audit.append(
                    AuditAction::Delete,
                    id,
                    format!(
                        "{}/{} {}",
                        removed.sequence_number.year,
                        removed.sequence_number.numeric,
                        removed.sequence_number.formatted
                    ),
                    Utc::now(),
                );
                Ok(removed)
            })
            .await?;

        if let Err(e) = self.store.remove_folder(&removed.storage_folder).await {
            warn!(entry_id = %id, folder = %removed.storage_folder, error = %e, "entry deleted but folder not removed");
        }
        info!(entry_id = %id, number = %removed.sequence_number, "journal entry deleted");
        Ok(removed)
    }

    /// Release reservations and staged copies nobody came back for
    ///
    /// A reservation older than `older_than` is dropped and its staged bytes
    /// discarded; the number itself stays allocated and becomes a gap. Staged
    /// artifacts without any reservation are discarded once equally old.
    /// Artifacts with a commit in progress are skipped.
    ///
    /// # Errors
    /// `AllocationUnavailable` when the ledger cannot persist the release,
    /// or a storage error when the staging area cannot be listed.
    pub async fn sweep_abandoned(&self, older_than: Duration) -> Result<SweepReport, LedgerError> {
        let cutoff = Utc::now() - older_than;
        let stale_reserved: Vec<ArtifactId> = self.ledger.read(|s| {
            s.reservations
                .iter()
                .filter(|(_, r)| r.reserved_at < cutoff)
                .map(|(id, _)| *id)
                .collect()
        });
        let orphans: Vec<ArtifactId> = {
            let staged = self.store.staged().await?;
            self.ledger.read(|s| {
                staged
                    .iter()
                    .filter(|a| a.created_at < cutoff && !s.reservations.contains_key(&a.artifact_id))
                    .map(|a| a.artifact_id)
                    .collect()
            })
        };

        let mut locks = Vec::new();
        for id in stale_reserved.iter().chain(&orphans).copied() {
            let lock = self.artifact_lock(id);
            if let Ok(guard) = lock.clone().try_lock_owned() {
                locks.push((id, lock, guard));
            } else {
                debug!(artifact_id = %id, "commit in progress, not swept");
            }
        }

        let released: Vec<ArtifactId> = locks
            .iter()
            .map(|(id, ..)| *id)
            .filter(|id| stale_reserved.contains(id))
            .collect();
        let mut report = SweepReport::default();
        if !released.is_empty() {
            let to_release = released.clone();
            report.reservations_released = self
                .ledger
                .transact_async(move |s| {
                    Ok(to_release
                        .iter()
                        .filter(|id| s.reservations.remove(id).is_some())
                        .count())
                })
                .await?;
        }

        for (id, ..) in &locks {
            match self.store.discard_staged(*id).await {
                Ok(()) => report.staged_discarded += 1,
                Err(e) => warn!(artifact_id = %id, error = %e, "abandoned staged copy not discarded"),
            }
        }
        for (id, lock, guard) in locks {
            drop(guard);
            drop(lock);
            self.release_lock(id);
        }

        if report != SweepReport::default() {
            info!(
                reservations = report.reservations_released,
                staged = report.staged_discarded,
                "abandoned registrations swept"
            );
        }
        Ok(report)
    }

    #[must_use]
    pub fn entry(&self, id: EntryId) -> Option<JournalEntry> {
        self.ledger.read(|s| s.entries.get(&id).cloned())
    }
}

fn not_found(e: ArtifactError) -> LedgerError {
    match e {
        ArtifactError::NotFound(id) => LedgerError::NotFound(format!("artifact {id}")),
        other => other.into(),
    }
}
