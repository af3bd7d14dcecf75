//! Ledger state and its durable backends
//!
//! The whole ledger (counters, reservations, entries, audit chain) is one
//! [`LedgerSnapshot`]. Every change runs through [`Ledger::transact`]: the
//! snapshot is cloned, the change applied to the clone, the clone persisted,
//! and only then swapped in. A failed persist leaves the live state as it was.
//!
//! Writers are serialized by their own lock; the live state is only locked
//! for the clone and the swap, so readers are never held up by a persist.
//! Async callers go through [`Ledger::transact_async`], which moves the
//! blocking persist onto tokio's blocking pool.

use crate::audit::AuditChain;
use crate::error::LedgerError;
use crate::journal::{EntryId, JournalEntry};
use crate::sequence::SequenceNumber;
use chrono::{DateTime, Utc};
use outbox_artifact::ArtifactId;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{error, warn};

/// Number bound to an artifact at preparation time
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reservation {
    pub sequence_number: SequenceNumber,
    pub reserved_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LedgerSnapshot {
    /// Bumped by every persisted change
    pub revision: u64,
    /// Last allocated number per year
    pub counters: BTreeMap<i32, u64>,
    pub reservations: BTreeMap<ArtifactId, Reservation>,
    pub entries: BTreeMap<EntryId, JournalEntry>,
    pub next_entry_id: u64,
    #[serde(default)]
    pub audit: AuditChain,

    #[serde(skip)]
    by_artifact: HashMap<ArtifactId, EntryId>,
    #[serde(skip)]
    by_sequence: HashMap<(i32, u64), EntryId>,
}

impl LedgerSnapshot {
    /// Rebuild lookup indexes after loading
    pub fn reindex(&mut self) {
        self.by_artifact.clear();
        self.by_sequence.clear();
        for (id, entry) in &self.entries {
            self.by_artifact.insert(entry.artifact_ref.artifact_id, *id);
            self.by_sequence.insert(entry.sequence_number.key(), *id);
        }
    }

    #[must_use]
    pub fn is_allocated(&self, year: i32, numeric: u64) -> bool {
        numeric > 0 && self.counters.get(&year).is_some_and(|last| numeric <= *last)
    }

    #[must_use]
    pub fn entry_for_artifact(&self, artifact_id: ArtifactId) -> Option<&JournalEntry> {
        self.by_artifact
            .get(&artifact_id)
            .and_then(|id| self.entries.get(id))
    }

    #[must_use]
    pub fn entry_for_sequence(&self, year: i32, numeric: u64) -> Option<&JournalEntry> {
        self.by_sequence
            .get(&(year, numeric))
            .and_then(|id| self.entries.get(id))
    }

    /// Insert a new entry under the next id and keep indexes in step
    pub fn insert_entry(&mut self, build: impl FnOnce(EntryId) -> JournalEntry) -> EntryId {
        self.next_entry_id += 1;
        let id = EntryId(self.next_entry_id);
        let entry = build(id);
        self.by_artifact.insert(entry.artifact_ref.artifact_id, id);
        self.by_sequence.insert(entry.sequence_number.key(), id);
        self.entries.insert(id, entry);
        id
    }

    pub fn remove_entry(&mut self, id: EntryId) -> Option<JournalEntry> {
        let entry = self.entries.remove(&id)?;
        self.by_artifact.remove(&entry.artifact_ref.artifact_id);
        self.by_sequence.remove(&entry.sequence_number.key());
        Some(entry)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("snapshot encoding error: {0}")]
    Encoding(#[from] serde_json::Error),

    #[error("backend unavailable: {0}")]
    Unavailable(String),
}

/// Durable home of the ledger snapshot
///
/// `persist` must be atomic: afterwards either the new snapshot or the
/// previous one is what `load` returns, never a mix.
pub trait LedgerBackend: Send + Sync {
    fn load(&self) -> Result<Option<LedgerSnapshot>, BackendError>;

    fn persist(&self, snapshot: &LedgerSnapshot) -> Result<(), BackendError>;
}

impl<B: LedgerBackend + ?Sized> LedgerBackend for Arc<B> {
    fn load(&self) -> Result<Option<LedgerSnapshot>, BackendError> {
        (**self).load()
    }

    fn persist(&self, snapshot: &LedgerSnapshot) -> Result<(), BackendError> {
        (**self).persist(snapshot)
    }
}

/// In-memory backend; can be switched to fail for fault tests
#[derive(Debug, Default)]
pub struct MemoryBackend {
    stored: Mutex<Option<LedgerSnapshot>>,
    failing: AtomicBool,
}

impl MemoryBackend {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Last persisted snapshot
    #[must_use]
    pub fn stored(&self) -> Option<LedgerSnapshot> {
        self.stored.lock().clone()
    }
}

impl LedgerBackend for MemoryBackend {
    fn load(&self) -> Result<Option<LedgerSnapshot>, BackendError> {
        Ok(self.stored.lock().clone())
    }

    fn persist(&self, snapshot: &LedgerSnapshot) -> Result<(), BackendError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(BackendError::Unavailable("memory backend set to fail".into()));
        }
        *self.stored.lock() = Some(snapshot.clone());
        Ok(())
    }
}

/// JSON snapshot file, replaced atomically via a sibling temp file
#[derive(Debug, Clone)]
pub struct JsonFileBackend {
    path: PathBuf,
}

impl JsonFileBackend {
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl LedgerBackend for JsonFileBackend {
    fn load(&self) -> Result<Option<LedgerSnapshot>, BackendError> {
        match std::fs::read(&self.path) {
            Ok(raw) => Ok(Some(serde_json::from_slice(&raw)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn persist(&self, snapshot: &LedgerSnapshot) -> Result<(), BackendError> {
        let dir = self
            .path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        std::fs::create_dir_all(dir)?;

        let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
        serde_json::to_writer_pretty(&mut tmp, snapshot)?;
        tmp.flush()?;
        tmp.as_file().sync_all()?;
        tmp.persist(&self.path).map_err(|e| BackendError::Io(e.error))?;
        Ok(())
    }
}

/// The live ledger
pub struct Ledger {
    backend: Box<dyn LedgerBackend>,
    writer: Mutex<()>,
    state: RwLock<LedgerSnapshot>,
}

impl Ledger {
    /// Load the ledger from its backend
    ///
    /// # Errors
    /// `AllocationUnavailable` when the backend cannot be read, `Integrity`
    /// when the stored audit chain does not verify.
    pub fn open(backend: impl LedgerBackend + 'static) -> Result<Self, LedgerError> {
        let mut snapshot = backend
            .load()
            .map_err(|e| LedgerError::AllocationUnavailable(e.to_string()))?
            .unwrap_or_default();
        snapshot.reindex();
        if let Err(e) = snapshot.audit.verify_integrity() {
            error!(error = %e, "ledger audit chain does not verify, refusing to open");
            return Err(e);
        }
        Ok(Self {
            backend: Box::new(backend),
            writer: Mutex::new(()),
            state: RwLock::new(snapshot),
        })
    }

    /// Apply a change atomically
    ///
    /// `change` runs against a private copy. The copy becomes live only after
    /// it has been persisted; any error leaves the live state untouched.
    ///
    /// # Errors
    /// The closure's error, or `AllocationUnavailable` if persisting fails.
    ///
    /// This blocks on the backend. From async code use
    /// [`transact_async`](Self::transact_async).
    pub fn transact<T>(
        &self,
        change: impl FnOnce(&mut LedgerSnapshot) -> Result<T, LedgerError>,
    ) -> Result<T, LedgerError> {
        // Only the writer-lock holder replaces `state`, so the copy stays current.
        let _writer = self.writer.lock();
        let mut draft = self.state.read().clone();
        let out = change(&mut draft)?;
        draft.revision += 1;
        if let Err(e) = self.backend.persist(&draft) {
            warn!(error = %e, revision = draft.revision, "ledger persist failed, change discarded");
            return Err(LedgerError::AllocationUnavailable(e.to_string()));
        }
        *self.state.write() = draft;
        Ok(out)
    }

    /// [`transact`](Self::transact) on the blocking pool
    ///
    /// # Errors
    /// As `transact`; a panicked or cancelled blocking task maps to
    /// `AllocationUnavailable`.
    pub async fn transact_async<T, F>(self: &Arc<Self>, change: F) -> Result<T, LedgerError>
    where
        T: Send + 'static,
        F: FnOnce(&mut LedgerSnapshot) -> Result<T, LedgerError> + Send + 'static,
    {
        let ledger = Arc::clone(self);
        tokio::task::spawn_blocking(move || ledger.transact(change))
            .await
            .map_err(|e| LedgerError::AllocationUnavailable(format!("ledger task failed: {e}")))?
    }

    /// Read from the live state
    pub fn read<T>(&self, view: impl FnOnce(&LedgerSnapshot) -> T) -> T {
        view(&self.state.read())
    }

    #[must_use]
    pub fn revision(&self) -> u64 {
        self.state.read().revision
    }

    /// Verify the audit chain of the live state
    ///
    /// # Errors
    /// `Integrity` on the first event that does not verify.
    pub fn verify_integrity(&self) -> Result<(), LedgerError> {
        self.state.read().audit.verify_integrity()
    }
}

impl std::fmt::Debug for Ledger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Ledger")
            .field("revision", &self.revision())
            .finish_non_exhaustive()
    }
}
