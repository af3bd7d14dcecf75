//! Outbox Ledger
//!
//! The durable side of outgoing registration.
//!
//! # Components
//!
//! - [`SequenceAllocator`]: gapless, year-scoped numbers with atomic persistence
//! - [`LedgerCommitter`]: signature-checked, idempotent journal commits
//! - [`JournalQuery`]: cursor-stable pagination and XLSX export
//! - [`Ledger`]: snapshot state, persisted per serialized transaction
//! - [`ErrorKind`]: the failure taxonomy shared with signing and HTTP
//!
//! # Example
//!
//! ```rust,ignore
//! let number = allocator.allocate(2024, rules.rule_for(&executor_id))?;
//! allocator.bind(artifact.artifact_id, &number)?;
//! // ... signature obtained out of band ...
//! let entry = committer.commit(request).await?;
//! ```

#![warn(unreachable_pub)]
#![allow(missing_docs)]

mod audit;
mod committer;
mod error;
mod export;
mod journal;
mod ledger;
mod query;
mod sequence;
mod signature;

pub use audit::{AuditAction, AuditChain, AuditEvent};
pub use committer::{
    entry_folder, CommitRequest, LedgerCommitter, SignatureManifest, SweepReport, MANIFEST_FILE,
};
pub use error::{artifact_kind, ErrorKind, LedgerError};
pub use export::{export_file_name, write_xlsx, SHEET_NAME, XLSX_MEDIA_TYPE};
pub use journal::{ArtifactRef, EntryEdit, EntryId, JournalEntry, JournalFields};
pub use ledger::{
    BackendError, JsonFileBackend, Ledger, LedgerBackend, LedgerSnapshot, MemoryBackend,
    Reservation,
};
pub use query::{
    check_date_format, format_date, JournalExport, JournalFilter, JournalPage, JournalQuery,
    DEFAULT_DATE_FORMAT, DEFAULT_LIMIT, MAX_LIMIT,
};
pub use sequence::{NumberingRule, NumberingRules, SequenceAllocator, SequenceNumber};
pub use signature::{
    Ed25519Verifier, SignatureBlob, SignatureVerifier, Thumbprint, VerifiedSigner, VerifyError,
};

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
