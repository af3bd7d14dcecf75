//! Registration service
//!
//! Server-side half of registration: resolve the card, validate the
//! template, allocate a number, render and stage the artifact, bind the
//! number to it. Later calls commit signatures and serve the journal.
//!
//! A template is validated before a number is allocated, so an unsupported
//! file never costs a number. A failure after allocation leaves a gap.

use crate::board::{BoardError, ProjectBoard};
use crate::clock::Clock;
use crate::config::RenderConfig;
use crate::error::ServiceError;
use chrono::{Datelike, NaiveDate};
use outbox_artifact::{Artifact, ArtifactId, ArtifactPreparer, CardId, RenderFields};
use outbox_ledger::{
    format_date, CommitRequest, EntryEdit, EntryId, JournalEntry, JournalExport, JournalFields,
    JournalFilter, JournalPage, JournalQuery, Ledger, LedgerCommitter, NumberingRules,
    SequenceAllocator, SequenceNumber, SweepReport,
};
use outbox_signing::RegistrationTicket;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrepareRequest {
    pub card_id: CardId,
    pub selected_file_name: String,
}

/// What the client needs to sign and submit
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Registration {
    pub artifact: Artifact,
    pub sequence_number: SequenceNumber,
    pub outgoing_date: NaiveDate,
    pub executor: String,
    pub to_whom: String,
    /// Relative URL of the exact bytes to sign
    pub download_url: String,
}

impl Registration {
    #[must_use]
    pub fn journal_fields(&self) -> JournalFields {
        JournalFields {
            outgoing_date: self.outgoing_date,
            to_whom: self.to_whom.clone(),
            executor: self.executor.clone(),
        }
    }

    #[must_use]
    pub fn ticket(&self) -> RegistrationTicket {
        RegistrationTicket {
            artifact: self.artifact.clone(),
            sequence_number: self.sequence_number.clone(),
            journal_fields: self.journal_fields(),
        }
    }
}

#[must_use]
pub fn artifact_url(artifact_id: ArtifactId) -> String {
    format!("/api/outbox/artifacts/{artifact_id}")
}

pub struct RegistrationService {
    board: Arc<dyn ProjectBoard>,
    preparer: ArtifactPreparer,
    ledger: Arc<Ledger>,
    allocator: SequenceAllocator,
    committer: LedgerCommitter,
    query: JournalQuery,
    rules: NumberingRules,
    render: RenderConfig,
    executor_role: u8,
    clock: Arc<dyn Clock>,
}

impl RegistrationService {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        board: Arc<dyn ProjectBoard>,
        preparer: ArtifactPreparer,
        ledger: Arc<Ledger>,
        committer: LedgerCommitter,
        rules: NumberingRules,
        render: RenderConfig,
        executor_role: u8,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let query = JournalQuery::new(ledger.clone()).with_date_format(render.date_format.clone());
        Self {
            board,
            preparer,
            allocator: SequenceAllocator::new(ledger.clone()),
            ledger,
            committer,
            query,
            rules,
            render,
            executor_role,
            clock,
        }
    }

    #[inline]
    #[must_use]
    pub fn ledger(&self) -> &Arc<Ledger> {
        &self.ledger
    }

    #[inline]
    #[must_use]
    pub fn allocator(&self) -> &SequenceAllocator {
        &self.allocator
    }

    /// Allocate a number and produce the artifact to sign
    ///
    /// # Errors
    /// `NotFound` for an unknown card or file, `InvalidRequest` when the card
    /// has no executor, `UnsupportedFormat` for a non-template (all before
    /// allocation); `AllocationUnavailable` and render failures after.
    pub async fn prepare_registration(&self, request: &PrepareRequest) -> Result<Registration, ServiceError> {
        let card = self.board.card(request.card_id).await?;
        let executor = card.member_with_role(self.executor_role).cloned().ok_or_else(|| {
            ServiceError::InvalidRequest(format!(
                "card {} has no executor (participant type {})",
                card.id, self.executor_role
            ))
        })?;
        if card.file(&request.selected_file_name).is_none() {
            return Err(BoardError::FileNotFound {
                card_id: card.id,
                file_name: request.selected_file_name.clone(),
            }
            .into());
        }
        let template = self.preparer.inspect(card.id, &request.selected_file_name).await?;

        let rule = self.rules.rule_for(&executor.user_id.to_string());
        let today = self.clock.today();
        let outgoing_date = format_date(today, &self.render.date_format)?;
        let number = self.allocator.allocate_async(today.year(), rule).await?;

        let fields = RenderFields {
            formatted_number: number.formatted.clone(),
            outgoing_date,
            stamp_text: self.render.stamp_text.clone(),
        };
        let artifact = match self.preparer.render(card.id, &template, &fields).await {
            Ok(artifact) => artifact,
            Err(e) => {
                warn!(number = %number, card_id = %card.id, error = %e, "render failed; number left as a gap");
                return Err(e.into());
            }
        };
        if let Err(e) = self.allocator.bind_async(artifact.artifact_id, &number).await {
            warn!(number = %number, artifact_id = %artifact.artifact_id, error = %e, "binding failed; number left as a gap");
            if let Err(discard) = self.preparer.store().discard_staged(artifact.artifact_id).await {
                warn!(artifact_id = %artifact.artifact_id, error = %discard, "failed to discard staged artifact");
            }
            return Err(e.into());
        }

        info!(
            card_id = %card.id,
            number = %number,
            artifact_id = %artifact.artifact_id,
            executor = %executor.full_name,
            "registration prepared"
        );
        Ok(Registration {
            download_url: artifact_url(artifact.artifact_id),
            artifact,
            sequence_number: number,
            outgoing_date: today,
            executor: executor.full_name,
            to_whom: card.title,
        })
    }

    /// Bytes the signing agent must sign
    ///
    /// # Errors
    /// `NotFound` for unknown or already committed artifacts.
    pub async fn artifact_bytes(&self, artifact_id: ArtifactId) -> Result<Vec<u8>, ServiceError> {
        Ok(self.preparer.store().read(artifact_id).await?)
    }

    /// # Errors
    /// See [`LedgerCommitter::commit`].
    pub async fn submit_signature(&self, request: CommitRequest) -> Result<JournalEntry, ServiceError> {
        Ok(self.committer.commit(request).await?)
    }

    /// # Errors
    /// `InvalidRequest` for a bad filter.
    pub fn list(
        &self,
        filter: &JournalFilter,
        skip: usize,
        limit: usize,
        as_of: Option<u64>,
    ) -> Result<JournalPage, ServiceError> {
        Ok(self.query.query(filter, skip, limit, as_of)?)
    }

    /// # Errors
    /// `InvalidRequest` for a bad filter.
    pub fn export(&self, filter: &JournalFilter) -> Result<JournalExport, ServiceError> {
        Ok(self.query.export(filter)?)
    }

    /// # Errors
    /// `NotFound` or `InvalidRequest`.
    pub async fn edit(&self, id: EntryId, edit: &EntryEdit) -> Result<JournalEntry, ServiceError> {
        Ok(self.committer.edit(id, edit).await?)
    }

    /// # Errors
    /// `NotFound` for unknown entries.
    pub async fn delete(&self, id: EntryId) -> Result<JournalEntry, ServiceError> {
        Ok(self.committer.delete(id).await?)
    }

    #[must_use]
    pub fn entry(&self, id: EntryId) -> Option<JournalEntry> {
        self.committer.entry(id)
    }

    /// Release registrations prepared more than `older_than` ago and never
    /// signed; their numbers stay gaps
    ///
    /// # Errors
    /// `AllocationUnavailable` or a storage error.
    pub async fn sweep_abandoned(&self, older_than: chrono::Duration) -> Result<SweepReport, ServiceError> {
        Ok(self.committer.sweep_abandoned(older_than).await?)
    }
}
