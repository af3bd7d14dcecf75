//! Signing sessions
//!
//! One session per registration attempt. It lives only on the client, holds
//! no server resource, and is dropped when the dialog closes.

use crate::agent::Credential;
use crate::error::SigningError;
use crate::state::{validate_transition, SessionState, Transition};
use chrono::Utc;
use outbox_artifact::Artifact;
use outbox_ledger::{CommitRequest, JournalEntry, JournalFields, SequenceNumber, Thumbprint};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::debug;

/// What preparation handed to the client
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistrationTicket {
    pub artifact: Artifact,
    pub sequence_number: SequenceNumber,
    pub journal_fields: JournalFields,
}

/// Cancels a running session from outside the task that drives it
#[derive(Debug, Clone)]
pub struct CancelHandle {
    tx: Arc<watch::Sender<bool>>,
}

impl Default for CancelHandle {
    fn default() -> Self {
        Self::new()
    }
}

impl CancelHandle {
    #[must_use]
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        *self.tx.borrow()
    }

    /// Resolves once `cancel` has been called
    pub async fn cancelled(&self) {
        let mut rx = self.tx.subscribe();
        // the sender lives in `self`, so the channel cannot close here
        let _ = rx.wait_for(|cancelled| *cancelled).await;
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SigningSession {
    state: SessionState,
    ticket: RegistrationTicket,
    /// Eligible credentials only
    discovered_credentials: Vec<Credential>,
    /// Raw count before filtering
    credentials_found: usize,
    selected_credential: Option<Thumbprint>,
    /// Signing attempts so far
    attempts: u32,
    discovery_polls: u32,
    submit_attempts: u32,
    /// Payload fixed at signing time and reused for every resubmission
    pending: Option<CommitRequest>,
    entry: Option<JournalEntry>,
    last_error: Option<String>,
    history: Vec<Transition>,
    #[serde(skip)]
    cancel: CancelHandle,
}

impl SigningSession {
    #[must_use]
    pub fn new(ticket: RegistrationTicket) -> Self {
        Self {
            state: SessionState::Idle,
            ticket,
            discovered_credentials: Vec::new(),
            credentials_found: 0,
            selected_credential: None,
            attempts: 0,
            discovery_polls: 0,
            submit_attempts: 0,
            pending: None,
            entry: None,
            last_error: None,
            history: Vec::new(),
            cancel: CancelHandle::new(),
        }
    }

    /// Move to `to`, recording the transition
    ///
    /// # Errors
    /// `IllegalTransition` if the state machine does not allow it.
    pub fn transition(&mut self, to: SessionState, note: Option<String>) -> Result<(), SigningError> {
        validate_transition(self.state, to)?;
        debug!(from = %self.state, to = %to, artifact_id = %self.ticket.artifact.artifact_id, "session transition");
        self.history.push(Transition {
            from: self.state,
            to,
            at: Utc::now(),
            note,
        });
        self.state = to;
        Ok(())
    }

    #[inline]
    #[must_use]
    pub fn state(&self) -> SessionState {
        self.state
    }

    #[inline]
    #[must_use]
    pub fn ticket(&self) -> &RegistrationTicket {
        &self.ticket
    }

    #[must_use]
    pub fn credentials(&self) -> &[Credential] {
        &self.discovered_credentials
    }

    #[must_use]
    pub fn credentials_found(&self) -> usize {
        self.credentials_found
    }

    #[must_use]
    pub fn selected_credential(&self) -> Option<&Thumbprint> {
        self.selected_credential.as_ref()
    }

    #[must_use]
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    #[must_use]
    pub fn discovery_polls(&self) -> u32 {
        self.discovery_polls
    }

    #[must_use]
    pub fn submit_attempts(&self) -> u32 {
        self.submit_attempts
    }

    #[must_use]
    pub fn pending(&self) -> Option<&CommitRequest> {
        self.pending.as_ref()
    }

    #[must_use]
    pub fn entry(&self) -> Option<&JournalEntry> {
        self.entry.as_ref()
    }

    #[must_use]
    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    #[must_use]
    pub fn history(&self) -> &[Transition] {
        &self.history
    }

    #[must_use]
    pub fn cancel_handle(&self) -> CancelHandle {
        self.cancel.clone()
    }

    pub(crate) fn set_credentials(&mut self, found: usize, eligible: Vec<Credential>) {
        self.credentials_found = found;
        self.discovered_credentials = eligible;
    }

    pub(crate) fn set_selected(&mut self, thumbprint: Thumbprint) {
        self.selected_credential = Some(thumbprint);
    }

    pub(crate) fn record_poll(&mut self) {
        self.discovery_polls += 1;
    }

    pub(crate) fn record_attempt(&mut self) {
        self.attempts += 1;
    }

    pub(crate) fn record_submit(&mut self) {
        self.submit_attempts += 1;
    }

    pub(crate) fn set_pending(&mut self, request: CommitRequest) {
        self.pending = Some(request);
    }

    pub(crate) fn set_entry(&mut self, entry: JournalEntry) {
        self.entry = Some(entry);
    }

    pub(crate) fn set_last_error(&mut self, message: String) {
        self.last_error = Some(message);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use outbox_artifact::CardId;

    fn ticket() -> RegistrationTicket {
        RegistrationTicket {
            artifact: Artifact::describe(CardId(1), "исх_a.docx", "исх_a.pdf", "application/pdf", b"pdf"),
            sequence_number: SequenceNumber {
                numeric: 7,
                year: 2024,
                formatted: "7".into(),
            },
            journal_fields: JournalFields {
                outgoing_date: NaiveDate::from_ymd_opt(2024, 3, 5).unwrap(),
                to_whom: "Ministry".into(),
                executor: "Petrova".into(),
            },
        }
    }

    #[test]
    fn transitions_are_recorded_and_validated() {
        let mut session = SigningSession::new(ticket());
        session.transition(SessionState::AgentDiscovery, None).unwrap();
        let err = session
            .transition(SessionState::Submitting, None)
            .unwrap_err();
        assert!(matches!(err, SigningError::IllegalTransition { .. }));
        assert_eq!(session.state(), SessionState::AgentDiscovery);
        assert_eq!(session.history().len(), 1);
    }

    #[test]
    fn session_serializes_without_cancel_handle() {
        let mut session = SigningSession::new(ticket());
        session.transition(SessionState::AgentDiscovery, Some("poll".into())).unwrap();
        let json = serde_json::to_value(&session).unwrap();
        assert_eq!(json["state"], "AGENT_DISCOVERY");
        assert_eq!(json["history"][0]["note"], "poll");
        let back: SigningSession = serde_json::from_value(json).unwrap();
        assert_eq!(back.state(), SessionState::AgentDiscovery);
        assert!(!back.cancel_handle().is_cancelled());
    }

    #[tokio::test]
    async fn cancel_handle_wakes_waiters() {
        let handle = CancelHandle::new();
        let waiter = {
            let handle = handle.clone();
            tokio::spawn(async move { handle.cancelled().await })
        };
        handle.cancel();
        waiter.await.unwrap();
        assert!(handle.is_cancelled());
    }
}
