//! Signing Orchestrator
//!
//! Drives one [`SigningSession`] through discovery, enumeration, selection,
//! signing and submission. Suspension points (the discovery poll, artifact
//! fetch and the agent's sign call) race against the session's
//! [`CancelHandle`](crate::session::CancelHandle); the PIN wait inside
//! `sign` has no timeout.
//!
//! Retry policy:
//! - `SigningFailed` returns the session to `AWAITING_SELECTION`
//! - transport failures while submitting are retried with the identical
//!   payload; once the budget is spent the session stays in `SUBMITTING` and
//!   [`SigningOrchestrator::submit`] may be called again
//! - rejections from the ledger end the session in `ERROR`
//! - after `AgentUnavailable` or `NoEligibleCredential` the caller opens a
//!   new session with the same ticket; no number is re-allocated

use crate::agent::{Credential, SigningAgent};
use crate::error::SigningError;
use crate::gateway::{ArtifactSource, GatewayError, LedgerGateway};
use crate::session::{RegistrationTicket, SigningSession};
use crate::state::SessionState;
use async_trait::async_trait;
use outbox_ledger::{CommitRequest, JournalEntry, Thumbprint};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrchestratorConfig {
    pub discovery_interval: Duration,
    pub discovery_attempts: u32,
    pub submit_attempts: u32,
    /// Multiplied by the attempt number between submissions
    pub submit_backoff: Duration,
    /// Signing attempts allowed by [`SigningOrchestrator::run`]
    pub sign_attempts: u32,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            discovery_interval: Duration::from_secs(1),
            discovery_attempts: 30,
            submit_attempts: 3,
            submit_backoff: Duration::from_millis(500),
            sign_attempts: 3,
        }
    }
}

/// Stands in for the user at `AWAITING_SELECTION`
#[async_trait]
pub trait CredentialChooser: Send + Sync {
    /// `None` cancels the session
    async fn choose(&self, credentials: &[Credential], last_error: Option<&str>) -> Option<Thumbprint>;
}

/// Always picks the first eligible credential
#[derive(Debug, Clone, Copy, Default)]
pub struct FirstEligible;

#[async_trait]
impl CredentialChooser for FirstEligible {
    async fn choose(&self, credentials: &[Credential], _last_error: Option<&str>) -> Option<Thumbprint> {
        credentials.first().map(|c| c.thumbprint.clone())
    }
}

pub struct SigningOrchestrator {
    agent: Arc<dyn SigningAgent>,
    artifacts: Arc<dyn ArtifactSource>,
    gateway: Arc<dyn LedgerGateway>,
    config: OrchestratorConfig,
}

impl SigningOrchestrator {
    pub fn new(
        agent: Arc<dyn SigningAgent>,
        artifacts: Arc<dyn ArtifactSource>,
        gateway: Arc<dyn LedgerGateway>,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            agent,
            artifacts,
            gateway,
            config,
        }
    }

    #[must_use]
    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    /// Start a session for a prepared artifact
    #[must_use]
    pub fn open(&self, ticket: RegistrationTicket) -> SigningSession {
        info!(
            artifact_id = %ticket.artifact.artifact_id,
            number = %ticket.sequence_number,
            "signing session opened"
        );
        SigningSession::new(ticket)
    }

    fn fail(session: &mut SigningSession, error: SigningError) -> SigningError {
        session.set_last_error(error.to_string());
        let from = session.state();
        if let Err(e) = session.transition(SessionState::Error, Some(error.kind().to_string())) {
            debug!(error = %e, "session already terminal");
        }
        if error.is_integrity_fault() {
            error!(from = %from, error = %error, "signing session failed");
        } else {
            warn!(from = %from, error = %error, "signing session failed");
        }
        error
    }

    fn cancelled(session: &mut SigningSession) -> SigningError {
        session.cancel_handle().cancel();
        if session.state().is_cancellable() {
            let from = session.state();
            if session.transition(SessionState::Cancelled, None).is_ok() {
                info!(from = %from, "signing session cancelled");
            }
        }
        SigningError::Cancelled
    }

    fn check_cancelled(session: &mut SigningSession) -> Result<(), SigningError> {
        if session.cancel_handle().is_cancelled() {
            return Err(Self::cancelled(session));
        }
        Ok(())
    }

    /// Poll for the agent, then enumerate and filter credentials
    ///
    /// Ends in `AWAITING_SELECTION` on success.
    ///
    /// # Errors
    /// `AgentUnavailable` after the poll budget, `NoEligibleCredential` with
    /// the raw counts, or `Cancelled`.
    pub async fn discover(&self, session: &mut SigningSession) -> Result<(), SigningError> {
        Self::check_cancelled(session)?;
        session.transition(SessionState::AgentDiscovery, None)?;

        let cancel = session.cancel_handle();
        let attempts = self.config.discovery_attempts.max(1);
        let mut reachable = false;
        for attempt in 1..=attempts {
            Self::check_cancelled(session)?;
            session.record_poll();
            match self.agent.discover().await {
                Ok(()) => {
                    reachable = true;
                    break;
                }
                Err(e) => debug!(attempt, attempts, error = %e, "signing agent not found yet"),
            }
            if attempt < attempts {
                let slept = tokio::select! {
                    () = tokio::time::sleep(self.config.discovery_interval) => true,
                    () = cancel.cancelled() => false,
                };
                if !slept {
                    return Err(Self::cancelled(session));
                }
            }
        }
        if !reachable {
            return Err(Self::fail(session, SigningError::AgentUnavailable { attempts }));
        }

        session.transition(SessionState::CertEnumeration, None)?;
        let listed = match self.agent.list_credentials().await {
            Ok(listed) => listed,
            Err(e) => {
                warn!(error = %e, "credential enumeration failed");
                return Err(Self::fail(
                    session,
                    SigningError::AgentUnavailable {
                        attempts: session.discovery_polls(),
                    },
                ));
            }
        };
        Self::check_cancelled(session)?;

        let found = listed.len();
        let eligible: Vec<Credential> = listed.into_iter().filter(Credential::is_eligible).collect();
        if eligible.is_empty() {
            return Err(Self::fail(
                session,
                SigningError::NoEligibleCredential { found, eligible: 0 },
            ));
        }
        info!(found, eligible = eligible.len(), "credentials enumerated");
        session.set_credentials(found, eligible);
        session.transition(SessionState::AwaitingSelection, None)
    }

    /// Record the user's credential choice
    ///
    /// # Errors
    /// `UnknownCredential` if the thumbprint is not eligible (the session
    /// stays open); `IllegalTransition` outside `AWAITING_SELECTION`.
    pub fn select(&self, session: &mut SigningSession, thumbprint: &Thumbprint) -> Result<(), SigningError> {
        if session.state() != SessionState::AwaitingSelection {
            return Err(SigningError::IllegalTransition {
                from: session.state(),
                to: SessionState::Signing,
            });
        }
        if !session.credentials().iter().any(|c| &c.thumbprint == thumbprint) {
            return Err(SigningError::UnknownCredential(thumbprint.clone()));
        }
        session.set_selected(thumbprint.clone());
        Ok(())
    }

    /// Sign the artifact's exact bytes with the selected credential and submit
    ///
    /// # Errors
    /// `SigningFailed` (session back in `AWAITING_SELECTION`),
    /// `ArtifactMismatch`, `Cancelled`, or any submission error.
    pub async fn sign(&self, session: &mut SigningSession) -> Result<JournalEntry, SigningError> {
        let selected = session.selected_credential().cloned();
        let (SessionState::AwaitingSelection, Some(thumbprint)) = (session.state(), selected) else {
            return Err(SigningError::IllegalTransition {
                from: session.state(),
                to: SessionState::Signing,
            });
        };
        Self::check_cancelled(session)?;
        session.transition(SessionState::Signing, Some(thumbprint.to_string()))?;
        session.record_attempt();

        let cancel = session.cancel_handle();
        let artifact_id = session.ticket().artifact.artifact_id;

        let fetched = tokio::select! {
            fetched = self.artifacts.fetch(artifact_id) => Some(fetched),
            () = cancel.cancelled() => None,
        };
        let Some(fetched) = fetched else {
            return Err(Self::cancelled(session));
        };
        let bytes = match fetched {
            Ok(bytes) => bytes,
            Err(e) => return Err(Self::fail(session, SigningError::ArtifactUnavailable(e.to_string()))),
        };
        if !session.ticket().artifact.matches(&bytes) {
            return Err(Self::fail(
                session,
                SigningError::ArtifactMismatch(format!(
                    "artifact {artifact_id} differs from the prepared render"
                )),
            ));
        }

        let signed = tokio::select! {
            signed = self.agent.sign(&bytes, &thumbprint) => Some(signed),
            () = cancel.cancelled() => None,
        };
        let Some(signed) = signed else {
            return Err(Self::cancelled(session));
        };
        let signature = match signed {
            Ok(signature) => signature,
            Err(e) => {
                let diagnostic = e.to_string();
                warn!(thumbprint = %thumbprint, error = %diagnostic, "agent failed to sign");
                session.set_last_error(diagnostic.clone());
                session.transition(SessionState::AwaitingSelection, Some(diagnostic.clone()))?;
                return Err(SigningError::SigningFailed(diagnostic));
            }
        };
        Self::check_cancelled(session)?;

        let signer_name = session
            .credentials()
            .iter()
            .find(|c| c.thumbprint == thumbprint)
            .map(|c| c.common_name.clone());
        let ticket = session.ticket();
        let request = CommitRequest {
            artifact_id,
            signature,
            credential_thumbprint: thumbprint,
            signer_name,
            sequence_number: ticket.sequence_number.clone(),
            journal_fields: ticket.journal_fields.clone(),
        };
        session.set_pending(request);
        session.transition(SessionState::Submitting, None)?;
        self.submit(session).await
    }

    /// Deliver the pending payload, retrying transport failures
    ///
    /// Also the way to resubmit after `SubmissionFailed`: the payload fixed
    /// at signing time is sent again unchanged.
    ///
    /// # Errors
    /// `SubmissionRejected` (session in `ERROR`) or `SubmissionFailed`
    /// (session still in `SUBMITTING`).
    pub async fn submit(&self, session: &mut SigningSession) -> Result<JournalEntry, SigningError> {
        let pending = session.pending().cloned();
        let (SessionState::Submitting, Some(request)) = (session.state(), pending) else {
            return Err(SigningError::IllegalTransition {
                from: session.state(),
                to: SessionState::Complete,
            });
        };

        let attempts = self.config.submit_attempts.max(1);
        let mut last_error = String::new();
        for attempt in 1..=attempts {
            session.record_submit();
            match self.gateway.submit(&request).await {
                Ok(entry) => {
                    session.set_entry(entry.clone());
                    session.transition(SessionState::Complete, None)?;
                    info!(
                        entry_id = %entry.id,
                        artifact_id = %request.artifact_id,
                        number = %entry.sequence_number,
                        "signature submitted"
                    );
                    return Ok(entry);
                }
                Err(GatewayError::Rejected { kind, reason }) => {
                    return Err(Self::fail(session, SigningError::SubmissionRejected { kind, reason }));
                }
                Err(GatewayError::Transport(e)) => {
                    warn!(attempt, attempts, error = %e, "submission failed, retrying with the same payload");
                    last_error = e;
                    if attempt < attempts {
                        tokio::time::sleep(self.config.submit_backoff * attempt).await;
                    }
                }
            }
        }

        session.set_last_error(last_error.clone());
        Err(SigningError::SubmissionFailed {
            attempts,
            last_error,
        })
    }

    /// Cancel a session that has not reached `SUBMITTING`
    ///
    /// # Errors
    /// `IllegalTransition` from `SUBMITTING` or a terminal state.
    pub fn cancel(&self, session: &mut SigningSession) -> Result<(), SigningError> {
        if !session.state().is_cancellable() {
            return Err(SigningError::IllegalTransition {
                from: session.state(),
                to: SessionState::Cancelled,
            });
        }
        Self::cancelled(session);
        Ok(())
    }

    /// Drive a whole session headlessly
    ///
    /// # Errors
    /// The first error that ends the session.
    pub async fn run(
        &self,
        session: &mut SigningSession,
        chooser: &dyn CredentialChooser,
    ) -> Result<JournalEntry, SigningError> {
        self.discover(session).await?;
        let cancel = session.cancel_handle();
        loop {
            let credentials = session.credentials().to_vec();
            let last_error = session.last_error().map(str::to_string);
            let choice = tokio::select! {
                choice = chooser.choose(&credentials, last_error.as_deref()) => Some(choice),
                () = cancel.cancelled() => None,
            };
            let Some(Some(thumbprint)) = choice else {
                return Err(Self::cancelled(session));
            };
            self.select(session, &thumbprint)?;

            match self.sign(session).await {
                Ok(entry) => return Ok(entry),
                Err(e) if e.keeps_session_open() => {
                    if session.attempts() < self.config.sign_attempts.max(1) {
                        continue;
                    }
                    return Err(Self::fail(session, e));
                }
                Err(e) => return Err(e),
            }
        }
    }
}
