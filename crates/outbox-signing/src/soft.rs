//! Software token agent
//!
//! Holds ed25519 keys in memory and answers like a hardware agent would.
//! Used for headless registration and in tests; scripted outages and sign
//! failures let callers exercise the orchestrator's retry paths.

use crate::agent::{AgentError, Credential, SigningAgent};
use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use ed25519_dalek::{Signer, SigningKey};
use outbox_ledger::{Ed25519Verifier, SignatureBlob, Thumbprint};
use parking_lot::Mutex;
use rand::rngs::OsRng;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;
use tracing::debug;

struct SoftCredential {
    credential: Credential,
    key: Option<SigningKey>,
}

/// In-memory signing agent
pub struct SoftTokenAgent {
    credentials: Vec<SoftCredential>,
    unavailable_polls: AtomicU32,
    sign_failures: Mutex<VecDeque<String>>,
    sign_delay: Option<Duration>,
    signed: AtomicU32,
}

impl Default for SoftTokenAgent {
    fn default() -> Self {
        Self::new()
    }
}

impl SoftTokenAgent {
    #[must_use]
    pub fn new() -> Self {
        Self {
            credentials: Vec::new(),
            unavailable_polls: AtomicU32::new(0),
            sign_failures: Mutex::new(VecDeque::new()),
            sign_delay: None,
            signed: AtomicU32::new(0),
        }
    }

    /// Add an eligible credential backed by `key`
    #[must_use]
    pub fn with_key(mut self, subject: impl Into<String>, key: SigningKey) -> Self {
        let thumbprint = Thumbprint::of_key(&key.verifying_key());
        let credential = Credential::from_subject(thumbprint, subject, Utc::now() + ChronoDuration::days(365), true, true);
        self.credentials.push(SoftCredential {
            credential,
            key: Some(key),
        });
        self
    }

    /// Add an eligible credential with a fresh random key
    #[must_use]
    pub fn with_generated(self, subject: impl Into<String>) -> Self {
        self.with_key(subject, SigningKey::generate(&mut OsRng))
    }

    /// Add a credential with explicit key presence and expiry
    ///
    /// Without a private key, or with `valid_to` in the past, the
    /// orchestrator filters it out.
    #[must_use]
    pub fn with_certificate(mut self, subject: impl Into<String>, has_private_key: bool, valid_to: DateTime<Utc>) -> Self {
        let key = SigningKey::generate(&mut OsRng);
        let thumbprint = Thumbprint::of_key(&key.verifying_key());
        let credential =
            Credential::from_subject(thumbprint, subject, valid_to, has_private_key, valid_to > Utc::now());
        self.credentials.push(SoftCredential {
            credential,
            key: has_private_key.then_some(key),
        });
        self
    }

    /// Fail this many discovery polls before answering
    #[must_use]
    pub fn unavailable_for(self, polls: u32) -> Self {
        self.unavailable_polls.store(polls, Ordering::SeqCst);
        self
    }

    /// Wait this long inside `sign`, as a user typing a PIN would
    #[must_use]
    pub fn with_sign_delay(mut self, delay: Duration) -> Self {
        self.sign_delay = Some(delay);
        self
    }

    /// Make the next `sign` call fail with `diagnostic`
    pub fn fail_next_sign(&self, diagnostic: impl Into<String>) {
        self.sign_failures.lock().push_back(diagnostic.into());
    }

    /// Thumbprints of the eligible credentials, in insertion order
    #[must_use]
    pub fn thumbprints(&self) -> Vec<Thumbprint> {
        self.credentials
            .iter()
            .filter(|c| c.credential.is_eligible())
            .map(|c| c.credential.thumbprint.clone())
            .collect()
    }

    /// A verifier that trusts every key this agent can sign with
    #[must_use]
    pub fn verifier(&self) -> Ed25519Verifier {
        let verifier = Ed25519Verifier::new();
        self.trust_into(&verifier);
        verifier
    }

    pub fn trust_into(&self, verifier: &Ed25519Verifier) {
        for soft in &self.credentials {
            if let (Some(key), true) = (&soft.key, soft.credential.is_eligible()) {
                verifier.trust(key.verifying_key(), Some(soft.credential.common_name.clone()));
            }
        }
    }

    #[must_use]
    pub fn signatures_issued(&self) -> u32 {
        self.signed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SigningAgent for SoftTokenAgent {
    async fn discover(&self) -> Result<(), AgentError> {
        let remaining = self
            .unavailable_polls
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        match remaining {
            Ok(_) => Err(AgentError::Unreachable("soft token not loaded yet".into())),
            Err(_) => Ok(()),
        }
    }

    async fn list_credentials(&self) -> Result<Vec<Credential>, AgentError> {
        Ok(self.credentials.iter().map(|c| c.credential.clone()).collect())
    }

    async fn sign(&self, content: &[u8], credential: &Thumbprint) -> Result<SignatureBlob, AgentError> {
        if let Some(delay) = self.sign_delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(diagnostic) = self.sign_failures.lock().pop_front() {
            return Err(AgentError::Failed(diagnostic));
        }
        let key = self
            .credentials
            .iter()
            .find(|c| &c.credential.thumbprint == credential)
            .and_then(|c| c.key.as_ref())
            .ok_or_else(|| AgentError::Failed(format!("no private key for {credential}")))?;
        self.signed.fetch_add(1, Ordering::SeqCst);
        debug!(thumbprint = %credential, bytes = content.len(), "soft token signed");
        Ok(SignatureBlob::new(key.sign(content).to_bytes().to_vec()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use outbox_ledger::SignatureVerifier;

    #[tokio::test]
    async fn signatures_verify_against_its_own_verifier() {
        let agent = SoftTokenAgent::new().with_generated("CN=Иванов Иван, O=Org");
        let thumb = agent.thumbprints().remove(0);
        let blob = agent.sign(b"content", &thumb).await.unwrap();

        let signer = agent.verifier().verify(b"content", &blob, &thumb).await.unwrap();
        assert_eq!(signer.common_name.as_deref(), Some("Иванов Иван"));
        assert!(agent.verifier().verify(b"contenT", &blob, &thumb).await.is_err());
    }

    #[tokio::test]
    async fn ineligible_credentials_are_listed_but_not_trusted() {
        let agent = SoftTokenAgent::new()
            .with_generated("CN=A")
            .with_certificate("CN=B", false, Utc::now() + ChronoDuration::days(10))
            .with_certificate("CN=C", true, Utc::now() - ChronoDuration::days(1));
        assert_eq!(agent.list_credentials().await.unwrap().len(), 3);
        assert_eq!(agent.thumbprints().len(), 1);
        assert_eq!(agent.verifier().len(), 1);
    }

    #[tokio::test]
    async fn scripted_outage_and_failure() {
        let agent = SoftTokenAgent::new().with_generated("CN=A").unavailable_for(2);
        assert!(agent.discover().await.is_err());
        assert!(agent.discover().await.is_err());
        assert!(agent.discover().await.is_ok());

        let thumb = agent.thumbprints().remove(0);
        agent.fail_next_sign("token removed");
        let err = agent.sign(b"x", &thumb).await.unwrap_err();
        assert_eq!(err.to_string(), "token removed");
        assert!(agent.sign(b"x", &thumb).await.is_ok());
        assert_eq!(agent.signatures_issued(), 1);
    }
}
