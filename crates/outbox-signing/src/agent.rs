//! Signing agent capability
//!
//! The agent holds the user's keys. The orchestrator only needs three things
//! from it: is it there, which credentials does it offer, and a detached
//! signature over given bytes.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use outbox_ledger::{SignatureBlob, Thumbprint};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;

static COMMON_NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"CN=([^,]+)").expect("common name regex is valid"));

/// Common name from an X.500 subject, or the whole subject when absent
#[must_use]
pub fn common_name_of(subject: &str) -> String {
    COMMON_NAME
        .captures(subject)
        .and_then(|c| c.get(1))
        .map_or_else(|| subject.trim().to_string(), |m| m.as_str().trim().to_string())
}

/// A credential in the user's store
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credential {
    pub thumbprint: Thumbprint,
    pub common_name: String,
    pub subject_name: String,
    pub valid_to: DateTime<Utc>,
    pub has_private_key: bool,
    pub is_currently_valid: bool,
}

impl Credential {
    #[must_use]
    pub fn from_subject(
        thumbprint: Thumbprint,
        subject_name: impl Into<String>,
        valid_to: DateTime<Utc>,
        has_private_key: bool,
        is_currently_valid: bool,
    ) -> Self {
        let subject_name = subject_name.into();
        Self {
            thumbprint,
            common_name: common_name_of(&subject_name),
            subject_name,
            valid_to,
            has_private_key,
            is_currently_valid,
        }
    }

    /// Only credentials that can sign and are currently valid may be chosen
    #[inline]
    #[must_use]
    pub fn is_eligible(&self) -> bool {
        self.has_private_key && self.is_currently_valid
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AgentError {
    /// Agent not (yet) reachable
    #[error("agent not reachable: {0}")]
    Unreachable(String),

    /// Agent answered with a failure; text is the agent's own diagnostic
    #[error("{0}")]
    Failed(String),
}

/// External signing agent
#[async_trait]
pub trait SigningAgent: Send + Sync {
    /// Probe for the agent; `Unreachable` while it is not there
    async fn discover(&self) -> Result<(), AgentError>;

    /// Every credential in the user's store, eligible or not
    async fn list_credentials(&self) -> Result<Vec<Credential>, AgentError>;

    /// Detached signature over exactly `content`; may wait on PIN entry
    async fn sign(&self, content: &[u8], credential: &Thumbprint) -> Result<SignatureBlob, AgentError>;
}
