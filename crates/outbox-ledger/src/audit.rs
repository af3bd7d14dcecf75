//! Hash-chained audit trail of journal changes
//!
//! Each event commits to its predecessor's hash. Rewriting or dropping any
//! past event breaks the chain from that point on.

use crate::error::LedgerError;
use crate::journal::EntryId;
use chrono::{DateTime, Utc};
use outbox_artifact::ContentHash;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    Commit,
    Edit,
    Delete,
}

impl AuditAction {
    const fn tag(self) -> u8 {
        match self {
            Self::Commit => 1,
            Self::Edit => 2,
            Self::Delete => 3,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditEvent {
    pub seq: u64,
    pub at: DateTime<Utc>,
    pub action: AuditAction,
    pub entry_id: EntryId,
    pub detail: String,
    pub prev_hash: ContentHash,
    pub hash: ContentHash,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AuditChain {
    events: Vec<AuditEvent>,
}

impl AuditChain {
    const GENESIS: ContentHash = ContentHash::new([0u8; 32]);

    pub fn append(
        &mut self,
        action: AuditAction,
        entry_id: EntryId,
        detail: impl Into<String>,
        at: DateTime<Utc>,
    ) -> &AuditEvent {
        let prev_hash = self.events.last().map_or(Self::GENESIS, |e| e.hash);
        let mut event = AuditEvent {
            seq: self.events.len() as u64 + 1,
            at,
            action,
            entry_id,
            detail: detail.into(),
            prev_hash,
            hash: Self::GENESIS,
        };
        event.hash = compute_hash(&event);
        self.events.push(event);
        &self.events[self.events.len() - 1]
    }

    #[must_use]
    pub fn events(&self) -> &[AuditEvent] {
        &self.events
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.events.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Check every link and every event hash
    ///
    /// # Errors
    /// `Integrity` naming the first event that does not verify.
    pub fn verify_integrity(&self) -> Result<(), LedgerError> {
        let mut prev = Self::GENESIS;
        for (index, event) in self.events.iter().enumerate() {
            let expected_seq = index as u64 + 1;
            if event.seq != expected_seq {
                return Err(LedgerError::Integrity {
                    seq: expected_seq,
                    reason: format!("sequence gap, found {}", event.seq),
                });
            }
            if event.prev_hash != prev {
                return Err(LedgerError::Integrity {
                    seq: event.seq,
                    reason: "broken link to previous event".into(),
                });
            }
            if event.hash != compute_hash(event) {
                return Err(LedgerError::Integrity {
                    seq: event.seq,
                    reason: "event content does not match its hash".into(),
                });
            }
            prev = event.hash;
        }
        Ok(())
    }

    #[cfg(test)]
    pub(crate) fn events_mut(&mut self) -> &mut Vec<AuditEvent> {
        &mut self.events
    }
}

fn compute_hash(event: &AuditEvent) -> ContentHash {
    let mut hasher = Sha256::new();
    hasher.update(event.seq.to_le_bytes());
    hasher.update(event.at.timestamp_micros().to_le_bytes());
    hasher.update([event.action.tag()]);
    hasher.update(event.entry_id.0.to_le_bytes());
    hasher.update(event.detail.as_bytes());
    hasher.update([0]);
    hasher.update(event.prev_hash.as_bytes());
    ContentHash::new(hasher.finalize().into())
}
