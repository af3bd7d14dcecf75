//! Sequence Allocator
//!
//! Hands out year-scoped outgoing numbers. The increment and its persistence
//! are one ledger transaction: either the counter moves and is durable, or
//! nothing changes and the caller gets `AllocationUnavailable`.
//!
//! Numbers that are allocated but never committed stay unused forever.

use crate::error::LedgerError;
use crate::ledger::{Ledger, LedgerSnapshot, Reservation};
use chrono::Utc;
use outbox_artifact::ArtifactId;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use tracing::info;

/// An allocated outgoing number
///
/// `(year, numeric)` is the immutable allocation key; `formatted` is for
/// display and may be edited later.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SequenceNumber {
    pub numeric: u64,
    pub year: i32,
    pub formatted: String,
}

impl SequenceNumber {
    #[inline]
    #[must_use]
    pub fn key(&self) -> (i32, u64) {
        (self.year, self.numeric)
    }

    /// Same allocation, ignoring the display form
    #[inline]
    #[must_use]
    pub fn same_allocation(&self, other: &Self) -> bool {
        self.key() == other.key()
    }
}

impl fmt::Display for SequenceNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({}/{})", self.formatted, self.year, self.numeric)
    }
}

/// How an executor's numbers are displayed
///
/// `format` understands `{number}`, `{executor_code}` and `{year}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NumberingRule {
    pub executor_code: String,
    pub format: String,
    /// First number of a year whose counter has not been touched yet
    pub start_number: u64,
}

impl Default for NumberingRule {
    fn default() -> Self {
        Self {
            executor_code: String::new(),
            format: "{number}".to_string(),
            start_number: 1,
        }
    }
}

impl NumberingRule {
    #[must_use]
    pub fn format_number(&self, numeric: u64, year: i32) -> String {
        self.format
            .replace("{number}", &numeric.to_string())
            .replace("{executor_code}", &self.executor_code)
            .replace("{year}", &year.to_string())
    }
}

/// Default rule plus per-executor overrides keyed by executor id
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NumberingRules {
    pub default: NumberingRule,
    pub executors: BTreeMap<String, NumberingRule>,
}

impl NumberingRules {
    #[must_use]
    pub fn rule_for(&self, executor_id: &str) -> &NumberingRule {
        self.executors.get(executor_id).unwrap_or(&self.default)
    }
}

/// Allocates numbers and binds them to artifacts
#[derive(Clone)]
pub struct SequenceAllocator {
    ledger: Arc<Ledger>,
}

impl SequenceAllocator {
    #[must_use]
    pub fn new(ledger: Arc<Ledger>) -> Self {
        Self { ledger }
    }

    /// Allocate the next number for `year`
    ///
    /// Blocks on the ledger backend; async callers use
    /// [`allocate_async`](Self::allocate_async).
    ///
    /// # Errors
    /// `AllocationUnavailable` when the counter cannot be persisted. No state
    /// is changed in that case, so a new call is safe.
    pub fn allocate(&self, year: i32, rule: &NumberingRule) -> Result<SequenceNumber, LedgerError> {
        let number = self.ledger.transact(|snapshot| Ok(next_number(snapshot, year, rule)))?;
        info!(year, numeric = number.numeric, formatted = %number.formatted, "sequence number allocated");
        Ok(number)
    }

    /// [`allocate`](Self::allocate) without blocking the runtime
    ///
    /// # Errors
    /// As `allocate`.
    pub async fn allocate_async(
        &self,
        year: i32,
        rule: &NumberingRule,
    ) -> Result<SequenceNumber, LedgerError> {
        let rule = rule.clone();
        let number = self
            .ledger
            .transact_async(move |snapshot| Ok(next_number(snapshot, year, &rule)))
            .await?;
        info!(year, numeric = number.numeric, formatted = %number.formatted, "sequence number allocated");
        Ok(number)
    }

    /// Record which artifact an allocated number belongs to
    ///
    /// # Errors
    /// `InvalidRequest` for numbers that were never allocated;
    /// `AllocationUnavailable` when the binding cannot be persisted.
    pub fn bind(&self, artifact_id: ArtifactId, number: &SequenceNumber) -> Result<(), LedgerError> {
        self.ledger
            .transact(|snapshot| reserve(snapshot, artifact_id, number.clone()))
    }

    /// [`bind`](Self::bind) without blocking the runtime
    ///
    /// # Errors
    /// As `bind`.
    pub async fn bind_async(
        &self,
        artifact_id: ArtifactId,
        number: &SequenceNumber,
    ) -> Result<(), LedgerError> {
        let number = number.clone();
        self.ledger
            .transact_async(move |snapshot| reserve(snapshot, artifact_id, number))
            .await
    }

    /// Highest number handed out for `year`
    #[must_use]
    pub fn last_allocated(&self, year: i32) -> Option<u64> {
        self.ledger.read(|snapshot| snapshot.counters.get(&year).copied())
    }
}

fn next_number(snapshot: &mut LedgerSnapshot, year: i32, rule: &NumberingRule) -> SequenceNumber {
    let numeric = match snapshot.counters.get(&year) {
        Some(last) => last + 1,
        None => rule.start_number.max(1),
    };
    snapshot.counters.insert(year, numeric);
    SequenceNumber {
        numeric,
        year,
        formatted: rule.format_number(numeric, year),
    }
}

fn reserve(
    snapshot: &mut LedgerSnapshot,
    artifact_id: ArtifactId,
    number: SequenceNumber,
) -> Result<(), LedgerError> {
    if !snapshot.is_allocated(number.year, number.numeric) {
        return Err(LedgerError::InvalidRequest(format!(
            "sequence number {}/{} was never allocated",
            number.year, number.numeric
        )));
    }
    snapshot.reservations.insert(
        artifact_id,
        Reservation {
            sequence_number: number,
            reserved_at: Utc::now(),
        },
    );
    Ok(())
}
