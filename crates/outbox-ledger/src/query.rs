//! Journal Query Service
//!
//! Entries are listed most recent allocation first. Pages are taken against a
//! revision cursor: the first page reports the ledger revision it was read
//! at, and passing that back as `as_of` hides entries committed afterwards,
//! so new commits at the head never shift later pages. Deletions after the
//! cursor do shift pages.

use crate::error::LedgerError;
use crate::export::{export_file_name, write_xlsx};
use crate::journal::JournalEntry;
use crate::ledger::Ledger;
use chrono::format::{Item, StrftimeItems};
use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};
use std::cmp::Reverse;
use std::fmt::Write;
use std::sync::Arc;

pub const DEFAULT_LIMIT: usize = 100;
pub const MAX_LIMIT: usize = 1000;
pub const DEFAULT_DATE_FORMAT: &str = "%d.%m.%Y";

/// Reject strftime patterns chrono cannot render
///
/// # Errors
/// `InvalidRequest` naming the pattern.
pub fn check_date_format(format: &str) -> Result<(), LedgerError> {
    if StrftimeItems::new(format).any(|item| matches!(item, Item::Error)) {
        return Err(LedgerError::InvalidRequest(format!(
            "invalid date format {format:?}"
        )));
    }
    Ok(())
}

/// Render `date` with a strftime pattern
///
/// # Errors
/// `InvalidRequest` when the pattern cannot be rendered.
pub fn format_date(date: NaiveDate, format: &str) -> Result<String, LedgerError> {
    let mut out = String::new();
    write!(out, "{}", date.format(format))
        .map_err(|_| LedgerError::InvalidRequest(format!("invalid date format {format:?}")))?;
    Ok(out)
}

/// Filter on the entry's outgoing date
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JournalFilter {
    pub year: Option<i32>,
    pub month: Option<u32>,
}

impl JournalFilter {
    #[must_use]
    pub fn year(year: i32) -> Self {
        Self {
            year: Some(year),
            month: None,
        }
    }

    #[must_use]
    pub fn with_month(mut self, month: u32) -> Self {
        self.month = Some(month);
        self
    }

    /// # Errors
    /// `InvalidRequest` for a month outside 1..=12.
    pub fn validate(&self) -> Result<(), LedgerError> {
        match self.month {
            Some(month) if !(1..=12).contains(&month) => Err(LedgerError::InvalidRequest(
                format!("month must be between 1 and 12, got {month}"),
            )),
            _ => Ok(()),
        }
    }

    #[must_use]
    pub fn matches(&self, entry: &JournalEntry) -> bool {
        self.year.is_none_or(|y| entry.outgoing_date.year() == y)
            && self.month.is_none_or(|m| entry.outgoing_date.month() == m)
    }
}

/// One page of results
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JournalPage {
    pub entries: Vec<JournalEntry>,
    /// Size of the whole filtered set at `revision`
    pub total: usize,
    /// Cursor to pass as `as_of` for the following pages
    pub revision: u64,
}

/// Spreadsheet produced by an export
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JournalExport {
    pub file_name: String,
    pub bytes: Vec<u8>,
    pub rows: usize,
}

#[derive(Debug, Clone)]
pub struct JournalQuery {
    ledger: Arc<Ledger>,
    date_format: String,
}

impl JournalQuery {
    #[must_use]
    pub fn new(ledger: Arc<Ledger>) -> Self {
        Self {
            ledger,
            date_format: DEFAULT_DATE_FORMAT.to_string(),
        }
    }

    #[must_use]
    pub fn with_date_format(mut self, date_format: impl Into<String>) -> Self {
        self.date_format = date_format.into();
        self
    }

    /// Filtered, ordered entries visible at `as_of`, and the revision used
    fn ordered(&self, filter: &JournalFilter, as_of: Option<u64>) -> (Vec<JournalEntry>, u64) {
        self.ledger.read(|snapshot| {
            let revision = as_of.map_or(snapshot.revision, |r| r.min(snapshot.revision));
            let mut entries: Vec<JournalEntry> = snapshot
                .entries
                .values()
                .filter(|e| e.committed_revision <= revision && filter.matches(e))
                .cloned()
                .collect();
            entries.sort_by_key(|e| Reverse((e.sequence_number.year, e.sequence_number.numeric, e.id)));
            (entries, revision)
        })
    }

    /// One page of the filtered journal
    ///
    /// `limit` above `MAX_LIMIT` is lowered to it.
    ///
    /// # Errors
    /// `InvalidRequest` for an invalid filter or a zero `limit`.
    pub fn query(
        &self,
        filter: &JournalFilter,
        skip: usize,
        limit: usize,
        as_of: Option<u64>,
    ) -> Result<JournalPage, LedgerError> {
        filter.validate()?;
        if limit == 0 {
            return Err(LedgerError::InvalidRequest("limit must be at least 1".into()));
        }
        let (entries, revision) = self.ordered(filter, as_of);
        let total = entries.len();
        let entries = entries
            .into_iter()
            .skip(skip)
            .take(limit.min(MAX_LIMIT))
            .collect();
        Ok(JournalPage {
            entries,
            total,
            revision,
        })
    }

    /// The whole filtered set as a spreadsheet, same order as [`Self::query`]
    ///
    /// # Errors
    /// `InvalidRequest` for an invalid filter or date format, package errors
    /// otherwise.
    pub fn export(&self, filter: &JournalFilter) -> Result<JournalExport, LedgerError> {
        filter.validate()?;
        let (entries, _) = self.ordered(filter, None);
        let bytes = write_xlsx(&entries, &self.date_format)?;
        Ok(JournalExport {
            file_name: export_file_name(filter),
            bytes,
            rows: entries.len(),
        })
    }
}
