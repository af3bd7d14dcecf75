//! Journal entry types

use crate::error::LedgerError;
use crate::sequence::SequenceNumber;
use crate::signature::Thumbprint;
use chrono::{DateTime, NaiveDate, Utc};
use outbox_artifact::{relative_folder, ArtifactId, ContentHash};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntryId(pub u64);

impl fmt::Display for EntryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Correspondence metadata supplied with a submission
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JournalFields {
    pub outgoing_date: NaiveDate,
    pub to_whom: String,
    pub executor: String,
}

/// What was signed, by whom
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactRef {
    pub artifact_id: ArtifactId,
    pub file_name: String,
    pub content_hash: ContentHash,
    pub credential_thumbprint: Thumbprint,
    pub signer_name: Option<String>,
}

/// A committed journal record
///
/// Never exists without an accepted signature.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JournalEntry {
    pub id: EntryId,
    pub sequence_number: SequenceNumber,
    pub outgoing_date: NaiveDate,
    pub to_whom: String,
    pub executor: String,
    /// Display path; editable
    pub folder_path: String,
    /// Folder the committed files were placed in. Set once at commit and the
    /// only folder deletion ever removes.
    pub storage_folder: String,
    pub artifact_ref: ArtifactRef,
    /// Ledger revision at which the entry became visible
    pub committed_revision: u64,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

/// Editable fields of an entry
///
/// The id and the allocation key are not editable; payloads naming any other
/// field are rejected at deserialization.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EntryEdit {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub formatted_number: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub outgoing_date: Option<NaiveDate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to_whom: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub executor: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub folder_path: Option<String>,
}

impl EntryEdit {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.formatted_number.is_none()
            && self.outgoing_date.is_none()
            && self.to_whom.is_none()
            && self.executor.is_none()
            && self.folder_path.is_none()
    }

    /// Apply to an entry; returns the names of the fields that changed
    ///
    /// # Errors
    /// `InvalidRequest` for an empty edit, a blank number or a folder outside
    /// the storage root. The entry is untouched on error.
    pub fn apply(&self, entry: &mut JournalEntry) -> Result<Vec<&'static str>, LedgerError> {
        if self.is_empty() {
            return Err(LedgerError::InvalidRequest("edit changes nothing".into()));
        }
        if let Some(formatted) = &self.formatted_number {
            if formatted.trim().is_empty() {
                return Err(LedgerError::InvalidRequest(
                    "formatted number must not be blank".into(),
                ));
            }
        }
        if let Some(folder) = &self.folder_path {
            relative_folder(folder)?;
        }

        let mut changed = Vec::new();
        if let Some(formatted) = &self.formatted_number {
            entry.sequence_number.formatted = formatted.trim().to_string();
            changed.push("formatted_number");
        }
        if let Some(date) = self.outgoing_date {
            entry.outgoing_date = date;
            changed.push("outgoing_date");
        }
        if let Some(to_whom) = &self.to_whom {
            entry.to_whom.clone_from(to_whom);
            changed.push("to_whom");
        }
        if let Some(executor) = &self.executor {
            entry.executor.clone_from(executor);
            changed.push("executor");
        }
        if let Some(folder) = &self.folder_path {
            entry.folder_path.clone_from(folder);
            changed.push("folder_path");
        }
        Ok(changed)
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;

    pub(crate) fn entry(id: u64, year: i32, numeric: u64, date: NaiveDate) -> JournalEntry {
        JournalEntry {
            id: EntryId(id),
            sequence_number: SequenceNumber {
                numeric,
                year,
                formatted: numeric.to_string(),
            },
            outgoing_date: date,
            to_whom: format!("Addressee {id}"),
            executor: "Executor".into(),
            folder_path: format!("journal/{year}/{numeric:05}_{numeric}"),
            storage_folder: format!("journal/{year}/{numeric:05}_{numeric}"),
            artifact_ref: ArtifactRef {
                artifact_id: ArtifactId::new(),
                file_name: format!("{numeric}.pdf"),
                content_hash: ContentHash::compute(&numeric.to_le_bytes()),
                credential_thumbprint: Thumbprint::new("AB01"),
                signer_name: None,
            },
            committed_revision: id,
            created_at: Utc::now(),
            updated_at: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::fixtures::entry;
    use super::*;

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 3, 5).unwrap()
    }

    #[test]
    fn edit_changes_display_number_but_not_allocation_key() {
        let mut e = entry(1, 2024, 7, date());
        let edit = EntryEdit {
            formatted_number: Some("7-10".into()),
            to_whom: Some("Ministry".into()),
            ..EntryEdit::default()
        };
        let changed = edit.apply(&mut e).unwrap();
        assert_eq!(changed, vec!["formatted_number", "to_whom"]);
        assert_eq!(e.sequence_number.key(), (2024, 7));
        assert_eq!(e.sequence_number.formatted, "7-10");
        assert_eq!(e.to_whom, "Ministry");
    }

    #[test]
    fn folder_edit_relabels_without_moving_storage() {
        let mut e = entry(1, 2024, 7, date());
        let edit = EntryEdit {
            folder_path: Some("journal/2024/00008_8".into()),
            ..EntryEdit::default()
        };
        edit.apply(&mut e).unwrap();
        assert_eq!(e.folder_path, "journal/2024/00008_8");
        assert_eq!(e.storage_folder, "journal/2024/00007_7");
        let result: Result<EntryEdit, _> = serde_json::from_str(r#"{"storage_folder": "x"}"#);
        assert!(result.is_err());
    }

    #[test]
    fn id_is_not_an_editable_field() {
        let result: Result<EntryEdit, _> = serde_json::from_str(r#"{"id": 5, "to_whom": "x"}"#);
        assert!(result.is_err());
        let result: Result<EntryEdit, _> = serde_json::from_str(r#"{"numeric": 5}"#);
        assert!(result.is_err());
    }

    #[test]
    fn invalid_edits_leave_entry_untouched() {
        let mut e = entry(1, 2024, 7, date());
        let before = e.clone();
        assert!(EntryEdit::default().apply(&mut e).is_err());
        let escape = EntryEdit {
            to_whom: Some("changed".into()),
            folder_path: Some("../outside".into()),
            ..EntryEdit::default()
        };
        assert!(escape.apply(&mut e).is_err());
        assert_eq!(e, before);
    }
}
