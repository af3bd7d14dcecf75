//! Testing utilities for the Outbox workspace
//!
//! Shared fixtures: minimal `.docx` templates, in-memory template sources,
//! and journal field builders.

#![allow(missing_docs)]

use async_trait::async_trait;
use chrono::NaiveDate;
use dashmap::DashMap;
use outbox_artifact::{ArtifactError, CardId, TemplateSource, PLACEHOLDER_DATE, PLACEHOLDER_NUMBER, PLACEHOLDER_STAMP};
use outbox_ledger::JournalFields;
use std::io::{Cursor, Read, Write};
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

const CONTENT_TYPES: &str = r#"<?xml version="1.0" encoding="UTF-8"?><Types xmlns="http://schemas.openxmlformats.org/package/2006/content-types"><Default Extension="xml" ContentType="application/xml"/><Override PartName="/word/document.xml" ContentType="application/vnd.openxmlformats-officedocument.wordprocessingml.document.main+xml"/></Types>"#;

fn paragraph(text: &str) -> String {
    format!(r#"<w:p><w:r><w:t xml:space="preserve">{text}</w:t></w:r></w:p>"#)
}

fn document_xml(paragraphs: &[&str]) -> String {
    let body: String = paragraphs.iter().map(|p| paragraph(p)).collect();
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?><w:document xmlns:w="http://schemas.openxmlformats.org/wordprocessingml/2006/main"><w:body>{body}</w:body></w:document>"#
    )
}

/// Zip `parts` into a package
pub fn package(parts: &[(&str, &str)]) -> Vec<u8> {
    let options: FileOptions<'_, ()> = FileOptions::default().compression_method(CompressionMethod::Deflated);
    let mut zip = ZipWriter::new(Cursor::new(Vec::new()));
    for (name, body) in parts {
        zip.start_file(*name, options).unwrap();
        zip.write_all(body.as_bytes()).unwrap();
    }
    zip.finish().unwrap().into_inner()
}

/// A `.docx` whose body holds one paragraph per entry
pub fn docx(paragraphs: &[&str]) -> Vec<u8> {
    package(&[("[Content_Types].xml", CONTENT_TYPES), ("word/document.xml", &document_xml(paragraphs))])
}

/// A fillable outgoing template carrying all three placeholders
pub fn outgoing_template() -> Vec<u8> {
    let number = format!("No. {PLACEHOLDER_NUMBER} of {PLACEHOLDER_DATE}");
    docx(&[&number, "To whom it may concern", PLACEHOLDER_STAMP])
}

/// A `.docx` without any placeholder
pub fn plain_copy() -> Vec<u8> {
    docx(&["Just a copy of the letter"])
}

/// Body XML of a `.docx` (or the `.docx` produced by the passthrough converter)
pub fn read_body(bytes: &[u8]) -> String {
    let mut archive = ZipArchive::new(Cursor::new(bytes)).unwrap();
    let mut entry = archive.by_name("word/document.xml").unwrap();
    let mut out = String::new();
    entry.read_to_string(&mut out).unwrap();
    out
}

pub fn date(year: i32, month: u32, day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(year, month, day).unwrap()
}

pub fn journal_fields(outgoing_date: NaiveDate, to_whom: &str, executor: &str) -> JournalFields {
    JournalFields {
        outgoing_date,
        to_whom: to_whom.to_string(),
        executor: executor.to_string(),
    }
}

/// Template files keyed by card and name
#[derive(Debug, Default)]
pub struct StaticTemplates {
    files: DashMap<(CardId, String), Vec<u8>>,
}

impl StaticTemplates {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(self, card_id: CardId, file_name: &str, bytes: Vec<u8>) -> Self {
        self.files.insert((card_id, file_name.to_string()), bytes);
        self
    }
}

#[async_trait]
impl TemplateSource for StaticTemplates {
    async fn fetch(&self, card_id: CardId, file_name: &str) -> Result<Vec<u8>, ArtifactError> {
        self.files
            .get(&(card_id, file_name.to_string()))
            .map(|bytes| bytes.clone())
            .ok_or_else(|| ArtifactError::SourceUnavailable(format!("card {card_id} has no file {file_name}")))
    }
}
