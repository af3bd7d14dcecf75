//! Fillable outgoing templates
//!
//! A template is a `.docx` package whose body, headers or footers contain at
//! least one of the registration placeholders. Anything else (plain copies,
//! spreadsheets, scans) is rejected up front so no number is spent on it.

use crate::error::ArtifactError;
use regex::{Captures, Regex};
use std::borrow::Cow;
use std::collections::BTreeSet;
use std::io::{Cursor, Read, Write};
use std::sync::LazyLock;
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

pub const PLACEHOLDER_NUMBER: &str = "{{outgoing_no}}";
pub const PLACEHOLDER_DATE: &str = "{{outgoing_date}}";
pub const PLACEHOLDER_STAMP: &str = "{{stamp}}";

/// Every field a template may carry
pub const PLACEHOLDERS: [&str; 3] = [PLACEHOLDER_NUMBER, PLACEHOLDER_DATE, PLACEHOLDER_STAMP];

/// Name prefix of a card's main outgoing template
pub const MAIN_TEMPLATE_PREFIX: &str = "исх_";

pub const DOCX_MEDIA_TYPE: &str =
    "application/vnd.openxmlformats-officedocument.wordprocessingml.document";

const BODY_PART: &str = "word/document.xml";

/// True for `.docx` names (case-insensitive)
#[must_use]
pub fn is_docx_name(file_name: &str) -> bool {
    file_name
        .rsplit_once('.')
        .is_some_and(|(_, ext)| ext.eq_ignore_ascii_case("docx"))
}

/// True when the name marks the card's main outgoing template
#[must_use]
pub fn is_main_template_name(file_name: &str) -> bool {
    file_name.starts_with(MAIN_TEMPLATE_PREFIX) && is_docx_name(file_name)
}

/// Pick the main template among a card's file names
pub fn find_main_template<'a, I>(names: I) -> Option<&'a str>
where
    I: IntoIterator<Item = &'a str>,
{
    names.into_iter().find(|name| is_main_template_name(name))
}

fn unsupported_reason() -> String {
    format!(
        "only fillable outgoing templates are accepted; choose a .docx containing at least one of the fields {}",
        PLACEHOLDERS.join(", ")
    )
}

static PARAGRAPH: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)<w:p(?:\s[^>]*[^/])?>.*?</w:p>").expect("paragraph regex is valid")
});

static TEXT_RUN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)<w:t(?:\s[^>]*[^/])?>(.*?)</w:t>").expect("text run regex is valid")
});

/// Word splits typed text over several runs (spell check, edit history), so
/// a placeholder may be spread over consecutive `<w:t>` elements. Where that
/// happens, the paragraph's text is moved into its first text element and
/// the others are emptied.
fn merge_split_placeholders(xml: &str) -> Cow<'_, str> {
    PARAGRAPH.replace_all(xml, |paragraph: &Captures<'_>| {
        let paragraph = &paragraph[0];
        let runs: Vec<&str> = TEXT_RUN
            .captures_iter(paragraph)
            .filter_map(|run| run.get(1).map(|m| m.as_str()))
            .collect();
        let joined = runs.concat();
        let split = PLACEHOLDERS.iter().any(|placeholder| {
            let whole: usize = runs.iter().map(|run| run.matches(placeholder).count()).sum();
            joined.matches(placeholder).count() > whole
        });
        if !split {
            return paragraph.to_string();
        }
        let mut first = true;
        TEXT_RUN
            .replace_all(paragraph, |_: &Captures<'_>| {
                if std::mem::take(&mut first) {
                    format!("<w:t xml:space=\"preserve\">{joined}</w:t>")
                } else {
                    "<w:t></w:t>".to_string()
                }
            })
            .into_owned()
    })
}

/// Parts that are scanned and rewritten
fn is_text_part(name: &str) -> bool {
    name == BODY_PART
        || (name.starts_with("word/header") && name.ends_with(".xml"))
        || (name.starts_with("word/footer") && name.ends_with(".xml"))
}

/// Values substituted into a template
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderFields {
    pub formatted_number: String,
    pub outgoing_date: String,
    pub stamp_text: String,
}

/// A parsed, validated template package
#[derive(Debug, Clone)]
pub struct TemplateDocument {
    file_name: String,
    parts: Vec<Part>,
    found: BTreeSet<&'static str>,
}

#[derive(Debug, Clone)]
struct Part {
    name: String,
    body: PartBody,
}

#[derive(Debug, Clone)]
enum PartBody {
    Dir,
    /// Body, header or footer XML with split placeholders already merged
    Xml(String),
    Raw(Vec<u8>),
}

impl TemplateDocument {
    /// Parse and validate template bytes
    ///
    /// # Errors
    /// `UnsupportedFormat` when the file is not a `.docx` package, a text
    /// part is not UTF-8, or no registration placeholder is present.
    pub fn inspect(file_name: &str, bytes: &[u8]) -> Result<Self, ArtifactError> {
        if !is_docx_name(file_name) {
            return Err(ArtifactError::unsupported(file_name, unsupported_reason()));
        }

        let mut archive = ZipArchive::new(Cursor::new(bytes))
            .map_err(|_| ArtifactError::unsupported(file_name, unsupported_reason()))?;

        let mut parts = Vec::with_capacity(archive.len());
        let mut found = BTreeSet::new();
        let mut has_body = false;

        for index in 0..archive.len() {
            let mut entry = archive
                .by_index(index)
                .map_err(|_| ArtifactError::unsupported(file_name, unsupported_reason()))?;
            let name = entry.name().to_string();
            if entry.is_dir() {
                parts.push(Part { name, body: PartBody::Dir });
                continue;
            }
            let mut data = Vec::new();
            entry.read_to_end(&mut data)?;

            if !is_text_part(&name) {
                parts.push(Part { name, body: PartBody::Raw(data) });
                continue;
            }
            has_body |= name == BODY_PART;
            let xml = String::from_utf8(data).map_err(|_| {
                ArtifactError::unsupported(file_name, format!("part {name} is not UTF-8 text"))
            })?;
            let xml = merge_split_placeholders(&xml).into_owned();
            for placeholder in PLACEHOLDERS {
                if xml.contains(placeholder) {
                    found.insert(placeholder);
                }
            }
            parts.push(Part { name, body: PartBody::Xml(xml) });
        }

        if !has_body || found.is_empty() {
            return Err(ArtifactError::unsupported(file_name, unsupported_reason()));
        }

        Ok(Self {
            file_name: file_name.to_string(),
            parts,
            found,
        })
    }

    #[inline]
    #[must_use]
    pub fn file_name(&self) -> &str {
        &self.file_name
    }

    /// Placeholders present anywhere in the template
    #[must_use]
    pub fn placeholders(&self) -> Vec<&'static str> {
        self.found.iter().copied().collect()
    }

    /// Produce a filled copy of the package
    ///
    /// # Errors
    /// Returns a package error if the output archive cannot be written.
    pub fn render(&self, fields: &RenderFields) -> Result<Vec<u8>, ArtifactError> {
        let options: FileOptions<'_, ()> =
            FileOptions::default().compression_method(CompressionMethod::Deflated);
        let mut zip = ZipWriter::new(Cursor::new(Vec::new()));

        for part in &self.parts {
            match &part.body {
                PartBody::Dir => zip.add_directory(part.name.as_str(), options)?,
                PartBody::Xml(xml) => {
                    zip.start_file(part.name.as_str(), options)?;
                    zip.write_all(fill(xml, fields).as_bytes())?;
                }
                PartBody::Raw(data) => {
                    zip.start_file(part.name.as_str(), options)?;
                    zip.write_all(data)?;
                }
            }
        }

        Ok(zip.finish()?.into_inner())
    }
}

fn fill(xml: &str, fields: &RenderFields) -> String {
    xml.replace(PLACEHOLDER_NUMBER, &escape_xml(&fields.formatted_number))
        .replace(PLACEHOLDER_DATE, &escape_xml(&fields.outgoing_date))
        .replace(PLACEHOLDER_STAMP, &stamp_runs(&fields.stamp_text))
}

/// Stamp lines become explicit breaks inside the same run
fn stamp_runs(text: &str) -> String {
    text.lines()
        .map(escape_xml)
        .collect::<Vec<_>>()
        .join("</w:t><w:br/><w:t xml:space=\"preserve\">")
}

/// Escape text for inclusion in XML character data
#[must_use]
pub fn escape_xml(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for ch in text.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            _ => out.push(ch),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn package(parts: &[(&str, &str)]) -> Vec<u8> {
        let options: FileOptions<'_, ()> =
            FileOptions::default().compression_method(CompressionMethod::Deflated);
        let mut zip = ZipWriter::new(Cursor::new(Vec::new()));
        for (name, body) in parts {
            zip.start_file(*name, options).unwrap();
            zip.write_all(body.as_bytes()).unwrap();
        }
        zip.finish().unwrap().into_inner()
    }

    fn read_part(bytes: &[u8], name: &str) -> String {
        let mut archive = ZipArchive::new(Cursor::new(bytes)).unwrap();
        let mut entry = archive.by_name(name).unwrap();
        let mut out = String::new();
        entry.read_to_string(&mut out).unwrap();
        out
    }

    fn fields() -> RenderFields {
        RenderFields {
            formatted_number: "7-10".into(),
            outgoing_date: "05.03.2024".into(),
            stamp_text: "SIGNED\nOwner: A & B".into(),
        }
    }

    #[test]
    fn main_template_name_detection() {
        assert!(is_main_template_name("исх_письмо.docx"));
        assert!(is_main_template_name("исх_письмо.DOCX"));
        assert!(!is_main_template_name("письмо.docx"));
        assert!(!is_main_template_name("исх_письмо.pdf"));
        assert_eq!(
            find_main_template(["a.pdf", "исх_b.docx", "исх_c.docx"]),
            Some("исх_b.docx")
        );
    }

    #[test]
    fn rejects_non_docx_name() {
        let err = TemplateDocument::inspect("scan.pdf", b"%PDF").unwrap_err();
        let ArtifactError::UnsupportedFormat { reason, .. } = err else {
            panic!("expected UnsupportedFormat");
        };
        for placeholder in PLACEHOLDERS {
            assert!(reason.contains(placeholder));
        }
    }

    #[test]
    fn rejects_corrupt_package() {
        let err = TemplateDocument::inspect("letter.docx", b"not a zip").unwrap_err();
        assert!(matches!(err, ArtifactError::UnsupportedFormat { .. }));
    }

    #[test]
    fn rejects_docx_without_placeholders() {
        let bytes = package(&[(BODY_PART, "<w:t>plain copy</w:t>")]);
        let err = TemplateDocument::inspect("copy.docx", &bytes).unwrap_err();
        assert!(matches!(err, ArtifactError::UnsupportedFormat { .. }));
    }

    #[test]
    fn placeholder_in_footer_is_enough() {
        let bytes = package(&[
            (BODY_PART, "<w:t>body</w:t>"),
            ("word/footer1.xml", "<w:t>{{stamp}}</w:t>"),
        ]);
        let doc = TemplateDocument::inspect("исх_x.docx", &bytes).unwrap();
        assert_eq!(doc.placeholders(), vec![PLACEHOLDER_STAMP]);
    }

    #[test]
    fn render_fills_body_headers_and_escapes() {
        let bytes = package(&[
            ("[Content_Types].xml", "<Types/>"),
            (BODY_PART, "<w:t>No {{outgoing_no}} of {{outgoing_date}}</w:t><w:t>{{stamp}}</w:t>"),
            ("word/header1.xml", "<w:t>{{outgoing_no}}</w:t>"),
        ]);
        let doc = TemplateDocument::inspect("исх_x.docx", &bytes).unwrap();
        let rendered = doc.render(&fields()).unwrap();

        let body = read_part(&rendered, BODY_PART);
        assert!(body.contains("No 7-10 of 05.03.2024"));
        assert!(body.contains("SIGNED</w:t><w:br/>"));
        assert!(body.contains("Owner: A &amp; B"));
        assert!(!body.contains("{{"));
        assert_eq!(read_part(&rendered, "word/header1.xml"), "<w:t>7-10</w:t>");
        assert_eq!(read_part(&rendered, "[Content_Types].xml"), "<Types/>");
    }

    #[test]
    fn placeholder_split_across_runs_is_found_and_filled() {
        let body = concat!(
            r#"<w:body><w:p w:rsidR="00A1"><w:r><w:t>No </w:t></w:r>"#,
            r#"<w:r><w:rPr><w:lang w:val="ru-RU"/></w:rPr><w:t>{{outgoing</w:t></w:r>"#,
            r#"<w:proofErr w:type="spellStart"/><w:r><w:t xml:space="preserve">_no}} </w:t></w:r></w:p>"#,
            r#"<w:p><w:r><w:t>untouched</w:t></w:r><w:r><w:t> text</w:t></w:r></w:p></w:body>"#,
        );
        let bytes = package(&[(BODY_PART, body)]);
        let doc = TemplateDocument::inspect("исх_x.docx", &bytes).unwrap();
        assert_eq!(doc.placeholders(), vec![PLACEHOLDER_NUMBER]);

        let rendered = read_part(&doc.render(&fields()).unwrap(), BODY_PART);
        assert!(rendered.contains(r#"<w:t xml:space="preserve">No 7-10 </w:t>"#));
        assert!(!rendered.contains("{{"));
        assert!(!rendered.contains("_no}}"));
        // paragraphs without a split placeholder keep their runs
        assert!(rendered.contains("<w:t>untouched</w:t></w:r><w:r><w:t> text</w:t>"));
    }

    #[test]
    fn text_outside_paragraphs_is_not_merged() {
        let merged = merge_split_placeholders("<w:t>{{outgoing</w:t><w:t>_no}}</w:t>");
        assert!(matches!(merged, Cow::Borrowed(_)));
        let empty = merge_split_placeholders(r#"<w:p w:rsidR="1"/><w:p><w:r><w:t>{{st</w:t><w:t/><w:t>amp}}</w:t></w:r></w:p>"#);
        assert!(empty.contains(r#"<w:p w:rsidR="1"/>"#));
        assert!(empty.contains(r#"<w:t xml:space="preserve">{{stamp}}</w:t>"#));
    }

    #[test]
    fn non_utf8_text_part_is_rejected() {
        let options: FileOptions<'_, ()> = FileOptions::default();
        let mut zip = ZipWriter::new(Cursor::new(Vec::new()));
        zip.start_file(BODY_PART, options).unwrap();
        zip.write_all(b"<w:t>{{outgoing_no}}\xff</w:t>").unwrap();
        let bytes = zip.finish().unwrap().into_inner();

        let err = TemplateDocument::inspect("исх_x.docx", &bytes).unwrap_err();
        let ArtifactError::UnsupportedFormat { reason, .. } = err else {
            panic!("expected UnsupportedFormat");
        };
        assert!(reason.contains("UTF-8"));
    }

    #[test]
    fn escape_covers_markup_characters() {
        assert_eq!(escape_xml("<a href='x'>&\""), "&lt;a href=&apos;x&apos;&gt;&amp;&quot;");
    }
}
