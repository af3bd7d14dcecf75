//! Spreadsheet export of the journal
//!
//! Writes a minimal SpreadsheetML package: one sheet, inline strings, bold
//! frozen header row.

use crate::error::LedgerError;
use crate::journal::JournalEntry;
use crate::query::{format_date, JournalFilter};
use outbox_artifact::{escape_xml, ArtifactError};
use std::fmt::Write as _;
use std::io::{Cursor, Write};
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipWriter};

pub const SHEET_NAME: &str = "Outgoing journal";

pub const XLSX_MEDIA_TYPE: &str =
    "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet";

const HEADERS: [&str; 6] = [
    "No.",
    "Outgoing number",
    "Date",
    "To whom",
    "Executor",
    "Folder path",
];

const COLUMN_WIDTHS: [u32; 6] = [6, 18, 12, 40, 30, 50];

const CONTENT_TYPES: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<Types xmlns="http://schemas.openxmlformats.org/package/2006/content-types"><Default Extension="rels" ContentType="application/vnd.openxmlformats-package.relationships+xml"/><Default Extension="xml" ContentType="application/xml"/><Override PartName="/xl/workbook.xml" ContentType="application/vnd.openxmlformats-officedocument.spreadsheetml.sheet.main+xml"/><Override PartName="/xl/worksheets/sheet1.xml" ContentType="application/vnd.openxmlformats-officedocument.spreadsheetml.worksheet+xml"/><Override PartName="/xl/styles.xml" ContentType="application/vnd.openxmlformats-officedocument.spreadsheetml.styles+xml"/></Types>"#;

const ROOT_RELS: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships"><Relationship Id="rId1" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/officeDocument" Target="xl/workbook.xml"/></Relationships>"#;

const WORKBOOK_RELS: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships"><Relationship Id="rId1" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/worksheet" Target="worksheets/sheet1.xml"/><Relationship Id="rId2" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/styles" Target="styles.xml"/></Relationships>"#;

const STYLES: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<styleSheet xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main"><fonts count="2"><font><sz val="11"/><name val="Calibri"/></font><font><b/><sz val="11"/><name val="Calibri"/></font></fonts><fills count="2"><fill><patternFill patternType="none"/></fill><fill><patternFill patternType="gray125"/></fill></fills><borders count="1"><border><left/><right/><top/><bottom/><diagonal/></border></borders><cellStyleXfs count="1"><xf numFmtId="0" fontId="0" fillId="0" borderId="0"/></cellStyleXfs><cellXfs count="2"><xf numFmtId="0" fontId="0" fillId="0" borderId="0" xfId="0"/><xf numFmtId="0" fontId="1" fillId="0" borderId="0" xfId="0" applyFont="1"/></cellXfs></styleSheet>"#;

fn workbook() -> String {
    format!(
        r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<workbook xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main" xmlns:r="http://schemas.openxmlformats.org/officeDocument/2006/relationships"><sheets><sheet name="{}" sheetId="1" r:id="rId1"/></sheets></workbook>"#,
        escape_xml(SHEET_NAME)
    )
}

fn column(index: usize) -> char {
    // six columns, A..F
    char::from(b'A' + u8::try_from(index).unwrap_or(0))
}

fn text_cell(out: &mut String, reference: &str, value: &str, style: u8) {
    let _ = write!(
        out,
        r#"<c r="{reference}" t="inlineStr" s="{style}"><is><t xml:space="preserve">{}</t></is></c>"#,
        escape_xml(value)
    );
}

fn sheet(entries: &[JournalEntry], date_format: &str) -> Result<String, LedgerError> {
    let mut out = String::from(
        r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<worksheet xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main"><sheetViews><sheetView workbookViewId="0"><pane ySplit="1" topLeftCell="A2" activePane="bottomLeft" state="frozen"/></sheetView></sheetViews><cols>"#,
    );
    for (index, width) in COLUMN_WIDTHS.iter().enumerate() {
        let n = index + 1;
        let _ = write!(out, r#"<col min="{n}" max="{n}" width="{width}" customWidth="1"/>"#);
    }
    out.push_str("</cols><sheetData>");

    out.push_str(r#"<row r="1">"#);
    for (index, header) in HEADERS.iter().enumerate() {
        text_cell(&mut out, &format!("{}1", column(index)), header, 1);
    }
    out.push_str("</row>");

    for (offset, entry) in entries.iter().enumerate() {
        let row = offset + 2;
        let _ = write!(out, r#"<row r="{row}"><c r="A{row}"><v>{}</v></c>"#, offset + 1);
        let values = [
            entry.sequence_number.formatted.clone(),
            format_date(entry.outgoing_date, date_format)?,
            entry.to_whom.clone(),
            entry.executor.clone(),
            entry.folder_path.clone(),
        ];
        for (index, value) in values.iter().enumerate() {
            text_cell(&mut out, &format!("{}{row}", column(index + 1)), value, 0);
        }
        out.push_str("</row>");
    }

    out.push_str("</sheetData></worksheet>");
    Ok(out)
}

/// Render entries, in the given order, as an `.xlsx` workbook
///
/// # Errors
/// `InvalidRequest` for a date format chrono cannot render, package errors
/// from the zip writer.
pub fn write_xlsx(entries: &[JournalEntry], date_format: &str) -> Result<Vec<u8>, LedgerError> {
    crate::query::check_date_format(date_format)?;
    let options: FileOptions<'_, ()> =
        FileOptions::default().compression_method(CompressionMethod::Deflated);
    let mut zip = ZipWriter::new(Cursor::new(Vec::new()));

    let workbook = workbook();
    let sheet = sheet(entries, date_format)?;
    let parts: [(&str, &str); 6] = [
        ("[Content_Types].xml", CONTENT_TYPES),
        ("_rels/.rels", ROOT_RELS),
        ("xl/workbook.xml", &workbook),
        ("xl/_rels/workbook.xml.rels", WORKBOOK_RELS),
        ("xl/styles.xml", STYLES),
        ("xl/worksheets/sheet1.xml", &sheet),
    ];
    for (name, body) in parts {
        zip.start_file(name, options).map_err(ArtifactError::from)?;
        zip.write_all(body.as_bytes()).map_err(ArtifactError::from)?;
    }
    Ok(zip.finish().map_err(ArtifactError::from)?.into_inner())
}

/// `journal[_YYYY][_MM].xlsx`
#[must_use]
pub fn export_file_name(filter: &JournalFilter) -> String {
    let mut name = String::from("journal");
    if let Some(year) = filter.year {
        let _ = write!(name, "_{year}");
    }
    if let Some(month) = filter.month {
        let _ = write!(name, "_{month:02}");
    }
    name.push_str(".xlsx");
    name
}
