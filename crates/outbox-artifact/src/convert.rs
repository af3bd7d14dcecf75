//! Fixed-layout conversion
//!
//! A rendered template is converted to a fixed-layout format before anyone
//! signs it. The signature is always taken over the converter's output.

use crate::error::ArtifactError;
use crate::template::DOCX_MEDIA_TYPE;
use async_trait::async_trait;
use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::process::Command;

pub const PDF_MEDIA_TYPE: &str = "application/pdf";

/// Output of a conversion
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Converted {
    pub file_name: String,
    pub media_type: String,
    pub bytes: Vec<u8>,
}

/// Converts a filled template into the artifact that will be signed
#[async_trait]
pub trait DocumentConverter: Send + Sync {
    /// Convert `bytes` of `file_name`
    async fn convert(&self, file_name: &str, bytes: Vec<u8>) -> Result<Converted, ArtifactError>;

    /// Adapter name for logs
    fn name(&self) -> &'static str;
}

/// Keeps the filled `.docx` as the signed artifact
#[derive(Debug, Clone, Copy, Default)]
pub struct PassthroughConverter;

#[async_trait]
impl DocumentConverter for PassthroughConverter {
    async fn convert(&self, file_name: &str, bytes: Vec<u8>) -> Result<Converted, ArtifactError> {
        Ok(Converted {
            file_name: file_name.to_string(),
            media_type: DOCX_MEDIA_TYPE.to_string(),
            bytes,
        })
    }

    fn name(&self) -> &'static str {
        "passthrough"
    }
}

/// Headless LibreOffice conversion to PDF
#[derive(Debug, Clone)]
pub struct SofficeConverter {
    binary: PathBuf,
    timeout: Duration,
}

impl SofficeConverter {
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

    const KNOWN_LOCATIONS: [&'static str; 4] = [
        "/usr/bin/soffice",
        "/usr/bin/libreoffice",
        "/usr/lib/libreoffice/program/soffice",
        "/opt/libreoffice/program/soffice",
    ];

    #[must_use]
    pub fn new(binary: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            binary: binary.into(),
            timeout,
        }
    }

    const BINARY_NAMES: [&'static str; 2] = ["soffice", "libreoffice"];

    /// Find an installed soffice binary on `PATH` or in the usual install
    /// folders
    #[must_use]
    pub fn discover(timeout: Duration) -> Option<Self> {
        Self::discover_in(std::env::var_os("PATH").as_deref(), timeout)
    }

    /// [`discover`](Self::discover) against an explicit search path
    #[must_use]
    pub fn discover_in(search_path: Option<&OsStr>, timeout: Duration) -> Option<Self> {
        let on_path = search_path
            .into_iter()
            .flat_map(std::env::split_paths)
            .flat_map(|dir| {
                Self::BINARY_NAMES
                    .iter()
                    .map(move |name| dir.join(format!("{name}{}", std::env::consts::EXE_SUFFIX)))
            });
        on_path
            .chain(Self::KNOWN_LOCATIONS.iter().map(PathBuf::from))
            .find(|path| path.is_file())
            .map(|path| Self::new(path, timeout))
    }

    #[inline]
    #[must_use]
    pub fn binary(&self) -> &Path {
        &self.binary
    }
}

fn pdf_name(file_name: &str) -> String {
    let stem = file_name
        .rsplit_once('.')
        .map_or(file_name, |(stem, _)| stem);
    format!("{stem}.pdf")
}

#[async_trait]
impl DocumentConverter for SofficeConverter {
    async fn convert(&self, file_name: &str, bytes: Vec<u8>) -> Result<Converted, ArtifactError> {
        let workdir = tempfile::tempdir()?;
        // soffice names its output after the input stem
        let input = workdir.path().join("document.docx");
        tokio::fs::write(&input, &bytes).await?;

        let mut command = Command::new(&self.binary);
        command
            .arg("--headless")
            .arg("--convert-to")
            .arg("pdf")
            .arg("--outdir")
            .arg(workdir.path())
            .arg(&input)
            .kill_on_drop(true);

        let output = tokio::time::timeout(self.timeout, command.output())
            .await
            .map_err(|_| {
                ArtifactError::ConversionFailed(format!(
                    "soffice did not finish within {}s",
                    self.timeout.as_secs()
                ))
            })?
            .map_err(|e| ArtifactError::ConversionFailed(format!("cannot run soffice: {e}")))?;

        if !output.status.success() {
            return Err(ArtifactError::ConversionFailed(format!(
                "soffice exited with {}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        let produced = workdir.path().join("document.pdf");
        let pdf = tokio::fs::read(&produced).await.map_err(|_| {
            ArtifactError::ConversionFailed("soffice produced no PDF output".to_string())
        })?;

        tracing::debug!(file = %file_name, bytes = pdf.len(), "converted to pdf");
        Ok(Converted {
            file_name: pdf_name(file_name),
            media_type: PDF_MEDIA_TYPE.to_string(),
            bytes: pdf,
        })
    }

    fn name(&self) -> &'static str {
        "soffice"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn passthrough_keeps_bytes_and_name() {
        let converted = PassthroughConverter
            .convert("исх_a.docx", b"docx".to_vec())
            .await
            .unwrap();
        assert_eq!(converted.file_name, "исх_a.docx");
        assert_eq!(converted.bytes, b"docx");
        assert_eq!(converted.media_type, DOCX_MEDIA_TYPE);
    }

    #[test]
    fn pdf_name_swaps_extension() {
        assert_eq!(pdf_name("исх_a.docx"), "исх_a.pdf");
        assert_eq!(pdf_name("noext"), "noext.pdf");
    }

    #[test]
    fn discovery_searches_the_given_path() {
        let empty = tempfile::tempdir().unwrap();
        let bin = tempfile::tempdir().unwrap();
        let binary = bin
            .path()
            .join(format!("libreoffice{}", std::env::consts::EXE_SUFFIX));
        std::fs::write(&binary, b"#!/bin/sh\n").unwrap();

        let search = std::env::join_paths([empty.path(), bin.path()]).unwrap();
        let found = SofficeConverter::discover_in(Some(&search), Duration::from_secs(1)).unwrap();
        assert_eq!(found.binary(), binary);

        // a directory named like the binary does not count
        let decoy = tempfile::tempdir().unwrap();
        std::fs::create_dir(decoy.path().join("soffice")).unwrap();
        let search = std::env::join_paths([decoy.path(), bin.path()]).unwrap();
        let found = SofficeConverter::discover_in(Some(&search), Duration::from_secs(1)).unwrap();
        assert_eq!(found.binary(), binary);
    }

    #[tokio::test]
    async fn missing_binary_is_conversion_failure() {
        let converter = SofficeConverter::new("/nonexistent/soffice", Duration::from_secs(5));
        let err = converter.convert("a.docx", b"x".to_vec()).await.unwrap_err();
        assert!(matches!(err, ArtifactError::ConversionFailed(_)));
        assert!(err.is_retryable());
    }
}
