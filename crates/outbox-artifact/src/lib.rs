//! Outbox Artifact System
//!
//! Rendered outgoing documents and the templates they come from.
//!
//! # Core Concepts
//!
//! - [`Artifact`]: one rendered document awaiting signature
//! - [`ContentHash`]: SHA-256 digest binding a signature to exact bytes
//! - [`TemplateDocument`]: a validated `.docx` template with placeholders
//! - [`DocumentConverter`]: fixed-layout conversion (LibreOffice or passthrough)
//! - [`ArtifactStore`]: staging and journal-folder storage
//! - [`ArtifactPreparer`]: fetch, fill, convert and stage
//!
//! # Example
//!
//! ```rust,ignore
//! use outbox_artifact::{ArtifactPreparer, CardId, RenderFields};
//!
//! let artifact = preparer.prepare(CardId(42), "исх_letter.docx", &fields).await?;
//! println!("staged {} ({} bytes)", artifact.artifact_id, artifact.byte_length);
//! ```

#![warn(unreachable_pub)]
#![allow(missing_docs)]

mod artifact;
mod convert;
mod error;
mod hash;
mod preparer;
mod store;
mod template;

pub use artifact::{Artifact, ArtifactId, CardId};
pub use convert::{
    Converted, DocumentConverter, PassthroughConverter, SofficeConverter, PDF_MEDIA_TYPE,
};
pub use error::ArtifactError;
pub use hash::{ContentHash, HashError};
pub use preparer::{ArtifactPreparer, TemplateSource};
pub use store::{
    relative_folder, sanitize_segment, ArtifactStore, FsArtifactStore, MemoryArtifactStore,
    StoredFile,
};
pub use template::{
    escape_xml, find_main_template, is_docx_name, is_main_template_name, RenderFields,
    TemplateDocument, DOCX_MEDIA_TYPE, MAIN_TEMPLATE_PREFIX, PLACEHOLDERS, PLACEHOLDER_DATE,
    PLACEHOLDER_NUMBER, PLACEHOLDER_STAMP,
};

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
