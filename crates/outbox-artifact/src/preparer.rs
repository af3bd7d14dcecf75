//! Artifact Preparer
//!
//! Fetches a card's template, fills the registration placeholders, converts
//! the result and stages the bytes under a fresh [`ArtifactId`]. Every call
//! produces a new artifact; callers sign the most recent one.
//!
//! [`ArtifactId`]: crate::artifact::ArtifactId

use crate::artifact::{Artifact, CardId};
use crate::convert::DocumentConverter;
use crate::error::ArtifactError;
use crate::store::ArtifactStore;
use crate::template::{RenderFields, TemplateDocument};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::info;

/// Where template bytes come from (the project board in production)
#[async_trait]
pub trait TemplateSource: Send + Sync {
    async fn fetch(&self, card_id: CardId, file_name: &str) -> Result<Vec<u8>, ArtifactError>;
}

pub struct ArtifactPreparer {
    source: Arc<dyn TemplateSource>,
    converter: Arc<dyn DocumentConverter>,
    store: Arc<dyn ArtifactStore>,
}

impl ArtifactPreparer {
    pub fn new(
        source: Arc<dyn TemplateSource>,
        converter: Arc<dyn DocumentConverter>,
        store: Arc<dyn ArtifactStore>,
    ) -> Self {
        Self {
            source,
            converter,
            store,
        }
    }

    #[inline]
    #[must_use]
    pub fn store(&self) -> &Arc<dyn ArtifactStore> {
        &self.store
    }

    /// Fetch and validate a template without rendering it
    ///
    /// # Errors
    /// `UnsupportedFormat` for non-templates, `SourceUnavailable` when the
    /// source cannot deliver the file.
    pub async fn inspect(
        &self,
        card_id: CardId,
        file_name: &str,
    ) -> Result<TemplateDocument, ArtifactError> {
        let bytes = self.source.fetch(card_id, file_name).await?;
        TemplateDocument::inspect(file_name, &bytes)
    }

    /// Fill, convert and stage an inspected template
    ///
    /// # Errors
    /// Conversion and storage failures.
    pub async fn render(
        &self,
        card_id: CardId,
        template: &TemplateDocument,
        fields: &RenderFields,
    ) -> Result<Artifact, ArtifactError> {
        let filled = template.render(fields)?;
        let converted = self.converter.convert(template.file_name(), filled).await?;

        let artifact = Artifact::describe(
            card_id,
            template.file_name(),
            converted.file_name,
            converted.media_type,
            &converted.bytes,
        );
        self.store.stage(&artifact, &converted.bytes).await?;

        info!(
            artifact_id = %artifact.artifact_id,
            card_id = %card_id,
            converter = self.converter.name(),
            bytes = artifact.byte_length,
            hash = %artifact.content_hash.short(),
            "artifact staged"
        );
        Ok(artifact)
    }

    /// Inspect and render in one step
    ///
    /// # Errors
    /// See [`Self::inspect`] and [`Self::render`].
    pub async fn prepare(
        &self,
        card_id: CardId,
        file_name: &str,
        fields: &RenderFields,
    ) -> Result<Artifact, ArtifactError> {
        let template = self.inspect(card_id, file_name).await?;
        self.render(card_id, &template, fields).await
    }
}
