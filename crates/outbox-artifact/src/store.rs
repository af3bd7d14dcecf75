//! Artifact storage
//!
//! Rendered bytes are staged under their [`ArtifactId`] before the preparer
//! returns. Once a journal entry references an artifact, its bytes are
//! placed into the entry's folder and the staged copy is discarded.
//!
//! Folder paths are relative (`journal/2024/00007_7-10`) and must stay inside
//! the store root.

use crate::artifact::{Artifact, ArtifactId};
use crate::error::ArtifactError;
use async_trait::async_trait;
use dashmap::DashMap;
use std::path::{Component, Path, PathBuf};
use tracing::warn;

/// One file written into an entry folder
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredFile {
    pub name: String,
    pub bytes: Vec<u8>,
}

impl StoredFile {
    pub fn new(name: impl Into<String>, bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            name: name.into(),
            bytes: bytes.into(),
        }
    }
}

/// Storage for staged artifacts and journal folders
#[async_trait]
pub trait ArtifactStore: Send + Sync {
    /// Persist rendered bytes under the artifact's id
    async fn stage(&self, artifact: &Artifact, bytes: &[u8]) -> Result<(), ArtifactError>;

    /// Metadata recorded at staging time
    async fn describe(&self, id: ArtifactId) -> Result<Artifact, ArtifactError>;

    /// Staged bytes exactly as stored
    async fn read(&self, id: ArtifactId) -> Result<Vec<u8>, ArtifactError>;

    /// Write files into a journal folder, creating it; returns the folder path
    async fn place(&self, folder: &str, files: Vec<StoredFile>) -> Result<String, ArtifactError>;

    /// Drop the staged copy; missing ids are ignored
    async fn discard_staged(&self, id: ArtifactId) -> Result<(), ArtifactError>;

    /// Metadata of every artifact still staged
    async fn staged(&self) -> Result<Vec<Artifact>, ArtifactError>;

    /// Remove a journal folder and its contents; missing folders are ignored
    async fn remove_folder(&self, folder: &str) -> Result<(), ArtifactError>;
}

/// Replace characters that are unsafe in a path segment
#[must_use]
pub fn sanitize_segment(raw: &str) -> String {
    let cleaned: String = raw
        .trim()
        .chars()
        .map(|c| {
            if c.is_alphanumeric() || matches!(c, '-' | '_' | '.') {
                c
            } else {
                '_'
            }
        })
        .collect();
    let cleaned = cleaned.trim_matches('.').to_string();
    if cleaned.is_empty() {
        "_".to_string()
    } else {
        cleaned
    }
}

/// Validate a relative folder path
///
/// # Errors
/// `InvalidPath` for absolute paths, parent components or empty input.
pub fn relative_folder(folder: &str) -> Result<PathBuf, ArtifactError> {
    let path = Path::new(folder);
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::Normal(part) => out.push(part),
            Component::CurDir => {}
            _ => return Err(ArtifactError::InvalidPath(folder.to_string())),
        }
    }
    if out.as_os_str().is_empty() {
        return Err(ArtifactError::InvalidPath(folder.to_string()));
    }
    Ok(out)
}

fn check_file_name(name: &str) -> Result<(), ArtifactError> {
    let mut components = Path::new(name).components();
    match (components.next(), components.next()) {
        (Some(Component::Normal(_)), None) => Ok(()),
        _ => Err(ArtifactError::InvalidPath(name.to_string())),
    }
}

/// In-memory store
#[derive(Debug, Default)]
pub struct MemoryArtifactStore {
    staged: DashMap<ArtifactId, (Artifact, Vec<u8>)>,
    folders: DashMap<PathBuf, Vec<StoredFile>>,
}

impl MemoryArtifactStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Files currently in a folder
    #[must_use]
    pub fn folder_files(&self, folder: &str) -> Option<Vec<StoredFile>> {
        let key = relative_folder(folder).ok()?;
        self.folders.get(&key).map(|files| files.clone())
    }

    #[must_use]
    pub fn staged_count(&self) -> usize {
        self.staged.len()
    }

    #[must_use]
    pub fn folder_count(&self) -> usize {
        self.folders.len()
    }
}

#[async_trait]
impl ArtifactStore for MemoryArtifactStore {
    async fn stage(&self, artifact: &Artifact, bytes: &[u8]) -> Result<(), ArtifactError> {
        self.staged
            .insert(artifact.artifact_id, (artifact.clone(), bytes.to_vec()));
        Ok(())
    }

    async fn describe(&self, id: ArtifactId) -> Result<Artifact, ArtifactError> {
        self.staged
            .get(&id)
            .map(|entry| entry.0.clone())
            .ok_or(ArtifactError::NotFound(id))
    }

    async fn read(&self, id: ArtifactId) -> Result<Vec<u8>, ArtifactError> {
        self.staged
            .get(&id)
            .map(|entry| entry.1.clone())
            .ok_or(ArtifactError::NotFound(id))
    }

    async fn place(&self, folder: &str, files: Vec<StoredFile>) -> Result<String, ArtifactError> {
        let key = relative_folder(folder)?;
        for file in &files {
            check_file_name(&file.name)?;
        }
        let mut slot = self.folders.entry(key).or_default();
        for file in files {
            slot.retain(|existing| existing.name != file.name);
            slot.push(file);
        }
        Ok(folder.to_string())
    }

    async fn discard_staged(&self, id: ArtifactId) -> Result<(), ArtifactError> {
        self.staged.remove(&id);
        Ok(())
    }

    async fn staged(&self) -> Result<Vec<Artifact>, ArtifactError> {
        Ok(self.staged.iter().map(|entry| entry.0.clone()).collect())
    }

    async fn remove_folder(&self, folder: &str) -> Result<(), ArtifactError> {
        let key = relative_folder(folder)?;
        self.folders.remove(&key);
        Ok(())
    }
}

/// Filesystem store rooted at the service data directory
///
/// Layout: `staging/<id>.bin`, `staging/<id>.json`, journal folders as given.
#[derive(Debug, Clone)]
pub struct FsArtifactStore {
    root: PathBuf,
}

impl FsArtifactStore {
    const STAGING: &'static str = "staging";

    /// Open (and create) a store under `root`
    ///
    /// # Errors
    /// Returns a storage error if the staging directory cannot be created.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, ArtifactError> {
        let root = root.into();
        std::fs::create_dir_all(root.join(Self::STAGING))?;
        Ok(Self { root })
    }

    #[inline]
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Location of the staged bytes
    #[must_use]
    pub fn staged_path(&self, id: ArtifactId) -> PathBuf {
        self.root.join(Self::STAGING).join(format!("{id}.bin"))
    }

    fn meta_path(&self, id: ArtifactId) -> PathBuf {
        self.root.join(Self::STAGING).join(format!("{id}.json"))
    }

    /// Absolute location of a relative folder
    ///
    /// # Errors
    /// `InvalidPath` when the folder escapes the root.
    pub fn folder_path(&self, folder: &str) -> Result<PathBuf, ArtifactError> {
        Ok(self.root.join(relative_folder(folder)?))
    }
}

fn not_found_as(id: ArtifactId) -> impl FnOnce(std::io::Error) -> ArtifactError {
    move |e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            ArtifactError::NotFound(id)
        } else {
            ArtifactError::Storage(e)
        }
    }
}

#[async_trait]
impl ArtifactStore for FsArtifactStore {
    async fn stage(&self, artifact: &Artifact, bytes: &[u8]) -> Result<(), ArtifactError> {
        let id = artifact.artifact_id;
        tokio::fs::write(self.staged_path(id), bytes).await?;
        let meta = serde_json::to_vec_pretty(artifact)?;
        tokio::fs::write(self.meta_path(id), meta).await?;
        Ok(())
    }

    async fn describe(&self, id: ArtifactId) -> Result<Artifact, ArtifactError> {
        let raw = tokio::fs::read(self.meta_path(id))
            .await
            .map_err(not_found_as(id))?;
        Ok(serde_json::from_slice(&raw)?)
    }

    async fn read(&self, id: ArtifactId) -> Result<Vec<u8>, ArtifactError> {
        tokio::fs::read(self.staged_path(id))
            .await
            .map_err(not_found_as(id))
    }

    async fn place(&self, folder: &str, files: Vec<StoredFile>) -> Result<String, ArtifactError> {
        let dir = self.folder_path(folder)?;
        for file in &files {
            check_file_name(&file.name)?;
        }
        tokio::fs::create_dir_all(&dir).await?;
        for file in files {
            tokio::fs::write(dir.join(&file.name), &file.bytes).await?;
        }
        Ok(folder.to_string())
    }

    async fn discard_staged(&self, id: ArtifactId) -> Result<(), ArtifactError> {
        for path in [self.staged_path(id), self.meta_path(id)] {
            match tokio::fs::remove_file(&path).await {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }

    async fn staged(&self) -> Result<Vec<Artifact>, ArtifactError> {
        let mut dir = tokio::fs::read_dir(self.root.join(Self::STAGING)).await?;
        let mut out = Vec::new();
        while let Some(item) = dir.next_entry().await? {
            let path = item.path();
            if path.extension().is_none_or(|ext| ext != "json") {
                continue;
            }
            let raw = match tokio::fs::read(&path).await {
                Ok(raw) => raw,
                // discarded between listing and reading
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => return Err(e.into()),
            };
            match serde_json::from_slice::<Artifact>(&raw) {
                Ok(artifact) => out.push(artifact),
                Err(e) => warn!(path = %path.display(), error = %e, "unreadable staging metadata skipped"),
            }
        }
        Ok(out)
    }

    async fn remove_folder(&self, folder: &str) -> Result<(), ArtifactError> {
        let dir = self.folder_path(folder)?;
        match tokio::fs::remove_dir_all(&dir).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifact::CardId;

    fn sample(bytes: &[u8]) -> Artifact {
        Artifact::describe(CardId(3), "исх_a.docx", "исх_a.pdf", "application/pdf", bytes)
    }

    #[test]
    fn sanitize_keeps_unicode_and_replaces_separators() {
        assert_eq!(sanitize_segment("7/10 исх"), "7_10_исх");
        assert_eq!(sanitize_segment(".."), "_");
        assert_eq!(sanitize_segment(" 42-10 "), "42-10");
    }

    #[test]
    fn relative_folder_rejects_escape() {
        assert!(relative_folder("journal/2024/a").is_ok());
        assert!(relative_folder("../etc").is_err());
        assert!(relative_folder("/abs").is_err());
        assert!(relative_folder("").is_err());
    }

    #[tokio::test]
    async fn memory_store_stages_and_places() {
        let store = MemoryArtifactStore::new();
        let artifact = sample(b"pdf");
        store.stage(&artifact, b"pdf").await.unwrap();
        assert_eq!(store.read(artifact.artifact_id).await.unwrap(), b"pdf");
        assert_eq!(store.describe(artifact.artifact_id).await.unwrap(), artifact);

        store
            .place("journal/2024/x", vec![StoredFile::new("a.pdf", b"pdf".to_vec())])
            .await
            .unwrap();
        assert_eq!(store.folder_files("journal/2024/x").unwrap().len(), 1);

        store.discard_staged(artifact.artifact_id).await.unwrap();
        assert!(matches!(
            store.read(artifact.artifact_id).await,
            Err(ArtifactError::NotFound(_))
        ));
        store.remove_folder("journal/2024/x").await.unwrap();
        assert_eq!(store.folder_count(), 0);
    }

    #[tokio::test]
    async fn fs_store_round_trip_and_cleanup() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsArtifactStore::open(dir.path()).unwrap();
        let artifact = sample(b"%PDF");
        store.stage(&artifact, b"%PDF").await.unwrap();

        assert_eq!(store.read(artifact.artifact_id).await.unwrap(), b"%PDF");
        assert_eq!(store.describe(artifact.artifact_id).await.unwrap(), artifact);

        let folder = store
            .place(
                "journal/2024/00001_1",
                vec![
                    StoredFile::new("1.pdf", b"%PDF".to_vec()),
                    StoredFile::new("1.pdf.sig", b"sig".to_vec()),
                ],
            )
            .await
            .unwrap();
        let abs = store.folder_path(&folder).unwrap();
        assert!(abs.join("1.pdf.sig").exists());

        let listed = store.staged().await.unwrap();
        assert_eq!(listed, vec![artifact.clone()]);
        store.discard_staged(artifact.artifact_id).await.unwrap();
        assert!(!store.staged_path(artifact.artifact_id).exists());
        assert!(store.staged().await.unwrap().is_empty());

        store.remove_folder(&folder).await.unwrap();
        assert!(!abs.exists());
        store.remove_folder(&folder).await.unwrap();
    }

    proptest::proptest! {
        #[test]
        fn sanitized_segment_is_one_safe_component(raw in "\\PC{0,40}") {
            let segment = sanitize_segment(&raw);
            let path = relative_folder(&segment).unwrap();
            proptest::prop_assert_eq!(path.components().count(), 1);
        }
    }

    #[tokio::test]
    async fn place_rejects_nested_file_names() {
        let store = MemoryArtifactStore::new();
        let err = store
            .place("journal/x", vec![StoredFile::new("../evil", b"x".to_vec())])
            .await
            .unwrap_err();
        assert!(matches!(err, ArtifactError::InvalidPath(_)));
    }
}
