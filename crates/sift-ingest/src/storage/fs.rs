//! Filesystem storage adapter.
//!
//! Each space is a directory under a root; each regular file in it is a
//! resource whose id is its `/`-separated path relative to the space
//! directory. Dotfiles are skipped. Text content is extracted for text-like
//! media types up to a size limit.

use std::path::{Component, Path, PathBuf};
use std::time::UNIX_EPOCH;

use async_trait::async_trait;
use async_walkdir::WalkDir;
use chrono::{DateTime, Utc};
use futures::StreamExt;
use log::{debug, warn};
use sift_core::{Document, Error, Result, SpaceId, StorageProvider, UserId};

use crate::mime;

/// Default ceiling for extracted text, in bytes.
pub const DEFAULT_MAX_TEXT_BYTES: u64 = 1024 * 1024;

/// Storage backed by a directory tree.
#[derive(Debug, Clone)]
pub struct FsStorage {
    root: PathBuf,
    max_text_bytes: u64,
}

impl FsStorage {
    /// Storage rooted at `root`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            max_text_bytes: DEFAULT_MAX_TEXT_BYTES,
        }
    }

    /// Set the extraction ceiling; larger files are indexed by metadata only.
    pub fn with_max_text_bytes(mut self, max_text_bytes: u64) -> Self {
        self.max_text_bytes = max_text_bytes;
        self
    }

    /// Storage root.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory of a space.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidArgument`] when the space id would escape the root.
    pub fn space_dir(&self, space_id: &SpaceId) -> Result<PathBuf> {
        let relative = Path::new(space_id.as_str());
        let escapes = space_id.is_empty()
            || relative
                .components()
                .any(|c| !matches!(c, Component::Normal(_)));
        if escapes {
            return Err(Error::invalid_argument(format!(
                "space id '{space_id}' is not a relative directory"
            )));
        }
        Ok(self.root.join(relative))
    }

    async fn read_document(&self, space_id: &SpaceId, base: &Path, path: &Path) -> Result<Document> {
        let metadata = tokio::fs::metadata(path)
            .await
            .map_err(|e| Error::io_with_path(e, path))?;

        let relative = path.strip_prefix(base).unwrap_or(path);
        let resource_id = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");

        let modified = metadata.modified().ok();
        let nanos = modified
            .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
            .map_or(0, |d| d.as_nanos() as u64);
        let size = metadata.len();
        let mime_type = mime::guess_mime_type(path);

        let content = if mime::is_text(mime_type) && size <= self.max_text_bytes {
            match tokio::fs::read(path).await {
                Ok(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
                Err(e) => {
                    warn!("Failed to read {}: {e}", path.display());
                    String::new()
                }
            }
        } else {
            String::new()
        };

        let etag = blake3::hash(format!("{resource_id}:{size}:{nanos}").as_bytes())
            .to_hex()[..16]
            .to_string();

        let mut builder = Document::builder(space_id.clone(), resource_id.clone())
            .path(resource_id)
            .size(size)
            .mime_type(mime_type)
            .content(content)
            .etag(etag)
            .sequence(nanos);
        if let Some(modified) = modified {
            builder = builder.mtime(DateTime::<Utc>::from(modified));
        }
        Ok(builder.build())
    }
}

fn is_hidden(base: &Path, path: &Path) -> bool {
    path.strip_prefix(base)
        .unwrap_or(path)
        .components()
        .any(|c| c.as_os_str().to_string_lossy().starts_with('.'))
}

#[async_trait]
impl StorageProvider for FsStorage {
    async fn list_resources(&self, space_id: &SpaceId, _user_id: &UserId) -> Result<Vec<Document>> {
        let base = self.space_dir(space_id)?;
        if !tokio::fs::try_exists(&base).await.unwrap_or(false) {
            return Err(Error::not_found(format!(
                "space directory {} does not exist",
                base.display()
            )));
        }

        let mut documents = Vec::new();
        let mut walker = WalkDir::new(&base);
        while let Some(entry_result) = walker.next().await {
            let entry = entry_result
                .map_err(|e| Error::unavailable(format!("walking {}: {e}", base.display())))?;
            let path = entry.path();
            if is_hidden(&base, &path) {
                continue;
            }
            let file_type = entry
                .file_type()
                .await
                .map_err(|e| Error::io_with_path(e, &path))?;
            if !file_type.is_file() {
                continue;
            }
            documents.push(self.read_document(space_id, &base, &path).await?);
        }

        debug!("Listed {} resources in '{space_id}'", documents.len());
        Ok(documents)
    }

    fn name(&self) -> &str {
        "fs"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write(root: &Path, rel: &str, content: &str) {
        let path = root.join(rel);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, content).unwrap();
    }

    #[tokio::test]
    async fn test_lists_files_as_documents() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "s1/notes/q3-invoice.txt", "quarterly invoice");
        write(dir.path(), "s1/image.png", "not really a png");
        write(dir.path(), "s1/.hidden/secret.txt", "nope");
        write(dir.path(), "s2/other.txt", "other space");

        let storage = FsStorage::new(dir.path());
        let mut docs = storage
            .list_resources(&"s1".into(), &"u".into())
            .await
            .unwrap();
        docs.sort_by(|a, b| a.resource_id().cmp(b.resource_id()));

        assert_eq!(docs.len(), 2);
        assert_eq!(docs[0].resource_id().as_str(), "image.png");
        assert_eq!(docs[0].mime_type.as_deref(), Some("image/png"));
        assert!(docs[0].content.is_empty());

        let note = &docs[1];
        assert_eq!(note.resource_id().as_str(), "notes/q3-invoice.txt");
        assert_eq!(note.name, "q3-invoice.txt");
        assert_eq!(note.content, "quarterly invoice");
        assert_eq!(note.size, 17);
        assert!(note.sequence > 0);
        assert!(note.mtime.is_some());
        assert_eq!(note.etag.len(), 16);
    }

    #[tokio::test]
    async fn test_large_text_is_metadata_only() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "s1/big.txt", "0123456789");
        let storage = FsStorage::new(dir.path()).with_max_text_bytes(4);
        let docs = storage
            .list_resources(&"s1".into(), &"u".into())
            .await
            .unwrap();
        assert!(docs[0].content.is_empty());
        assert_eq!(docs[0].size, 10);
    }

    #[tokio::test]
    async fn test_missing_space_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let storage = FsStorage::new(dir.path());
        let err = storage
            .list_resources(&"missing".into(), &"u".into())
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn test_space_dir_rejects_traversal() {
        let storage = FsStorage::new("/srv/spaces");
        assert!(storage.space_dir(&"../etc".into()).is_err());
        assert!(storage.space_dir(&"/abs".into()).is_err());
        assert!(storage.space_dir(&"".into()).is_err());
        assert_eq!(
            storage.space_dir(&"team/docs".into()).unwrap(),
            PathBuf::from("/srv/spaces/team/docs")
        );
    }
}
