//! On-disk layout and metadata for persisted space indices.
//!
//! ```text
//! <data_path>/spaces/<blake3(space_id)>/
//!     space.json       current generation + the readable space id
//!     gen-<n>/         one backend index per generation
//! ```
//!
//! `space.json` is replaced with a write-to-temp-then-rename, so a crash
//! leaves either the old or the new generation published.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use sift_core::{Error, Result, SpaceId};

/// File name of the per-space metadata.
pub const METADATA_FILE: &str = "space.json";

/// Metadata stored next to a space's index generations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpaceMetadata {
    /// The space id the directory belongs to.
    pub space_id: SpaceId,

    /// Published generation.
    pub generation: u64,

    /// Backend name.
    pub backend: String,

    /// Documents in the generation when it was published.
    pub document_count: usize,

    /// Publish timestamp (RFC 3339).
    pub published_at: String,
}

/// Directory holding every generation of a space.
///
/// Space ids are opaque and may contain path separators, so the directory
/// is named after their blake3 hash.
pub fn space_dir(root: &Path, space_id: &SpaceId) -> PathBuf {
    let hash = blake3::hash(space_id.as_str().as_bytes());
    root.join("spaces").join(hash.to_hex().as_str())
}

/// Directory of one generation.
pub fn generation_dir(space_dir: &Path, generation: u64) -> PathBuf {
    space_dir.join(format!("gen-{generation}"))
}

/// Parse a generation number back out of a directory name.
pub fn parse_generation_dir(name: &str) -> Option<u64> {
    name.strip_prefix("gen-")?.parse().ok()
}

/// Save metadata atomically.
pub fn save_metadata(space_dir: &Path, metadata: &SpaceMetadata) -> Result<()> {
    let path = space_dir.join(METADATA_FILE);
    let tmp = space_dir.join(format!("{METADATA_FILE}.tmp"));
    let json = serde_json::to_string_pretty(metadata)?;
    std::fs::write(&tmp, json).map_err(|e| Error::io_with_path(e, &tmp))?;
    std::fs::rename(&tmp, &path).map_err(|e| Error::io_with_path(e, &path))?;
    Ok(())
}

/// Load metadata; `Ok(None)` when the space was never published.
pub fn load_metadata(space_dir: &Path) -> Result<Option<SpaceMetadata>> {
    let path = space_dir.join(METADATA_FILE);
    if !path.exists() {
        return Ok(None);
    }
    let json = std::fs::read_to_string(&path).map_err(|e| Error::io_with_path(e, &path))?;
    let metadata: SpaceMetadata = serde_json::from_str(&json)
        .map_err(|e| Error::internal(format!("corrupt {}: {e}", path.display())))?;
    Ok(Some(metadata))
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn sample_metadata() -> SpaceMetadata {
        SpaceMetadata {
            space_id: "personal/alice".into(),
            generation: 3,
            backend: "tantivy".to_string(),
            document_count: 42,
            published_at: "2025-01-15T12:00:00Z".to_string(),
        }
    }

    #[test]
    fn test_space_dir_is_hashed() {
        let dir = space_dir(Path::new("/data"), &"personal/alice".into());
        let name = dir.file_name().unwrap().to_str().unwrap();
        assert_eq!(name.len(), 64);
        assert!(!name.contains('/'));
        assert!(dir.starts_with("/data/spaces"));
    }

    #[test]
    fn test_generation_dir_round_trip() {
        let dir = generation_dir(Path::new("/x"), 12);
        let name = dir.file_name().unwrap().to_str().unwrap();
        assert_eq!(parse_generation_dir(name), Some(12));
        assert_eq!(parse_generation_dir("space.json"), None);
        assert_eq!(parse_generation_dir("gen-abc"), None);
    }

    #[test]
    fn test_save_and_load_metadata() {
        let dir = tempdir().unwrap();
        let metadata = sample_metadata();
        save_metadata(dir.path(), &metadata).unwrap();

        let loaded = load_metadata(dir.path()).unwrap().unwrap();
        assert_eq!(loaded, metadata);
        assert!(!dir.path().join("space.json.tmp").exists());
    }

    #[test]
    fn test_load_metadata_missing_file() {
        let dir = tempdir().unwrap();
        assert!(load_metadata(dir.path()).unwrap().is_none());
    }

    #[test]
    fn test_load_metadata_invalid_json() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join(METADATA_FILE), "not valid json").unwrap();
        let err = load_metadata(dir.path()).unwrap_err();
        assert!(matches!(err, Error::Internal(_)));
    }

    #[test]
    fn test_save_metadata_invalid_path() {
        let path = Path::new("/nonexistent/dir");
        assert!(save_metadata(path, &sample_metadata()).is_err());
    }
}
