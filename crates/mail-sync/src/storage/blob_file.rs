//! File-based blob storage with zstd compression

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use super::blob::{BlobKey, BlobStore};

/// File-based blob storage with zstd compression
///
/// Directory structure:
/// ```text
/// attachments/
///   3f/
///     3f9c04e1d2a84b7e9f1c7d55aa01b2c3.zst
///   a0/
///     a07be2...
/// ```
pub struct FileBlobStore {
    root: PathBuf,
    compression_level: i32,
}

impl FileBlobStore {
    /// Create a new file blob store at the given path
    pub fn new(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root).with_context(|| {
            format!("Failed to create blob storage directory: {}", root.display())
        })?;
        Ok(Self {
            root,
            compression_level: 3,
        })
    }

    fn blob_path(&self, key: &BlobKey) -> PathBuf {
        self.root
            .join(key.shard())
            .join(format!("{}.zst", key.as_str()))
    }
}

impl BlobStore for FileBlobStore {
    fn put(&self, key: &BlobKey, data: &[u8]) -> Result<()> {
        let path = self.blob_path(key);

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let compressed =
            zstd::encode_all(data, self.compression_level).context("Failed to compress blob")?;

        // Write to temp, then rename, so readers never see a partial blob
        let temp_path = path.with_extension("tmp");
        fs::write(&temp_path, &compressed)
            .with_context(|| format!("Failed to write blob {}", key.as_str()))?;
        fs::rename(&temp_path, &path)?;

        Ok(())
    }
}
