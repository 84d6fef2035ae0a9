//! On-disk layout and metadata of the artifact cache
//!
//! ```text
//! <cache_dir>/
//!   artifacts/<digest>        the artifact bytes
//!   .metadata/<digest>.json   size and access times
//!   .tmp/<digest>             fetches in flight
//! ```

use std::{
    collections::HashMap,
    io::ErrorKind,
    path::{Path, PathBuf},
};

use fs_err as fs;
use serde::{Deserialize, Serialize};

use crate::error::CacheError;

/// Metadata about one cached artifact
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheEntry {
    /// The content digest, also the file name of the artifact
    pub digest: String,

    /// Size of the artifact in bytes
    pub size: u64,

    /// When the artifact was added to the cache
    pub created: chrono::DateTime<chrono::Utc>,

    /// When the artifact was last read from the cache
    pub last_accessed: chrono::DateTime<chrono::Utc>,
}

/// Manages the files of the cache directory
#[derive(Debug)]
pub struct CacheIndex {
    cache_dir: PathBuf,
    artifacts_dir: PathBuf,
    metadata_dir: PathBuf,
    tmp_dir: PathBuf,
}

impl CacheIndex {
    /// Open the cache directory, creating it if needed.
    ///
    /// Leftovers of fetches that never completed are removed.
    pub fn open(cache_dir: PathBuf) -> Result<Self, CacheError> {
        let index = Self {
            artifacts_dir: cache_dir.join("artifacts"),
            metadata_dir: cache_dir.join(".metadata"),
            tmp_dir: cache_dir.join(".tmp"),
            cache_dir,
        };

        fs::create_dir_all(&index.artifacts_dir)?;
        fs::create_dir_all(&index.metadata_dir)?;
        if index.tmp_dir.exists() {
            fs::remove_dir_all(&index.tmp_dir)?;
        }
        fs::create_dir_all(&index.tmp_dir)?;

        Ok(index)
    }

    /// Load the metadata of every artifact present on disk.
    ///
    /// Metadata without an artifact is dropped; artifacts without metadata are
    /// adopted using their modification time as last access.
    pub fn load_all(&self) -> Result<HashMap<String, CacheEntry>, CacheError> {
        let mut entries = HashMap::new();

        for entry in fs::read_dir(&self.artifacts_dir)? {
            let entry = entry?;
            let Some(digest) = entry.file_name().to_str().map(str::to_string) else {
                continue;
            };
            let metadata = entry.metadata()?;
            if !metadata.is_file() {
                continue;
            }

            let cache_entry = match self.read_metadata(&digest) {
                Some(cache_entry) => cache_entry,
                None => {
                    let modified = metadata
                        .modified()
                        .map(chrono::DateTime::<chrono::Utc>::from)
                        .unwrap_or_else(|_| chrono::Utc::now());
                    let cache_entry = CacheEntry {
                        digest: digest.clone(),
                        size: metadata.len(),
                        created: modified,
                        last_accessed: modified,
                    };
                    self.persist(&cache_entry)?;
                    cache_entry
                }
            };
            entries.insert(digest, cache_entry);
        }

        for entry in fs::read_dir(&self.metadata_dir)? {
            let entry = entry?;
            if let Some(filename) = entry.file_name().to_str()
                && let Some(digest) = filename.strip_suffix(".json")
                && !entries.contains_key(digest)
            {
                tracing::debug!("Dropping metadata of missing artifact {}", digest);
                let _ = fs::remove_file(entry.path());
            }
        }

        Ok(entries)
    }

    fn read_metadata(&self, digest: &str) -> Option<CacheEntry> {
        let path = self.metadata_path(digest);
        let content = match fs::read_to_string(&path) {
            Ok(content) => content,
            Err(e) => {
                if e.kind() != ErrorKind::NotFound {
                    tracing::warn!("Failed to read cache metadata {}: {}", digest, e);
                }
                return None;
            }
        };

        match serde_json::from_str::<CacheEntry>(&content) {
            Ok(entry) if entry.digest == digest => Some(entry),
            Ok(_) => {
                tracing::warn!("Cache metadata {} belongs to another digest", digest);
                None
            }
            Err(e) => {
                tracing::warn!("Failed to parse cache metadata {}: {}", digest, e);
                None
            }
        }
    }

    /// Write the metadata of an entry to disk
    pub fn persist(&self, entry: &CacheEntry) -> Result<(), CacheError> {
        let content = serde_json::to_string_pretty(entry)?;
        fs::write(self.metadata_path(&entry.digest), content)?;
        Ok(())
    }

    /// Delete an artifact and its metadata
    pub fn remove(&self, digest: &str) -> Result<(), CacheError> {
        for path in [self.artifact_path(digest), self.metadata_path(digest)] {
            match fs::remove_file(&path) {
                Ok(()) => {}
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }

    /// Delete every artifact and all metadata
    pub fn clear(&self) -> Result<(), CacheError> {
        for dir in [&self.artifacts_dir, &self.metadata_dir] {
            if dir.exists() {
                fs::remove_dir_all(dir)?;
            }
            fs::create_dir_all(dir)?;
        }
        Ok(())
    }

    /// Where the bytes of a cached artifact live
    pub fn artifact_path(&self, digest: &str) -> PathBuf {
        self.artifacts_dir.join(digest)
    }

    /// Where a fetch writes the artifact before it is moved into place
    pub fn tmp_path(&self, digest: &str) -> PathBuf {
        self.tmp_dir.join(digest)
    }

    fn metadata_path(&self, digest: &str) -> PathBuf {
        self.metadata_dir.join(format!("{}.json", digest))
    }

    /// Get cache directory path
    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    /// Check that a digest can be used as a file name inside the cache.
    pub fn validate_digest(digest: &str) -> Result<(), CacheError> {
        let valid = !digest.is_empty()
            && digest.len() <= 255
            && !digest.starts_with('.')
            && digest
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
        if valid {
            Ok(())
        } else {
            Err(CacheError::InvalidDigest(digest.to_string()))
        }
    }
}
