//! Read-only access to the bytes of a cache entry

use std::{
    io::{self, BufReader, Read},
    path::{Path, PathBuf},
};

use fs_err as fs;

use crate::error::CacheError;

/// The bytes of one artifact, backed by a file.
///
/// Files handed out by the cache are owned by the cache and must not be
/// modified.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedArtifact {
    path: PathBuf,
}

impl CachedArtifact {
    /// Wrap an existing file. Used by the cache for its entries and by callers
    /// that need to feed workspace files through the same code paths.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Location of the bytes on disk
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Open the artifact as a byte stream
    pub fn open(&self) -> io::Result<BufReader<fs::File>> {
        Ok(BufReader::new(fs::File::open(&self.path)?))
    }

    /// Read the whole artifact into memory
    pub fn read_to_vec(&self) -> io::Result<Vec<u8>> {
        let mut buffer = Vec::new();
        self.open()?.read_to_end(&mut buffer)?;
        Ok(buffer)
    }

    /// Size of the artifact in bytes
    pub fn size(&self) -> io::Result<u64> {
        Ok(fs::metadata(&self.path)?.len())
    }

    /// Open the artifact as a zip archive with random access to its entries
    pub fn open_as_zip(&self) -> Result<zip::ZipArchive<BufReader<fs::File>>, CacheError> {
        zip::ZipArchive::new(self.open()?).map_err(|source| CacheError::Zip {
            path: self.path.clone(),
            source,
        })
    }
}
