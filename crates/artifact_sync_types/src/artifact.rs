//! Build outputs identified by their content digest

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::digest_map::DigestMap;

/// A single output file produced by a build target
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BuildArtifact {
    /// The content digest of the file, used as the cache key
    pub digest: String,

    /// The output path as reported by the build
    pub path: PathBuf,

    /// Label of the target that produced the file
    pub target: String,
}

impl BuildArtifact {
    /// Create a new build artifact
    pub fn new(
        digest: impl Into<String>,
        path: impl Into<PathBuf>,
        target: impl Into<String>,
    ) -> Self {
        Self {
            digest: digest.into(),
            path: path.into(),
            target: target.into(),
        }
    }

    /// Resolve the artifact at `path` through the digest map.
    ///
    /// Returns `None` if the artifact was never produced because part of the
    /// build failed.
    pub fn from_digest_map(digest_map: &dyn DigestMap, path: &Path, target: &str) -> Option<Self> {
        digest_map
            .digest_for_artifact_path(path, target)
            .map(|digest| Self::new(digest, path, target))
    }

    /// Flatten a directory output into one artifact per file beneath it.
    pub fn from_directory(digest_map: &dyn DigestMap, directory: &Path, target: &str) -> Vec<Self> {
        digest_map
            .directory_contents(directory)
            .filter_map(|path| Self::from_digest_map(digest_map, path, target))
            .collect()
    }
}

impl std::fmt::Display for BuildArtifact {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.path.display(), self.digest)
    }
}
