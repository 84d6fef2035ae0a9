//! Per-build index from output paths to content digests

use std::{
    collections::{BTreeMap, BTreeSet},
    ops::Bound,
    path::{Path, PathBuf},
};

/// Maps the output paths reported by a build to the digests of their contents.
pub trait DigestMap: Send + Sync {
    /// Returns the digest of the artifact at `path`, produced by `from_target`.
    ///
    /// `None` means the artifact was not produced because part of the build
    /// failed; the artifact graph may still reference such outputs.
    ///
    /// # Panics
    ///
    /// Panics when `path` is unknown and the build reported no failures at all.
    /// The build output index and the artifact graph are then inconsistent.
    fn digest_for_artifact_path(&self, path: &Path, from_target: &str) -> Option<&str>;

    /// All known output paths strictly beneath `directory`, in path order.
    fn directory_contents<'a>(
        &'a self,
        directory: &'a Path,
    ) -> Box<dyn Iterator<Item = &'a Path> + 'a>;
}

/// A snapshot of one build's outputs
#[derive(Debug, Clone, Default)]
pub struct DigestMapImpl {
    digests: BTreeMap<PathBuf, String>,
    targets_with_errors: BTreeSet<String>,
}

impl DigestMapImpl {
    /// Create a digest map from `(output path, digest)` pairs and the labels of
    /// targets that failed to build.
    pub fn new<D, T>(digests: D, targets_with_errors: T) -> Self
    where
        D: IntoIterator<Item = (PathBuf, String)>,
        T: IntoIterator<Item = String>,
    {
        Self {
            digests: digests.into_iter().collect(),
            targets_with_errors: targets_with_errors.into_iter().collect(),
        }
    }

    /// Whether any target of the build failed
    pub fn has_build_errors(&self) -> bool {
        !self.targets_with_errors.is_empty()
    }

    /// Labels of the targets that failed to build
    pub fn targets_with_errors(&self) -> impl Iterator<Item = &str> {
        self.targets_with_errors.iter().map(String::as_str)
    }

    /// Number of outputs with a known digest
    pub fn len(&self) -> usize {
        self.digests.len()
    }

    /// Whether the build produced no outputs
    pub fn is_empty(&self) -> bool {
        self.digests.is_empty()
    }
}

impl DigestMap for DigestMapImpl {
    fn digest_for_artifact_path(&self, path: &Path, from_target: &str) -> Option<&str> {
        if let Some(digest) = self.digests.get(path) {
            return Some(digest.as_str());
        }

        if self.targets_with_errors.is_empty() {
            panic!(
                "no digest for {} (from {}) although the build reported no errors",
                path.display(),
                from_target
            );
        }

        tracing::debug!(
            "No digest for {} from {} (target failed: {})",
            path.display(),
            from_target,
            self.targets_with_errors.contains(from_target)
        );
        None
    }

    fn directory_contents<'a>(
        &'a self,
        directory: &'a Path,
    ) -> Box<dyn Iterator<Item = &'a Path> + 'a> {
        // Path ordering is component-wise, so every descendant of `directory`
        // sorts directly after it.
        Box::new(
            self.digests
                .range::<Path, _>((Bound::Excluded(directory), Bound::Unbounded))
                .map(|(path, _)| path.as_path())
                .take_while(move |path| path.starts_with(directory)),
        )
    }
}
