//! Bringing an artifact directory on disk into agreement with its manifest
//!
//! The manifest of the previous update is stored next to the directory as
//! `<root>.contents`. It is deleted before anything in the directory is
//! touched and only written again once the update finished, so an interrupted
//! update leaves no stale record behind and the next update rewrites
//! everything.

use std::{
    collections::BTreeSet,
    io::ErrorKind,
    path::{Path, PathBuf},
};

use artifact_sync_cache::{BuildArtifactCache, CachedArtifact};
use artifact_sync_types::{ArtifactDirectoryContents, ArtifactSource, ProjectArtifact};
use fs_err as fs;
use walkdir::WalkDir;

use crate::{
    error::{ArtifactDirectoryError, TransformError, UpdateError},
    tool_configuration::Configuration,
    transform::FileTransform,
};

/// Updates one artifact directory to match a manifest
pub struct ArtifactDirectoryUpdate {
    cache: BuildArtifactCache,
    workspace_root: PathBuf,
    root: PathBuf,
    contents: ArtifactDirectoryContents,
    config: Configuration,
    updated_paths: BTreeSet<PathBuf>,
}

/// What the pruning walk does with one path below the root
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Prune {
    /// The path is a destination of the manifest
    Keep,
    /// Nothing the manifest wants lives at or below the path
    Delete,
    /// Some destinations lie below the path
    Descend,
}

impl ArtifactDirectoryUpdate {
    pub fn new(
        cache: BuildArtifactCache,
        workspace_root: impl Into<PathBuf>,
        root: impl Into<PathBuf>,
        contents: ArtifactDirectoryContents,
        config: Configuration,
    ) -> Self {
        Self {
            cache,
            workspace_root: workspace_root.into(),
            root: root.into(),
            contents,
            config,
            updated_paths: BTreeSet::new(),
        }
    }

    /// The directory being updated
    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn contents(&self) -> &ArtifactDirectoryContents {
        &self.contents
    }

    /// Every file written by the last call to [`Self::update`]
    pub fn updated_paths(&self) -> &BTreeSet<PathBuf> {
        &self.updated_paths
    }

    /// Update the directory.
    ///
    /// Entries that did not change since the last update are left alone,
    /// everything not in the manifest is deleted. A failing entry does not stop
    /// the update: all entries are attempted and every failure is reported in
    /// the returned [`UpdateError`].
    pub async fn update(&mut self) -> Result<(), UpdateError> {
        self.updated_paths.clear();

        let sidecar = ArtifactDirectoryContents::sidecar_path(&self.root);
        let existing = self.prepare(&sidecar).map_err(|e| UpdateError {
            root: self.root.clone(),
            errors: vec![e],
        })?;

        let mut errors = Vec::new();
        let mut failed = Vec::new();
        let mut updated_paths = BTreeSet::new();

        for (destination, artifact) in self.contents.iter() {
            if !needs_update(destination, artifact, &existing) {
                tracing::trace!("{} is up to date", destination.display());
                continue;
            }
            match self.update_entry(destination, artifact).await {
                Ok(written) => updated_paths.extend(written),
                Err(e) => {
                    tracing::debug!("Failed to update {}: {}", destination.display(), e);
                    failed.push(destination.clone());
                    errors.push(e);
                }
            }
        }
        self.updated_paths = updated_paths;

        errors.extend(self.prune());

        if self.contents.is_empty() {
            if let Err(e) = remove_path(&self.root) {
                errors.push(e);
            }
        } else {
            // Failed entries are left out so the next update retries them
            let mut written = self.contents.clone();
            for destination in &failed {
                written.contents.remove(destination);
            }
            if let Err(e) = written.write_sidecar(&sidecar) {
                errors.push(e.into());
            }
        }

        tracing::info!(
            "Updated {} files in {}",
            self.updated_paths.len(),
            self.root.display()
        );

        if errors.is_empty() {
            Ok(())
        } else {
            Err(UpdateError {
                root: self.root.clone(),
                errors,
            })
        }
    }

    /// Validate the manifest, create the root and take over the previous
    /// manifest, deleting it from disk.
    fn prepare(&self, sidecar: &Path) -> Result<ArtifactDirectoryContents, ArtifactDirectoryError> {
        self.contents.validate()?;
        fs::create_dir_all(&self.root)?;

        let existing = match ArtifactDirectoryContents::read_sidecar(sidecar) {
            Ok(existing) => existing.unwrap_or_default(),
            Err(e) => {
                tracing::warn!(
                    "Ignoring unreadable {}, rewriting the whole directory: {}",
                    sidecar.display(),
                    e
                );
                ArtifactDirectoryContents::default()
            }
        };
        remove_path(sidecar)?;

        Ok(existing)
    }

    async fn update_entry(
        &self,
        destination: &Path,
        artifact: &ProjectArtifact,
    ) -> Result<BTreeSet<PathBuf>, ArtifactDirectoryError> {
        let path = self.root.join(destination);
        self.clear_ancestors(&path)?;
        remove_path(&path)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let source = match &artifact.source {
            ArtifactSource::Build { digest, .. } => {
                let Some(fetch) = self.cache.get(digest) else {
                    return Err(ArtifactDirectoryError::NotInCache {
                        destination: destination.to_path_buf(),
                        digest: digest.clone(),
                        target: artifact.target.clone(),
                    });
                };
                fetch
                    .await
                    .map_err(|source| ArtifactDirectoryError::Fetch {
                        destination: destination.to_path_buf(),
                        target: artifact.target.clone(),
                        source,
                    })?
            }
            ArtifactSource::Workspace { path: relative } => {
                let file = self.workspace_root.join(relative);
                match fs::metadata(&file) {
                    Ok(metadata) if metadata.is_file() => CachedArtifact::new(file),
                    Ok(_) => {
                        return Err(ArtifactDirectoryError::WorkspaceFileMissing {
                            destination: destination.to_path_buf(),
                            path: file,
                        });
                    }
                    Err(e) if e.kind() == ErrorKind::NotFound => {
                        return Err(ArtifactDirectoryError::WorkspaceFileMissing {
                            destination: destination.to_path_buf(),
                            path: file,
                        });
                    }
                    Err(e) => return Err(e.into()),
                }
            }
        };

        let transform = FileTransform::for_transform(artifact.transform, &self.config);
        let target = path.clone();
        let written = tokio::task::spawn_blocking(move || {
            transform.copy_with_transform(&source, &target)
        })
        .await
        .map_err(|e| TransformError::Io(std::io::Error::other(e)))
        .and_then(|written| written)
        .map_err(|source| ArtifactDirectoryError::Transform {
            destination: path,
            source,
        })?;

        tracing::debug!(
            "Wrote {} ({} files) from {}",
            destination.display(),
            written.len(),
            artifact.target
        );
        Ok(written)
    }

    /// Remove files that sit where `path` needs a parent directory.
    fn clear_ancestors(&self, path: &Path) -> Result<(), ArtifactDirectoryError> {
        for ancestor in path.ancestors().skip(1) {
            if ancestor == self.root {
                break;
            }
            if let Ok(metadata) = fs::symlink_metadata(ancestor)
                && !metadata.is_dir()
            {
                remove_path(ancestor)?;
            }
        }
        Ok(())
    }

    fn prune_decision(&self, relative: &Path) -> Prune {
        if self.contents.get(relative).is_some() {
            Prune::Keep
        } else if self.contents.has_entries_under(relative) {
            Prune::Descend
        } else {
            Prune::Delete
        }
    }

    /// Delete everything below the root that the manifest does not want, in a
    /// single walk that never enters wanted or deleted subtrees.
    fn prune(&self) -> Vec<ArtifactDirectoryError> {
        let mut errors = Vec::new();
        if !self.root.is_dir() {
            return errors;
        }

        let mut walker = WalkDir::new(&self.root).min_depth(1).into_iter();
        while let Some(entry) = walker.next() {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    errors.push(ArtifactDirectoryError::Io(e.into()));
                    continue;
                }
            };
            let Ok(relative) = entry.path().strip_prefix(&self.root) else {
                continue;
            };
            let is_dir = entry.file_type().is_dir();

            match self.prune_decision(relative) {
                Prune::Keep => {
                    if is_dir {
                        walker.skip_current_dir();
                    }
                }
                Prune::Delete => {
                    tracing::trace!("Deleting {}", entry.path().display());
                    if let Err(e) = remove_path(entry.path()) {
                        errors.push(e);
                    }
                    if is_dir {
                        walker.skip_current_dir();
                    }
                }
                Prune::Descend => {
                    // A file where destinations need a directory
                    if !is_dir && let Err(e) = remove_path(entry.path()) {
                        errors.push(e);
                    }
                }
            }
        }

        errors
    }
}

/// Whether the entry at `destination` must be written again.
///
/// Workspace files can change without the manifest changing, so they are
/// always written.
fn needs_update(
    destination: &Path,
    artifact: &ProjectArtifact,
    existing: &ArtifactDirectoryContents,
) -> bool {
    if artifact.is_workspace_file() {
        return true;
    }
    let Some(previous) = existing.get(destination) else {
        return true;
    };
    match (previous.to_proto(), artifact.to_proto()) {
        (Ok(previous), Ok(current)) => previous != current,
        _ => true,
    }
}

/// Remove a file or directory tree. Missing paths are fine.
fn remove_path(path: &Path) -> Result<(), ArtifactDirectoryError> {
    let result = match fs::symlink_metadata(path) {
        Ok(metadata) if metadata.is_dir() => fs::remove_dir_all(path),
        Ok(_) => fs::remove_file(path),
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(()),
        Err(e) => Err(e),
    };
    result.map_err(|source| ArtifactDirectoryError::Remove {
        path: path.to_path_buf(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use artifact_sync_cache::OfflineFetcher;
    use artifact_sync_types::{BuildArtifact, Transform};

    use super::*;

    fn build(digest: &str) -> ProjectArtifact {
        ProjectArtifact::from_build_artifact(
            &BuildArtifact::new(digest, "bazel-out/bin/out", "//pkg:lib"),
            Transform::Copy,
        )
    }

    #[test]
    fn test_needs_update() {
        let mut existing = ArtifactDirectoryContents::new();
        existing.insert("a.jar", build("aaa"));
        existing.insert(
            "res.xml",
            ProjectArtifact::workspace("res.xml", "//pkg", Transform::Copy),
        );

        assert!(!needs_update(Path::new("a.jar"), &build("aaa"), &existing));
        assert!(needs_update(Path::new("a.jar"), &build("bbb"), &existing));
        assert!(needs_update(Path::new("b.jar"), &build("aaa"), &existing));

        let mut unzipped = build("aaa");
        unzipped.transform = Transform::Unzip;
        assert!(needs_update(Path::new("a.jar"), &unzipped, &existing));

        let workspace = ProjectArtifact::workspace("res.xml", "//pkg", Transform::Copy);
        assert!(needs_update(Path::new("res.xml"), &workspace, &existing));
    }

    async fn offline_cache(dir: &Path) -> BuildArtifactCache {
        BuildArtifactCache::builder(Arc::new(OfflineFetcher))
            .cache_dir(dir)
            .build()
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_prune_decision() {
        let dir = tempfile::tempdir().unwrap();
        let mut contents = ArtifactDirectoryContents::new();
        contents.insert("java/com/Gen.java", build("aaa"));
        contents.insert("srcjar", build("bbb"));
        let update = ArtifactDirectoryUpdate::new(
            offline_cache(dir.path()).await,
            ".",
            "out",
            contents,
            Configuration::default(),
        );

        assert_eq!(update.prune_decision(Path::new("java")), Prune::Descend);
        assert_eq!(update.prune_decision(Path::new("java/com")), Prune::Descend);
        assert_eq!(update.prune_decision(Path::new("java/com/Gen.java")), Prune::Keep);
        assert_eq!(update.prune_decision(Path::new("java/org")), Prune::Delete);
        assert_eq!(update.prune_decision(Path::new("srcjar")), Prune::Keep);
        assert_eq!(update.prune_decision(Path::new("srcjar.old")), Prune::Delete);
    }

    #[tokio::test]
    #[tracing_test::traced_test]
    async fn test_unreadable_sidecar_is_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let workspace = dir.path().join("workspace");
        fs::create_dir_all(&workspace).unwrap();
        fs::write(workspace.join("values.xml"), "<resources/>").unwrap();
        let root = dir.path().join("res");
        let sidecar = ArtifactDirectoryContents::sidecar_path(&root);

        let cache = offline_cache(&dir.path().join("cache")).await;
        let mut contents = ArtifactDirectoryContents::new();
        contents.insert(
            "values.xml",
            ProjectArtifact::workspace("values.xml", "//app", Transform::Copy),
        );

        fs::create_dir_all(&root).unwrap();
        fs::write(&sidecar, b"\xff\xff\xff garbage").unwrap();

        let mut update = ArtifactDirectoryUpdate::new(
            cache,
            &workspace,
            &root,
            contents.clone(),
            Configuration::default(),
        );
        update.update().await.unwrap();

        assert!(logs_contain("Ignoring unreadable"));
        assert_eq!(
            ArtifactDirectoryContents::read_sidecar(&sidecar).unwrap(),
            Some(contents)
        );
        assert_eq!(
            fs::read_to_string(root.join("values.xml")).unwrap(),
            "<resources/>"
        );
    }
}
