//! Updating several artifact directories against one cache

use std::{
    collections::BTreeSet,
    path::{Path, PathBuf},
};

use artifact_sync_cache::BuildArtifactCache;
use artifact_sync_types::{ArtifactDirectoryContents, BuildArtifact};
use futures::future::join_all;

use crate::{
    directory_update::ArtifactDirectoryUpdate, error::UpdateError,
    tool_configuration::Configuration,
};

/// The outcome of updating one artifact directory
#[derive(Debug)]
pub struct DirectorySync {
    pub root: PathBuf,
    /// The files written, or everything that went wrong
    pub result: Result<BTreeSet<PathBuf>, UpdateError>,
}

/// Update every `(root, manifest)` pair.
///
/// All build artifacts are requested from the cache in one batch first, so
/// artifacts shared between directories are fetched once and fetches overlap
/// with the updates. The directories are then updated concurrently. Results are
/// returned in the order of `directories`.
pub async fn sync_directories(
    cache: &BuildArtifactCache,
    workspace_root: &Path,
    config: &Configuration,
    directories: Vec<(PathBuf, ArtifactDirectoryContents)>,
) -> Vec<DirectorySync> {
    let artifacts: Vec<BuildArtifact> = directories
        .iter()
        .flat_map(|(_, contents)| contents.build_artifacts())
        .collect();
    tracing::debug!(
        "Syncing {} directories with {} build artifacts",
        directories.len(),
        artifacts.len()
    );
    let prefetch = cache.add_all(&artifacts);

    let updates = directories.into_iter().map(|(root, contents)| {
        let mut update = ArtifactDirectoryUpdate::new(
            cache.clone(),
            workspace_root,
            root,
            contents,
            config.clone(),
        );
        async move {
            let result = update.update().await;
            DirectorySync {
                root: update.root().to_path_buf(),
                result: result.map(|()| update.updated_paths().clone()),
            }
        }
    });

    let (prefetched, results) = futures::join!(prefetch, join_all(updates));
    // The affected entries report the failure themselves
    if let Err(e) = prefetched {
        tracing::debug!("Prefetching build artifacts failed: {}", e);
    }

    results
}
