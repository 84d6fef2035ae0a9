//! Errors raised while materializing artifact directories

use std::{io, path::PathBuf};

use artifact_sync_cache::CacheError;
use artifact_sync_types::ManifestError;
use miette::Diagnostic;
use thiserror::Error;

/// Error writing one artifact with a [`crate::transform::FileTransform`]
#[derive(Debug, Error, Diagnostic)]
pub enum TransformError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error(transparent)]
    Cache(#[from] CacheError),

    #[error("Failed to read zip archive {path:?}: {source}")]
    Zip {
        path: PathBuf,
        #[source]
        source: zip::result::ZipError,
    },

    #[error("Zip entry {name:?} of {archive:?} points outside of the destination")]
    UnsafeEntry { archive: PathBuf, name: String },

    #[error("Failed to strip generated sources from {path:?}: {message}")]
    Strip { path: PathBuf, message: String },
}

/// A single failure while updating an artifact directory
#[derive(Debug, Error, Diagnostic)]
pub enum ArtifactDirectoryError {
    #[error("Artifact {digest} for {destination:?} ({target}) is neither cached nor being fetched")]
    #[diagnostic(help("add the build artifacts to the cache before updating the directory"))]
    NotInCache {
        destination: PathBuf,
        digest: String,
        target: String,
    },

    #[error("Failed to fetch the artifact for {destination:?} ({target})")]
    Fetch {
        destination: PathBuf,
        target: String,
        #[source]
        source: CacheError,
    },

    #[error("Workspace file {path:?} for {destination:?} does not exist")]
    WorkspaceFileMissing { destination: PathBuf, path: PathBuf },

    #[error("Failed to write {destination:?}")]
    Transform {
        destination: PathBuf,
        #[source]
        source: TransformError,
    },

    #[error("Failed to remove {path:?}")]
    Remove {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error(transparent)]
    Manifest(#[from] ManifestError),
}

/// Everything that went wrong during one update of an artifact directory.
///
/// The update attempts every entry before failing, so one error can carry
/// many causes.
#[derive(Debug, Error, Diagnostic)]
#[error("Failed to update artifact directory {root:?} ({} errors)", .errors.len())]
pub struct UpdateError {
    pub root: PathBuf,

    #[related]
    pub errors: Vec<ArtifactDirectoryError>,
}
