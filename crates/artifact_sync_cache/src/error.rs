//! Error types for artifact cache operations

use std::{path::PathBuf, sync::Arc};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Invalid artifact digest: {0:?}")]
    InvalidDigest(String),

    #[error("Artifact {0} is neither cached nor being fetched")]
    NotCached(String),

    #[error("Artifact {digest} not found in {store:?}")]
    ArtifactNotFound { digest: String, store: PathBuf },

    #[error("Failed to fetch artifact {digest}: {source}")]
    Fetch {
        digest: String,
        #[source]
        source: Arc<CacheError>,
    },

    #[error("Digest mismatch for fetched artifact {digest} (actual: {actual})")]
    DigestMismatch { digest: String, actual: String },

    #[error("Failed to read zip archive {path:?}: {source}")]
    Zip {
        path: PathBuf,
        #[source]
        source: zip::result::ZipError,
    },

    #[error("Artifact {0} is not cached and no artifact source is configured")]
    Offline(String),

    #[error("Fetch of artifact {0} was cancelled")]
    Cancelled(String),

    #[error("{0}")]
    Other(String),
}
