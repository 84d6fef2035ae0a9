//! Error types for manifest handling

use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ManifestError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to decode manifest {path:?}: {source}")]
    Decode {
        path: PathBuf,
        #[source]
        source: prost::DecodeError,
    },

    #[error("Failed to parse manifest: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Artifact for {0} has neither a digest nor a workspace path")]
    MissingOrigin(String),

    #[error("Unknown artifact transform {value} for {destination}")]
    UnknownTransform { destination: String, value: i32 },

    #[error("Destination {0:?} must be a relative path inside the artifact directory")]
    InvalidDestination(PathBuf),

    #[error("Workspace file {path:?} for {destination:?} must be a relative path inside the workspace")]
    InvalidWorkspacePath { destination: PathBuf, path: PathBuf },

    #[error("Path is not valid UTF-8: {0:?}")]
    NonUtf8Path(PathBuf),
}
