//! # artifact_sync_types
//!
//! Value types shared by the artifact cache and the directory updater:
//!
//! - [`BuildArtifact`]: one build output identified by its content digest
//! - [`DigestMap`]: the per-build index from output paths to digests
//! - [`ArtifactDirectoryContents`]: the manifest describing what an artifact
//!   directory should contain, and its persisted protobuf form in [`proto`]

pub mod artifact;
pub mod digest_map;
pub mod error;
pub mod manifest;
pub mod proto;

pub use artifact::BuildArtifact;
pub use digest_map::{DigestMap, DigestMapImpl};
pub use error::ManifestError;
pub use manifest::{ArtifactDirectoryContents, ArtifactSource, ProjectArtifact, Transform};
