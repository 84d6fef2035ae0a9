//! Protobuf messages of the persisted manifest (the `<root>.contents` sidecar)
//!
//! ```proto
//! message ArtifactDirectoryContents {
//!   map<string, ProjectArtifact> contents = 1;
//! }
//!
//! message ProjectArtifact {
//!   oneof origin {
//!     string digest = 1;
//!     string workspace_relative_path = 2;
//!   }
//!   string target = 3;
//!   ArtifactTransform transform = 4;
//!   string artifact_path = 5;
//! }
//!
//! enum ArtifactTransform {
//!   COPY = 0;
//!   UNZIP = 1;
//!   STRIP_SUPPORTED_GENERATED_SOURCES = 2;
//! }
//! ```

use std::collections::BTreeMap;

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ArtifactDirectoryContents {
    /// Destination-relative path to the artifact placed there
    #[prost(btree_map = "string, message", tag = "1")]
    pub contents: BTreeMap<String, ProjectArtifact>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ProjectArtifact {
    #[prost(oneof = "project_artifact::Origin", tags = "1, 2")]
    pub origin: Option<project_artifact::Origin>,

    #[prost(string, tag = "3")]
    pub target: String,

    #[prost(enumeration = "ArtifactTransform", tag = "4")]
    pub transform: i32,

    /// Output path of a build artifact; empty for workspace files
    #[prost(string, tag = "5")]
    pub artifact_path: String,
}

pub mod project_artifact {
    #[derive(Clone, PartialEq, ::prost::Oneof)]
    pub enum Origin {
        #[prost(string, tag = "1")]
        Digest(String),

        #[prost(string, tag = "2")]
        WorkspaceRelativePath(String),
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
#[repr(i32)]
pub enum ArtifactTransform {
    Copy = 0,
    Unzip = 1,
    StripSupportedGeneratedSources = 2,
}
