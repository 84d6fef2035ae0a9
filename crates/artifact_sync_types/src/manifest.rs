//! The declarative description of an artifact directory
//!
//! An [`ArtifactDirectoryContents`] maps destination-relative paths to the
//! artifact that should be placed there and how. After every successful update
//! it is persisted next to the directory as `<root>.contents` so the next
//! update only needs to touch entries that changed.

use std::{
    collections::BTreeMap,
    ffi::OsString,
    io::ErrorKind,
    ops::Bound,
    path::{Component, Path, PathBuf},
};

use fs_err as fs;
use prost::Message;
use serde::{Deserialize, Serialize};

use crate::{artifact::BuildArtifact, error::ManifestError, proto};

/// How an artifact is materialized at its destination
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Transform {
    /// Byte-for-byte copy
    #[default]
    Copy,
    /// Expand a zip archive into the destination directory
    Unzip,
    /// Strip supported generated sources (experimental, falls back to copy)
    StripSupportedGeneratedSources,
}

/// Where the bytes of an artifact come from
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ArtifactSource {
    /// A build output, read through the artifact cache
    Build { digest: String, path: PathBuf },
    /// A file read straight from the workspace, relative to the workspace root
    Workspace { path: PathBuf },
}

/// One entry of the manifest
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ProjectArtifact {
    pub source: ArtifactSource,

    /// Label of the target the artifact belongs to
    pub target: String,

    #[serde(default)]
    pub transform: Transform,
}

impl ProjectArtifact {
    /// An entry backed by a build output
    pub fn from_build_artifact(artifact: &BuildArtifact, transform: Transform) -> Self {
        Self {
            source: ArtifactSource::Build {
                digest: artifact.digest.clone(),
                path: artifact.path.clone(),
            },
            target: artifact.target.clone(),
            transform,
        }
    }

    /// An entry backed by a workspace file
    pub fn workspace(
        path: impl Into<PathBuf>,
        target: impl Into<String>,
        transform: Transform,
    ) -> Self {
        Self {
            source: ArtifactSource::Workspace { path: path.into() },
            target: target.into(),
            transform,
        }
    }

    /// Whether the bytes come from the workspace rather than the build cache
    pub fn is_workspace_file(&self) -> bool {
        matches!(self.source, ArtifactSource::Workspace { .. })
    }

    /// The build artifact backing this entry, if any
    pub fn build_artifact(&self) -> Option<BuildArtifact> {
        match &self.source {
            ArtifactSource::Build { digest, path } => Some(BuildArtifact::new(
                digest.clone(),
                path.clone(),
                self.target.clone(),
            )),
            ArtifactSource::Workspace { .. } => None,
        }
    }

    /// The protobuf representation of this entry
    pub fn to_proto(&self) -> Result<proto::ProjectArtifact, ManifestError> {
        let (origin, artifact_path) = match &self.source {
            ArtifactSource::Build { digest, path } => (
                proto::project_artifact::Origin::Digest(digest.clone()),
                path_to_string(path)?,
            ),
            ArtifactSource::Workspace { path } => (
                proto::project_artifact::Origin::WorkspaceRelativePath(path_to_string(path)?),
                String::new(),
            ),
        };

        Ok(proto::ProjectArtifact {
            origin: Some(origin),
            target: self.target.clone(),
            transform: proto::ArtifactTransform::from(self.transform) as i32,
            artifact_path,
        })
    }

    fn from_proto(destination: &str, value: proto::ProjectArtifact) -> Result<Self, ManifestError> {
        let transform = proto::ArtifactTransform::try_from(value.transform)
            .map_err(|_| ManifestError::UnknownTransform {
                destination: destination.to_string(),
                value: value.transform,
            })?
            .into();

        let source = match value.origin {
            Some(proto::project_artifact::Origin::Digest(digest)) => ArtifactSource::Build {
                digest,
                path: PathBuf::from(value.artifact_path),
            },
            Some(proto::project_artifact::Origin::WorkspaceRelativePath(path)) => {
                ArtifactSource::Workspace {
                    path: PathBuf::from(path),
                }
            }
            None => return Err(ManifestError::MissingOrigin(destination.to_string())),
        };

        Ok(Self {
            source,
            target: value.target,
            transform,
        })
    }
}

impl From<Transform> for proto::ArtifactTransform {
    fn from(value: Transform) -> Self {
        match value {
            Transform::Copy => proto::ArtifactTransform::Copy,
            Transform::Unzip => proto::ArtifactTransform::Unzip,
            Transform::StripSupportedGeneratedSources => {
                proto::ArtifactTransform::StripSupportedGeneratedSources
            }
        }
    }
}

impl From<proto::ArtifactTransform> for Transform {
    fn from(value: proto::ArtifactTransform) -> Self {
        match value {
            proto::ArtifactTransform::Copy => Transform::Copy,
            proto::ArtifactTransform::Unzip => Transform::Unzip,
            proto::ArtifactTransform::StripSupportedGeneratedSources => {
                Transform::StripSupportedGeneratedSources
            }
        }
    }
}

/// The desired contents of one artifact directory
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactDirectoryContents {
    /// Destination-relative path to the artifact placed there
    pub contents: BTreeMap<PathBuf, ProjectArtifact>,
}

impl ArtifactDirectoryContents {
    /// Create an empty manifest
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an entry, replacing any previous entry for the same destination
    pub fn insert(&mut self, destination: impl Into<PathBuf>, artifact: ProjectArtifact) {
        self.contents.insert(destination.into(), artifact);
    }

    pub fn get(&self, destination: &Path) -> Option<&ProjectArtifact> {
        self.contents.get(destination)
    }

    pub fn is_empty(&self) -> bool {
        self.contents.is_empty()
    }

    pub fn len(&self) -> usize {
        self.contents.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&PathBuf, &ProjectArtifact)> {
        self.contents.iter()
    }

    /// Every build artifact referenced by the manifest
    pub fn build_artifacts(&self) -> impl Iterator<Item = BuildArtifact> + '_ {
        self.contents.values().filter_map(ProjectArtifact::build_artifact)
    }

    /// Whether any destination lies strictly beneath `directory`
    pub fn has_entries_under(&self, directory: &Path) -> bool {
        self.contents
            .range::<Path, _>((Bound::Excluded(directory), Bound::Unbounded))
            .next()
            .is_some_and(|(destination, _)| destination.starts_with(directory))
    }

    /// Check that every destination and every workspace source is a
    /// normalized relative path.
    pub fn validate(&self) -> Result<(), ManifestError> {
        for (destination, artifact) in &self.contents {
            if !is_normal_relative(destination) {
                return Err(ManifestError::InvalidDestination(destination.clone()));
            }
            if let ArtifactSource::Workspace { path } = &artifact.source
                && !is_normal_relative(path)
            {
                return Err(ManifestError::InvalidWorkspacePath {
                    destination: destination.clone(),
                    path: path.clone(),
                });
            }
        }
        Ok(())
    }

    /// The location of the persisted manifest for the directory at `root`.
    pub fn sidecar_path(root: &Path) -> PathBuf {
        let mut name = root
            .file_name()
            .map(OsString::from)
            .unwrap_or_default();
        name.push(".contents");
        root.with_file_name(name)
    }

    /// Read a persisted manifest. Returns `None` if the file does not exist.
    pub fn read_sidecar(path: &Path) -> Result<Option<Self>, ManifestError> {
        let bytes = match fs::read(path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let message = proto::ArtifactDirectoryContents::decode(bytes.as_slice()).map_err(
            |source| ManifestError::Decode {
                path: path.to_path_buf(),
                source,
            },
        )?;

        Self::try_from(message).map(Some)
    }

    /// Persist the manifest. The file is written next to its final location
    /// and renamed into place.
    pub fn write_sidecar(&self, path: &Path) -> Result<(), ManifestError> {
        let message = proto::ArtifactDirectoryContents::try_from(self)?;

        let mut tmp_name = path.file_name().map(OsString::from).unwrap_or_default();
        tmp_name.push(".tmp");
        let tmp_path = path.with_file_name(tmp_name);

        fs::write(&tmp_path, message.encode_to_vec())?;
        fs::rename(&tmp_path, path)?;
        Ok(())
    }

    /// Parse a manifest from its JSON form.
    pub fn from_json(json: &str) -> Result<Self, ManifestError> {
        let contents: Self = serde_json::from_str(json)?;
        contents.validate()?;
        Ok(contents)
    }

    /// Render the manifest as pretty-printed JSON.
    pub fn to_json(&self) -> Result<String, ManifestError> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

impl TryFrom<&ArtifactDirectoryContents> for proto::ArtifactDirectoryContents {
    type Error = ManifestError;

    fn try_from(value: &ArtifactDirectoryContents) -> Result<Self, Self::Error> {
        let contents = value
            .contents
            .iter()
            .map(|(destination, artifact)| Ok((path_to_string(destination)?, artifact.to_proto()?)))
            .collect::<Result<_, ManifestError>>()?;
        Ok(Self { contents })
    }
}

impl TryFrom<proto::ArtifactDirectoryContents> for ArtifactDirectoryContents {
    type Error = ManifestError;

    fn try_from(value: proto::ArtifactDirectoryContents) -> Result<Self, Self::Error> {
        let contents = value
            .contents
            .into_iter()
            .map(|(destination, artifact)| {
                let artifact = ProjectArtifact::from_proto(&destination, artifact)?;
                Ok((PathBuf::from(destination), artifact))
            })
            .collect::<Result<_, ManifestError>>()?;

        let contents = Self { contents };
        contents.validate()?;
        Ok(contents)
    }
}

fn path_to_string(path: &Path) -> Result<String, ManifestError> {
    path.to_str()
        .map(str::to_string)
        .ok_or_else(|| ManifestError::NonUtf8Path(path.to_path_buf()))
}

fn is_normal_relative(path: &Path) -> bool {
    path.components().next().is_some()
        && path.components().all(|c| matches!(c, Component::Normal(_)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> ArtifactDirectoryContents {
        let mut contents = ArtifactDirectoryContents::new();
        contents.insert(
            "java/com/example/Gen.java",
            ProjectArtifact::from_build_artifact(
                &BuildArtifact::new("abc123", "bazel-out/k8/bin/gen/Gen.java", "//gen:gen"),
                Transform::Copy,
            ),
        );
        contents.insert(
            "srcjars/gen",
            ProjectArtifact::from_build_artifact(
                &BuildArtifact::new("def456", "bazel-out/k8/bin/gen/gen.srcjar", "//gen:gen"),
                Transform::Unzip,
            ),
        );
        contents.insert(
            "res/values.xml",
            ProjectArtifact::workspace("app/res/values.xml", "//app", Transform::Copy),
        );
        contents
    }

    #[test]
    fn test_sidecar_path() {
        assert_eq!(
            ArtifactDirectoryContents::sidecar_path(Path::new("/cache/gensrc")),
            PathBuf::from("/cache/gensrc.contents")
        );
    }

    #[test]
    fn test_has_entries_under() {
        let contents = sample();
        assert!(contents.has_entries_under(Path::new("java")));
        assert!(contents.has_entries_under(Path::new("java/com")));
        assert!(!contents.has_entries_under(Path::new("java/com/example/Gen.java")));
        assert!(!contents.has_entries_under(Path::new("srcjars/gen")));
        assert!(!contents.has_entries_under(Path::new("res/values")));
        assert!(!contents.has_entries_under(Path::new("other")));
    }

    #[test]
    fn test_sidecar_persistence() {
        let dir = tempfile::tempdir().unwrap();
        let sidecar = dir.path().join("gensrc.contents");

        assert!(
            ArtifactDirectoryContents::read_sidecar(&sidecar)
                .unwrap()
                .is_none()
        );

        let contents = sample();
        contents.write_sidecar(&sidecar).unwrap();
        assert!(!dir.path().join("gensrc.contents.tmp").exists());

        let read = ArtifactDirectoryContents::read_sidecar(&sidecar)
            .unwrap()
            .unwrap();
        assert_eq!(read, contents);
    }

    #[test]
    fn test_corrupt_sidecar() {
        let dir = tempfile::tempdir().unwrap();
        let sidecar = dir.path().join("gensrc.contents");
        fs::write(&sidecar, [0xff, 0xff, 0xff]).unwrap();

        let result = ArtifactDirectoryContents::read_sidecar(&sidecar);
        assert!(matches!(result, Err(ManifestError::Decode { .. })));
    }

    #[test]
    fn test_unknown_transform_is_rejected() {
        let mut message = proto::ArtifactDirectoryContents::try_from(&sample()).unwrap();
        message
            .contents
            .get_mut("res/values.xml")
            .unwrap()
            .transform = 42;

        let result = ArtifactDirectoryContents::try_from(message);
        assert!(matches!(
            result,
            Err(ManifestError::UnknownTransform { value: 42, .. })
        ));
    }

    #[test]
    fn test_json_manifest() {
        let json = r#"{
            "contents": {
                "gen/Foo.java": {
                    "source": { "kind": "build", "digest": "abc", "path": "out/Foo.java" },
                    "target": "//foo"
                },
                "res": {
                    "source": { "kind": "workspace", "path": "foo/res.zip" },
                    "target": "//foo",
                    "transform": "unzip"
                }
            }
        }"#;

        let contents = ArtifactDirectoryContents::from_json(json).unwrap();
        assert_eq!(contents.len(), 2);
        assert_eq!(
            contents.get(Path::new("gen/Foo.java")).unwrap().transform,
            Transform::Copy
        );
        assert!(contents.get(Path::new("res")).unwrap().is_workspace_file());
        assert_eq!(contents.build_artifacts().count(), 1);
    }

    #[test]
    fn test_escaping_destination_is_rejected() {
        let json = r#"{
            "contents": {
                "../outside": {
                    "source": { "kind": "workspace", "path": "a" },
                    "target": "//a"
                }
            }
        }"#;
        assert!(matches!(
            ArtifactDirectoryContents::from_json(json),
            Err(ManifestError::InvalidDestination(_))
        ));
    }

    #[test]
    fn test_escaping_workspace_path_is_rejected() {
        for path in ["../secret", "/etc/passwd", "res/../../secret"] {
            let mut contents = ArtifactDirectoryContents::new();
            contents.insert(
                "res/values.xml",
                ProjectArtifact::workspace(path, "//app", Transform::Copy),
            );
            assert!(
                matches!(
                    contents.validate(),
                    Err(ManifestError::InvalidWorkspacePath { .. })
                ),
                "{path} was accepted"
            );
        }
    }
}
