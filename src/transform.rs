//! Strategies for placing one artifact at its destination

use std::{
    collections::BTreeSet,
    fmt, io,
    path::{Path, PathBuf},
    sync::Arc,
};

use artifact_sync_cache::CachedArtifact;
use artifact_sync_types::Transform;
use fs_err as fs;

use crate::{error::TransformError, tool_configuration::Configuration};

/// Removes generated sources that the IDE can index from a source archive.
pub trait GeneratedSourceStripper: Send + Sync {
    /// Write `source` to `destination` without the generated sources and
    /// return every file written.
    fn strip(
        &self,
        source: &CachedArtifact,
        destination: &Path,
    ) -> Result<BTreeSet<PathBuf>, TransformError>;
}

/// How the bytes of an artifact end up at its destination
#[derive(Clone)]
pub enum FileTransform {
    /// Copy the artifact unchanged
    Copy,
    /// Expand the artifact as a zip archive into the destination directory
    Unzip,
    /// Copy the artifact without its generated sources
    StripGeneratedSources(Arc<dyn GeneratedSourceStripper>),
}

impl fmt::Debug for FileTransform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FileTransform::Copy => write!(f, "Copy"),
            FileTransform::Unzip => write!(f, "Unzip"),
            FileTransform::StripGeneratedSources(_) => write!(f, "StripGeneratedSources"),
        }
    }
}

impl FileTransform {
    /// Pick the transform for a manifest entry.
    ///
    /// Stripping generated sources is experimental: unless it is enabled and a
    /// stripper is configured, those artifacts are copied.
    pub fn for_transform(transform: Transform, config: &Configuration) -> Self {
        match transform {
            Transform::Copy => FileTransform::Copy,
            Transform::Unzip => FileTransform::Unzip,
            Transform::StripSupportedGeneratedSources => match &config.stripper {
                Some(stripper) if config.strip_generated_sources => {
                    FileTransform::StripGeneratedSources(stripper.clone())
                }
                _ => FileTransform::Copy,
            },
        }
    }

    /// Write `source` to `destination` and return every file that was written.
    ///
    /// The parent of `destination` must exist and `destination` itself must not.
    pub fn copy_with_transform(
        &self,
        source: &CachedArtifact,
        destination: &Path,
    ) -> Result<BTreeSet<PathBuf>, TransformError> {
        match self {
            FileTransform::Copy => {
                reflink_copy::reflink_or_copy(source.path(), destination).map_err(|e| {
                    io::Error::new(
                        e.kind(),
                        format!(
                            "failed to copy {} to {}: {}",
                            source.path().display(),
                            destination.display(),
                            e
                        ),
                    )
                })?;
                Ok(BTreeSet::from([destination.to_path_buf()]))
            }
            FileTransform::Unzip => extract_zip(source, destination),
            FileTransform::StripGeneratedSources(stripper) => stripper.strip(source, destination),
        }
    }
}

/// Extracts a zip archive into `target_directory`.
///
/// Parent directories are created as needed, so archives without explicit
/// directory entries extract fine. Only files are reported.
fn extract_zip(
    source: &CachedArtifact,
    target_directory: &Path,
) -> Result<BTreeSet<PathBuf>, TransformError> {
    let mut archive = source.open_as_zip()?;
    fs::create_dir_all(target_directory)?;

    let mut written = BTreeSet::new();
    for index in 0..archive.len() {
        let mut entry = archive
            .by_index(index)
            .map_err(|source_err| TransformError::Zip {
                path: source.path().to_path_buf(),
                source: source_err,
            })?;

        let Some(relative) = entry.enclosed_name() else {
            return Err(TransformError::UnsafeEntry {
                archive: source.path().to_path_buf(),
                name: entry.name().to_string(),
            });
        };
        let path = target_directory.join(relative);

        if entry.is_dir() {
            fs::create_dir_all(&path)?;
            continue;
        }

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut file = fs::File::create(&path)?;
        io::copy(&mut entry, &mut file)?;
        written.insert(path);
    }

    tracing::trace!(
        "Extracted {} files from {} to {}",
        written.len(),
        source.path().display(),
        target_directory.display()
    );

    Ok(written)
}

#[cfg(test)]
mod test {
    use std::io::Write;

    use zip::write::SimpleFileOptions;

    use super::*;

    fn write_zip(path: &Path, directories: &[&str], files: &[(&str, &str)]) {
        let mut writer = zip::ZipWriter::new(std::fs::File::create(path).unwrap());
        let options =
            SimpleFileOptions::default().compression_method(zip::CompressionMethod::Stored);
        for directory in directories {
            writer.add_directory(*directory, options).unwrap();
        }
        for (name, content) in files {
            writer.start_file(*name, options).unwrap();
            writer.write_all(content.as_bytes()).unwrap();
        }
        writer.finish().unwrap();
    }

    struct UppercaseStripper;

    impl GeneratedSourceStripper for UppercaseStripper {
        fn strip(
            &self,
            source: &CachedArtifact,
            destination: &Path,
        ) -> Result<BTreeSet<PathBuf>, TransformError> {
            let content = String::from_utf8_lossy(&source.read_to_vec()?).to_uppercase();
            fs::write(destination, content)?;
            Ok(BTreeSet::from([destination.to_path_buf()]))
        }
    }

    #[test]
    fn test_copy() {
        let tempdir = tempfile::tempdir().unwrap();
        let source = tempdir.path().join("source");
        fs::write(&source, "Hello, World").unwrap();
        let destination = tempdir.path().join("out.jar");

        let written = FileTransform::Copy
            .copy_with_transform(&CachedArtifact::new(&source), &destination)
            .unwrap();

        assert_eq!(written, BTreeSet::from([destination.clone()]));
        assert_eq!(fs::read_to_string(&destination).unwrap(), "Hello, World");
    }

    #[test]
    fn test_unzip_with_directory_entries() {
        let tempdir = tempfile::tempdir().unwrap();
        let archive = tempdir.path().join("lib.aar");
        write_zip(
            &archive,
            &["res/", "res/values/", "empty/"],
            &[("res/values/strings.xml", "<resources/>"), ("classes.jar", "jar")],
        );
        let destination = tempdir.path().join("lib");

        let written = FileTransform::Unzip
            .copy_with_transform(&CachedArtifact::new(&archive), &destination)
            .unwrap();

        assert_eq!(
            written,
            BTreeSet::from([
                destination.join("classes.jar"),
                destination.join("res/values/strings.xml"),
            ])
        );
        assert!(destination.join("empty").is_dir());
        assert_eq!(
            fs::read_to_string(destination.join("res/values/strings.xml")).unwrap(),
            "<resources/>"
        );
    }

    #[test]
    fn test_unzip_without_directory_entries() {
        let tempdir = tempfile::tempdir().unwrap();
        let archive = tempdir.path().join("gen.srcjar");
        write_zip(
            &archive,
            &[],
            &[
                ("com/example/Gen.java", "class Gen {}"),
                ("com/example/inner/Other.java", "class Other {}"),
            ],
        );
        let destination = tempdir.path().join("gen");

        let written = FileTransform::Unzip
            .copy_with_transform(&CachedArtifact::new(&archive), &destination)
            .unwrap();

        assert_eq!(written.len(), 2);
        assert_eq!(
            fs::read_to_string(destination.join("com/example/inner/Other.java")).unwrap(),
            "class Other {}"
        );
    }

    #[test]
    fn test_unzip_rejects_escaping_entries() {
        let tempdir = tempfile::tempdir().unwrap();
        let archive = tempdir.path().join("evil.zip");
        write_zip(&archive, &[], &[("../escape.txt", "nope")]);

        let result = FileTransform::Unzip
            .copy_with_transform(&CachedArtifact::new(&archive), &tempdir.path().join("out"));

        assert!(matches!(result, Err(TransformError::UnsafeEntry { .. })));
        assert!(!tempdir.path().join("escape.txt").exists());
    }

    #[test]
    fn test_unzip_invalid_archive() {
        let tempdir = tempfile::tempdir().unwrap();
        let archive = tempdir.path().join("broken.zip");
        fs::write(&archive, "not a zip").unwrap();

        let result = FileTransform::Unzip
            .copy_with_transform(&CachedArtifact::new(&archive), &tempdir.path().join("out"));

        assert!(matches!(result, Err(TransformError::Cache(_))));
    }

    #[test]
    fn test_strip_generated_sources_needs_experiment() {
        let stripper: Arc<dyn GeneratedSourceStripper> = Arc::new(UppercaseStripper);
        let transform = Transform::StripSupportedGeneratedSources;

        let disabled = Configuration {
            strip_generated_sources: false,
            stripper: Some(stripper.clone()),
        };
        assert!(matches!(
            FileTransform::for_transform(transform, &disabled),
            FileTransform::Copy
        ));
        assert!(matches!(
            FileTransform::for_transform(transform, &Configuration::default()),
            FileTransform::Copy
        ));

        let enabled = Configuration::default().with_stripper(stripper);
        let file_transform = FileTransform::for_transform(transform, &enabled);
        assert!(matches!(
            file_transform,
            FileTransform::StripGeneratedSources(_)
        ));

        let tempdir = tempfile::tempdir().unwrap();
        let source = tempdir.path().join("source");
        fs::write(&source, "generated").unwrap();
        let destination = tempdir.path().join("stripped");
        file_transform
            .copy_with_transform(&CachedArtifact::new(&source), &destination)
            .unwrap();
        assert_eq!(fs::read_to_string(&destination).unwrap(), "GENERATED");
    }
}
