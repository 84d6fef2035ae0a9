//! # artifact-sync
//!
//! Keeps artifact directories, such as the generated sources and libraries an
//! IDE indexes, in agreement with a declarative manifest. Build outputs are
//! read from a digest-keyed [`BuildArtifactCache`] that fetches whatever it is
//! missing; workspace files are read from the workspace root.
//!
//! ```no_run
//! # async fn example(cache: artifact_sync::BuildArtifactCache) -> miette::Result<()> {
//! use artifact_sync::{ArtifactDirectoryUpdate, tool_configuration::Configuration};
//! use artifact_sync_types::ArtifactDirectoryContents;
//! use miette::IntoDiagnostic;
//!
//! let json = fs_err::read_to_string("manifest.json").into_diagnostic()?;
//! let contents = ArtifactDirectoryContents::from_json(&json).into_diagnostic()?;
//! let artifacts: Vec<_> = contents.build_artifacts().collect();
//! cache.add_all(&artifacts).await.into_diagnostic()?;
//!
//! let mut update =
//!     ArtifactDirectoryUpdate::new(cache, ".", "ide/gensrc", contents, Configuration::default());
//! update.update().await?;
//! println!("{} files written", update.updated_paths().len());
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod console_utils;
pub mod directory_update;
pub mod error;
pub mod opt;
pub mod sync;
pub mod tool_configuration;
pub mod transform;

pub use artifact_sync_cache::{BuildArtifactCache, CachedArtifact};
pub use directory_update::ArtifactDirectoryUpdate;
pub use error::{ArtifactDirectoryError, TransformError, UpdateError};
pub use sync::{DirectorySync, sync_directories};
pub use transform::{FileTransform, GeneratedSourceStripper};
