//! Command-line options.

use std::path::PathBuf;

use clap::{Parser, crate_version};
use clap_verbosity_flag::{InfoLevel, Verbosity};

/// Application subcommands.
#[derive(Parser)]
pub enum SubCommands {
    /// Update an artifact directory to match a manifest
    ///
    /// Missing build artifacts are fetched into the cache first. Entries that
    /// did not change since the last update are left alone and everything not
    /// in the manifest is deleted.
    Update(UpdateOpts),

    /// Inspect and maintain the artifact cache
    #[clap(subcommand)]
    Cache(CacheCommands),

    /// Inspect the manifests persisted next to artifact directories
    #[clap(subcommand)]
    Manifest(ManifestCommands),
}

#[allow(missing_docs)]
#[derive(Parser)]
#[clap(version = crate_version!())]
pub struct App {
    /// Subcommand.
    #[clap(subcommand)]
    pub subcommand: SubCommands,

    /// Enable verbose logging.
    #[command(flatten)]
    pub verbose: Verbosity<InfoLevel>,

    /// The artifact cache directory
    #[arg(long, env = "ARTIFACT_SYNC_CACHE_DIR", global = true)]
    pub cache_dir: Option<PathBuf>,

    /// The artifact-sync configuration file to use
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,
}

/// Options for the `update` command
#[derive(Parser, Debug)]
pub struct UpdateOpts {
    /// The JSON manifest describing the directory contents
    #[arg(short, long)]
    pub manifest: PathBuf,

    /// The artifact directory to update
    #[arg(short, long)]
    pub dest: PathBuf,

    /// The root that workspace files in the manifest are relative to
    #[arg(long, default_value = ".")]
    pub workspace_root: PathBuf,

    /// A directory with one file per digest to fetch missing artifacts from.
    /// Without it, only artifacts already in the cache can be used.
    #[arg(long, env = "ARTIFACT_SYNC_STORE")]
    pub artifact_store: Option<PathBuf>,

    /// Check that fetched artifacts match their SHA-256 digest
    #[arg(long)]
    pub verify_digests: bool,
}

/// Cache maintenance commands
#[derive(Parser, Debug)]
pub enum CacheCommands {
    /// Show the size of the cache
    Stats,

    /// Evict least recently used artifacts
    Clean {
        /// Target size of the cache in bytes. Defaults to the configured size.
        #[arg(long)]
        max_size: Option<u64>,

        /// Keep artifacts used within this many seconds, even if the cache
        /// stays over its target size. Defaults to the configured age.
        #[arg(long)]
        min_age: Option<u64>,
    },

    /// Delete every artifact in the cache
    Purge,
}

/// Manifest commands
#[derive(Parser, Debug)]
pub enum ManifestCommands {
    /// Print a persisted manifest (`<dir>.contents`) as JSON
    Show {
        /// The manifest file
        path: PathBuf,
    },
}
