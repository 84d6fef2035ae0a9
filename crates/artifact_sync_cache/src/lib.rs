//! # Artifact Sync Cache
//!
//! A local, disk-backed store of build artifacts keyed by content digest.
//! Missing artifacts are fetched through an [`ArtifactFetcher`]; every digest
//! is fetched at most once at a time and entries only become visible once they
//! are completely written. Access times are tracked so the cache can be cleaned
//! in least-recently-used order.

pub mod builder;
pub mod cache;
pub mod cached_artifact;
pub mod error;
pub mod fetcher;
pub mod index;

pub use builder::{BuildArtifactCacheBuilder, CleanPolicy, ProgressHandler, default_cache_dir};
pub use cache::{BuildArtifactCache, CacheStats, CleanReport};
pub use cached_artifact::CachedArtifact;
pub use error::CacheError;
pub use fetcher::{
    ArtifactFetcher, FetchFuture, FetchRequest, LocalDirectoryFetcher, OfflineFetcher,
};
pub use index::CacheEntry;
