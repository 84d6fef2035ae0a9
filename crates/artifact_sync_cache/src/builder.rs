//! Builder for configuring and creating a BuildArtifactCache instance

use std::{path::PathBuf, sync::Arc, time::Duration};

use crate::{
    cache::BuildArtifactCache,
    error::CacheError,
    fetcher::ArtifactFetcher,
};

/// Trait for handling progress updates
pub trait ProgressHandler: Send + Sync {
    /// Called when a batch of fetches is issued
    fn on_fetch_start(&self, count: usize);

    /// Called when an artifact has been added to the cache
    fn on_fetch_complete(&self, digest: &str, size: u64);

    /// Called when fetching an artifact failed
    fn on_fetch_failed(&self, digest: &str, error: &CacheError);
}

/// When and how far the cache cleans itself after fetches
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CleanPolicy {
    /// Evict least recently used artifacts until the cache is at most this big
    pub max_target_size: u64,

    /// Never evict artifacts accessed more recently than this
    pub min_keep_age: chrono::Duration,

    /// How long the cache must be idle before a requested clean runs
    pub delay: Duration,
}

impl Default for CleanPolicy {
    fn default() -> Self {
        Self {
            max_target_size: 5 * 1024 * 1024 * 1024,
            min_keep_age: chrono::Duration::days(1),
            delay: Duration::from_secs(10),
        }
    }
}

/// Builder for creating a configured BuildArtifactCache
pub struct BuildArtifactCacheBuilder {
    cache_dir: Option<PathBuf>,
    fetcher: Arc<dyn ArtifactFetcher>,
    clean_policy: Option<CleanPolicy>,
    verify_digests: bool,
    progress_handler: Option<Arc<dyn ProgressHandler>>,
    runtime: Option<tokio::runtime::Handle>,
}

impl BuildArtifactCacheBuilder {
    /// Create a new builder that fetches missing artifacts with `fetcher`
    pub fn new(fetcher: Arc<dyn ArtifactFetcher>) -> Self {
        Self {
            cache_dir: None,
            fetcher,
            clean_policy: None,
            verify_digests: false,
            progress_handler: None,
            runtime: None,
        }
    }

    /// Set the cache directory
    pub fn cache_dir<P: Into<PathBuf>>(mut self, dir: P) -> Self {
        self.cache_dir = Some(dir.into());
        self
    }

    /// Clean the cache automatically whenever it becomes idle
    pub fn clean_policy(mut self, policy: CleanPolicy) -> Self {
        self.clean_policy = Some(policy);
        self
    }

    /// Check that fetched artifacts hash to their SHA-256 digest
    pub fn verify_digests(mut self, verify: bool) -> Self {
        self.verify_digests = verify;
        self
    }

    /// Set a progress handler for fetch operations
    pub fn progress_handler<H: ProgressHandler + 'static>(mut self, handler: H) -> Self {
        self.progress_handler = Some(Arc::new(handler));
        self
    }

    /// Run fetches and cleaning on this runtime instead of the current one
    pub fn runtime(mut self, handle: tokio::runtime::Handle) -> Self {
        self.runtime = Some(handle);
        self
    }

    /// Build the BuildArtifactCache instance
    pub async fn build(self) -> Result<BuildArtifactCache, CacheError> {
        // Use default cache directory if not specified
        let cache_dir = self.cache_dir.unwrap_or_else(default_cache_dir);
        let runtime = self
            .runtime
            .unwrap_or_else(tokio::runtime::Handle::current);

        BuildArtifactCache::new(
            cache_dir,
            self.fetcher,
            runtime,
            self.clean_policy,
            self.verify_digests,
            self.progress_handler,
        )
        .await
    }
}

/// The cache directory used when none is configured
pub fn default_cache_dir() -> PathBuf {
    dirs::cache_dir()
        .unwrap_or_else(|| PathBuf::from(".cache"))
        .join("artifact-sync")
        .join("artifacts")
}

pub(crate) mod dirs {
    use std::path::PathBuf;

    pub fn cache_dir() -> Option<PathBuf> {
        #[cfg(target_os = "macos")]
        {
            std::env::var("HOME")
                .ok()
                .map(|home| PathBuf::from(home).join("Library").join("Caches"))
        }

        #[cfg(target_os = "linux")]
        {
            std::env::var("XDG_CACHE_HOME")
                .ok()
                .map(PathBuf::from)
                .or_else(|| {
                    std::env::var("HOME")
                        .ok()
                        .map(|home| PathBuf::from(home).join(".cache"))
                })
        }

        #[cfg(target_os = "windows")]
        {
            std::env::var("LOCALAPPDATA").ok().map(PathBuf::from)
        }

        #[cfg(not(any(target_os = "macos", target_os = "linux", target_os = "windows")))]
        {
            None
        }
    }
}
