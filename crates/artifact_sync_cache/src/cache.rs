//! Main build artifact cache implementation

use std::{
    collections::HashMap,
    path::{Path, PathBuf},
    sync::{
        Arc, Mutex, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard,
        atomic::{AtomicI64, Ordering},
    },
};

use artifact_sync_types::BuildArtifact;
use chrono::{DateTime, Utc};
use fs_err as fs;
use futures::{
    FutureExt,
    future::{self, BoxFuture, Shared},
};
use indexmap::IndexSet;
use sha2::{Digest, Sha256};
use tokio::{runtime::Handle, task::AbortHandle};

use crate::{
    builder::{BuildArtifactCacheBuilder, CleanPolicy, ProgressHandler},
    cached_artifact::CachedArtifact,
    error::CacheError,
    fetcher::{ArtifactFetcher, FetchFuture, FetchRequest},
    index::{CacheEntry, CacheIndex},
};

/// A fetch in flight. Every caller interested in the digest awaits the same
/// future; failures are shared between them.
type SharedFetch = Shared<BoxFuture<'static, Result<(), Arc<CacheError>>>>;

struct Entry {
    size: u64,
    created: DateTime<Utc>,
    /// Milliseconds since the epoch, updated by concurrent readers
    last_accessed: AtomicI64,
}

impl Entry {
    fn new(size: u64, now: DateTime<Utc>) -> Self {
        Self {
            size,
            created: now,
            last_accessed: AtomicI64::new(now.timestamp_millis()),
        }
    }

    fn last_accessed_millis(&self) -> i64 {
        self.last_accessed.load(Ordering::Relaxed)
    }

    fn touch(&self, now: DateTime<Utc>) {
        self.last_accessed
            .fetch_max(now.timestamp_millis(), Ordering::Relaxed);
    }

    fn to_cache_entry(&self, digest: &str) -> CacheEntry {
        CacheEntry {
            digest: digest.to_string(),
            size: self.size,
            created: self.created,
            last_accessed: DateTime::from_timestamp_millis(self.last_accessed_millis())
                .unwrap_or_default(),
        }
    }
}

impl From<&CacheEntry> for Entry {
    fn from(value: &CacheEntry) -> Self {
        Self {
            size: value.size,
            created: value.created,
            last_accessed: AtomicI64::new(value.last_accessed.timestamp_millis()),
        }
    }
}

#[derive(Default)]
struct CacheState {
    /// Artifacts completely written to the cache
    entries: HashMap<String, Entry>,
    /// Artifacts being fetched
    pending: HashMap<String, SharedFetch>,
}

struct Inner {
    index: CacheIndex,
    state: RwLock<CacheState>,
    fetcher: Arc<dyn ArtifactFetcher>,
    runtime: Handle,
    clean_policy: Option<CleanPolicy>,
    clean_request: Mutex<Option<AbortHandle>>,
    verify_digests: bool,
    progress_handler: Option<Arc<dyn ProgressHandler>>,
}

/// A local cache of build artifacts keyed by content digest.
///
/// Cloning the cache is cheap; all clones share the same state.
#[derive(Clone)]
pub struct BuildArtifactCache {
    inner: Arc<Inner>,
}

/// Cache statistics
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheStats {
    pub entries: usize,
    pub total_size: u64,
    pub pending: usize,
}

/// The outcome of a clean
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CleanReport {
    /// Digests of the evicted artifacts, least recently used first
    pub evicted: Vec<String>,
    pub evicted_bytes: u64,
    pub remaining_bytes: u64,
}

impl BuildArtifactCache {
    /// Start configuring a cache that fetches missing artifacts with `fetcher`
    pub fn builder(fetcher: Arc<dyn ArtifactFetcher>) -> BuildArtifactCacheBuilder {
        BuildArtifactCacheBuilder::new(fetcher)
    }

    pub(crate) async fn new(
        cache_dir: PathBuf,
        fetcher: Arc<dyn ArtifactFetcher>,
        runtime: Handle,
        clean_policy: Option<CleanPolicy>,
        verify_digests: bool,
        progress_handler: Option<Arc<dyn ProgressHandler>>,
    ) -> Result<Self, CacheError> {
        let (index, entries) = tokio::task::spawn_blocking(move || {
            let index = CacheIndex::open(cache_dir)?;
            let entries = index.load_all()?;
            Ok::<_, CacheError>((index, entries))
        })
        .await
        .map_err(|e| CacheError::Other(format!("Failed to open the artifact cache: {}", e)))??;

        tracing::debug!(
            "Opened artifact cache at {} with {} entries",
            index.cache_dir().display(),
            entries.len()
        );

        let state = CacheState {
            entries: entries
                .iter()
                .map(|(digest, entry)| (digest.clone(), Entry::from(entry)))
                .collect(),
            pending: HashMap::new(),
        };

        Ok(Self {
            inner: Arc::new(Inner {
                index,
                state: RwLock::new(state),
                fetcher,
                runtime,
                clean_policy,
                clean_request: Mutex::new(None),
                verify_digests,
                progress_handler,
            }),
        })
    }

    /// Get cache directory path
    pub fn cache_dir(&self) -> &Path {
        self.inner.index.cache_dir()
    }

    /// Make sure all `artifacts` are present in the cache.
    ///
    /// Digests are de-duplicated before anything is fetched. Cached artifacts
    /// resolve immediately, artifacts that are already being fetched join the
    /// fetch in flight, and only the rest are handed to the fetcher. The
    /// returned future completes once every artifact is available, or fails
    /// with the first failure. Fetches keep running if it is dropped.
    pub fn add_all<'a, I>(&self, artifacts: I) -> BoxFuture<'static, Result<(), CacheError>>
    where
        I: IntoIterator<Item = &'a BuildArtifact>,
    {
        let digests: IndexSet<&str> = artifacts
            .into_iter()
            .map(|artifact| artifact.digest.as_str())
            .collect();

        let now = Utc::now();
        let mut touched = Vec::new();
        let mut waiting: Vec<(String, SharedFetch)> = Vec::new();
        {
            let mut state = self.inner.write_state();
            let mut requests = Vec::new();

            for digest in digests {
                if let Err(e) = CacheIndex::validate_digest(digest) {
                    let failed = future::ready(Err(Arc::new(e))).boxed().shared();
                    waiting.push((digest.to_string(), failed));
                } else if let Some(entry) = state.entries.get(digest) {
                    entry.touch(now);
                    touched.push(entry.to_cache_entry(digest));
                } else if let Some(pending) = state.pending.get(digest) {
                    waiting.push((digest.to_string(), pending.clone()));
                } else {
                    requests.push(FetchRequest {
                        digest: digest.to_string(),
                        destination: self.inner.index.tmp_path(digest),
                    });
                }
            }

            if !requests.is_empty() {
                // Never evict while something is being written into the cache
                self.inner.cancel_clean();

                tracing::debug!("Fetching {} artifacts", requests.len());
                if let Some(handler) = &self.inner.progress_handler {
                    handler.on_fetch_start(requests.len());
                }

                let mut fetches = self.inner.fetcher.fetch(&requests).into_iter();
                for request in requests {
                    let fetch = fetches.next().unwrap_or_else(|| {
                        let digest = request.digest.clone();
                        async move {
                            Err(CacheError::Other(format!(
                                "The fetcher did not start a fetch for artifact {}",
                                digest
                            )))
                        }
                        .boxed()
                    });
                    let digest = request.digest.clone();
                    let shared = self.inner.spawn_fetch(request, fetch);
                    state.pending.insert(digest.clone(), shared.clone());
                    waiting.push((digest, shared));
                }
            }
        }
        self.inner.persist_entries(&touched);

        async move {
            for (digest, fetch) in waiting {
                fetch
                    .await
                    .map_err(|source| CacheError::Fetch { digest, source })?;
            }
            Ok(())
        }
        .boxed()
    }

    /// Look up an artifact.
    ///
    /// Returns `None` if the artifact is neither cached nor being fetched.
    /// Otherwise the future resolves to the artifact once it is available (right
    /// away if it is cached), or fails if its fetch failed.
    pub fn get(
        &self,
        digest: &str,
    ) -> Option<BoxFuture<'static, Result<CachedArtifact, CacheError>>> {
        let state = self.inner.read_state();

        if let Some(entry) = state.entries.get(digest) {
            entry.touch(Utc::now());
            let cache_entry = entry.to_cache_entry(digest);
            drop(state);

            self.inner.persist_entries(std::slice::from_ref(&cache_entry));
            let artifact = CachedArtifact::new(self.inner.index.artifact_path(digest));
            return Some(future::ready(Ok(artifact)).boxed());
        }

        let pending = state.pending.get(digest)?.clone();
        drop(state);

        let path = self.inner.index.artifact_path(digest);
        let digest = digest.to_string();
        Some(
            async move {
                pending
                    .await
                    .map_err(|source| CacheError::Fetch { digest, source })?;
                Ok(CachedArtifact::new(path))
            }
            .boxed(),
        )
    }

    /// Wait for a build artifact to become available.
    ///
    /// Fails with [`CacheError::NotCached`] if the artifact is neither cached
    /// nor being fetched.
    pub async fn get_artifact(&self, artifact: &BuildArtifact) -> Result<CachedArtifact, CacheError> {
        match self.get(&artifact.digest) {
            Some(future) => future.await,
            None => Err(CacheError::NotCached(artifact.digest.clone())),
        }
    }

    /// Whether the artifact is completely written to the cache
    pub fn contains(&self, digest: &str) -> bool {
        self.inner.read_state().entries.contains_key(digest)
    }

    /// Get cache statistics
    pub fn stats(&self) -> CacheStats {
        let state = self.inner.read_state();
        CacheStats {
            entries: state.entries.len(),
            total_size: state.entries.values().map(|entry| entry.size).sum(),
            pending: state.pending.len(),
        }
    }

    /// Evict least recently used artifacts until the cache holds at most
    /// `max_target_size` bytes. Artifacts accessed within `min_keep_age` are
    /// kept even if that leaves the cache over its target size.
    pub fn clean(
        &self,
        max_target_size: u64,
        min_keep_age: chrono::Duration,
    ) -> Result<CleanReport, CacheError> {
        self.inner
            .clean(max_target_size, min_keep_age, Utc::now(), false)
    }

    /// Delete every artifact in the cache
    pub fn purge(&self) -> Result<(), CacheError> {
        self.inner.cancel_clean();

        let mut state = self.inner.write_state();
        state.entries.clear();
        self.inner.index.clear()?;

        tracing::info!(
            "Purged artifact cache at {}",
            self.inner.index.cache_dir().display()
        );
        Ok(())
    }

    #[cfg(test)]
    pub(crate) fn set_last_accessed(&self, digest: &str, time: DateTime<Utc>) {
        if let Some(entry) = self.inner.read_state().entries.get(digest) {
            entry
                .last_accessed
                .store(time.timestamp_millis(), Ordering::Relaxed);
        }
    }

    #[cfg(test)]
    pub(crate) fn clean_at(
        &self,
        max_target_size: u64,
        min_keep_age: chrono::Duration,
        now: DateTime<Utc>,
    ) -> Result<CleanReport, CacheError> {
        self.inner.clean(max_target_size, min_keep_age, now, false)
    }
}

impl Inner {
    fn read_state(&self) -> RwLockReadGuard<'_, CacheState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_state(&self) -> RwLockWriteGuard<'_, CacheState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Drive `fetch` on the runtime and move its result into the cache.
    fn spawn_fetch(self: &Arc<Self>, request: FetchRequest, fetch: FetchFuture) -> SharedFetch {
        let inner = Arc::clone(self);
        let digest = request.digest.clone();
        let task = self.runtime.spawn(async move {
            let result = fetch.await;
            inner.complete_fetch(request, result).await.map_err(Arc::new)
        });

        let inner = Arc::clone(self);
        async move {
            match task.await {
                Ok(result) => result,
                Err(e) => {
                    tracing::warn!("Fetch task for artifact {} did not finish: {}", digest, e);
                    inner.write_state().pending.remove(&digest);
                    Err(Arc::new(CacheError::Cancelled(digest)))
                }
            }
        }
        .boxed()
        .shared()
    }

    async fn complete_fetch(
        self: Arc<Self>,
        request: FetchRequest,
        result: Result<(), CacheError>,
    ) -> Result<(), CacheError> {
        let result = match result {
            Ok(()) if self.verify_digests => {
                let digest = request.digest.clone();
                let path = request.destination.clone();
                tokio::task::spawn_blocking(move || verify_digest(&digest, &path))
                    .await
                    .map_err(|e| CacheError::Other(e.to_string()))
                    .and_then(|verified| verified)
            }
            other => other,
        };
        let result = result.and_then(|()| Ok(fs::metadata(&request.destination)?.len()));

        let (result, idle) = {
            let mut state = self.write_state();
            state.pending.remove(&request.digest);

            let result = result.and_then(|size| {
                // The rename makes the artifact visible in one step
                fs::rename(
                    &request.destination,
                    self.index.artifact_path(&request.digest),
                )?;
                let entry = Entry::new(size, Utc::now());
                let cache_entry = entry.to_cache_entry(&request.digest);
                state.entries.insert(request.digest.clone(), entry);
                Ok(cache_entry)
            });

            (result, state.pending.is_empty())
        };

        let result = match result {
            Ok(cache_entry) => {
                tracing::debug!(
                    "Added artifact {} ({} bytes) to the cache",
                    cache_entry.digest,
                    cache_entry.size
                );
                self.persist_entries(std::slice::from_ref(&cache_entry));
                if let Some(handler) = &self.progress_handler {
                    handler.on_fetch_complete(&cache_entry.digest, cache_entry.size);
                }
                Ok(())
            }
            Err(e) => {
                let _ = fs::remove_file(&request.destination);
                tracing::warn!("Failed to fetch artifact {}: {}", request.digest, e);
                if let Some(handler) = &self.progress_handler {
                    handler.on_fetch_failed(&request.digest, &e);
                }
                Err(e)
            }
        };

        if idle {
            self.request_clean();
        }

        result
    }

    /// Schedule a clean once the cache has been idle for the policy's delay.
    /// A pending request is replaced, which debounces bursts of fetches.
    fn request_clean(self: &Arc<Self>) {
        let Some(policy) = self.clean_policy.clone() else {
            return;
        };

        let weak = Arc::downgrade(self);
        let task = self.runtime.spawn(async move {
            tokio::time::sleep(policy.delay).await;
            let Some(inner) = weak.upgrade() else {
                return;
            };
            match inner.clean(
                policy.max_target_size,
                policy.min_keep_age,
                Utc::now(),
                true,
            ) {
                Ok(report) if !report.evicted.is_empty() => tracing::info!(
                    "Evicted {} artifacts ({} bytes) from the cache",
                    report.evicted.len(),
                    report.evicted_bytes
                ),
                Ok(_) => {}
                Err(e) => tracing::warn!("Failed to clean the artifact cache: {}", e),
            }
        });

        let previous = self
            .clean_request
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(task.abort_handle());
        if let Some(previous) = previous {
            previous.abort();
        }
    }

    fn cancel_clean(&self) {
        let request = self
            .clean_request
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(request) = request {
            tracing::trace!("Cancelled pending cache clean");
            request.abort();
        }
    }

    fn clean(
        &self,
        max_target_size: u64,
        min_keep_age: chrono::Duration,
        now: DateTime<Utc>,
        only_when_idle: bool,
    ) -> Result<CleanReport, CacheError> {
        let mut state = self.write_state();
        if only_when_idle && !state.pending.is_empty() {
            return Ok(CleanReport::default());
        }

        let mut by_access: Vec<(&String, &Entry)> = state.entries.iter().collect();
        by_access.sort_by_key(|(_, entry)| entry.last_accessed_millis());

        let mut remaining: u64 = by_access.iter().map(|(_, entry)| entry.size).sum();
        // An age floor reaching past the representable range keeps everything
        let keep_after = now
            .checked_sub_signed(min_keep_age)
            .map_or(i64::MIN, |t| t.timestamp_millis());

        let mut to_evict = Vec::new();
        for (digest, entry) in by_access {
            // Everything after this entry was accessed even more recently
            if remaining <= max_target_size || entry.last_accessed_millis() > keep_after {
                break;
            }
            remaining -= entry.size;
            to_evict.push((digest.clone(), entry.size));
        }

        let mut report = CleanReport::default();
        for (digest, size) in to_evict {
            state.entries.remove(&digest);
            match self.index.remove(&digest) {
                Ok(()) => {
                    report.evicted_bytes += size;
                    report.evicted.push(digest);
                }
                Err(e) => {
                    tracing::warn!("Failed to evict artifact {}: {}", digest, e);
                    remaining += size;
                }
            }
        }
        report.remaining_bytes = remaining;

        Ok(report)
    }

    fn persist_entries(&self, entries: &[CacheEntry]) {
        for entry in entries {
            if let Err(e) = self.index.persist(entry) {
                tracing::warn!("Failed to update cache metadata for {}: {}", entry.digest, e);
            }
        }
    }
}

/// Check a fetched file against its digest. Only SHA-256 digests can be
/// checked; others are accepted as is.
fn verify_digest(digest: &str, path: &Path) -> Result<(), CacheError> {
    if digest.len() != 64 || !digest.chars().all(|c| c.is_ascii_hexdigit()) {
        return Ok(());
    }

    let mut file = fs::File::open(path)?;
    let mut hasher = Sha256::new();
    std::io::copy(&mut file, &mut hasher)?;
    let actual = hex::encode(hasher.finalize());

    if actual.eq_ignore_ascii_case(digest) {
        Ok(())
    } else {
        Err(CacheError::DigestMismatch {
            digest: digest.to_string(),
            actual,
        })
    }
}
