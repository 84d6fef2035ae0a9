//! The boundary to wherever artifact bytes actually come from

use std::{io::ErrorKind, path::PathBuf};

use futures::{FutureExt, future::BoxFuture};

use crate::error::CacheError;

/// Completes once one requested artifact has been written to its destination
pub type FetchFuture = BoxFuture<'static, Result<(), CacheError>>;

/// A request to write the artifact with `digest` to `destination`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchRequest {
    pub digest: String,
    pub destination: PathBuf,
}

/// Fetches artifacts into the cache, e.g. from a remote build output store.
pub trait ArtifactFetcher: Send + Sync {
    /// Start writing every requested artifact to its destination.
    ///
    /// Returns one future per request, in request order. Requests may complete
    /// or fail in any order and independently of each other.
    fn fetch(&self, requests: &[FetchRequest]) -> Vec<FetchFuture>;
}

/// A fetcher for caches that are only read from, e.g. for maintenance. Every
/// fetch fails.
#[derive(Debug, Clone, Copy, Default)]
pub struct OfflineFetcher;

impl ArtifactFetcher for OfflineFetcher {
    fn fetch(&self, requests: &[FetchRequest]) -> Vec<FetchFuture> {
        requests
            .iter()
            .map(|request| {
                let digest = request.digest.clone();
                async move { Err(CacheError::Offline(digest)) }.boxed()
            })
            .collect()
    }
}

/// Fetches artifacts from a local directory containing one file per digest,
/// such as a mirror of a remote cache or a local build's output store.
#[derive(Debug, Clone)]
pub struct LocalDirectoryFetcher {
    store: PathBuf,
}

impl LocalDirectoryFetcher {
    pub fn new(store: impl Into<PathBuf>) -> Self {
        Self {
            store: store.into(),
        }
    }
}

impl ArtifactFetcher for LocalDirectoryFetcher {
    fn fetch(&self, requests: &[FetchRequest]) -> Vec<FetchFuture> {
        requests
            .iter()
            .map(|request| {
                let store = self.store.clone();
                let request = request.clone();
                async move {
                    let source = store.join(&request.digest);
                    match fs_err::tokio::copy(&source, &request.destination).await {
                        Ok(_) => Ok(()),
                        Err(e) if e.kind() == ErrorKind::NotFound => {
                            Err(CacheError::ArtifactNotFound {
                                digest: request.digest,
                                store,
                            })
                        }
                        Err(e) => Err(e.into()),
                    }
                }
                .boxed()
            })
            .collect()
    }
}
