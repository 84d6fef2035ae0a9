//! The optional `artifact-sync.toml` configuration file
//!
//! ```toml
//! [cache]
//! dir = "/var/cache/artifact-sync"
//! max_size = 10737418240
//! min_keep_age_secs = 86400
//! clean_delay_ms = 10000
//!
//! [experiments]
//! strip_generated_sources = true
//! ```
//!
//! Every key is optional. Command line arguments take precedence.

use std::{
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};

use artifact_sync_cache::{
    ArtifactFetcher, BuildArtifactCache, BuildArtifactCacheBuilder, CleanPolicy,
};
use fs_err as fs;
use miette::Diagnostic;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse config file {path:?}")]
    #[diagnostic(help("see `artifact-sync --help` for the supported keys"))]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ConfigFile {
    pub cache: CacheConfig,
    pub experiments: ExperimentsConfig,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CacheConfig {
    /// Where the artifact cache lives
    pub dir: Option<PathBuf>,
    /// Target size of the cache in bytes
    pub max_size: Option<u64>,
    /// Artifacts used more recently than this are never evicted
    pub min_keep_age_secs: Option<u64>,
    /// How long the cache must be idle before it cleans itself
    pub clean_delay_ms: Option<u64>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ExperimentsConfig {
    pub strip_generated_sources: bool,
}

impl ConfigFile {
    /// Load the configuration from `path`
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path)?;
        toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// The clean policy, with defaults for everything not configured
    pub fn clean_policy(&self) -> CleanPolicy {
        let default = CleanPolicy::default();
        CleanPolicy {
            max_target_size: self.cache.max_size.unwrap_or(default.max_target_size),
            min_keep_age: self
                .cache
                .min_keep_age_secs
                .and_then(|secs| chrono::Duration::try_seconds(secs.try_into().ok()?))
                .unwrap_or(default.min_keep_age),
            delay: self
                .cache
                .clean_delay_ms
                .map(Duration::from_millis)
                .unwrap_or(default.delay),
        }
    }

    /// A cache builder for `cache_dir` that cleans itself with the configured
    /// policy whenever it becomes idle.
    pub fn cache_builder(
        &self,
        fetcher: Arc<dyn ArtifactFetcher>,
        cache_dir: PathBuf,
    ) -> BuildArtifactCacheBuilder {
        BuildArtifactCache::builder(fetcher)
            .cache_dir(cache_dir)
            .clean_policy(self.clean_policy())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_config() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("artifact-sync.toml");
        fs::write(
            &path,
            r#"
[cache]
dir = "/tmp/artifacts"
max_size = 1024
min_keep_age_secs = 60

[experiments]
strip_generated_sources = true
"#,
        )
        .unwrap();

        let config = ConfigFile::load(&path).unwrap();
        assert_eq!(config.cache.dir, Some(PathBuf::from("/tmp/artifacts")));
        assert!(config.experiments.strip_generated_sources);

        let policy = config.clean_policy();
        assert_eq!(policy.max_target_size, 1024);
        assert_eq!(policy.min_keep_age, chrono::Duration::seconds(60));
        assert_eq!(policy.delay, CleanPolicy::default().delay);
    }

    #[test]
    fn test_empty_config() {
        let config: ConfigFile = toml::from_str("").unwrap();
        assert_eq!(config, ConfigFile::default());
        assert_eq!(config.clean_policy(), CleanPolicy::default());
    }

    #[test]
    fn test_unknown_key() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("artifact-sync.toml");
        fs::write(&path, "[cache]\nmax_sise = 1\n").unwrap();

        assert!(matches!(
            ConfigFile::load(&path),
            Err(ConfigError::Parse { .. })
        ));
    }

    #[tokio::test]
    async fn test_cache_cleans_with_configured_policy() {
        let store = tempfile::tempdir().unwrap();
        let cache_dir = tempfile::tempdir().unwrap();
        fs::write(store.path().join("aaa"), "artifact").unwrap();

        let config: ConfigFile = toml::from_str(
            r#"
[cache]
max_size = 0
min_keep_age_secs = 0
clean_delay_ms = 10
"#,
        )
        .unwrap();
        assert_eq!(config.clean_policy().delay, Duration::from_millis(10));

        let fetcher = Arc::new(artifact_sync_cache::LocalDirectoryFetcher::new(store.path()));
        let cache = config
            .cache_builder(fetcher, cache_dir.path().to_path_buf())
            .build()
            .await
            .unwrap();
        cache
            .add_all([&artifact_sync_types::BuildArtifact::new(
                "aaa",
                "bazel-out/bin/aaa",
                "//app:lib",
            )])
            .await
            .unwrap();

        for _ in 0..500 {
            if !cache.contains("aaa") {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(!cache.contains("aaa"));
    }
}
