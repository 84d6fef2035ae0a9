//! This is the main entry point for the `artifact-sync` binary.

use std::{path::PathBuf, sync::Arc};

use clap::Parser;
use fs_err as fs;
use indicatif::{HumanBytes, MultiProgress};
use miette::IntoDiagnostic;
use tracing_subscriber::{fmt, prelude::*};

use artifact_sync::{
    config::ConfigFile,
    console_utils::{FetchProgress, IndicatifWriter, TracingFormatter, get_default_env_filter},
    opt::{App, CacheCommands, ManifestCommands, SubCommands, UpdateOpts},
    sync_directories,
    tool_configuration::Configuration,
};
use artifact_sync_cache::{
    ArtifactFetcher, BuildArtifactCache, LocalDirectoryFetcher, OfflineFetcher, default_cache_dir,
};
use artifact_sync_types::ArtifactDirectoryContents;

#[tokio::main]
async fn main() -> miette::Result<()> {
    let app = App::parse();

    let multi_progress = MultiProgress::new();

    // Setup tracing subscriber
    tracing_subscriber::registry()
        .with(get_default_env_filter(app.verbose.log_level_filter()))
        .with(
            fmt::layer()
                .with_writer(IndicatifWriter::new(multi_progress.clone()))
                .event_format(TracingFormatter),
        )
        .init();

    let config = match &app.config {
        Some(path) => ConfigFile::load(path)?,
        None => ConfigFile::default(),
    };
    let cache_dir = app
        .cache_dir
        .clone()
        .or_else(|| config.cache.dir.clone())
        .unwrap_or_else(default_cache_dir);

    match app.subcommand {
        SubCommands::Update(opts) => run_update(opts, cache_dir, &config, multi_progress).await,
        SubCommands::Cache(command) => run_cache_command(command, cache_dir, &config).await,
        SubCommands::Manifest(command) => run_manifest_command(command),
    }
}

async fn run_update(
    opts: UpdateOpts,
    cache_dir: PathBuf,
    config: &ConfigFile,
    multi_progress: MultiProgress,
) -> miette::Result<()> {
    let manifest = fs::read_to_string(&opts.manifest).into_diagnostic()?;
    let contents = ArtifactDirectoryContents::from_json(&manifest).into_diagnostic()?;

    let fetcher: Arc<dyn ArtifactFetcher> = match &opts.artifact_store {
        Some(store) => Arc::new(LocalDirectoryFetcher::new(store)),
        None => Arc::new(OfflineFetcher),
    };
    let progress = FetchProgress::new(&multi_progress);
    let cache = config
        .cache_builder(fetcher, cache_dir)
        .verify_digests(opts.verify_digests)
        .progress_handler(progress.clone())
        .build()
        .await
        .into_diagnostic()?;

    let tool_config = Configuration {
        strip_generated_sources: config.experiments.strip_generated_sources,
        stripper: None,
    };

    let results = sync_directories(
        &cache,
        &opts.workspace_root,
        &tool_config,
        vec![(opts.dest, contents)],
    )
    .await;
    progress.finish();

    // The process exits right away, so a clean waiting for the idle delay
    // would never run
    let policy = config.clean_policy();
    match cache.clean(policy.max_target_size, policy.min_keep_age) {
        Ok(report) if !report.evicted.is_empty() => tracing::debug!(
            "Evicted {} artifacts ({}) from the cache",
            report.evicted.len(),
            HumanBytes(report.evicted_bytes)
        ),
        Ok(_) => {}
        Err(e) => tracing::warn!("Failed to clean the artifact cache: {}", e),
    }

    for sync in results {
        let updated = sync.result?;
        tracing::info!(
            "{} is up to date ({} files written)",
            sync.root.display(),
            updated.len()
        );
    }

    Ok(())
}

async fn run_cache_command(
    command: CacheCommands,
    cache_dir: PathBuf,
    config: &ConfigFile,
) -> miette::Result<()> {
    let cache = BuildArtifactCache::builder(Arc::new(OfflineFetcher))
        .cache_dir(cache_dir)
        .build()
        .await
        .into_diagnostic()?;

    match command {
        CacheCommands::Stats => {
            let stats = cache.stats();
            tracing::info!("Cache directory: {}", cache.cache_dir().display());
            tracing::info!("Artifacts: {}", stats.entries);
            tracing::info!("Total size: {}", HumanBytes(stats.total_size));
        }
        CacheCommands::Clean { max_size, min_age } => {
            let policy = config.clean_policy();
            let min_keep_age = match min_age {
                Some(secs) => chrono::Duration::try_seconds(secs.try_into().into_diagnostic()?)
                    .ok_or_else(|| miette::miette!("--min-age {} is out of range", secs))?,
                None => policy.min_keep_age,
            };
            let report = cache
                .clean(max_size.unwrap_or(policy.max_target_size), min_keep_age)
                .into_diagnostic()?;
            tracing::info!(
                "Evicted {} artifacts ({}), {} remaining",
                report.evicted.len(),
                HumanBytes(report.evicted_bytes),
                HumanBytes(report.remaining_bytes)
            );
        }
        CacheCommands::Purge => {
            cache.purge().into_diagnostic()?;
        }
    }

    Ok(())
}

fn run_manifest_command(command: ManifestCommands) -> miette::Result<()> {
    match command {
        ManifestCommands::Show { path } => {
            let contents = ArtifactDirectoryContents::read_sidecar(&path)
                .into_diagnostic()?
                .ok_or_else(|| miette::miette!("The file {} could not be found.", path.display()))?;
            println!("{}", contents.to_json().into_diagnostic()?);
        }
    }
    Ok(())
}
