//! Terminal output: logging through indicatif and fetch progress bars

use std::{fmt::Write as _, io, io::Write as _, str::FromStr, time::Duration};

use artifact_sync_cache::{CacheError, ProgressHandler};
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use tracing_core::{Event, Subscriber};
use tracing_subscriber::{
    EnvFilter,
    filter::{Directive, LevelFilter},
    fmt::{
        FmtContext, FormatEvent, FormatFields, MakeWriter,
        format::{self, Format},
    },
    registry::LookupSpan,
};

#[derive(Clone)]
pub struct IndicatifWriter {
    progress_bars: MultiProgress,
}

impl IndicatifWriter {
    pub fn new(pb: MultiProgress) -> Self {
        Self { progress_bars: pb }
    }
}

impl io::Write for IndicatifWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.progress_bars.suspend(|| io::stderr().write(buf))
    }

    fn flush(&mut self) -> io::Result<()> {
        self.progress_bars.suspend(|| io::stderr().flush())
    }
}

impl<'a> MakeWriter<'a> for IndicatifWriter {
    type Writer = IndicatifWriter;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}

/// Prints our own info messages bare and everything else in the default format
pub struct TracingFormatter;

impl<S, N> FormatEvent<S, N> for TracingFormatter
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        ctx: &FmtContext<'_, S, N>,
        mut writer: format::Writer<'_>,
        event: &Event<'_>,
    ) -> std::fmt::Result {
        let metadata = event.metadata();

        if *metadata.level() == tracing_core::metadata::Level::INFO
            && metadata.target().starts_with("artifact_sync")
        {
            ctx.format_fields(writer.by_ref(), event)?;
            writeln!(writer)
        } else {
            Format::default().format_event(ctx, writer, event)
        }
    }
}

/// Constructs a default [`EnvFilter`] that is used when the user did not specify a custom RUST_LOG.
pub fn get_default_env_filter(verbose: clap_verbosity_flag::log::LevelFilter) -> EnvFilter {
    let level = match verbose {
        clap_verbosity_flag::log::LevelFilter::Off => "off",
        clap_verbosity_flag::log::LevelFilter::Error => "error",
        clap_verbosity_flag::log::LevelFilter::Warn => "warn",
        clap_verbosity_flag::log::LevelFilter::Info => "info",
        clap_verbosity_flag::log::LevelFilter::Debug => "debug",
        clap_verbosity_flag::log::LevelFilter::Trace => "trace",
    };

    let mut result = EnvFilter::builder()
        .with_default_directive(LevelFilter::WARN.into())
        .from_env_lossy();
    for krate in ["artifact_sync", "artifact_sync_cache", "artifact_sync_types"] {
        if let Ok(directive) = Directive::from_str(&format!("{krate}={level}")) {
            result = result.add_directive(directive);
        }
    }

    result
}

/// Shows fetches of the artifact cache as a progress bar
#[derive(Clone)]
pub struct FetchProgress {
    progress_bar: ProgressBar,
}

impl FetchProgress {
    pub fn new(multi_progress: &MultiProgress) -> Self {
        let progress_bar = multi_progress.add(ProgressBar::new(0));
        progress_bar.set_style(
            ProgressStyle::with_template(
                "{spinner:.green} {prefix:20!} [{elapsed_precise}] [{bar:40!.bright.yellow/dim.white}] {pos:>5}/{len} {wide_msg}",
            )
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("━━╾─"),
        );
        progress_bar.set_prefix("Fetching artifacts");
        Self { progress_bar }
    }

    /// Remove the progress bar from the terminal
    pub fn finish(&self) {
        self.progress_bar.finish_and_clear();
    }
}

impl ProgressHandler for FetchProgress {
    fn on_fetch_start(&self, count: usize) {
        self.progress_bar.inc_length(count as u64);
        self.progress_bar.enable_steady_tick(Duration::from_millis(100));
    }

    fn on_fetch_complete(&self, digest: &str, _size: u64) {
        self.progress_bar.set_message(digest.to_string());
        self.progress_bar.inc(1);
    }

    fn on_fetch_failed(&self, digest: &str, _error: &CacheError) {
        self.progress_bar.set_message(format!("failed: {}", digest));
        self.progress_bar.inc(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fetch_progress() {
        let term = indicatif::InMemoryTerm::new(10, 120);
        let multi_progress = MultiProgress::new();
        multi_progress.set_draw_target(indicatif::ProgressDrawTarget::term_like(Box::new(
            term.clone(),
        )));

        let progress = FetchProgress::new(&multi_progress);
        progress.on_fetch_start(2);
        progress.on_fetch_complete("abc", 10);
        progress.on_fetch_failed("def", &CacheError::NotCached("def".to_string()));

        assert_eq!(progress.progress_bar.position(), 2);
        assert_eq!(progress.progress_bar.length(), Some(2));
        progress.finish();
        assert!(progress.progress_bar.is_finished());
    }
}
