//! Fetch command - download one file in the foreground with a progress bar.
//!
//! The engine runs on the main thread. Ctrl+C requests a cooperative cancel;
//! the partial file is kept so a later `fetch` to the same output resumes.

use std::path::PathBuf;
use std::sync::Arc;

use console::style;
use indicatif::{ProgressBar, ProgressStyle};
use isofetch::download::{
    Checksum, DownloadEngine, DownloadObserver, DownloadOutcome, DownloadProgress, DownloadState,
    DownloadTask, VerificationStatus,
};
use isofetch::format::format_bytes;
use isofetch::proxy::filename_from_url;

use crate::error::CliError;
use crate::runner::CliRunner;

pub struct FetchArgs {
    pub url: String,
    pub mirrors: Vec<String>,
    pub output: Option<PathBuf>,
    pub checksum: Option<String>,
    pub checksum_type: String,
    pub size: Option<u64>,
    pub config_path: Option<PathBuf>,
}

pub fn run(args: FetchArgs) -> Result<(), CliError> {
    let runner = CliRunner::new(args.config_path.as_deref())?;
    runner.log_startup("fetch");

    let checksum =
        Checksum::from_parts(args.checksum.as_deref(), Some(args.checksum_type.as_str()))?;
    let destination = args
        .output
        .unwrap_or_else(|| PathBuf::from(filename_from_url(&args.url)));

    let task = Arc::new(
        DownloadTask::new(0, args.url.clone(), destination.clone())
            .with_mirrors(args.mirrors)
            .with_expected_size(args.size)
            .with_checksum(checksum),
    );
    let engine = Arc::new(DownloadEngine::new(runner.config().engine_config()));

    let cancel_task = Arc::clone(&task);
    let cancel_engine = Arc::clone(&engine);
    ctrlc::set_handler(move || {
        cancel_engine.cancel(&cancel_task);
    })
    .map_err(|e| CliError::Config(format!("Failed to set signal handler: {}", e)))?;

    println!("Downloading {}", style(&args.url).cyan());
    println!("        to {}", destination.display());

    let observer = BarObserver::new();
    let outcome = engine.start(&task, &observer);
    observer.finish();

    let Some(outcome) = outcome else {
        return Err(CliError::DownloadFailed {
            state: task.state().to_string(),
            message: "download stopped before finishing".to_string(),
        });
    };
    report(&outcome, &destination)
}

fn report(outcome: &DownloadOutcome, destination: &std::path::Path) -> Result<(), CliError> {
    if !outcome.succeeded() {
        return Err(CliError::DownloadFailed {
            state: outcome.state.to_string(),
            message: outcome
                .error
                .clone()
                .unwrap_or_else(|| "no error recorded".to_string()),
        });
    }

    let verification = match outcome.checksum_verified {
        VerificationStatus::Passed => style("checksum verified").green().to_string(),
        VerificationStatus::Unchecked => style("checksum not checked").yellow().to_string(),
        VerificationStatus::Failed => style("checksum failed").red().to_string(),
    };
    println!(
        "{} {} ({}, {})",
        style("Done").green().bold(),
        destination.display(),
        format_bytes(outcome.progress.downloaded_bytes),
        verification
    );
    Ok(())
}

/// Renders engine progress on an indicatif bar.
struct BarObserver {
    bar: ProgressBar,
}

impl BarObserver {
    fn new() -> Self {
        let bar = ProgressBar::new(0);
        let bar_style = ProgressStyle::with_template(
            "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {bytes}/{total_bytes} {bytes_per_sec} ({eta}) {msg}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("#>-");
        bar.set_style(bar_style);
        Self { bar }
    }

    fn finish(&self) {
        self.bar.finish_and_clear();
    }
}

impl DownloadObserver for BarObserver {
    fn on_progress(&self, state: DownloadState, progress: &DownloadProgress) {
        if progress.total_bytes > 0 && self.bar.length() != Some(progress.total_bytes) {
            self.bar.set_length(progress.total_bytes);
        }
        self.bar.set_position(progress.downloaded_bytes);
        if state != DownloadState::Downloading {
            self.bar.set_message(state.to_string());
        }
    }

    fn on_complete(&self, outcome: &DownloadOutcome) {
        self.bar.set_message(outcome.state.to_string());
    }
}
