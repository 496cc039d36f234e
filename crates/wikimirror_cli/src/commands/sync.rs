//! Sync command implementation.

use super::{open_mirror, Remote};
use std::path::Path;
use std::sync::Arc;
use tracing::info;
use wikimirror_protocol::StreamKind;
use wikimirror_sync::{ContentMode, PassReport, RetryConfig, SyncConfig, SyncEngine};

/// Pass options taken from the command line.
pub struct SyncOptions {
    /// Maximum records per listing request.
    pub batch_size: u32,
    /// Attempts per remote request.
    pub retries: u32,
    /// Streams to pull; all of them if empty.
    pub streams: Vec<StreamKind>,
    /// Pull streams on parallel threads.
    pub parallel: bool,
    /// Verify after pulling.
    pub verify: bool,
    /// Revision texts to fetch.
    pub content: ContentMode,
}

impl SyncOptions {
    fn config(&self, remote: &Remote) -> SyncConfig {
        let mut config = SyncConfig::new(remote.api_url.clone())
            .with_batch_size(self.batch_size)
            .with_retry(RetryConfig::new(self.retries))
            .with_parallel_streams(self.parallel)
            .with_verify(self.verify)
            .with_content(self.content)
            .with_user_agent(remote.user_agent())
            .with_timeout(remote.timeout);
        if !self.streams.is_empty() {
            config = config.with_streams(self.streams.iter().copied());
        }
        config
    }
}

/// Runs the sync command.
pub fn run(
    path: &Path,
    remote: &Remote,
    options: SyncOptions,
    format: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let config = options.config(remote);
    info!(mirror = %path.display(), api_url = %config.api_url, "starting sync");
    let mirror = Arc::new(open_mirror(path, true)?);
    let engine = SyncEngine::new(config, mirror, remote.connect()?);

    let report = engine.sync()?;

    match format {
        "json" => {
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        _ => {
            print_text_output(&report);
        }
    }

    if report.is_complete() {
        Ok(())
    } else {
        Err("Sync pass left streams behind".into())
    }
}

fn print_text_output(report: &PassReport) {
    println!("Sync pass {}", report.pass_id);
    println!("==========");
    println!();
    println!(
        "{:<14} {:>9} {:>9} {:>9} {:>9}  Status",
        "Stream", "Records", "Inserted", "Updated", "Unchanged"
    );
    for stream in &report.streams {
        let status = match &stream.failure {
            None => "complete".to_string(),
            Some(err) => format!("stopped: {err}"),
        };
        println!(
            "{:<14} {:>9} {:>9} {:>9} {:>9}  {}",
            stream.stream.as_str(),
            stream.records,
            stream.counts.inserted,
            stream.counts.updated,
            stream.counts.unchanged,
            status
        );
    }

    if let Some(content) = &report.content {
        println!();
        println!(
            "Content:       {} stored, {} skipped",
            content.stored, content.skipped
        );
    }

    println!();
    if report.drift.is_clean() {
        println!("✓ No drift observed");
    } else {
        println!("✗ Drift observed:");
        for drift in &report.drift.drift {
            println!("  - {drift}");
        }
        if report.drift.incomplete {
            println!("  (verification incomplete)");
        }
    }
    println!("Duration:      {:.2}s", report.duration.as_secs_f64());
}
