//! Content command implementation.

use super::{open_mirror, Remote};
use std::path::Path;
use wikimirror_sync::{sync_content, ContentMode, RetryConfig};

/// Runs the content command.
pub fn run(path: &Path, remote: &Remote, mode: ContentMode) -> Result<(), Box<dyn std::error::Error>> {
    if mode == ContentMode::Off {
        return Err("Content mode must be latest or all".into());
    }
    let mirror = open_mirror(path, false)?;
    let transport = remote.connect()?;

    let report = sync_content(&mirror, &transport, &RetryConfig::default(), mode)?;
    println!("Fetched {mode} revision texts");
    println!("  Stored:  {}", report.stored);
    println!("  Skipped: {}", report.skipped);
    Ok(())
}
