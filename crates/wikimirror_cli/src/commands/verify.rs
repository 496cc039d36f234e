//! Verify command implementation.

use super::{open_mirror, Remote};
use std::path::Path;
use wikimirror_sync::{DriftReport, RetryConfig, Verifier};

/// Runs the verify command.
pub fn run(
    path: &Path,
    remote: &Remote,
    sample: usize,
    format: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let mirror = open_mirror(path, false)?;
    let transport = remote.connect()?;

    // the most recently edited pages
    let mut live = mirror.live_pages()?;
    live.sort_by(|a, b| b.latest_revision.cmp(&a.latest_revision));
    let pages: Vec<u64> = live.iter().take(sample).map(|page| page.page_id).collect();
    let retry = RetryConfig::default();
    let report = Verifier::new(&mirror, &transport, &retry).verify(&pages);

    match format {
        "json" => {
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        _ => {
            print_text_output(path, pages.len(), &report);
        }
    }

    if report.is_clean() {
        Ok(())
    } else {
        Err("Verification failed".into())
    }
}

fn print_text_output(path: &Path, sampled: usize, report: &DriftReport) {
    println!("Verifying mirror at {:?}", path);
    println!("Sampled {sampled} pages");
    println!();
    for drift in &report.drift {
        println!("  - {drift}");
    }
    if report.incomplete {
        println!("  Some comparisons were skipped: the remote could not be queried");
    }
    println!();
    if report.is_clean() {
        println!("✓ Mirror verification passed");
    } else {
        println!("✗ Mirror verification failed");
    }
}
