//! Status command implementation.

use super::open_mirror;
use serde::Serialize;
use std::path::Path;
use wikimirror_protocol::{format_timestamp, Checkpoint};
use wikimirror_store::{CheckpointStore, MirrorStats};

/// Mirror status.
#[derive(Debug, Serialize)]
pub struct StatusResult {
    /// Mirror path.
    pub path: String,
    /// Committed stream checkpoints.
    pub checkpoints: Vec<Checkpoint>,
    /// Mirror aggregates.
    pub stats: MirrorStats,
}

/// Runs the status command.
pub fn run(path: &Path, format: &str) -> Result<(), Box<dyn std::error::Error>> {
    let mirror = open_mirror(path, false)?;
    let result = StatusResult {
        path: path.display().to_string(),
        checkpoints: mirror.all()?,
        stats: mirror.stats()?,
    };

    match format {
        "json" => {
            println!("{}", serde_json::to_string_pretty(&result)?);
        }
        _ => {
            print_text_output(&result);
        }
    }

    Ok(())
}

fn print_text_output(result: &StatusResult) {
    let opt = |v: Option<u64>| v.map_or_else(|| "-".to_string(), |v| v.to_string());
    let stats = &result.stats;

    println!("Mirror: {}", result.path);
    println!();
    println!("Checkpoints:");
    if result.checkpoints.is_empty() {
        println!("  (none, the next pass starts from the beginning)");
    }
    for checkpoint in &result.checkpoints {
        let resume = if checkpoint.continuation.is_some() {
            " (mid-listing)"
        } else {
            ""
        };
        println!(
            "  {:<14} {} #{}{}",
            checkpoint.stream.as_str(),
            format_timestamp(&checkpoint.position.timestamp),
            checkpoint.position.id,
            resume
        );
    }
    println!();
    println!("Pages:");
    println!("  Live:          {}", stats.live_pages);
    println!("  Deleted:       {}", stats.deleted_pages);
    println!("  Merged:        {}", stats.merged_pages);
    println!("Revisions:");
    println!("  Live:          {}", stats.live_revisions);
    println!("  Archived:      {}", stats.archived_revisions);
    println!("  Latest:        {}", opt(stats.latest_revision));
    println!("  With text:     {}", stats.stored_content);
    println!("Log events:      {} (latest {})", stats.log_events, opt(stats.latest_log_event));
    println!("Tag assignments: {}", stats.tag_assignments);
    println!("Restrictions:    {}", stats.restrictions);
    println!("Protected titles: {}", stats.protected_titles);
}
