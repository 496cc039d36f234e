//! Mirror aggregates.
//!
//! These are the cheap local numbers the consistency verifier compares
//! against authoritative remote totals.
//!
//! # Usage
//!
//! ```rust,ignore
//! let mirror = Mirror::open(path)?;
//! let stats = mirror.stats()?;
//! println!("Live pages: {}", stats.live_pages);
//! ```

use crate::error::StoreResult;
use crate::mirror::Mirror;
use rusqlite::params;
use serde::Serialize;

/// Snapshot of mirror aggregates.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MirrorStats {
    // Pages
    /// Pages neither deleted nor merged away.
    pub live_pages: u64,
    /// Deleted pages.
    pub deleted_pages: u64,
    /// Merged-away pages.
    pub merged_pages: u64,

    // Revisions
    /// Revisions that are not archived.
    pub live_revisions: u64,
    /// Revisions of deleted pages.
    pub archived_revisions: u64,
    /// Highest id among live revisions.
    pub latest_revision: Option<u64>,

    // Metadata
    /// Log events.
    pub log_events: u64,
    /// Highest log id.
    pub latest_log_event: Option<u64>,
    /// Tag associations.
    pub tag_assignments: u64,
    /// Active restrictions.
    pub restrictions: u64,
    /// Titles protected against creation.
    pub protected_titles: u64,
    /// Stored revision texts.
    pub stored_content: u64,
}

impl Mirror {
    /// Computes the current aggregates.
    pub fn stats(&self) -> StoreResult<MirrorStats> {
        self.read(|conn| {
            let count = |sql: &str| -> rusqlite::Result<u64> { conn.query_row(sql, [], |r| r.get(0)) };
            Ok(MirrorStats {
                live_pages: count(
                    "SELECT COUNT(*) FROM pages WHERE deleted = 0 AND merged_into IS NULL",
                )?,
                deleted_pages: count(
                    "SELECT COUNT(*) FROM pages WHERE deleted = 1 AND merged_into IS NULL",
                )?,
                merged_pages: count("SELECT COUNT(*) FROM pages WHERE merged_into IS NOT NULL")?,
                live_revisions: count("SELECT COUNT(*) FROM revisions WHERE archived = 0")?,
                archived_revisions: count("SELECT COUNT(*) FROM revisions WHERE archived = 1")?,
                latest_revision: conn.query_row(
                    "SELECT MAX(rev_id) FROM revisions WHERE archived = 0",
                    [],
                    |r| r.get(0),
                )?,
                log_events: count("SELECT COUNT(*) FROM logevents")?,
                latest_log_event: conn.query_row("SELECT MAX(log_id) FROM logevents", [], |r| {
                    r.get(0)
                })?,
                tag_assignments: count("SELECT COUNT(*) FROM tag_assignments WHERE active = 1")?,
                restrictions: count("SELECT COUNT(*) FROM restrictions")?,
                protected_titles: count("SELECT COUNT(*) FROM protected_titles")?,
                stored_content: count("SELECT COUNT(*) FROM revision_content")?,
            })
        })
    }

    /// Returns the number of non-archived revisions owned by a page.
    pub fn live_revision_count(&self, page_id: u64) -> StoreResult<u64> {
        self.read(|conn| {
            Ok(conn.query_row(
                "SELECT COUNT(*) FROM revisions WHERE page_id = ?1 AND archived = 0",
                params![page_id],
                |r| r.get(0),
            )?)
        })
    }
}
