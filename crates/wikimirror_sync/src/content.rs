//! Revision text fetching.
//!
//! Change streams carry revision metadata only. Text is fetched
//! separately, for the revisions selected by the configured
//! [`ContentMode`], and only for revisions whose text is not stored yet.

use crate::config::{ContentMode, RetryConfig};
use crate::error::SyncResult;
use crate::transport::RemoteWiki;
use serde::Serialize;
use tracing::{debug, info};
use wikimirror_protocol::RevisionContent;
use wikimirror_store::Mirror;

/// Revision texts requested per remote call.
pub const CONTENT_BATCH: usize = 50;

/// Result of a content sync.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ContentReport {
    /// Texts stored.
    pub stored: u64,
    /// Revisions whose text the remote hid or did not return.
    pub skipped: u64,
}

/// Fetches missing revision texts.
///
/// Revisions the remote does not return (text hidden since, or revision
/// gone) are skipped; they are listed again by the next call.
pub fn sync_content<R: RemoteWiki + ?Sized>(
    mirror: &Mirror,
    remote: &R,
    retry: &RetryConfig,
    mode: ContentMode,
) -> SyncResult<ContentReport> {
    let mut report = ContentReport::default();
    let Some(scope) = mode.scope() else {
        return Ok(report);
    };

    let mut after = 0;
    loop {
        let ids = mirror.revisions_missing_content(scope, after, CONTENT_BATCH)?;
        let Some(&last) = ids.last() else {
            break;
        };
        let fetched = retry.run("fetch revision content", || {
            remote.fetch_revision_content(&ids)
        })?;

        let mut stored = 0u64;
        for raw in fetched {
            let Some(rev_id) = raw.revid.filter(|id| ids.contains(id)) else {
                continue;
            };
            match RevisionContent::from_raw(raw)? {
                Some(content) => {
                    mirror.store_content(&content)?;
                    stored += 1;
                }
                None => debug!(rev_id, "revision text hidden"),
            }
        }
        report.stored += stored;
        report.skipped += ids.len() as u64 - stored;
        after = last;
    }

    info!(
        mode = %mode,
        stored = report.stored,
        skipped = report.skipped,
        "revision content synced"
    );
    Ok(report)
}
