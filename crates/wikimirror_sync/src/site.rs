//! Site metadata refresh.

use crate::applier::OutcomeCounts;
use crate::config::RetryConfig;
use crate::error::SyncResult;
use crate::transport::RemoteWiki;
use tracing::{debug, warn};
use wikimirror_protocol::{Namespace, TagDefinition};
use wikimirror_store::Mirror;

/// Refreshes the namespace table and the tag definitions.
///
/// Remote failures and malformed entries are logged and skipped; only
/// storage failures are returned.
pub fn refresh_site_metadata<R: RemoteWiki + ?Sized>(
    mirror: &Mirror,
    remote: &R,
    retry: &RetryConfig,
) -> SyncResult<OutcomeCounts> {
    let mut counts = OutcomeCounts::default();

    match retry.run("fetch namespaces", || remote.namespaces()) {
        Ok(namespaces) => {
            for raw in namespaces {
                match Namespace::try_from(raw) {
                    Ok(namespace) => counts.record(mirror.upsert_namespace(&namespace)?),
                    Err(err) => warn!(error = %err, "skipping malformed namespace"),
                }
            }
        }
        Err(err) if err.is_fatal() => return Err(err),
        Err(err) => warn!(error = %err, "could not refresh namespaces"),
    }

    match retry.run("fetch tag definitions", || remote.tag_definitions()) {
        Ok(tags) => {
            for raw in tags {
                match TagDefinition::try_from(raw) {
                    Ok(tag) => counts.record(mirror.upsert_tag_definition(&tag)?),
                    Err(err) => warn!(error = %err, "skipping malformed tag definition"),
                }
            }
        }
        Err(err) if err.is_fatal() => return Err(err),
        Err(err) => warn!(error = %err, "could not refresh tag definitions"),
    }

    debug!(
        inserted = counts.inserted,
        updated = counts.updated,
        "site metadata refreshed"
    );
    Ok(counts)
}
