//! Consistency verifier.
//!
//! Compares cheap local aggregates with authoritative remote totals after
//! a pass. Drift is reported, never repaired, and never fails the pass.

use crate::config::RetryConfig;
use crate::error::SyncResult;
use crate::transport::RemoteWiki;
use serde::Serialize;
use std::fmt;
use tracing::{debug, warn};
use wikimirror_protocol::SiteTotals;
use wikimirror_store::Mirror;

/// A mismatch between the mirror and the remote.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Drift {
    /// Live page counts differ.
    PageCount {
        /// Mirror count.
        local: u64,
        /// Remote count.
        remote: u64,
    },
    /// Highest live revision ids differ.
    LatestRevision {
        /// Mirror value.
        local: Option<u64>,
        /// Remote value.
        remote: Option<u64>,
    },
    /// Highest log ids differ.
    LatestLogEvent {
        /// Mirror value.
        local: Option<u64>,
        /// Remote value.
        remote: Option<u64>,
    },
    /// A page owns a different number of live revisions.
    RevisionCount {
        /// Page.
        page_id: u64,
        /// Mirror count.
        local: u64,
        /// Remote count.
        remote: u64,
    },
    /// Two pages claim the same title: the log moved one page onto a
    /// title the remote still assigns to another.
    TitleDiscrepancy {
        /// Namespace of the contested title.
        namespace: i32,
        /// Contested title.
        title: String,
        /// Page the log moved onto the title.
        claimed_by: u64,
        /// Page the remote places at the title.
        held_by: u64,
    },
}

impl fmt::Display for Drift {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let opt = |v: &Option<u64>| v.map_or_else(|| "none".to_string(), |v| v.to_string());
        match self {
            Drift::PageCount { local, remote } => {
                write!(f, "live pages: mirror {local}, remote {remote}")
            }
            Drift::LatestRevision { local, remote } => write!(
                f,
                "latest revision: mirror {}, remote {}",
                opt(local),
                opt(remote)
            ),
            Drift::LatestLogEvent { local, remote } => write!(
                f,
                "latest log event: mirror {}, remote {}",
                opt(local),
                opt(remote)
            ),
            Drift::RevisionCount {
                page_id,
                local,
                remote,
            } => write!(
                f,
                "page {page_id} revisions: mirror {local}, remote {remote}"
            ),
            Drift::TitleDiscrepancy {
                namespace,
                title,
                claimed_by,
                held_by,
            } => write!(
                f,
                "title {namespace}:{title} claimed by page {claimed_by}, held by page {held_by}"
            ),
        }
    }
}

/// Result of a verification.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DriftReport {
    /// Observed mismatches.
    pub drift: Vec<Drift>,
    /// Some comparisons were skipped because the remote could not be
    /// queried.
    pub incomplete: bool,
}

impl DriftReport {
    /// Returns true if nothing drifted and every comparison ran.
    pub fn is_clean(&self) -> bool {
        self.drift.is_empty() && !self.incomplete
    }

    /// Adds drift observed elsewhere, skipping duplicates.
    pub fn extend(&mut self, drift: impl IntoIterator<Item = Drift>) {
        for item in drift {
            if !self.drift.contains(&item) {
                self.drift.push(item);
            }
        }
    }
}

/// Compares the mirror against the remote.
pub struct Verifier<'a, R: RemoteWiki + ?Sized> {
    mirror: &'a Mirror,
    remote: &'a R,
    retry: &'a RetryConfig,
}

impl<'a, R: RemoteWiki + ?Sized> Verifier<'a, R> {
    /// Creates a verifier.
    pub fn new(mirror: &'a Mirror, remote: &'a R, retry: &'a RetryConfig) -> Self {
        Self {
            mirror,
            remote,
            retry,
        }
    }

    /// Compares site totals and the live revision counts of `sample`.
    ///
    /// Local read failures and remote failures mark the report
    /// incomplete.
    pub fn verify(&self, sample: &[u64]) -> DriftReport {
        let mut report = DriftReport::default();

        match self.compare_totals() {
            Ok(drift) => report.extend(drift),
            Err(err) => {
                warn!(error = %err, "could not compare site totals");
                report.incomplete = true;
            }
        }

        for page_id in sample {
            match self.compare_revision_count(*page_id) {
                Ok(Some(drift)) => report.extend([drift]),
                Ok(None) => {}
                Err(err) => {
                    warn!(page_id, error = %err, "could not compare revision count");
                    report.incomplete = true;
                }
            }
        }

        for drift in &report.drift {
            warn!(%drift, "mirror drift");
        }
        debug!(
            drift = report.drift.len(),
            sampled = sample.len(),
            incomplete = report.incomplete,
            "verification finished"
        );
        report
    }

    fn compare_totals(&self) -> SyncResult<Vec<Drift>> {
        let raw = self
            .retry
            .run("fetch site totals", || self.remote.site_totals())?;
        let remote = SiteTotals::try_from(raw)?;
        let local = self.mirror.stats()?;

        let mut drift = Vec::new();
        if local.live_pages != remote.pages {
            drift.push(Drift::PageCount {
                local: local.live_pages,
                remote: remote.pages,
            });
        }
        if local.latest_revision != remote.latest_revision {
            drift.push(Drift::LatestRevision {
                local: local.latest_revision,
                remote: remote.latest_revision,
            });
        }
        if local.latest_log_event != remote.latest_log_event {
            drift.push(Drift::LatestLogEvent {
                local: local.latest_log_event,
                remote: remote.latest_log_event,
            });
        }
        Ok(drift)
    }

    fn compare_revision_count(&self, page_id: u64) -> SyncResult<Option<Drift>> {
        // only live pages have a comparable remote history
        if !self
            .mirror
            .page(page_id)?
            .is_some_and(|row| row.is_live())
        {
            return Ok(None);
        }
        let local = self.mirror.live_revision_count(page_id)?;

        let mut remote = 0u64;
        let mut continuation: Option<String> = None;
        loop {
            let page = self.retry.run("fetch page history", || {
                self.remote
                    .fetch_page_history(page_id, continuation.as_deref())
            })?;
            remote += page.items.iter().filter(|rev| !rev.archived).count() as u64;
            match page.continuation {
                Some(next) => continuation = Some(next),
                None => break,
            }
        }

        Ok((local != remote).then_some(Drift::RevisionCount {
            page_id,
            local,
            remote,
        }))
    }
}
