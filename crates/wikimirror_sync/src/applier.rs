//! Batch application.
//!
//! A `StreamApplier` applies the batches of one stream in order. Records
//! are applied one at a time; each write is its own short transaction, so
//! a stop in the middle of a batch leaves a consistent prefix applied.
//!
//! Application stops at the first record that cannot be applied: an
//! unprocessable record, an identity conflict, or a failed out-of-band
//! fetch. The outcome reports the last applied position so the caller
//! can commit a checkpoint that never skips the stopping record. Storage
//! failures are returned as errors and end the pass.

use crate::config::SyncConfig;
use crate::error::{SyncError, SyncResult};
use crate::reconciler::Reconciler;
use crate::transport::RemoteWiki;
use crate::verifier::Drift;
use serde::Serialize;
use std::collections::{BTreeSet, HashMap};
use tracing::warn;
use wikimirror_protocol::{ChangeRecord, Position, RemotePage, StreamKind};
use wikimirror_store::{ApplyOutcome, Mirror};

/// Per-outcome record counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct OutcomeCounts {
    /// Records that inserted rows.
    pub inserted: u64,
    /// Records that modified rows.
    pub updated: u64,
    /// Records that were already mirrored.
    pub unchanged: u64,
}

impl OutcomeCounts {
    /// Counts one outcome.
    pub fn record(&mut self, outcome: ApplyOutcome) {
        match outcome {
            ApplyOutcome::Inserted => self.inserted += 1,
            ApplyOutcome::Updated => self.updated += 1,
            ApplyOutcome::Unchanged => self.unchanged += 1,
        }
    }

    /// Adds another set of counts.
    pub fn merge(&mut self, other: OutcomeCounts) {
        self.inserted += other.inserted;
        self.updated += other.updated;
        self.unchanged += other.unchanged;
    }

    /// Returns the number of counted records.
    pub fn total(&self) -> u64 {
        self.inserted + self.updated + self.unchanged
    }
}

/// Result of applying one batch.
#[derive(Debug, Default)]
pub struct BatchOutcome {
    /// Outcomes of the applied records.
    pub counts: OutcomeCounts,
    /// Position of the last applied record.
    pub last: Option<Position>,
    /// Why application stopped before the end of the batch.
    pub halt: Option<SyncError>,
}

impl BatchOutcome {
    /// Returns true if every record was applied.
    pub fn is_complete(&self) -> bool {
        self.halt.is_none()
    }
}

/// Applies the batches of one stream.
pub struct StreamApplier<'a, R: RemoteWiki + ?Sized> {
    stream: StreamKind,
    mirror: &'a Mirror,
    reconciler: Reconciler<'a, R>,
}

impl<'a, R: RemoteWiki + ?Sized> StreamApplier<'a, R> {
    /// Creates an applier for `stream`.
    pub fn new(stream: StreamKind, mirror: &'a Mirror, remote: &'a R, config: &'a SyncConfig) -> Self {
        Self {
            stream,
            mirror,
            reconciler: Reconciler::new(mirror, remote, config),
        }
    }

    /// Returns the stream this applier serves.
    pub fn stream(&self) -> StreamKind {
        self.stream
    }

    /// Consumes the applier, returning touched pages and observed drift.
    pub fn into_parts(self) -> (BTreeSet<u64>, Vec<Drift>) {
        self.reconciler.into_parts()
    }

    /// Applies `records` in order.
    ///
    /// # Errors
    ///
    /// Returns the error only if it is fatal; anything else stops
    /// application and is reported in `BatchOutcome::halt`.
    pub fn apply_batch(&mut self, records: &[ChangeRecord]) -> SyncResult<BatchOutcome> {
        let mut outcome = BatchOutcome::default();

        let mut pages = HashMap::new();
        if self.stream == StreamKind::Pages {
            match self.prefetch_pages(records) {
                Ok(fetched) => pages = fetched,
                Err(err) => return self.halt(outcome, err),
            }
        }

        for record in records {
            let applied = match record {
                ChangeRecord::Unprocessable(bad) => Err(SyncError::Unprocessable {
                    stream: bad.stream,
                    id: bad.id,
                    reason: bad.reason.clone(),
                }),
                ChangeRecord::Page(change) => match pages.get(&change.page_id) {
                    Some(RemotePage::Present(info)) => self.reconciler.place_page(info, 0),
                    // gone since it changed; the log stream retires it
                    _ => Ok(ApplyOutcome::Unchanged),
                },
                // rows already held belong to log replay
                ChangeRecord::Revision(revision) => {
                    self.reconciler.ensure_page(revision.page_id).and_then(|_| {
                        Ok(self.mirror.insert_revision(revision)?)
                    })
                }
                ChangeRecord::LogEvent(event) => self.reconciler.apply_log_event(event),
                ChangeRecord::Tag(change) => Ok(self.mirror.apply_tag_change(change)?),
                ChangeRecord::Restriction(change) => match change.page_id {
                    Some(page_id) => self.reconciler.refresh_restrictions(page_id),
                    // title protections follow the log stream
                    None => Ok(ApplyOutcome::Unchanged),
                },
            };
            match applied {
                Ok(result) => {
                    outcome.counts.record(result);
                    outcome.last = record.position();
                }
                Err(err) => return self.halt(outcome, err),
            }
        }
        Ok(outcome)
    }

    /// Fetches the current state of the distinct pages named before the
    /// first unprocessable record.
    fn prefetch_pages(&self, records: &[ChangeRecord]) -> SyncResult<HashMap<u64, RemotePage>> {
        let mut ids = Vec::new();
        for record in records {
            match record {
                ChangeRecord::Page(change) => {
                    if !ids.contains(&change.page_id) {
                        ids.push(change.page_id);
                    }
                }
                ChangeRecord::Unprocessable(_) => break,
                _ => {}
            }
        }
        if ids.is_empty() {
            return Ok(HashMap::new());
        }
        self.reconciler.fetch_pages(&ids)
    }

    fn halt(&self, mut outcome: BatchOutcome, err: SyncError) -> SyncResult<BatchOutcome> {
        if err.is_fatal() {
            return Err(err);
        }
        warn!(
            stream = %self.stream,
            last = ?outcome.last.map(|p| p.to_string()),
            error = %err,
            "stream stopped before end of batch"
        );
        outcome.halt = Some(err);
        Ok(outcome)
    }
}
