//! Structural reconciler.
//!
//! Replays identity-changing log events against the mirror in log order:
//! moves, deletions, restorations, history merges and imports. Every
//! transition is applied to the page *identifier* named by the event,
//! never to whatever page currently holds a title.
//!
//! ## Title settlement
//!
//! Replaying history against a mirror that already holds newer state can
//! make a write collide with the live occupant of a title. The occupant
//! is then refreshed from the remote, which moves it away (recursively,
//! up to `max_title_depth` occupants deep). If the remote still places
//! the occupant at that title, the collision is reported as drift and the
//! moving page is refreshed from the remote instead. Pages that hold
//! each other's titles (a swap through a temporary title) are written
//! together in one transaction.
//!
//! ## Unknown pages
//!
//! A page the mirror has never seen is fetched out-of-band. Pages that
//! are unknown locally and already gone remotely are recorded as
//! tombstones when a deletion or merge names them.

use crate::config::{RetryConfig, SyncConfig};
use crate::error::{SyncError, SyncResult};
use crate::transport::RemoteWiki;
use crate::verifier::Drift;
use chrono::{DateTime, Utc};
use std::collections::{BTreeSet, HashMap};
use tracing::{debug, warn};
use wikimirror_protocol::{
    LogAction, LogEvent, PageInfo, RawPage, RemotePage, Restriction, Revision, StreamKind,
    TitleProtection, Visibility,
};
use wikimirror_store::{ApplyOutcome, Mirror, StoreError, StoreResult, Tombstone};

/// How a title collision was settled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Settlement {
    /// The occupant was moved away or retired.
    Freed(ApplyOutcome),
    /// The remote still places the occupant at the title.
    Discrepancy,
}

/// Applies structural transitions and out-of-band page fetches.
///
/// A reconciler belongs to one stream of one pass. It remembers the pages
/// it touched and the drift it observed so the pass can verify and report
/// them.
pub struct Reconciler<'a, R: RemoteWiki + ?Sized> {
    mirror: &'a Mirror,
    remote: &'a R,
    retry: &'a RetryConfig,
    max_depth: u32,
    touched: BTreeSet<u64>,
    drift: Vec<Drift>,
    /// Pages whose placement is in progress, outermost first.
    placing: Vec<PageInfo>,
}

impl<'a, R: RemoteWiki + ?Sized> Reconciler<'a, R> {
    /// Creates a reconciler.
    pub fn new(mirror: &'a Mirror, remote: &'a R, config: &'a SyncConfig) -> Self {
        Self {
            mirror,
            remote,
            retry: &config.retry,
            max_depth: config.max_title_depth,
            touched: BTreeSet::new(),
            drift: Vec::new(),
            placing: Vec::new(),
        }
    }

    /// Returns the pages written so far.
    pub fn touched(&self) -> &BTreeSet<u64> {
        &self.touched
    }

    /// Returns the drift observed so far.
    pub fn drift(&self) -> &[Drift] {
        &self.drift
    }

    /// Consumes the reconciler, returning touched pages and drift.
    pub fn into_parts(self) -> (BTreeSet<u64>, Vec<Drift>) {
        (self.touched, self.drift)
    }

    // ------------------------------------------------------------------
    // Out-of-band fetches
    // ------------------------------------------------------------------

    /// Fetches the current remote state of several pages at once.
    pub fn fetch_pages(&self, page_ids: &[u64]) -> SyncResult<HashMap<u64, RemotePage>> {
        let raw = self
            .retry
            .run("fetch pages", || self.remote.fetch_pages(page_ids))?;
        let mut pages = HashMap::with_capacity(page_ids.len());
        for page in raw {
            let page = RemotePage::try_from(page)?;
            let page_id = match &page {
                RemotePage::Present(info) => info.page_id,
                RemotePage::Missing { page_id } => *page_id,
            };
            pages.insert(page_id, page);
        }
        for page_id in page_ids {
            pages
                .entry(*page_id)
                .or_insert(RemotePage::Missing { page_id: *page_id });
        }
        Ok(pages)
    }

    fn fetch_page(&self, page_id: u64) -> SyncResult<RemotePage> {
        Ok(self
            .fetch_pages(&[page_id])?
            .remove(&page_id)
            .unwrap_or(RemotePage::Missing { page_id }))
    }

    /// Fetches the full history of a page and upserts every revision.
    pub fn sync_history(&mut self, page_id: u64) -> SyncResult<ApplyOutcome> {
        let mut outcome = ApplyOutcome::Unchanged;
        let mut continuation: Option<String> = None;
        let mut fetched = 0usize;
        loop {
            let page = self.retry.run("fetch page history", || {
                self.remote
                    .fetch_page_history(page_id, continuation.as_deref())
            })?;
            for raw in page.items {
                let revision = Revision::try_from(raw)?;
                outcome = outcome.and(self.mirror.upsert_revision(&revision)?);
                fetched += 1;
            }
            match page.continuation {
                Some(next) => continuation = Some(next),
                None => break,
            }
        }
        debug!(page_id, revisions = fetched, "synced page history");
        Ok(outcome)
    }

    // ------------------------------------------------------------------
    // Page placement
    // ------------------------------------------------------------------

    /// Writes the current remote state of a page, settling title
    /// collisions first.
    pub fn place_page(&mut self, info: &PageInfo, depth: u32) -> SyncResult<ApplyOutcome> {
        self.touched.insert(info.page_id);
        self.placing.push(info.clone());
        let placed = self.with_title(info.page_id, info.namespace, &info.title, depth, |mirror| {
            mirror.upsert_page(info)
        });
        self.placing.pop();
        placed
    }

    /// Refreshes a page from the remote. Returns `None` if the remote has
    /// no live page with this id.
    pub fn refresh_page(&mut self, page_id: u64, depth: u32) -> SyncResult<Option<ApplyOutcome>> {
        match self.fetch_page(page_id)? {
            RemotePage::Present(info) => self.place_page(&info, depth).map(Some),
            RemotePage::Missing { .. } => Ok(None),
        }
    }

    /// Makes sure the mirror knows a page, fetching it if necessary.
    pub fn ensure_page(&mut self, page_id: u64) -> SyncResult<ApplyOutcome> {
        if self.mirror.page(page_id)?.is_some() {
            return Ok(ApplyOutcome::Unchanged);
        }
        debug!(page_id, "fetching unknown page");
        Ok(self
            .refresh_page(page_id, 0)?
            .unwrap_or(ApplyOutcome::Unchanged))
    }

    /// Runs a write that claims a title, settling a collision with the
    /// title's live occupant and retrying once.
    fn with_title<F>(
        &mut self,
        page_id: u64,
        namespace: i32,
        title: &str,
        depth: u32,
        write: F,
    ) -> SyncResult<ApplyOutcome>
    where
        F: Fn(&Mirror) -> StoreResult<ApplyOutcome>,
    {
        let occupant = match write(self.mirror) {
            Err(StoreError::TitleOccupied { occupant, .. }) => occupant,
            other => return Ok(other?),
        };
        if let Some(start) = self.placing.iter().position(|info| info.page_id == occupant) {
            // every page from the occupant on wants the next one's title
            let cycle = self.placing[start..].to_vec();
            debug!(pages = cycle.len(), "placing pages that exchange titles");
            return Ok(self.mirror.place_pages(&cycle)?);
        }
        if depth >= self.max_depth {
            return Err(SyncError::identity_conflict(
                page_id,
                format!("title {namespace}:{title} held by page {occupant} beyond settlement depth"),
            ));
        }
        match self.settle_title(namespace, title, occupant, page_id, depth)? {
            Settlement::Freed(settled) => match write(self.mirror) {
                Err(StoreError::TitleOccupied { occupant, .. }) => Err(SyncError::identity_conflict(
                    page_id,
                    format!("title {namespace}:{title} still held by page {occupant}"),
                )),
                other => Ok(settled.and(other?)),
            },
            Settlement::Discrepancy => Ok(self
                .refresh_page(page_id, depth + 1)?
                .unwrap_or(ApplyOutcome::Unchanged)),
        }
    }

    fn settle_title(
        &mut self,
        namespace: i32,
        title: &str,
        occupant: u64,
        claimant: u64,
        depth: u32,
    ) -> SyncResult<Settlement> {
        match self.fetch_page(occupant)? {
            RemotePage::Present(info) if info.namespace == namespace && info.title == title => {
                let drift = Drift::TitleDiscrepancy {
                    namespace,
                    title: title.to_string(),
                    claimed_by: claimant,
                    held_by: occupant,
                };
                warn!(%drift, "title claimed by two pages");
                self.drift.push(drift);
                Ok(Settlement::Discrepancy)
            }
            RemotePage::Present(info) => {
                debug!(occupant, to = %info.title, "moving title occupant to its current title");
                Ok(Settlement::Freed(self.place_page(&info, depth + 1)?))
            }
            RemotePage::Missing { .. } => {
                debug!(occupant, "retiring title occupant missing remotely");
                self.touched.insert(occupant);
                Ok(Settlement::Freed(self.retire_deleted(occupant, false)?))
            }
        }
    }

    fn retire_deleted(&self, page_id: u64, suppressed: bool) -> SyncResult<ApplyOutcome> {
        let outcome = self.mirror.mark_page_deleted(page_id, suppressed)?;
        Ok(outcome.and(self.mirror.replace_restrictions(page_id, &[])?))
    }

    // ------------------------------------------------------------------
    // Log events
    // ------------------------------------------------------------------

    /// Records a log event and applies its structural transition.
    pub fn apply_log_event(&mut self, event: &LogEvent) -> SyncResult<ApplyOutcome> {
        let recorded = self.mirror.upsert_log_event(event)?;
        let transition = match &event.action {
            LogAction::Create => {
                let created = self.ensure_page(target(event)?)?;
                created.and(self.lift_title_protection(event.namespace, event.title.as_deref())?)
            }
            LogAction::Move {
                target_namespace,
                target_title,
                ..
            } => {
                let moved = self.apply_move(target(event)?, *target_namespace, target_title)?;
                moved.and(self.lift_title_protection(*target_namespace, Some(target_title))?)
            }
            LogAction::Delete { suppressed } => {
                self.apply_delete(target(event)?, event, *suppressed)?
            }
            LogAction::Restore => {
                let restored = self.apply_restore(target(event)?)?;
                restored.and(self.lift_title_protection(event.namespace, event.title.as_deref())?)
            }
            LogAction::RevisionVisibility {
                rev_ids,
                visibility,
            } => self.apply_revision_visibility(event, rev_ids, *visibility)?,
            LogAction::EventVisibility {
                log_ids,
                visibility,
            } => self.mirror.set_log_event_visibility(log_ids, *visibility)?,
            LogAction::Merge {
                dest_namespace,
                dest_title,
                dest_page_id,
                mergepoint,
            } => self.apply_merge(
                target(event)?,
                event,
                MergeTarget {
                    namespace: *dest_namespace,
                    title: dest_title,
                    page_id: *dest_page_id,
                    mergepoint: *mergepoint,
                },
            )?,
            LogAction::Import => self.apply_import(target(event)?)?,
            // page protections are mirrored by the restriction stream
            LogAction::Protect => match (event.page_id, event.title.as_deref()) {
                (None, Some(title)) => self.refresh_title_protection(event.namespace, title)?,
                _ => ApplyOutcome::Unchanged,
            },
            LogAction::TagUpdate | LogAction::Other => ApplyOutcome::Unchanged,
        };
        if event.action.is_structural() {
            debug!(
                log_id = event.log_id,
                action = event.action.name(),
                page_id = ?event.page_id,
                changed = transition.is_change(),
                "applied structural event"
            );
        }
        Ok(recorded.and(transition))
    }

    fn apply_move(&mut self, page_id: u64, namespace: i32, title: &str) -> SyncResult<ApplyOutcome> {
        match self.mirror.page(page_id)? {
            // unknown pages are fetched in their current state; a page
            // that is gone as well has nothing to move
            None => Ok(self
                .refresh_page(page_id, 0)?
                .unwrap_or(ApplyOutcome::Unchanged)),
            Some(_) => {
                self.touched.insert(page_id);
                self.with_title(page_id, namespace, title, 0, |mirror| {
                    mirror.rename_page(page_id, namespace, title)
                })
            }
        }
    }

    /// Hides parts of revisions. Revisions the mirror has not seen yet
    /// are read from their page's history first, so a listing that
    /// predates the change cannot insert them with stale visibility.
    fn apply_revision_visibility(
        &mut self,
        event: &LogEvent,
        rev_ids: &[u64],
        visibility: Visibility,
    ) -> SyncResult<ApplyOutcome> {
        let mut outcome = ApplyOutcome::Unchanged;
        if let Some(page_id) = event.page_id {
            let mut unknown = false;
            for rev_id in rev_ids {
                unknown |= self.mirror.revision(*rev_id)?.is_none();
            }
            if unknown {
                debug!(page_id, "reading history of revisions hidden before listing");
                outcome = self.sync_history(page_id)?;
            }
        }
        Ok(outcome.and(self.mirror.set_revision_visibility(rev_ids, visibility)?))
    }

    fn apply_delete(
        &mut self,
        page_id: u64,
        event: &LogEvent,
        suppressed: bool,
    ) -> SyncResult<ApplyOutcome> {
        self.touched.insert(page_id);
        let mut outcome = self.sync_history(page_id)?;
        if self.mirror.page(page_id)?.is_none() {
            outcome = outcome.and(self.mirror.insert_tombstone(
                page_id,
                event.namespace,
                event.title.as_deref().unwrap_or_default(),
                Tombstone::Deleted,
            )?);
        }
        Ok(outcome.and(self.retire_deleted(page_id, suppressed)?))
    }

    fn apply_restore(&mut self, page_id: u64) -> SyncResult<ApplyOutcome> {
        self.touched.insert(page_id);
        let mut outcome = ApplyOutcome::Unchanged;
        if let Some(row) = self.mirror.page(page_id)? {
            if row.merged_into.is_none() {
                outcome = self.with_title(page_id, row.namespace, &row.title, 0, |mirror| {
                    mirror.mark_page_restored(page_id)
                })?;
            }
        }
        outcome = outcome.and(self.sync_history(page_id)?);
        if let Some(refreshed) = self.refresh_page(page_id, 0)? {
            outcome = outcome.and(refreshed);
        }
        Ok(outcome)
    }

    fn apply_import(&mut self, page_id: u64) -> SyncResult<ApplyOutcome> {
        self.touched.insert(page_id);
        let outcome = self.sync_history(page_id)?;
        Ok(match self.refresh_page(page_id, 0)? {
            Some(refreshed) => outcome.and(refreshed),
            None => outcome,
        })
    }

    fn apply_merge(
        &mut self,
        source: u64,
        event: &LogEvent,
        dest: MergeTarget<'_>,
    ) -> SyncResult<ApplyOutcome> {
        let dest_id = self.resolve_merge_dest(source, &dest)?;
        self.touched.insert(source);
        self.touched.insert(dest_id);

        let mut outcome = self.ensure_page(dest_id)?;
        if self.mirror.page(source)?.is_none() {
            outcome = outcome.and(match self.fetch_page(source)? {
                RemotePage::Present(info) => self.place_page(&info, 0)?,
                RemotePage::Missing { .. } => self.tombstone_merge_source(source, event, dest_id)?,
            });
        }

        let merged = self.mirror.merge_page(source, dest_id, dest.mergepoint)?;
        if merged.is_change() {
            outcome = outcome.and(ApplyOutcome::Updated);
        }
        // ownership of every revision the destination holds now
        outcome = outcome.and(self.sync_history(dest_id)?);
        if merged.retired {
            outcome = outcome.and(self.mirror.replace_restrictions(source, &[])?);
        } else if self.mirror.page(source)?.is_some_and(|row| row.is_live()) {
            // a partial merge leaves the source with its newer revisions
            if let Some(refreshed) = self.refresh_page(source, 0)? {
                outcome = outcome.and(refreshed);
            }
        }
        Ok(outcome)
    }

    /// Records an unknown merge source that is gone remotely. A source
    /// that still has history was deleted after a partial merge.
    fn tombstone_merge_source(
        &mut self,
        source: u64,
        event: &LogEvent,
        dest_id: u64,
    ) -> SyncResult<ApplyOutcome> {
        let history = self.sync_history(source)?;
        let kind = if self.mirror.revisions_of(source)?.is_empty() {
            Tombstone::Merged(dest_id)
        } else {
            Tombstone::Deleted
        };
        Ok(history.and(self.mirror.insert_tombstone(
            source,
            event.namespace,
            event.title.as_deref().unwrap_or_default(),
            kind,
        )?))
    }

    fn resolve_merge_dest(&self, source: u64, dest: &MergeTarget<'_>) -> SyncResult<u64> {
        if let Some(page_id) = dest.page_id {
            return Ok(page_id);
        }
        if let Some(row) = self.mirror.live_page_by_title(dest.namespace, dest.title)? {
            return Ok(row.page_id);
        }
        let found: Option<RawPage> = self.retry.run("look up merge destination", || {
            self.remote.fetch_page_by_title(dest.namespace, dest.title)
        })?;
        match found.map(RemotePage::try_from).transpose()? {
            Some(RemotePage::Present(info)) => Ok(info.page_id),
            _ => Err(SyncError::identity_conflict(
                source,
                format!(
                    "merge destination {}:{} never seen",
                    dest.namespace, dest.title
                ),
            )),
        }
    }

    // ------------------------------------------------------------------
    // Restrictions
    // ------------------------------------------------------------------

    /// Replaces a page's restriction set with the remote's current one.
    pub fn refresh_restrictions(&mut self, page_id: u64) -> SyncResult<ApplyOutcome> {
        let raw = self
            .retry
            .run("fetch restrictions", || self.remote.fetch_restrictions(page_id))?;
        let mut restrictions = Vec::with_capacity(raw.len());
        for protection in raw {
            if let Some(restriction) = Restriction::from_raw(page_id, protection)? {
                restrictions.push(restriction);
            }
        }
        Ok(self.mirror.replace_restrictions(page_id, &restrictions)?)
    }

    /// Replaces the create protection of a title without a page with the
    /// remote's current one.
    pub fn refresh_title_protection(&mut self, namespace: i32, title: &str) -> SyncResult<ApplyOutcome> {
        let raw = self.retry.run("fetch title protection", || {
            self.remote.fetch_title_protection(namespace, title)
        })?;
        let mut protection = None;
        for entry in raw {
            if let Some(create) = TitleProtection::from_raw(namespace, title, entry)? {
                protection = Some(create);
            }
        }
        debug!(namespace, title, protected = protection.is_some(), "refreshed title protection");
        Ok(self
            .mirror
            .replace_title_protection(namespace, title, protection.as_ref())?)
    }

    /// A page appearing at a title lifts its create protection.
    fn lift_title_protection(&self, namespace: i32, title: Option<&str>) -> SyncResult<ApplyOutcome> {
        match title {
            Some(title) => Ok(self.mirror.clear_title_protection(namespace, title)?),
            None => Ok(ApplyOutcome::Unchanged),
        }
    }
}

/// Destination of a history merge as reported by the log.
struct MergeTarget<'e> {
    namespace: i32,
    title: &'e str,
    page_id: Option<u64>,
    mergepoint: DateTime<Utc>,
}

fn target(event: &LogEvent) -> SyncResult<u64> {
    event.page_id.ok_or_else(|| SyncError::Unprocessable {
        stream: StreamKind::LogEvents,
        id: Some(event.log_id),
        reason: format!("{} event without a target page", event.action.name()),
    })
}
