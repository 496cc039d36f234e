//! Remote wiki abstraction.

use crate::error::{SyncError, SyncResult};
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use wikimirror_protocol::{
    ListPage, ListQuery, RawLogEvent, RawNamespace, RawPage, RawProtection, RawRecentChange,
    RawRevision, RawRevisionContent, RawSiteTotals, RawTagDefinition, StreamKind,
};

/// The remote wiki as seen by the sync engine.
///
/// Listings return records in ascending `(timestamp, id)` order. A
/// query's `since` timestamp is inclusive; its continuation token, when
/// present, takes precedence over `since`.
///
/// This trait abstracts the network layer, allowing for different
/// implementations (the action API over HTTP, an in-memory wiki for
/// tests).
pub trait RemoteWiki: Send + Sync {
    /// Lists pages whose current state changed.
    fn list_changed_pages(&self, query: &ListQuery) -> SyncResult<ListPage<RawRecentChange>>;

    /// Lists new revisions of live pages.
    fn list_revisions(&self, query: &ListQuery) -> SyncResult<ListPage<RawRevision>>;

    /// Lists log events of every type.
    fn list_log_events(&self, query: &ListQuery) -> SyncResult<ListPage<RawLogEvent>>;

    /// Lists tag updates.
    fn list_tag_changes(&self, query: &ListQuery) -> SyncResult<ListPage<RawLogEvent>>;

    /// Lists protection changes.
    fn list_restriction_changes(&self, query: &ListQuery) -> SyncResult<ListPage<RawLogEvent>>;

    /// Fetches the current state of pages. Every requested id yields one
    /// entry, flagged `missing` when no live page has it.
    fn fetch_pages(&self, page_ids: &[u64]) -> SyncResult<Vec<RawPage>>;

    /// Looks up the live page holding a title.
    fn fetch_page_by_title(&self, namespace: i32, title: &str) -> SyncResult<Option<RawPage>>;

    /// Fetches one page of a page's full history, archived revisions
    /// included.
    fn fetch_page_history(
        &self,
        page_id: u64,
        continuation: Option<&str>,
    ) -> SyncResult<ListPage<RawRevision>>;

    /// Fetches the active protections of a page. A missing page has none.
    fn fetch_restrictions(&self, page_id: u64) -> SyncResult<Vec<RawProtection>>;

    /// Fetches the protections of a title that has no page. A title held
    /// by a page has none.
    fn fetch_title_protection(&self, namespace: i32, title: &str) -> SyncResult<Vec<RawProtection>>;

    /// Fetches revision texts. Unknown ids are left out.
    fn fetch_revision_content(&self, rev_ids: &[u64]) -> SyncResult<Vec<RawRevisionContent>>;

    /// Fetches authoritative site totals.
    fn site_totals(&self) -> SyncResult<RawSiteTotals>;

    /// Fetches the namespace table.
    fn namespaces(&self) -> SyncResult<Vec<RawNamespace>>;

    /// Fetches the change tag definitions.
    fn tag_definitions(&self) -> SyncResult<Vec<RawTagDefinition>>;
}

/// A scripted listing response of [`MockRemote`].
#[derive(Debug, Clone)]
pub enum MockResponse {
    /// A page of the page stream.
    Pages(ListPage<RawRecentChange>),
    /// A page of the revision stream.
    Revisions(ListPage<RawRevision>),
    /// A page of a log-backed stream.
    LogEvents(ListPage<RawLogEvent>),
    /// A retryable transport failure.
    Transient,
    /// The continuation token is rejected.
    InvalidContinuation,
    /// The start position was purged.
    HistoryPurged,
}

/// A mock remote for testing.
///
/// Listings pop scripted responses per stream; an exhausted script
/// returns an empty final page. Lookups answer from fixed page and
/// history tables. Every listing query is recorded.
#[derive(Debug, Default)]
pub struct MockRemote {
    disconnected: AtomicBool,
    listings: Mutex<HashMap<StreamKind, VecDeque<MockResponse>>>,
    queries: Mutex<Vec<(StreamKind, ListQuery)>>,
    pages: Mutex<BTreeMap<u64, RawPage>>,
    histories: Mutex<BTreeMap<u64, Vec<RawRevision>>>,
    title_protections: Mutex<BTreeMap<(i32, String), Vec<RawProtection>>>,
    totals: Mutex<Option<RawSiteTotals>>,
    namespaces: Mutex<Vec<RawNamespace>>,
    tag_definitions: Mutex<Vec<RawTagDefinition>>,
}

impl MockRemote {
    /// Creates a new mock remote.
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues a listing response for a stream.
    pub fn push_response(&self, stream: StreamKind, response: MockResponse) {
        self.listings
            .lock()
            .entry(stream)
            .or_default()
            .push_back(response);
    }

    /// Sets the current state of a page.
    pub fn set_page(&self, page: RawPage) {
        if let Some(page_id) = page.pageid {
            self.pages.lock().insert(page_id, page);
        }
    }

    /// Sets the full history of a page.
    pub fn set_history(&self, page_id: u64, revisions: Vec<RawRevision>) {
        self.histories.lock().insert(page_id, revisions);
    }

    /// Sets the protections of a title without a page.
    pub fn set_title_protection(&self, namespace: i32, title: &str, protection: Vec<RawProtection>) {
        self.title_protections
            .lock()
            .insert((namespace, title.to_string()), protection);
    }

    /// Sets the site totals.
    pub fn set_totals(&self, totals: RawSiteTotals) {
        *self.totals.lock() = Some(totals);
    }

    /// Sets the namespace table.
    pub fn set_namespaces(&self, namespaces: Vec<RawNamespace>) {
        *self.namespaces.lock() = namespaces;
    }

    /// Sets the tag definitions.
    pub fn set_tag_definitions(&self, tags: Vec<RawTagDefinition>) {
        *self.tag_definitions.lock() = tags;
    }

    /// Sets the connected state.
    pub fn set_connected(&self, connected: bool) {
        self.disconnected.store(!connected, Ordering::SeqCst);
    }

    /// Returns the listing queries received so far.
    pub fn queries(&self) -> Vec<(StreamKind, ListQuery)> {
        self.queries.lock().clone()
    }

    fn ensure_connected(&self) -> SyncResult<()> {
        if self.disconnected.load(Ordering::SeqCst) {
            return Err(SyncError::NotConnected);
        }
        Ok(())
    }

    fn next_response(&self, stream: StreamKind, query: &ListQuery) -> SyncResult<Option<MockResponse>> {
        self.ensure_connected()?;
        self.queries.lock().push((stream, query.clone()));
        let response = self
            .listings
            .lock()
            .get_mut(&stream)
            .and_then(VecDeque::pop_front);
        match response {
            Some(MockResponse::Transient) => {
                Err(SyncError::transport_retryable("scripted transient failure"))
            }
            Some(MockResponse::InvalidContinuation) => Err(SyncError::InvalidContinuation),
            Some(MockResponse::HistoryPurged) => Err(SyncError::HistoryPurged { stream }),
            other => Ok(other),
        }
    }

    fn log_listing(&self, stream: StreamKind, query: &ListQuery) -> SyncResult<ListPage<RawLogEvent>> {
        match self.next_response(stream, query)? {
            None => Ok(ListPage::last(Vec::new())),
            Some(MockResponse::LogEvents(page)) => Ok(page),
            Some(other) => Err(unexpected(stream, &other)),
        }
    }
}

fn unexpected(stream: StreamKind, response: &MockResponse) -> SyncError {
    SyncError::Protocol(format!("scripted {response:?} does not fit stream {stream}"))
}

impl RemoteWiki for MockRemote {
    fn list_changed_pages(&self, query: &ListQuery) -> SyncResult<ListPage<RawRecentChange>> {
        match self.next_response(StreamKind::Pages, query)? {
            None => Ok(ListPage::last(Vec::new())),
            Some(MockResponse::Pages(page)) => Ok(page),
            Some(other) => Err(unexpected(StreamKind::Pages, &other)),
        }
    }

    fn list_revisions(&self, query: &ListQuery) -> SyncResult<ListPage<RawRevision>> {
        match self.next_response(StreamKind::Revisions, query)? {
            None => Ok(ListPage::last(Vec::new())),
            Some(MockResponse::Revisions(page)) => Ok(page),
            Some(other) => Err(unexpected(StreamKind::Revisions, &other)),
        }
    }

    fn list_log_events(&self, query: &ListQuery) -> SyncResult<ListPage<RawLogEvent>> {
        self.log_listing(StreamKind::LogEvents, query)
    }

    fn list_tag_changes(&self, query: &ListQuery) -> SyncResult<ListPage<RawLogEvent>> {
        self.log_listing(StreamKind::Tags, query)
    }

    fn list_restriction_changes(&self, query: &ListQuery) -> SyncResult<ListPage<RawLogEvent>> {
        self.log_listing(StreamKind::Restrictions, query)
    }

    fn fetch_pages(&self, page_ids: &[u64]) -> SyncResult<Vec<RawPage>> {
        self.ensure_connected()?;
        let pages = self.pages.lock();
        Ok(page_ids
            .iter()
            .map(|id| {
                pages.get(id).cloned().unwrap_or(RawPage {
                    pageid: Some(*id),
                    missing: true,
                    ..RawPage::default()
                })
            })
            .collect())
    }

    fn fetch_page_by_title(&self, namespace: i32, title: &str) -> SyncResult<Option<RawPage>> {
        self.ensure_connected()?;
        Ok(self
            .pages
            .lock()
            .values()
            .find(|page| {
                !page.missing && page.ns == Some(namespace) && page.title.as_deref() == Some(title)
            })
            .cloned())
    }

    fn fetch_page_history(
        &self,
        page_id: u64,
        _continuation: Option<&str>,
    ) -> SyncResult<ListPage<RawRevision>> {
        self.ensure_connected()?;
        let revisions = self
            .histories
            .lock()
            .get(&page_id)
            .cloned()
            .unwrap_or_default();
        Ok(ListPage::last(revisions))
    }

    fn fetch_restrictions(&self, page_id: u64) -> SyncResult<Vec<RawProtection>> {
        self.ensure_connected()?;
        Ok(self
            .pages
            .lock()
            .get(&page_id)
            .filter(|page| !page.missing)
            .map(|page| page.protection.clone())
            .unwrap_or_default())
    }

    fn fetch_title_protection(&self, namespace: i32, title: &str) -> SyncResult<Vec<RawProtection>> {
        if self.fetch_page_by_title(namespace, title)?.is_some() {
            return Ok(Vec::new());
        }
        Ok(self
            .title_protections
            .lock()
            .get(&(namespace, title.to_string()))
            .cloned()
            .unwrap_or_default())
    }

    fn fetch_revision_content(&self, rev_ids: &[u64]) -> SyncResult<Vec<RawRevisionContent>> {
        self.ensure_connected()?;
        let histories = self.histories.lock();
        Ok(histories
            .values()
            .flatten()
            .filter(|rev| rev.revid.is_some_and(|id| rev_ids.contains(&id)))
            .filter_map(|rev| {
                let slot = rev.slots.get("main")?;
                Some(RawRevisionContent {
                    revid: rev.revid,
                    contentmodel: slot.contentmodel.clone(),
                    content: slot.content.clone(),
                    texthidden: slot.texthidden || rev.texthidden,
                })
            })
            .collect())
    }

    fn site_totals(&self) -> SyncResult<RawSiteTotals> {
        self.ensure_connected()?;
        self.totals
            .lock()
            .clone()
            .ok_or_else(|| SyncError::Protocol("no mock site totals set".into()))
    }

    fn namespaces(&self) -> SyncResult<Vec<RawNamespace>> {
        self.ensure_connected()?;
        Ok(self.namespaces.lock().clone())
    }

    fn tag_definitions(&self) -> SyncResult<Vec<RawTagDefinition>> {
        self.ensure_connected()?;
        Ok(self.tag_definitions.lock().clone())
    }
}
