//! `RemoteWiki` implementation of the simulated wiki.
//!
//! Listings behave like the action API: records come in ascending
//! `(timestamp, id)` order, a page holds at most `limit` records and the
//! continuation token names the first record of the next page.

use crate::wiki::{is_redirect, FakePageState, FakeRevision, FakeWiki, WikiState};
use std::collections::BTreeMap;
use wikimirror_protocol::{
    format_timestamp, parse_timestamp, ListPage, ListQuery, Position, RawLogEvent, RawNamespace,
    RawPage, RawProtection, RawRecentChange, RawRevision, RawRevisionContent, RawSiteTotals,
    RawSlot, RawTagDefinition, StreamKind, Visibility,
};
use wikimirror_sync::{RemoteWiki, SyncError, SyncResult};

/// Revisions per page of a history listing.
pub const HISTORY_LIMIT: usize = 3;

const CONTENT_MODEL: &str = "wikitext";

fn encode_continuation(position: &Position) -> String {
    format!("{}|{}", format_timestamp(&position.timestamp), position.id)
}

fn decode_continuation(token: &str) -> SyncResult<Position> {
    let (timestamp, id) = token
        .split_once('|')
        .ok_or(SyncError::InvalidContinuation)?;
    let timestamp = parse_timestamp(timestamp).map_err(|_| SyncError::InvalidContinuation)?;
    let id = id.parse().map_err(|_| SyncError::InvalidContinuation)?;
    Ok(Position::new(timestamp, id))
}

/// Cuts one listing page out of records sorted by position.
fn paginate<T: Clone>(
    records: &[(Position, T)],
    since: Option<&Position>,
    continuation: Option<&str>,
    limit: usize,
    duplicate_boundaries: bool,
) -> SyncResult<ListPage<T>> {
    let start = match continuation {
        Some(token) => {
            let from = decode_continuation(token)?;
            records.partition_point(|(position, _)| *position < from)
        }
        None => match since {
            Some(since) => {
                records.partition_point(|(position, _)| position.timestamp < since.timestamp)
            }
            None => 0,
        },
    };
    let end = (start + limit.max(1)).min(records.len());
    let from = if duplicate_boundaries && continuation.is_some() && start > 0 {
        start - 1
    } else {
        start
    };
    let items = records[from..end].iter().map(|(_, item)| item.clone()).collect();
    Ok(match records.get(end) {
        Some((next, _)) => ListPage::more(items, encode_continuation(next)),
        None => ListPage::last(items),
    })
}

fn query_limit(query: &ListQuery) -> usize {
    usize::try_from(query.limit).unwrap_or(usize::MAX)
}

impl WikiState {
    fn raw_revision(&self, revision: &FakeRevision) -> RawRevision {
        let bits = revision.visibility.bits();
        let texthidden = bits & Visibility::TEXT != 0;
        let archived = self
            .pages
            .get(&revision.page_id)
            .is_some_and(|p| p.state == FakePageState::Deleted);
        RawRevision {
            revid: Some(revision.rev_id),
            pageid: Some(revision.page_id),
            parentid: Some(revision.parent_id),
            timestamp: Some(format_timestamp(&revision.timestamp)),
            user: Some(crate::wiki::FAKE_USER.to_string()),
            userid: Some(crate::wiki::FAKE_USER_ID),
            comment: Some(revision.comment.clone()),
            size: u64::try_from(revision.text.len()).ok(),
            sha1: None,
            minor: revision.minor,
            contentmodel: Some(CONTENT_MODEL.to_string()),
            slots: BTreeMap::from([(
                "main".to_string(),
                RawSlot {
                    contentmodel: Some(CONTENT_MODEL.to_string()),
                    content: None,
                    texthidden,
                },
            )]),
            tags: revision.tags.iter().cloned().collect(),
            texthidden,
            commenthidden: bits & Visibility::COMMENT != 0,
            userhidden: bits & Visibility::USER != 0,
            suppressed: bits & Visibility::RESTRICTED != 0,
            archived,
        }
    }

    fn raw_page(&self, page_id: u64) -> RawPage {
        let page = match self.pages.get(&page_id) {
            Some(page) if page.state == FakePageState::Live => page,
            _ => {
                return RawPage {
                    pageid: Some(page_id),
                    missing: true,
                    ..RawPage::default()
                }
            }
        };
        let latest = self.latest(page_id);
        RawPage {
            pageid: Some(page_id),
            ns: Some(page.namespace),
            title: Some(page.title.clone()),
            missing: false,
            invalid: false,
            redirect: latest.is_some_and(|r| is_redirect(&r.text)),
            lastrevid: latest.map(|r| r.rev_id),
            length: latest.and_then(|r| u64::try_from(r.text.len()).ok()),
            contentmodel: Some(CONTENT_MODEL.to_string()),
            protection: self.raw_protections(page_id),
        }
    }

    fn raw_protections(&self, page_id: u64) -> Vec<RawProtection> {
        match self.pages.get(&page_id) {
            Some(page) if page.state == FakePageState::Live => page
                .protections
                .iter()
                .map(|(action, level)| RawProtection {
                    action: Some(action.clone()),
                    level: Some(level.clone()),
                    expiry: Some("infinity".to_string()),
                    cascade: false,
                    source: None,
                })
                .collect(),
            _ => Vec::new(),
        }
    }

    fn log_records(&self, log_type: Option<&str>) -> Vec<(Position, RawLogEvent)> {
        self.log
            .iter()
            .filter(|(_, event)| log_type.is_none() || event.raw.log_type.as_deref() == log_type)
            .map(|(id, event)| (Position::new(event.timestamp, *id), event.raw.clone()))
            .collect()
    }
}

impl FakeWiki {
    /// Consumes one injected failure, if any are left.
    fn check(&self) -> SyncResult<()> {
        let mut state = self.state.lock();
        if state.failures > 0 {
            state.failures -= 1;
            return Err(SyncError::transport_retryable("injected failure"));
        }
        Ok(())
    }

    fn list_log(
        &self,
        query: &ListQuery,
        log_type: Option<&str>,
    ) -> SyncResult<ListPage<RawLogEvent>> {
        self.check()?;
        let state = self.state.lock();
        paginate(
            &state.log_records(log_type),
            query.since.as_ref(),
            query.continuation.as_deref(),
            query_limit(query),
            state.duplicate_boundaries,
        )
    }
}

impl RemoteWiki for FakeWiki {
    fn list_changed_pages(&self, query: &ListQuery) -> SyncResult<ListPage<RawRecentChange>> {
        self.check()?;
        let state = self.state.lock();
        if let (None, Some(since), Some(floor)) =
            (&query.continuation, &query.since, state.rc_floor)
        {
            if since.timestamp < floor {
                return Err(SyncError::HistoryPurged {
                    stream: StreamKind::Pages,
                });
            }
        }
        paginate(
            &state.recent_changes,
            query.since.as_ref(),
            query.continuation.as_deref(),
            query_limit(query),
            state.duplicate_boundaries,
        )
    }

    fn list_revisions(&self, query: &ListQuery) -> SyncResult<ListPage<RawRevision>> {
        self.check()?;
        let state = self.state.lock();
        let mut records: Vec<(Position, RawRevision)> = state
            .revisions
            .values()
            .filter(|r| {
                state
                    .pages
                    .get(&r.page_id)
                    .is_some_and(|p| p.state == FakePageState::Live)
            })
            .map(|r| (r.position(), state.raw_revision(r)))
            .collect();
        records.sort_by(|a, b| a.0.cmp(&b.0));
        paginate(
            &records,
            query.since.as_ref(),
            query.continuation.as_deref(),
            query_limit(query),
            state.duplicate_boundaries,
        )
    }

    fn list_log_events(&self, query: &ListQuery) -> SyncResult<ListPage<RawLogEvent>> {
        self.list_log(query, None)
    }

    fn list_tag_changes(&self, query: &ListQuery) -> SyncResult<ListPage<RawLogEvent>> {
        self.list_log(query, Some("tag"))
    }

    fn list_restriction_changes(&self, query: &ListQuery) -> SyncResult<ListPage<RawLogEvent>> {
        self.list_log(query, Some("protect"))
    }

    fn fetch_pages(&self, page_ids: &[u64]) -> SyncResult<Vec<RawPage>> {
        self.check()?;
        let state = self.state.lock();
        Ok(page_ids.iter().map(|id| state.raw_page(*id)).collect())
    }

    fn fetch_page_by_title(&self, namespace: i32, title: &str) -> SyncResult<Option<RawPage>> {
        self.check()?;
        let state = self.state.lock();
        Ok(state
            .live_page_at(namespace, title)
            .map(|id| state.raw_page(id)))
    }

    fn fetch_page_history(
        &self,
        page_id: u64,
        continuation: Option<&str>,
    ) -> SyncResult<ListPage<RawRevision>> {
        self.check()?;
        let state = self.state.lock();
        let mut records: Vec<(Position, RawRevision)> = state
            .revisions_of(page_id)
            .map(|r| (r.position(), state.raw_revision(r)))
            .collect();
        records.sort_by(|a, b| a.0.cmp(&b.0));
        paginate(&records, None, continuation, HISTORY_LIMIT, false)
    }

    fn fetch_restrictions(&self, page_id: u64) -> SyncResult<Vec<RawProtection>> {
        self.check()?;
        Ok(self.state.lock().raw_protections(page_id))
    }

    fn fetch_title_protection(&self, namespace: i32, title: &str) -> SyncResult<Vec<RawProtection>> {
        self.check()?;
        let state = self.state.lock();
        if state.live_page_at(namespace, title).is_some() {
            return Ok(Vec::new());
        }
        Ok(state
            .protected_titles
            .get(&(namespace, title.to_string()))
            .map(|level| RawProtection {
                action: Some("create".to_string()),
                level: Some(level.clone()),
                expiry: Some("infinity".to_string()),
                cascade: false,
                source: None,
            })
            .into_iter()
            .collect())
    }

    fn fetch_revision_content(&self, rev_ids: &[u64]) -> SyncResult<Vec<RawRevisionContent>> {
        self.check()?;
        let state = self.state.lock();
        Ok(rev_ids
            .iter()
            .filter_map(|id| state.revisions.get(id))
            .map(|revision| {
                let hidden = revision.visibility.hides_text();
                RawRevisionContent {
                    revid: Some(revision.rev_id),
                    contentmodel: Some(CONTENT_MODEL.to_string()),
                    content: (!hidden).then(|| revision.text.clone()),
                    texthidden: hidden,
                }
            })
            .collect())
    }

    fn site_totals(&self) -> SyncResult<RawSiteTotals> {
        self.check()?;
        let state = self.state.lock();
        let live = |page_id: &u64| {
            state
                .pages
                .get(page_id)
                .is_some_and(|p| p.state == FakePageState::Live)
        };
        Ok(RawSiteTotals {
            pages: u64::try_from(state.pages.keys().filter(|id| live(id)).count()).ok(),
            latest_revid: state
                .revisions
                .values()
                .filter(|r| live(&r.page_id))
                .map(|r| r.rev_id)
                .max(),
            latest_logid: state.log.keys().next_back().copied(),
        })
    }

    fn namespaces(&self) -> SyncResult<Vec<RawNamespace>> {
        self.check()?;
        let namespace = |id: i32, name: &str, content: bool| RawNamespace {
            id: Some(id),
            name: Some(name.to_string()),
            canonical: (!name.is_empty()).then(|| name.to_string()),
            case: Some("first-letter".to_string()),
            content,
        };
        Ok(vec![
            namespace(0, "", true),
            namespace(1, "Talk", false),
            namespace(2, "User", false),
        ])
    }

    fn tag_definitions(&self) -> SyncResult<Vec<RawTagDefinition>> {
        self.check()?;
        Ok(self.state.lock().tags.values().cloned().collect())
    }
}
