//! MediaWiki action API transport.
//!
//! This module implements [`RemoteWiki`] over `api.php` with JSON
//! `formatversion=2`. The actual HTTP client is abstracted via a trait
//! so the engine does not depend on a particular HTTP library.
//!
//! Continuation objects returned by the API are serialized into an
//! opaque token and replayed verbatim as request parameters.

use crate::error::{SyncError, SyncResult};
use crate::transport::RemoteWiki;
use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{Map, Value};
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::debug;
use wikimirror_protocol::{
    format_timestamp, ListPage, ListQuery, RawLogEvent, RawNamespace, RawPage, RawProtection,
    RawRecentChange, RawRevision, RawRevisionContent, RawSiteTotals, RawTagDefinition,
    StreamKind,
};

/// Request parameters.
pub type Params = Vec<(String, String)>;

/// HTTP client abstraction.
///
/// Implement this trait to provide the actual HTTP transport.
pub trait HttpClient: Send + Sync {
    /// Sends a GET request with query parameters and returns the body.
    fn get(&self, url: &str, params: &[(String, String)]) -> Result<String, String>;

    /// Checks if the client is healthy.
    fn is_healthy(&self) -> bool;
}

/// Maximum number of ids per multi-value parameter.
const IDS_PER_REQUEST: usize = 50;

/// Upper bound on continuation rounds for unpaginated lookups.
const MAX_ROUNDS: usize = 100;

const REVISION_PROPS: &str = "ids|timestamp|user|userid|comment|size|sha1|flags|tags";
const LOG_PROPS: &str = "ids|title|type|user|userid|timestamp|comment|details|tags";

/// Remote wiki over the MediaWiki action API.
pub struct ApiTransport<C: HttpClient> {
    /// Endpoint, e.g. `https://wiki.example.org/w/api.php`.
    api_url: String,
    /// HTTP client implementation.
    client: C,
    /// Cleared by `close()`.
    open: AtomicBool,
    /// Last error message.
    last_error: RwLock<Option<String>>,
}

impl<C: HttpClient> ApiTransport<C> {
    /// Creates a new API transport.
    pub fn new(api_url: impl Into<String>, client: C) -> Self {
        Self {
            api_url: api_url.into(),
            client,
            open: AtomicBool::new(true),
            last_error: RwLock::new(None),
        }
    }

    /// Returns the endpoint URL.
    pub fn api_url(&self) -> &str {
        &self.api_url
    }

    /// Returns the last error message.
    pub fn last_error(&self) -> Option<String> {
        self.last_error.read().clone()
    }

    /// Returns true if the transport is open and the client healthy.
    pub fn is_connected(&self) -> bool {
        self.open.load(Ordering::SeqCst) && self.client.is_healthy()
    }

    /// Closes the transport; later requests fail with `NotConnected`.
    pub fn close(&self) {
        self.open.store(false, Ordering::SeqCst);
    }

    fn set_error(&self, err: &str) {
        *self.last_error.write() = Some(err.to_string());
    }

    /// Sends an `action=query` request and returns the decoded body.
    fn query(&self, params: Params) -> SyncResult<Value> {
        if !self.open.load(Ordering::SeqCst) {
            return Err(SyncError::NotConnected);
        }
        let mut request = params_of(&[
            ("action", "query"),
            ("format", "json"),
            ("formatversion", "2"),
            ("maxlag", "5"),
        ]);
        request.extend(params);

        let body = self.client.get(&self.api_url, &request).map_err(|e| {
            self.set_error(&e);
            SyncError::transport_retryable(e)
        })?;
        let value: Value = serde_json::from_str(&body)
            .map_err(|e| SyncError::Protocol(format!("invalid JSON response: {e}")))?;
        if let Some(error) = value.get("error") {
            let err = api_error(error);
            self.set_error(&err.to_string());
            return Err(err);
        }
        *self.last_error.write() = None;
        Ok(value)
    }

    /// Fetches one page of a `list=` module.
    fn listing<T: DeserializeOwned>(
        &self,
        list: &str,
        mut params: Params,
        continuation: Option<&str>,
    ) -> SyncResult<ListPage<T>> {
        if let Some(token) = continuation {
            apply_continuation(&mut params, token)?;
        }
        let value = self.query(params)?;
        let items = decode_at(&value, &format!("/query/{list}"))?;
        Ok(ListPage {
            items,
            continuation: continuation_token(&value),
        })
    }

    fn log_listing(&self, query: &ListQuery, log_type: Option<&str>) -> SyncResult<ListPage<RawLogEvent>> {
        let mut params = params_of(&[("list", "logevents"), ("leprop", LOG_PROPS), ("ledir", "newer")]);
        params.push(("lelimit".into(), query.limit.to_string()));
        if let Some(log_type) = log_type {
            params.push(("letype".into(), log_type.into()));
        }
        if let Some(since) = &query.since {
            params.push(("lestart".into(), format_timestamp(&since.timestamp)));
        }
        self.listing("logevents", params, query.continuation.as_deref())
    }

    /// Returns the timestamp of the oldest retained recent change.
    fn oldest_recent_change(&self) -> SyncResult<Option<String>> {
        let value = self.query(params_of(&[
            ("list", "recentchanges"),
            ("rcprop", "timestamp"),
            ("rcdir", "newer"),
            ("rclimit", "1"),
        ]))?;
        let changes: Vec<RawRecentChange> = decode_at(&value, "/query/recentchanges")?;
        Ok(changes.into_iter().next().and_then(|rc| rc.timestamp))
    }

    fn history_phase(
        &self,
        page_id: u64,
        phase: HistoryPhase,
        continuation: Option<&str>,
    ) -> SyncResult<ListPage<RawRevision>> {
        let (prop, prefix) = match phase {
            HistoryPhase::Live => ("revisions", "rv"),
            HistoryPhase::Archived => ("deletedrevisions", "drv"),
        };
        let mut params = params_of(&[("prop", prop)]);
        params.push(("pageids".into(), page_id.to_string()));
        params.push((format!("{prefix}prop"), REVISION_PROPS.into()));
        params.push((format!("{prefix}slots"), "main".into()));
        params.push((format!("{prefix}dir"), "newer".into()));
        params.push((format!("{prefix}limit"), "max".into()));
        if let Some(token) = continuation {
            apply_continuation(&mut params, token)?;
        }

        let value = self.query(params)?;
        let pages: Vec<PageRevisions> = decode_at(&value, "/query/pages")?;
        let archived = phase == HistoryPhase::Archived;
        let mut items = Vec::new();
        for page in pages {
            let revisions = if archived {
                page.deletedrevisions
            } else {
                page.revisions
            };
            for mut revision in revisions {
                revision.pageid = Some(page_id);
                revision.archived = archived;
                items.push(revision);
            }
        }

        let next = match (phase, continuation_token(&value)) {
            (HistoryPhase::Live, Some(token)) => Some(format!("rev|{token}")),
            (HistoryPhase::Live, None) => Some("drv".to_string()),
            (HistoryPhase::Archived, Some(token)) => Some(format!("drv|{token}")),
            (HistoryPhase::Archived, None) => None,
        };
        Ok(ListPage {
            items,
            continuation: next,
        })
    }
}

impl<C: HttpClient> RemoteWiki for ApiTransport<C> {
    fn list_changed_pages(&self, query: &ListQuery) -> SyncResult<ListPage<RawRecentChange>> {
        if let (Some(since), None) = (&query.since, &query.continuation) {
            let requested = format_timestamp(&since.timestamp);
            if let Some(oldest) = self.oldest_recent_change()? {
                // both sides use the same fixed-width format
                if oldest > requested {
                    debug!(%oldest, %requested, "recent changes purged past checkpoint");
                    return Err(SyncError::HistoryPurged {
                        stream: StreamKind::Pages,
                    });
                }
            }
        }
        let mut params = params_of(&[
            ("list", "recentchanges"),
            ("rcprop", "ids|timestamp|title"),
            ("rctype", "edit|new|log"),
            ("rcdir", "newer"),
        ]);
        params.push(("rclimit".into(), query.limit.to_string()));
        if let Some(since) = &query.since {
            params.push(("rcstart".into(), format_timestamp(&since.timestamp)));
        }
        self.listing("recentchanges", params, query.continuation.as_deref())
    }

    fn list_revisions(&self, query: &ListQuery) -> SyncResult<ListPage<RawRevision>> {
        let mut params = params_of(&[
            ("list", "allrevisions"),
            ("arvprop", REVISION_PROPS),
            ("arvslots", "main"),
            ("arvdir", "newer"),
        ]);
        params.push(("arvlimit".into(), query.limit.to_string()));
        if let Some(since) = &query.since {
            params.push(("arvstart".into(), format_timestamp(&since.timestamp)));
        }
        let groups: ListPage<PageRevisions> =
            self.listing("allrevisions", params, query.continuation.as_deref())?;

        // the module groups by page; the stream wants global order
        let mut items: Vec<RawRevision> = Vec::new();
        for group in groups.items {
            for mut revision in group.revisions {
                revision.pageid = revision.pageid.or(group.pageid);
                items.push(revision);
            }
        }
        items.sort_by(|a, b| (&a.timestamp, a.revid).cmp(&(&b.timestamp, b.revid)));
        Ok(ListPage {
            items,
            continuation: groups.continuation,
        })
    }

    fn list_log_events(&self, query: &ListQuery) -> SyncResult<ListPage<RawLogEvent>> {
        self.log_listing(query, None)
    }

    fn list_tag_changes(&self, query: &ListQuery) -> SyncResult<ListPage<RawLogEvent>> {
        self.log_listing(query, Some("tag"))
    }

    fn list_restriction_changes(&self, query: &ListQuery) -> SyncResult<ListPage<RawLogEvent>> {
        self.log_listing(query, Some("protect"))
    }

    fn fetch_pages(&self, page_ids: &[u64]) -> SyncResult<Vec<RawPage>> {
        let mut pages = Vec::with_capacity(page_ids.len());
        for chunk in page_ids.chunks(IDS_PER_REQUEST) {
            let mut params = params_of(&[("prop", "info"), ("inprop", "protection")]);
            params.push(("pageids".into(), join_ids(chunk)));
            let value = self.query(params)?;
            let mut fetched: Vec<RawPage> = decode_at(&value, "/query/pages")?;
            for id in chunk {
                match fetched.iter().position(|page| page.pageid == Some(*id)) {
                    Some(idx) => pages.push(fetched.swap_remove(idx)),
                    None => pages.push(RawPage {
                        pageid: Some(*id),
                        missing: true,
                        ..RawPage::default()
                    }),
                }
            }
        }
        Ok(pages)
    }

    fn fetch_page_by_title(&self, namespace: i32, title: &str) -> SyncResult<Option<RawPage>> {
        let mut params = params_of(&[("list", "allpages"), ("aplimit", "1")]);
        params.push(("apnamespace".into(), namespace.to_string()));
        params.push(("apfrom".into(), title.to_string()));
        params.push(("apto".into(), title.to_string()));
        let value = self.query(params)?;
        let found: Vec<RawPage> = decode_at(&value, "/query/allpages")?;
        let Some(page_id) = found.into_iter().find_map(|page| page.pageid) else {
            return Ok(None);
        };
        Ok(self
            .fetch_pages(&[page_id])?
            .into_iter()
            .find(|page| !page.missing))
    }

    fn fetch_page_history(
        &self,
        page_id: u64,
        continuation: Option<&str>,
    ) -> SyncResult<ListPage<RawRevision>> {
        match continuation {
            None => self.history_phase(page_id, HistoryPhase::Live, None),
            Some(token) => match token.split_once('|') {
                Some(("rev", rest)) => self.history_phase(page_id, HistoryPhase::Live, Some(rest)),
                Some(("drv", rest)) => {
                    self.history_phase(page_id, HistoryPhase::Archived, Some(rest))
                }
                None if token == "drv" => self.history_phase(page_id, HistoryPhase::Archived, None),
                _ => Err(SyncError::InvalidContinuation),
            },
        }
    }

    fn fetch_restrictions(&self, page_id: u64) -> SyncResult<Vec<RawProtection>> {
        Ok(self
            .fetch_pages(&[page_id])?
            .into_iter()
            .filter(|page| !page.missing)
            .flat_map(|page| page.protection)
            .collect())
    }

    fn fetch_title_protection(&self, _namespace: i32, title: &str) -> SyncResult<Vec<RawProtection>> {
        // the title carries its namespace prefix
        let mut params = params_of(&[("prop", "info"), ("inprop", "protection")]);
        params.push(("titles".into(), title.to_string()));
        let value = self.query(params)?;
        let pages: Vec<RawPage> = decode_at(&value, "/query/pages")?;
        Ok(pages
            .into_iter()
            .filter(|page| page.missing)
            .flat_map(|page| page.protection)
            .collect())
    }

    fn fetch_revision_content(&self, rev_ids: &[u64]) -> SyncResult<Vec<RawRevisionContent>> {
        let mut contents = Vec::with_capacity(rev_ids.len());
        for chunk in rev_ids.chunks(IDS_PER_REQUEST) {
            let mut params = params_of(&[
                ("prop", "revisions"),
                ("rvprop", "ids|content|contentmodel"),
                ("rvslots", "main"),
            ]);
            params.push(("revids".into(), join_ids(chunk)));
            let value = self.query(params)?;
            let pages: Vec<PageRevisions> = decode_at(&value, "/query/pages")?;
            for revision in pages.into_iter().flat_map(|page| page.revisions) {
                let slot = revision.slots.get("main").cloned().unwrap_or_default();
                contents.push(RawRevisionContent {
                    revid: revision.revid,
                    contentmodel: slot.contentmodel,
                    content: slot.content,
                    texthidden: slot.texthidden || revision.texthidden,
                });
            }
        }
        Ok(contents)
    }

    fn site_totals(&self) -> SyncResult<RawSiteTotals> {
        let value = self.query(params_of(&[
            ("meta", "siteinfo"),
            ("siprop", "statistics"),
            ("list", "allrevisions|logevents"),
            ("arvprop", "ids"),
            ("arvlimit", "1"),
            ("leprop", "ids"),
            ("lelimit", "1"),
        ]))?;
        let newest: Vec<PageRevisions> = decode_at(&value, "/query/allrevisions")?;
        let newest_log: Vec<RawLogEvent> = decode_at(&value, "/query/logevents")?;
        Ok(RawSiteTotals {
            pages: value
                .pointer("/query/statistics/pages")
                .and_then(Value::as_u64),
            latest_revid: newest
                .iter()
                .flat_map(|group| &group.revisions)
                .filter_map(|rev| rev.revid)
                .max(),
            latest_logid: newest_log.iter().filter_map(|event| event.logid).max(),
        })
    }

    fn namespaces(&self) -> SyncResult<Vec<RawNamespace>> {
        let value = self.query(params_of(&[("meta", "siteinfo"), ("siprop", "namespaces")]))?;
        let table: Map<String, Value> = decode_at(&value, "/query/namespaces")?;
        let mut namespaces = table
            .into_values()
            .map(|entry| {
                serde_json::from_value::<RawNamespace>(entry)
                    .map_err(|e| SyncError::Protocol(format!("invalid namespace entry: {e}")))
            })
            .collect::<SyncResult<Vec<_>>>()?;
        namespaces.sort_by_key(|ns| ns.id);
        Ok(namespaces)
    }

    fn tag_definitions(&self) -> SyncResult<Vec<RawTagDefinition>> {
        let params = params_of(&[
            ("list", "tags"),
            ("tgprop", "displayname|description|defined|active|source"),
            ("tglimit", "max"),
        ]);
        let mut definitions = Vec::new();
        let mut continuation: Option<String> = None;
        for _ in 0..MAX_ROUNDS {
            let page: ListPage<RawTagDefinition> =
                self.listing("tags", params.clone(), continuation.as_deref())?;
            definitions.extend(page.items);
            continuation = page.continuation;
            if continuation.is_none() {
                break;
            }
        }
        Ok(definitions)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum HistoryPhase {
    Live,
    Archived,
}

/// A page entry carrying revisions, as returned by `prop=revisions`,
/// `prop=deletedrevisions` and `list=allrevisions`.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct PageRevisions {
    pageid: Option<u64>,
    revisions: Vec<RawRevision>,
    deletedrevisions: Vec<RawRevision>,
}

fn params_of(pairs: &[(&str, &str)]) -> Params {
    pairs
        .iter()
        .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
        .collect()
}

fn join_ids(ids: &[u64]) -> String {
    ids.iter()
        .map(u64::to_string)
        .collect::<Vec<_>>()
        .join("|")
}

/// Decodes the value at a JSON pointer; an absent value decodes as the
/// type's default.
fn decode_at<T: DeserializeOwned + Default>(value: &Value, pointer: &str) -> SyncResult<T> {
    match value.pointer(pointer) {
        None | Some(Value::Null) => Ok(T::default()),
        Some(found) => serde_json::from_value(found.clone())
            .map_err(|e| SyncError::Protocol(format!("cannot decode {pointer}: {e}"))),
    }
}

/// Serializes the response's `continue` object into a token.
fn continuation_token(value: &Value) -> Option<String> {
    value
        .get("continue")
        .filter(|c| c.as_object().is_some_and(|obj| !obj.is_empty()))
        .map(Value::to_string)
}

/// Replays a continuation token as request parameters.
fn apply_continuation(params: &mut Params, token: &str) -> SyncResult<()> {
    let Ok(Value::Object(fields)) = serde_json::from_str::<Value>(token) else {
        return Err(SyncError::InvalidContinuation);
    };
    for (key, value) in fields {
        let value = match value {
            Value::String(s) => s,
            Value::Number(n) => n.to_string(),
            _ => return Err(SyncError::InvalidContinuation),
        };
        params.retain(|(k, _)| *k != key);
        params.push((key, value));
    }
    Ok(())
}

/// Maps an API `error` object onto the sync error taxonomy.
fn api_error(error: &Value) -> SyncError {
    let code = error.get("code").and_then(Value::as_str).unwrap_or("unknown");
    let info = error.get("info").and_then(Value::as_str).unwrap_or("");
    match code {
        "badcontinue" => SyncError::InvalidContinuation,
        "maxlag" | "ratelimited" | "readonly" => {
            SyncError::transport_retryable(format!("{code}: {info}"))
        }
        code if code.starts_with("internal_api_error") => {
            SyncError::ServerError(format!("{code}: {info}"))
        }
        code => SyncError::Protocol(format!("api error {code}: {info}")),
    }
}
