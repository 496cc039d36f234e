//! A simulated remote wiki.
//!
//! `FakeWiki` holds the authoritative state of a small wiki in memory and
//! records every mutation the way a MediaWiki site does: as revisions,
//! log events and recent changes with ascending ids.
//!
//! The clock is deterministic. It starts at 2024-01-01T00:00:00Z and
//! advances one second per mutation, so every record written by one
//! mutation shares a timestamp and two runs of the same script produce
//! identical wikis.
//!
//! Mutations panic when used in a way the real wiki would refuse (moving
//! onto an article, undeleting over a live page, ...). They are test
//! scripts, not input validation.
//!
//! The simulated account is privileged: hidden comments and user names
//! are still delivered, flagged as hidden.

use chrono::{DateTime, Duration, TimeZone, Utc};
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::collections::{BTreeMap, BTreeSet};
use wikimirror_protocol::{
    format_timestamp, Position, RawLogEvent, RawRecentChange, RawTagDefinition, Visibility,
};

/// Name of the account performing every mutation.
pub const FAKE_USER: &str = "Tester";

/// Id of the account performing every mutation.
pub const FAKE_USER_ID: u64 = 7;

/// Lifecycle state of a simulated page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FakePageState {
    /// Exists.
    Live,
    /// Deleted; can be undeleted.
    Deleted,
    /// History fully merged into the given page.
    Merged(u64),
}

#[derive(Debug, Clone)]
pub(crate) struct FakePage {
    pub(crate) page_id: u64,
    pub(crate) namespace: i32,
    pub(crate) title: String,
    pub(crate) state: FakePageState,
    /// Protected action to required level.
    pub(crate) protections: BTreeMap<String, String>,
}

#[derive(Debug, Clone)]
pub(crate) struct FakeRevision {
    pub(crate) rev_id: u64,
    pub(crate) page_id: u64,
    pub(crate) parent_id: u64,
    pub(crate) timestamp: DateTime<Utc>,
    pub(crate) comment: String,
    pub(crate) text: String,
    pub(crate) minor: bool,
    pub(crate) visibility: Visibility,
    pub(crate) tags: BTreeSet<String>,
}

impl FakeRevision {
    pub(crate) fn position(&self) -> Position {
        Position::new(self.timestamp, self.rev_id)
    }
}

#[derive(Debug, Clone)]
pub(crate) struct FakeLogEvent {
    pub(crate) timestamp: DateTime<Utc>,
    pub(crate) raw: RawLogEvent,
}

#[derive(Debug)]
pub(crate) struct WikiState {
    pub(crate) clock: DateTime<Utc>,
    next_page: u64,
    next_rev: u64,
    next_log: u64,
    next_rc: u64,
    pub(crate) pages: BTreeMap<u64, FakePage>,
    pub(crate) revisions: BTreeMap<u64, FakeRevision>,
    pub(crate) log: BTreeMap<u64, FakeLogEvent>,
    pub(crate) recent_changes: Vec<(Position, RawRecentChange)>,
    /// Recent changes before this instant were purged.
    pub(crate) rc_floor: Option<DateTime<Utc>>,
    pub(crate) tags: BTreeMap<String, RawTagDefinition>,
    /// Titles without a page, to the level required to create them.
    pub(crate) protected_titles: BTreeMap<(i32, String), String>,
    /// Remote calls left to fail.
    pub(crate) failures: u32,
    pub(crate) duplicate_boundaries: bool,
}

impl WikiState {
    fn new() -> Self {
        Self {
            clock: Utc
                .with_ymd_and_hms(2024, 1, 1, 0, 0, 0)
                .single()
                .unwrap_or_default(),
            next_page: 1,
            next_rev: 1,
            next_log: 1,
            next_rc: 1,
            pages: BTreeMap::new(),
            revisions: BTreeMap::new(),
            log: BTreeMap::new(),
            recent_changes: Vec::new(),
            rc_floor: None,
            tags: BTreeMap::new(),
            protected_titles: BTreeMap::new(),
            failures: 0,
            duplicate_boundaries: false,
        }
    }

    fn tick(&mut self) -> DateTime<Utc> {
        self.clock += Duration::seconds(1);
        self.clock
    }

    pub(crate) fn live_page_at(&self, namespace: i32, title: &str) -> Option<u64> {
        self.pages
            .values()
            .find(|p| p.state == FakePageState::Live && p.namespace == namespace && p.title == title)
            .map(|p| p.page_id)
    }

    fn page(&self, page_id: u64) -> &FakePage {
        self.pages
            .get(&page_id)
            .unwrap_or_else(|| panic!("page {page_id} does not exist"))
    }

    fn page_mut(&mut self, page_id: u64) -> &mut FakePage {
        self.pages
            .get_mut(&page_id)
            .unwrap_or_else(|| panic!("page {page_id} does not exist"))
    }

    fn live_page(&self, page_id: u64) -> &FakePage {
        let page = self.page(page_id);
        assert_eq!(page.state, FakePageState::Live, "page {page_id} is not live");
        page
    }

    fn revision_mut(&mut self, rev_id: u64) -> &mut FakeRevision {
        self.revisions
            .get_mut(&rev_id)
            .unwrap_or_else(|| panic!("revision {rev_id} does not exist"))
    }

    pub(crate) fn revisions_of(&self, page_id: u64) -> impl Iterator<Item = &FakeRevision> {
        self.revisions.values().filter(move |r| r.page_id == page_id)
    }

    /// Latest revision by timestamp, then id.
    pub(crate) fn latest(&self, page_id: u64) -> Option<&FakeRevision> {
        self.revisions_of(page_id).max_by_key(|r| r.position())
    }

    fn add_revision(
        &mut self,
        page_id: u64,
        timestamp: DateTime<Utc>,
        text: &str,
        comment: &str,
        minor: bool,
    ) -> u64 {
        let parent_id = self.latest(page_id).map_or(0, |r| r.rev_id);
        let rev_id = self.next_rev;
        self.next_rev += 1;
        self.revisions.insert(
            rev_id,
            FakeRevision {
                rev_id,
                page_id,
                parent_id,
                timestamp,
                comment: comment.to_string(),
                text: text.to_string(),
                minor,
                visibility: Visibility::VISIBLE,
                tags: BTreeSet::new(),
            },
        );
        rev_id
    }

    fn new_page(&mut self, namespace: i32, title: &str) -> u64 {
        self.protected_titles.remove(&(namespace, title.to_string()));
        let page_id = self.next_page;
        self.next_page += 1;
        self.pages.insert(
            page_id,
            FakePage {
                page_id,
                namespace,
                title: title.to_string(),
                state: FakePageState::Live,
                protections: BTreeMap::new(),
            },
        );
        page_id
    }

    #[allow(clippy::too_many_arguments)]
    fn log(
        &mut self,
        timestamp: DateTime<Utc>,
        log_type: &str,
        action: &str,
        page_id: Option<u64>,
        namespace: i32,
        title: &str,
        params: Value,
    ) -> u64 {
        let log_id = self.next_log;
        self.next_log += 1;
        let raw = RawLogEvent {
            logid: Some(log_id),
            ns: Some(namespace),
            title: Some(title.to_string()),
            pageid: page_id,
            logpage: page_id,
            log_type: Some(log_type.to_string()),
            action: Some(action.to_string()),
            user: Some(FAKE_USER.to_string()),
            userid: Some(FAKE_USER_ID),
            timestamp: Some(format_timestamp(&timestamp)),
            comment: Some(format!("{log_type}/{action}")),
            params,
            ..RawLogEvent::default()
        };
        self.log.insert(log_id, FakeLogEvent { timestamp, raw });
        log_id
    }

    /// Logs an event about a page under the page's current title.
    fn log_page(
        &mut self,
        timestamp: DateTime<Utc>,
        log_type: &str,
        action: &str,
        page_id: u64,
        params: Value,
    ) -> u64 {
        let page = self.page(page_id);
        let (namespace, title) = (page.namespace, page.title.clone());
        self.log(timestamp, log_type, action, Some(page_id), namespace, &title, params)
    }

    fn recent_change(
        &mut self,
        timestamp: DateTime<Utc>,
        change_type: &str,
        page_id: u64,
        rev_id: Option<u64>,
    ) {
        let rcid = self.next_rc;
        self.next_rc += 1;
        let page = self.page(page_id);
        let raw = RawRecentChange {
            rcid: Some(rcid),
            change_type: Some(change_type.to_string()),
            ns: Some(page.namespace),
            title: Some(page.title.clone()),
            pageid: Some(page_id),
            revid: rev_id,
            timestamp: Some(format_timestamp(&timestamp)),
        };
        self.recent_changes.push((Position::new(timestamp, rcid), raw));
    }

    fn retire(&mut self, page_id: u64, state: FakePageState) {
        let page = self.page_mut(page_id);
        page.state = state;
        page.protections.clear();
    }
}

/// Returns true if wikitext is a redirect.
pub(crate) fn is_redirect(text: &str) -> bool {
    text.trim_start()
        .get(..9)
        .is_some_and(|prefix| prefix.eq_ignore_ascii_case("#redirect"))
}

/// Log type recording a visibility change.
fn visibility_log_type(old: Visibility, new: Visibility) -> &'static str {
    if (old.bits() | new.bits()) & Visibility::RESTRICTED != 0 {
        "suppress"
    } else {
        "delete"
    }
}

/// Splits a requested tag change into the part that changes anything.
fn effective_tags(
    current: &BTreeSet<String>,
    added: &[&str],
    removed: &[&str],
) -> (Vec<String>, Vec<String>) {
    let mut target = current.clone();
    target.extend(added.iter().map(|t| t.to_string()));
    for tag in removed {
        target.remove(*tag);
    }
    (
        target.difference(current).cloned().collect(),
        current.difference(&target).cloned().collect(),
    )
}

/// An in-memory remote wiki with a deterministic clock.
///
/// Implements [`RemoteWiki`](wikimirror_sync::RemoteWiki), so a
/// `SyncEngine` can mirror it. Shared between a test and its engine
/// through an `Arc`; every method takes `&self`.
#[derive(Debug)]
pub struct FakeWiki {
    pub(crate) state: Mutex<WikiState>,
}

impl Default for FakeWiki {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeWiki {
    /// Creates an empty wiki.
    pub fn new() -> Self {
        Self {
            state: Mutex::new(WikiState::new()),
        }
    }

    // ------------------------------------------------------------------
    // Page mutations
    // ------------------------------------------------------------------

    /// Creates a page in the main namespace. Returns its id.
    pub fn create_page(&self, title: &str, text: &str) -> u64 {
        self.create_page_in(0, title, text)
    }

    /// Creates a page. Returns its id.
    ///
    /// # Panics
    ///
    /// Panics if a live page holds the title.
    pub fn create_page_in(&self, namespace: i32, title: &str, text: &str) -> u64 {
        let mut s = self.state.lock();
        assert!(
            s.live_page_at(namespace, title).is_none(),
            "title {namespace}:{title} is taken"
        );
        let ts = s.tick();
        let page_id = s.new_page(namespace, title);
        let rev_id = s.add_revision(page_id, ts, text, "created page", false);
        s.log_page(ts, "create", "create", page_id, json!({}));
        s.recent_change(ts, "new", page_id, Some(rev_id));
        page_id
    }

    /// Saves a new revision of a live page. Returns the revision id.
    pub fn edit_page(&self, page_id: u64, text: &str) -> u64 {
        let mut s = self.state.lock();
        s.live_page(page_id);
        let ts = s.tick();
        let rev_id = s.add_revision(page_id, ts, text, "edited page", false);
        s.recent_change(ts, "edit", page_id, Some(rev_id));
        rev_id
    }

    /// Renames a live page within its namespace, adding a null revision.
    ///
    /// A redirect holding the new title is deleted first. With
    /// `leave_redirect` a redirect page is created at the old title; its
    /// id is returned.
    ///
    /// # Panics
    ///
    /// Panics if the new title is held by a page that is not a redirect.
    pub fn move_page(&self, page_id: u64, new_title: &str, leave_redirect: bool) -> Option<u64> {
        let mut s = self.state.lock();
        let page = s.live_page(page_id);
        let (namespace, old_title) = (page.namespace, page.title.clone());
        assert_ne!(old_title, new_title, "page {page_id} already has this title");
        let ts = s.tick();

        let over_redirect = match s.live_page_at(namespace, new_title) {
            Some(occupant) => {
                let text = s.latest(occupant).map(|r| r.text.clone()).unwrap_or_default();
                assert!(is_redirect(&text), "title {new_title} is held by an article");
                s.retire(occupant, FakePageState::Deleted);
                s.log_page(ts, "delete", "delete_redir", occupant, json!({}));
                s.recent_change(ts, "log", occupant, None);
                true
            }
            None => false,
        };

        s.page_mut(page_id).title = new_title.to_string();
        s.protected_titles.remove(&(namespace, new_title.to_string()));
        let text = s.latest(page_id).map(|r| r.text.clone()).unwrap_or_default();
        let rev_id = s.add_revision(
            page_id,
            ts,
            &text,
            &format!("moved [[{old_title}]] to [[{new_title}]]"),
            true,
        );
        s.log(
            ts,
            "move",
            if over_redirect { "move_redir" } else { "move" },
            Some(page_id),
            namespace,
            &old_title,
            json!({
                "target_ns": namespace,
                "target_title": new_title,
                "suppressredirect": !leave_redirect,
            }),
        );
        s.recent_change(ts, "log", page_id, Some(rev_id));

        if !leave_redirect {
            return None;
        }
        let redirect = s.new_page(namespace, &old_title);
        let rev_id = s.add_revision(
            redirect,
            ts,
            &format!("#REDIRECT [[{new_title}]]"),
            &format!("moved [[{old_title}]] to [[{new_title}]]"),
            false,
        );
        s.recent_change(ts, "new", redirect, Some(rev_id));
        Some(redirect)
    }

    /// Deletes a live page. Suppression also hides every field of its
    /// revisions.
    pub fn delete_page(&self, page_id: u64, suppress: bool) -> u64 {
        let mut s = self.state.lock();
        s.live_page(page_id);
        let ts = s.tick();
        s.retire(page_id, FakePageState::Deleted);
        if suppress {
            let all = Visibility::from_bits(Visibility::ALL);
            for revision in s.revisions.values_mut().filter(|r| r.page_id == page_id) {
                revision.visibility = all;
            }
        }
        let log_type = if suppress { "suppress" } else { "delete" };
        let log_id = s.log_page(ts, log_type, "delete", page_id, json!({}));
        s.recent_change(ts, "log", page_id, None);
        log_id
    }

    /// Undeletes a deleted page with all its revisions.
    ///
    /// # Panics
    ///
    /// Panics if the page is not deleted or a live page took its title.
    pub fn undelete_page(&self, page_id: u64) -> u64 {
        let mut s = self.state.lock();
        let page = s.page(page_id);
        assert_eq!(page.state, FakePageState::Deleted, "page {page_id} is not deleted");
        let (namespace, title) = (page.namespace, page.title.clone());
        assert!(
            s.live_page_at(namespace, &title).is_none(),
            "title {title} is taken"
        );
        let ts = s.tick();
        s.page_mut(page_id).state = FakePageState::Live;
        s.protected_titles.remove(&(namespace, title.clone()));
        let count = s.revisions_of(page_id).count();
        let log_id = s.log_page(
            ts,
            "delete",
            "restore",
            page_id,
            json!({"count": {"revisions": count, "files": 0}}),
        );
        s.recent_change(ts, "log", page_id, None);
        log_id
    }

    /// Moves the revisions of `source` older than the oldest revision of
    /// `dest` into `dest`. A source left without revisions stops
    /// existing. Returns the number of moved revisions.
    ///
    /// # Panics
    ///
    /// Panics unless both pages are live and some revision qualifies.
    pub fn merge_history(&self, source: u64, dest: u64) -> usize {
        let mut s = self.state.lock();
        assert_ne!(source, dest, "cannot merge a page into itself");
        s.live_page(source);
        let dest_page = s.live_page(dest);
        let (dest_ns, dest_title) = (dest_page.namespace, dest_page.title.clone());
        let oldest = s
            .revisions_of(dest)
            .map(|r| r.timestamp)
            .min()
            .unwrap_or_else(|| panic!("page {dest} has no revisions"));
        let moved: Vec<u64> = s
            .revisions_of(source)
            .filter(|r| r.timestamp < oldest)
            .map(|r| r.rev_id)
            .collect();
        assert!(
            !moved.is_empty(),
            "no revision of page {source} predates page {dest}"
        );
        let mergepoint = moved
            .iter()
            .filter_map(|id| s.revisions.get(id).map(|r| r.timestamp))
            .max()
            .unwrap_or(oldest);

        let ts = s.tick();
        for rev_id in &moved {
            s.revision_mut(*rev_id).page_id = dest;
        }
        if s.revisions_of(source).next().is_none() {
            s.retire(source, FakePageState::Merged(dest));
        }
        s.log_page(
            ts,
            "merge",
            "merge",
            source,
            json!({
                "dest_ns": dest_ns,
                "dest_title": dest_title,
                "dest_pageid": dest,
                "mergepoint": format_timestamp(&mergepoint),
            }),
        );
        s.recent_change(ts, "log", source, None);
        s.recent_change(ts, "log", dest, None);
        moved.len()
    }

    /// Sets or lifts edit and move protection of a live page.
    pub fn protect(&self, page_id: u64, level: Option<&str>) -> u64 {
        let mut s = self.state.lock();
        let was_protected = !s.live_page(page_id).protections.is_empty();
        let ts = s.tick();
        let action = match (level, was_protected) {
            (None, _) => "unprotect",
            (Some(_), false) => "protect",
            (Some(_), true) => "modify",
        };
        let protections: BTreeMap<String, String> = level
            .map(|level| {
                ["edit", "move"]
                    .into_iter()
                    .map(|action| (action.to_string(), level.to_string()))
                    .collect()
            })
            .unwrap_or_default();
        let details: Vec<Value> = protections
            .iter()
            .map(|(action, level)| json!({"type": action, "level": level, "expiry": "infinite"}))
            .collect();
        s.page_mut(page_id).protections = protections;
        let log_id = s.log_page(ts, "protect", action, page_id, json!({"details": details}));
        s.recent_change(ts, "log", page_id, None);
        log_id
    }

    /// Sets or lifts the create protection of a title without a page.
    /// The protection lasts until a page appears at the title.
    ///
    /// # Panics
    ///
    /// Panics if a live page holds the title.
    pub fn protect_title(&self, namespace: i32, title: &str, level: Option<&str>) -> u64 {
        let mut s = self.state.lock();
        assert!(
            s.live_page_at(namespace, title).is_none(),
            "title {namespace}:{title} has a page"
        );
        let key = (namespace, title.to_string());
        let was_protected = s.protected_titles.contains_key(&key);
        let ts = s.tick();
        let (action, params) = match level {
            Some(level) => {
                s.protected_titles.insert(key, level.to_string());
                (
                    if was_protected { "modify" } else { "protect" },
                    json!({"details": [{"type": "create", "level": level, "expiry": "infinite"}]}),
                )
            }
            None => {
                s.protected_titles.remove(&key);
                ("unprotect", json!({}))
            }
        };
        s.log(ts, "protect", action, None, namespace, title, params)
    }

    // ------------------------------------------------------------------
    // Visibility and tags
    // ------------------------------------------------------------------

    /// Changes the visibility of revisions of one page.
    ///
    /// # Panics
    ///
    /// Panics if the ids are empty, unknown or span several pages.
    pub fn set_revision_visibility(&self, rev_ids: &[u64], visibility: Visibility) -> u64 {
        let mut s = self.state.lock();
        let first = rev_ids.first().copied().expect("no revisions given");
        let page_id = s.revision_mut(first).page_id;
        let old = s.revision_mut(first).visibility;
        let ts = s.tick();
        for rev_id in rev_ids {
            let revision = s.revision_mut(*rev_id);
            assert_eq!(revision.page_id, page_id, "revisions of several pages");
            revision.visibility = visibility;
        }
        s.log_page(
            ts,
            visibility_log_type(old, visibility),
            "revision",
            page_id,
            json!({
                "type": "revision",
                "ids": rev_ids,
                "old": {"bitmask": old.bits()},
                "new": {"bitmask": visibility.bits()},
            }),
        )
    }

    /// Changes the visibility of log events.
    ///
    /// # Panics
    ///
    /// Panics if the ids are empty or unknown.
    pub fn set_event_visibility(&self, log_ids: &[u64], visibility: Visibility) -> u64 {
        let mut s = self.state.lock();
        let first = log_ids.first().copied().expect("no log events given");
        let old = {
            let raw = &s.log.get(&first).expect("unknown log event").raw;
            Visibility::from_flags(raw.actionhidden, raw.commenthidden, raw.userhidden, raw.suppressed)
        };
        let ts = s.tick();
        let bits = visibility.bits();
        for log_id in log_ids {
            let raw = &mut s
                .log
                .get_mut(log_id)
                .unwrap_or_else(|| panic!("log event {log_id} does not exist"))
                .raw;
            raw.actionhidden = bits & Visibility::TEXT != 0;
            raw.commenthidden = bits & Visibility::COMMENT != 0;
            raw.userhidden = bits & Visibility::USER != 0;
            raw.suppressed = bits & Visibility::RESTRICTED != 0;
        }
        s.log(
            ts,
            visibility_log_type(old, visibility),
            "event",
            None,
            -1,
            "Special:Log",
            json!({
                "type": "logging",
                "ids": log_ids,
                "old": {"bitmask": old.bits()},
                "new": {"bitmask": bits},
            }),
        )
    }

    /// Adds and removes change tags of a revision. Only the part of the
    /// request that changes anything is logged; a request changing
    /// nothing logs nothing and returns `None`.
    pub fn tag_revision(&self, rev_id: u64, added: &[&str], removed: &[&str]) -> Option<u64> {
        let mut s = self.state.lock();
        let (page_id, current) = {
            let revision = s.revision_mut(rev_id);
            (revision.page_id, revision.tags.clone())
        };
        let (added, removed) = effective_tags(&current, added, removed);
        if added.is_empty() && removed.is_empty() {
            return None;
        }
        let ts = s.tick();
        let revision = s.revision_mut(rev_id);
        revision.tags.extend(added.iter().cloned());
        for tag in &removed {
            revision.tags.remove(tag);
        }
        Some(s.log_page(
            ts,
            "tag",
            "update",
            page_id,
            json!({"revid": rev_id, "tagsAdded": added, "tagsRemoved": removed}),
        ))
    }

    /// Adds and removes change tags of a log event, like
    /// [`tag_revision`](Self::tag_revision).
    pub fn tag_log_event(&self, log_id: u64, added: &[&str], removed: &[&str]) -> Option<u64> {
        let mut s = self.state.lock();
        let target = s
            .log
            .get(&log_id)
            .unwrap_or_else(|| panic!("log event {log_id} does not exist"))
            .raw
            .clone();
        let current: BTreeSet<String> = target.tags.iter().cloned().collect();
        let (added, removed) = effective_tags(&current, added, removed);
        if added.is_empty() && removed.is_empty() {
            return None;
        }
        let ts = s.tick();
        if let Some(event) = s.log.get_mut(&log_id) {
            let mut tags = current;
            tags.extend(added.iter().cloned());
            for tag in &removed {
                tags.remove(tag);
            }
            event.raw.tags = tags.into_iter().collect();
        }
        Some(s.log(
            ts,
            "tag",
            "update",
            target.logpage,
            target.ns.unwrap_or(0),
            target.title.as_deref().unwrap_or_default(),
            json!({"logid": log_id, "tagsAdded": added, "tagsRemoved": removed}),
        ))
    }

    /// Defines a manual change tag.
    pub fn define_tag(&self, name: &str) -> u64 {
        let mut s = self.state.lock();
        let ts = s.tick();
        s.tags.insert(
            name.to_string(),
            RawTagDefinition {
                name: Some(name.to_string()),
                displayname: Some(name.to_string()),
                description: None,
                defined: true,
                active: true,
                source: vec!["manual".to_string()],
            },
        );
        s.log(
            ts,
            "managetags",
            "create",
            None,
            -1,
            &format!("Special:Tags/{name}"),
            json!({"tag": name}),
        )
    }

    /// Appends an arbitrary log event without parameters, for feeding
    /// the mirror records it cannot interpret.
    pub fn inject_log_event(&self, log_type: &str, action: &str, page_id: Option<u64>) -> u64 {
        let mut s = self.state.lock();
        let ts = s.tick();
        match page_id {
            Some(page_id) => s.log_page(ts, log_type, action, page_id, json!({})),
            None => s.log(ts, log_type, action, None, 0, "Unknown", json!({})),
        }
    }

    // ------------------------------------------------------------------
    // Remote behavior
    // ------------------------------------------------------------------

    /// Drops every recent change. Listing the page stream from a position
    /// before now fails with `HistoryPurged` afterwards.
    pub fn purge_recent_changes(&self) {
        let mut s = self.state.lock();
        let ts = s.tick();
        s.recent_changes.clear();
        s.rc_floor = Some(ts);
    }

    /// Makes the next `calls` remote calls fail with a retryable
    /// transport error.
    pub fn fail_next(&self, calls: u32) {
        self.state.lock().failures = calls;
    }

    /// Makes continued listing pages repeat the last record of the page
    /// before them, as the action API does when several records share a
    /// timestamp.
    pub fn duplicate_page_boundaries(&self, enabled: bool) {
        self.state.lock().duplicate_boundaries = enabled;
    }

    // ------------------------------------------------------------------
    // Inspection
    // ------------------------------------------------------------------

    /// Returns the current time of the wiki's clock.
    pub fn now(&self) -> DateTime<Utc> {
        self.state.lock().clock
    }

    /// Returns every page id ever assigned, ascending.
    pub fn page_ids(&self) -> Vec<u64> {
        self.state.lock().pages.keys().copied().collect()
    }

    /// Returns the state of a page.
    pub fn page_state(&self, page_id: u64) -> Option<FakePageState> {
        self.state.lock().pages.get(&page_id).map(|p| p.state)
    }

    /// Returns the current (or last) title of a page.
    pub fn page_title(&self, page_id: u64) -> Option<String> {
        self.state.lock().pages.get(&page_id).map(|p| p.title.clone())
    }

    /// Returns the live page holding a title.
    pub fn live_page_at(&self, namespace: i32, title: &str) -> Option<u64> {
        self.state.lock().live_page_at(namespace, title)
    }

    /// Returns true if the latest revision of a page is a redirect.
    pub fn is_redirect(&self, page_id: u64) -> bool {
        self.state
            .lock()
            .latest(page_id)
            .is_some_and(|r| is_redirect(&r.text))
    }

    /// Returns the latest revision of a page.
    pub fn latest_revision(&self, page_id: u64) -> Option<u64> {
        self.state.lock().latest(page_id).map(|r| r.rev_id)
    }

    /// Returns the revisions a page owns, oldest first.
    pub fn revisions_of(&self, page_id: u64) -> Vec<u64> {
        let s = self.state.lock();
        let mut revisions: Vec<&FakeRevision> = s.revisions_of(page_id).collect();
        revisions.sort_by_key(|r| r.position());
        revisions.iter().map(|r| r.rev_id).collect()
    }

    /// Returns the visibility of a revision.
    pub fn revision_visibility(&self, rev_id: u64) -> Option<Visibility> {
        self.state.lock().revisions.get(&rev_id).map(|r| r.visibility)
    }

    /// Returns the level required to create a protected title.
    pub fn title_protection(&self, namespace: i32, title: &str) -> Option<String> {
        self.state
            .lock()
            .protected_titles
            .get(&(namespace, title.to_string()))
            .cloned()
    }

    /// Returns the id of the newest log event.
    pub fn last_log_id(&self) -> Option<u64> {
        self.state.lock().log.keys().next_back().copied()
    }

    /// Returns true if [`merge_history`](Self::merge_history) would
    /// accept these pages.
    pub fn can_merge(&self, source: u64, dest: u64) -> bool {
        let s = self.state.lock();
        let live = |id: u64| {
            s.pages
                .get(&id)
                .is_some_and(|p| p.state == FakePageState::Live)
        };
        if source == dest || !live(source) || !live(dest) {
            return false;
        }
        match s.revisions_of(dest).map(|r| r.timestamp).min() {
            Some(oldest) => s.revisions_of(source).any(|r| r.timestamp < oldest),
            None => false,
        }
    }
}
