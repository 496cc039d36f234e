//! Raw records as delivered by the remote.
//!
//! Field names follow the MediaWiki action API with `formatversion=2`.
//! Every field is optional or defaulted so that one malformed record
//! never prevents decoding the rest of its page; validation happens when
//! converting into the typed records.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// An entry of the recent-changes feed.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RawRecentChange {
    /// Recent-change id.
    pub rcid: Option<u64>,
    /// Change type (`edit`, `new`, `log`, ...).
    #[serde(rename = "type")]
    pub change_type: Option<String>,
    /// Namespace.
    pub ns: Option<i32>,
    /// Title at the time of the change.
    pub title: Option<String>,
    /// Page id.
    pub pageid: Option<u64>,
    /// Revision id, for edits.
    pub revid: Option<u64>,
    /// Timestamp.
    pub timestamp: Option<String>,
}

/// Current state of a page.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RawPage {
    /// Page id.
    pub pageid: Option<u64>,
    /// Namespace.
    pub ns: Option<i32>,
    /// Current title.
    pub title: Option<String>,
    /// Set when the page does not exist (deleted, merged away, never created).
    pub missing: bool,
    /// Set when the requested title or id is invalid.
    pub invalid: bool,
    /// Set when the page is a redirect.
    pub redirect: bool,
    /// Latest revision id.
    pub lastrevid: Option<u64>,
    /// Length of the latest revision in bytes.
    pub length: Option<u64>,
    /// Content model.
    pub contentmodel: Option<String>,
    /// Active protections.
    pub protection: Vec<RawProtection>,
}

/// One protection entry of a page.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RawProtection {
    /// Protected action (`edit`, `move`, ...).
    #[serde(rename = "type")]
    pub action: Option<String>,
    /// Required group or right.
    pub level: Option<String>,
    /// Expiry timestamp or `infinity`.
    pub expiry: Option<String>,
    /// Set when the protection cascades to transcluded pages.
    pub cascade: bool,
    /// Page the protection is inherited from, for cascading protections.
    pub source: Option<String>,
}

/// One slot of a revision.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RawSlot {
    /// Content model of the slot.
    pub contentmodel: Option<String>,
    /// Slot text, when requested.
    pub content: Option<String>,
    /// Set when the text is hidden.
    pub texthidden: bool,
}

/// A revision, either from the global revision feed or a page history.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RawRevision {
    /// Revision id.
    pub revid: Option<u64>,
    /// Owning page id.
    pub pageid: Option<u64>,
    /// Parent revision id (0 for the first revision).
    pub parentid: Option<u64>,
    /// Timestamp.
    pub timestamp: Option<String>,
    /// Author name.
    pub user: Option<String>,
    /// Author id.
    pub userid: Option<u64>,
    /// Edit summary.
    pub comment: Option<String>,
    /// Size in bytes.
    pub size: Option<u64>,
    /// SHA-1 of the content.
    pub sha1: Option<String>,
    /// Minor edit flag.
    pub minor: bool,
    /// Content model (older API versions report it here).
    pub contentmodel: Option<String>,
    /// Content slots.
    pub slots: BTreeMap<String, RawSlot>,
    /// Applied change tags.
    pub tags: Vec<String>,
    /// Text hidden.
    pub texthidden: bool,
    /// Comment hidden.
    pub commenthidden: bool,
    /// User hidden.
    pub userhidden: bool,
    /// Hidden from administrators too.
    pub suppressed: bool,
    /// Set by the transport for revisions of deleted pages.
    pub archived: bool,
}

impl RawRevision {
    /// Returns the content model of the main slot, falling back to the
    /// revision-level field.
    pub fn main_content_model(&self) -> Option<&str> {
        self.slots
            .get("main")
            .and_then(|slot| slot.contentmodel.as_deref())
            .or(self.contentmodel.as_deref())
    }

    /// Returns true if the text is hidden at revision or slot level.
    pub fn text_hidden(&self) -> bool {
        self.texthidden || self.slots.values().any(|slot| slot.texthidden)
    }
}

/// An administrative log event.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RawLogEvent {
    /// Log id.
    pub logid: Option<u64>,
    /// Namespace of the target title.
    pub ns: Option<i32>,
    /// Target title at the time of the event.
    pub title: Option<String>,
    /// Current page id of the target title.
    pub pageid: Option<u64>,
    /// Page id recorded with the event.
    pub logpage: Option<u64>,
    /// Log type.
    #[serde(rename = "type")]
    pub log_type: Option<String>,
    /// Log action.
    pub action: Option<String>,
    /// Performer name.
    pub user: Option<String>,
    /// Performer id.
    pub userid: Option<u64>,
    /// Timestamp.
    pub timestamp: Option<String>,
    /// Reason given by the performer.
    pub comment: Option<String>,
    /// Type-specific parameters.
    pub params: serde_json::Value,
    /// Applied change tags.
    pub tags: Vec<String>,
    /// Action details hidden.
    pub actionhidden: bool,
    /// Comment hidden.
    pub commenthidden: bool,
    /// Performer hidden.
    pub userhidden: bool,
    /// Hidden from administrators too.
    pub suppressed: bool,
}

impl RawLogEvent {
    /// Returns the page the event targets, preferring the id recorded
    /// with the event over the current id of the title.
    pub fn target_page(&self) -> Option<u64> {
        self.logpage
            .filter(|id| *id != 0)
            .or(self.pageid.filter(|id| *id != 0))
    }
}

/// A change tag definition.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RawTagDefinition {
    /// Tag name.
    pub name: Option<String>,
    /// Display name (may contain markup).
    pub displayname: Option<String>,
    /// Description.
    pub description: Option<String>,
    /// Defined manually or by an extension.
    pub defined: bool,
    /// Can currently be applied.
    pub active: bool,
    /// Sources (`manual`, `software`, ...).
    pub source: Vec<String>,
}

/// A namespace of the remote site.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RawNamespace {
    /// Namespace id.
    pub id: Option<i32>,
    /// Localized name.
    pub name: Option<String>,
    /// Canonical name.
    pub canonical: Option<String>,
    /// `first-letter` or `case-sensitive`.
    pub case: Option<String>,
    /// Content namespace flag.
    pub content: bool,
}

/// Cheap authoritative totals used by the consistency verifier.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RawSiteTotals {
    /// Number of existing pages.
    pub pages: Option<u64>,
    /// Highest live revision id.
    pub latest_revid: Option<u64>,
    /// Highest log id.
    pub latest_logid: Option<u64>,
}

/// Text of one revision.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RawRevisionContent {
    /// Revision id.
    pub revid: Option<u64>,
    /// Content model.
    pub contentmodel: Option<String>,
    /// Text; absent when hidden.
    pub content: Option<String>,
    /// Text hidden.
    pub texthidden: bool,
}
