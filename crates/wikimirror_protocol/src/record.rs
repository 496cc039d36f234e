//! Typed records.
//!
//! Every record here has passed validation: ids are present, timestamps
//! parse, and log actions belong to the closed `LogAction` set.

use crate::error::{ProtocolError, ProtocolResult};
use crate::log_action::LogAction;
use crate::position::Position;
use crate::raw::{
    RawNamespace, RawPage, RawProtection, RawRecentChange, RawRevision, RawRevisionContent,
    RawSiteTotals, RawTagDefinition,
};
use crate::time::{parse_expiry, parse_timestamp};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Visibility bitmask of a revision or log event.
///
/// A set bit hides the corresponding field. `RESTRICTED` additionally
/// hides it from administrators.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Visibility(u8);

impl Visibility {
    /// Text (or action details, for log events) hidden.
    pub const TEXT: u8 = 1;
    /// Comment hidden.
    pub const COMMENT: u8 = 2;
    /// User hidden.
    pub const USER: u8 = 4;
    /// Hidden from administrators too.
    pub const RESTRICTED: u8 = 8;
    /// Every field hidden, as after suppression.
    pub const ALL: u8 = 15;

    /// Fully visible.
    pub const VISIBLE: Visibility = Visibility(0);

    /// Creates a visibility from a bitmask, ignoring unknown bits.
    pub fn from_bits(bits: u8) -> Self {
        Self(bits & Self::ALL)
    }

    /// Creates a visibility from the per-field flags of the remote.
    pub fn from_flags(text: bool, comment: bool, user: bool, restricted: bool) -> Self {
        let mut bits = 0;
        if text {
            bits |= Self::TEXT;
        }
        if comment {
            bits |= Self::COMMENT;
        }
        if user {
            bits |= Self::USER;
        }
        if restricted {
            bits |= Self::RESTRICTED;
        }
        Self(bits)
    }

    /// Returns the raw bitmask.
    pub fn bits(self) -> u8 {
        self.0
    }

    /// Returns true if nothing is hidden.
    pub fn is_visible(self) -> bool {
        self.0 == 0
    }

    /// Returns true if the text is hidden.
    pub fn hides_text(self) -> bool {
        self.0 & Self::TEXT != 0
    }
}

/// An entry of the page stream: "this page changed".
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageChange {
    /// Recent-change id.
    pub change_id: u64,
    /// Timestamp.
    pub timestamp: DateTime<Utc>,
    /// Changed page.
    pub page_id: u64,
}

impl PageChange {
    /// Position in the page stream.
    pub fn position(&self) -> Position {
        Position::new(self.timestamp, self.change_id)
    }
}

impl TryFrom<RawRecentChange> for PageChange {
    type Error = ProtocolError;

    fn try_from(raw: RawRecentChange) -> ProtocolResult<Self> {
        let change_id = raw
            .rcid
            .ok_or(ProtocolError::missing("recent change", "rcid"))?;
        let timestamp = raw
            .timestamp
            .as_deref()
            .ok_or(ProtocolError::missing("recent change", "timestamp"))
            .and_then(parse_timestamp)?;
        let page_id = raw
            .pageid
            .filter(|id| *id != 0)
            .ok_or(ProtocolError::missing("recent change", "pageid"))?;
        Ok(Self {
            change_id,
            timestamp,
            page_id,
        })
    }
}

/// Current descriptive state of a live page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageInfo {
    /// Stable page id.
    pub page_id: u64,
    /// Namespace.
    pub namespace: i32,
    /// Title without namespace prefix handling.
    pub title: String,
    /// Redirect flag.
    pub is_redirect: bool,
    /// Latest revision id.
    pub latest_revision: Option<u64>,
    /// Length of the latest revision.
    pub length: Option<u64>,
    /// Content model.
    pub content_model: Option<String>,
}

/// Result of looking up a page on the remote.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemotePage {
    /// The page exists.
    Present(PageInfo),
    /// No live page has this id.
    Missing {
        /// Requested id.
        page_id: u64,
    },
}

impl RemotePage {
    /// Returns the page info if present.
    pub fn present(self) -> Option<PageInfo> {
        match self {
            RemotePage::Present(info) => Some(info),
            RemotePage::Missing { .. } => None,
        }
    }
}

impl TryFrom<RawPage> for RemotePage {
    type Error = ProtocolError;

    fn try_from(raw: RawPage) -> ProtocolResult<Self> {
        let page_id = raw.pageid.unwrap_or(0);
        if raw.missing || raw.invalid {
            return Ok(RemotePage::Missing { page_id });
        }
        if page_id == 0 {
            return Err(ProtocolError::missing("page", "pageid"));
        }
        Ok(RemotePage::Present(PageInfo {
            page_id,
            namespace: raw.ns.ok_or(ProtocolError::missing("page", "ns"))?,
            title: raw.title.ok_or(ProtocolError::missing("page", "title"))?,
            is_redirect: raw.redirect,
            latest_revision: raw.lastrevid.filter(|id| *id != 0),
            length: raw.length,
            content_model: raw.contentmodel,
        }))
    }
}

/// A revision of a page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Revision {
    /// Stable revision id.
    pub rev_id: u64,
    /// Owning page.
    pub page_id: u64,
    /// Parent revision.
    pub parent_id: Option<u64>,
    /// Timestamp.
    pub timestamp: DateTime<Utc>,
    /// Author name, unless hidden.
    pub user: Option<String>,
    /// Author id, unless hidden.
    pub user_id: Option<u64>,
    /// Edit summary, unless hidden.
    pub comment: Option<String>,
    /// Size in bytes.
    pub size: u64,
    /// SHA-1 of the content, unless hidden.
    pub sha1: Option<String>,
    /// Minor edit flag.
    pub minor: bool,
    /// Content model.
    pub content_model: Option<String>,
    /// Per-revision visibility.
    pub visibility: Visibility,
    /// Belongs to a deleted page.
    pub archived: bool,
    /// Applied change tags.
    pub tags: Vec<String>,
}

impl Revision {
    /// Position in the revision stream.
    pub fn position(&self) -> Position {
        Position::new(self.timestamp, self.rev_id)
    }
}

impl TryFrom<RawRevision> for Revision {
    type Error = ProtocolError;

    fn try_from(raw: RawRevision) -> ProtocolResult<Self> {
        let rev_id = raw.revid.ok_or(ProtocolError::missing("revision", "revid"))?;
        let page_id = raw
            .pageid
            .filter(|id| *id != 0)
            .ok_or(ProtocolError::missing("revision", "pageid"))?;
        let timestamp = raw
            .timestamp
            .as_deref()
            .ok_or(ProtocolError::missing("revision", "timestamp"))
            .and_then(parse_timestamp)?;
        let visibility = Visibility::from_flags(
            raw.text_hidden(),
            raw.commenthidden,
            raw.userhidden,
            raw.suppressed,
        );
        let content_model = raw.main_content_model().map(str::to_string);
        let mut tags = raw.tags;
        tags.sort();
        tags.dedup();
        Ok(Self {
            rev_id,
            page_id,
            parent_id: raw.parentid.filter(|id| *id != 0),
            timestamp,
            user: raw.user,
            user_id: raw.userid.filter(|id| *id != 0),
            comment: raw.comment,
            size: raw.size.unwrap_or(0),
            sha1: raw.sha1,
            minor: raw.minor,
            content_model,
            visibility,
            archived: raw.archived,
            tags,
        })
    }
}

/// An administrative log event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEvent {
    /// Stable log id.
    pub log_id: u64,
    /// Timestamp.
    pub timestamp: DateTime<Utc>,
    /// Log type as reported.
    pub log_type: String,
    /// Log action as reported.
    pub log_action: String,
    /// Target page, if any.
    pub page_id: Option<u64>,
    /// Namespace of the target title.
    pub namespace: i32,
    /// Target title at the time of the event.
    pub title: Option<String>,
    /// Performer name.
    pub user: Option<String>,
    /// Performer id.
    pub user_id: Option<u64>,
    /// Reason.
    pub comment: Option<String>,
    /// Type-specific parameters as reported.
    pub params: serde_json::Value,
    /// Visibility of the event.
    pub visibility: Visibility,
    /// Applied change tags.
    pub tags: Vec<String>,
    /// Interpreted action.
    #[serde(skip)]
    pub action: LogAction,
}

impl LogEvent {
    /// Position in the log stream.
    pub fn position(&self) -> Position {
        Position::new(self.timestamp, self.log_id)
    }
}

/// Target of a tag change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum TagTarget {
    /// A revision id.
    Revision(u64),
    /// A log event id.
    LogEvent(u64),
}

impl TagTarget {
    /// Returns the stored kind name.
    pub fn kind(&self) -> &'static str {
        match self {
            TagTarget::Revision(_) => "revision",
            TagTarget::LogEvent(_) => "logevent",
        }
    }

    /// Returns the target id.
    pub fn id(&self) -> u64 {
        match self {
            TagTarget::Revision(id) | TagTarget::LogEvent(id) => *id,
        }
    }
}

/// An entry of the tag stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TagChange {
    /// Log id of the tag update.
    pub change_id: u64,
    /// Timestamp.
    pub timestamp: DateTime<Utc>,
    /// Tagged entity.
    pub target: TagTarget,
    /// Tags added.
    pub added: Vec<String>,
    /// Tags removed.
    pub removed: Vec<String>,
}

impl TagChange {
    /// Position in the tag stream.
    pub fn position(&self) -> Position {
        Position::new(self.timestamp, self.change_id)
    }
}

/// An entry of the restriction stream: "this page's protection changed".
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RestrictionChange {
    /// Log id of the protection event.
    pub change_id: u64,
    /// Timestamp.
    pub timestamp: DateTime<Utc>,
    /// Affected page; `None` when a title without a page was protected.
    pub page_id: Option<u64>,
}

impl RestrictionChange {
    /// Position in the restriction stream.
    pub fn position(&self) -> Position {
        Position::new(self.timestamp, self.change_id)
    }
}

/// Scope of a protection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RestrictionScope {
    /// Applies to the page itself.
    Page,
    /// Also applies to pages transcluded by it.
    Cascade,
}

impl RestrictionScope {
    /// Returns the stored name.
    pub fn as_str(&self) -> &'static str {
        match self {
            RestrictionScope::Page => "page",
            RestrictionScope::Cascade => "cascade",
        }
    }

    /// Parses a stored name.
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "page" => Some(RestrictionScope::Page),
            "cascade" => Some(RestrictionScope::Cascade),
            _ => None,
        }
    }
}

/// One active protection of a page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Restriction {
    /// Protected page.
    pub page_id: u64,
    /// Protected action.
    pub action: String,
    /// Required level.
    pub level: String,
    /// Scope.
    pub scope: RestrictionScope,
    /// Expiry; `None` never expires.
    pub expiry: Option<DateTime<Utc>>,
}

impl Restriction {
    /// Validates a protection entry of `page_id`.
    ///
    /// Returns `Ok(None)` for protections inherited from another page;
    /// those belong to the source page's restriction set.
    pub fn from_raw(page_id: u64, raw: RawProtection) -> ProtocolResult<Option<Self>> {
        if raw.source.is_some() {
            return Ok(None);
        }
        let action = raw
            .action
            .ok_or(ProtocolError::missing("protection", "type"))?;
        let level = raw
            .level
            .ok_or(ProtocolError::missing("protection", "level"))?;
        let expiry = parse_expiry(raw.expiry.as_deref().unwrap_or("infinity"))?;
        Ok(Some(Self {
            page_id,
            action,
            level,
            scope: if raw.cascade {
                RestrictionScope::Cascade
            } else {
                RestrictionScope::Page
            },
            expiry,
        }))
    }
}

/// Create protection of a title that has no page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TitleProtection {
    /// Namespace.
    pub namespace: i32,
    /// Protected title.
    pub title: String,
    /// Level required to create the page.
    pub level: String,
    /// Expiry; `None` never expires.
    pub expiry: Option<DateTime<Utc>>,
}

impl TitleProtection {
    /// Validates a protection entry of a missing title. Entries for other
    /// actions than `create` yield `Ok(None)`.
    pub fn from_raw(
        namespace: i32,
        title: &str,
        raw: RawProtection,
    ) -> ProtocolResult<Option<Self>> {
        if raw.action.as_deref() != Some("create") {
            return Ok(None);
        }
        let level = raw
            .level
            .ok_or(ProtocolError::missing("protection", "level"))?;
        Ok(Some(Self {
            namespace,
            title: title.to_string(),
            level,
            expiry: parse_expiry(raw.expiry.as_deref().unwrap_or("infinity"))?,
        }))
    }
}

/// A change tag definition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TagDefinition {
    /// Tag name.
    pub name: String,
    /// Display name.
    pub display_name: Option<String>,
    /// Description.
    pub description: Option<String>,
    /// Defined flag.
    pub defined: bool,
    /// Active flag.
    pub active: bool,
    /// Sources, sorted.
    pub source: Vec<String>,
}

impl TryFrom<RawTagDefinition> for TagDefinition {
    type Error = ProtocolError;

    fn try_from(raw: RawTagDefinition) -> ProtocolResult<Self> {
        let mut source = raw.source;
        source.sort();
        Ok(Self {
            name: raw.name.ok_or(ProtocolError::missing("tag", "name"))?,
            display_name: raw.displayname,
            description: raw.description,
            defined: raw.defined,
            active: raw.active,
            source,
        })
    }
}

/// A namespace of the remote site.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Namespace {
    /// Namespace id.
    pub id: i32,
    /// Localized name.
    pub name: String,
    /// Canonical name.
    pub canonical: Option<String>,
    /// Titles are case-sensitive in the first letter too.
    pub case_sensitive: bool,
    /// Content namespace flag.
    pub content: bool,
}

impl TryFrom<RawNamespace> for Namespace {
    type Error = ProtocolError;

    fn try_from(raw: RawNamespace) -> ProtocolResult<Self> {
        Ok(Self {
            id: raw.id.ok_or(ProtocolError::missing("namespace", "id"))?,
            name: raw.name.unwrap_or_default(),
            canonical: raw.canonical,
            case_sensitive: raw.case.as_deref() == Some("case-sensitive"),
            content: raw.content,
        })
    }
}

/// Authoritative remote totals.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SiteTotals {
    /// Number of live pages.
    pub pages: u64,
    /// Highest live revision id.
    pub latest_revision: Option<u64>,
    /// Highest log id.
    pub latest_log_event: Option<u64>,
}

impl TryFrom<RawSiteTotals> for SiteTotals {
    type Error = ProtocolError;

    fn try_from(raw: RawSiteTotals) -> ProtocolResult<Self> {
        Ok(Self {
            pages: raw.pages.ok_or(ProtocolError::missing("statistics", "pages"))?,
            latest_revision: raw.latest_revid,
            latest_log_event: raw.latest_logid,
        })
    }
}

/// Text of one revision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RevisionContent {
    /// Revision id.
    pub rev_id: u64,
    /// Content model.
    pub content_model: Option<String>,
    /// The text.
    pub text: String,
}

impl RevisionContent {
    /// Validates fetched content. Hidden text yields `Ok(None)`.
    pub fn from_raw(raw: RawRevisionContent) -> ProtocolResult<Option<Self>> {
        let rev_id = raw
            .revid
            .ok_or(ProtocolError::missing("revision content", "revid"))?;
        if raw.texthidden {
            return Ok(None);
        }
        Ok(raw.content.map(|text| Self {
            rev_id,
            content_model: raw.contentmodel,
            text,
        }))
    }
}
