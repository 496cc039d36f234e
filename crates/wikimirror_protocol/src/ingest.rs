//! The ingestion boundary.
//!
//! Each change stream delivers raw records of one shape. The constructors
//! on `ChangeRecord` validate them into the matching typed variant, or
//! into `ChangeRecord::Unprocessable` carrying whatever identity the raw
//! record still offers.

use crate::error::{ProtocolError, ProtocolResult};
use crate::log_action::{id_param, tag_list, LogAction};
use crate::position::{Position, StreamKind};
use crate::raw::{RawLogEvent, RawRecentChange, RawRevision};
use crate::record::{
    LogEvent, PageChange, RestrictionChange, Revision, TagChange, TagTarget, Visibility,
};
use crate::time::parse_timestamp;

/// A record that failed validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Unprocessable {
    /// Stream the record came from.
    pub stream: StreamKind,
    /// Stable id, if the record had one.
    pub id: Option<u64>,
    /// Position, if the record had a parseable timestamp and an id.
    pub position: Option<Position>,
    /// Why the record was rejected.
    pub reason: String,
}

/// One record of a change stream.
#[derive(Debug, Clone, PartialEq)]
pub enum ChangeRecord {
    /// A page whose current state changed.
    Page(PageChange),
    /// A new revision.
    Revision(Revision),
    /// A log event.
    LogEvent(LogEvent),
    /// A tag update.
    Tag(TagChange),
    /// A protection change.
    Restriction(RestrictionChange),
    /// A record that failed validation.
    Unprocessable(Unprocessable),
}

impl ChangeRecord {
    /// Validates an entry of the page stream.
    pub fn page(raw: RawRecentChange) -> Self {
        let id = raw.rcid;
        let position = position_hint(raw.timestamp.as_deref(), id);
        match PageChange::try_from(raw) {
            Ok(change) => ChangeRecord::Page(change),
            Err(err) => unprocessable(StreamKind::Pages, id, position, err),
        }
    }

    /// Validates an entry of the revision stream.
    pub fn revision(raw: RawRevision) -> Self {
        let id = raw.revid;
        let position = position_hint(raw.timestamp.as_deref(), id);
        match Revision::try_from(raw) {
            Ok(revision) => ChangeRecord::Revision(revision),
            Err(err) => unprocessable(StreamKind::Revisions, id, position, err),
        }
    }

    /// Validates an entry of the log stream.
    pub fn log_event(raw: RawLogEvent) -> Self {
        let id = raw.logid;
        let position = position_hint(raw.timestamp.as_deref(), id);
        match LogEvent::try_from(raw) {
            Ok(event) => ChangeRecord::LogEvent(event),
            Err(err) => unprocessable(StreamKind::LogEvents, id, position, err),
        }
    }

    /// Validates an entry of the tag stream.
    pub fn tag(raw: RawLogEvent) -> Self {
        let id = raw.logid;
        let position = position_hint(raw.timestamp.as_deref(), id);
        match TagChange::try_from(raw) {
            Ok(change) => ChangeRecord::Tag(change),
            Err(err) => unprocessable(StreamKind::Tags, id, position, err),
        }
    }

    /// Validates an entry of the restriction stream.
    pub fn restriction(raw: RawLogEvent) -> Self {
        let id = raw.logid;
        let position = position_hint(raw.timestamp.as_deref(), id);
        match RestrictionChange::try_from(raw) {
            Ok(change) => ChangeRecord::Restriction(change),
            Err(err) => unprocessable(StreamKind::Restrictions, id, position, err),
        }
    }

    /// Returns the record's position in its stream.
    pub fn position(&self) -> Option<Position> {
        match self {
            ChangeRecord::Page(change) => Some(change.position()),
            ChangeRecord::Revision(revision) => Some(revision.position()),
            ChangeRecord::LogEvent(event) => Some(event.position()),
            ChangeRecord::Tag(change) => Some(change.position()),
            ChangeRecord::Restriction(change) => Some(change.position()),
            ChangeRecord::Unprocessable(record) => record.position,
        }
    }

    /// Returns the record's stable id, used to drop duplicates across
    /// adjacent pages.
    pub fn key(&self) -> Option<u64> {
        match self {
            ChangeRecord::Page(change) => Some(change.change_id),
            ChangeRecord::Revision(revision) => Some(revision.rev_id),
            ChangeRecord::LogEvent(event) => Some(event.log_id),
            ChangeRecord::Tag(change) => Some(change.change_id),
            ChangeRecord::Restriction(change) => Some(change.change_id),
            ChangeRecord::Unprocessable(record) => record.id,
        }
    }

    /// Returns true for `ChangeRecord::Unprocessable`.
    pub fn is_unprocessable(&self) -> bool {
        matches!(self, ChangeRecord::Unprocessable(_))
    }
}

fn position_hint(timestamp: Option<&str>, id: Option<u64>) -> Option<Position> {
    let timestamp = parse_timestamp(timestamp?).ok()?;
    Some(Position::new(timestamp, id?))
}

fn unprocessable(
    stream: StreamKind,
    id: Option<u64>,
    position: Option<Position>,
    err: ProtocolError,
) -> ChangeRecord {
    ChangeRecord::Unprocessable(Unprocessable {
        stream,
        id,
        position,
        reason: err.to_string(),
    })
}

/// Fields shared by every log-backed record.
struct LogHeader {
    log_id: u64,
    timestamp: chrono::DateTime<chrono::Utc>,
    log_type: String,
    log_action: String,
}

fn log_header(raw: &RawLogEvent) -> ProtocolResult<LogHeader> {
    Ok(LogHeader {
        log_id: raw
            .logid
            .ok_or(ProtocolError::missing("log event", "logid"))?,
        timestamp: raw
            .timestamp
            .as_deref()
            .ok_or(ProtocolError::missing("log event", "timestamp"))
            .and_then(parse_timestamp)?,
        log_type: raw
            .log_type
            .clone()
            .ok_or(ProtocolError::missing("log event", "type"))?,
        log_action: raw
            .action
            .clone()
            .ok_or(ProtocolError::missing("log event", "action"))?,
    })
}

impl TryFrom<RawLogEvent> for LogEvent {
    type Error = ProtocolError;

    fn try_from(raw: RawLogEvent) -> ProtocolResult<Self> {
        let header = log_header(&raw)?;
        let page_id = raw.target_page();
        let action = LogAction::parse(&header.log_type, &header.log_action, page_id, &raw.params)?;
        let visibility = Visibility::from_flags(
            raw.actionhidden,
            raw.commenthidden,
            raw.userhidden,
            raw.suppressed,
        );
        let mut tags = raw.tags;
        tags.sort();
        tags.dedup();
        Ok(Self {
            log_id: header.log_id,
            timestamp: header.timestamp,
            log_type: header.log_type,
            log_action: header.log_action,
            page_id,
            namespace: raw.ns.unwrap_or(0),
            title: raw.title,
            user: raw.user,
            user_id: raw.userid.filter(|id| *id != 0),
            comment: raw.comment,
            params: raw.params,
            visibility,
            tags,
            action,
        })
    }
}

impl TryFrom<RawLogEvent> for TagChange {
    type Error = ProtocolError;

    fn try_from(raw: RawLogEvent) -> ProtocolResult<Self> {
        let header = log_header(&raw)?;
        if (header.log_type.as_str(), header.log_action.as_str()) != ("tag", "update") {
            return Err(ProtocolError::malformed(
                &header.log_type,
                &header.log_action,
                "not a tag update",
            ));
        }
        let target = match (id_param(&raw.params, "revid"), id_param(&raw.params, "logid")) {
            (Some(rev_id), _) => TagTarget::Revision(rev_id),
            (None, Some(log_id)) => TagTarget::LogEvent(log_id),
            (None, None) => {
                return Err(ProtocolError::malformed(
                    &header.log_type,
                    &header.log_action,
                    "no revision or log event target",
                ))
            }
        };
        Ok(Self {
            change_id: header.log_id,
            timestamp: header.timestamp,
            target,
            added: tag_list(&raw.params, "tagsAdded"),
            removed: tag_list(&raw.params, "tagsRemoved"),
        })
    }
}

impl TryFrom<RawLogEvent> for RestrictionChange {
    type Error = ProtocolError;

    fn try_from(raw: RawLogEvent) -> ProtocolResult<Self> {
        let header = log_header(&raw)?;
        if header.log_type != "protect" {
            return Err(ProtocolError::malformed(
                &header.log_type,
                &header.log_action,
                "not a protection event",
            ));
        }
        Ok(Self {
            change_id: header.log_id,
            timestamp: header.timestamp,
            page_id: raw.target_page(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn raw_log(log_type: &str, action: &str, params: serde_json::Value) -> RawLogEvent {
        RawLogEvent {
            logid: Some(5),
            ns: Some(0),
            title: Some("Test 1".into()),
            logpage: Some(1),
            log_type: Some(log_type.into()),
            action: Some(action.into()),
            timestamp: Some("2024-01-01T00:00:10Z".into()),
            params,
            ..RawLogEvent::default()
        }
    }

    #[test]
    fn log_event_is_typed() {
        let record = ChangeRecord::log_event(raw_log(
            "move",
            "move",
            json!({"target_ns": 0, "target_title": "Test 2"}),
        ));
        let ChangeRecord::LogEvent(event) = record else {
            panic!("expected a log event");
        };
        assert_eq!(event.log_id, 5);
        assert_eq!(event.page_id, Some(1));
        assert_eq!(event.action.name(), "move");
    }

    #[test]
    fn unknown_log_type_becomes_unprocessable() {
        let record = ChangeRecord::log_event(raw_log("teleport", "beam", json!({})));
        assert!(record.is_unprocessable());
        assert_eq!(record.key(), Some(5));
        let position = record.position().unwrap();
        assert_eq!(position.id, 5);
        match record {
            ChangeRecord::Unprocessable(inner) => {
                assert_eq!(inner.stream, StreamKind::LogEvents);
                assert!(inner.reason.contains("teleport"));
            }
            other => panic!("unexpected record {other:?}"),
        }
    }

    #[test]
    fn unprocessable_without_timestamp_has_no_position() {
        let mut raw = raw_log("delete", "delete", json!({}));
        raw.timestamp = None;
        let record = ChangeRecord::log_event(raw);
        assert!(record.is_unprocessable());
        assert_eq!(record.position(), None);
    }

    #[test]
    fn tag_change_targets_revision() {
        let record = ChangeRecord::tag(raw_log(
            "tag",
            "update",
            json!({"revid": "42", "tagsAdded": ["foo"], "tagsRemoved": []}),
        ));
        let ChangeRecord::Tag(change) = record else {
            panic!("expected a tag change");
        };
        assert_eq!(change.target, TagTarget::Revision(42));
        assert_eq!(change.added, vec!["foo".to_string()]);
        assert!(change.removed.is_empty());
    }

    #[test]
    fn tag_change_targets_log_event() {
        let record = ChangeRecord::tag(raw_log(
            "tag",
            "update",
            json!({"logid": 3, "tagsRemoved": ["bar"]}),
        ));
        let ChangeRecord::Tag(change) = record else {
            panic!("expected a tag change");
        };
        assert_eq!(change.target, TagTarget::LogEvent(3));
        assert_eq!(change.removed, vec!["bar".to_string()]);
    }

    #[test]
    fn tag_change_without_target() {
        let record = ChangeRecord::tag(raw_log("tag", "update", json!({"rcid": 9})));
        assert!(record.is_unprocessable());
    }

    #[test]
    fn restriction_change() {
        let record = ChangeRecord::restriction(raw_log("protect", "protect", json!({})));
        assert_eq!(record.position().map(|p| p.id), Some(5));
        assert!(matches!(
            record,
            ChangeRecord::Restriction(RestrictionChange { page_id: Some(1), .. })
        ));
    }

    #[test]
    fn title_protection_has_no_page() {
        let mut raw = raw_log("protect", "protect", json!({}));
        raw.logpage = Some(0);
        let record = ChangeRecord::restriction(raw);
        assert!(matches!(
            record,
            ChangeRecord::Restriction(RestrictionChange { page_id: None, .. })
        ));
    }

    #[test]
    fn page_change_requires_page() {
        let raw = RawRecentChange {
            rcid: Some(1),
            timestamp: Some("2024-01-01T00:00:00Z".into()),
            pageid: Some(0),
            ..RawRecentChange::default()
        };
        assert!(ChangeRecord::page(raw).is_unprocessable());
    }
}
