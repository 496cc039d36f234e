//! Interpretation of log events.
//!
//! Log events carry their meaning in a `(type, action)` pair plus
//! free-form parameters. `LogAction` is the closed set of meanings the
//! reconciler acts on. Parsing rejects what it cannot interpret instead
//! of guessing: an unknown log type, an unknown action of a structural
//! type, a missing target page or malformed parameters are all errors.

use crate::error::{ProtocolError, ProtocolResult};
use crate::record::Visibility;
use crate::time::parse_timestamp;
use chrono::{DateTime, Utc};
use serde_json::Value;

/// Log types whose events carry no structural meaning for the mirror.
const PASSIVE_LOG_TYPES: &[&str] = &[
    "block",
    "contentmodel",
    "interwiki",
    "managetags",
    "newusers",
    "pagelang",
    "patrol",
    "renameuser",
    "rights",
    "thanks",
    "upload",
    "usermerge",
    "abusefilter",
    "spamblacklist",
    "titleblacklist",
];

/// Interpreted meaning of a log event.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum LogAction {
    /// Page creation.
    Create,
    /// Rename of the target page.
    Move {
        /// Destination namespace.
        target_namespace: i32,
        /// Destination title.
        target_title: String,
        /// The destination was occupied by a redirect that got deleted.
        over_redirect: bool,
    },
    /// Page deletion.
    Delete {
        /// Deleted through the suppression log.
        suppressed: bool,
    },
    /// Page undeletion.
    Restore,
    /// Visibility change of individual revisions.
    RevisionVisibility {
        /// Affected revisions.
        rev_ids: Vec<u64>,
        /// New visibility.
        visibility: Visibility,
    },
    /// Visibility change of individual log events.
    EventVisibility {
        /// Affected log events.
        log_ids: Vec<u64>,
        /// New visibility.
        visibility: Visibility,
    },
    /// History merge of the target page into a destination page.
    Merge {
        /// Destination namespace.
        dest_namespace: i32,
        /// Destination title.
        dest_title: String,
        /// Destination page id, when the remote reports it.
        dest_page_id: Option<u64>,
        /// Revisions up to and including this timestamp were moved.
        mergepoint: DateTime<Utc>,
    },
    /// History import into the target page.
    Import,
    /// Protection change.
    Protect,
    /// Tag update.
    TagUpdate,
    /// Known but irrelevant to the mirror's structure.
    #[default]
    Other,
}

impl LogAction {
    /// Interprets a `(type, action)` pair and its parameters.
    pub fn parse(
        log_type: &str,
        action: &str,
        page_id: Option<u64>,
        params: &Value,
    ) -> ProtocolResult<Self> {
        let parsed = match (log_type, action) {
            ("create", "create") => LogAction::Create,
            ("create", _) => LogAction::Other,
            ("move", "move" | "move_redir") => LogAction::Move {
                target_namespace: int_param(params, "target_ns")
                    .ok_or_else(|| ProtocolError::malformed(log_type, action, "no target_ns"))?,
                target_title: str_param(params, "target_title")
                    .ok_or_else(|| ProtocolError::malformed(log_type, action, "no target_title"))?,
                over_redirect: action == "move_redir",
            },
            ("delete", "delete" | "delete_redir" | "delete_redir2") => {
                LogAction::Delete { suppressed: false }
            }
            ("suppress", "delete") => LogAction::Delete { suppressed: true },
            ("delete", "restore") => LogAction::Restore,
            ("delete" | "suppress", "revision") => LogAction::RevisionVisibility {
                rev_ids: id_list(params)
                    .ok_or_else(|| ProtocolError::malformed(log_type, action, "no ids"))?,
                visibility: new_bitmask(params)
                    .ok_or_else(|| ProtocolError::malformed(log_type, action, "no bitmask"))?,
            },
            ("delete" | "suppress", "event") => LogAction::EventVisibility {
                log_ids: id_list(params)
                    .ok_or_else(|| ProtocolError::malformed(log_type, action, "no ids"))?,
                visibility: new_bitmask(params)
                    .ok_or_else(|| ProtocolError::malformed(log_type, action, "no bitmask"))?,
            },
            ("suppress", "block" | "reblock") => LogAction::Other,
            ("merge", "merge") => LogAction::Merge {
                dest_namespace: int_param(params, "dest_ns")
                    .ok_or_else(|| ProtocolError::malformed(log_type, action, "no dest_ns"))?,
                dest_title: str_param(params, "dest_title")
                    .ok_or_else(|| ProtocolError::malformed(log_type, action, "no dest_title"))?,
                dest_page_id: u64_param(params, "dest_pageid").filter(|id| *id != 0),
                mergepoint: str_param(params, "mergepoint")
                    .ok_or_else(|| ProtocolError::malformed(log_type, action, "no mergepoint"))
                    .and_then(|value| parse_timestamp(&value))?,
            },
            ("import", "upload" | "interwiki") => LogAction::Import,
            ("protect", "protect" | "modify" | "unprotect" | "move_prot") => LogAction::Protect,
            ("tag", "update") => LogAction::TagUpdate,
            (known, _) if PASSIVE_LOG_TYPES.contains(&known) => LogAction::Other,
            _ => {
                return Err(ProtocolError::UnknownLogType {
                    log_type: log_type.to_string(),
                    action: action.to_string(),
                })
            }
        };

        if parsed.is_structural() && page_id.is_none() {
            return Err(ProtocolError::malformed(log_type, action, "no target page"));
        }
        Ok(parsed)
    }

    /// Returns true if the action changes which page a title or a set of
    /// revisions belongs to.
    pub fn is_structural(&self) -> bool {
        matches!(
            self,
            LogAction::Create
                | LogAction::Move { .. }
                | LogAction::Delete { .. }
                | LogAction::Restore
                | LogAction::Merge { .. }
                | LogAction::Import
        )
    }

    /// Returns a short name for logging.
    pub fn name(&self) -> &'static str {
        match self {
            LogAction::Create => "create",
            LogAction::Move { .. } => "move",
            LogAction::Delete { .. } => "delete",
            LogAction::Restore => "restore",
            LogAction::RevisionVisibility { .. } => "revision-visibility",
            LogAction::EventVisibility { .. } => "event-visibility",
            LogAction::Merge { .. } => "merge",
            LogAction::Import => "import",
            LogAction::Protect => "protect",
            LogAction::TagUpdate => "tag",
            LogAction::Other => "other",
        }
    }
}

/// Reads an integer parameter; older API versions send numbers as strings.
fn int_param(params: &Value, key: &str) -> Option<i32> {
    match params.get(key)? {
        Value::Number(n) => n.as_i64().and_then(|n| i32::try_from(n).ok()),
        Value::String(s) => s.parse().ok(),
        _ => None,
    }
}

fn u64_param(params: &Value, key: &str) -> Option<u64> {
    match params.get(key)? {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.parse().ok(),
        _ => None,
    }
}

fn str_param(params: &Value, key: &str) -> Option<String> {
    params
        .get(key)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

fn id_list(params: &Value) -> Option<Vec<u64>> {
    let ids = params.get("ids")?.as_array()?;
    ids.iter()
        .map(|id| match id {
            Value::Number(n) => n.as_u64(),
            Value::String(s) => s.parse().ok(),
            _ => None,
        })
        .collect()
}

fn new_bitmask(params: &Value) -> Option<Visibility> {
    let bits = u64_param(params.get("new")?, "bitmask")?;
    u8::try_from(bits).ok().map(Visibility::from_bits)
}

/// Parses the tag lists of a `tag/update` event.
pub(crate) fn tag_list(params: &Value, key: &str) -> Vec<String> {
    params
        .get(key)
        .and_then(Value::as_array)
        .map(|tags| {
            tags.iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

/// Reads an id parameter of a `tag/update` event.
pub(crate) fn id_param(params: &Value, key: &str) -> Option<u64> {
    u64_param(params, key).filter(|id| *id != 0)
}
