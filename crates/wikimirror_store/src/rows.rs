//! Row types and column conversions.

use chrono::{DateTime, Utc};
use rusqlite::types::Type;
use rusqlite::Row;
use serde::Serialize;
use wikimirror_protocol::{parse_timestamp, Revision, Visibility};

/// Result of applying one record to the mirror.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ApplyOutcome {
    /// A new row was written.
    Inserted,
    /// An existing row was modified.
    Updated,
    /// The mirror already held exactly this state; nothing was written.
    Unchanged,
}

impl ApplyOutcome {
    /// Returns true unless the outcome is `Unchanged`.
    pub fn is_change(self) -> bool {
        self != ApplyOutcome::Unchanged
    }

    /// Combines the outcomes of two writes belonging to one record.
    pub fn and(self, other: ApplyOutcome) -> ApplyOutcome {
        match (self, other) {
            (ApplyOutcome::Inserted, _) => ApplyOutcome::Inserted,
            (ApplyOutcome::Unchanged, other) => other,
            (ApplyOutcome::Updated, _) => ApplyOutcome::Updated,
        }
    }
}

/// Lifecycle state of a mirrored page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PageState {
    /// Listed among live pages.
    Live,
    /// Deleted; the row and its revisions are kept.
    Deleted,
    /// History merged into another page; the id is retired.
    Merged(u64),
}

/// A row of the `pages` table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PageRow {
    /// Stable page id.
    pub page_id: u64,
    /// Namespace.
    pub namespace: i32,
    /// Current (or last) title.
    pub title: String,
    /// Redirect flag.
    pub is_redirect: bool,
    /// Latest revision.
    pub latest_revision: Option<u64>,
    /// Length of the latest revision.
    pub length: Option<u64>,
    /// Content model.
    pub content_model: Option<String>,
    /// Deleted flag.
    pub deleted: bool,
    /// Forwarding pointer of a merged-away page.
    pub merged_into: Option<u64>,
}

impl PageRow {
    /// Returns the lifecycle state.
    pub fn state(&self) -> PageState {
        match (self.merged_into, self.deleted) {
            (Some(dest), _) => PageState::Merged(dest),
            (None, true) => PageState::Deleted,
            (None, false) => PageState::Live,
        }
    }

    /// Returns true if the page is listed among live pages.
    pub fn is_live(&self) -> bool {
        self.state() == PageState::Live
    }
}

pub(crate) const PAGE_COLUMNS: &str =
    "page_id, namespace, title, is_redirect, latest_revision, length, content_model, deleted, merged_into";

pub(crate) fn page_from_row(row: &Row<'_>) -> rusqlite::Result<PageRow> {
    Ok(PageRow {
        page_id: row.get(0)?,
        namespace: row.get(1)?,
        title: row.get(2)?,
        is_redirect: row.get(3)?,
        latest_revision: row.get(4)?,
        length: row.get(5)?,
        content_model: row.get(6)?,
        deleted: row.get(7)?,
        merged_into: row.get(8)?,
    })
}

pub(crate) const REVISION_COLUMNS: &str = "rev_id, page_id, parent_id, timestamp, user, user_id, \
     comment, size, sha1, minor, content_model, visibility, archived";

/// Reads a revision without its tags.
pub(crate) fn revision_from_row(row: &Row<'_>) -> rusqlite::Result<Revision> {
    Ok(Revision {
        rev_id: row.get(0)?,
        page_id: row.get(1)?,
        parent_id: row.get(2)?,
        timestamp: timestamp_column(row, 3)?,
        user: row.get(4)?,
        user_id: row.get(5)?,
        comment: row.get(6)?,
        size: row.get(7)?,
        sha1: row.get(8)?,
        minor: row.get(9)?,
        content_model: row.get(10)?,
        visibility: Visibility::from_bits(row.get(11)?),
        archived: row.get(12)?,
        tags: Vec::new(),
    })
}

/// A row of the `logevents` table, with its tags.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LogEventRow {
    /// Stable log id.
    pub log_id: u64,
    /// Timestamp.
    pub timestamp: DateTime<Utc>,
    /// Log type.
    pub log_type: String,
    /// Log action.
    pub log_action: String,
    /// Target page.
    pub page_id: Option<u64>,
    /// Namespace of the target title.
    pub namespace: i32,
    /// Target title.
    pub title: Option<String>,
    /// Performer.
    pub user: Option<String>,
    /// Performer id.
    pub user_id: Option<u64>,
    /// Reason.
    pub comment: Option<String>,
    /// Parameters as canonical JSON.
    pub params: serde_json::Value,
    /// Visibility.
    pub visibility: Visibility,
    /// Applied change tags.
    pub tags: Vec<String>,
}

pub(crate) const LOG_EVENT_COLUMNS: &str = "log_id, timestamp, log_type, log_action, page_id, \
     namespace, title, user, user_id, comment, params, visibility";

pub(crate) fn log_event_from_row(row: &Row<'_>) -> rusqlite::Result<LogEventRow> {
    let params: String = row.get(10)?;
    let params = serde_json::from_str(&params)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(10, Type::Text, Box::new(e)))?;
    Ok(LogEventRow {
        log_id: row.get(0)?,
        timestamp: timestamp_column(row, 1)?,
        log_type: row.get(2)?,
        log_action: row.get(3)?,
        page_id: row.get(4)?,
        namespace: row.get(5)?,
        title: row.get(6)?,
        user: row.get(7)?,
        user_id: row.get(8)?,
        comment: row.get(9)?,
        params,
        visibility: Visibility::from_bits(row.get(11)?),
        tags: Vec::new(),
    })
}

pub(crate) fn timestamp_column(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let text: String = row.get(idx)?;
    parse_timestamp(&text)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

pub(crate) fn optional_timestamp_column(
    row: &Row<'_>,
    idx: usize,
) -> rusqlite::Result<Option<DateTime<Utc>>> {
    let text: Option<String> = row.get(idx)?;
    text.map(|text| {
        parse_timestamp(&text)
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
    })
    .transpose()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn outcome_combination() {
        use ApplyOutcome::*;
        assert_eq!(Unchanged.and(Unchanged), Unchanged);
        assert_eq!(Unchanged.and(Updated), Updated);
        assert_eq!(Inserted.and(Updated), Inserted);
        assert_eq!(Updated.and(Unchanged), Updated);
        assert!(!Unchanged.is_change());
    }

    #[test]
    fn page_states() {
        let mut row = PageRow {
            page_id: 1,
            namespace: 0,
            title: "A".into(),
            is_redirect: false,
            latest_revision: None,
            length: None,
            content_model: None,
            deleted: false,
            merged_into: None,
        };
        assert!(row.is_live());
        row.deleted = true;
        assert_eq!(row.state(), PageState::Deleted);
        row.merged_into = Some(2);
        assert_eq!(row.state(), PageState::Merged(2));
    }
}
