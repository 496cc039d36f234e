//! Stream positions, checkpoints and pagination.

use crate::error::ProtocolError;
use crate::time::format_timestamp;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// One of the independent remote change feeds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamKind {
    /// Pages whose current state changed.
    Pages,
    /// Newly created revisions.
    Revisions,
    /// Administrative log events, including structural transitions.
    LogEvents,
    /// Tag additions and removals.
    Tags,
    /// Protection changes.
    Restrictions,
}

impl StreamKind {
    /// All streams, in the order they are reported.
    pub const ALL: [StreamKind; 5] = [
        StreamKind::Pages,
        StreamKind::Revisions,
        StreamKind::LogEvents,
        StreamKind::Tags,
        StreamKind::Restrictions,
    ];

    /// Returns the stable name used as the checkpoint key.
    pub fn as_str(&self) -> &'static str {
        match self {
            StreamKind::Pages => "pages",
            StreamKind::Revisions => "revisions",
            StreamKind::LogEvents => "logevents",
            StreamKind::Tags => "tags",
            StreamKind::Restrictions => "restrictions",
        }
    }
}

impl fmt::Display for StreamKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StreamKind {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        StreamKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| ProtocolError::UnknownStream(s.to_string()))
    }
}

/// A point in a change stream.
///
/// Positions order by timestamp first and by the record's stable id
/// second, which is the order the remote assigns within one stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Position {
    /// Remote timestamp of the record.
    pub timestamp: DateTime<Utc>,
    /// Stable id of the record within its stream.
    pub id: u64,
}

impl Position {
    /// Creates a new position.
    pub fn new(timestamp: DateTime<Utc>, id: u64) -> Self {
        Self { timestamp, id }
    }

    /// Returns true if this position lies strictly after `floor`.
    ///
    /// Every position is after a missing floor.
    pub fn is_after(&self, floor: Option<&Position>) -> bool {
        floor.map_or(true, |floor| self > floor)
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", format_timestamp(&self.timestamp), self.id)
    }
}

/// The last successfully processed position in one stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checkpoint {
    /// Stream this checkpoint belongs to.
    pub stream: StreamKind,
    /// Last applied position.
    pub position: Position,
    /// Continuation token for the page following `position`, if the
    /// stream was interrupted between pages.
    pub continuation: Option<String>,
}

impl Checkpoint {
    /// Creates a checkpoint without a continuation token.
    pub fn new(stream: StreamKind, position: Position) -> Self {
        Self {
            stream,
            position,
            continuation: None,
        }
    }

    /// Sets the continuation token.
    pub fn with_continuation(mut self, continuation: Option<String>) -> Self {
        self.continuation = continuation;
        self
    }
}

/// A request for one page of a change stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListQuery {
    /// Start of the listing. The remote treats the timestamp as
    /// inclusive; `None` lists from the beginning of the feed.
    pub since: Option<Position>,
    /// Continuation token returned with the previous page.
    pub continuation: Option<String>,
    /// Maximum number of records per page.
    pub limit: u32,
}

impl ListQuery {
    /// Creates a query starting at `since`.
    pub fn new(since: Option<Position>, limit: u32) -> Self {
        Self {
            since,
            continuation: None,
            limit,
        }
    }

    /// Sets the continuation token.
    pub fn with_continuation(mut self, continuation: Option<String>) -> Self {
        self.continuation = continuation;
        self
    }
}

/// One page of a listing.
#[derive(Debug, Clone, PartialEq)]
pub struct ListPage<T> {
    /// Records in ascending stream order.
    pub items: Vec<T>,
    /// Token for the next page; `None` when the listing is exhausted.
    pub continuation: Option<String>,
}

impl<T> ListPage<T> {
    /// Creates the final page of a listing.
    pub fn last(items: Vec<T>) -> Self {
        Self {
            items,
            continuation: None,
        }
    }

    /// Creates a page followed by more.
    pub fn more(items: Vec<T>, continuation: impl Into<String>) -> Self {
        Self {
            items,
            continuation: Some(continuation.into()),
        }
    }

    /// Returns true if another page follows.
    pub fn has_more(&self) -> bool {
        self.continuation.is_some()
    }

    /// Converts the records, keeping the continuation.
    pub fn map<U>(self, f: impl FnMut(T) -> U) -> ListPage<U> {
        ListPage {
            items: self.items.into_iter().map(f).collect(),
            continuation: self.continuation,
        }
    }
}
