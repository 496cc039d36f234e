//! Error types for the mirror store.

use std::io;
use thiserror::Error;
use wikimirror_protocol::StreamKind;

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors that can occur in mirror store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// SQLite error.
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Another process holds the mirror lock.
    #[error("mirror locked: another process has exclusive access")]
    MirrorLocked,

    /// The mirror path is unusable.
    #[error("invalid mirror path: {message}")]
    InvalidPath {
        /// Description of the problem.
        message: String,
    },

    /// A write would give a title to two live pages.
    #[error("title {namespace}:{title:?} is held by live page {occupant}")]
    TitleOccupied {
        /// Namespace of the contested title.
        namespace: i32,
        /// Contested title.
        title: String,
        /// Live page currently holding it.
        occupant: u64,
    },

    /// A row required by a transition does not exist.
    #[error("{kind} {id} not found")]
    NotFound {
        /// Row kind.
        kind: &'static str,
        /// Row id.
        id: u64,
    },

    /// A stored checkpoint cannot be decoded.
    #[error("corrupt checkpoint for stream {stream}: {reason}")]
    CorruptCheckpoint {
        /// Affected stream.
        stream: StreamKind,
        /// Description of the corruption.
        reason: String,
    },

    /// A value could not be encoded for storage.
    #[error("invalid data: {message}")]
    InvalidData {
        /// Description of the problem.
        message: String,
    },
}

impl StoreError {
    /// Creates an invalid path error.
    pub fn invalid_path(message: impl Into<String>) -> Self {
        Self::InvalidPath {
            message: message.into(),
        }
    }

    /// Creates an invalid data error.
    pub fn invalid_data(message: impl Into<String>) -> Self {
        Self::InvalidData {
            message: message.into(),
        }
    }

    /// Returns true if the error means the local database itself is
    /// unusable, as opposed to a conflict the caller can resolve.
    pub fn is_unavailable(&self) -> bool {
        matches!(
            self,
            StoreError::Sqlite(_)
                | StoreError::Io(_)
                | StoreError::MirrorLocked
                | StoreError::InvalidPath { .. }
                | StoreError::InvalidData { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classification() {
        assert!(StoreError::MirrorLocked.is_unavailable());
        assert!(!StoreError::TitleOccupied {
            namespace: 0,
            title: "Main Page".into(),
            occupant: 1,
        }
        .is_unavailable());
        assert!(!StoreError::NotFound { kind: "page", id: 3 }.is_unavailable());
    }

    #[test]
    fn error_display() {
        let err = StoreError::TitleOccupied {
            namespace: 0,
            title: "Test 2".into(),
            occupant: 7,
        };
        assert_eq!(err.to_string(), "title 0:\"Test 2\" is held by live page 7");

        let err = StoreError::CorruptCheckpoint {
            stream: StreamKind::Tags,
            reason: "bad timestamp".into(),
        };
        assert!(err.to_string().contains("tags"));
    }
}
