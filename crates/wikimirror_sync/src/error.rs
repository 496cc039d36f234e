//! Error types for the sync engine.

use thiserror::Error;
use wikimirror_protocol::{ProtocolError, StreamKind};
use wikimirror_store::StoreError;

/// Result type for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Errors that can occur during sync operations.
///
/// Only storage unavailability is fatal to a pass. Everything else stops
/// at most the stream it happened in.
#[derive(Error, Debug)]
pub enum SyncError {
    /// Network or transport error.
    #[error("transport error: {message}")]
    Transport {
        /// Error message.
        message: String,
        /// Whether the operation can be retried.
        retryable: bool,
    },

    /// Timeout.
    #[error("operation timed out")]
    Timeout,

    /// The remote answered with something that cannot be decoded.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// The remote reported an internal failure.
    #[error("server error: {0}")]
    ServerError(String),

    /// The remote rejected a continuation token.
    #[error("continuation token rejected by the remote")]
    InvalidContinuation,

    /// The requested start position is older than the remote retains.
    #[error("history of stream {stream} purged before the requested position")]
    HistoryPurged {
        /// Affected stream.
        stream: StreamKind,
    },

    /// A record failed validation.
    #[error("unprocessable record {id:?} in stream {stream}: {reason}")]
    Unprocessable {
        /// Stream the record came from.
        stream: StreamKind,
        /// Stable id of the record, if it had one.
        id: Option<u64>,
        /// Why the record was rejected.
        reason: String,
    },

    /// A transition cannot be resolved from the available data.
    #[error("identity conflict on page {page_id}: {reason}")]
    IdentityConflict {
        /// Page the transition was about.
        page_id: u64,
        /// What could not be resolved.
        reason: String,
    },

    /// Mirror store error.
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// Sync was cancelled.
    #[error("sync cancelled")]
    Cancelled,

    /// Another pass is running on this engine.
    #[error("a sync pass is already in progress")]
    PassInProgress,

    /// Invalid state transition.
    #[error("invalid state transition from {from:?} to {to:?}")]
    InvalidStateTransition {
        /// Current state.
        from: String,
        /// Attempted target state.
        to: String,
    },

    /// Not connected.
    #[error("not connected to the remote wiki")]
    NotConnected,
}

impl SyncError {
    /// Creates a retryable transport error.
    pub fn transport_retryable(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            retryable: true,
        }
    }

    /// Creates a non-retryable transport error.
    pub fn transport_fatal(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            retryable: false,
        }
    }

    /// Creates an identity conflict.
    pub fn identity_conflict(page_id: u64, reason: impl Into<String>) -> Self {
        Self::IdentityConflict {
            page_id,
            reason: reason.into(),
        }
    }

    /// Returns true if this error can be retried.
    pub fn is_retryable(&self) -> bool {
        match self {
            SyncError::Transport { retryable, .. } => *retryable,
            SyncError::Timeout => true,
            SyncError::ServerError(_) => true,
            _ => false,
        }
    }

    /// Returns true if the local mirror is unusable and the whole pass
    /// must stop.
    pub fn is_fatal(&self) -> bool {
        matches!(self, SyncError::Store(err) if err.is_unavailable())
    }
}

impl From<ProtocolError> for SyncError {
    fn from(err: ProtocolError) -> Self {
        SyncError::Protocol(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_errors() {
        assert!(SyncError::transport_retryable("connection lost").is_retryable());
        assert!(!SyncError::transport_fatal("invalid certificate").is_retryable());
        assert!(SyncError::Timeout.is_retryable());
        assert!(SyncError::ServerError("internal error".into()).is_retryable());
        assert!(!SyncError::Cancelled.is_retryable());
        assert!(!SyncError::InvalidContinuation.is_retryable());
    }

    #[test]
    fn only_storage_unavailability_is_fatal() {
        assert!(SyncError::Store(StoreError::MirrorLocked).is_fatal());
        assert!(!SyncError::Store(StoreError::NotFound { kind: "page", id: 1 }).is_fatal());
        assert!(!SyncError::identity_conflict(4, "merge target never seen").is_fatal());
        assert!(!SyncError::transport_fatal("refused").is_fatal());
    }

    #[test]
    fn error_display() {
        let err = SyncError::Unprocessable {
            stream: StreamKind::LogEvents,
            id: Some(12),
            reason: "unknown log type frobnicate/twiddle".into(),
        };
        assert_eq!(
            err.to_string(),
            "unprocessable record Some(12) in stream logevents: unknown log type frobnicate/twiddle"
        );

        let err = SyncError::HistoryPurged {
            stream: StreamKind::Pages,
        };
        assert!(err.to_string().contains("pages"));

        let err: SyncError = ProtocolError::UnknownStream("x".into()).into();
        assert!(matches!(err, SyncError::Protocol(_)));
    }
}
