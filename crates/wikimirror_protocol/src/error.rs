//! Error types for record validation.

use thiserror::Error;

/// Result type for protocol operations.
pub type ProtocolResult<T> = Result<T, ProtocolError>;

/// Errors raised while validating remote records.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// A required field was absent.
    #[error("missing field `{field}` in {record}")]
    MissingField {
        /// Record kind.
        record: &'static str,
        /// Field name.
        field: &'static str,
    },

    /// A timestamp could not be parsed.
    #[error("invalid timestamp {value:?}")]
    InvalidTimestamp {
        /// The offending value.
        value: String,
    },

    /// The log type is not one the reconciler knows about.
    #[error("unknown log type {log_type}/{action}")]
    UnknownLogType {
        /// Log type.
        log_type: String,
        /// Log action.
        action: String,
    },

    /// A known log type carried parameters that cannot be interpreted.
    #[error("malformed {log_type}/{action} event: {reason}")]
    MalformedParams {
        /// Log type.
        log_type: String,
        /// Log action.
        action: String,
        /// What was wrong.
        reason: String,
    },

    /// Unknown stream name.
    #[error("unknown stream: {0}")]
    UnknownStream(String),
}

impl ProtocolError {
    pub(crate) fn missing(record: &'static str, field: &'static str) -> Self {
        Self::MissingField { record, field }
    }

    pub(crate) fn malformed(log_type: &str, action: &str, reason: impl Into<String>) -> Self {
        Self::MalformedParams {
            log_type: log_type.to_string(),
            action: action.to_string(),
            reason: reason.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display() {
        let err = ProtocolError::missing("revision", "revid");
        assert_eq!(err.to_string(), "missing field `revid` in revision");

        let err = ProtocolError::malformed("move", "move", "no target title");
        assert_eq!(err.to_string(), "malformed move/move event: no target title");
    }
}
