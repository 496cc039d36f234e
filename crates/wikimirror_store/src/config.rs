//! Mirror configuration.

use std::time::Duration;

/// Configuration for opening a mirror.
#[derive(Debug, Clone)]
pub struct MirrorConfig {
    /// Whether to create the mirror directory if it doesn't exist.
    pub create_if_missing: bool,

    /// How long SQLite waits on a busy database before failing.
    pub busy_timeout: Duration,

    /// Whether to use write-ahead logging. Readers of the mirror are
    /// then not blocked by a running pass.
    pub wal: bool,
}

impl Default for MirrorConfig {
    fn default() -> Self {
        Self {
            create_if_missing: true,
            busy_timeout: Duration::from_secs(5),
            wal: true,
        }
    }
}

impl MirrorConfig {
    /// Creates a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets whether to create the mirror if missing.
    #[must_use]
    pub const fn create_if_missing(mut self, value: bool) -> Self {
        self.create_if_missing = value;
        self
    }

    /// Sets the busy timeout.
    #[must_use]
    pub const fn busy_timeout(mut self, timeout: Duration) -> Self {
        self.busy_timeout = timeout;
        self
    }

    /// Sets whether to use write-ahead logging.
    #[must_use]
    pub const fn wal(mut self, value: bool) -> Self {
        self.wal = value;
        self
    }
}
