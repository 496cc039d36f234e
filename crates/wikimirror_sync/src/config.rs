//! Configuration for the sync engine.

use crate::error::SyncResult;
use std::fmt;
use std::str::FromStr;
use std::thread;
use std::time::Duration;
use tracing::warn;
use wikimirror_protocol::StreamKind;
use wikimirror_store::ContentScope;

/// Which revision texts a pass fetches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ContentMode {
    /// No text is fetched.
    #[default]
    Off,
    /// Text of the latest revision of every live page.
    Latest,
    /// Text of every revision that is not archived.
    All,
}

impl ContentMode {
    /// Returns the store scope this mode covers, or `None` for `Off`.
    pub fn scope(self) -> Option<ContentScope> {
        match self {
            ContentMode::Off => None,
            ContentMode::Latest => Some(ContentScope::Latest),
            ContentMode::All => Some(ContentScope::All),
        }
    }

    /// Returns the mode name.
    pub fn as_str(self) -> &'static str {
        match self {
            ContentMode::Off => "off",
            ContentMode::Latest => "latest",
            ContentMode::All => "all",
        }
    }
}

impl fmt::Display for ContentMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ContentMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "off" => Ok(ContentMode::Off),
            "latest" => Ok(ContentMode::Latest),
            "all" => Ok(ContentMode::All),
            other => Err(format!("unknown content mode: {other} (expected off, latest or all)")),
        }
    }
}

/// Configuration for sync passes.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Action API endpoint, e.g. `https://en.wikipedia.org/w/api.php`.
    pub api_url: String,
    /// Maximum number of records per listing request.
    pub batch_size: u32,
    /// Retry configuration for remote requests.
    pub retry: RetryConfig,
    /// Streams read by a pass, in reporting order.
    pub streams: Vec<StreamKind>,
    /// Read the streams on parallel threads.
    pub parallel_streams: bool,
    /// Run the consistency verifier after the streams.
    pub verify: bool,
    /// Number of touched pages whose revision counts are verified.
    pub verify_sample: usize,
    /// Revision text fetching.
    pub content: ContentMode,
    /// How many occupants deep title settlement may recurse.
    pub max_title_depth: u32,
    /// User agent sent to the remote.
    pub user_agent: String,
    /// Request timeout.
    pub timeout: Duration,
}

impl SyncConfig {
    /// Creates a new sync configuration.
    pub fn new(api_url: impl Into<String>) -> Self {
        Self {
            api_url: api_url.into(),
            batch_size: 100,
            retry: RetryConfig::default(),
            streams: StreamKind::ALL.to_vec(),
            parallel_streams: true,
            verify: true,
            verify_sample: 20,
            content: ContentMode::Off,
            max_title_depth: 8,
            user_agent: format!("wikimirror/{}", env!("CARGO_PKG_VERSION")),
            timeout: Duration::from_secs(30),
        }
    }

    /// Sets the listing batch size.
    pub fn with_batch_size(mut self, size: u32) -> Self {
        self.batch_size = size.max(1);
        self
    }

    /// Sets the retry configuration.
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Restricts the pass to the given streams.
    pub fn with_streams(mut self, streams: impl IntoIterator<Item = StreamKind>) -> Self {
        let mut selected: Vec<StreamKind> = streams.into_iter().collect();
        selected.sort();
        selected.dedup();
        self.streams = selected;
        self
    }

    /// Sets whether streams are read in parallel.
    pub fn with_parallel_streams(mut self, parallel: bool) -> Self {
        self.parallel_streams = parallel;
        self
    }

    /// Sets whether the verifier runs after the streams.
    pub fn with_verify(mut self, verify: bool) -> Self {
        self.verify = verify;
        self
    }

    /// Sets how many touched pages the verifier samples.
    pub fn with_verify_sample(mut self, sample: usize) -> Self {
        self.verify_sample = sample;
        self
    }

    /// Sets the content mode.
    pub fn with_content(mut self, content: ContentMode) -> Self {
        self.content = content;
        self
    }

    /// Sets the title settlement depth.
    pub fn with_max_title_depth(mut self, depth: u32) -> Self {
        self.max_title_depth = depth;
        self
    }

    /// Sets the user agent.
    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }

    /// Sets the request timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self::new("")
    }
}

/// Configuration for retry behavior.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of attempts per request, the first one included.
    pub max_attempts: u32,
    /// Initial delay between retries.
    pub initial_delay: Duration,
    /// Maximum delay between retries.
    pub max_delay: Duration,
    /// Multiplier for exponential backoff.
    pub backoff_multiplier: f64,
    /// Whether to add jitter to delays.
    pub add_jitter: bool,
}

impl RetryConfig {
    /// Creates a new retry configuration.
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
            backoff_multiplier: 2.0,
            add_jitter: true,
        }
    }

    /// Creates a configuration with no retries.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            initial_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            backoff_multiplier: 1.0,
            add_jitter: false,
        }
    }

    /// Creates a configuration that retries immediately. Used by tests.
    pub fn immediate(max_attempts: u32) -> Self {
        Self::new(max_attempts)
            .with_initial_delay(Duration::ZERO)
            .with_max_delay(Duration::ZERO)
            .with_jitter(false)
    }

    /// Sets the initial delay.
    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    /// Sets the maximum delay.
    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Sets the backoff multiplier.
    pub fn with_backoff_multiplier(mut self, multiplier: f64) -> Self {
        self.backoff_multiplier = multiplier;
        self
    }

    /// Sets whether jitter is added.
    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.add_jitter = jitter;
        self
    }

    /// Calculates the delay before a given attempt (0-indexed).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }

        let base_delay = self.initial_delay.as_secs_f64()
            * self.backoff_multiplier.powi(attempt.saturating_sub(1) as i32);

        let delay_secs = base_delay.min(self.max_delay.as_secs_f64());

        if self.add_jitter {
            // Up to 25% jitter
            let jitter = delay_secs * 0.25 * rand_jitter();
            Duration::from_secs_f64(delay_secs + jitter)
        } else {
            Duration::from_secs_f64(delay_secs)
        }
    }
}

impl RetryConfig {
    /// Runs a remote request, retrying retryable failures with backoff.
    pub fn run<T>(&self, what: &str, mut op: impl FnMut() -> SyncResult<T>) -> SyncResult<T> {
        let mut attempt = 0;
        loop {
            match op() {
                Err(err) if err.is_retryable() && attempt + 1 < self.max_attempts => {
                    attempt += 1;
                    let delay = self.delay_for_attempt(attempt);
                    warn!(what, attempt, error = %err, "retrying remote request");
                    thread::sleep(delay);
                }
                other => return other,
            }
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::new(4)
    }
}

/// Cheap pseudo-random jitter in `[0, 1)` from the clock's nanoseconds.
fn rand_jitter() -> f64 {
    use std::time::SystemTime;
    let nanos = SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .unwrap_or_default()
        .subsec_nanos();
    (nanos % 1000) as f64 / 1000.0
}
