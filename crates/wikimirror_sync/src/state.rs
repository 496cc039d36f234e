//! Sync engine state machine.

use crate::applier::{OutcomeCounts, StreamApplier};
use crate::config::{ContentMode, SyncConfig};
use crate::content::{sync_content, ContentReport};
use crate::error::{SyncError, SyncResult};
use crate::reader::StreamReader;
use crate::site::refresh_site_metadata;
use crate::transport::RemoteWiki;
use crate::verifier::{Drift, DriftReport, Verifier};
use parking_lot::RwLock;
use serde::{Serialize, Serializer};
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, info_span, warn, Span};
use uuid::Uuid;
use wikimirror_protocol::{Checkpoint, Position, StreamKind};
use wikimirror_store::{CheckpointStore, Mirror, StoreError};

/// The current state of the sync engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncState {
    /// Engine is idle, not syncing.
    Idle,
    /// Engine is pulling change streams.
    Pulling,
    /// Engine is comparing the mirror with the remote.
    Verifying,
    /// The last pass completed and every stream reached its end.
    Synced,
    /// The last pass failed or left a stream behind.
    Error,
}

impl SyncState {
    /// Returns true if a pass is running.
    pub fn is_active(&self) -> bool {
        matches!(self, SyncState::Pulling | SyncState::Verifying)
    }

    /// Returns true if the engine can start a new pass.
    pub fn can_start_sync(&self) -> bool {
        matches!(self, SyncState::Idle | SyncState::Synced | SyncState::Error)
    }
}

/// Statistics accumulated across passes.
#[derive(Debug, Clone, Default)]
pub struct SyncStats {
    /// Passes that ran to completion.
    pub passes_completed: u64,
    /// Passes aborted by a storage failure.
    pub passes_failed: u64,
    /// Record outcomes over all passes.
    pub counts: OutcomeCounts,
    /// Listing retries.
    pub retries: u64,
    /// Streams that stopped before reaching their end.
    pub stream_failures: u64,
    /// Drift entries reported.
    pub drift_reported: u64,
    /// Last completed pass.
    pub last_sync_time: Option<Instant>,
    /// Last error message.
    pub last_error: Option<String>,
}

/// Result of syncing one stream.
#[derive(Debug, Serialize)]
pub struct StreamReport {
    /// Stream.
    pub stream: StreamKind,
    /// Outcomes of applied records.
    #[serde(flatten)]
    pub counts: OutcomeCounts,
    /// Records received from the reader.
    pub records: u64,
    /// Batches received from the reader.
    pub batches: u64,
    /// Listing retries.
    pub retries: u32,
    /// Checkpoint after the pass.
    pub checkpoint: Option<Checkpoint>,
    /// Pages written by the stream.
    pub touched_pages: Vec<u64>,
    /// Why the stream stopped before its end.
    #[serde(serialize_with = "serialize_failure")]
    pub failure: Option<SyncError>,
    /// Drift observed while applying.
    pub drift: Vec<Drift>,
}

impl StreamReport {
    fn new(stream: StreamKind, checkpoint: Option<Checkpoint>) -> Self {
        Self {
            stream,
            counts: OutcomeCounts::default(),
            records: 0,
            batches: 0,
            retries: 0,
            checkpoint,
            touched_pages: Vec::new(),
            failure: None,
            drift: Vec::new(),
        }
    }

    /// Returns true if the stream reached its end.
    pub fn is_complete(&self) -> bool {
        self.failure.is_none()
    }
}

/// Result of a sync pass.
#[derive(Debug, Serialize)]
pub struct PassReport {
    /// Identifier of the pass, also recorded on its tracing span.
    pub pass_id: Uuid,
    /// One report per enabled stream.
    pub streams: Vec<StreamReport>,
    /// Drift observed while applying and by verification.
    pub drift: DriftReport,
    /// Content sync result, if enabled.
    pub content: Option<ContentReport>,
    /// Wall time of the pass.
    #[serde(serialize_with = "serialize_duration")]
    pub duration: Duration,
}

impl PassReport {
    /// Returns the report of a stream.
    pub fn stream(&self, stream: StreamKind) -> Option<&StreamReport> {
        self.streams.iter().find(|report| report.stream == stream)
    }

    /// Returns true if every stream reached its end.
    pub fn is_complete(&self) -> bool {
        self.streams.iter().all(StreamReport::is_complete)
    }

    /// Returns outcome counts summed over all streams.
    pub fn counts(&self) -> OutcomeCounts {
        let mut counts = OutcomeCounts::default();
        for report in &self.streams {
            counts.merge(report.counts);
        }
        counts
    }
}

fn serialize_failure<S: Serializer>(
    failure: &Option<SyncError>,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    match failure {
        Some(err) => serializer.serialize_some(&err.to_string()),
        None => serializer.serialize_none(),
    }
}

fn serialize_duration<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_f64(duration.as_secs_f64())
}

/// Clears the running flag when a pass ends, however it ends.
struct PassGuard<'a> {
    running: &'a AtomicBool,
    cancelled: &'a AtomicBool,
}

impl Drop for PassGuard<'_> {
    fn drop(&mut self) {
        self.cancelled.store(false, Ordering::SeqCst);
        self.running.store(false, Ordering::SeqCst);
    }
}

/// The sync engine mirrors a remote wiki into a local mirror.
///
/// One pass runs at a time per engine; the mirror's directory lock keeps
/// other processes out.
pub struct SyncEngine<R: RemoteWiki> {
    config: SyncConfig,
    mirror: Arc<Mirror>,
    remote: Arc<R>,
    state: RwLock<SyncState>,
    stats: RwLock<SyncStats>,
    running: AtomicBool,
    cancelled: AtomicBool,
}

impl<R: RemoteWiki> SyncEngine<R> {
    /// Creates a new sync engine.
    pub fn new(config: SyncConfig, mirror: Arc<Mirror>, remote: R) -> Self {
        Self::with_shared_remote(config, mirror, Arc::new(remote))
    }

    /// Creates a sync engine over a remote shared with the caller.
    pub fn with_shared_remote(config: SyncConfig, mirror: Arc<Mirror>, remote: Arc<R>) -> Self {
        Self {
            config,
            mirror,
            remote,
            state: RwLock::new(SyncState::Idle),
            stats: RwLock::new(SyncStats::default()),
            running: AtomicBool::new(false),
            cancelled: AtomicBool::new(false),
        }
    }

    /// Returns the configuration.
    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Returns the mirror.
    pub fn mirror(&self) -> &Arc<Mirror> {
        &self.mirror
    }

    /// Returns the remote.
    pub fn remote(&self) -> &Arc<R> {
        &self.remote
    }

    /// Gets the current state.
    pub fn state(&self) -> SyncState {
        *self.state.read()
    }

    /// Gets the current stats.
    pub fn stats(&self) -> SyncStats {
        self.stats.read().clone()
    }

    /// Stops the running pass between batches. Committed checkpoints
    /// stay; the next pass resumes from them.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    fn set_state(&self, state: SyncState) {
        *self.state.write() = state;
    }

    /// Runs one sync pass.
    ///
    /// # Errors
    ///
    /// Returns `PassInProgress` if a pass is already running, and the
    /// storage error if the mirror became unusable. Every other failure
    /// is isolated to its stream and reported in the `PassReport`.
    pub fn sync(&self) -> SyncResult<PassReport> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(SyncError::PassInProgress);
        }
        let _guard = PassGuard {
            running: &self.running,
            cancelled: &self.cancelled,
        };
        if !self.state().can_start_sync() {
            return Err(SyncError::InvalidStateTransition {
                from: format!("{:?}", self.state()),
                to: "sync".into(),
            });
        }

        let pass_id = Uuid::new_v4();
        let span = info_span!("sync_pass", %pass_id);
        let _entered = span.enter();

        match self.run_pass(pass_id) {
            Ok(report) => Ok(report),
            Err(err) => {
                error!(error = %err, "sync pass aborted");
                self.handle_error(&err);
                Err(err)
            }
        }
    }

    fn run_pass(&self, pass_id: Uuid) -> SyncResult<PassReport> {
        let start = Instant::now();
        self.set_state(SyncState::Pulling);
        info!(
            streams = ?self.config.streams.iter().map(StreamKind::as_str).collect::<Vec<_>>(),
            parallel = self.config.parallel_streams,
            "sync pass started"
        );

        refresh_site_metadata(&self.mirror, &*self.remote, &self.config.retry)?;
        let streams = self.pull_streams()?;

        let content = match self.config.content {
            ContentMode::Off => None,
            mode => match sync_content(&self.mirror, &*self.remote, &self.config.retry, mode) {
                Ok(report) => Some(report),
                Err(err) if err.is_fatal() => return Err(err),
                Err(err) => {
                    warn!(error = %err, "revision content not synced");
                    None
                }
            },
        };

        let mut drift = DriftReport::default();
        for report in &streams {
            drift.extend(report.drift.iter().cloned());
        }
        if self.config.verify {
            self.set_state(SyncState::Verifying);
            let touched: BTreeSet<u64> = streams
                .iter()
                .flat_map(|report| report.touched_pages.iter().copied())
                .collect();
            let sample: Vec<u64> = touched.into_iter().take(self.config.verify_sample).collect();
            let verified = Verifier::new(&self.mirror, &*self.remote, &self.config.retry).verify(&sample);
            drift.incomplete = verified.incomplete;
            drift.extend(verified.drift);
        }

        let report = PassReport {
            pass_id,
            streams,
            drift,
            content,
            duration: start.elapsed(),
        };
        self.finish(&report);
        Ok(report)
    }

    fn finish(&self, report: &PassReport) {
        let counts = report.counts();
        let failures = report.streams.iter().filter(|s| !s.is_complete()).count() as u64;
        {
            let mut stats = self.stats.write();
            stats.passes_completed += 1;
            stats.counts.merge(counts);
            stats.retries += report.streams.iter().map(|s| u64::from(s.retries)).sum::<u64>();
            stats.stream_failures += failures;
            stats.drift_reported += report.drift.drift.len() as u64;
            stats.last_sync_time = Some(Instant::now());
            stats.last_error = report
                .streams
                .iter()
                .find_map(|s| s.failure.as_ref().map(|err| format!("{}: {err}", s.stream)));
        }
        self.set_state(if failures == 0 {
            SyncState::Synced
        } else {
            SyncState::Error
        });
        info!(
            inserted = counts.inserted,
            updated = counts.updated,
            unchanged = counts.unchanged,
            failed_streams = failures,
            drift = report.drift.drift.len(),
            elapsed_ms = report.duration.as_millis() as u64,
            "sync pass finished"
        );
    }

    /// Handles a pass-level error by updating state and stats.
    fn handle_error(&self, error: &SyncError) {
        self.set_state(SyncState::Error);
        let mut stats = self.stats.write();
        stats.passes_failed += 1;
        stats.last_error = Some(error.to_string());
    }

    /// Runs every enabled stream, concurrently when configured.
    fn pull_streams(&self) -> SyncResult<Vec<StreamReport>> {
        let abort = AtomicBool::new(false);
        let streams = &self.config.streams;

        let results: Vec<SyncResult<StreamReport>> =
            if self.config.parallel_streams && streams.len() > 1 {
                let parent = Span::current();
                thread::scope(|scope| {
                    let handles: Vec<_> = streams
                        .iter()
                        .map(|&stream| {
                            let parent = parent.clone();
                            let abort = &abort;
                            scope.spawn(move || parent.in_scope(|| self.run_stream(stream, abort)))
                        })
                        .collect();
                    streams
                        .iter()
                        .zip(handles)
                        .map(|(stream, handle)| {
                            handle.join().unwrap_or_else(|_| {
                                Err(SyncError::Protocol(format!("{stream} worker panicked")))
                            })
                        })
                        .collect()
                })
            } else {
                let mut results = Vec::with_capacity(streams.len());
                for &stream in streams {
                    let result = self.run_stream(stream, &abort);
                    let stop = result.is_err();
                    results.push(result);
                    if stop {
                        break;
                    }
                }
                results
            };

        results.into_iter().collect()
    }

    /// Pulls one stream until it is exhausted or stops.
    fn run_stream(&self, stream: StreamKind, abort: &AtomicBool) -> SyncResult<StreamReport> {
        let span = info_span!("stream", stream = %stream);
        let _entered = span.enter();
        let mirror = &*self.mirror;
        let remote = &*self.remote;

        let checkpoint = match mirror.load(stream) {
            Ok(checkpoint) => checkpoint,
            Err(StoreError::CorruptCheckpoint { reason, .. }) => {
                warn!(%reason, "corrupt checkpoint, restarting stream from the beginning");
                if let Err(err) = mirror.reset(stream) {
                    return self.abort_pass(abort, err.into());
                }
                None
            }
            Err(err) => return self.abort_pass(abort, err.into()),
        };
        debug!(
            checkpoint = ?checkpoint.as_ref().map(|cp| cp.position.to_string()),
            "stream starting"
        );

        let mut report = StreamReport::new(stream, checkpoint.clone());
        let mut reader = StreamReader::new(
            remote,
            stream,
            &self.config.retry,
            self.config.batch_size,
            checkpoint.as_ref(),
        );
        let mut applier = StreamApplier::new(stream, mirror, remote, &self.config);
        let mut position: Option<Position> = checkpoint.as_ref().map(|cp| cp.position);

        loop {
            if abort.load(Ordering::SeqCst) {
                report.failure = Some(SyncError::Cancelled);
                break;
            }
            if self.is_cancelled() {
                info!("stream cancelled");
                report.failure = Some(SyncError::Cancelled);
                break;
            }

            let batch = match reader.next() {
                None => break,
                Some(Ok(batch)) => batch,
                Some(Err(err)) if err.is_fatal() => return self.abort_pass(abort, err),
                Some(Err(err)) => {
                    warn!(error = %err, "stream read failed");
                    report.failure = Some(err);
                    break;
                }
            };
            report.batches += 1;
            report.records += batch.records.len() as u64;

            let outcome = match applier.apply_batch(&batch.records) {
                Ok(outcome) => outcome,
                Err(err) => return self.abort_pass(abort, err),
            };
            report.counts.merge(outcome.counts);
            if outcome.last.is_some() {
                position = outcome.last;
            }
            debug!(
                records = batch.records.len(),
                inserted = outcome.counts.inserted,
                updated = outcome.counts.updated,
                unchanged = outcome.counts.unchanged,
                "batch applied"
            );

            // another stream hit a storage failure: commit nothing more
            if abort.load(Ordering::SeqCst) {
                report.failure = Some(SyncError::Cancelled);
                break;
            }

            let halted = outcome.halt;
            let continuation = if halted.is_some() {
                None
            } else {
                batch.continuation
            };
            if let Some(position) = position {
                let next = Checkpoint::new(stream, position).with_continuation(continuation);
                if let Err(err) = mirror.commit(&next) {
                    return self.abort_pass(abort, err.into());
                }
                report.checkpoint = Some(next);
            }
            if let Some(err) = halted {
                report.failure = Some(err);
                break;
            }
        }

        report.retries = reader.retries();
        let (touched, drift) = applier.into_parts();
        report.touched_pages = touched.into_iter().collect();
        report.drift = drift;

        match &report.failure {
            None => info!(
                inserted = report.counts.inserted,
                updated = report.counts.updated,
                unchanged = report.counts.unchanged,
                batches = report.batches,
                "stream synced"
            ),
            Some(err) => warn!(
                error = %err,
                checkpoint = ?report.checkpoint.as_ref().map(|cp| cp.position.to_string()),
                "stream stopped; it resumes from its checkpoint next pass"
            ),
        }
        Ok(report)
    }

    fn abort_pass(&self, abort: &AtomicBool, err: SyncError) -> SyncResult<StreamReport> {
        abort.store(true, Ordering::SeqCst);
        error!(error = %err, "storage failure, stopping every stream");
        Err(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RetryConfig;
    use crate::transport::{MockRemote, MockResponse};
    use wikimirror_protocol::{ListPage, RawPage, RawRecentChange, RawSiteTotals};

    fn config() -> SyncConfig {
        SyncConfig::new("http://wiki.test/w/api.php")
            .with_retry(RetryConfig::immediate(2))
            .with_verify(false)
    }

    fn change(rcid: u64, page_id: u64) -> RawRecentChange {
        RawRecentChange {
            rcid: Some(rcid),
            change_type: Some("new".into()),
            ns: Some(0),
            title: Some(format!("Page {page_id}")),
            pageid: Some(page_id),
            revid: Some(page_id * 10),
            timestamp: Some(format!("2024-01-01T00:00:{rcid:02}Z")),
        }
    }

    fn page(page_id: u64) -> RawPage {
        RawPage {
            pageid: Some(page_id),
            ns: Some(0),
            title: Some(format!("Page {page_id}")),
            lastrevid: Some(page_id * 10),
            ..RawPage::default()
        }
    }

    fn engine(remote: MockRemote, config: SyncConfig) -> SyncEngine<MockRemote> {
        SyncEngine::new(config, Arc::new(Mirror::open_in_memory().unwrap()), remote)
    }

    #[test]
    fn state_transitions() {
        assert!(SyncState::Idle.can_start_sync());
        assert!(SyncState::Synced.can_start_sync());
        assert!(SyncState::Error.can_start_sync());
        assert!(!SyncState::Pulling.can_start_sync());
        assert!(SyncState::Verifying.is_active());
        assert!(!SyncState::Synced.is_active());
    }

    #[test]
    fn empty_remote_syncs_cleanly() {
        let engine = engine(MockRemote::new(), config());
        let report = engine.sync().unwrap();
        assert!(report.is_complete());
        assert_eq!(report.streams.len(), StreamKind::ALL.len());
        assert_eq!(report.counts().total(), 0);
        assert_eq!(engine.state(), SyncState::Synced);
        assert_eq!(engine.stats().passes_completed, 1);
        // nothing to checkpoint yet
        assert!(engine.mirror().all().unwrap().is_empty());
    }

    #[test]
    fn checkpoint_carries_continuation_between_pages() {
        let remote = MockRemote::new();
        remote.set_page(page(1));
        remote.set_page(page(2));
        remote.push_response(
            StreamKind::Pages,
            MockResponse::Pages(ListPage::more(vec![change(1, 1)], "next")),
        );
        remote.push_response(StreamKind::Pages, MockResponse::Transient);
        remote.push_response(StreamKind::Pages, MockResponse::Transient);
        let engine = engine(
            remote,
            config()
                .with_streams([StreamKind::Pages])
                .with_retry(RetryConfig::immediate(2)),
        );

        let report = engine.sync().unwrap();
        let pages = report.stream(StreamKind::Pages).unwrap();
        assert!(matches!(pages.failure, Some(SyncError::Transport { .. })));
        let checkpoint = engine.mirror().load(StreamKind::Pages).unwrap().unwrap();
        assert_eq!(checkpoint.position.id, 1);
        assert_eq!(checkpoint.continuation.as_deref(), Some("next"));
        assert_eq!(engine.state(), SyncState::Error);

        // the next pass resumes with the stored token
        engine.remote().push_response(
            StreamKind::Pages,
            MockResponse::Pages(ListPage::last(vec![change(2, 2)])),
        );
        let report = engine.sync().unwrap();
        assert!(report.is_complete());
        let (_, query) = engine.remote().queries().last().cloned().unwrap();
        assert_eq!(query.continuation.as_deref(), Some("next"));
        let checkpoint = engine.mirror().load(StreamKind::Pages).unwrap().unwrap();
        assert_eq!(checkpoint.position.id, 2);
        assert_eq!(checkpoint.continuation, None);
        assert!(engine.mirror().page(2).unwrap().is_some());
    }

    #[test]
    fn cancelled_pass_commits_nothing() {
        let remote = MockRemote::new();
        remote.push_response(
            StreamKind::Pages,
            MockResponse::Pages(ListPage::last(vec![change(1, 1)])),
        );
        let engine = engine(remote, config().with_parallel_streams(false));

        engine.cancel();
        let report = engine.sync().unwrap();
        assert!(report
            .streams
            .iter()
            .all(|s| matches!(s.failure, Some(SyncError::Cancelled))));
        assert!(engine.mirror().all().unwrap().is_empty());

        // the flag only applies to the pass it stopped
        let report = engine.sync().unwrap();
        assert!(report.is_complete());
    }

    #[test]
    fn verification_reports_drift() {
        let remote = MockRemote::new();
        remote.set_totals(RawSiteTotals {
            pages: Some(5),
            latest_revid: None,
            latest_logid: None,
        });
        let engine = engine(remote, config().with_verify(true));

        let report = engine.sync().unwrap();
        assert_eq!(
            report.drift.drift,
            vec![Drift::PageCount { local: 0, remote: 5 }]
        );
        // drift never fails the pass
        assert!(report.is_complete());
        assert_eq!(engine.stats().drift_reported, 1);
    }

    #[test]
    fn report_serializes() {
        let engine = engine(MockRemote::new(), config().with_streams([StreamKind::Tags]));
        let report = engine.sync().unwrap();
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["streams"][0]["stream"], "tags");
        assert_eq!(json["streams"][0]["inserted"], 0);
        assert!(json["streams"][0]["failure"].is_null());
    }
}
