//! Change-stream readers.
//!
//! A `StreamReader` turns the paginated listing of one stream into a
//! lazy sequence of validated batches, starting strictly after the
//! stream's checkpoint.
//!
//! ## Recovery
//!
//! - Retryable failures re-request the same continuation token with
//!   exponential backoff, up to the configured attempt count.
//! - A rejected continuation token falls back to listing from the
//!   checkpoint position, once.
//! - A purged start position restarts the listing at the beginning of
//!   the remote feed.
//!
//! Listings are inclusive of the start timestamp and adjacent pages may
//! repeat their boundary record, so the reader drops records at or
//! before the checkpoint and records already seen on the previous page.

use crate::config::RetryConfig;
use crate::error::{SyncError, SyncResult};
use crate::transport::RemoteWiki;
use std::collections::HashSet;
use std::thread;
use tracing::{debug, warn};
use wikimirror_protocol::{ChangeRecord, Checkpoint, ListPage, ListQuery, Position, StreamKind};

/// One page of a stream, validated and de-duplicated.
#[derive(Debug, Clone)]
pub struct Batch {
    /// Records in ascending stream order.
    pub records: Vec<ChangeRecord>,
    /// Token for the page after this one; `None` on the last page.
    pub continuation: Option<String>,
}

/// Reads one change stream from a checkpoint until it is exhausted.
pub struct StreamReader<'a, R: RemoteWiki + ?Sized> {
    remote: &'a R,
    stream: StreamKind,
    retry: &'a RetryConfig,
    limit: u32,
    /// Records at or before this position are already mirrored.
    floor: Option<Position>,
    since: Option<Position>,
    continuation: Option<String>,
    previous_keys: HashSet<u64>,
    fell_back: bool,
    finished: bool,
    retries: u32,
}

impl<'a, R: RemoteWiki + ?Sized> StreamReader<'a, R> {
    /// Creates a reader resuming from `checkpoint`.
    pub fn new(
        remote: &'a R,
        stream: StreamKind,
        retry: &'a RetryConfig,
        limit: u32,
        checkpoint: Option<&Checkpoint>,
    ) -> Self {
        let floor = checkpoint.map(|cp| cp.position);
        Self {
            remote,
            stream,
            retry,
            limit: limit.max(1),
            floor,
            since: floor,
            continuation: checkpoint.and_then(|cp| cp.continuation.clone()),
            previous_keys: HashSet::new(),
            fell_back: false,
            finished: false,
            retries: 0,
        }
    }

    /// Returns the stream this reader reads.
    pub fn stream(&self) -> StreamKind {
        self.stream
    }

    /// Returns how many requests were retried so far.
    pub fn retries(&self) -> u32 {
        self.retries
    }

    fn list(&self, query: &ListQuery) -> SyncResult<ListPage<ChangeRecord>> {
        let remote = self.remote;
        Ok(match self.stream {
            StreamKind::Pages => remote.list_changed_pages(query)?.map(ChangeRecord::page),
            StreamKind::Revisions => remote.list_revisions(query)?.map(ChangeRecord::revision),
            StreamKind::LogEvents => remote.list_log_events(query)?.map(ChangeRecord::log_event),
            StreamKind::Tags => remote.list_tag_changes(query)?.map(ChangeRecord::tag),
            StreamKind::Restrictions => remote
                .list_restriction_changes(query)?
                .map(ChangeRecord::restriction),
        })
    }

    /// Fetches the next page, applying the recovery rules.
    fn fetch(&mut self) -> SyncResult<ListPage<ChangeRecord>> {
        let mut attempt = 0;
        loop {
            let query = ListQuery::new(self.since, self.limit)
                .with_continuation(self.continuation.clone());
            match self.list(&query) {
                Ok(page) => return Ok(page),
                Err(err) if err.is_retryable() && attempt + 1 < self.retry.max_attempts => {
                    attempt += 1;
                    self.retries += 1;
                    let delay = self.retry.delay_for_attempt(attempt);
                    warn!(
                        stream = %self.stream,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "retrying listing request"
                    );
                    thread::sleep(delay);
                }
                Err(SyncError::InvalidContinuation)
                    if self.continuation.is_some() && !self.fell_back =>
                {
                    warn!(
                        stream = %self.stream,
                        "continuation token rejected, listing from checkpoint"
                    );
                    self.fell_back = true;
                    self.continuation = None;
                    self.since = self.floor;
                }
                Err(SyncError::HistoryPurged { .. })
                    if self.since.is_some() || self.continuation.is_some() =>
                {
                    warn!(
                        stream = %self.stream,
                        "remote history purged past checkpoint, restarting from the oldest retained record"
                    );
                    self.since = None;
                    self.continuation = None;
                }
                Err(err) => return Err(err),
            }
        }
    }
}

impl<R: RemoteWiki + ?Sized> Iterator for StreamReader<'_, R> {
    type Item = SyncResult<Batch>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }
        let page = match self.fetch() {
            Ok(page) => page,
            Err(err) => {
                self.finished = true;
                return Some(Err(err));
            }
        };

        let received = page.items.len();
        let keys: HashSet<u64> = page.items.iter().filter_map(ChangeRecord::key).collect();
        let mut seen = HashSet::new();
        let records: Vec<ChangeRecord> = page
            .items
            .into_iter()
            .filter(|record| match record.key() {
                Some(key) => !self.previous_keys.contains(&key) && seen.insert(key),
                None => true,
            })
            .filter(|record| {
                record
                    .position()
                    .map_or(true, |position| position.is_after(self.floor.as_ref()))
            })
            .collect();
        self.previous_keys = keys;

        debug!(
            stream = %self.stream,
            received,
            kept = records.len(),
            more = page.continuation.is_some(),
            "read page"
        );

        self.continuation = page.continuation.clone();
        if page.continuation.is_none() {
            self.finished = true;
        }
        Some(Ok(Batch {
            records,
            continuation: page.continuation,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{MockRemote, MockResponse};
    use chrono::{TimeZone, Utc};
    use proptest::prelude::*;
    use wikimirror_protocol::RawLogEvent;

    fn event(id: u64, second: u32) -> RawLogEvent {
        RawLogEvent {
            logid: Some(id),
            logpage: Some(1),
            ns: Some(0),
            title: Some("A".into()),
            log_type: Some("create".into()),
            action: Some("create".into()),
            timestamp: Some(format!("2024-01-01T00:00:{second:02}Z")),
            ..RawLogEvent::default()
        }
    }

    fn position(id: u64, second: u32) -> Position {
        Position::new(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, second).unwrap(), id)
    }

    fn keys(batch: &Batch) -> Vec<u64> {
        batch.records.iter().filter_map(ChangeRecord::key).collect()
    }

    fn events(page: Vec<RawLogEvent>, next: Option<&str>) -> MockResponse {
        MockResponse::LogEvents(ListPage {
            items: page,
            continuation: next.map(str::to_string),
        })
    }

    #[test]
    fn follows_continuation_until_exhausted() {
        let remote = MockRemote::new();
        remote.push_response(StreamKind::LogEvents, events(vec![event(1, 1)], Some("a")));
        remote.push_response(StreamKind::LogEvents, events(vec![event(2, 2)], None));
        let retry = RetryConfig::no_retry();

        let reader = StreamReader::new(&remote, StreamKind::LogEvents, &retry, 10, None);
        let batches: Vec<Batch> = reader.map(Result::unwrap).collect();
        assert_eq!(batches.len(), 2);
        assert_eq!(batches[0].continuation.as_deref(), Some("a"));
        assert_eq!(keys(&batches[1]), vec![2]);

        let queries = remote.queries();
        assert_eq!(queries[1].1.continuation.as_deref(), Some("a"));
    }

    #[test]
    fn drops_records_at_or_before_checkpoint() {
        let remote = MockRemote::new();
        remote.push_response(
            StreamKind::LogEvents,
            events(vec![event(3, 5), event(4, 5), event(5, 6)], None),
        );
        let retry = RetryConfig::no_retry();
        let checkpoint = Checkpoint::new(StreamKind::LogEvents, position(4, 5));

        let mut reader =
            StreamReader::new(&remote, StreamKind::LogEvents, &retry, 10, Some(&checkpoint));
        let batch = reader.next().unwrap().unwrap();
        assert_eq!(keys(&batch), vec![5]);
        assert_eq!(remote.queries()[0].1.since, Some(position(4, 5)));
        assert!(reader.next().is_none());
    }

    #[test]
    fn drops_boundary_duplicates() {
        let remote = MockRemote::new();
        remote.push_response(
            StreamKind::LogEvents,
            events(vec![event(1, 1), event(2, 2)], Some("a")),
        );
        remote.push_response(
            StreamKind::LogEvents,
            events(vec![event(2, 2), event(3, 3)], None),
        );
        let retry = RetryConfig::no_retry();

        let reader = StreamReader::new(&remote, StreamKind::LogEvents, &retry, 2, None);
        let all: Vec<u64> = reader.flat_map(|b| keys(&b.unwrap())).collect();
        assert_eq!(all, vec![1, 2, 3]);
    }

    #[test]
    fn retries_the_same_token() {
        let remote = MockRemote::new();
        remote.push_response(StreamKind::LogEvents, events(vec![event(1, 1)], Some("a")));
        remote.push_response(StreamKind::LogEvents, MockResponse::Transient);
        remote.push_response(StreamKind::LogEvents, MockResponse::Transient);
        remote.push_response(StreamKind::LogEvents, events(vec![event(2, 2)], None));
        let retry = RetryConfig::immediate(3);

        let mut reader = StreamReader::new(&remote, StreamKind::LogEvents, &retry, 1, None);
        reader.next().unwrap().unwrap();
        let batch = reader.next().unwrap().unwrap();
        assert_eq!(keys(&batch), vec![2]);
        assert_eq!(reader.retries(), 2);

        let queries = remote.queries();
        assert_eq!(queries.len(), 4);
        assert!(queries[1..]
            .iter()
            .all(|(_, q)| q.continuation.as_deref() == Some("a")));
    }

    #[test]
    fn gives_up_after_max_attempts() {
        let remote = MockRemote::new();
        for _ in 0..3 {
            remote.push_response(StreamKind::Tags, MockResponse::Transient);
        }
        let retry = RetryConfig::immediate(3);
        let mut reader = StreamReader::new(&remote, StreamKind::Tags, &retry, 10, None);
        assert!(reader.next().unwrap().unwrap_err().is_retryable());
        assert!(reader.next().is_none());
    }

    #[test]
    fn invalid_continuation_falls_back_to_checkpoint() {
        let remote = MockRemote::new();
        remote.push_response(StreamKind::LogEvents, MockResponse::InvalidContinuation);
        remote.push_response(
            StreamKind::LogEvents,
            events(vec![event(4, 5), event(6, 7)], None),
        );
        let retry = RetryConfig::no_retry();
        let checkpoint = Checkpoint::new(StreamKind::LogEvents, position(4, 5))
            .with_continuation(Some("stale".into()));

        let mut reader =
            StreamReader::new(&remote, StreamKind::LogEvents, &retry, 10, Some(&checkpoint));
        let batch = reader.next().unwrap().unwrap();
        assert_eq!(keys(&batch), vec![6]);

        let queries = remote.queries();
        assert_eq!(queries[0].1.continuation.as_deref(), Some("stale"));
        assert_eq!(queries[1].1.continuation, None);
        assert_eq!(queries[1].1.since, Some(position(4, 5)));
    }

    #[test]
    fn purged_history_restarts_from_feed_start() {
        let remote = MockRemote::new();
        remote.push_response(StreamKind::Pages, MockResponse::HistoryPurged);
        let retry = RetryConfig::no_retry();
        let checkpoint = Checkpoint::new(StreamKind::Pages, position(1, 1));

        let mut reader =
            StreamReader::new(&remote, StreamKind::Pages, &retry, 10, Some(&checkpoint));
        let batch = reader.next().unwrap().unwrap();
        assert!(batch.records.is_empty());
        assert_eq!(remote.queries()[1].1.since, None);
    }

    #[test]
    fn invalid_records_become_unprocessable() {
        let remote = MockRemote::new();
        let mut bad = event(2, 2);
        bad.log_type = Some("frobnicate".into());
        remote.push_response(StreamKind::LogEvents, events(vec![event(1, 1), bad], None));
        let retry = RetryConfig::no_retry();

        let mut reader = StreamReader::new(&remote, StreamKind::LogEvents, &retry, 10, None);
        let batch = reader.next().unwrap().unwrap();
        assert!(!batch.records[0].is_unprocessable());
        assert!(batch.records[1].is_unprocessable());
    }

    proptest! {
        #[test]
        fn page_size_does_not_change_the_sequence(
            count in 1u64..40,
            page_size in 1usize..12,
            overlap in any::<bool>(),
        ) {
            let all: Vec<RawLogEvent> = (1..=count).map(|id| event(id, (id % 60) as u32)).collect();
            let remote = MockRemote::new();
            let chunks: Vec<&[RawLogEvent]> = all.chunks(page_size).collect();
            for (idx, chunk) in chunks.iter().enumerate() {
                let mut items = chunk.to_vec();
                if overlap && idx > 0 {
                    // repeat the previous page's boundary record
                    items.insert(0, chunks[idx - 1][chunks[idx - 1].len() - 1].clone());
                }
                let next = (idx + 1 < chunks.len()).then(|| format!("p{}", idx + 1));
                remote.push_response(StreamKind::LogEvents, events(items, next.as_deref()));
            }
            let retry = RetryConfig::no_retry();
            let reader = StreamReader::new(&remote, StreamKind::LogEvents, &retry, page_size as u32, None);
            let read: Vec<u64> = reader.flat_map(|b| keys(&b.unwrap())).collect();
            prop_assert_eq!(read, (1..=count).collect::<Vec<_>>());
        }
    }
}
