//! Failure handling: bad records, flaky remotes, purged history and
//! broken storage.

use wikimirror_protocol::StreamKind;
use wikimirror_store::CheckpointStore;
use wikimirror_sync::{SyncError, SyncState};
use wikimirror_testkit::prelude::*;

fn populated_wiki() -> Arc<FakeWiki> {
    let wiki = Arc::new(FakeWiki::new());
    for title in ["Alpha", "Beta", "Gamma", "Delta"] {
        let page = wiki.create_page(title, "text");
        wiki.edit_page(page, &format!("{title} edited"));
    }
    wiki
}

fn fresh_copy(wiki: &Arc<FakeWiki>) -> MirrorSnapshot {
    let mirror = TestMirror::memory();
    assert!(mirror.sync(wiki).is_complete());
    mirror.snapshot()
}

#[test]
fn unknown_log_type_stops_only_the_log_stream() {
    let wiki = Arc::new(FakeWiki::new());
    let first = wiki.create_page("Alpha", "text");
    let applied = wiki.last_log_id().unwrap();
    let bad = wiki.inject_log_event("mystery", "thing", Some(first));
    wiki.edit_page(first, "more");
    let second = wiki.create_page("Beta", "text");

    let mirror = TestMirror::memory();
    let report = mirror.sync(&wiki);
    assert!(!report.is_complete());

    let log = report.stream(StreamKind::LogEvents).unwrap();
    assert!(matches!(
        log.failure,
        Some(SyncError::Unprocessable { id: Some(id), .. }) if id == bad
    ));
    assert_eq!(log.checkpoint.as_ref().unwrap().position.id, applied);
    assert!(mirror.log_event(applied).unwrap().is_some());
    assert!(mirror.log_event(bad).unwrap().is_none());

    for stream in [StreamKind::Pages, StreamKind::Revisions, StreamKind::Tags, StreamKind::Restrictions] {
        assert!(report.stream(stream).unwrap().is_complete(), "{stream} stopped");
    }
    assert!(mirror.page(second).unwrap().unwrap().is_live());
    assert_eq!(mirror.revisions_of(first).unwrap().len(), 2);

    // the stream stays parked on the record until it becomes processable
    let again = mirror.sync(&wiki);
    let log = again.stream(StreamKind::LogEvents).unwrap();
    assert!(log.failure.is_some());
    assert_eq!(mirror.load(StreamKind::LogEvents).unwrap().unwrap().position.id, applied);
}

#[test]
fn engine_state_follows_stream_failures() {
    let wiki = Arc::new(FakeWiki::new());
    let page = wiki.create_page("Alpha", "text");
    wiki.inject_log_event("mystery", "thing", Some(page));

    let mirror = TestMirror::memory();
    let engine = mirror.engine(&wiki, test_config());
    assert_eq!(engine.state(), SyncState::Idle);
    engine.sync().unwrap();
    assert_eq!(engine.state(), SyncState::Error);
    let stats = engine.stats();
    assert_eq!(stats.passes_completed, 1);
    assert_eq!(stats.stream_failures, 1);
    assert!(stats.last_error.unwrap().starts_with("logevents"));
}

#[test]
fn transient_failures_are_retried() {
    let wiki = populated_wiki();
    wiki.fail_next(3);

    let mirror = TestMirror::memory();
    let report = mirror.sync(&wiki);
    assert!(report.is_complete());
    assert_same_state(&mirror.snapshot(), &fresh_copy(&wiki));
}

#[test]
fn outage_keeps_checkpoints_and_recovers() {
    let wiki = populated_wiki();
    let mirror = TestMirror::memory();
    mirror.sync(&wiki);
    let committed = mirror.all().unwrap();

    let page = wiki.create_page("Epsilon", "text");
    wiki.fail_next(1_000);
    let report = mirror.sync(&wiki);
    assert!(!report.is_complete());
    assert!(report.streams.iter().all(|stream| stream.failure.is_some()));
    assert!(report.drift.incomplete);
    assert_eq!(mirror.all().unwrap(), committed);
    assert!(mirror.page(page).unwrap().is_none());

    wiki.fail_next(0);
    let report = mirror.sync(&wiki);
    assert!(report.is_complete());
    assert!(mirror.page(page).unwrap().unwrap().is_live());
    assert_same_state(&mirror.snapshot(), &fresh_copy(&wiki));
}

#[test]
fn repeated_boundary_records_are_applied_once() {
    let wiki = populated_wiki();
    let mirror = TestMirror::memory();
    wiki.duplicate_page_boundaries(true);
    let report = mirror.sync(&wiki);
    assert!(report.is_complete());
    let revisions = report.stream(StreamKind::Revisions).unwrap();
    assert_eq!(revisions.counts.inserted, 8);

    wiki.duplicate_page_boundaries(false);
    assert_same_state(&mirror.snapshot(), &fresh_copy(&wiki));
}

#[test]
fn purged_change_list_restarts_from_the_oldest_record() {
    let wiki = populated_wiki();
    let mirror = TestMirror::memory();
    mirror.sync(&wiki);

    wiki.edit_page(1, "lost to the purge");
    wiki.purge_recent_changes();
    let latest = wiki.edit_page(1, "after the purge");

    let report = mirror.sync(&wiki);
    assert!(report.is_complete());
    assert_eq!(mirror.page(1).unwrap().unwrap().latest_revision, Some(latest));
    assert_same_state(&mirror.snapshot(), &fresh_copy(&wiki));
}

#[test]
fn storage_failure_aborts_the_pass() {
    let wiki = populated_wiki();
    let mirror = TestMirror::on_disk();
    mirror.sync(&wiki);
    let before = mirror.load(StreamKind::Revisions).unwrap();

    wiki.edit_page(1, "unsaved");
    mirror.drop_table("revisions");
    let engine = mirror.engine(&wiki, test_config());
    let err = engine.sync().unwrap_err();
    assert!(matches!(err, SyncError::Store(_)), "{err}");
    assert!(err.is_fatal());
    assert_eq!(engine.state(), SyncState::Error);
    assert_eq!(engine.stats().passes_failed, 1);
    assert_eq!(mirror.load(StreamKind::Revisions).unwrap(), before);
}

#[test]
fn corrupt_checkpoint_replays_the_stream() {
    let wiki = populated_wiki();
    let mirror = TestMirror::on_disk();
    mirror.sync(&wiki);

    mirror.corrupt_checkpoint(StreamKind::Revisions);
    wiki.edit_page(2, "after corruption");
    let report = mirror.sync(&wiki);
    assert!(report.is_complete());
    let revisions = report.stream(StreamKind::Revisions).unwrap();
    assert_eq!(revisions.counts.inserted, 1);
    assert!(revisions.counts.unchanged >= 8);
    assert!(mirror.load(StreamKind::Revisions).unwrap().is_some());
    assert_same_state(&mirror.snapshot(), &fresh_copy(&wiki));
}

#[test]
fn parallel_streams_reach_the_same_state() {
    let wiki = populated_wiki();
    wiki.move_page(1, "Omega", false);
    wiki.define_tag("review");
    wiki.tag_revision(wiki.latest_revision(2).unwrap(), &["review"], &[]);
    wiki.protect(3, Some("sysop"));

    let mirror = TestMirror::memory();
    let engine = mirror.engine(&wiki, test_config().with_parallel_streams(true));
    let report = engine.sync().unwrap();
    assert!(report.is_complete());
    assert_eq!(report.streams.len(), StreamKind::ALL.len());
    assert_eq!(engine.state(), SyncState::Synced);
    assert_same_state(&mirror.snapshot(), &fresh_copy(&wiki));
}

#[test]
fn selected_streams_leave_others_untouched() {
    let wiki = populated_wiki();
    let mirror = TestMirror::memory();
    let config = test_config().with_streams([StreamKind::Pages]);
    let report = mirror.engine(&wiki, config).sync().unwrap();
    assert_eq!(report.streams.len(), 1);
    assert_eq!(mirror.stats().unwrap().live_pages, 4);
    assert!(mirror.load(StreamKind::Revisions).unwrap().is_none());
}
