//! Streams applied out of step with each other.
//!
//! A revisions batch read before another stream's pass and applied
//! after it must not undo what that pass wrote.

use wikimirror_protocol::{StreamKind, TagTarget, Visibility};
use wikimirror_store::CheckpointStore;
use wikimirror_sync::{Batch, StreamApplier, StreamReader};
use wikimirror_testkit::prelude::*;

/// Reads the next revisions batch without applying it.
fn read_revisions(mirror: &TestMirror, wiki: &Arc<FakeWiki>) -> Batch {
    let config = test_config();
    let checkpoint = mirror.load(StreamKind::Revisions).unwrap();
    let mut reader = StreamReader::new(
        &**wiki,
        StreamKind::Revisions,
        &config.retry,
        config.batch_size,
        checkpoint.as_ref(),
    );
    reader.next().expect("no revisions batch").unwrap()
}

fn apply_revisions(mirror: &TestMirror, wiki: &Arc<FakeWiki>, batch: &Batch) {
    let config = test_config();
    let outcome = StreamApplier::new(StreamKind::Revisions, &mirror.mirror, &**wiki, &config)
        .apply_batch(&batch.records)
        .unwrap();
    assert!(outcome.is_complete());
}

fn fresh_copy(wiki: &Arc<FakeWiki>) -> MirrorSnapshot {
    let mirror = TestMirror::memory();
    assert!(mirror.sync(wiki).is_complete());
    mirror.snapshot()
}

#[test]
fn stale_revision_does_not_revive_a_deleted_page() {
    let wiki = Arc::new(FakeWiki::new());
    let page = wiki.create_page("Alpha", "text");
    let mirror = TestMirror::memory();
    assert!(mirror.sync(&wiki).is_complete());

    let edit = wiki.edit_page(page, "edited");
    let batch = read_revisions(&mirror, &wiki);
    assert!(!batch.records.is_empty());

    wiki.delete_page(page, false);
    let log_only = test_config().with_streams([StreamKind::LogEvents]);
    assert!(mirror.sync_with(&wiki, log_only).is_complete());
    assert!(mirror.revision(edit).unwrap().unwrap().archived);

    apply_revisions(&mirror, &wiki, &batch);
    let revision = mirror.revision(edit).unwrap().unwrap();
    assert!(revision.archived);
    assert_eq!(revision.page_id, page);
    assert!(!mirror.page(page).unwrap().unwrap().is_live());

    assert!(mirror.sync(&wiki).is_complete());
    assert!(mirror.revision(edit).unwrap().unwrap().archived);
    assert_same_state(&mirror.snapshot(), &fresh_copy(&wiki));
}

#[test]
fn stale_revision_does_not_undo_a_suppression() {
    let wiki = Arc::new(FakeWiki::new());
    let page = wiki.create_page("Alpha", "text");
    let mirror = TestMirror::memory();
    assert!(mirror.sync(&wiki).is_complete());

    let edit = wiki.edit_page(page, "edited");
    let batch = read_revisions(&mirror, &wiki);
    wiki.set_revision_visibility(&[edit], Visibility::from_bits(Visibility::ALL));

    let log_only = test_config().with_streams([StreamKind::LogEvents]);
    assert!(mirror.sync_with(&wiki, log_only).is_complete());
    apply_revisions(&mirror, &wiki, &batch);
    assert_eq!(
        mirror.revision(edit).unwrap().unwrap().visibility,
        Visibility::from_bits(Visibility::ALL)
    );

    assert!(mirror.sync(&wiki).is_complete());
    assert_same_state(&mirror.snapshot(), &fresh_copy(&wiki));
}

#[test]
fn stale_tag_list_does_not_restore_a_removed_tag() {
    let wiki = Arc::new(FakeWiki::new());
    let page = wiki.create_page("Alpha", "text");
    wiki.define_tag("review");
    let mirror = TestMirror::memory();
    assert!(mirror.sync(&wiki).is_complete());

    let edit = wiki.edit_page(page, "edited");
    wiki.tag_revision(edit, &["review"], &[]);
    let batch = read_revisions(&mirror, &wiki);

    wiki.tag_revision(edit, &[], &["review"]);
    let tags_only = test_config().with_streams([StreamKind::Tags]);
    assert!(mirror.sync_with(&wiki, tags_only).is_complete());

    apply_revisions(&mirror, &wiki, &batch);
    assert!(mirror.tags_of(TagTarget::Revision(edit)).unwrap().is_empty());

    assert!(mirror.sync(&wiki).is_complete());
    assert!(mirror.tags_of(TagTarget::Revision(edit)).unwrap().is_empty());
    assert_same_state(&mirror.snapshot(), &fresh_copy(&wiki));
}

#[test]
fn parallel_passes_keep_log_replay_results() {
    let wiki = Arc::new(FakeWiki::new());
    let mirror = TestMirror::memory();
    let parallel = test_config().with_parallel_streams(true);
    for round in 0..4 {
        let page = wiki.create_page(&format!("Page {round}"), "text");
        wiki.edit_page(page, "edited");
        wiki.delete_page(page, round % 2 == 1);
        assert!(mirror.sync_with(&wiki, parallel.clone()).is_complete());
    }
    assert!(mirror
        .revisions_of(1)
        .unwrap()
        .iter()
        .all(|revision| revision.archived));
    assert_same_state(&mirror.snapshot(), &fresh_copy(&wiki));
}
