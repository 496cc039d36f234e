//! Integration tests for page lifecycles on an on-disk mirror.

use chrono::{DateTime, TimeZone, Utc};
use tempfile::tempdir;
use wikimirror_protocol::{Checkpoint, PageInfo, Position, Revision, StreamKind, Visibility};
use wikimirror_store::{ApplyOutcome, CheckpointStore, Mirror, PageState, Tombstone};

fn ts(second: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, second).unwrap()
}

fn page(page_id: u64, title: &str, latest: u64) -> PageInfo {
    PageInfo {
        page_id,
        namespace: 0,
        title: title.to_string(),
        is_redirect: false,
        latest_revision: Some(latest),
        length: Some(latest * 3),
        content_model: Some("wikitext".into()),
    }
}

fn revision(rev_id: u64, page_id: u64, second: u32) -> Revision {
    Revision {
        rev_id,
        page_id,
        parent_id: None,
        timestamp: ts(second),
        user: Some("Editor".into()),
        user_id: Some(2),
        comment: Some("c".into()),
        size: rev_id * 3,
        sha1: None,
        minor: false,
        content_model: Some("wikitext".into()),
        visibility: Visibility::VISIBLE,
        archived: false,
        tags: Vec::new(),
    }
}

#[test]
fn move_preserves_history() {
    let mirror = Mirror::open_in_memory().unwrap();
    mirror.upsert_page(&page(1, "Test 1", 11)).unwrap();
    mirror.upsert_revision(&revision(10, 1, 1)).unwrap();
    mirror.upsert_revision(&revision(11, 1, 2)).unwrap();

    mirror.rename_page(1, 0, "Test 2").unwrap();

    let row = mirror.live_page_by_title(0, "Test 2").unwrap().unwrap();
    assert_eq!(row.page_id, 1);
    let revisions = mirror.revisions_of(1).unwrap();
    assert_eq!(revisions.len(), 2);
    assert_eq!(revisions[0].rev_id, 10);
}

#[test]
fn delete_then_undelete_equals_never_deleted() {
    let untouched = Mirror::open_in_memory().unwrap();
    let cycled = Mirror::open_in_memory().unwrap();
    for mirror in [&untouched, &cycled] {
        mirror.upsert_page(&page(1, "A", 10)).unwrap();
        mirror.upsert_revision(&revision(10, 1, 1)).unwrap();
    }

    cycled.mark_page_deleted(1, false).unwrap();
    assert!(cycled.live_pages().unwrap().is_empty());
    assert_eq!(cycled.page(1).unwrap().unwrap().state(), PageState::Deleted);
    assert!(cycled.revision(10).unwrap().unwrap().archived);

    cycled.mark_page_restored(1).unwrap();
    cycled.upsert_page(&page(1, "A", 10)).unwrap();

    assert_eq!(untouched.dump(true).unwrap(), cycled.dump(true).unwrap());
}

#[test]
fn revision_hidden_before_deletion_stays_hidden() {
    let mirror = Mirror::open_in_memory().unwrap();
    mirror.upsert_page(&page(1, "A", 11)).unwrap();
    mirror.upsert_revision(&revision(10, 1, 1)).unwrap();
    mirror.upsert_revision(&revision(11, 1, 2)).unwrap();
    let hidden = Visibility::from_bits(Visibility::TEXT | Visibility::COMMENT);
    mirror.set_revision_visibility(&[10], hidden).unwrap();

    mirror.mark_page_deleted(1, false).unwrap();
    mirror.mark_page_restored(1).unwrap();

    assert_eq!(mirror.revision(10).unwrap().unwrap().visibility, hidden);
    assert!(mirror.revision(11).unwrap().unwrap().visibility.is_visible());
}

#[test]
fn suppression_hides_every_field() {
    let mirror = Mirror::open_in_memory().unwrap();
    mirror.upsert_page(&page(1, "A", 10)).unwrap();
    mirror.upsert_revision(&revision(10, 1, 1)).unwrap();
    mirror.mark_page_deleted(1, true).unwrap();
    assert_eq!(
        mirror.revision(10).unwrap().unwrap().visibility.bits(),
        Visibility::ALL
    );
}

#[test]
fn merge_keeps_revision_order() {
    let mirror = Mirror::open_in_memory().unwrap();
    mirror.upsert_page(&page(1, "Test 1", 10)).unwrap();
    mirror.upsert_page(&page(2, "Test 2", 20)).unwrap();
    mirror.upsert_revision(&revision(10, 1, 1)).unwrap();
    mirror.upsert_revision(&revision(20, 2, 2)).unwrap();

    let outcome = mirror.merge_page(1, 2, ts(1)).unwrap();
    assert!(outcome.retired);

    let ids: Vec<u64> = mirror
        .revisions_of(2)
        .unwrap()
        .iter()
        .map(|r| r.rev_id)
        .collect();
    assert_eq!(ids, vec![10, 20]);
    assert_eq!(mirror.page(1).unwrap().unwrap().state(), PageState::Merged(2));
    assert_eq!(mirror.resolve_page(1).unwrap().unwrap().title, "Test 2");
    assert_eq!(mirror.stats().unwrap().merged_pages, 1);
}

#[test]
fn merged_row_equals_tombstone() {
    let live = Mirror::open_in_memory().unwrap();
    live.upsert_page(&page(1, "Test 1", 10)).unwrap();
    live.upsert_page(&page(2, "Test 2", 20)).unwrap();
    live.upsert_revision(&revision(10, 1, 1)).unwrap();
    live.upsert_revision(&revision(20, 2, 2)).unwrap();
    live.merge_page(1, 2, ts(1)).unwrap();

    // a mirror that only ever saw the outcome of the merge
    let late = Mirror::open_in_memory().unwrap();
    late.upsert_page(&page(2, "Test 2", 20)).unwrap();
    let mut moved = revision(10, 2, 1);
    moved.page_id = 2;
    late.upsert_revision(&moved).unwrap();
    late.upsert_revision(&revision(20, 2, 2)).unwrap();
    late.insert_tombstone(1, 0, "Test 1", Tombstone::Merged(2))
        .unwrap();

    assert_eq!(live.dump(true).unwrap(), late.dump(true).unwrap());
}

#[test]
fn checkpoints_survive_reopen() {
    let temp = tempdir().unwrap();
    let cp = Checkpoint::new(StreamKind::LogEvents, Position::new(ts(9), 77))
        .with_continuation(Some("20240101000009|77".into()));
    {
        let mirror = Mirror::open(temp.path()).unwrap();
        mirror.commit(&cp).unwrap();
    }
    let mirror = Mirror::open(temp.path()).unwrap();
    assert_eq!(mirror.load(StreamKind::LogEvents).unwrap(), Some(cp));
}

#[test]
fn reapplying_writes_nothing() {
    let mirror = Mirror::open_in_memory().unwrap();
    mirror.upsert_page(&page(1, "A", 10)).unwrap();
    mirror.upsert_revision(&revision(10, 1, 1)).unwrap();
    let before = mirror.dump(true).unwrap();

    assert_eq!(
        mirror.upsert_page(&page(1, "A", 10)).unwrap(),
        ApplyOutcome::Unchanged
    );
    assert_eq!(
        mirror.upsert_revision(&revision(10, 1, 1)).unwrap(),
        ApplyOutcome::Unchanged
    );
    assert_eq!(mirror.rename_page(1, 0, "A").unwrap(), ApplyOutcome::Unchanged);
    assert_eq!(mirror.mark_page_restored(1).unwrap(), ApplyOutcome::Unchanged);
    assert_eq!(before, mirror.dump(true).unwrap());
}
