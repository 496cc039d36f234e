//! Structural transitions mirrored from a simulated wiki.

use wikimirror_protocol::{StreamKind, TagTarget, Visibility};
use wikimirror_store::{ApplyOutcome, PageState};
use wikimirror_testkit::prelude::*;

fn wiki() -> Arc<FakeWiki> {
    Arc::new(FakeWiki::new())
}

#[test]
fn move_keeps_identity_and_history() {
    let wiki = wiki();
    let page = wiki.create_page("Alpha", "text");
    wiki.edit_page(page, "more text");
    let mirror = TestMirror::memory();
    assert!(mirror.sync(&wiki).is_complete());

    let redirect = wiki.move_page(page, "Beta", true).unwrap();
    let report = mirror.sync(&wiki);
    assert!(report.is_complete());
    assert!(report.drift.is_clean(), "{:?}", report.drift);

    let row = mirror.page(page).unwrap().unwrap();
    assert_eq!(row.title, "Beta");
    assert!(row.is_live());
    assert_eq!(row.latest_revision, wiki.latest_revision(page));
    // create, edit and the null revision of the move
    assert_eq!(mirror.revisions_of(page).unwrap().len(), 3);

    let left = mirror.page(redirect).unwrap().unwrap();
    assert_eq!(left.title, "Alpha");
    assert!(left.is_redirect);
    assert_eq!(
        mirror.live_page_by_title(0, "Alpha").unwrap().unwrap().page_id,
        redirect
    );
}

#[test]
fn move_back_over_redirect_retires_it() {
    let wiki = wiki();
    let page = wiki.create_page("Alpha", "text");
    let mirror = TestMirror::memory();
    mirror.sync(&wiki);

    let redirect = wiki.move_page(page, "Beta", true).unwrap();
    mirror.sync(&wiki);
    wiki.move_page(page, "Alpha", false);
    let report = mirror.sync(&wiki);
    assert!(report.is_complete());

    assert_eq!(mirror.page(page).unwrap().unwrap().title, "Alpha");
    let retired = mirror.page(redirect).unwrap().unwrap();
    assert_eq!(retired.state(), PageState::Deleted);
    assert!(!retired.is_redirect);
    assert!(mirror
        .revisions_of(redirect)
        .unwrap()
        .iter()
        .all(|revision| revision.archived));
}

#[test]
fn full_merge_forwards_the_source() {
    let wiki = wiki();
    let old = wiki.create_page("Old", "one");
    wiki.edit_page(old, "two");
    let new = wiki.create_page("New", "three");
    let mirror = TestMirror::memory();
    mirror.sync(&wiki);

    assert_eq!(wiki.merge_history(old, new), 2);
    let report = mirror.sync(&wiki);
    assert!(report.is_complete());

    assert_eq!(mirror.page(old).unwrap().unwrap().state(), PageState::Merged(new));
    assert_eq!(mirror.resolve_page(old).unwrap().unwrap().page_id, new);
    let ids: Vec<u64> = mirror
        .revisions_of(new)
        .unwrap()
        .iter()
        .map(|revision| revision.rev_id)
        .collect();
    assert_eq!(ids, wiki.revisions_of(new));
    assert!(mirror.revisions_of(old).unwrap().is_empty());
}

#[test]
fn partial_merge_keeps_the_source_live() {
    let wiki = wiki();
    let source = wiki.create_page("Source", "one");
    let dest = wiki.create_page("Dest", "two");
    let newer = wiki.edit_page(source, "three");
    let mirror = TestMirror::memory();
    mirror.sync(&wiki);

    assert_eq!(wiki.merge_history(source, dest), 1);
    assert!(mirror.sync(&wiki).is_complete());

    let row = mirror.page(source).unwrap().unwrap();
    assert!(row.is_live());
    assert_eq!(row.latest_revision, Some(newer));
    assert_eq!(mirror.revision(1).unwrap().unwrap().page_id, dest);
    assert_eq!(mirror.live_revision_count(dest).unwrap(), 2);
    assert_eq!(mirror.live_revision_count(source).unwrap(), 1);
}

#[test]
fn merge_seen_only_after_the_fact() {
    let wiki = wiki();
    let old = wiki.create_page("Old", "one");
    let new = wiki.create_page("New", "two");
    wiki.merge_history(old, new);

    let mirror = TestMirror::memory();
    assert!(mirror.sync(&wiki).is_complete());
    let row = mirror.page(old).unwrap().unwrap();
    assert_eq!(row.state(), PageState::Merged(new));
    assert_eq!(row.title, "Old");
    assert_eq!(mirror.revision(1).unwrap().unwrap().page_id, new);
}

#[test]
fn delete_and_undelete() {
    let wiki = wiki();
    let page = wiki.create_page("Alpha", "text");
    wiki.protect(page, Some("sysop"));
    let mirror = TestMirror::memory();
    mirror.sync(&wiki);
    assert_eq!(mirror.restrictions_of(page).unwrap().len(), 2);

    wiki.delete_page(page, false);
    assert!(mirror.sync(&wiki).is_complete());
    let row = mirror.page(page).unwrap().unwrap();
    assert_eq!(row.state(), PageState::Deleted);
    assert!(mirror.restrictions_of(page).unwrap().is_empty());
    let rev = wiki.latest_revision(page).unwrap();
    assert!(mirror.revision(rev).unwrap().unwrap().archived);
    assert_eq!(mirror.stats().unwrap().live_pages, 0);

    wiki.undelete_page(page);
    let report = mirror.sync(&wiki);
    assert!(report.is_complete());
    assert!(report.drift.is_clean(), "{:?}", report.drift);
    assert!(mirror.page(page).unwrap().unwrap().is_live());
    assert!(!mirror.revision(rev).unwrap().unwrap().archived);

    // pages and revisions end as if the page had never been deleted
    let control = self::wiki();
    let kept = control.create_page("Alpha", "text");
    control.protect(kept, Some("sysop"));
    let untouched = TestMirror::memory();
    assert!(untouched.sync(&control).is_complete());
    let (restored, never_deleted) = (mirror.snapshot(), untouched.snapshot());
    for table in ["pages", "revisions"] {
        assert_eq!(restored.table(table), never_deleted.table(table), "{table} differ");
    }
}

#[test]
fn suppressed_deletion_hides_every_field() {
    let wiki = wiki();
    let page = wiki.create_page("Alpha", "text");
    let mirror = TestMirror::memory();
    mirror.sync(&wiki);

    wiki.delete_page(page, true);
    mirror.sync(&wiki);
    let rev = wiki.latest_revision(page).unwrap();
    let revision = mirror.revision(rev).unwrap().unwrap();
    assert_eq!(revision.visibility.bits(), Visibility::ALL);
    let event = mirror.log_event(wiki.last_log_id().unwrap()).unwrap().unwrap();
    assert_eq!(event.log_type, "suppress");
}

#[test]
fn title_reuse_keeps_identities_apart() {
    let wiki = wiki();
    let first = wiki.create_page("Alpha", "first");
    wiki.delete_page(first, false);
    let second = wiki.create_page("Alpha", "second");

    let mirror = TestMirror::memory();
    assert!(mirror.sync(&wiki).is_complete());
    assert_eq!(
        mirror.live_page_by_title(0, "Alpha").unwrap().unwrap().page_id,
        second
    );
    let retired = mirror.page(first).unwrap().unwrap();
    assert_eq!(retired.state(), PageState::Deleted);
    assert_eq!(retired.title, "Alpha");
    assert_eq!(mirror.revisions_of(first).unwrap().len(), 1);
}

#[test]
fn swapped_titles_are_exchanged() {
    let wiki = wiki();
    let a = wiki.create_page("Alpha", "a");
    let b = wiki.create_page("Beta", "b");
    let mirror = TestMirror::memory();
    mirror.sync(&wiki);

    wiki.move_page(a, "Gamma", false);
    wiki.move_page(b, "Alpha", false);
    wiki.move_page(a, "Beta", false);
    let report = mirror.sync(&wiki);
    assert!(report.is_complete());

    assert_eq!(mirror.page(a).unwrap().unwrap().title, "Beta");
    assert_eq!(mirror.page(b).unwrap().unwrap().title, "Alpha");
    assert_eq!(mirror.stats().unwrap().live_pages, 2);
}

#[test]
fn tag_updates_are_idempotent() {
    let wiki = wiki();
    let page = wiki.create_page("Alpha", "text");
    let rev = wiki.latest_revision(page).unwrap();
    wiki.define_tag("review");
    wiki.tag_revision(rev, &["review"], &[]);

    let mirror = TestMirror::memory();
    mirror.sync(&wiki);
    assert_eq!(mirror.tags_of(TagTarget::Revision(rev)).unwrap(), vec!["review"]);
    assert!(mirror
        .tag_definitions()
        .unwrap()
        .iter()
        .any(|tag| tag.name == "review"));

    // a pass with nothing new writes nothing
    let again = mirror.sync(&wiki);
    let counts = again.counts();
    assert_eq!(counts.inserted + counts.updated, 0);

    wiki.tag_revision(rev, &[], &["review"]);
    let report = mirror.sync(&wiki);
    assert_eq!(report.stream(StreamKind::Tags).unwrap().counts.updated, 1);
    assert!(mirror.tags_of(TagTarget::Revision(rev)).unwrap().is_empty());
}

#[test]
fn visibility_changes_are_mirrored() {
    let wiki = wiki();
    let page = wiki.create_page("Alpha", "text");
    let rev = wiki.latest_revision(page).unwrap();
    let mirror = TestMirror::memory();
    mirror.sync(&wiki);

    let comment = Visibility::from_bits(Visibility::COMMENT);
    wiki.set_revision_visibility(&[rev], comment);
    wiki.set_event_visibility(&[1], comment);
    assert!(mirror.sync(&wiki).is_complete());
    assert_eq!(mirror.revision(rev).unwrap().unwrap().visibility, comment);
    assert_eq!(mirror.log_event(1).unwrap().unwrap().visibility, comment);

    wiki.set_revision_visibility(&[rev], Visibility::VISIBLE);
    mirror.sync(&wiki);
    assert!(mirror.revision(rev).unwrap().unwrap().visibility.is_visible());
}

#[test]
fn protection_changes_follow_the_remote() {
    let wiki = wiki();
    let page = wiki.create_page("Alpha", "text");
    let mirror = TestMirror::memory();
    mirror.sync(&wiki);

    wiki.protect(page, Some("autoconfirmed"));
    mirror.sync(&wiki);
    let restrictions = mirror.restrictions_of(page).unwrap();
    assert_eq!(restrictions.len(), 2);
    assert!(restrictions.iter().all(|r| r.level == "autoconfirmed" && r.expiry.is_none()));

    wiki.protect(page, None);
    let report = mirror.sync(&wiki);
    assert_eq!(
        report.stream(StreamKind::Restrictions).unwrap().counts.updated,
        1
    );
    assert!(mirror.restrictions_of(page).unwrap().is_empty());
}

#[test]
fn title_protection_without_a_page() {
    let wiki = wiki();
    wiki.protect_title(0, "Future", Some("sysop"));
    let beta = wiki.create_page("Beta", "text");
    wiki.protect(beta, Some("sysop"));

    let mirror = TestMirror::memory();
    let report = mirror.sync(&wiki);
    assert!(report.is_complete(), "{report:?}");
    assert!(report.stream(StreamKind::Restrictions).unwrap().is_complete());
    assert_eq!(mirror.restrictions_of(beta).unwrap().len(), 2);
    let held = mirror.title_protection(0, "Future").unwrap().unwrap();
    assert_eq!(held.level, "sysop");
    assert!(held.expiry.is_none());
    assert_eq!(mirror.stats().unwrap().protected_titles, 1);

    wiki.protect_title(0, "Future", Some("autoconfirmed"));
    assert!(mirror.sync(&wiki).is_complete());
    assert_eq!(
        mirror.title_protection(0, "Future").unwrap().unwrap().level,
        "autoconfirmed"
    );

    wiki.create_page("Future", "now it exists");
    assert!(mirror.sync(&wiki).is_complete());
    assert!(mirror.title_protection(0, "Future").unwrap().is_none());
    assert!(mirror.protected_titles().unwrap().is_empty());
}

#[test]
fn unchanged_wiki_is_unchanged_mirror() {
    let wiki = wiki();
    let page = wiki.create_page("Alpha", "text");
    wiki.move_page(page, "Beta", true);
    let mirror = TestMirror::memory();
    mirror.sync(&wiki);
    let before = mirror.snapshot();

    let report = mirror.sync(&wiki);
    assert!(report
        .streams
        .iter()
        .all(|stream| stream.counts.inserted + stream.counts.updated == 0));
    assert_same_state(&before, &mirror.snapshot());
    assert_eq!(
        mirror.upsert_page(&wikimirror_protocol::PageInfo {
            page_id: page,
            namespace: 0,
            title: "Beta".into(),
            is_redirect: false,
            latest_revision: wiki.latest_revision(page),
            length: Some(4),
            content_model: Some("wikitext".into()),
        })
        .unwrap(),
        ApplyOutcome::Unchanged
    );
}
