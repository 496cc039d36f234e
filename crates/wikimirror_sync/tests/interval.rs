//! The mirrored state must not depend on how often passes run.

use proptest::prelude::*;
use wikimirror_protocol::Visibility;
use wikimirror_testkit::prelude::*;

#[test]
fn moves_and_redirects() {
    let snapshot = assert_interval_independent(
        &Scenario::new()
            .step(|wiki| {
                wiki.create_page("Alpha", "text");
            })
            .step(|wiki| {
                wiki.move_page(1, "Beta", true);
            })
            .step(|wiki| {
                wiki.edit_page(1, "edited after the move");
            })
            .step(|wiki| {
                wiki.move_page(1, "Alpha", false);
            }),
    );
    assert_eq!(snapshot.table("pages").len(), 2);
}

#[test]
fn deletion_and_title_reuse() {
    assert_interval_independent(
        &Scenario::new()
            .step(|wiki| {
                wiki.create_page("Alpha", "first");
            })
            .step(|wiki| {
                wiki.delete_page(1, false);
            })
            .step(|wiki| {
                wiki.create_page("Alpha", "second");
            })
            .step(|wiki| {
                wiki.delete_page(2, true);
            })
            .step(|wiki| {
                wiki.undelete_page(1);
            }),
    );
}

#[test]
fn merges() {
    assert_interval_independent(
        &Scenario::new()
            .step(|wiki| {
                wiki.create_page("Source", "one");
            })
            .step(|wiki| {
                wiki.create_page("Dest", "two");
            })
            .step(|wiki| {
                wiki.edit_page(1, "three");
            })
            .step(|wiki| {
                wiki.merge_history(1, 2);
            })
            .step(|wiki| {
                wiki.create_page("Other", "four");
            })
            .step(|wiki| {
                wiki.merge_history(1, 3);
            }),
    );
}

#[test]
fn tags_visibility_and_protection() {
    assert_interval_independent(
        &Scenario::new()
            .step(|wiki| {
                wiki.create_page("Alpha", "text");
                wiki.define_tag("review");
            })
            .step(|wiki| {
                wiki.tag_revision(1, &["review"], &[]);
            })
            .step(|wiki| {
                wiki.protect(1, Some("sysop"));
            })
            .step(|wiki| {
                wiki.set_revision_visibility(&[1], Visibility::from_bits(Visibility::COMMENT));
            })
            .step(|wiki| {
                wiki.tag_revision(1, &[], &["review"]);
                wiki.protect(1, None);
            }),
    );
}

#[test]
fn protected_titles() {
    let snapshot = assert_interval_independent(
        &Scenario::new()
            .step(|wiki| {
                wiki.protect_title(0, "Future", Some("sysop"));
                wiki.protect_title(0, "Later", Some("sysop"));
            })
            .step(|wiki| {
                wiki.protect_title(0, "Future", Some("autoconfirmed"));
                wiki.protect_title(0, "Later", None);
            })
            .step(|wiki| {
                wiki.create_page("Later", "text");
                wiki.move_page(1, "Future", false);
            }),
    );
    assert!(snapshot.table("protected_titles").is_empty());
}

#[test]
fn swapped_titles() {
    assert_interval_independent(
        &Scenario::new()
            .step(|wiki| {
                wiki.create_page("Alpha", "a");
                wiki.create_page("Beta", "b");
            })
            .step(|wiki| {
                wiki.move_page(1, "Gamma", false);
                wiki.move_page(2, "Alpha", false);
                wiki.move_page(1, "Beta", false);
            }),
    );
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(16))]

    #[test]
    fn generated_histories(steps in history_strategy(14)) {
        assert_interval_independent(&Scenario::with_steps(steps));
    }
}
