//! Property-based test generators using proptest.
//!
//! Generated histories are sequences of [`WikiStep`]s. Steps refer to
//! pages by index into the pages existing when they run, so every
//! generated sequence is meaningful; steps whose preconditions fail are
//! skipped.

use crate::wiki::{FakePageState, FakeWiki};
use chrono::{DateTime, TimeZone, Utc};
use proptest::prelude::*;
use wikimirror_protocol::{Position, Visibility};

/// Titles generated histories draw from. A small pool makes moves onto
/// redirects and title reuse likely.
pub const TITLE_POOL: &[&str] = &["Alpha", "Beta", "Gamma", "Delta"];

/// Strategy for generating valid page titles.
pub fn title_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[A-Z][a-z0-9 ]{0,15}[a-z0-9]")
        .expect("Invalid regex")
}

/// Strategy for generating stream positions within 2024.
pub fn position_strategy() -> impl Strategy<Value = Position> {
    (0i64..31_536_000, 1u64..1_000_000).prop_map(|(offset, id)| {
        let start: DateTime<Utc> = Utc
            .with_ymd_and_hms(2024, 1, 1, 0, 0, 0)
            .single()
            .expect("valid date");
        Position::new(start + chrono::Duration::seconds(offset), id)
    })
}

/// Tags generated histories draw from.
pub const TAG_POOL: &[&str] = &["review", "bot"];

fn pool_title() -> impl Strategy<Value = String> {
    prop::sample::select(TITLE_POOL).prop_map(str::to_string)
}

/// One mutation of a generated history.
#[derive(Debug, Clone)]
pub enum WikiStep {
    /// Create a page at a title.
    Create {
        /// Title.
        title: String,
    },
    /// Edit a page with text of a given length.
    Edit {
        /// Page index.
        page: usize,
        /// Text length.
        len: usize,
    },
    /// Rename a page.
    Move {
        /// Page index.
        page: usize,
        /// New title.
        title: String,
        /// Leave a redirect at the old title.
        leave_redirect: bool,
    },
    /// Delete a page.
    Delete {
        /// Page index.
        page: usize,
        /// Delete through the suppression log.
        suppress: bool,
    },
    /// Undelete a page.
    Undelete {
        /// Page index.
        page: usize,
    },
    /// Merge the history of one page into another.
    Merge {
        /// Source page index.
        source: usize,
        /// Destination page index.
        dest: usize,
    },
    /// Toggle hiding of comment and user of a page's latest revision.
    HideRevision {
        /// Page index.
        page: usize,
    },
    /// Add or remove a tag on a page's latest revision.
    Tag {
        /// Page index.
        page: usize,
        /// Tag name.
        tag: String,
        /// Add (or remove).
        add: bool,
    },
    /// Protect or unprotect a page.
    Protect {
        /// Page index.
        page: usize,
        /// Level, or `None` to lift protection.
        level: Option<String>,
    },
    /// Protect a title without a page against creation, or lift it.
    ProtectTitle {
        /// Title.
        title: String,
        /// Level, or `None` to lift protection.
        level: Option<String>,
    },
}

impl WikiStep {
    /// Applies the step if its preconditions hold. Returns true if the
    /// wiki changed.
    pub fn apply(&self, wiki: &FakeWiki) -> bool {
        let ids = wiki.page_ids();
        let pick = |index: usize| (!ids.is_empty()).then(|| ids[index % ids.len()]);
        let live = |id: u64| wiki.page_state(id) == Some(FakePageState::Live);

        match self {
            WikiStep::Create { title } => {
                if wiki.live_page_at(0, title).is_some() {
                    return false;
                }
                wiki.create_page(title, &format!("{title} text"));
                true
            }
            WikiStep::Edit { page, len } => match pick(*page).filter(|id| live(*id)) {
                Some(id) => {
                    wiki.edit_page(id, &"x".repeat(*len));
                    true
                }
                None => false,
            },
            WikiStep::Move {
                page,
                title,
                leave_redirect,
            } => {
                let Some(id) = pick(*page).filter(|id| live(*id)) else {
                    return false;
                };
                if wiki.page_title(id).as_deref() == Some(title.as_str()) {
                    return false;
                }
                if let Some(occupant) = wiki.live_page_at(0, title) {
                    if !wiki.is_redirect(occupant) {
                        return false;
                    }
                }
                wiki.move_page(id, title, *leave_redirect);
                true
            }
            WikiStep::Delete { page, suppress } => match pick(*page).filter(|id| live(*id)) {
                Some(id) => {
                    wiki.delete_page(id, *suppress);
                    true
                }
                None => false,
            },
            WikiStep::Undelete { page } => {
                let Some(id) = pick(*page) else {
                    return false;
                };
                if wiki.page_state(id) != Some(FakePageState::Deleted) {
                    return false;
                }
                let Some(title) = wiki.page_title(id) else {
                    return false;
                };
                if wiki.live_page_at(0, &title).is_some() {
                    return false;
                }
                wiki.undelete_page(id);
                true
            }
            WikiStep::Merge { source, dest } => match (pick(*source), pick(*dest)) {
                (Some(source), Some(dest)) if wiki.can_merge(source, dest) => {
                    wiki.merge_history(source, dest);
                    true
                }
                _ => false,
            },
            WikiStep::HideRevision { page } => {
                let Some(rev) = pick(*page)
                    .filter(|id| live(*id))
                    .and_then(|id| wiki.latest_revision(id))
                else {
                    return false;
                };
                let current = wiki.revision_visibility(rev).unwrap_or(Visibility::VISIBLE);
                let hidden = Visibility::COMMENT | Visibility::USER;
                let next = Visibility::from_bits(current.bits() ^ hidden);
                wiki.set_revision_visibility(&[rev], next);
                true
            }
            WikiStep::Tag { page, tag, add } => {
                let Some(rev) = pick(*page)
                    .filter(|id| live(*id))
                    .and_then(|id| wiki.latest_revision(id))
                else {
                    return false;
                };
                let change = [tag.as_str()];
                let none: [&str; 0] = [];
                if *add {
                    wiki.tag_revision(rev, &change, &none).is_some()
                } else {
                    wiki.tag_revision(rev, &none, &change).is_some()
                }
            }
            WikiStep::Protect { page, level } => match pick(*page).filter(|id| live(*id)) {
                Some(id) => {
                    wiki.protect(id, level.as_deref());
                    true
                }
                None => false,
            },
            WikiStep::ProtectTitle { title, level } => {
                if wiki.live_page_at(0, title).is_some()
                    || (level.is_none() && wiki.title_protection(0, title).is_none())
                {
                    return false;
                }
                wiki.protect_title(0, title, level.as_deref());
                true
            }
        }
    }
}

/// Strategy for generating a single step.
pub fn step_strategy() -> impl Strategy<Value = WikiStep> {
    prop_oneof![
        3 => pool_title().prop_map(|title| WikiStep::Create { title }),
        3 => (any::<usize>(), 0usize..40).prop_map(|(page, len)| WikiStep::Edit { page, len }),
        2 => (any::<usize>(), pool_title(), any::<bool>()).prop_map(|(page, title, leave_redirect)| {
            WikiStep::Move { page, title, leave_redirect }
        }),
        1 => (any::<usize>(), prop::bool::weighted(0.2))
            .prop_map(|(page, suppress)| WikiStep::Delete { page, suppress }),
        1 => any::<usize>().prop_map(|page| WikiStep::Undelete { page }),
        1 => (any::<usize>(), any::<usize>()).prop_map(|(source, dest)| WikiStep::Merge { source, dest }),
        1 => any::<usize>().prop_map(|page| WikiStep::HideRevision { page }),
        1 => (any::<usize>(), prop::sample::select(TAG_POOL), any::<bool>())
            .prop_map(|(page, tag, add)| WikiStep::Tag { page, tag: tag.to_string(), add }),
        1 => (any::<usize>(), prop::option::of(Just("sysop".to_string())))
            .prop_map(|(page, level)| WikiStep::Protect { page, level }),
        1 => (pool_title(), prop::option::of(Just("sysop".to_string())))
            .prop_map(|(title, level)| WikiStep::ProtectTitle { title, level }),
    ]
}

/// Strategy for generating a history of up to `max_len` steps. Every
/// history starts by creating a page.
pub fn history_strategy(max_len: usize) -> impl Strategy<Value = Vec<WikiStep>> {
    (pool_title(), prop::collection::vec(step_strategy(), 0..max_len)).prop_map(
        |(title, mut steps)| {
            steps.insert(0, WikiStep::Create { title });
            steps
        },
    )
}
