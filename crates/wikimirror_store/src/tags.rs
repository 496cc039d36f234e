//! Tag associations.
//!
//! A row holds the last known state of one (target, tag) pair. Tag
//! updates flip its `active` flag, and a removal leaves an inactive row
//! behind. Tag lists carried by revision and log event records only add
//! pairs that have no row yet, so a record read before a removal cannot
//! bring the tag back.

use crate::error::StoreResult;
use crate::mirror::Mirror;
use crate::rows::ApplyOutcome;
use rusqlite::{params, Connection};
use wikimirror_protocol::{TagChange, TagTarget};

impl Mirror {
    /// Applies the delta of a tag update.
    pub fn apply_tag_change(&self, change: &TagChange) -> StoreResult<ApplyOutcome> {
        self.write(|tx| {
            let mut changed = false;
            for (tags, active) in [(&change.added, true), (&change.removed, false)] {
                for tag in tags {
                    changed |= tx.execute(
                        "INSERT INTO tag_assignments (target_kind, target_id, tag, active) \
                         VALUES (?1, ?2, ?3, ?4) \
                         ON CONFLICT (target_kind, target_id, tag) \
                         DO UPDATE SET active = excluded.active \
                         WHERE tag_assignments.active != excluded.active",
                        params![change.target.kind(), change.target.id(), tag, active],
                    )? > 0;
                }
            }
            Ok(if changed {
                ApplyOutcome::Updated
            } else {
                ApplyOutcome::Unchanged
            })
        })
    }

    /// Returns the tags applied to a revision or log event, sorted.
    pub fn tags_of(&self, target: TagTarget) -> StoreResult<Vec<String>> {
        self.read(|conn| load_tags(conn, target))
    }
}

pub(crate) fn load_tags(conn: &Connection, target: TagTarget) -> StoreResult<Vec<String>> {
    let mut stmt = conn.prepare_cached(
        "SELECT tag FROM tag_assignments \
         WHERE target_kind = ?1 AND target_id = ?2 AND active = 1 ORDER BY tag",
    )?;
    let tags = stmt
        .query_map(params![target.kind(), target.id()], |r| r.get(0))?
        .collect::<Result<Vec<String>, _>>()?;
    Ok(tags)
}

/// Applies the tags listed on a record. Pairs a tag update already
/// decided are left alone.
pub(crate) fn add_tags(
    conn: &Connection,
    target: TagTarget,
    tags: &[String],
) -> StoreResult<ApplyOutcome> {
    let mut changed = false;
    for tag in tags {
        changed |= conn.execute(
            "INSERT OR IGNORE INTO tag_assignments (target_kind, target_id, tag, active) \
             VALUES (?1, ?2, ?3, 1)",
            params![target.kind(), target.id(), tag],
        )? > 0;
    }
    Ok(if changed {
        ApplyOutcome::Updated
    } else {
        ApplyOutcome::Unchanged
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn change(target: TagTarget, added: &[&str], removed: &[&str]) -> TagChange {
        TagChange {
            change_id: 1,
            timestamp: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
            target,
            added: added.iter().map(|s| s.to_string()).collect(),
            removed: removed.iter().map(|s| s.to_string()).collect(),
        }
    }

    #[test]
    fn applying_same_tag_twice_yields_one_association() {
        let mirror = Mirror::open_in_memory().unwrap();
        let add = change(TagTarget::Revision(5), &["foo"], &[]);
        assert_eq!(mirror.apply_tag_change(&add).unwrap(), ApplyOutcome::Updated);
        assert_eq!(mirror.apply_tag_change(&add).unwrap(), ApplyOutcome::Unchanged);
        assert_eq!(mirror.tags_of(TagTarget::Revision(5)).unwrap(), vec!["foo"]);
    }

    #[test]
    fn removal_drops_association() {
        let mirror = Mirror::open_in_memory().unwrap();
        mirror
            .apply_tag_change(&change(TagTarget::LogEvent(3), &["a", "b"], &[]))
            .unwrap();
        mirror
            .apply_tag_change(&change(TagTarget::LogEvent(3), &[], &["a"]))
            .unwrap();
        assert_eq!(mirror.tags_of(TagTarget::LogEvent(3)).unwrap(), vec!["b"]);
        // revision and log event ids live in separate spaces
        assert!(mirror.tags_of(TagTarget::Revision(3)).unwrap().is_empty());
    }

    #[test]
    fn removal_outlives_a_stale_tag_list() {
        let mirror = Mirror::open_in_memory().unwrap();
        let target = TagTarget::Revision(1);
        let listed = vec!["x".to_string(), "y".to_string()];
        let outcome = mirror.write(|tx| add_tags(tx, target, &listed)).unwrap();
        assert_eq!(outcome, ApplyOutcome::Updated);
        mirror
            .apply_tag_change(&change(target, &[], &["x"]))
            .unwrap();

        // the record still lists "x"; the removal stands
        let outcome = mirror.write(|tx| add_tags(tx, target, &listed)).unwrap();
        assert_eq!(outcome, ApplyOutcome::Unchanged);
        assert_eq!(mirror.tags_of(target).unwrap(), vec!["y"]);

        mirror
            .apply_tag_change(&change(target, &["x"], &[]))
            .unwrap();
        assert_eq!(mirror.tags_of(target).unwrap(), vec!["x", "y"]);
    }

    #[test]
    fn removal_of_unseen_tag_is_remembered() {
        let mirror = Mirror::open_in_memory().unwrap();
        let target = TagTarget::LogEvent(9);
        assert_eq!(
            mirror.apply_tag_change(&change(target, &[], &["late"])).unwrap(),
            ApplyOutcome::Updated
        );
        mirror
            .write(|tx| add_tags(tx, target, &["late".to_string()]))
            .unwrap();
        assert!(mirror.tags_of(target).unwrap().is_empty());
    }
}
