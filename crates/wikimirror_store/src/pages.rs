//! Page rows and their structural transitions.
//!
//! A page row moves through `live -> deleted -> live` and finally
//! `merged-away`. Rows are never removed. When a page leaves the live
//! state its descriptive columns are re-derived from the revisions it
//! still owns, so a retired row looks the same no matter which sequence
//! of transitions retired it.

use crate::error::{StoreError, StoreResult};
use crate::mirror::Mirror;
use crate::rows::{page_from_row, ApplyOutcome, PageRow, PAGE_COLUMNS};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use serde::Serialize;
use wikimirror_protocol::{format_timestamp, PageInfo, Visibility};

/// How a tombstone retired its page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tombstone {
    /// The page was deleted.
    Deleted,
    /// The page's history was merged into the given page.
    Merged(u64),
}

/// Result of a history merge.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MergeOutcome {
    /// Revisions re-parented to the destination.
    pub moved: usize,
    /// The source page was retired with a forwarding pointer.
    pub retired: bool,
}

impl MergeOutcome {
    /// Returns true if anything was written.
    pub fn is_change(&self) -> bool {
        self.moved > 0 || self.retired
    }
}

impl Mirror {
    /// Inserts or updates a page from its current remote state.
    ///
    /// A page reported present is live, so this clears the deleted flag.
    /// Merged-away identifiers are never revived and yield `Unchanged`.
    ///
    /// # Errors
    ///
    /// Returns `TitleOccupied` if another live page holds the title.
    pub fn upsert_page(&self, info: &PageInfo) -> StoreResult<ApplyOutcome> {
        self.write(|tx| {
            let existing = load_page(tx, info.page_id)?;
            if existing.as_ref().is_some_and(|row| row.merged_into.is_some()) {
                return Ok(ApplyOutcome::Unchanged);
            }
            ensure_title_free(tx, info.namespace, &info.title, info.page_id)?;

            let desired = live_row(info);
            match existing {
                Some(row) if row == desired => Ok(ApplyOutcome::Unchanged),
                Some(_) => {
                    write_page(tx, &desired, false)?;
                    Ok(ApplyOutcome::Updated)
                }
                None => {
                    write_page(tx, &desired, true)?;
                    Ok(ApplyOutcome::Inserted)
                }
            }
        })
    }

    /// Writes the current state of several pages in one transaction.
    ///
    /// Titles only have to be unique once every page is written, so the
    /// pages may exchange titles among themselves. Merged-away
    /// identifiers are skipped.
    ///
    /// # Errors
    ///
    /// Returns `TitleOccupied` if a page outside the set holds one of the
    /// titles; nothing is written then.
    pub fn place_pages(&self, pages: &[PageInfo]) -> StoreResult<ApplyOutcome> {
        self.write(|tx| {
            let mut pending = Vec::with_capacity(pages.len());
            for info in pages {
                let existing = load_page(tx, info.page_id)?;
                if existing.as_ref().is_some_and(|row| row.merged_into.is_some()) {
                    continue;
                }
                if existing.is_some() {
                    // NUL never occurs in a title
                    tx.execute(
                        "UPDATE pages SET title = ?2 WHERE page_id = ?1",
                        params![info.page_id, format!("\u{0}{}", info.page_id)],
                    )?;
                }
                pending.push((info, existing));
            }
            let mut outcome = ApplyOutcome::Unchanged;
            for (info, existing) in pending {
                ensure_title_free(tx, info.namespace, &info.title, info.page_id)?;
                let desired = live_row(info);
                outcome = outcome.and(match existing {
                    Some(row) => {
                        write_page(tx, &desired, false)?;
                        if row == desired {
                            ApplyOutcome::Unchanged
                        } else {
                            ApplyOutcome::Updated
                        }
                    }
                    None => {
                        write_page(tx, &desired, true)?;
                        ApplyOutcome::Inserted
                    }
                });
            }
            Ok(outcome)
        })
    }

    /// Renames a page, keeping its identifier and history.
    ///
    /// Retired rows keep the last title their page had, so they are
    /// renamed too; only live rows claim the title.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` for an unknown page and `TitleOccupied` if the
    /// page is live and another live page holds the new title.
    pub fn rename_page(&self, page_id: u64, namespace: i32, title: &str) -> StoreResult<ApplyOutcome> {
        self.write(|tx| {
            let row = require_page(tx, page_id)?;
            if row.namespace == namespace && row.title == title {
                return Ok(ApplyOutcome::Unchanged);
            }
            if row.is_live() {
                ensure_title_free(tx, namespace, title, page_id)?;
            }
            tx.execute(
                "UPDATE pages SET namespace = ?2, title = ?3 WHERE page_id = ?1",
                params![page_id, namespace, title],
            )?;
            Ok(ApplyOutcome::Updated)
        })
    }

    /// Marks a page and all its revisions deleted.
    ///
    /// Suppression additionally hides every field of the revisions.
    pub fn mark_page_deleted(&self, page_id: u64, suppressed: bool) -> StoreResult<ApplyOutcome> {
        self.write(|tx| {
            let row = require_page(tx, page_id)?;
            let mut changed = tx.execute(
                "UPDATE revisions SET archived = 1 WHERE page_id = ?1 AND archived = 0",
                params![page_id],
            )? > 0;
            if suppressed {
                changed |= tx.execute(
                    "UPDATE revisions SET visibility = ?2 WHERE page_id = ?1 AND visibility != ?2",
                    params![page_id, Visibility::ALL],
                )? > 0;
            }
            if row.merged_into.is_some() {
                return Ok(outcome(changed));
            }
            let desired = retire(tx, &row, true, None)?;
            if desired != row {
                write_page(tx, &desired, false)?;
                changed = true;
            }
            Ok(outcome(changed))
        })
    }

    /// Clears the deleted flag of a page and un-archives its revisions.
    ///
    /// Per-revision visibility is left alone: revisions hidden before the
    /// deletion stay hidden.
    ///
    /// # Errors
    ///
    /// Returns `TitleOccupied` if another live page took the title while
    /// this one was deleted.
    pub fn mark_page_restored(&self, page_id: u64) -> StoreResult<ApplyOutcome> {
        self.write(|tx| {
            let row = require_page(tx, page_id)?;
            if row.merged_into.is_some() {
                return Ok(ApplyOutcome::Unchanged);
            }
            let mut changed = false;
            if row.deleted {
                ensure_title_free(tx, row.namespace, &row.title, page_id)?;
                tx.execute(
                    "UPDATE pages SET deleted = 0 WHERE page_id = ?1",
                    params![page_id],
                )?;
                changed = true;
            }
            changed |= tx.execute(
                "UPDATE revisions SET archived = 0 WHERE page_id = ?1 AND archived = 1",
                params![page_id],
            )? > 0;
            Ok(outcome(changed))
        })
    }

    /// Records a page that is already retired remotely and was never seen
    /// live by the mirror. Existing rows are left alone.
    pub fn insert_tombstone(
        &self,
        page_id: u64,
        namespace: i32,
        title: &str,
        kind: Tombstone,
    ) -> StoreResult<ApplyOutcome> {
        self.write(|tx| {
            if load_page(tx, page_id)?.is_some() {
                return Ok(ApplyOutcome::Unchanged);
            }
            let blank = PageRow {
                page_id,
                namespace,
                title: title.to_string(),
                is_redirect: false,
                latest_revision: None,
                length: None,
                content_model: None,
                deleted: false,
                merged_into: None,
            };
            let row = match kind {
                Tombstone::Deleted => retire(tx, &blank, true, None)?,
                Tombstone::Merged(dest) => retire(tx, &blank, false, Some(dest))?,
            };
            write_page(tx, &row, true)?;
            Ok(ApplyOutcome::Inserted)
        })
    }

    /// Moves the revisions of `source` up to and including `mergepoint`
    /// into `dest`. A source left without revisions is retired with a
    /// forwarding pointer to `dest`.
    ///
    /// Only live pages can be merged remotely, so moved revisions are
    /// never archived.
    ///
    /// A source already retired into another page was only partially
    /// merged at that earlier point; the later merge wins and the
    /// forwarding pointer is moved to `dest`.
    pub fn merge_page(
        &self,
        source: u64,
        dest: u64,
        mergepoint: DateTime<Utc>,
    ) -> StoreResult<MergeOutcome> {
        self.write(|tx| {
            let row = require_page(tx, source)?;
            if source == dest || row.merged_into == Some(dest) {
                return Ok(MergeOutcome::default());
            }
            if row.merged_into.is_some() {
                tx.execute(
                    "UPDATE pages SET merged_into = ?2 WHERE page_id = ?1",
                    params![source, dest],
                )?;
                return Ok(MergeOutcome {
                    moved: 0,
                    retired: true,
                });
            }
            let moved = tx.execute(
                "UPDATE revisions SET page_id = ?2, archived = 0 \
                 WHERE page_id = ?1 AND timestamp <= ?3",
                params![source, dest, format_timestamp(&mergepoint)],
            )?;
            let remaining: i64 = tx.query_row(
                "SELECT COUNT(*) FROM revisions WHERE page_id = ?1",
                params![source],
                |r| r.get(0),
            )?;
            let retired = remaining == 0;
            if retired {
                let desired = retire(tx, &row, false, Some(dest))?;
                write_page(tx, &desired, false)?;
            }
            Ok(MergeOutcome { moved, retired })
        })
    }

    /// Returns the row of a page, whatever its state.
    pub fn page(&self, page_id: u64) -> StoreResult<Option<PageRow>> {
        self.read(|conn| load_page(conn, page_id))
    }

    /// Returns the row of a page, following a merge forwarding pointer at
    /// most once.
    pub fn resolve_page(&self, page_id: u64) -> StoreResult<Option<PageRow>> {
        self.read(|conn| match load_page(conn, page_id)? {
            Some(PageRow {
                merged_into: Some(dest),
                ..
            }) => load_page(conn, dest),
            other => Ok(other),
        })
    }

    /// Returns the live page holding a title.
    pub fn live_page_by_title(&self, namespace: i32, title: &str) -> StoreResult<Option<PageRow>> {
        self.read(|conn| live_page_by_title(conn, namespace, title))
    }

    /// Returns every live page, ordered by namespace and title.
    pub fn live_pages(&self) -> StoreResult<Vec<PageRow>> {
        self.read(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {PAGE_COLUMNS} FROM pages WHERE deleted = 0 AND merged_into IS NULL \
                 ORDER BY namespace, title"
            ))?;
            let rows = stmt.query_map([], page_from_row)?;
            Ok(rows.collect::<Result<Vec<_>, _>>()?)
        })
    }
}

fn live_row(info: &PageInfo) -> PageRow {
    PageRow {
        page_id: info.page_id,
        namespace: info.namespace,
        title: info.title.clone(),
        is_redirect: info.is_redirect,
        latest_revision: info.latest_revision,
        length: info.length,
        content_model: info.content_model.clone(),
        deleted: false,
        merged_into: None,
    }
}

fn outcome(changed: bool) -> ApplyOutcome {
    if changed {
        ApplyOutcome::Updated
    } else {
        ApplyOutcome::Unchanged
    }
}

pub(crate) fn load_page(conn: &Connection, page_id: u64) -> StoreResult<Option<PageRow>> {
    Ok(conn
        .query_row(
            &format!("SELECT {PAGE_COLUMNS} FROM pages WHERE page_id = ?1"),
            params![page_id],
            page_from_row,
        )
        .optional()?)
}

fn require_page(conn: &Connection, page_id: u64) -> StoreResult<PageRow> {
    load_page(conn, page_id)?.ok_or(StoreError::NotFound {
        kind: "page",
        id: page_id,
    })
}

fn live_page_by_title(conn: &Connection, namespace: i32, title: &str) -> StoreResult<Option<PageRow>> {
    Ok(conn
        .query_row(
            &format!(
                "SELECT {PAGE_COLUMNS} FROM pages \
                 WHERE namespace = ?1 AND title = ?2 AND deleted = 0 AND merged_into IS NULL"
            ),
            params![namespace, title],
            page_from_row,
        )
        .optional()?)
}

fn ensure_title_free(conn: &Connection, namespace: i32, title: &str, page_id: u64) -> StoreResult<()> {
    match live_page_by_title(conn, namespace, title)? {
        Some(occupant) if occupant.page_id != page_id => Err(StoreError::TitleOccupied {
            namespace,
            title: title.to_string(),
            occupant: occupant.page_id,
        }),
        _ => Ok(()),
    }
}

/// Builds the retired form of a row from the revisions it still owns.
fn retire(
    conn: &Connection,
    row: &PageRow,
    deleted: bool,
    merged_into: Option<u64>,
) -> StoreResult<PageRow> {
    let latest: Option<(u64, u64, Option<String>)> = conn
        .query_row(
            "SELECT rev_id, size, content_model FROM revisions WHERE page_id = ?1 \
             ORDER BY timestamp DESC, rev_id DESC LIMIT 1",
            params![row.page_id],
            |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)),
        )
        .optional()?;
    let (latest_revision, length, content_model) = match latest {
        Some((rev_id, size, model)) => (Some(rev_id), Some(size), model),
        None => (None, None, None),
    };
    Ok(PageRow {
        page_id: row.page_id,
        namespace: row.namespace,
        title: row.title.clone(),
        is_redirect: false,
        latest_revision,
        length,
        content_model,
        deleted: deleted && merged_into.is_none(),
        merged_into,
    })
}

fn write_page(conn: &Connection, row: &PageRow, insert: bool) -> StoreResult<()> {
    let sql = if insert {
        "INSERT INTO pages (page_id, namespace, title, is_redirect, latest_revision, length, \
         content_model, deleted, merged_into) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)"
    } else {
        "UPDATE pages SET namespace = ?2, title = ?3, is_redirect = ?4, latest_revision = ?5, \
         length = ?6, content_model = ?7, deleted = ?8, merged_into = ?9 WHERE page_id = ?1"
    };
    conn.execute(
        sql,
        params![
            row.page_id,
            row.namespace,
            row.title,
            row.is_redirect,
            row.latest_revision,
            row.length,
            row.content_model,
            row.deleted,
            row.merged_into,
        ],
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn info(page_id: u64, title: &str) -> PageInfo {
        PageInfo {
            page_id,
            namespace: 0,
            title: title.to_string(),
            is_redirect: false,
            latest_revision: Some(page_id * 10),
            length: Some(42),
            content_model: Some("wikitext".into()),
        }
    }

    fn ts(minute: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, minute, 0).unwrap()
    }

    fn add_revision(mirror: &Mirror, rev_id: u64, page_id: u64, minute: u32) {
        mirror
            .write(|tx| {
                tx.execute(
                    "INSERT INTO revisions (rev_id, page_id, timestamp, size, content_model) \
                     VALUES (?1, ?2, ?3, ?4, 'wikitext')",
                    params![rev_id, page_id, format_timestamp(&ts(minute)), rev_id * 2],
                )?;
                Ok(())
            })
            .unwrap();
    }

    #[test]
    fn place_pages_swaps_titles() {
        let mirror = Mirror::open_in_memory().unwrap();
        mirror.upsert_page(&info(1, "A")).unwrap();
        mirror.upsert_page(&info(2, "B")).unwrap();
        assert!(matches!(
            mirror.upsert_page(&info(1, "B")),
            Err(StoreError::TitleOccupied { occupant: 2, .. })
        ));

        let outcome = mirror.place_pages(&[info(1, "B"), info(2, "A")]).unwrap();
        assert_eq!(outcome, ApplyOutcome::Updated);
        assert_eq!(mirror.page(1).unwrap().unwrap().title, "B");
        assert_eq!(mirror.page(2).unwrap().unwrap().title, "A");
        assert_eq!(
            mirror.place_pages(&[info(1, "B"), info(2, "A")]).unwrap(),
            ApplyOutcome::Unchanged
        );
    }

    #[test]
    fn place_pages_rolls_back_on_outside_occupant() {
        let mirror = Mirror::open_in_memory().unwrap();
        mirror.upsert_page(&info(1, "A")).unwrap();
        mirror.upsert_page(&info(3, "C")).unwrap();
        assert!(mirror.place_pages(&[info(1, "C")]).is_err());
        assert_eq!(mirror.page(1).unwrap().unwrap().title, "A");
    }

    #[test]
    fn upsert_is_idempotent() {
        let mirror = Mirror::open_in_memory().unwrap();
        assert_eq!(mirror.upsert_page(&info(1, "A")).unwrap(), ApplyOutcome::Inserted);
        assert_eq!(mirror.upsert_page(&info(1, "A")).unwrap(), ApplyOutcome::Unchanged);
        let mut changed = info(1, "A");
        changed.latest_revision = Some(11);
        assert_eq!(mirror.upsert_page(&changed).unwrap(), ApplyOutcome::Updated);
    }

    #[test]
    fn upsert_rejects_occupied_title() {
        let mirror = Mirror::open_in_memory().unwrap();
        mirror.upsert_page(&info(1, "A")).unwrap();
        let err = mirror.upsert_page(&info(2, "A")).unwrap_err();
        assert!(matches!(err, StoreError::TitleOccupied { occupant: 1, .. }));
    }

    #[test]
    fn rename_keeps_identity() {
        let mirror = Mirror::open_in_memory().unwrap();
        mirror.upsert_page(&info(1, "Test 1")).unwrap();
        assert_eq!(
            mirror.rename_page(1, 0, "Test 2").unwrap(),
            ApplyOutcome::Updated
        );
        assert_eq!(
            mirror.rename_page(1, 0, "Test 2").unwrap(),
            ApplyOutcome::Unchanged
        );
        assert!(mirror.live_page_by_title(0, "Test 1").unwrap().is_none());
        assert_eq!(
            mirror.live_page_by_title(0, "Test 2").unwrap().unwrap().page_id,
            1
        );
        assert!(matches!(
            mirror.rename_page(9, 0, "X"),
            Err(StoreError::NotFound { kind: "page", id: 9 })
        ));
    }

    #[test]
    fn delete_and_restore() {
        let mirror = Mirror::open_in_memory().unwrap();
        mirror.upsert_page(&info(1, "A")).unwrap();
        add_revision(&mirror, 10, 1, 1);

        assert_eq!(mirror.mark_page_deleted(1, false).unwrap(), ApplyOutcome::Updated);
        assert_eq!(mirror.mark_page_deleted(1, false).unwrap(), ApplyOutcome::Unchanged);
        let row = mirror.page(1).unwrap().unwrap();
        assert!(row.deleted);
        assert_eq!(row.latest_revision, Some(10));
        assert_eq!(row.length, Some(20));
        assert!(mirror.live_pages().unwrap().is_empty());

        // the title is free while the page is deleted
        mirror.upsert_page(&info(2, "A")).unwrap();
        assert!(matches!(
            mirror.mark_page_restored(1),
            Err(StoreError::TitleOccupied { occupant: 2, .. })
        ));
        mirror.rename_page(2, 0, "B").unwrap();

        assert_eq!(mirror.mark_page_restored(1).unwrap(), ApplyOutcome::Updated);
        assert_eq!(mirror.mark_page_restored(1).unwrap(), ApplyOutcome::Unchanged);
        assert!(mirror.page(1).unwrap().unwrap().is_live());
    }

    #[test]
    fn tombstone_matches_retired_row() {
        let mirror = Mirror::open_in_memory().unwrap();
        mirror.upsert_page(&info(1, "A")).unwrap();
        add_revision(&mirror, 10, 1, 1);
        mirror.mark_page_deleted(1, false).unwrap();

        add_revision(&mirror, 20, 2, 1);
        mirror
            .write(|tx| {
                tx.execute("UPDATE revisions SET archived = 1 WHERE page_id = 2", [])?;
                Ok(())
            })
            .unwrap();
        assert_eq!(
            mirror.insert_tombstone(2, 0, "A", Tombstone::Deleted).unwrap(),
            ApplyOutcome::Inserted
        );
        assert_eq!(
            mirror.insert_tombstone(2, 0, "A", Tombstone::Deleted).unwrap(),
            ApplyOutcome::Unchanged
        );

        let retired = mirror.page(1).unwrap().unwrap();
        let tombstone = mirror.page(2).unwrap().unwrap();
        assert_eq!(retired.state(), tombstone.state());
        assert_eq!(retired.is_redirect, tombstone.is_redirect);
        assert_eq!(tombstone.latest_revision, Some(20));
    }

    #[test]
    fn merge_reparents_and_retires() {
        let mirror = Mirror::open_in_memory().unwrap();
        mirror.upsert_page(&info(1, "Test 1")).unwrap();
        mirror.upsert_page(&info(2, "Test 2")).unwrap();
        add_revision(&mirror, 10, 1, 1);
        add_revision(&mirror, 20, 2, 2);

        let outcome = mirror.merge_page(1, 2, ts(1)).unwrap();
        assert_eq!(outcome, MergeOutcome { moved: 1, retired: true });
        assert!(!mirror.merge_page(1, 2, ts(1)).unwrap().is_change());

        let source = mirror.page(1).unwrap().unwrap();
        assert_eq!(source.merged_into, Some(2));
        assert_eq!(source.latest_revision, None);
        assert!(!source.deleted);
        assert_eq!(mirror.resolve_page(1).unwrap().unwrap().page_id, 2);

        // merged identifiers are never revived
        assert_eq!(
            mirror.upsert_page(&info(1, "Test 1")).unwrap(),
            ApplyOutcome::Unchanged
        );
        assert_eq!(mirror.live_pages().unwrap().len(), 1);
    }

    #[test]
    fn later_merge_moves_forwarding_pointer() {
        let mirror = Mirror::open_in_memory().unwrap();
        mirror.upsert_page(&info(2, "B")).unwrap();
        mirror.upsert_page(&info(3, "C")).unwrap();
        mirror.insert_tombstone(1, 0, "A", Tombstone::Merged(2)).unwrap();

        let outcome = mirror.merge_page(1, 3, ts(1)).unwrap();
        assert_eq!(outcome, MergeOutcome { moved: 0, retired: true });
        assert_eq!(mirror.page(1).unwrap().unwrap().merged_into, Some(3));
        assert!(!mirror.merge_page(1, 3, ts(1)).unwrap().is_change());
    }

    #[test]
    fn retired_rows_follow_renames() {
        let mirror = Mirror::open_in_memory().unwrap();
        mirror.upsert_page(&info(2, "B")).unwrap();
        mirror.insert_tombstone(1, 0, "A", Tombstone::Merged(2)).unwrap();
        // the title is held, but retired rows do not claim titles
        assert_eq!(mirror.rename_page(1, 0, "B").unwrap(), ApplyOutcome::Updated);
        assert_eq!(mirror.page(1).unwrap().unwrap().title, "B");
        assert_eq!(mirror.live_page_by_title(0, "B").unwrap().unwrap().page_id, 2);
    }

    #[test]
    fn partial_merge_keeps_source_live() {
        let mirror = Mirror::open_in_memory().unwrap();
        mirror.upsert_page(&info(1, "A")).unwrap();
        mirror.upsert_page(&info(2, "B")).unwrap();
        add_revision(&mirror, 10, 1, 1);
        add_revision(&mirror, 11, 1, 5);

        let outcome = mirror.merge_page(1, 2, ts(2)).unwrap();
        assert_eq!(outcome, MergeOutcome { moved: 1, retired: false });
        assert!(mirror.page(1).unwrap().unwrap().is_live());
    }
}
