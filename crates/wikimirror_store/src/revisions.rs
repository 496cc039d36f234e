//! Revision rows and revision text.

use crate::error::StoreResult;
use crate::mirror::Mirror;
use crate::rows::{revision_from_row, ApplyOutcome, REVISION_COLUMNS};
use crate::tags::{add_tags, load_tags};
use rusqlite::{params, Connection, OptionalExtension};
use wikimirror_protocol::{format_timestamp, Revision, RevisionContent, TagTarget, Visibility};

/// Which revisions content sync covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentScope {
    /// The latest revision of every live page.
    Latest,
    /// Every revision that is not archived.
    All,
}

impl Mirror {
    /// Inserts a revision the mirror does not hold yet.
    ///
    /// An existing row is left as it is: its owner, archive flag and
    /// visibility are maintained by log replay, which may already have
    /// moved past the state this record was read in. Only tags without
    /// a row are added.
    pub fn insert_revision(&self, revision: &Revision) -> StoreResult<ApplyOutcome> {
        self.write(|tx| {
            let outcome = if load_revision(tx, revision.rev_id)?.is_some() {
                ApplyOutcome::Unchanged
            } else {
                write_revision(tx, revision, true)?;
                ApplyOutcome::Inserted
            };
            let tags = add_tags(tx, TagTarget::Revision(revision.rev_id), &revision.tags)?;
            Ok(outcome.and(tags))
        })
    }

    /// Inserts or updates a revision and adds its tags.
    ///
    /// Meant for revisions read from a page's current history, which is
    /// at least as new as any log event replayed so far.
    pub fn upsert_revision(&self, revision: &Revision) -> StoreResult<ApplyOutcome> {
        self.write(|tx| {
            let existing = load_revision(tx, revision.rev_id)?;
            let mut desired = revision.clone();
            desired.tags = Vec::new();
            let outcome = match existing {
                Some(row) if row == desired => ApplyOutcome::Unchanged,
                Some(_) => {
                    write_revision(tx, &desired, false)?;
                    ApplyOutcome::Updated
                }
                None => {
                    write_revision(tx, &desired, true)?;
                    ApplyOutcome::Inserted
                }
            };
            let tags = add_tags(tx, TagTarget::Revision(revision.rev_id), &revision.tags)?;
            Ok(outcome.and(tags))
        })
    }

    /// Sets the visibility of individual revisions. Unknown ids are
    /// ignored. Text that becomes hidden is dropped from the content
    /// table.
    pub fn set_revision_visibility(
        &self,
        rev_ids: &[u64],
        visibility: Visibility,
    ) -> StoreResult<ApplyOutcome> {
        self.write(|tx| {
            let mut changed = false;
            for rev_id in rev_ids {
                changed |= tx.execute(
                    "UPDATE revisions SET visibility = ?2 WHERE rev_id = ?1 AND visibility != ?2",
                    params![rev_id, visibility.bits()],
                )? > 0;
                if visibility.hides_text() {
                    changed |= tx.execute(
                        "DELETE FROM revision_content WHERE rev_id = ?1",
                        params![rev_id],
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

    /// Returns a revision with its tags.
    pub fn revision(&self, rev_id: u64) -> StoreResult<Option<Revision>> {
        self.read(|conn| {
            let Some(mut revision) = load_revision(conn, rev_id)? else {
                return Ok(None);
            };
            revision.tags = load_tags(conn, TagTarget::Revision(rev_id))?;
            Ok(Some(revision))
        })
    }

    /// Returns the revisions owned by a page, ordered by timestamp and id.
    pub fn revisions_of(&self, page_id: u64) -> StoreResult<Vec<Revision>> {
        self.read(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {REVISION_COLUMNS} FROM revisions WHERE page_id = ?1 \
                 ORDER BY timestamp, rev_id"
            ))?;
            let mut revisions = stmt
                .query_map(params![page_id], revision_from_row)?
                .collect::<Result<Vec<_>, _>>()?;
            for revision in &mut revisions {
                revision.tags = load_tags(conn, TagTarget::Revision(revision.rev_id))?;
            }
            Ok(revisions)
        })
    }

    /// Stores the text of a revision.
    pub fn store_content(&self, content: &RevisionContent) -> StoreResult<ApplyOutcome> {
        self.write(|tx| {
            let existing: Option<(Option<String>, String)> = tx
                .query_row(
                    "SELECT content_model, text FROM revision_content WHERE rev_id = ?1",
                    params![content.rev_id],
                    |r| Ok((r.get(0)?, r.get(1)?)),
                )
                .optional()?;
            match existing {
                Some((model, text)) if model == content.content_model && text == content.text => {
                    Ok(ApplyOutcome::Unchanged)
                }
                existing => {
                    tx.execute(
                        "INSERT OR REPLACE INTO revision_content (rev_id, content_model, text) \
                         VALUES (?1, ?2, ?3)",
                        params![content.rev_id, content.content_model, content.text],
                    )?;
                    Ok(if existing.is_some() {
                        ApplyOutcome::Updated
                    } else {
                        ApplyOutcome::Inserted
                    })
                }
            }
        })
    }

    /// Returns the stored text of a revision.
    pub fn content_of(&self, rev_id: u64) -> StoreResult<Option<RevisionContent>> {
        self.read(|conn| {
            Ok(conn
                .query_row(
                    "SELECT rev_id, content_model, text FROM revision_content WHERE rev_id = ?1",
                    params![rev_id],
                    |r| {
                        Ok(RevisionContent {
                            rev_id: r.get(0)?,
                            content_model: r.get(1)?,
                            text: r.get(2)?,
                        })
                    },
                )
                .optional()?)
        })
    }

    /// Returns up to `limit` revision ids in `scope` whose text is not
    /// stored yet, ascending and greater than `after`. Revisions with
    /// hidden text are never listed.
    pub fn revisions_missing_content(
        &self,
        scope: ContentScope,
        after: u64,
        limit: usize,
    ) -> StoreResult<Vec<u64>> {
        let sql = match scope {
            ContentScope::Latest => {
                "SELECT r.rev_id FROM pages p JOIN revisions r ON r.rev_id = p.latest_revision \
                 WHERE p.deleted = 0 AND p.merged_into IS NULL AND (r.visibility & 1) = 0 \
                 AND r.rev_id > ?1 \
                 AND NOT EXISTS (SELECT 1 FROM revision_content c WHERE c.rev_id = r.rev_id) \
                 ORDER BY r.rev_id LIMIT ?2"
            }
            ContentScope::All => {
                "SELECT r.rev_id FROM revisions r \
                 WHERE r.archived = 0 AND (r.visibility & 1) = 0 AND r.rev_id > ?1 \
                 AND NOT EXISTS (SELECT 1 FROM revision_content c WHERE c.rev_id = r.rev_id) \
                 ORDER BY r.rev_id LIMIT ?2"
            }
        };
        self.read(|conn| {
            let mut stmt = conn.prepare(sql)?;
            let ids = stmt
                .query_map(params![after, limit as i64], |r| r.get(0))?
                .collect::<Result<Vec<u64>, _>>()?;
            Ok(ids)
        })
    }
}

fn load_revision(conn: &Connection, rev_id: u64) -> StoreResult<Option<Revision>> {
    Ok(conn
        .query_row(
            &format!("SELECT {REVISION_COLUMNS} FROM revisions WHERE rev_id = ?1"),
            params![rev_id],
            revision_from_row,
        )
        .optional()?)
}

fn write_revision(conn: &Connection, revision: &Revision, insert: bool) -> StoreResult<()> {
    let sql = if insert {
        "INSERT INTO revisions (rev_id, page_id, parent_id, timestamp, user, user_id, comment, \
         size, sha1, minor, content_model, visibility, archived) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)"
    } else {
        "UPDATE revisions SET page_id = ?2, parent_id = ?3, timestamp = ?4, user = ?5, \
         user_id = ?6, comment = ?7, size = ?8, sha1 = ?9, minor = ?10, content_model = ?11, \
         visibility = ?12, archived = ?13 WHERE rev_id = ?1"
    };
    conn.execute(
        sql,
        params![
            revision.rev_id,
            revision.page_id,
            revision.parent_id,
            format_timestamp(&revision.timestamp),
            revision.user,
            revision.user_id,
            revision.comment,
            revision.size,
            revision.sha1,
            revision.minor,
            revision.content_model,
            revision.visibility.bits(),
            revision.archived,
        ],
    )?;
    Ok(())
}
