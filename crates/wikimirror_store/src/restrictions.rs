//! Page restrictions (protections).

use crate::error::{StoreError, StoreResult};
use crate::mirror::Mirror;
use crate::rows::{optional_timestamp_column, ApplyOutcome};
use rusqlite::{params, Connection};
use wikimirror_protocol::{format_timestamp, Restriction, RestrictionScope};

impl Mirror {
    /// Makes `restrictions` the complete restriction set of a page.
    ///
    /// A page has at most one active restriction per action; the newest
    /// protect or unprotect event supersedes the whole set.
    pub fn replace_restrictions(
        &self,
        page_id: u64,
        restrictions: &[Restriction],
    ) -> StoreResult<ApplyOutcome> {
        let mut desired: Vec<Restriction> = restrictions
            .iter()
            .filter(|r| r.page_id == page_id)
            .cloned()
            .collect();
        desired.sort_by(|a, b| a.action.cmp(&b.action));
        desired.dedup_by(|a, b| a.action == b.action);
        if desired.len() != restrictions.len() {
            return Err(StoreError::invalid_data(format!(
                "restriction set of page {page_id} has foreign or duplicate entries"
            )));
        }
        self.write(|tx| {
            let current = load_restrictions(tx, page_id)?;
            if current == desired {
                return Ok(ApplyOutcome::Unchanged);
            }
            tx.execute("DELETE FROM restrictions WHERE page_id = ?1", params![page_id])?;
            for r in &desired {
                tx.execute(
                    "INSERT INTO restrictions (page_id, action, level, scope, expiry) \
                     VALUES (?1, ?2, ?3, ?4, ?5)",
                    params![
                        r.page_id,
                        r.action,
                        r.level,
                        r.scope.as_str(),
                        r.expiry.as_ref().map(format_timestamp),
                    ],
                )?;
            }
            Ok(if current.is_empty() {
                ApplyOutcome::Inserted
            } else {
                ApplyOutcome::Updated
            })
        })
    }

    /// Returns the active restrictions of a page, ordered by action.
    pub fn restrictions_of(&self, page_id: u64) -> StoreResult<Vec<Restriction>> {
        self.read(|conn| load_restrictions(conn, page_id))
    }
}

fn load_restrictions(conn: &Connection, page_id: u64) -> StoreResult<Vec<Restriction>> {
    let mut stmt = conn.prepare_cached(
        "SELECT page_id, action, level, scope, expiry FROM restrictions \
         WHERE page_id = ?1 ORDER BY action",
    )?;
    let rows = stmt.query_map(params![page_id], |row| {
        let scope: String = row.get(3)?;
        let scope = RestrictionScope::parse(&scope).ok_or_else(|| {
            rusqlite::Error::FromSqlConversionFailure(
                3,
                rusqlite::types::Type::Text,
                format!("unknown restriction scope {scope:?}").into(),
            )
        })?;
        Ok(Restriction {
            page_id: row.get(0)?,
            action: row.get(1)?,
            level: row.get(2)?,
            scope,
            expiry: optional_timestamp_column(row, 4)?,
        })
    })?;
    Ok(rows.collect::<Result<Vec<_>, _>>()?)
}
