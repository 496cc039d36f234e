//! Create protections of titles without a page.
//!
//! A row exists while the remote forbids creating the title. Creating a
//! page at the title, by creation or by a move, lifts the protection.

use crate::error::StoreResult;
use crate::mirror::Mirror;
use crate::rows::{optional_timestamp_column, ApplyOutcome};
use rusqlite::{params, Connection, OptionalExtension, Row};
use wikimirror_protocol::{format_timestamp, TitleProtection};

impl Mirror {
    /// Makes `protection` the create protection of a title, or lifts it
    /// when `None`.
    pub fn replace_title_protection(
        &self,
        namespace: i32,
        title: &str,
        protection: Option<&TitleProtection>,
    ) -> StoreResult<ApplyOutcome> {
        self.write(|tx| {
            let current = load_title_protection(tx, namespace, title)?;
            match (current, protection) {
                (None, None) => Ok(ApplyOutcome::Unchanged),
                (Some(_), None) => {
                    tx.execute(
                        "DELETE FROM protected_titles WHERE namespace = ?1 AND title = ?2",
                        params![namespace, title],
                    )?;
                    Ok(ApplyOutcome::Updated)
                }
                (current, Some(desired)) => {
                    let desired = TitleProtection {
                        namespace,
                        title: title.to_string(),
                        ..desired.clone()
                    };
                    if current.as_ref() == Some(&desired) {
                        return Ok(ApplyOutcome::Unchanged);
                    }
                    tx.execute(
                        "INSERT OR REPLACE INTO protected_titles (namespace, title, level, expiry) \
                         VALUES (?1, ?2, ?3, ?4)",
                        params![
                            desired.namespace,
                            desired.title,
                            desired.level,
                            desired.expiry.as_ref().map(format_timestamp),
                        ],
                    )?;
                    Ok(if current.is_some() {
                        ApplyOutcome::Updated
                    } else {
                        ApplyOutcome::Inserted
                    })
                }
            }
        })
    }

    /// Lifts the create protection of a title that now has a page.
    pub fn clear_title_protection(&self, namespace: i32, title: &str) -> StoreResult<ApplyOutcome> {
        self.replace_title_protection(namespace, title, None)
    }

    /// Returns the create protection of a title.
    pub fn title_protection(
        &self,
        namespace: i32,
        title: &str,
    ) -> StoreResult<Option<TitleProtection>> {
        self.read(|conn| load_title_protection(conn, namespace, title))
    }

    /// Returns every protected title, ordered by namespace and title.
    pub fn protected_titles(&self) -> StoreResult<Vec<TitleProtection>> {
        self.read(|conn| {
            let mut stmt = conn.prepare(
                "SELECT namespace, title, level, expiry FROM protected_titles \
                 ORDER BY namespace, title",
            )?;
            let rows = stmt
                .query_map([], title_protection_from_row)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }
}

fn load_title_protection(
    conn: &Connection,
    namespace: i32,
    title: &str,
) -> StoreResult<Option<TitleProtection>> {
    Ok(conn
        .query_row(
            "SELECT namespace, title, level, expiry FROM protected_titles \
             WHERE namespace = ?1 AND title = ?2",
            params![namespace, title],
            title_protection_from_row,
        )
        .optional()?)
}

fn title_protection_from_row(row: &Row<'_>) -> rusqlite::Result<TitleProtection> {
    Ok(TitleProtection {
        namespace: row.get(0)?,
        title: row.get(1)?,
        level: row.get(2)?,
        expiry: optional_timestamp_column(row, 3)?,
    })
}
