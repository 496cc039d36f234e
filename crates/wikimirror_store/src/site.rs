//! Site metadata: namespaces and tag definitions.

use crate::error::{StoreError, StoreResult};
use crate::mirror::Mirror;
use crate::rows::ApplyOutcome;
use rusqlite::{params, OptionalExtension};
use wikimirror_protocol::{Namespace, TagDefinition};

impl Mirror {
    /// Inserts or updates a namespace.
    pub fn upsert_namespace(&self, namespace: &Namespace) -> StoreResult<ApplyOutcome> {
        self.write(|tx| {
            let existing = tx
                .query_row(
                    "SELECT id, name, canonical, case_sensitive, content FROM namespaces WHERE id = ?1",
                    params![namespace.id],
                    namespace_from_row,
                )
                .optional()?;
            if existing.as_ref() == Some(namespace) {
                return Ok(ApplyOutcome::Unchanged);
            }
            tx.execute(
                "INSERT OR REPLACE INTO namespaces (id, name, canonical, case_sensitive, content) \
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    namespace.id,
                    namespace.name,
                    namespace.canonical,
                    namespace.case_sensitive,
                    namespace.content,
                ],
            )?;
            Ok(if existing.is_some() {
                ApplyOutcome::Updated
            } else {
                ApplyOutcome::Inserted
            })
        })
    }

    /// Returns all namespaces ordered by id.
    pub fn namespaces(&self) -> StoreResult<Vec<Namespace>> {
        self.read(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, name, canonical, case_sensitive, content FROM namespaces ORDER BY id",
            )?;
            let rows = stmt.query_map([], namespace_from_row)?;
            Ok(rows.collect::<Result<Vec<_>, _>>()?)
        })
    }

    /// Inserts or updates a tag definition.
    pub fn upsert_tag_definition(&self, tag: &TagDefinition) -> StoreResult<ApplyOutcome> {
        let source = serde_json::to_string(&tag.source)
            .map_err(|e| StoreError::invalid_data(format!("tag source: {e}")))?;
        self.write(|tx| {
            let existing = tx
                .query_row(
                    "SELECT name, display_name, description, defined, active, source \
                     FROM tags WHERE name = ?1",
                    params![tag.name],
                    tag_from_row,
                )
                .optional()?;
            if existing.as_ref() == Some(tag) {
                return Ok(ApplyOutcome::Unchanged);
            }
            tx.execute(
                "INSERT OR REPLACE INTO tags (name, display_name, description, defined, active, source) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    tag.name,
                    tag.display_name,
                    tag.description,
                    tag.defined,
                    tag.active,
                    source,
                ],
            )?;
            Ok(if existing.is_some() {
                ApplyOutcome::Updated
            } else {
                ApplyOutcome::Inserted
            })
        })
    }

    /// Returns all tag definitions ordered by name.
    pub fn tag_definitions(&self) -> StoreResult<Vec<TagDefinition>> {
        self.read(|conn| {
            let mut stmt = conn.prepare(
                "SELECT name, display_name, description, defined, active, source \
                 FROM tags ORDER BY name",
            )?;
            let rows = stmt.query_map([], tag_from_row)?;
            Ok(rows.collect::<Result<Vec<_>, _>>()?)
        })
    }
}

fn namespace_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Namespace> {
    Ok(Namespace {
        id: row.get(0)?,
        name: row.get(1)?,
        canonical: row.get(2)?,
        case_sensitive: row.get(3)?,
        content: row.get(4)?,
    })
}

fn tag_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<TagDefinition> {
    let source: String = row.get(5)?;
    let source = serde_json::from_str(&source).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(5, rusqlite::types::Type::Text, Box::new(e))
    })?;
    Ok(TagDefinition {
        name: row.get(0)?,
        display_name: row.get(1)?,
        description: row.get(2)?,
        defined: row.get(3)?,
        active: row.get(4)?,
        source,
    })
}
