//! Relational schema of the mirror.
//!
//! The schema is the interface downstream consumers read. Every
//! timestamp column holds second-precision RFC 3339 UTC text, so string
//! comparison and chronological comparison agree.

use crate::error::{StoreError, StoreResult};
use rusqlite::Connection;

/// Version stored in `PRAGMA user_version`.
pub const SCHEMA_VERSION: i64 = 2;

const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS pages (
    page_id         INTEGER PRIMARY KEY,
    namespace       INTEGER NOT NULL,
    title           TEXT    NOT NULL,
    is_redirect     INTEGER NOT NULL DEFAULT 0,
    latest_revision INTEGER,
    length          INTEGER,
    content_model   TEXT,
    deleted         INTEGER NOT NULL DEFAULT 0,
    merged_into     INTEGER
);
CREATE UNIQUE INDEX IF NOT EXISTS pages_live_title
    ON pages (namespace, title) WHERE deleted = 0 AND merged_into IS NULL;
CREATE INDEX IF NOT EXISTS pages_title ON pages (namespace, title);

CREATE TABLE IF NOT EXISTS revisions (
    rev_id        INTEGER PRIMARY KEY,
    page_id       INTEGER NOT NULL,
    parent_id     INTEGER,
    timestamp     TEXT    NOT NULL,
    user          TEXT,
    user_id       INTEGER,
    comment       TEXT,
    size          INTEGER NOT NULL,
    sha1          TEXT,
    minor         INTEGER NOT NULL DEFAULT 0,
    content_model TEXT,
    visibility    INTEGER NOT NULL DEFAULT 0,
    archived      INTEGER NOT NULL DEFAULT 0
);
CREATE INDEX IF NOT EXISTS revisions_page ON revisions (page_id, timestamp, rev_id);

CREATE TABLE IF NOT EXISTS logevents (
    log_id     INTEGER PRIMARY KEY,
    timestamp  TEXT    NOT NULL,
    log_type   TEXT    NOT NULL,
    log_action TEXT    NOT NULL,
    page_id    INTEGER,
    namespace  INTEGER NOT NULL,
    title      TEXT,
    user       TEXT,
    user_id    INTEGER,
    comment    TEXT,
    params     TEXT    NOT NULL,
    visibility INTEGER NOT NULL DEFAULT 0
);
CREATE INDEX IF NOT EXISTS logevents_page ON logevents (page_id, timestamp, log_id);

CREATE TABLE IF NOT EXISTS tags (
    name         TEXT PRIMARY KEY,
    display_name TEXT,
    description  TEXT,
    defined      INTEGER NOT NULL,
    active       INTEGER NOT NULL,
    source       TEXT    NOT NULL
);

CREATE TABLE IF NOT EXISTS tag_assignments (
    target_kind TEXT    NOT NULL,
    target_id   INTEGER NOT NULL,
    tag         TEXT    NOT NULL,
    active      INTEGER NOT NULL DEFAULT 1,
    PRIMARY KEY (target_kind, target_id, tag)
);

CREATE TABLE IF NOT EXISTS restrictions (
    page_id INTEGER NOT NULL,
    action  TEXT    NOT NULL,
    level   TEXT    NOT NULL,
    scope   TEXT    NOT NULL,
    expiry  TEXT,
    PRIMARY KEY (page_id, action)
);

CREATE TABLE IF NOT EXISTS protected_titles (
    namespace INTEGER NOT NULL,
    title     TEXT    NOT NULL,
    level     TEXT    NOT NULL,
    expiry    TEXT,
    PRIMARY KEY (namespace, title)
);

CREATE TABLE IF NOT EXISTS namespaces (
    id             INTEGER PRIMARY KEY,
    name           TEXT    NOT NULL,
    canonical      TEXT,
    case_sensitive INTEGER NOT NULL,
    content        INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS revision_content (
    rev_id        INTEGER PRIMARY KEY,
    content_model TEXT,
    text          TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS checkpoints (
    stream       TEXT PRIMARY KEY,
    timestamp    TEXT    NOT NULL,
    record_id    INTEGER NOT NULL,
    continuation TEXT
);
"#;

/// Brings a version 1 mirror to version 2.
const MIGRATE_V1_SQL: &str = r#"
ALTER TABLE tag_assignments ADD COLUMN active INTEGER NOT NULL DEFAULT 1;
"#;

/// Creates missing tables and checks the schema version.
pub(crate) fn ensure_schema(conn: &Connection) -> StoreResult<()> {
    let version: i64 = conn.query_row("PRAGMA user_version", [], |row| row.get(0))?;
    if version > SCHEMA_VERSION {
        return Err(StoreError::invalid_data(format!(
            "mirror schema version {version} is newer than supported version {SCHEMA_VERSION}"
        )));
    }
    if version == 1 {
        conn.execute_batch(MIGRATE_V1_SQL)?;
    }
    conn.execute_batch(SCHEMA_SQL)?;
    if version < SCHEMA_VERSION {
        conn.execute_batch(&format!("PRAGMA user_version = {SCHEMA_VERSION}"))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn schema_is_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        ensure_schema(&conn).unwrap();
        ensure_schema(&conn).unwrap();
        let version: i64 = conn
            .query_row("PRAGMA user_version", [], |row| row.get(0))
            .unwrap();
        assert_eq!(version, SCHEMA_VERSION);
    }

    #[test]
    fn newer_schema_is_rejected() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch("PRAGMA user_version = 99").unwrap();
        assert!(ensure_schema(&conn).is_err());
    }

    #[test]
    fn version_one_mirror_is_upgraded() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(
            "CREATE TABLE tag_assignments (
                target_kind TEXT NOT NULL,
                target_id INTEGER NOT NULL,
                tag TEXT NOT NULL,
                PRIMARY KEY (target_kind, target_id, tag)
             );
             INSERT INTO tag_assignments VALUES ('revision', 1, 'x');
             PRAGMA user_version = 1;",
        )
        .unwrap();
        ensure_schema(&conn).unwrap();
        let active: i64 = conn
            .query_row("SELECT active FROM tag_assignments", [], |row| row.get(0))
            .unwrap();
        assert_eq!(active, 1);
        let titles: i64 = conn
            .query_row("SELECT COUNT(*) FROM protected_titles", [], |row| row.get(0))
            .unwrap();
        assert_eq!(titles, 0);
    }

    #[test]
    fn live_titles_are_unique() {
        let conn = Connection::open_in_memory().unwrap();
        ensure_schema(&conn).unwrap();
        conn.execute_batch(
            "INSERT INTO pages (page_id, namespace, title) VALUES (1, 0, 'A');
             INSERT INTO pages (page_id, namespace, title, deleted) VALUES (2, 0, 'A', 1);
             INSERT INTO pages (page_id, namespace, title, merged_into) VALUES (3, 0, 'A', 1);",
        )
        .unwrap();
        let dup = conn.execute(
            "INSERT INTO pages (page_id, namespace, title) VALUES (4, 0, 'A')",
            [],
        );
        assert!(dup.is_err());
    }
}
