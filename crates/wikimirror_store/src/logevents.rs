//! Log event rows.

use crate::error::StoreResult;
use crate::mirror::Mirror;
use crate::rows::{log_event_from_row, ApplyOutcome, LogEventRow, LOG_EVENT_COLUMNS};
use crate::tags::{add_tags, load_tags};
use rusqlite::{params, Connection, OptionalExtension};
use wikimirror_protocol::{format_timestamp, LogEvent, TagTarget, Visibility};

impl Mirror {
    /// Inserts or updates a log event and adds its tags.
    ///
    /// Parameters are stored as canonical JSON with sorted keys.
    pub fn upsert_log_event(&self, event: &LogEvent) -> StoreResult<ApplyOutcome> {
        let desired = LogEventRow {
            log_id: event.log_id,
            timestamp: event.timestamp,
            log_type: event.log_type.clone(),
            log_action: event.log_action.clone(),
            page_id: event.page_id,
            namespace: event.namespace,
            title: event.title.clone(),
            user: event.user.clone(),
            user_id: event.user_id,
            comment: event.comment.clone(),
            params: event.params.clone(),
            visibility: event.visibility,
            tags: Vec::new(),
        };
        self.write(|tx| {
            let outcome = match load_log_event(tx, event.log_id)? {
                Some(row) if row == desired => ApplyOutcome::Unchanged,
                Some(_) => {
                    write_log_event(tx, &desired, false)?;
                    ApplyOutcome::Updated
                }
                None => {
                    write_log_event(tx, &desired, true)?;
                    ApplyOutcome::Inserted
                }
            };
            let tags = add_tags(tx, TagTarget::LogEvent(event.log_id), &event.tags)?;
            Ok(outcome.and(tags))
        })
    }

    /// Sets the visibility of individual log events. Unknown ids are
    /// ignored.
    pub fn set_log_event_visibility(
        &self,
        log_ids: &[u64],
        visibility: Visibility,
    ) -> StoreResult<ApplyOutcome> {
        self.write(|tx| {
            let mut changed = false;
            for log_id in log_ids {
                changed |= tx.execute(
                    "UPDATE logevents SET visibility = ?2 WHERE log_id = ?1 AND visibility != ?2",
                    params![log_id, visibility.bits()],
                )? > 0;
            }
            Ok(if changed {
                ApplyOutcome::Updated
            } else {
                ApplyOutcome::Unchanged
            })
        })
    }

    /// Returns a log event with its tags.
    pub fn log_event(&self, log_id: u64) -> StoreResult<Option<LogEventRow>> {
        self.read(|conn| {
            let Some(mut row) = load_log_event(conn, log_id)? else {
                return Ok(None);
            };
            row.tags = load_tags(conn, TagTarget::LogEvent(log_id))?;
            Ok(Some(row))
        })
    }

    /// Returns the log events targeting a page, oldest first.
    pub fn log_events_of(&self, page_id: u64) -> StoreResult<Vec<LogEventRow>> {
        self.read(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {LOG_EVENT_COLUMNS} FROM logevents WHERE page_id = ?1 \
                 ORDER BY timestamp, log_id"
            ))?;
            let mut rows = stmt
                .query_map(params![page_id], log_event_from_row)?
                .collect::<Result<Vec<_>, _>>()?;
            for row in &mut rows {
                row.tags = load_tags(conn, TagTarget::LogEvent(row.log_id))?;
            }
            Ok(rows)
        })
    }
}

fn load_log_event(conn: &Connection, log_id: u64) -> StoreResult<Option<LogEventRow>> {
    Ok(conn
        .query_row(
            &format!("SELECT {LOG_EVENT_COLUMNS} FROM logevents WHERE log_id = ?1"),
            params![log_id],
            log_event_from_row,
        )
        .optional()?)
}

fn write_log_event(conn: &Connection, row: &LogEventRow, insert: bool) -> StoreResult<()> {
    let sql = if insert {
        "INSERT INTO logevents (log_id, timestamp, log_type, log_action, page_id, namespace, \
         title, user, user_id, comment, params, visibility) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)"
    } else {
        "UPDATE logevents SET timestamp = ?2, log_type = ?3, log_action = ?4, page_id = ?5, \
         namespace = ?6, title = ?7, user = ?8, user_id = ?9, comment = ?10, params = ?11, \
         visibility = ?12 WHERE log_id = ?1"
    };
    conn.execute(
        sql,
        params![
            row.log_id,
            format_timestamp(&row.timestamp),
            row.log_type,
            row.log_action,
            row.page_id,
            row.namespace,
            row.title,
            row.user,
            row.user_id,
            row.comment,
            row.params.to_string(),
            row.visibility.bits(),
        ],
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use serde_json::json;

    fn event(log_id: u64) -> LogEvent {
        LogEvent {
            log_id,
            timestamp: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, log_id as u32).unwrap(),
            log_type: "move".into(),
            log_action: "move".into(),
            page_id: Some(1),
            namespace: 0,
            title: Some("Test 1".into()),
            user: Some("Admin".into()),
            user_id: Some(1),
            comment: None,
            params: json!({"target_title": "Test 2", "target_ns": 0}),
            visibility: Visibility::VISIBLE,
            tags: vec!["bot".into()],
            action: Default::default(),
        }
    }

    #[test]
    fn upsert_log_event_roundtrip() {
        let mirror = Mirror::open_in_memory().unwrap();
        assert_eq!(
            mirror.upsert_log_event(&event(1)).unwrap(),
            ApplyOutcome::Inserted
        );
        assert_eq!(
            mirror.upsert_log_event(&event(1)).unwrap(),
            ApplyOutcome::Unchanged
        );
        let row = mirror.log_event(1).unwrap().unwrap();
        assert_eq!(row.params["target_title"], "Test 2");
        assert_eq!(row.tags, vec!["bot"]);
    }

    #[test]
    fn params_are_stored_with_sorted_keys() {
        let mirror = Mirror::open_in_memory().unwrap();
        mirror.upsert_log_event(&event(1)).unwrap();
        let text: String = mirror
            .read(|conn| {
                Ok(conn.query_row("SELECT params FROM logevents WHERE log_id = 1", [], |r| {
                    r.get(0)
                })?)
            })
            .unwrap();
        assert_eq!(text, r#"{"target_ns":0,"target_title":"Test 2"}"#);
    }

    #[test]
    fn event_visibility_and_listing() {
        let mirror = Mirror::open_in_memory().unwrap();
        mirror.upsert_log_event(&event(2)).unwrap();
        mirror.upsert_log_event(&event(1)).unwrap();
        let hidden = Visibility::from_bits(Visibility::COMMENT);
        assert_eq!(
            mirror.set_log_event_visibility(&[1], hidden).unwrap(),
            ApplyOutcome::Updated
        );
        let rows = mirror.log_events_of(1).unwrap();
        assert_eq!(rows.iter().map(|r| r.log_id).collect::<Vec<_>>(), vec![1, 2]);
        assert_eq!(rows[0].visibility, hidden);
    }
}
