//! Canonical text dump of the mirror tables.
//!
//! Two mirrors holding the same state produce identical dumps, whatever
//! order their rows were written in. Used to compare mirrors.

use crate::error::StoreResult;
use crate::mirror::Mirror;
use rusqlite::types::ValueRef;
use std::collections::BTreeMap;

/// Tables in dump order, with the columns that give a total order.
const TABLES: &[(&str, &str)] = &[
    ("pages", "page_id"),
    ("revisions", "rev_id"),
    ("logevents", "log_id"),
    ("tags", "name"),
    ("tag_assignments", "target_kind, target_id, tag"),
    ("restrictions", "page_id, action"),
    ("protected_titles", "namespace, title"),
    ("namespaces", "id"),
    ("revision_content", "rev_id"),
    ("checkpoints", "stream"),
];

impl Mirror {
    /// Dumps every table as sorted lines of `column=value` pairs.
    ///
    /// The `checkpoints` table is left out unless `include_checkpoints`
    /// is set.
    pub fn dump(&self, include_checkpoints: bool) -> StoreResult<BTreeMap<String, Vec<String>>> {
        self.read(|conn| {
            let mut dump = BTreeMap::new();
            for (table, order) in TABLES {
                if *table == "checkpoints" && !include_checkpoints {
                    continue;
                }
                let mut stmt = conn.prepare(&format!("SELECT * FROM {table} ORDER BY {order}"))?;
                let columns: Vec<String> =
                    stmt.column_names().iter().map(|c| c.to_string()).collect();
                let mut rows = stmt.query([])?;
                let mut lines = Vec::new();
                while let Some(row) = rows.next()? {
                    let mut fields = Vec::with_capacity(columns.len());
                    for (idx, column) in columns.iter().enumerate() {
                        fields.push(format!("{column}={}", render(row.get_ref(idx)?)));
                    }
                    lines.push(fields.join(" "));
                }
                dump.insert(table.to_string(), lines);
            }
            Ok(dump)
        })
    }
}

fn render(value: ValueRef<'_>) -> String {
    match value {
        ValueRef::Null => "NULL".to_string(),
        ValueRef::Integer(i) => i.to_string(),
        ValueRef::Real(f) => f.to_string(),
        ValueRef::Text(t) => format!("{:?}", String::from_utf8_lossy(t)),
        ValueRef::Blob(b) => format!("blob:{}", b.len()),
    }
}
