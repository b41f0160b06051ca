use super::Store;
use crate::atoms::error::EngineResult;
use crate::atoms::types::{AuditEntry, ConsentAction};
use rusqlite::params;

impl Store {
    // ── Audit log (append-only) ────────────────────────────────────────
    // consent_log has no update or delete primitive.

    /// Append one entry; returns its row id.
    pub fn append_audit(&self, user_id_enc: &str, action: ConsentAction, timestamp: &str) -> EngineResult<i64> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO consent_log (user_id_enc, action, timestamp) VALUES (?1, ?2, ?3)",
                params![user_id_enc, action.as_str(), timestamp],
            )?;
            Ok(conn.last_insert_rowid())
        })
    }

    /// Every entry in insertion order.
    pub fn audit_entries(&self) -> EngineResult<Vec<AuditEntry>> {
        self.with_conn(|conn| {
            let mut stmt =
                conn.prepare("SELECT id, user_id_enc, action, timestamp FROM consent_log ORDER BY id")?;
            let rows = stmt
                .query_map([], |row| {
                    Ok((
                        row.get::<_, i64>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, String>(3)?,
                    ))
                })?
                .collect::<rusqlite::Result<Vec<_>>>()?;

            rows.into_iter()
                .map(|(id, user_id_enc, action, timestamp)| {
                    Ok(AuditEntry { id, user_id_enc, action: action.parse()?, timestamp })
                })
                .collect()
        })
    }
}
