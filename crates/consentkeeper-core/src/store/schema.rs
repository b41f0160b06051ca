// Database schema for the consent store.
// Called by Store::open() on one pooled connection before the first request.
// Adding a table or column: append an idempotent CREATE TABLE IF NOT EXISTS
// or ALTER TABLE ADD COLUMN at the end of run_migrations(). Existing SQL
// is never modified.

use crate::atoms::constants::REQUIRED_TABLES;
use crate::atoms::error::{EngineError, EngineResult};
use log::{info, warn};
use rusqlite::Connection;

pub(crate) fn run_migrations(conn: &Connection) -> EngineResult<()> {
    // ── Pre-migration: legacy table name ────────────────────────────
    // Early deployments stored consent records in `tracked_users`.
    // Rename it in place so existing consents survive the upgrade.
    {
        let has_legacy = table_exists(conn, "tracked_users")?;
        let has_current = table_exists(conn, "consent")?;
        if has_legacy && !has_current {
            warn!("[store] Detected legacy tracked_users table — renaming to consent");
            conn.execute_batch("ALTER TABLE tracked_users RENAME TO consent;")?;
        }
    }

    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS consent (
            user_id_hash TEXT PRIMARY KEY,
            rank TEXT NOT NULL DEFAULT 'undefined'
        );

        CREATE TABLE IF NOT EXISTS consent_log (
            id INTEGER PRIMARY KEY,
            user_id_enc TEXT NOT NULL,
            action TEXT NOT NULL CHECK (action IN ('gave consent', 'retracted consent')),
            timestamp TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS data (
            id INTEGER PRIMARY KEY,
            user_id_hash TEXT NOT NULL,
            message_enc TEXT NOT NULL,
            row_hash TEXT NOT NULL UNIQUE
        );

        CREATE INDEX IF NOT EXISTS idx_data_user ON data(user_id_hash);
        ",
    )?;

    info!("[store] Schema ready (no-op if tables already existed)");
    Ok(())
}

/// Fail fast if any required table is missing.
pub(crate) fn assert_schema(conn: &Connection) -> EngineResult<()> {
    let missing: Vec<&str> = REQUIRED_TABLES
        .iter()
        .copied()
        .map(|t| table_exists(conn, t).map(|exists| (t, exists)))
        .collect::<EngineResult<Vec<_>>>()?
        .into_iter()
        .filter(|(_, exists)| !exists)
        .map(|(t, _)| t)
        .collect();

    if missing.is_empty() {
        Ok(())
    } else {
        Err(EngineError::Schema(format!(
            "Required table(s) missing from the database: {}",
            missing.join(", ")
        )))
    }
}

fn table_exists(conn: &Connection, name: &str) -> EngineResult<bool> {
    let found = conn
        .prepare("SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?1")?
        .exists([name])?;
    Ok(found)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn in_memory_db() -> Connection {
        Connection::open_in_memory().unwrap()
    }

    #[test]
    fn migrations_run_cleanly() {
        let conn = in_memory_db();
        let result = run_migrations(&conn);
        assert!(result.is_ok(), "First migration run failed: {:?}", result);
    }

    #[test]
    fn migrations_idempotent() {
        let conn = in_memory_db();
        run_migrations(&conn).unwrap();
        let result = run_migrations(&conn);
        assert!(result.is_ok(), "Second migration run failed: {:?}", result);
    }

    #[test]
    fn assert_schema_reports_missing_tables() {
        let conn = in_memory_db();
        match assert_schema(&conn) {
            Err(EngineError::Schema(msg)) => {
                assert!(msg.contains("consent"));
                assert!(msg.contains("data"));
            }
            other => panic!("expected schema error, got {:?}", other),
        }
        run_migrations(&conn).unwrap();
        assert!(assert_schema(&conn).is_ok());
    }

    #[test]
    fn legacy_tracked_users_is_renamed() {
        let conn = in_memory_db();
        conn.execute_batch(
            "CREATE TABLE tracked_users (user_id_hash TEXT PRIMARY KEY, rank TEXT NOT NULL DEFAULT 'undefined');
             INSERT INTO tracked_users (user_id_hash) VALUES ('abc');",
        )
        .unwrap();
        run_migrations(&conn).unwrap();
        let n: i64 = conn
            .query_row("SELECT COUNT(*) FROM consent WHERE user_id_hash = 'abc'", [], |r| r.get(0))
            .unwrap();
        assert_eq!(n, 1);
        assert!(!table_exists(&conn, "tracked_users").unwrap());
    }

    #[test]
    fn audit_action_is_constrained() {
        let conn = in_memory_db();
        run_migrations(&conn).unwrap();
        let bad = conn.execute(
            "INSERT INTO consent_log (user_id_enc, action, timestamp) VALUES ('x', 'banned', 't')",
            [],
        );
        assert!(bad.is_err());
    }
}
