use super::Store;
use crate::atoms::error::EngineResult;
use crate::atoms::types::{InsertOutcome, StoreStats};
use rusqlite::params;

impl Store {
    // ── Collected messages ─────────────────────────────────────────────

    /// Insert one collected message. The UNIQUE `row_hash` makes repeat
    /// ingestion of the same (author, content) pair a no-op.
    pub fn insert_message(&self, user_id_hash: &str, message_enc: &str, row_hash: &str) -> InsertOutcome {
        let result = self.with_conn(|conn| {
            Ok(InsertOutcome::from_sqlite(conn.execute(
                "INSERT INTO data (user_id_hash, message_enc, row_hash) VALUES (?1, ?2, ?3)",
                params![user_id_hash, message_enc, row_hash],
            )))
        });
        result.unwrap_or_else(InsertOutcome::Failed)
    }

    pub fn message_count_for(&self, user_id_hash: &str) -> EngineResult<i64> {
        self.with_conn(|conn| {
            let n = conn.query_row(
                "SELECT COUNT(*) FROM data WHERE user_id_hash = ?1",
                params![user_id_hash],
                |r| r.get(0),
            )?;
            Ok(n)
        })
    }

    pub fn message_count(&self) -> EngineResult<i64> {
        self.with_conn(|conn| Ok(conn.query_row("SELECT COUNT(*) FROM data", [], |r| r.get(0))?))
    }

    /// Table counts plus the rank distribution of consented users.
    pub fn stats(&self) -> EngineResult<StoreStats> {
        self.with_conn(|conn| {
            let count = |table: &str| -> rusqlite::Result<i64> {
                conn.query_row(&format!("SELECT COUNT(*) FROM {}", table), [], |r| r.get(0))
            };
            let consent_records = count("consent")?;
            let audit_entries = count("consent_log")?;
            let collected_messages = count("data")?;

            let mut stmt = conn.prepare(
                "SELECT rank, COUNT(*) AS n FROM consent GROUP BY rank ORDER BY n DESC, rank ASC",
            )?;
            let ranks = stmt
                .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)))?
                .collect::<rusqlite::Result<Vec<_>>>()?;

            Ok(StoreStats { consent_records, audit_entries, collected_messages, ranks })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::atoms::types::{ConsentAction, Rank};

    #[test]
    fn duplicate_row_hash_is_already_exists() {
        let store = Store::open_in_memory().unwrap();
        assert!(matches!(store.insert_message("u", "enc-1", "row"), InsertOutcome::Inserted));
        // Ciphertext differs on every encryption; only row_hash decides.
        assert!(matches!(store.insert_message("u", "enc-2", "row"), InsertOutcome::AlreadyExists));
        assert_eq!(store.message_count().unwrap(), 1);
    }

    #[test]
    fn stats_reflect_tables() {
        let store = Store::open_in_memory().unwrap();
        store.insert_consent("a").into_result().unwrap();
        store.insert_consent("b").into_result().unwrap();
        store.insert_consent("c").into_result().unwrap();
        store.set_rank("a", &Rank::Tier("Diamond".into())).unwrap();
        store.append_audit("x", ConsentAction::GaveConsent, "t").unwrap();
        store.insert_message("a", "m", "r").into_result().unwrap();

        let stats = store.stats().unwrap();
        assert_eq!(stats.consent_records, 3);
        assert_eq!(stats.audit_entries, 1);
        assert_eq!(stats.collected_messages, 1);
        assert_eq!(stats.ranks, vec![("undefined".to_string(), 2), ("Diamond".to_string(), 1)]);
    }
}
