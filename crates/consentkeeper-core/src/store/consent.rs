use super::Store;
use crate::atoms::error::EngineResult;
use crate::atoms::types::{InsertOutcome, Rank};
use rusqlite::{params, OptionalExtension};

impl Store {
    // ── Consent records ────────────────────────────────────────────────

    /// Create a consent record. The PRIMARY KEY on `user_id_hash` is the
    /// only duplicate guard; callers never pre-check.
    pub fn insert_consent(&self, user_id_hash: &str) -> InsertOutcome {
        let result = self.with_conn(|conn| {
            Ok(InsertOutcome::from_sqlite(conn.execute(
                "INSERT INTO consent (user_id_hash) VALUES (?1)",
                params![user_id_hash],
            )))
        });
        result.unwrap_or_else(InsertOutcome::Failed)
    }

    pub fn consent_exists(&self, user_id_hash: &str) -> EngineResult<bool> {
        self.with_conn(|conn| {
            let found = conn
                .prepare_cached("SELECT 1 FROM consent WHERE user_id_hash = ?1")?
                .exists(params![user_id_hash])?;
            Ok(found)
        })
    }

    /// Delete the consent record and every collected message for the hash
    /// in one transaction. Returns (record_removed, messages_removed).
    pub fn delete_consent_cascade(&self, user_id_hash: &str) -> EngineResult<(bool, usize)> {
        self.with_conn(|conn| {
            let tx = conn.transaction()?;
            let records = tx.execute("DELETE FROM consent WHERE user_id_hash = ?1", params![user_id_hash])?;
            let messages = tx.execute("DELETE FROM data WHERE user_id_hash = ?1", params![user_id_hash])?;
            tx.commit()?;
            Ok((records > 0, messages))
        })
    }

    pub fn consented_hashes(&self) -> EngineResult<Vec<String>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare("SELECT user_id_hash FROM consent ORDER BY user_id_hash")?;
            let hashes = stmt
                .query_map([], |row| row.get::<_, String>(0))?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(hashes)
        })
    }

    // ── Rank ───────────────────────────────────────────────────────────

    /// `None` when the user has no consent record.
    pub fn rank_of(&self, user_id_hash: &str) -> EngineResult<Option<Rank>> {
        self.with_conn(|conn| {
            let stored: Option<String> = conn
                .query_row(
                    "SELECT rank FROM consent WHERE user_id_hash = ?1",
                    params![user_id_hash],
                    |row| row.get(0),
                )
                .optional()?;
            Ok(stored.map(|s| Rank::from_stored(&s)))
        })
    }

    /// Update an existing record's rank; never creates one.
    /// Returns false when no consent record exists for the hash.
    pub fn set_rank(&self, user_id_hash: &str, rank: &Rank) -> EngineResult<bool> {
        self.with_conn(|conn| {
            let n = conn.execute(
                "UPDATE consent SET rank = ?1 WHERE user_id_hash = ?2",
                params![rank.as_str(), user_id_hash],
            )?;
            Ok(n > 0)
        })
    }

    /// Write many ranks in a single transaction. Hashes whose record was
    /// retracted in the meantime are skipped. Returns rows updated.
    pub fn set_ranks(&self, updates: &[(String, Rank)]) -> EngineResult<usize> {
        self.with_conn(|conn| {
            let tx = conn.transaction()?;
            let mut updated = 0;
            {
                let mut stmt = tx.prepare("UPDATE consent SET rank = ?1 WHERE user_id_hash = ?2")?;
                for (hash, rank) in updates {
                    updated += stmt.execute(params![rank.as_str(), hash])?;
                }
            }
            tx.commit()?;
            Ok(updated)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_store() -> Store {
        Store::open_in_memory().unwrap()
    }

    #[test]
    fn insert_then_duplicate() {
        let store = test_store();
        assert!(matches!(store.insert_consent("h1"), InsertOutcome::Inserted));
        assert!(matches!(store.insert_consent("h1"), InsertOutcome::AlreadyExists));
        assert!(store.consent_exists("h1").unwrap());
        assert!(!store.consent_exists("h2").unwrap());
    }

    #[test]
    fn new_record_rank_is_undefined() {
        let store = test_store();
        store.insert_consent("h1").into_result().unwrap();
        assert_eq!(store.rank_of("h1").unwrap(), Some(Rank::Undefined));
        assert_eq!(store.rank_of("nobody").unwrap(), None);
    }

    #[test]
    fn set_rank_never_creates() {
        let store = test_store();
        assert!(!store.set_rank("ghost", &Rank::Tier("Diamond".into())).unwrap());
        assert!(!store.consent_exists("ghost").unwrap());

        store.insert_consent("h1").into_result().unwrap();
        assert!(store.set_rank("h1", &Rank::Tier("Diamond".into())).unwrap());
        assert_eq!(store.rank_of("h1").unwrap(), Some(Rank::Tier("Diamond".into())));
    }

    #[test]
    fn set_ranks_batch() {
        let store = test_store();
        store.insert_consent("a").into_result().unwrap();
        store.insert_consent("b").into_result().unwrap();
        let n = store
            .set_ranks(&[
                ("a".into(), Rank::Tier("Emerald".into())),
                ("b".into(), Rank::Undefined),
                ("gone".into(), Rank::Tier("Diamond".into())),
            ])
            .unwrap();
        assert_eq!(n, 2);
        assert_eq!(store.rank_of("a").unwrap(), Some(Rank::Tier("Emerald".into())));
        assert_eq!(store.rank_of("b").unwrap(), Some(Rank::Undefined));
        assert!(!store.consent_exists("gone").unwrap());
    }

    #[test]
    fn cascade_delete_removes_record_and_messages() {
        let store = test_store();
        store.insert_consent("a").into_result().unwrap();
        store.insert_message("a", "enc1", "r1").into_result().unwrap();
        store.insert_message("a", "enc2", "r2").into_result().unwrap();
        store.insert_message("b", "enc3", "r3").into_result().unwrap();

        assert_eq!(store.delete_consent_cascade("a").unwrap(), (true, 2));
        assert!(!store.consent_exists("a").unwrap());
        assert_eq!(store.message_count_for("a").unwrap(), 0);
        assert_eq!(store.message_count_for("b").unwrap(), 1);

        assert_eq!(store.delete_consent_cascade("a").unwrap(), (false, 0));
    }

    #[test]
    fn consented_hashes_lists_all() {
        let store = test_store();
        store.insert_consent("b").into_result().unwrap();
        store.insert_consent("a").into_result().unwrap();
        assert_eq!(store.consented_hashes().unwrap(), vec!["a".to_string(), "b".to_string()]);
    }
}
