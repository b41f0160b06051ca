// Operator subcommands. Each opens its own store handle and prints to stdout.

use std::path::{Path, PathBuf};

use consentkeeper_core::{generate_key_hex, Cipher, EngineResult, Store, StoreStats};
use log::warn;
use serde::Serialize;

pub fn resolve_db(db: Option<PathBuf>) -> PathBuf {
    db.unwrap_or_else(|| {
        dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("consentkeeper")
            .join("consent.db")
    })
}

fn print_json<T: Serialize>(value: &T) -> EngineResult<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

// ── init-db ────────────────────────────────────────────────────────────

pub fn init_db(db: &Path, json: bool) -> EngineResult<()> {
    Store::open(db)?;
    if json {
        print_json(&serde_json::json!({ "database": db, "initialized": true }))
    } else {
        println!("Database initialized at {} (no-op if it already existed).", db.display());
        Ok(())
    }
}

// ── keygen ─────────────────────────────────────────────────────────────

pub fn keygen(json: bool) -> EngineResult<()> {
    let key = generate_key_hex();
    if json {
        print_json(&serde_json::json!({ "encryption_key": key }))
    } else {
        println!("{}", key);
        Ok(())
    }
}

// ── stats ──────────────────────────────────────────────────────────────

pub fn render_stats(stats: &StoreStats) -> String {
    let mut out = format!(
        "Consent records:    {}\nAudit entries:      {}\nCollected messages: {}\n",
        stats.consent_records, stats.audit_entries, stats.collected_messages
    );
    if !stats.ranks.is_empty() {
        out.push_str("\nRanks:\n");
        for (rank, n) in &stats.ranks {
            out.push_str(&format!("  {:<16} {}\n", rank, n));
        }
    }
    out
}

pub fn stats(db: &Path, json: bool) -> EngineResult<()> {
    let stats = Store::open_existing(db)?.stats()?;
    if json {
        print_json(&stats)
    } else {
        print!("{}", render_stats(&stats));
        Ok(())
    }
}

// ── audit ──────────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
pub struct AuditRow {
    pub id: i64,
    pub timestamp: String,
    pub action: String,
    /// `None` when the stored token does not decrypt with this key.
    pub user_id: Option<String>,
}

pub fn audit_rows(store: &Store, cipher: &Cipher) -> EngineResult<Vec<AuditRow>> {
    let rows = store
        .audit_entries()?
        .into_iter()
        .map(|entry| {
            let user_id = match cipher.decrypt(&entry.user_id_enc) {
                Ok(id) => Some(id),
                Err(e) => {
                    warn!("audit entry {} does not decrypt: {}", entry.id, e);
                    None
                }
            };
            AuditRow { id: entry.id, timestamp: entry.timestamp, action: entry.action.to_string(), user_id }
        })
        .collect();
    Ok(rows)
}

pub fn audit(db: &Path, key_hex: &str, json: bool) -> EngineResult<()> {
    let cipher = Cipher::from_hex(key_hex)?;
    let store = Store::open_existing(db)?;
    let rows = audit_rows(&store, &cipher)?;
    if json {
        return print_json(&rows);
    }
    if rows.is_empty() {
        println!("Audit log is empty.");
    }
    for row in &rows {
        println!(
            "{:>6}  {}  {:<18}  {}",
            row.id,
            row.timestamp,
            row.action,
            row.user_id.as_deref().unwrap_or("<undecryptable>")
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use consentkeeper_core::{ConsentRegistry, Rank};
    use std::sync::Arc;

    #[test]
    fn audit_rows_decrypt_identities() {
        let store = Arc::new(Store::open_in_memory().unwrap());
        let key = generate_key_hex();
        let registry = ConsentRegistry::new(store.clone(), Arc::new(Cipher::from_hex(&key).unwrap()));
        registry.register("123").unwrap();
        registry.retract("123").unwrap();

        let rows = audit_rows(&store, &Cipher::from_hex(&key).unwrap()).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].action, "gave consent");
        assert_eq!(rows[1].action, "retracted consent");
        assert!(rows.iter().all(|r| r.user_id.as_deref() == Some("123")));

        let other = Cipher::from_hex(&generate_key_hex()).unwrap();
        let rows = audit_rows(&store, &other).unwrap();
        assert_eq!(rows.len(), 2);
    }

    #[test]
    fn stats_rendering_lists_ranks() {
        let store = Store::open_in_memory().unwrap();
        store.insert_consent("a").into_result().unwrap();
        store.set_rank("a", &Rank::Tier("Diamond".into())).unwrap();
        let text = render_stats(&store.stats().unwrap());
        assert!(text.contains("Consent records:    1"));
        assert!(text.contains("Diamond"));
    }

    #[test]
    fn init_db_creates_file_and_stats_reads_it() {
        let dir = std::env::temp_dir().join(format!("ck-cli-{}", uuid::Uuid::new_v4()));
        let db = dir.join("consent.db");
        init_db(&db, true).unwrap();
        assert!(db.exists());
        assert!(stats(&db, true).is_ok());
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn stats_on_missing_database_fails() {
        let db = std::env::temp_dir().join(format!("ck-none-{}.db", uuid::Uuid::new_v4()));
        assert!(stats(&db, false).is_err());
    }
}
