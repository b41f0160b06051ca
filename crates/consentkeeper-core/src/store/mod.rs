// ConsentKeeper — Persistent Store
// Durable SQLite storage for consent records, the audit log and collected
// messages, via rusqlite.
//
// Every logical operation borrows one pooled connection through `with_conn`
// and releases it when the closure returns. Statements autocommit; the only
// explicit transactions are the retraction cascade and batched rank writes.
// The guard never crosses an `.await` because the closure is synchronous.
//
// Module layout:
//   schema   — idempotent CREATE TABLE IF NOT EXISTS + startup assertion
//   consent  — consent records + rank column
//   audit    — append-only consent_log
//   data     — collected messages + stats

use crate::atoms::constants::{STORE_BUSY_TIMEOUT_MS, STORE_POOL_SIZE};
use crate::atoms::error::{EngineError, EngineResult};
use log::info;
use parking_lot::Mutex;
use rusqlite::{Connection, OpenFlags};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

mod audit;
mod consent;
mod data;
pub(crate) mod schema;

/// Pooled SQLite handle shared by the registry, pipeline and rank resolver.
pub struct Store {
    /// Round-robin pool; each connection is independently locked.
    pool: Vec<Mutex<Connection>>,
    next_slot: AtomicUsize,
}

impl Store {
    /// Open (or create) the database at `path`, create missing tables, and
    /// assert the schema.
    pub fn open(path: &Path) -> EngineResult<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        info!("[store] Opening database at {:?}", path);
        let store = Self::from_pool(Self::open_pool(|| Self::open_connection(path))?);
        store.with_conn(|conn| schema::run_migrations(conn))?;
        store.with_conn(|conn| schema::assert_schema(conn))?;
        Ok(store)
    }

    /// Open a database that must already carry the full schema.
    /// Fails with `EngineError::Schema` if any required table is absent.
    pub fn open_existing(path: &Path) -> EngineResult<Self> {
        if !path.exists() {
            return Err(EngineError::Schema(format!("Database {:?} does not exist", path)));
        }
        let store = Self::from_pool(Self::open_pool(|| Self::open_connection(path))?);
        store.with_conn(|conn| schema::assert_schema(conn))?;
        Ok(store)
    }

    /// Fresh in-memory database with the full schema.
    pub fn open_in_memory() -> EngineResult<Self> {
        // Shared-cache URI so every pooled connection sees the same data;
        // a plain `open_in_memory()` would give each connection its own DB.
        let uri = format!("file:consentkeeper{}?mode=memory&cache=shared", uuid::Uuid::new_v4());
        let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
            | OpenFlags::SQLITE_OPEN_CREATE
            | OpenFlags::SQLITE_OPEN_NO_MUTEX
            | OpenFlags::SQLITE_OPEN_URI;
        let store = Self::from_pool(Self::open_pool(|| {
            let conn = Connection::open_with_flags(&uri, flags)?;
            conn.busy_timeout(Duration::from_millis(STORE_BUSY_TIMEOUT_MS))?;
            Ok(conn)
        })?);
        store.with_conn(|conn| schema::run_migrations(conn))?;
        Ok(store)
    }

    fn open_connection(path: &Path) -> EngineResult<Connection> {
        let conn = Connection::open(path)?;
        conn.busy_timeout(Duration::from_millis(STORE_BUSY_TIMEOUT_MS))?;
        conn.execute_batch("PRAGMA journal_mode=WAL;").ok();
        conn.execute_batch("PRAGMA secure_delete = ON;").ok();
        Ok(conn)
    }

    fn open_pool<F>(open: F) -> EngineResult<Vec<Mutex<Connection>>>
    where
        F: Fn() -> EngineResult<Connection>,
    {
        (0..STORE_POOL_SIZE).map(|_| open().map(Mutex::new)).collect()
    }

    fn from_pool(pool: Vec<Mutex<Connection>>) -> Self {
        Store { pool, next_slot: AtomicUsize::new(0) }
    }

    /// Run one logical unit of work on a pooled connection.
    ///
    /// The connection is locked for exactly the duration of `f` and released
    /// on every exit path, including errors and panics.
    pub fn with_conn<F, T>(&self, f: F) -> EngineResult<T>
    where
        F: FnOnce(&mut Connection) -> EngineResult<T>,
    {
        let idx = self.next_slot.fetch_add(1, Ordering::Relaxed) % self.pool.len();
        let mut conn = self.pool[idx].lock();
        f(&mut conn)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn in_memory_pool_shares_one_database() {
        let store = Store::open_in_memory().unwrap();
        // Consecutive calls land on different pool slots.
        for i in 0..STORE_POOL_SIZE {
            store
                .with_conn(|conn| {
                    conn.execute("INSERT INTO consent (user_id_hash) VALUES (?1)", [format!("h{}", i)])?;
                    Ok(())
                })
                .unwrap();
        }
        let n: i64 = store
            .with_conn(|conn| Ok(conn.query_row("SELECT COUNT(*) FROM consent", [], |r| r.get(0))?))
            .unwrap();
        assert_eq!(n, STORE_POOL_SIZE as i64);
    }

    #[test]
    fn connection_released_after_error() {
        let store = Store::open_in_memory().unwrap();
        for _ in 0..STORE_POOL_SIZE * 2 {
            let r: EngineResult<()> = store.with_conn(|_| Err(EngineError::Other("boom".into())));
            assert!(r.is_err());
        }
        assert!(store.with_conn(|conn| Ok(conn.is_autocommit())).unwrap());
    }

    #[test]
    fn open_existing_rejects_missing_file() {
        let path = std::env::temp_dir().join(format!("ck-missing-{}.db", uuid::Uuid::new_v4()));
        assert!(matches!(Store::open_existing(&path), Err(EngineError::Schema(_))));
    }

    #[test]
    fn open_creates_then_open_existing_accepts() {
        let dir = std::env::temp_dir().join(format!("ck-store-{}", uuid::Uuid::new_v4()));
        let path = dir.join("consent.db");
        {
            let store = Store::open(&path).unwrap();
            store.insert_consent("abc").into_result().unwrap();
        }
        let reopened = Store::open_existing(&path).unwrap();
        assert!(reopened.consent_exists("abc").unwrap());
        drop(reopened);
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn open_existing_rejects_empty_database() {
        let dir = std::env::temp_dir().join(format!("ck-empty-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("empty.db");
        Connection::open(&path).unwrap().execute_batch("CREATE TABLE other (x);").unwrap();
        assert!(matches!(Store::open_existing(&path), Err(EngineError::Schema(_))));
        std::fs::remove_dir_all(&dir).ok();
    }
}
