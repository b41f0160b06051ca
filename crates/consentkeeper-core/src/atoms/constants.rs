// ── ConsentKeeper Atoms: Constants ─────────────────────────────────────────
// Named constants shared across the core.

// ── Crypto ─────────────────────────────────────────────────────────────────
/// AES-256 key length in bytes (64 hex characters).
pub const KEY_LEN: usize = 32;
/// CBC initialization vector length; also the AES block size.
pub const IV_LEN: usize = 16;
/// Number of hash characters shown in log lines.
pub const HASH_LOG_PREFIX: usize = 6;

// ── Store ──────────────────────────────────────────────────────────────────
/// Connections kept open by the store.
pub const STORE_POOL_SIZE: usize = 4;
/// How long SQLite waits on a locked database before failing a statement.
pub const STORE_BUSY_TIMEOUT_MS: u64 = 10_000;

/// Tables that must exist before the bot may serve a single request.
pub const REQUIRED_TABLES: [&str; 3] = ["consent", "consent_log", "data"];

// ── Rank ───────────────────────────────────────────────────────────────────
/// Stored rank for consented users no tier matched.
pub const RANK_UNDEFINED: &str = "undefined";
