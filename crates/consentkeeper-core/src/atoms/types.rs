// ── ConsentKeeper Atoms: Data Model ────────────────────────────────────────
// Plain data shared by the store, registry, pipeline and rank resolver.

use serde::{Deserialize, Serialize};

use super::constants::RANK_UNDEFINED;
use super::error::EngineError;

// ── Audit actions ──────────────────────────────────────────────────────────

/// The only two consent state transitions recorded in the audit log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConsentAction {
    GaveConsent,
    RetractedConsent,
}

impl ConsentAction {
    /// Stored representation in `consent_log.action`.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::GaveConsent => "gave consent",
            Self::RetractedConsent => "retracted consent",
        }
    }
}

impl std::fmt::Display for ConsentAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ConsentAction {
    type Err = EngineError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "gave consent" => Ok(Self::GaveConsent),
            "retracted consent" => Ok(Self::RetractedConsent),
            other => Err(EngineError::Other(format!("Unknown consent action: {}", other))),
        }
    }
}

// ── Rank ───────────────────────────────────────────────────────────────────

/// A community tier, or `Undefined` until the resolver finds one.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Rank {
    Undefined,
    Tier(String),
}

impl Rank {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Undefined => RANK_UNDEFINED,
            Self::Tier(name) => name,
        }
    }

    /// Map a stored column value back to a rank.
    pub fn from_stored(value: &str) -> Self {
        if value.is_empty() || value == RANK_UNDEFINED {
            Self::Undefined
        } else {
            Self::Tier(value.to_string())
        }
    }
}

impl Default for Rank {
    fn default() -> Self {
        Self::Undefined
    }
}

impl std::fmt::Display for Rank {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One entry of the ordered tier list handed to the rank resolver.
/// The list is ordered highest precedence first.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RankTier {
    pub name: String,
    pub role_id: String,
}

// ── Ingestion input ────────────────────────────────────────────────────────

/// A historical chat message as yielded by the channel source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelMessage {
    /// Raw platform identifier of the author. Never persisted.
    pub author_id: String,
    /// Message text; `None` or empty means the bot cannot read content.
    pub content: Option<String>,
}

impl ChannelMessage {
    pub fn new(author_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self { author_id: author_id.into(), content: Some(content.into()) }
    }
}

// ── Store outcomes ─────────────────────────────────────────────────────────

/// Result of an insert guarded by a uniqueness constraint.
#[derive(Debug)]
pub enum InsertOutcome {
    Inserted,
    AlreadyExists,
    Failed(EngineError),
}

impl InsertOutcome {
    /// Classify a rusqlite result: UNIQUE / PRIMARY KEY violations become
    /// `AlreadyExists`, every other failure (NOT NULL, CHECK, I/O) is `Failed`.
    pub fn from_sqlite(result: rusqlite::Result<usize>) -> Self {
        use rusqlite::ffi::{SQLITE_CONSTRAINT_PRIMARYKEY, SQLITE_CONSTRAINT_UNIQUE};
        match result {
            Ok(_) => Self::Inserted,
            Err(rusqlite::Error::SqliteFailure(e, _))
                if e.code == rusqlite::ErrorCode::ConstraintViolation
                    && matches!(e.extended_code, SQLITE_CONSTRAINT_UNIQUE | SQLITE_CONSTRAINT_PRIMARYKEY) =>
            {
                Self::AlreadyExists
            }
            Err(e) => Self::Failed(EngineError::Database(e)),
        }
    }

    /// `Ok(true)` if a row was written, `Ok(false)` if it already existed.
    pub fn into_result(self) -> Result<bool, EngineError> {
        match self {
            Self::Inserted => Ok(true),
            Self::AlreadyExists => Ok(false),
            Self::Failed(e) => Err(e),
        }
    }
}

/// One row of the append-only audit log.
#[derive(Debug, Clone, Serialize)]
pub struct AuditEntry {
    pub id: i64,
    pub user_id_enc: String,
    pub action: ConsentAction,
    pub timestamp: String,
}

/// Table counts for operator reporting.
#[derive(Debug, Clone, Default, Serialize)]
pub struct StoreStats {
    pub consent_records: i64,
    pub audit_entries: i64,
    pub collected_messages: i64,
    /// (rank, number of consented users), most common first.
    pub ranks: Vec<(String, i64)>,
}
