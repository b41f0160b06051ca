// ── ConsentKeeper Atoms: Error Types ───────────────────────────────────────
// Single canonical error enum for the core, built with `thiserror`.
//
// Design rules:
//   • Variants are coarse-grained by failure class (config, schema, integrity…).
//   • Duplicate inserts are NOT errors; see `InsertOutcome::AlreadyExists`.
//   • No variant carries raw user IDs, key material, or message text.

use thiserror::Error;

// ── Primary error enum ─────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum EngineError {
    /// Filesystem or OS-level I/O failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization / deserialization failure.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// SQLite failure that is not a uniqueness violation.
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Secret key or other startup configuration is missing or malformed.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Required tables are missing from the database.
    #[error("Schema error: {0}")]
    Schema(String),

    /// A ciphertext token is malformed or has been tampered with.
    #[error("Integrity error: {0}")]
    Integrity(String),

    /// The message source yields messages without text content. Usually the
    /// bot lacks the Message Content intent; the run must not be retried
    /// until the permission is fixed.
    #[error("Missing content access: {0}")]
    MissingContentAccess(String),

    /// A multi-table write only partially succeeded.
    #[error("Consistency error: {0}")]
    Consistency(String),

    /// The external role-membership source failed.
    #[error("Role lookup error: {0}")]
    RoleLookup(String),

    /// Chat-platform transport failure.
    #[error("Channel error: {channel}: {message}")]
    Channel { channel: String, message: String },

    /// Catch-all for errors that do not yet have a dedicated variant.
    #[error("{0}")]
    Other(String),
}

// ── Convenience constructors ───────────────────────────────────────────────

impl EngineError {
    /// Create a channel error with name and message.
    pub fn channel(channel: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Channel { channel: channel.into(), message: message.into() }
    }

    /// True for errors that must stop the process or the current run loudly.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::Config(_) | Self::Schema(_) | Self::MissingContentAccess(_) | Self::Consistency(_)
        )
    }
}

// ── String → EngineError bridge ────────────────────────────────────────────
// Allows `?` on ad-hoc `Err("…".into())` values.

impl From<String> for EngineError {
    fn from(s: String) -> Self {
        EngineError::Other(s)
    }
}

impl From<&str> for EngineError {
    fn from(s: &str) -> Self {
        EngineError::Other(s.to_string())
    }
}

// ── Convenience alias ──────────────────────────────────────────────────────

/// All core operations return this type.
pub type EngineResult<T> = Result<T, EngineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fatal_classification() {
        assert!(EngineError::Config("no key".into()).is_fatal());
        assert!(EngineError::MissingContentAccess("empty".into()).is_fatal());
        assert!(!EngineError::Integrity("bad pad".into()).is_fatal());
        assert!(!EngineError::Other("x".into()).is_fatal());
    }

    #[test]
    fn channel_error_display() {
        let e = EngineError::channel("discord", "gateway closed");
        assert_eq!(e.to_string(), "Channel error: discord: gateway closed");
    }
}
