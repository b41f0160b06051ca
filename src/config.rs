// ConsentKeeper — Bot configuration
//
// Loaded once at startup from the process environment, falling back to a
// `.env` file in the working directory (real environment variables win).
// ENVIRONMENT=railway skips the `.env` file entirely.
//
// Every value is validated here so a bad deployment fails with
// `EngineError::Config` before any socket or database is opened.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use consentkeeper_core::{Cipher, EngineError, EngineResult, RankTier, RANK_UNDEFINED};
use log::{info, warn};
use serde::Deserialize;

const DOTENV_FILE: &str = ".env";

#[derive(Clone)]
pub struct BotConfig {
    pub discord_token: String,
    pub guild_id: String,
    pub channel_id: String,
    pub encryption_key: String,
    pub database_path: PathBuf,
    pub collect_password: String,
    pub logfile_path: Option<PathBuf>,
    pub ranks_path: Option<PathBuf>,
}

// Secrets stay out of logs and panic messages.
impl std::fmt::Debug for BotConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BotConfig")
            .field("discord_token", &"<redacted>")
            .field("guild_id", &self.guild_id)
            .field("channel_id", &self.channel_id)
            .field("encryption_key", &"<redacted>")
            .field("database_path", &self.database_path)
            .field("collect_password", &"<redacted>")
            .field("logfile_path", &self.logfile_path)
            .field("ranks_path", &self.ranks_path)
            .finish()
    }
}

impl BotConfig {
    /// Read the process environment, merged with `.env` unless running on
    /// Railway.
    pub fn from_env() -> EngineResult<Self> {
        let dotenv = if std::env::var("ENVIRONMENT").as_deref() == Ok("railway") {
            HashMap::new()
        } else {
            load_dotenv(Path::new(DOTENV_FILE))?
        };
        Self::from_lookup(|key| std::env::var(key).ok().or_else(|| dotenv.get(key).cloned()))
    }

    /// Build from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> EngineResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let require = |key: &str| get(key).ok_or_else(|| EngineError::Config(format!("{} is not set", key)));

        let discord_token = require("DISCORD_TOKEN")?;
        let guild_id = require_snowflake(&require("SERVER_ID")?, "SERVER_ID")?;
        let channel_id = require_snowflake(&require("CHANNEL_ID")?, "CHANNEL_ID")?;
        let encryption_key = require("ENCRYPTION_KEY")?;
        Cipher::from_hex(&encryption_key)?;
        let collect_password = require("COLLECT_PASSWORD")?;

        let database_path = get("DATABASE_PATH").map(PathBuf::from).unwrap_or_else(default_database_path);

        Ok(BotConfig {
            discord_token,
            guild_id,
            channel_id,
            encryption_key,
            database_path,
            collect_password,
            logfile_path: get("LOGFILE_PATH").map(PathBuf::from),
            ranks_path: get("RANKS_PATH").map(PathBuf::from),
        })
    }

    pub fn cipher(&self) -> EngineResult<Cipher> {
        Cipher::from_hex(&self.encryption_key)
    }

    /// Rank tiers from `RANKS_PATH`, highest precedence first.
    pub fn rank_tiers(&self) -> EngineResult<Vec<RankTier>> {
        match &self.ranks_path {
            Some(path) => load_rank_tiers(path),
            None => {
                warn!("[config] RANKS_PATH not set; every user will rank as undefined");
                Ok(Vec::new())
            }
        }
    }
}

fn default_database_path() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("consentkeeper")
        .join("consent.db")
}

fn require_snowflake(value: &str, key: &str) -> EngineResult<String> {
    value
        .parse::<u64>()
        .map(|_| value.to_string())
        .map_err(|_| EngineError::Config(format!("{} must be a numeric Discord ID", key)))
}

// ── .env ───────────────────────────────────────────────────────────────

/// Read `KEY=value` pairs from a `.env` file. A missing file is empty.
pub fn load_dotenv(path: &Path) -> EngineResult<HashMap<String, String>> {
    match std::fs::read_to_string(path) {
        Ok(contents) => {
            let vars = parse_dotenv(&contents);
            info!("[config] Loaded {} entries from {}", vars.len(), path.display());
            Ok(vars)
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(HashMap::new()),
        Err(e) => Err(e.into()),
    }
}

pub fn parse_dotenv(contents: &str) -> HashMap<String, String> {
    let mut vars = HashMap::new();
    for line in contents.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let line = line.strip_prefix("export ").unwrap_or(line);
        if let Some((key, value)) = line.split_once('=') {
            let key = key.trim();
            if key.is_empty() {
                continue;
            }
            vars.insert(key.to_string(), unquote(value.trim()).to_string());
        }
    }
    vars
}

fn unquote(value: &str) -> &str {
    for q in ['"', '\''] {
        if value.len() >= 2 && value.starts_with(q) && value.ends_with(q) {
            return &value[1..value.len() - 1];
        }
    }
    value
}

// ── Rank tiers ─────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct RanksFile {
    #[serde(default, rename = "tier")]
    tiers: Vec<RankTier>,
}

/// Parse a ranks file:
///
/// ```toml
/// [[tier]]
/// name = "Diamond"
/// role_id = "1234567890"
/// ```
pub fn parse_rank_tiers(content: &str) -> EngineResult<Vec<RankTier>> {
    let file: RanksFile =
        toml::from_str(content).map_err(|e| EngineError::Config(format!("ranks file: {}", e)))?;
    for tier in &file.tiers {
        if tier.name.trim().is_empty() {
            return Err(EngineError::Config("ranks file: tier with empty name".into()));
        }
        // Stored ranks share a column with the no-rank sentinel.
        if tier.name.trim().eq_ignore_ascii_case(RANK_UNDEFINED) {
            return Err(EngineError::Config(format!(
                "ranks file: tier name '{}' is reserved",
                RANK_UNDEFINED
            )));
        }
        require_snowflake(&tier.role_id, &format!("role_id of tier {}", tier.name))?;
    }
    Ok(file.tiers)
}

pub fn load_rank_tiers(path: &Path) -> EngineResult<Vec<RankTier>> {
    match std::fs::read_to_string(path) {
        Ok(content) => {
            let tiers = parse_rank_tiers(&content)?;
            info!("[config] Loaded {} rank tiers from {}", tiers.len(), path.display());
            Ok(tiers)
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            warn!("[config] Ranks file {} not found; using no tiers", path.display());
            Ok(Vec::new())
        }
        Err(e) => Err(e.into()),
    }
}
