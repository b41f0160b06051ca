// ConsentKeeper Core Library
// Consent-gated message collection: identity crypto, SQLite store, consent
// registry, idempotent ingestion and rank resolution. No Discord types here.

pub mod atoms;
pub mod crypto;
pub mod ingest;
pub mod rank;
pub mod registry;
pub mod store;

pub use atoms::constants::RANK_UNDEFINED;
pub use atoms::error::{EngineError, EngineResult};
pub use atoms::types::{AuditEntry, ChannelMessage, ConsentAction, InsertOutcome, Rank, RankTier, StoreStats};
pub use crypto::{content_fingerprint, generate_key_hex, hash_identity, hash_prefix, Cipher};
pub use ingest::{CollectReport, IngestPipeline};
pub use rank::{RankResolver, RoleDirectory};
pub use registry::{ConsentRegistry, RegisterOutcome, RetractOutcome};
pub use store::Store;
