// ConsentKeeper — Rank Resolver
//
// Maps a consented user's identity hash to the highest-precedence community
// tier whose role they hold. Role membership comes from a `RoleDirectory`
// (the guild, in production). Every network lookup finishes before the store
// is touched, so no pooled connection is held across an `.await`.

use std::collections::HashSet;

use async_trait::async_trait;
use log::{debug, error, info, warn};

use crate::atoms::error::{EngineError, EngineResult};
use crate::atoms::types::{Rank, RankTier};
use crate::crypto::{hash_identity, hash_prefix};
use crate::store::Store;

/// External source of role membership.
#[async_trait]
pub trait RoleDirectory: Send + Sync {
    /// Raw identities of every member holding `role_id`.
    /// `Ok(None)` when the role does not exist.
    async fn members_with_role(&self, role_id: &str) -> EngineResult<Option<Vec<String>>>;
}

/// Hashed membership of each tier, in precedence order.
struct TierSnapshot {
    name: String,
    members: HashSet<String>,
}

pub struct RankResolver {
    tiers: Vec<RankTier>,
}

impl RankResolver {
    /// `tiers` is ordered highest precedence first.
    pub fn new(tiers: Vec<RankTier>) -> Self {
        RankResolver { tiers }
    }

    pub fn tiers(&self) -> &[RankTier] {
        &self.tiers
    }

    /// First tier whose members include `user_id_hash`, if any.
    pub async fn resolve_rank(
        &self,
        user_id_hash: &str,
        directory: &dyn RoleDirectory,
    ) -> EngineResult<Option<String>> {
        for tier in &self.tiers {
            let Some(members) = directory.members_with_role(&tier.role_id).await? else {
                warn!("[rank] Role {} for tier {} not found, skipping", tier.role_id, tier.name);
                continue;
            };
            if members.iter().any(|m| hash_identity(m) == user_id_hash) {
                return Ok(Some(tier.name.clone()));
            }
        }
        Ok(None)
    }

    /// Resolve and store one user's rank. Returns false when the user has no
    /// consent record; a record is never created here.
    pub async fn update_rank(
        &self,
        store: &Store,
        user_id_hash: &str,
        directory: &dyn RoleDirectory,
    ) -> EngineResult<bool> {
        if !store.consent_exists(user_id_hash)? {
            debug!("[rank] {} not consented, rank not updated", hash_prefix(user_id_hash));
            return Ok(false);
        }
        let rank = match self.resolve_rank(user_id_hash, directory).await? {
            Some(name) => Rank::Tier(name),
            None => Rank::Undefined,
        };
        let updated = store.set_rank(user_id_hash, &rank)?;
        if updated {
            info!("[rank] {} -> {}", hash_prefix(user_id_hash), rank);
        }
        Ok(updated)
    }

    /// Resolve every consented user's rank and write all of them in one
    /// transaction. Returns the number of records updated.
    ///
    /// A failed role lookup fails the whole batch before anything is written.
    pub async fn batch_update_ranks(&self, store: &Store, directory: &dyn RoleDirectory) -> EngineResult<usize> {
        let snapshot = match self.snapshot(directory).await {
            Ok(s) => s,
            Err(e) => {
                error!("[rank] CRITICAL: batch rank update aborted, no ranks written: {}", e);
                return Err(e);
            }
        };

        let hashes = store.consented_hashes()?;
        let updates: Vec<(String, Rank)> = hashes
            .into_iter()
            .map(|hash| {
                let rank = snapshot
                    .iter()
                    .find(|tier| tier.members.contains(&hash))
                    .map(|tier| Rank::Tier(tier.name.clone()))
                    .unwrap_or(Rank::Undefined);
                (hash, rank)
            })
            .collect();

        let updated = store.set_ranks(&updates).map_err(|e| {
            error!("[rank] CRITICAL: batch rank write failed, transaction rolled back: {}", e);
            e
        })?;
        info!("[rank] Batch updated {} of {} consented users", updated, updates.len());
        Ok(updated)
    }

    /// Fetch and hash every tier's membership once.
    async fn snapshot(&self, directory: &dyn RoleDirectory) -> EngineResult<Vec<TierSnapshot>> {
        let mut out = Vec::with_capacity(self.tiers.len());
        for tier in &self.tiers {
            let members = directory
                .members_with_role(&tier.role_id)
                .await
                .map_err(|e| EngineError::RoleLookup(format!("tier {}: {}", tier.name, e)))?;
            match members {
                Some(members) => out.push(TierSnapshot {
                    name: tier.name.clone(),
                    members: members.iter().map(|m| hash_identity(m)).collect(),
                }),
                None => warn!("[rank] Role {} for tier {} not found, skipping", tier.role_id, tier.name),
            }
        }
        Ok(out)
    }
}
