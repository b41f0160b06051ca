// ConsentKeeper — Consent Registry
//
// Business rules over the store:
//   register  insert the consent record, then append "gave consent"
//   retract   delete record + collected messages atomically, then append
//             "retracted consent"
//
// Every retract request is audited, including one with nothing to remove.
// A repeated register leaves the log untouched.
// An audit write that fails after the consent tables changed is escalated
// as `EngineError::Consistency`; it is never swallowed.

use std::sync::Arc;

use chrono::{SecondsFormat, Utc};
use log::{debug, error, info};

use crate::atoms::error::{EngineError, EngineResult};
use crate::atoms::types::{ConsentAction, InsertOutcome};
use crate::crypto::{hash_identity, hash_prefix, Cipher};
use crate::store::Store;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegisterOutcome {
    Registered,
    AlreadyRegistered,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetractOutcome {
    Retracted { deleted_messages: usize },
    NotRegistered,
}

/// Consent operations exposed to interaction handlers.
#[derive(Clone)]
pub struct ConsentRegistry {
    store: Arc<Store>,
    cipher: Arc<Cipher>,
}

impl ConsentRegistry {
    pub fn new(store: Arc<Store>, cipher: Arc<Cipher>) -> Self {
        ConsentRegistry { store, cipher }
    }

    pub fn store(&self) -> &Arc<Store> {
        &self.store
    }

    pub fn cipher(&self) -> &Arc<Cipher> {
        &self.cipher
    }

    /// Opt a user in. Registering twice is a successful no-op.
    pub fn register(&self, raw_identity: &str) -> EngineResult<RegisterOutcome> {
        let user_hash = hash_identity(raw_identity);
        let user_enc = self.cipher.encrypt(raw_identity)?;

        match self.store.insert_consent(&user_hash) {
            InsertOutcome::Inserted => {}
            InsertOutcome::AlreadyExists => {
                debug!("[registry] {} already registered", hash_prefix(&user_hash));
                return Ok(RegisterOutcome::AlreadyRegistered);
            }
            InsertOutcome::Failed(e) => {
                error!("[registry] Failed to register {}: {}", hash_prefix(&user_hash), e);
                return Err(e);
            }
        }

        if let Err(e) = self.store.append_audit(&user_enc, ConsentAction::GaveConsent, &audit_timestamp()) {
            error!(
                "[registry] CRITICAL: consent recorded for {} but audit write failed: {}",
                hash_prefix(&user_hash),
                e
            );
            return Err(EngineError::Consistency(format!(
                "consent record created without audit entry: {}",
                e
            )));
        }

        info!("[registry] Registered {}", hash_prefix(&user_hash));
        Ok(RegisterOutcome::Registered)
    }

    /// Opt a user out, deleting every message collected for them.
    pub fn retract(&self, raw_identity: &str) -> EngineResult<RetractOutcome> {
        let user_hash = hash_identity(raw_identity);
        let user_enc = self.cipher.encrypt(raw_identity)?;

        let (removed, deleted_messages) = self.store.delete_consent_cascade(&user_hash).map_err(|e| {
            error!("[registry] Failed to retract {}: {}", hash_prefix(&user_hash), e);
            e
        })?;

        if let Err(e) =
            self.store.append_audit(&user_enc, ConsentAction::RetractedConsent, &audit_timestamp())
        {
            if !removed {
                error!("[registry] Failed to audit retract for {}: {}", hash_prefix(&user_hash), e);
                return Err(e);
            }
            error!(
                "[registry] CRITICAL: consent for {} deleted but audit write failed: {}",
                hash_prefix(&user_hash),
                e
            );
            return Err(EngineError::Consistency(format!(
                "consent retracted without audit entry: {}",
                e
            )));
        }

        if !removed {
            debug!("[registry] Retract for {} with no consent record", hash_prefix(&user_hash));
            return Ok(RetractOutcome::NotRegistered);
        }

        info!(
            "[registry] Retracted {} ({} messages deleted)",
            hash_prefix(&user_hash),
            deleted_messages
        );
        Ok(RetractOutcome::Retracted { deleted_messages })
    }

    /// Existence check by identity hash. No side effects.
    pub fn is_registered(&self, user_id_hash: &str) -> EngineResult<bool> {
        self.store.consent_exists(user_id_hash)
    }

    /// Existence check by raw identity.
    pub fn status(&self, raw_identity: &str) -> EngineResult<bool> {
        self.is_registered(&hash_identity(raw_identity))
    }
}

fn audit_timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::generate_key_hex;

    fn registry() -> ConsentRegistry {
        let store = Arc::new(Store::open_in_memory().unwrap());
        let cipher = Arc::new(Cipher::from_hex(&generate_key_hex()).unwrap());
        ConsentRegistry::new(store, cipher)
    }

    #[test]
    fn register_is_idempotent() {
        let reg = registry();
        assert_eq!(reg.register("1001").unwrap(), RegisterOutcome::Registered);
        assert_eq!(reg.register("1001").unwrap(), RegisterOutcome::AlreadyRegistered);
        assert!(reg.status("1001").unwrap());
        assert!(reg.is_registered(&hash_identity("1001")).unwrap());
        // Only the real transition is audited.
        assert_eq!(reg.store().audit_entries().unwrap().len(), 1);
    }

    #[test]
    fn retract_without_record_is_still_audited() {
        let reg = registry();
        assert_eq!(reg.retract("1001").unwrap(), RetractOutcome::NotRegistered);
        let entries = reg.store().audit_entries().unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].action, ConsentAction::RetractedConsent);
        assert_eq!(reg.cipher.decrypt(&entries[0].user_id_enc).unwrap(), "1001");
        assert!(!reg.status("1001").unwrap());
    }

    #[test]
    fn audit_entries_decrypt_to_identity_with_ordered_timestamps() {
        let reg = registry();
        reg.register("42").unwrap();
        reg.retract("42").unwrap();
        reg.register("42").unwrap();

        let entries = reg.store().audit_entries().unwrap();
        let actions: Vec<_> = entries.iter().map(|e| e.action).collect();
        assert_eq!(
            actions,
            vec![ConsentAction::GaveConsent, ConsentAction::RetractedConsent, ConsentAction::GaveConsent]
        );
        for e in &entries {
            assert_eq!(reg.cipher.decrypt(&e.user_id_enc).unwrap(), "42");
            assert_ne!(e.user_id_enc, "42");
        }
        assert!(entries.windows(2).all(|w| w[0].timestamp <= w[1].timestamp));
    }

    #[test]
    fn reregistration_resets_rank() {
        use crate::atoms::types::Rank;
        let reg = registry();
        reg.register("7").unwrap();
        let h = hash_identity("7");
        reg.store().set_rank(&h, &Rank::Tier("Diamond".into())).unwrap();
        reg.retract("7").unwrap();
        reg.register("7").unwrap();
        assert_eq!(reg.store().rank_of(&h).unwrap(), Some(Rank::Undefined));
    }

    #[test]
    fn retract_reports_deleted_messages() {
        let reg = registry();
        reg.register("5").unwrap();
        let h = hash_identity("5");
        reg.store().insert_message(&h, "e1", "r1").into_result().unwrap();
        reg.store().insert_message(&h, "e2", "r2").into_result().unwrap();
        assert_eq!(reg.retract("5").unwrap(), RetractOutcome::Retracted { deleted_messages: 2 });
        assert_eq!(reg.store().message_count_for(&h).unwrap(), 0);
    }

    #[test]
    fn audit_failure_after_insert_is_consistency_error() {
        let reg = registry();
        reg.store()
            .with_conn(|conn| {
                conn.execute_batch("DROP TABLE consent_log;")?;
                Ok(())
            })
            .unwrap();
        match reg.register("9") {
            Err(EngineError::Consistency(_)) => {}
            other => panic!("expected consistency error, got {:?}", other),
        }
        // The consent record itself was durable before the audit write.
        assert!(reg.status("9").unwrap());
    }
}
