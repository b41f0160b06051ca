// ConsentKeeper — Ingestion Pipeline
//
// Walks a lazy, chronological message stream and stores messages from
// consented authors, encrypted, keyed by the author's identity hash.
//
// Every message is its own unit of work. Duplicates (same author and
// plaintext) are skipped through the store's UNIQUE row_hash; other storage
// failures, consent lookups included, are logged and skipped. A message without text content aborts
// the whole run: it means the bot cannot read message content at all.

use std::pin::pin;

use futures::{Stream, StreamExt};
use log::{debug, error, info, warn};

use crate::atoms::error::{EngineError, EngineResult};
use crate::atoms::types::{ChannelMessage, InsertOutcome};
use crate::crypto::{content_fingerprint, hash_identity, hash_prefix};
use crate::registry::ConsentRegistry;

/// Per-run counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CollectReport {
    pub scanned: usize,
    pub consented: usize,
    pub inserted: usize,
    pub duplicates: usize,
    pub failed: usize,
}

pub struct IngestPipeline {
    registry: ConsentRegistry,
}

impl IngestPipeline {
    pub fn new(registry: ConsentRegistry) -> Self {
        IngestPipeline { registry }
    }

    /// Run the pipeline and return the number of newly stored messages.
    pub async fn collect<S>(&self, source: S) -> EngineResult<usize>
    where
        S: Stream<Item = EngineResult<ChannelMessage>>,
    {
        self.collect_report(source).await.map(|r| r.inserted)
    }

    /// Run the pipeline and return the full report.
    ///
    /// Errors yielded by the source end the run and are propagated; rows
    /// stored before that point stay committed.
    pub async fn collect_report<S>(&self, source: S) -> EngineResult<CollectReport>
    where
        S: Stream<Item = EngineResult<ChannelMessage>>,
    {
        let mut source = pin!(source);
        let mut report = CollectReport::default();

        while let Some(item) = source.next().await {
            let message = item?;
            report.scanned += 1;

            let content = match message.content.as_deref() {
                Some(c) if !c.is_empty() => c,
                _ => {
                    error!(
                        "[ingest] CRITICAL: message #{} has no readable content; aborting run \
                         (is the Message Content intent enabled?)",
                        report.scanned
                    );
                    return Err(EngineError::MissingContentAccess(
                        "message content is empty; enable the Message Content intent".into(),
                    ));
                }
            };

            let user_hash = hash_identity(&message.author_id);
            // Checked per message: a retraction may land while the source awaits.
            match self.registry.is_registered(&user_hash) {
                Ok(true) => {}
                Ok(false) => continue,
                Err(e) => {
                    warn!("[ingest] Consent lookup failed for {}: {}", hash_prefix(&user_hash), e);
                    report.failed += 1;
                    continue;
                }
            }
            report.consented += 1;

            self.store_message(&user_hash, content, &mut report);
        }

        info!(
            "[ingest] Run complete: scanned={} consented={} inserted={} duplicates={} failed={}",
            report.scanned, report.consented, report.inserted, report.duplicates, report.failed
        );
        Ok(report)
    }

    fn store_message(&self, user_hash: &str, content: &str, report: &mut CollectReport) {
        let row_hash = content_fingerprint(user_hash, content);
        let message_enc = match self.registry.cipher().encrypt(content) {
            Ok(enc) => enc,
            Err(e) => {
                warn!("[ingest] Encrypt failed for {}: {}", hash_prefix(user_hash), e);
                report.failed += 1;
                return;
            }
        };

        match self.registry.store().insert_message(user_hash, &message_enc, &row_hash) {
            InsertOutcome::Inserted => report.inserted += 1,
            InsertOutcome::AlreadyExists => {
                debug!("[ingest] Duplicate {} skipped", hash_prefix(&row_hash));
                report.duplicates += 1;
            }
            InsertOutcome::Failed(e) => {
                warn!("[ingest] Store failed for {}: {}", hash_prefix(user_hash), e);
                report.failed += 1;
            }
        }
    }
}
