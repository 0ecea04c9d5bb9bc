//! Ledger polling with signature deduplication.
//!
//! Each pass is height-gated: if the ledger height has not moved since
//! the previous pass, no signature I/O happens. Signatures are
//! deduplicated against a bounded recently-seen set; the set is probed
//! with `contains` and written only for new entries, so eviction is
//! insertion-order rather than access-order.

use std::num::NonZeroUsize;
use std::sync::Arc;

use anyhow::Result;
use lru::LruCache;
use parking_lot::Mutex;
use tokio::time::sleep;

use crate::config::{LedgerConfig, MonitorSettings};
use crate::ledger::{LedgerReader, SignatureRecord};
use crate::models::{EventKind, ProgramEvent, Severity};
use crate::monitor::decoder::EventDecoder;

/// Result of one poll pass.
#[derive(Debug, Default)]
pub struct PollOutcome {
    pub events: Vec<ProgramEvent>,
    /// Height observed at the start of the pass.
    pub height: u64,
    pub processed_signatures: usize,
    pub skipped_duplicates: usize,
}

pub struct LedgerPoller {
    reader: Arc<dyn LedgerReader>,
    decoder: EventDecoder,
    program_id: String,
    fetch_limit: usize,
    retry_count: u32,
    retry_delay: std::time::Duration,
    seen: Mutex<LruCache<String, ()>>,
    /// Newest fully-processed signature, used as the fetch cursor.
    cursor: Mutex<Option<String>>,
    last_height: Mutex<Option<u64>>,
}

impl LedgerPoller {
    pub fn new(
        reader: Arc<dyn LedgerReader>,
        decoder: EventDecoder,
        ledger: &LedgerConfig,
        settings: &MonitorSettings,
    ) -> Self {
        let capacity = NonZeroUsize::new(settings.signature_cache_capacity.max(1))
            .unwrap_or(NonZeroUsize::MIN);
        Self {
            reader,
            decoder,
            program_id: ledger.program_id.clone(),
            fetch_limit: settings.signature_fetch_limit,
            retry_count: ledger.retry_count,
            retry_delay: std::time::Duration::from_millis(ledger.retry_delay_ms),
            seen: Mutex::new(LruCache::new(capacity)),
            cursor: Mutex::new(None),
            last_height: Mutex::new(None),
        }
    }

    pub fn last_height(&self) -> Option<u64> {
        *self.last_height.lock()
    }

    /// Run one poll pass. A returned error means the pass failed as a
    /// whole and the cursor was left unchanged, so the next pass
    /// re-scans the same range.
    pub async fn poll(&self) -> Result<PollOutcome> {
        let height = self.fetch_height_with_retry().await?;

        if *self.last_height.lock() == Some(height) {
            tracing::trace!(height, "Height unchanged, skipping pass");
            return Ok(PollOutcome {
                height,
                ..Default::default()
            });
        }

        let cursor = self.cursor.lock().clone();
        let records = self.fetch_signatures_with_retry(cursor.as_deref()).await?;

        let mut outcome = PollOutcome {
            height,
            ..Default::default()
        };

        for record in &records {
            if self.seen.lock().contains(&record.signature) {
                outcome.skipped_duplicates += 1;
                continue;
            }

            let events = self.process_signature(record).await;
            outcome.events.extend(events);
            outcome.processed_signatures += 1;
            self.seen.lock().put(record.signature.clone(), ());
        }

        // The pass completed; advance the cursor to the newest
        // signature and remember the height gate.
        if let Some(newest) = records.first() {
            *self.cursor.lock() = Some(newest.signature.clone());
        }
        *self.last_height.lock() = Some(height);

        tracing::debug!(
            height,
            processed = outcome.processed_signatures,
            duplicates = outcome.skipped_duplicates,
            events = outcome.events.len(),
            "Poll pass complete"
        );

        Ok(outcome)
    }

    /// Fetch and decode one transaction. Failures synthesize an event
    /// instead of dropping the signature silently.
    async fn process_signature(&self, record: &SignatureRecord) -> Vec<ProgramEvent> {
        match self.reader.parsed_transaction(&record.signature).await {
            Ok(Some(tx)) => self.decoder.decode(&tx),
            Ok(None) => {
                tracing::warn!(signature = %record.signature, "Transaction not decodable");
                let mut event = ProgramEvent::new(
                    EventKind::ContractError,
                    record.signature.clone(),
                    record.slot,
                    Severity::High,
                );
                event.error = Some("Transaction could not be decoded".to_string());
                vec![event]
            }
            Err(e) => {
                tracing::warn!(signature = %record.signature, error = %e, "Transaction fetch failed");
                let mut event = ProgramEvent::new(
                    EventKind::TransactionFailed,
                    record.signature.clone(),
                    record.slot,
                    Severity::High,
                );
                event.error = Some(e.to_string());
                vec![event]
            }
        }
    }

    async fn fetch_height_with_retry(&self) -> Result<u64> {
        let mut attempt = 0;
        loop {
            match self.reader.current_height().await {
                Ok(height) => return Ok(height),
                Err(e) if attempt < self.retry_count => {
                    attempt += 1;
                    tracing::debug!(attempt, error = %e, "Height fetch failed, retrying");
                    sleep(self.retry_delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn fetch_signatures_with_retry(
        &self,
        cursor: Option<&str>,
    ) -> Result<Vec<SignatureRecord>> {
        let mut attempt = 0;
        loop {
            match self
                .reader
                .signatures_for_address(&self.program_id, cursor, self.fetch_limit)
                .await
            {
                Ok(records) => return Ok(records),
                Err(e) if attempt < self.retry_count => {
                    attempt += 1;
                    tracing::debug!(attempt, error = %e, "Signature fetch failed, retrying");
                    sleep(self.retry_delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }
}
