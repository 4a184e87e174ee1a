//! Batch status tracking
//!
//! Records live in a concurrent map keyed by batch id. A record is cloned out
//! before any wallet round trip and the result is folded back in afterwards,
//! so no map guard is ever held across an await.

use super::BatchStatusRecord;
use crate::error::{BatchError, BatchResult};
use crate::metrics;
use crate::protocol::{parse_calls_status, BatchId};
use crate::session::SessionTracker;
use crate::transport::WalletTransport;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures::future::join_all;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};

pub struct BatchTracker {
    transport: Arc<dyn WalletTransport>,
    session: Arc<SessionTracker>,
    records: DashMap<BatchId, BatchStatusRecord>,
    /// Caller correlation id to the id the wallet tracks the batch under
    correlations: DashMap<BatchId, BatchId>,
}

impl BatchTracker {
    pub fn new(transport: Arc<dyn WalletTransport>, session: Arc<SessionTracker>) -> Self {
        Self {
            transport,
            session,
            records: DashMap::new(),
            correlations: DashMap::new(),
        }
    }

    /// Start tracking a freshly submitted batch
    pub(crate) fn register(&self, record: BatchStatusRecord) -> BatchResult<()> {
        if let Some(correlation_id) = &record.correlation_id {
            if self.correlations.contains_key(correlation_id) {
                return Err(BatchError::DuplicateCorrelationId {
                    id: correlation_id.clone(),
                });
            }
        }

        match self.records.entry(record.id.clone()) {
            Entry::Occupied(existing) => Err(BatchError::DuplicateCorrelationId {
                id: existing.key().clone(),
            }),
            Entry::Vacant(slot) => {
                debug!("Tracking batch {} on chain {}", record.id, record.chain_id);
                if let Some(correlation_id) = &record.correlation_id {
                    self.correlations
                        .insert(correlation_id.clone(), record.id.clone());
                }
                slot.insert(record);
                metrics::record_tracked_batches(self.records.len());
                Ok(())
            }
        }
    }

    pub fn contains(&self, id: &BatchId) -> bool {
        self.records.contains_key(id)
    }

    /// Whether `id` is a tracked batch or the correlation id of one
    pub fn is_id_in_use(&self, id: &BatchId) -> bool {
        self.records.contains_key(id) || self.correlations.contains_key(id)
    }

    /// Last known record, without asking the wallet
    pub fn snapshot(&self, id: &BatchId) -> Option<BatchStatusRecord> {
        self.records.get(id).map(|r| r.value().clone())
    }

    /// Tracked batch ids, oldest submission first
    pub fn tracked_ids(&self) -> Vec<BatchId> {
        let mut entries: Vec<_> = self
            .records
            .iter()
            .map(|r| (r.submitted_at, r.key().clone()))
            .collect();
        entries.sort();
        entries.into_iter().map(|(_, id)| id).collect()
    }

    /// Stop tracking a batch. The wallet is not told.
    pub fn discard(&self, id: &BatchId) -> Option<BatchStatusRecord> {
        let removed = self.records.remove(id).map(|(_, record)| record);
        if let Some(record) = &removed {
            if let Some(correlation_id) = &record.correlation_id {
                self.correlations
                    .remove_if(correlation_id, |_, tracked| tracked == id);
            }
            debug!("Stopped tracking batch {}", id);
            metrics::record_tracked_batches(self.records.len());
        }
        removed
    }

    /// Current status of a tracked batch.
    ///
    /// Terminal records are answered from memory. Otherwise the wallet is asked
    /// and the record advanced; a failed query leaves the record untouched.
    pub async fn get_status(&self, id: &BatchId) -> BatchResult<BatchStatusRecord> {
        let snapshot = self
            .snapshot(id)
            .ok_or_else(|| BatchError::UnknownBatchIdentifier { id: id.clone() })?;

        if snapshot.is_terminal() {
            return Ok(snapshot);
        }

        let result = self.query(&snapshot).await;
        if let Err(e) = &result {
            metrics::record_status_query_failed(e.kind());
        }
        result
    }

    async fn query(&self, snapshot: &BatchStatusRecord) -> BatchResult<BatchStatusRecord> {
        let id = &snapshot.id;
        let binding = self.session.bind(snapshot.account)?;

        metrics::record_status_query(snapshot.chain_id);
        let payload = self.transport.request_batch_status(id).await.map_err(|e| {
            warn!("Status query for batch {} failed: {}", id, e);
            BatchError::Transport(e)
        })?;

        let update = parse_calls_status(
            id,
            snapshot.chain_id,
            snapshot.call_count,
            snapshot.atomicity,
            payload,
        )?;

        if !self.session.is_current(&binding) {
            warn!("Discarding status of batch {}: session changed", id);
            return Err(BatchError::SessionChanged {
                operation: "status query",
            });
        }

        let mut record = self
            .records
            .get_mut(id)
            .ok_or_else(|| BatchError::UnknownBatchIdentifier { id: id.clone() })?;

        // A concurrent query may have resolved it meanwhile
        if record.is_terminal() {
            return Ok(record.value().clone());
        }

        let previous = record.state;
        record.apply(update)?;
        let updated = record.value().clone();
        drop(record);

        if updated.state != previous {
            debug!("Batch {}: {} -> {}", id, previous, updated.state);
        }

        if updated.is_terminal() {
            info!(
                "Batch {} {} after {} polls (code {:?})",
                id, updated.state, updated.polls, updated.status_code
            );
            metrics::record_batch_resolved(updated.chain_id, updated.state, updated.elapsed_secs());
        }

        Ok(updated)
    }

    /// Query every unresolved batch once, concurrently
    pub async fn poll_pending(&self) -> Vec<(BatchId, BatchResult<BatchStatusRecord>)> {
        let pending: Vec<BatchId> = self
            .records
            .iter()
            .filter(|r| !r.is_terminal())
            .map(|r| r.key().clone())
            .collect();

        let results = join_all(pending.iter().map(|id| self.get_status(id))).await;
        pending.into_iter().zip(results).collect()
    }

    /// Poll until the batch reaches a terminal state.
    ///
    /// Transient failures are logged and polled again; anything else ends the wait.
    pub async fn wait_for_completion(
        &self,
        id: &BatchId,
        poll_interval: Duration,
    ) -> BatchResult<BatchStatusRecord> {
        let mut ticker = interval(poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;

            match self.get_status(id).await {
                Ok(record) if record.is_terminal() => return Ok(record),
                Ok(record) => debug!("Batch {} still {}", id, record.state),
                Err(e) if e.is_retryable() => {
                    warn!("Polling batch {} failed, retrying: {}", id, e)
                }
                Err(e) => return Err(e),
            }
        }
    }
}
