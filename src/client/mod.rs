//! Client entry point composing capability negotiation, submission and tracking
//! over one wallet session and one transport

use crate::batch::{BatchRequest, BatchStatusRecord, BatchSubmitter, BatchTracker};
use crate::capabilities::CapabilityRegistry;
use crate::error::BatchResult;
use crate::protocol::{BatchId, CapabilitySet};
use crate::session::{SessionBoundary, SessionTracker};
use crate::transport::WalletTransport;

use ethers::types::Address;
use std::sync::Arc;
use std::time::Duration;

#[cfg(test)]
mod tests;

/// EIP-5792 batch-call client
pub struct BatchClient {
    session: Arc<SessionTracker>,
    capabilities: Arc<CapabilityRegistry>,
    submitter: BatchSubmitter,
    tracker: Arc<BatchTracker>,
}

impl BatchClient {
    pub fn new(session: Arc<dyn SessionBoundary>, transport: Arc<dyn WalletTransport>) -> Self {
        let session = Arc::new(SessionTracker::new(session));
        let capabilities = Arc::new(CapabilityRegistry::new(
            transport.clone(),
            session.clone(),
        ));
        let tracker = Arc::new(BatchTracker::new(transport.clone(), session.clone()));
        let submitter = BatchSubmitter::new(
            transport,
            capabilities.clone(),
            session.clone(),
            tracker.clone(),
        );

        Self {
            session,
            capabilities,
            submitter,
            tracker,
        }
    }

    /// Active account of the session, if connected
    pub fn current_account(&self) -> Option<Address> {
        self.session.current_account()
    }

    pub async fn get_capabilities(&self, account: Address) -> BatchResult<Arc<CapabilitySet>> {
        self.capabilities.get_capabilities(account).await
    }

    pub async fn refresh_capabilities(&self, account: Address) -> BatchResult<Arc<CapabilitySet>> {
        self.capabilities.refresh(account).await
    }

    pub async fn submit(&self, request: BatchRequest) -> BatchResult<BatchId> {
        self.submitter.submit(request).await
    }

    pub async fn get_status(&self, id: &BatchId) -> BatchResult<BatchStatusRecord> {
        self.tracker.get_status(id).await
    }

    pub async fn wait_for_completion(
        &self,
        id: &BatchId,
        poll_interval: Duration,
    ) -> BatchResult<BatchStatusRecord> {
        self.tracker.wait_for_completion(id, poll_interval).await
    }

    /// Query every unresolved batch once
    pub async fn poll_pending(&self) -> Vec<(BatchId, BatchResult<BatchStatusRecord>)> {
        self.tracker.poll_pending().await
    }

    /// Ids of every tracked batch, oldest first
    pub fn tracked_batches(&self) -> Vec<BatchId> {
        self.tracker.tracked_ids()
    }

    /// Last known record of a batch without contacting the wallet
    pub fn last_known_status(&self, id: &BatchId) -> Option<BatchStatusRecord> {
        self.tracker.snapshot(id)
    }

    pub fn discard(&self, id: &BatchId) -> Option<BatchStatusRecord> {
        self.tracker.discard(id)
    }
}
