//! `wallet_sendCalls` submission

use super::{BatchStatusRecord, BatchTracker};
use crate::capabilities::CapabilityRegistry;
use crate::error::{BatchError, BatchResult};
use crate::metrics;
use crate::protocol::{parse_submission, Atomicity, BatchId, Call, ChainId, SendCallsRequest};
use crate::session::SessionTracker;
use crate::transport::WalletTransport;

use dashmap::DashSet;
use ethers::types::Address;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// A batch of calls to submit on behalf of one account
#[derive(Debug, Clone, PartialEq)]
pub struct BatchRequest {
    pub account: Address,
    pub chain_id: ChainId,
    pub calls: Vec<Call>,
    pub atomicity: Atomicity,
    /// Caller-chosen batch id, forwarded to the wallet
    pub correlation_id: Option<BatchId>,
}

impl BatchRequest {
    pub fn new(account: Address, chain_id: ChainId, atomicity: Atomicity) -> Self {
        Self {
            account,
            chain_id,
            calls: Vec::new(),
            atomicity,
            correlation_id: None,
        }
    }

    pub fn call(mut self, call: Call) -> Self {
        self.calls.push(call);
        self
    }

    pub fn calls(mut self, calls: impl IntoIterator<Item = Call>) -> Self {
        self.calls.extend(calls);
        self
    }

    pub fn correlation_id(mut self, id: BatchId) -> Self {
        self.correlation_id = Some(id);
        self
    }
}

/// Releases the account's submission slot when dropped, including on cancellation
struct InFlightGuard<'a> {
    in_flight: &'a DashSet<Address>,
    account: Address,
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.in_flight.remove(&self.account);
    }
}

pub struct BatchSubmitter {
    transport: Arc<dyn WalletTransport>,
    capabilities: Arc<CapabilityRegistry>,
    session: Arc<SessionTracker>,
    tracker: Arc<BatchTracker>,
    /// Accounts with a submission awaiting the wallet
    in_flight: DashSet<Address>,
}

impl BatchSubmitter {
    pub fn new(
        transport: Arc<dyn WalletTransport>,
        capabilities: Arc<CapabilityRegistry>,
        session: Arc<SessionTracker>,
        tracker: Arc<BatchTracker>,
    ) -> Self {
        Self {
            transport,
            capabilities,
            session,
            tracker,
            in_flight: DashSet::new(),
        }
    }

    /// Submit a batch and start tracking it.
    ///
    /// Returns the identifier the wallet assigned, which is also the key of the
    /// new status record.
    pub async fn submit(&self, request: BatchRequest) -> BatchResult<BatchId> {
        let result = self.try_submit(&request).await;
        if let Err(e) = &result {
            metrics::record_submission_failed(e.kind());
        }
        result
    }

    async fn try_submit(&self, request: &BatchRequest) -> BatchResult<BatchId> {
        if request.calls.is_empty() {
            return Err(BatchError::EmptyBatch);
        }

        let binding = self.session.bind(request.account)?;

        if !self.session.is_chain_available(request.chain_id) {
            return Err(BatchError::ChainUnavailable {
                chain_id: request.chain_id,
            });
        }

        if let Some(id) = &request.correlation_id {
            if self.tracker.is_id_in_use(id) {
                return Err(BatchError::DuplicateCorrelationId { id: id.clone() });
            }
        }

        let _guard = self.acquire(request.account)?;

        if request.atomicity.is_required() {
            let capabilities = self.capabilities.get_capabilities(request.account).await?;
            let support = capabilities.atomic_support(request.chain_id);
            if !support.allows_atomic() {
                warn!(
                    "Account {:?} has {:?} atomic support on chain {}",
                    request.account, support, request.chain_id
                );
                return Err(BatchError::AtomicityUnsupported {
                    account: request.account,
                    chain_id: request.chain_id,
                });
            }
            debug!(
                "Account {:?} atomic support on chain {}: {:?}",
                request.account, request.chain_id, support
            );
        }

        let wire = SendCallsRequest::new(
            request.account,
            request.chain_id,
            &request.calls,
            request.atomicity,
            request.correlation_id.clone(),
        );

        info!(
            "Submitting {} calls for {:?} on chain {} (atomicity {})",
            request.calls.len(),
            request.account,
            request.chain_id,
            request.atomicity.as_str()
        );

        let payload = self
            .transport
            .request_batch_submission(&wire)
            .await
            .map_err(|e| e.into_submission_error(&wire))?;
        let id = parse_submission(payload)?;

        if let Some(requested) = &request.correlation_id {
            if *requested != id {
                warn!("Wallet assigned id {} instead of {}", id, requested);
            }
        }

        if self.tracker.contains(&id) && request.correlation_id.as_ref() != Some(&id) {
            // The wallet holds a new batch under an id it already gave out
            error!(
                "Wallet reissued tracked id {} for a new batch, which is not tracked",
                id
            );
            return Err(BatchError::MalformedResponse(format!(
                "sendCalls returned already tracked id {}",
                id
            )));
        }

        if !self.session.is_current(&binding) {
            // The wallet holds the batch but this session no longer owns it
            warn!("Batch {} accepted after a session change, not tracked", id);
            return Err(BatchError::SessionChanged {
                operation: "batch submission",
            });
        }

        self.tracker
            .register(BatchStatusRecord::submitted(id.clone(), request))?;

        info!("Batch {} submitted on chain {}", id, request.chain_id);
        metrics::record_batch_submitted(request.chain_id, request.atomicity);

        Ok(id)
    }

    fn acquire(&self, account: Address) -> BatchResult<InFlightGuard<'_>> {
        if !self.in_flight.insert(account) {
            return Err(BatchError::ConcurrentOperation {
                account,
                operation: "batch submission",
            });
        }
        Ok(InFlightGuard {
            in_flight: &self.in_flight,
            account,
        })
    }
}
