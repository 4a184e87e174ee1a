//! Status record of a submitted batch

use super::BatchRequest;
use crate::error::{BatchError, BatchResult};
use crate::protocol::{
    Atomicity, BatchId, BatchState, CallOutcome, CallReceipt, ChainId, StatusUpdate,
};

use chrono::{DateTime, Utc};
use ethers::types::Address;
use serde::Serialize;

/// Last observed state of one batch, keyed by its identifier
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchStatusRecord {
    pub id: BatchId,
    pub account: Address,
    pub chain_id: ChainId,
    pub atomicity: Atomicity,
    pub call_count: usize,
    /// Correlation id the caller asked for, kept even if the wallet chose another id
    pub correlation_id: Option<BatchId>,
    pub state: BatchState,
    pub status_code: Option<u16>,
    /// Whether the wallet executed the calls atomically, once it said so
    pub atomic: Option<bool>,
    pub receipts: Vec<CallReceipt>,
    pub call_outcomes: Vec<CallOutcome>,
    pub submitted_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Status queries that reached the wallet
    pub polls: u32,
}

impl BatchStatusRecord {
    pub(crate) fn submitted(id: BatchId, request: &BatchRequest) -> Self {
        let now = Utc::now();
        Self {
            id,
            account: request.account,
            chain_id: request.chain_id,
            atomicity: request.atomicity,
            call_count: request.calls.len(),
            correlation_id: request.correlation_id.clone(),
            state: BatchState::Submitted,
            status_code: None,
            atomic: None,
            receipts: Vec::new(),
            call_outcomes: Vec::new(),
            submitted_at: now,
            updated_at: now,
            polls: 0,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    /// Fold a validated status query into the record
    pub(crate) fn apply(&mut self, update: StatusUpdate) -> BatchResult<()> {
        if !self.state.can_advance_to(update.state) {
            return Err(BatchError::MalformedResponse(format!(
                "batch {} cannot move from {} to {}",
                self.id, self.state, update.state
            )));
        }

        self.state = update.state;
        self.status_code = update.code;
        self.polls += 1;
        self.updated_at = Utc::now();

        if update.state.is_terminal() {
            self.atomic = update.atomic;
            self.receipts = update.receipts;
            self.call_outcomes = update.outcomes;
        }

        Ok(())
    }

    /// Seconds from submission to the last update
    pub fn elapsed_secs(&self) -> f64 {
        (self.updated_at - self.submitted_at).num_milliseconds() as f64 / 1000.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::Call;
    use ethers::types::Bytes;

    fn record() -> BatchStatusRecord {
        let request = BatchRequest::new(Address::repeat_byte(0x01), 10, Atomicity::Optional)
            .call(Call::new(Address::repeat_byte(0x02), Bytes::new()))
            .call(Call::new(Address::repeat_byte(0x03), Bytes::new()))
            .correlation_id(BatchId::from("0xc0ffee"));
        BatchStatusRecord::submitted(BatchId::from("0xc0ffee"), &request)
    }

    fn update(state: BatchState, code: u16) -> StatusUpdate {
        StatusUpdate {
            state,
            code: Some(code),
            atomic: Some(false),
            receipts: Vec::new(),
            outcomes: vec![CallOutcome::Succeeded, CallOutcome::Reverted],
        }
    }

    #[test]
    fn test_new_record_is_submitted() {
        let record = record();
        assert_eq!(record.state, BatchState::Submitted);
        assert_eq!(record.call_count, 2);
        assert_eq!(record.correlation_id, Some(BatchId::from("0xc0ffee")));
        assert_eq!(record.polls, 0);
    }

    #[test]
    fn test_pending_only_moves_state() {
        let mut record = record();
        record.apply(update(BatchState::Pending, 100)).unwrap();

        assert_eq!(record.state, BatchState::Pending);
        assert_eq!(record.status_code, Some(100));
        assert_eq!(record.atomic, None);
        assert!(record.call_outcomes.is_empty());
        assert_eq!(record.polls, 1);
    }

    #[test]
    fn test_terminal_record_is_frozen() {
        let mut record = record();
        record.apply(update(BatchState::PartiallyFailed, 600)).unwrap();
        assert_eq!(record.atomic, Some(false));
        assert_eq!(record.call_outcomes.len(), 2);

        let frozen = record.clone();
        assert!(matches!(
            record.apply(update(BatchState::Confirmed, 200)),
            Err(BatchError::MalformedResponse(_))
        ));
        assert_eq!(record, frozen);
    }
}
