//! `wallet_getCallsStatus` payloads and their mapping onto the batch lifecycle

use super::{Atomicity, BatchId, ChainId};
use crate::error::{BatchError, BatchResult};

use ethers::types::{Address, Bytes, H256, U256, U64};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Lifecycle state of a submitted batch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchState {
    Submitted,
    Pending,
    Confirmed,
    Failed,
    PartiallyFailed,
}

impl BatchState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            BatchState::Confirmed | BatchState::Failed | BatchState::PartiallyFailed
        )
    }

    /// Valid moves: Submitted -> Pending -> terminal, Pending re-entrant,
    /// Submitted may resolve directly. Terminal states never move.
    pub fn can_advance_to(&self, next: BatchState) -> bool {
        match self {
            BatchState::Submitted => next != BatchState::Submitted,
            BatchState::Pending => next != BatchState::Submitted,
            _ => false,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            BatchState::Submitted => "submitted",
            BatchState::Pending => "pending",
            BatchState::Confirmed => "confirmed",
            BatchState::Failed => "failed",
            BatchState::PartiallyFailed => "partially_failed",
        }
    }
}

impl fmt::Display for BatchState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What happened to one call of a resolved batch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CallOutcome {
    Succeeded,
    Reverted,
    /// The batch failed before anything was included onchain
    NotExecuted,
    /// Receipts do not map onto individual calls
    Unknown,
}

/// Log entry of a call receipt
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReceiptLog {
    pub address: Address,
    #[serde(default)]
    pub topics: Vec<H256>,
    #[serde(default)]
    pub data: Bytes,
}

/// Receipt of a transaction that carried calls of the batch
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallReceipt {
    #[serde(default)]
    pub logs: Vec<ReceiptLog>,
    pub status: U64,
    pub block_hash: H256,
    pub block_number: U64,
    pub gas_used: U256,
    pub transaction_hash: H256,
}

impl CallReceipt {
    fn succeeded(&self) -> BatchResult<bool> {
        match self.status.as_u64() {
            1 => Ok(true),
            0 => Ok(false),
            other => Err(malformed(format!(
                "receipt {:?} has status {}",
                self.transaction_hash, other
            ))),
        }
    }
}

/// Validated result of one status query
#[derive(Debug, Clone, PartialEq)]
pub struct StatusUpdate {
    pub state: BatchState,
    /// Numeric status code, absent for legacy string statuses
    pub code: Option<u16>,
    /// Whether the wallet executed the calls atomically, when reported
    pub atomic: Option<bool>,
    pub receipts: Vec<CallReceipt>,
    pub outcomes: Vec<CallOutcome>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawStatus {
    Code(u16),
    Label(String),
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawCallsStatus {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    chain_id: Option<U64>,
    status: RawStatus,
    #[serde(default)]
    atomic: Option<bool>,
    #[serde(default)]
    receipts: Option<Vec<CallReceipt>>,
}

/// Status family as reported by the wallet
enum Reported {
    Pending,
    /// Failed before inclusion
    Offchain,
    /// Included onchain; the code may already say how it ended
    Included(Option<BatchState>),
}

/// Validate a raw `wallet_getCallsStatus` payload for a tracked batch
pub fn parse_calls_status(
    id: &BatchId,
    chain_id: ChainId,
    call_count: usize,
    atomicity: Atomicity,
    payload: Value,
) -> BatchResult<StatusUpdate> {
    let raw: RawCallsStatus = serde_json::from_value(payload)
        .map_err(|e| malformed(format!("callsStatus for {}: {}", id, e)))?;

    if let Some(reported) = &raw.id {
        if reported != id.as_str() {
            return Err(malformed(format!(
                "status for {} answered with id {}",
                id, reported
            )));
        }
    }

    if let Some(reported) = raw.chain_id {
        if reported != U64::from(chain_id) {
            return Err(malformed(format!(
                "status for {} reports chain {} instead of {}",
                id, reported, chain_id
            )));
        }
    }

    let (code, reported) = match raw.status {
        RawStatus::Code(code) => (Some(code), classify_code(code)?),
        RawStatus::Label(label) => match label.to_ascii_uppercase().as_str() {
            "PENDING" => (None, Reported::Pending),
            "CONFIRMED" => (None, Reported::Included(None)),
            _ => return Err(malformed(format!("unknown status {:?}", label))),
        },
    };

    let receipts = raw.receipts.unwrap_or_default();

    match reported {
        Reported::Pending => Ok(StatusUpdate {
            state: BatchState::Pending,
            code,
            atomic: raw.atomic,
            receipts: Vec::new(),
            outcomes: Vec::new(),
        }),
        Reported::Offchain => {
            if !receipts.is_empty() {
                return Err(malformed(format!(
                    "offchain failure for {} carries {} receipts",
                    id,
                    receipts.len()
                )));
            }
            Ok(StatusUpdate {
                state: BatchState::Failed,
                code,
                atomic: raw.atomic,
                receipts,
                outcomes: vec![CallOutcome::NotExecuted; call_count],
            })
        }
        Reported::Included(implied) => {
            resolve_included(id, call_count, atomicity, code, raw.atomic, implied, receipts)
        }
    }
}

fn classify_code(code: u16) -> BatchResult<Reported> {
    match code {
        100..=199 => Ok(Reported::Pending),
        200..=299 => Ok(Reported::Included(Some(BatchState::Confirmed))),
        400..=499 => Ok(Reported::Offchain),
        500..=599 => Ok(Reported::Included(Some(BatchState::Failed))),
        600..=699 => Ok(Reported::Included(Some(BatchState::PartiallyFailed))),
        _ => Err(malformed(format!("unknown status code {}", code))),
    }
}

fn resolve_included(
    id: &BatchId,
    call_count: usize,
    atomicity: Atomicity,
    code: Option<u16>,
    atomic: Option<bool>,
    implied: Option<BatchState>,
    receipts: Vec<CallReceipt>,
) -> BatchResult<StatusUpdate> {
    let successes = receipts
        .iter()
        .map(CallReceipt::succeeded)
        .collect::<BatchResult<Vec<_>>>()?;

    match implied {
        Some(BatchState::Confirmed) if successes.contains(&false) => {
            return Err(malformed(format!("{} confirmed with a reverted receipt", id)));
        }
        Some(BatchState::Failed) if successes.contains(&true) => {
            return Err(malformed(format!("{} reverted with a successful receipt", id)));
        }
        _ => {}
    }

    // Receipts describe individual calls only when they line up with them. A
    // single receipt stands for every call unless the wallet denies atomic execution.
    let per_call = if !successes.is_empty() && successes.len() == call_count {
        Some(successes)
    } else if successes.len() == 1 && atomic != Some(false) {
        Some(vec![successes[0]; call_count])
    } else {
        None
    };

    let aggregate = per_call.as_deref().map(aggregate_state);

    let state = match (implied, aggregate) {
        (Some(implied), Some(aggregate)) if implied != aggregate => {
            return Err(malformed(format!(
                "{} reported {} but receipts say {}",
                id, implied, aggregate
            )));
        }
        (Some(implied), _) => implied,
        (None, Some(aggregate)) => aggregate,
        (None, None) => {
            return Err(malformed(format!(
                "{} confirmed without receipts that map onto its calls",
                id
            )));
        }
    };

    if state == BatchState::PartiallyFailed && (atomicity.is_required() || atomic == Some(true))
    {
        return Err(malformed(format!(
            "{} partially failed although it executed atomically",
            id
        )));
    }

    let outcomes = match per_call {
        Some(per_call) => per_call
            .into_iter()
            .map(|ok| if ok { CallOutcome::Succeeded } else { CallOutcome::Reverted })
            .collect(),
        None => {
            let outcome = match state {
                BatchState::Confirmed => CallOutcome::Succeeded,
                BatchState::Failed => CallOutcome::Reverted,
                _ => CallOutcome::Unknown,
            };
            vec![outcome; call_count]
        }
    };

    Ok(StatusUpdate {
        state,
        code,
        atomic,
        receipts,
        outcomes,
    })
}

fn aggregate_state(successes: &[bool]) -> BatchState {
    if successes.iter().all(|ok| *ok) {
        BatchState::Confirmed
    } else if successes.iter().any(|ok| *ok) {
        BatchState::PartiallyFailed
    } else {
        BatchState::Failed
    }
}

fn malformed(message: impl Into<String>) -> BatchError {
    BatchError::MalformedResponse(message.into())
}
