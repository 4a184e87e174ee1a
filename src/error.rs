//! Error types for the batch-call client

use crate::protocol::{BatchId, ChainId};
use crate::transport::TransportError;

use ethers::types::Address;
use std::fmt;
use thiserror::Error;

/// Main error type for batch-call operations
#[derive(Error, Debug)]
pub enum BatchError {
    #[error("No account is connected")]
    NotConnected,

    #[error("Account {requested:?} is not the active account {active:?}")]
    AccountMismatch { requested: Address, active: Address },

    #[error("Account {account:?} cannot report capabilities: {reason}")]
    UnsupportedAccount { account: Address, reason: String },

    #[error("Atomic batching is not supported for {account:?} on chain {chain_id}")]
    AtomicityUnsupported { account: Address, chain_id: ChainId },

    #[error("Submission rejected: {0}")]
    Submission(SubmissionRejection),

    #[error("Another {operation} is already in flight for {account:?}")]
    ConcurrentOperation {
        account: Address,
        operation: &'static str,
    },

    #[error("Batch {id} is not tracked")]
    UnknownBatchIdentifier { id: BatchId },

    #[error("Batch identifier {id} is already in use")]
    DuplicateCorrelationId { id: BatchId },

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Malformed response: {0}")]
    MalformedResponse(String),

    #[error("A batch needs at least one call")]
    EmptyBatch,

    #[error("Chain {chain_id} is not available to the session")]
    ChainUnavailable { chain_id: ChainId },

    #[error("Session changed while {operation} was in flight")]
    SessionChanged { operation: &'static str },

    #[error("Configuration error: {0}")]
    Config(String),
}

impl BatchError {
    /// Check if the caller may simply retry the operation
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            BatchError::Transport(_)
                | BatchError::ConcurrentOperation { .. }
                | BatchError::SessionChanged { .. }
        )
    }

    /// Short label used for metrics and logs
    pub fn kind(&self) -> &'static str {
        match self {
            BatchError::NotConnected => "not_connected",
            BatchError::AccountMismatch { .. } => "account_mismatch",
            BatchError::UnsupportedAccount { .. } => "unsupported_account",
            BatchError::AtomicityUnsupported { .. } => "atomicity_unsupported",
            BatchError::Submission(_) => "submission",
            BatchError::ConcurrentOperation { .. } => "concurrent_operation",
            BatchError::UnknownBatchIdentifier { .. } => "unknown_batch",
            BatchError::DuplicateCorrelationId { .. } => "duplicate_id",
            BatchError::Transport(_) => "transport",
            BatchError::MalformedResponse(_) => "malformed_response",
            BatchError::EmptyBatch => "empty_batch",
            BatchError::ChainUnavailable { .. } => "chain_unavailable",
            BatchError::SessionChanged { .. } => "session_changed",
            BatchError::Config(_) => "config",
        }
    }
}

/// Why the wallet refused a batch submission
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectionReason {
    UserRejected,
    Unauthorized,
    UnsupportedMethod,
    InvalidCall,
    UnsupportedChain,
    UnsupportedCapability,
    BatchTooLarge,
    UpgradeRejected,
    Other,
}

impl RejectionReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            RejectionReason::UserRejected => "user rejected",
            RejectionReason::Unauthorized => "unauthorized",
            RejectionReason::UnsupportedMethod => "unsupported method",
            RejectionReason::InvalidCall => "invalid call",
            RejectionReason::UnsupportedChain => "unsupported chain",
            RejectionReason::UnsupportedCapability => "unsupported capability",
            RejectionReason::BatchTooLarge => "batch too large",
            RejectionReason::UpgradeRejected => "account upgrade rejected",
            RejectionReason::Other => "rejected",
        }
    }
}

/// A wallet rejection, preserving the original JSON-RPC code and message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmissionRejection {
    pub reason: RejectionReason,
    pub code: i64,
    pub message: String,
}

impl fmt::Display for SubmissionRejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (code {}): {}", self.reason.as_str(), self.code, self.message)
    }
}

/// Result type for batch-call operations
pub type BatchResult<T> = Result<T, BatchError>;
