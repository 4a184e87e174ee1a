//! Wallet transport failures and the JSON-RPC codes wallets answer with

use crate::error::{BatchError, RejectionReason, SubmissionRejection};
use crate::protocol::SendCallsRequest;

use std::time::Duration;
use thiserror::Error;

/// EIP-1193 provider and EIP-5792 wallet error codes
pub mod codes {
    pub const USER_REJECTED: i64 = 4001;
    pub const UNAUTHORIZED: i64 = 4100;
    pub const UNSUPPORTED_METHOD: i64 = 4200;
    pub const DISCONNECTED: i64 = 4900;
    pub const CHAIN_DISCONNECTED: i64 = 4901;
    pub const INVALID_PARAMS: i64 = -32602;
    pub const UNSUPPORTED_NON_OPTIONAL_CAPABILITY: i64 = 5700;
    pub const UNSUPPORTED_CHAIN_ID: i64 = 5710;
    pub const DUPLICATE_ID: i64 = 5720;
    pub const UNKNOWN_BUNDLE_ID: i64 = 5730;
    pub const BATCH_TOO_LARGE: i64 = 5740;
    pub const ATOMIC_READY_UPGRADE_REJECTED: i64 = 5750;
    pub const ATOMICITY_NOT_SUPPORTED: i64 = 5760;
}

/// Failure reported by, or while talking to, the wallet
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("wallet returned error {code}: {message}")]
    Rpc { code: i64, message: String },

    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    #[error("connection failed: {0}")]
    Connection(String),

    #[error("could not decode wallet response: {0}")]
    Decode(String),
}

impl TransportError {
    /// JSON-RPC error code, if the wallet answered with one
    pub fn code(&self) -> Option<i64> {
        match self {
            TransportError::Rpc { code, .. } => Some(*code),
            _ => None,
        }
    }

    /// True when the wallet itself answered, as opposed to a connectivity failure
    pub fn is_wallet_answer(&self) -> bool {
        matches!(
            self.code(),
            Some(code) if code != codes::DISCONNECTED && code != codes::CHAIN_DISCONNECTED
        )
    }

    /// Classify a submission failure. Wallet answers become rejections that keep the
    /// original code and message; connectivity problems stay transport errors.
    pub fn into_submission_error(self, request: &SendCallsRequest) -> BatchError {
        let (code, message) = match self {
            TransportError::Rpc { code, message } => (code, message),
            other => return BatchError::Transport(other),
        };

        let reason = match code {
            codes::DISCONNECTED | codes::CHAIN_DISCONNECTED => {
                return BatchError::Transport(TransportError::Rpc { code, message });
            }
            codes::DUPLICATE_ID => match &request.id {
                Some(id) => return BatchError::DuplicateCorrelationId { id: id.clone() },
                None => RejectionReason::Other,
            },
            codes::ATOMICITY_NOT_SUPPORTED => {
                return BatchError::AtomicityUnsupported {
                    account: request.from,
                    chain_id: request.chain_id.as_u64(),
                };
            }
            codes::USER_REJECTED => RejectionReason::UserRejected,
            codes::UNAUTHORIZED => RejectionReason::Unauthorized,
            codes::UNSUPPORTED_METHOD => RejectionReason::UnsupportedMethod,
            codes::INVALID_PARAMS => RejectionReason::InvalidCall,
            codes::UNSUPPORTED_CHAIN_ID => RejectionReason::UnsupportedChain,
            codes::UNSUPPORTED_NON_OPTIONAL_CAPABILITY => RejectionReason::UnsupportedCapability,
            codes::BATCH_TOO_LARGE => RejectionReason::BatchTooLarge,
            codes::ATOMIC_READY_UPGRADE_REJECTED => RejectionReason::UpgradeRejected,
            _ => RejectionReason::Other,
        };

        BatchError::Submission(SubmissionRejection {
            reason,
            code,
            message,
        })
    }
}
