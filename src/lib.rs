//! Batch-call client - EIP-5792 wallet call batching
//!
//! Negotiates an account's capabilities (`wallet_getCapabilities`), submits
//! calls as one batch with an atomicity requirement (`wallet_sendCalls`) and
//! tracks the batch until it resolves (`wallet_getCallsStatus`).

pub mod batch;
pub mod capabilities;
pub mod client;
pub mod config;
pub mod error;
pub mod metrics;
pub mod protocol;
pub mod session;
pub mod transport;

pub use batch::{BatchRequest, BatchStatusRecord};
pub use client::BatchClient;
pub use error::{BatchError, BatchResult, RejectionReason, SubmissionRejection};
pub use protocol::{
    AtomicSupport, Atomicity, BatchId, BatchState, Call, CallOutcome, CapabilitySet, ChainId,
};
pub use session::{LocalSession, SessionBoundary, SessionEvent};
pub use transport::{JsonRpcWalletTransport, TransportError, WalletTransport};
