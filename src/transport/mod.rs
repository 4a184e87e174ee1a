//! Wallet transport: the JSON-RPC surface of an EIP-5792 wallet
//!
//! The client only talks to the wallet through [`WalletTransport`], so any
//! implementation (HTTP endpoint, injected provider bridge, scripted test double)
//! can be plugged in. Payloads are returned raw and validated by `protocol`.

mod error;
pub mod http;

pub use error::{codes, TransportError};
pub use http::JsonRpcWalletTransport;

use crate::protocol::{BatchId, SendCallsRequest};

use async_trait::async_trait;
use ethers::types::Address;
use serde_json::Value;

/// Wallet methods used by the batch-call client.
///
/// Every call may fail, hang or be rejected by the user.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait WalletTransport: Send + Sync {
    /// `wallet_getCapabilities`
    async fn request_capabilities(&self, account: Address) -> Result<Value, TransportError>;

    /// `wallet_sendCalls`
    async fn request_batch_submission(
        &self,
        request: &SendCallsRequest,
    ) -> Result<Value, TransportError>;

    /// `wallet_getCallsStatus`
    async fn request_batch_status(&self, id: &BatchId) -> Result<Value, TransportError>;
}
