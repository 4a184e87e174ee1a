//! JSON-RPC wallet transport over HTTP with multi-endpoint failover

use super::{TransportError, WalletTransport};
use crate::config::WalletConfig;
use crate::error::{BatchError, BatchResult};
use crate::protocol::{BatchId, SendCallsRequest};

use async_trait::async_trait;
use ethers::providers::{Http, Provider, ProviderError, RpcError};
use ethers::types::Address;
use serde::Serialize;
use serde_json::Value;
use std::fmt::Debug;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, warn};

/// Talks to an EIP-5792 wallet endpoint (a relay or a wallet's RPC bridge)
pub struct JsonRpcWalletTransport {
    /// HTTP providers (multiple for failover)
    providers: Vec<Provider<Http>>,
    /// Current active provider index
    current_provider: AtomicUsize,
    /// Upper bound for a single request
    request_timeout: Duration,
}

impl JsonRpcWalletTransport {
    pub fn new(config: &WalletConfig) -> BatchResult<Self> {
        let mut providers = Vec::new();

        for url in &config.rpc_urls {
            match Provider::<Http>::try_from(url.as_str()) {
                Ok(provider) => {
                    providers.push(provider);
                    debug!("Added wallet endpoint {}", url);
                }
                Err(e) => {
                    warn!("Failed to create wallet provider for {}: {}", url, e);
                }
            }
        }

        if providers.is_empty() {
            return Err(BatchError::Config(
                "No valid wallet RPC endpoints".to_string(),
            ));
        }

        Ok(Self {
            providers,
            current_provider: AtomicUsize::new(0),
            request_timeout: Duration::from_secs(config.request_timeout_secs),
        })
    }

    fn provider(&self) -> &Provider<Http> {
        let idx = self.current_provider.load(Ordering::Relaxed);
        &self.providers[idx % self.providers.len()]
    }

    /// Switch to next available endpoint
    fn failover(&self) {
        let current = self.current_provider.load(Ordering::Relaxed);
        let next = (current + 1) % self.providers.len();
        self.current_provider.store(next, Ordering::Relaxed);
        warn!("Wallet transport failover to endpoint {}", next);
    }

    /// Single request against the active endpoint
    async fn call<P>(&self, method: &str, params: P) -> Result<Value, TransportError>
    where
        P: Debug + Serialize + Send + Sync,
    {
        debug!("-> {}", method);
        let request = self.provider().request::<P, Value>(method, params);
        match timeout(self.request_timeout, request).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => Err(map_provider_error(e)),
            Err(_) => Err(TransportError::Timeout(self.request_timeout)),
        }
    }

    /// Request retried across endpoints on connectivity failures.
    ///
    /// Only for idempotent reads: a wallet answer is returned as is, while a
    /// disconnected provider (4900/4901) counts as a connectivity failure.
    async fn call_with_failover<P>(&self, method: &str, params: P) -> Result<Value, TransportError>
    where
        P: Debug + Serialize + Send + Sync + Clone,
    {
        let mut last_error = None;

        for _ in 0..self.providers.len() {
            match self.call(method, params.clone()).await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_wallet_answer() => return Err(e),
                Err(e) => {
                    warn!("{} failed: {}", method, e);
                    last_error = Some(e);
                    self.failover();
                }
            }
        }

        Err(last_error.unwrap_or_else(|| {
            TransportError::Connection("All wallet endpoints failed".to_string())
        }))
    }
}

#[async_trait]
impl WalletTransport for JsonRpcWalletTransport {
    async fn request_capabilities(&self, account: Address) -> Result<Value, TransportError> {
        self.call_with_failover("wallet_getCapabilities", [account])
            .await
    }

    async fn request_batch_submission(
        &self,
        request: &SendCallsRequest,
    ) -> Result<Value, TransportError> {
        // Never replayed on another endpoint: the first one may have accepted it
        self.call("wallet_sendCalls", [request]).await
    }

    async fn request_batch_status(&self, id: &BatchId) -> Result<Value, TransportError> {
        self.call_with_failover("wallet_getCallsStatus", [id.clone()])
            .await
    }
}

fn map_provider_error(err: ProviderError) -> TransportError {
    if let Some(response) = err.as_error_response() {
        return TransportError::Rpc {
            code: response.code,
            message: response.message.clone(),
        };
    }

    if let Some(decode) = err.as_serde_error() {
        return TransportError::Decode(decode.to_string());
    }

    TransportError::Connection(err.to_string())
}
