//! Per-account capability cache

use crate::error::{BatchError, BatchResult};
use crate::protocol::{parse_capabilities, CapabilitySet};
use crate::session::SessionTracker;
use crate::transport::{codes, TransportError, WalletTransport};

use dashmap::DashMap;
use ethers::types::Address;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Capability set and the session epoch it was fetched under
struct CachedCapabilities {
    epoch: u64,
    set: Arc<CapabilitySet>,
}

/// Caches capability sets per account.
///
/// The per-account mutex allows one fetch in flight per account; callers arriving
/// meanwhile wait for it and are answered from the freshly filled cache.
pub struct CapabilityRegistry {
    transport: Arc<dyn WalletTransport>,
    session: Arc<SessionTracker>,
    accounts: DashMap<Address, Arc<Mutex<Option<CachedCapabilities>>>>,
}

impl CapabilityRegistry {
    pub fn new(transport: Arc<dyn WalletTransport>, session: Arc<SessionTracker>) -> Self {
        Self {
            transport,
            session,
            accounts: DashMap::new(),
        }
    }

    /// Capability set of `account`, fetched on first use after each session change
    pub async fn get_capabilities(&self, account: Address) -> BatchResult<Arc<CapabilitySet>> {
        self.load(account, false).await
    }

    /// Fetch again and replace the whole cached set
    pub async fn refresh(&self, account: Address) -> BatchResult<Arc<CapabilitySet>> {
        self.load(account, true).await
    }

    async fn load(&self, account: Address, force: bool) -> BatchResult<Arc<CapabilitySet>> {
        self.session.bind(account)?;

        let slot = self
            .accounts
            .entry(account)
            .or_insert_with(|| Arc::new(Mutex::new(None)))
            .clone();
        let mut cached = slot.lock().await;

        // The session may have moved on while we waited for the slot
        let binding = self.session.bind(account)?;

        if !force {
            if let Some(entry) = cached.as_ref().filter(|c| c.epoch == binding.epoch) {
                debug!("Capabilities for {:?} served from cache", account);
                crate::metrics::record_capability_cache_hit();
                return Ok(entry.set.clone());
            }
        }

        let fetched = match self.transport.request_capabilities(account).await {
            Ok(payload) => parse_capabilities(account, payload).map_err(|e| {
                crate::metrics::record_capability_fetch("malformed");
                e
            }),
            Err(e) => {
                crate::metrics::record_capability_fetch("error");
                Err(classify_error(account, e))
            }
        };

        let set = match fetched {
            Ok(set) if self.session.is_current(&binding) => Arc::new(set),
            Ok(_) => {
                warn!("Discarding capabilities of {:?}: session changed", account);
                crate::metrics::record_capability_fetch("discarded");
                self.forget_if_cold(account, &slot, &cached);
                return Err(BatchError::SessionChanged {
                    operation: "capability fetch",
                });
            }
            Err(e) => {
                self.forget_if_cold(account, &slot, &cached);
                return Err(e);
            }
        };

        info!(
            "Fetched capabilities for {:?} on {} chains",
            account,
            set.chains.len()
        );
        crate::metrics::record_capability_fetch("ok");

        *cached = Some(CachedCapabilities {
            epoch: binding.epoch,
            set: set.clone(),
        });
        drop(cached);
        self.prune_stale(binding.epoch);

        Ok(set)
    }

    /// Drop the slot of a failed first fetch so unanswered accounts leave no trace
    fn forget_if_cold(
        &self,
        account: Address,
        slot: &Arc<Mutex<Option<CachedCapabilities>>>,
        cached: &Option<CachedCapabilities>,
    ) {
        if cached.is_none() {
            self.accounts
                .remove_if(&account, |_, current| Arc::ptr_eq(current, slot));
        }
    }

    /// Remove slots filled under an older epoch; they can never be served again
    fn prune_stale(&self, epoch: u64) {
        self.accounts.retain(|account, slot| match slot.try_lock() {
            Ok(cached) => {
                let keep = cached.as_ref().map_or(false, |c| c.epoch == epoch);
                if !keep {
                    debug!("Pruning capability slot of {:?}", account);
                }
                keep
            }
            // A fetch is running for it
            Err(_) => true,
        });
    }

    /// Accounts with a capability slot
    pub fn cached_accounts(&self) -> usize {
        self.accounts.len()
    }
}

fn classify_error(account: Address, err: TransportError) -> BatchError {
    match err.code() {
        Some(codes::UNAUTHORIZED) | Some(codes::UNSUPPORTED_METHOD) => {
            BatchError::UnsupportedAccount {
                account,
                reason: err.to_string(),
            }
        }
        _ => BatchError::Transport(err),
    }
}
