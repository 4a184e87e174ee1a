//! Observes the session boundary and stamps every change with an epoch
//!
//! Each account-invalidating event bumps the epoch. Work started under one epoch
//! and finished under another belongs to a stale binding and is discarded.

use super::{SessionBoundary, SessionEvent};
use crate::error::{BatchError, BatchResult};
use crate::protocol::ChainId;

use ethers::types::Address;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::broadcast::{self, error::TryRecvError};
use tracing::{debug, warn};

/// Account and epoch an operation was started under
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionBinding {
    pub account: Address,
    pub epoch: u64,
}

pub struct SessionTracker {
    session: Arc<dyn SessionBoundary>,
    events: Mutex<broadcast::Receiver<SessionEvent>>,
    epoch: AtomicU64,
}

impl SessionTracker {
    pub fn new(session: Arc<dyn SessionBoundary>) -> Self {
        let events = session.subscribe();
        Self {
            session,
            events: Mutex::new(events),
            epoch: AtomicU64::new(0),
        }
    }

    /// Apply every pending session event and return the current epoch
    pub fn sync(&self) -> u64 {
        let mut events = self.events.lock().unwrap_or_else(PoisonError::into_inner);

        loop {
            match events.try_recv() {
                Ok(event) => {
                    if event.invalidates_account_state() {
                        let epoch = self.epoch.fetch_add(1, Ordering::SeqCst) + 1;
                        debug!("Session event {:?}, epoch now {}", event, epoch);
                    }
                }
                Err(TryRecvError::Lagged(missed)) => {
                    // Missed events may have been account changes
                    warn!("Missed {} session events, invalidating", missed);
                    self.epoch.fetch_add(1, Ordering::SeqCst);
                }
                Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => break,
            }
        }

        self.epoch.load(Ordering::SeqCst)
    }

    pub fn current_account(&self) -> Option<Address> {
        self.session.current_account()
    }

    pub fn current_chain(&self) -> Option<ChainId> {
        self.session.current_chain()
    }

    pub fn is_chain_available(&self, chain_id: ChainId) -> bool {
        self.session.available_chains().contains(&chain_id)
    }

    /// Bind an operation to `account`, which must be the active account
    pub fn bind(&self, account: Address) -> BatchResult<SessionBinding> {
        let epoch = self.sync();
        match self.session.current_account() {
            None => Err(BatchError::NotConnected),
            Some(active) if active != account => Err(BatchError::AccountMismatch {
                requested: account,
                active,
            }),
            Some(_) => Ok(SessionBinding { account, epoch }),
        }
    }

    /// Whether nothing account-relevant happened since `binding` was taken
    pub fn is_current(&self, binding: &SessionBinding) -> bool {
        self.sync() == binding.epoch && self.session.current_account() == Some(binding.account)
    }
}
