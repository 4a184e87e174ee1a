//! In-process session boundary for automation and tests

use super::{SessionBoundary, SessionEvent};
use crate::error::{BatchError, BatchResult};
use crate::protocol::ChainId;

use ethers::types::Address;
use tokio::sync::{broadcast, watch};
use tracing::info;

const EVENT_CAPACITY: usize = 64;

#[derive(Debug, Clone, Default)]
struct SessionState {
    account: Option<Address>,
    chain_id: Option<ChainId>,
}

/// Session driven directly by its owner (a CLI, a bot, a test)
pub struct LocalSession {
    chains: Vec<ChainId>,
    state: watch::Sender<SessionState>,
    events: broadcast::Sender<SessionEvent>,
}

impl LocalSession {
    /// Disconnected session able to use the given chains
    pub fn new(chains: Vec<ChainId>) -> Self {
        let (state, _) = watch::channel(SessionState::default());
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            chains,
            state,
            events,
        }
    }

    pub fn connect(&self, account: Address, chain_id: ChainId) -> BatchResult<()> {
        self.ensure_chain(chain_id)?;
        self.state.send_replace(SessionState {
            account: Some(account),
            chain_id: Some(chain_id),
        });
        info!("Connected {:?} on chain {}", account, chain_id);
        self.publish(SessionEvent::Connected { account, chain_id });
        Ok(())
    }

    pub fn disconnect(&self) {
        let previous = self.state.send_replace(SessionState::default());
        if previous.account.is_some() {
            info!("Disconnected {:?}", previous.account);
            self.publish(SessionEvent::Disconnected);
        }
    }

    pub fn switch_account(&self, account: Address) -> BatchResult<()> {
        if self.state.borrow().account.is_none() {
            return Err(BatchError::NotConnected);
        }
        self.state.send_modify(|state| state.account = Some(account));
        info!("Switched account to {:?}", account);
        self.publish(SessionEvent::AccountChanged { account });
        Ok(())
    }

    pub fn switch_chain(&self, chain_id: ChainId) -> BatchResult<()> {
        self.ensure_chain(chain_id)?;
        if self.state.borrow().account.is_none() {
            return Err(BatchError::NotConnected);
        }
        self.state.send_modify(|state| state.chain_id = Some(chain_id));
        info!("Switched chain to {}", chain_id);
        self.publish(SessionEvent::ChainChanged { chain_id });
        Ok(())
    }

    fn ensure_chain(&self, chain_id: ChainId) -> BatchResult<()> {
        if self.chains.contains(&chain_id) {
            Ok(())
        } else {
            Err(BatchError::ChainUnavailable { chain_id })
        }
    }

    fn publish(&self, event: SessionEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }
}

impl SessionBoundary for LocalSession {
    fn current_account(&self) -> Option<Address> {
        self.state.borrow().account
    }

    fn current_chain(&self) -> Option<ChainId> {
        self.state.borrow().chain_id
    }

    fn available_chains(&self) -> Vec<ChainId> {
        self.chains.clone()
    }

    fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }
}
