//! Session boundary: the active account, the active chain and change notifications
//!
//! Connecting, disconnecting and discovering accounts belong to the wallet
//! connector; the client only observes them through [`SessionBoundary`].

pub mod local;
pub mod tracker;

pub use local::LocalSession;
pub use tracker::{SessionBinding, SessionTracker};

use crate::protocol::ChainId;

use ethers::types::Address;
use tokio::sync::broadcast;

/// Change published by the session boundary
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    Connected { account: Address, chain_id: ChainId },
    Disconnected,
    AccountChanged { account: Address },
    ChainChanged { chain_id: ChainId },
}

impl SessionEvent {
    /// Whether cached per-account state (capabilities, in-flight work) is stale after it
    pub fn invalidates_account_state(&self) -> bool {
        !matches!(self, SessionEvent::ChainChanged { .. })
    }
}

/// Provided by the wallet connector
pub trait SessionBoundary: Send + Sync {
    fn current_account(&self) -> Option<Address>;

    fn current_chain(&self) -> Option<ChainId>;

    /// Chains the session is connected to or can switch to
    fn available_chains(&self) -> Vec<ChainId>;

    fn subscribe(&self) -> broadcast::Receiver<SessionEvent>;
}
