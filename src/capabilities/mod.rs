//! Capability negotiation
//!
//! Fetches `wallet_getCapabilities` lazily per account, caches the whole set and
//! drops it whenever the session changes account or reconnects.

mod registry;

pub use registry::CapabilityRegistry;
