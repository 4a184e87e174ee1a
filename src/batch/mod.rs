//! Batch submission and status tracking
//!
//! The submitter gates `wallet_sendCalls` on the account's capabilities and
//! registers every accepted batch with the tracker, which polls
//! `wallet_getCallsStatus` and keeps the last known state per batch.

mod record;
mod submitter;
mod tracker;

pub use record::BatchStatusRecord;
pub use submitter::{BatchRequest, BatchSubmitter};
pub use tracker::BatchTracker;
