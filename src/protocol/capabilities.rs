//! `wallet_getCapabilities` payloads

use super::{parse_chain_id, ChainId};
use crate::error::{BatchError, BatchResult};

use chrono::{DateTime, Utc};
use ethers::types::Address;
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;

/// Wire key under which a wallet reports capabilities valid on every chain
const ALL_CHAINS_KEY: ChainId = 0;

/// Atomic batching support reported for one chain
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AtomicSupport {
    /// Calls are executed atomically
    Supported,
    /// The wallet can upgrade the account to atomic execution during approval
    Ready,
    Unsupported,
}

impl AtomicSupport {
    pub fn allows_atomic(&self) -> bool {
        matches!(self, AtomicSupport::Supported | AtomicSupport::Ready)
    }

    fn parse(raw: &str) -> Option<Self> {
        match raw {
            "supported" => Some(AtomicSupport::Supported),
            "ready" => Some(AtomicSupport::Ready),
            "unsupported" => Some(AtomicSupport::Unsupported),
            _ => None,
        }
    }
}

/// Capabilities of an account on one chain
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChainCapabilities {
    pub atomic: AtomicSupport,
    /// Every other capability, passed through untouched
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

/// Full capability set of one account, replaced as a whole on refresh
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CapabilitySet {
    pub account: Address,
    pub chains: BTreeMap<ChainId, ChainCapabilities>,
    pub fetched_at: DateTime<Utc>,
}

impl CapabilitySet {
    /// Capabilities for a chain, falling back to the all-chains entry
    pub fn for_chain(&self, chain_id: ChainId) -> Option<&ChainCapabilities> {
        self.chains
            .get(&chain_id)
            .or_else(|| self.chains.get(&ALL_CHAINS_KEY))
    }

    /// Atomic support on a chain. Unknown chains are unsupported.
    pub fn atomic_support(&self, chain_id: ChainId) -> AtomicSupport {
        self.for_chain(chain_id)
            .map(|c| c.atomic)
            .unwrap_or(AtomicSupport::Unsupported)
    }

    pub fn supports_atomic(&self, chain_id: ChainId) -> bool {
        self.atomic_support(chain_id).allows_atomic()
    }
}

/// Validate a raw `wallet_getCapabilities` payload
pub fn parse_capabilities(account: Address, payload: Value) -> BatchResult<CapabilitySet> {
    let Value::Object(entries) = payload else {
        return Err(malformed("capabilities payload is not an object"));
    };

    let mut chains = BTreeMap::new();
    for (key, value) in entries {
        let chain_id = parse_chain_id(&key)
            .ok_or_else(|| malformed(format!("invalid chain key {:?}", key)))?;

        let Value::Object(mut fields) = value else {
            return Err(malformed(format!("capabilities for {} are not an object", key)));
        };

        let atomic = match (fields.remove("atomic"), fields.remove("atomicBatch")) {
            (Some(atomic), _) => parse_atomic(&key, &atomic)?,
            (None, Some(legacy)) => parse_legacy_atomic(&key, &legacy)?,
            (None, None) => AtomicSupport::Unsupported,
        };

        let previous = chains.insert(
            chain_id,
            ChainCapabilities {
                atomic,
                extra: fields.into_iter().collect(),
            },
        );
        if previous.is_some() {
            return Err(malformed(format!("chain {} listed twice", chain_id)));
        }
    }

    Ok(CapabilitySet {
        account,
        chains,
        fetched_at: Utc::now(),
    })
}

fn parse_atomic(key: &str, value: &Value) -> BatchResult<AtomicSupport> {
    value
        .get("status")
        .and_then(Value::as_str)
        .and_then(AtomicSupport::parse)
        .ok_or_else(|| malformed(format!("invalid atomic capability for {}: {}", key, value)))
}

// Early drafts reported `atomicBatch: { supported: bool }`
fn parse_legacy_atomic(key: &str, value: &Value) -> BatchResult<AtomicSupport> {
    match value.get("supported").and_then(Value::as_bool) {
        Some(true) => Ok(AtomicSupport::Supported),
        Some(false) => Ok(AtomicSupport::Unsupported),
        None => Err(malformed(format!(
            "invalid atomicBatch capability for {}: {}",
            key, value
        ))),
    }
}

fn malformed(message: impl Into<String>) -> BatchError {
    BatchError::MalformedResponse(message.into())
}
