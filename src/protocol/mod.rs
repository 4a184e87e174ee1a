//! EIP-5792 wire types and payload validation
//!
//! Everything the wallet sends back is treated as untrusted: raw JSON is parsed into
//! typed values here and anything that does not fit fails as a malformed response.

pub mod capabilities;
pub mod status;

pub use capabilities::{parse_capabilities, AtomicSupport, CapabilitySet, ChainCapabilities};
pub use status::{
    parse_calls_status, BatchState, CallOutcome, CallReceipt, ReceiptLog, StatusUpdate,
};

use crate::error::{BatchError, BatchResult};

use ethers::types::{Address, Bytes, U256, U64};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Numeric chain identifier
pub type ChainId = u64;

/// Version string sent with `wallet_sendCalls`
pub const SEND_CALLS_VERSION: &str = "2.0.0";

/// Opaque identifier of a submitted batch.
///
/// Issued by the wallet or chosen by the caller as a correlation id. Never parsed.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BatchId(String);

impl BatchId {
    /// Generate a fresh correlation id
    pub fn random() -> Self {
        let uuid = uuid::Uuid::new_v4();
        Self(format!("0x{}", hex::encode(uuid.as_bytes())))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for BatchId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for BatchId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl fmt::Display for BatchId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Atomicity requirement of a batch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Atomicity {
    /// All calls succeed or none take effect; refused up front if unsupported
    Required,
    /// The wallet may fall back to sequential execution
    Optional,
}

impl Atomicity {
    pub fn is_required(&self) -> bool {
        matches!(self, Atomicity::Required)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Atomicity::Required => "required",
            Atomicity::Optional => "optional",
        }
    }
}

/// One operation within a batch
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Call {
    to: Address,
    #[serde(default)]
    data: Bytes,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    value: Option<U256>,
}

impl Call {
    pub fn new(to: Address, data: Bytes) -> Self {
        Self {
            to,
            data,
            value: None,
        }
    }

    /// Attach native value to the call
    pub fn with_value(mut self, value: U256) -> Self {
        self.value = Some(value);
        self
    }

    pub fn to(&self) -> Address {
        self.to
    }

    pub fn data(&self) -> &Bytes {
        &self.data
    }

    pub fn value(&self) -> Option<U256> {
        self.value
    }
}

/// Parameters of `wallet_sendCalls`
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SendCallsRequest {
    pub version: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<BatchId>,
    pub from: Address,
    pub chain_id: U64,
    pub atomic_required: bool,
    pub calls: Vec<Call>,
    pub capabilities: serde_json::Map<String, serde_json::Value>,
}

impl SendCallsRequest {
    pub fn new(
        from: Address,
        chain_id: ChainId,
        calls: &[Call],
        atomicity: Atomicity,
        id: Option<BatchId>,
    ) -> Self {
        Self {
            version: SEND_CALLS_VERSION.to_string(),
            id,
            from,
            chain_id: U64::from(chain_id),
            atomic_required: atomicity.is_required(),
            calls: calls.to_vec(),
            capabilities: serde_json::Map::new(),
        }
    }
}

/// `wallet_sendCalls` result: the current object form or the bare id of older drafts
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawSendCallsResult {
    Bare(String),
    Object { id: String },
}

/// Extract the batch identifier from a `wallet_sendCalls` response
pub fn parse_submission(payload: serde_json::Value) -> BatchResult<BatchId> {
    let raw: RawSendCallsResult = serde_json::from_value(payload)
        .map_err(|e| BatchError::MalformedResponse(format!("sendCalls result: {}", e)))?;

    let id = match raw {
        RawSendCallsResult::Bare(id) => id,
        RawSendCallsResult::Object { id } => id,
    };

    if id.trim().is_empty() {
        return Err(BatchError::MalformedResponse(
            "sendCalls result has an empty id".to_string(),
        ));
    }

    Ok(BatchId(id))
}

/// Parse a hex quantity chain id such as `0x2105`
pub(crate) fn parse_chain_id(raw: &str) -> Option<ChainId> {
    let digits = raw.strip_prefix("0x").or_else(|| raw.strip_prefix("0X"))?;
    if digits.is_empty() {
        return None;
    }
    u64::from_str_radix(digits, 16).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_send_calls_request_wire_shape() {
        let to = Address::repeat_byte(0xaa);
        let calls = vec![
            Call::new(to, Bytes::from(vec![0xa9, 0x05, 0x9c, 0xbb])),
            Call::new(to, Bytes::new()).with_value(U256::from(1_000u64)),
        ];
        let request = SendCallsRequest::new(
            Address::repeat_byte(0x01),
            8453,
            &calls,
            Atomicity::Optional,
            Some(BatchId::from("0xfeed")),
        );

        let wire = serde_json::to_value(&request).unwrap();
        assert_eq!(wire["version"], "2.0.0");
        assert_eq!(wire["id"], "0xfeed");
        assert_eq!(wire["chainId"], "0x2105");
        assert_eq!(wire["atomicRequired"], false);
        assert_eq!(wire["calls"][0]["data"], "0xa9059cbb");
        assert!(wire["calls"][0].get("value").is_none());
        assert_eq!(wire["calls"][1]["value"], "0x3e8");
        assert_eq!(wire["capabilities"], json!({}));
    }

    #[test]
    fn test_request_without_correlation_id_omits_field() {
        let calls = vec![Call::new(Address::zero(), Bytes::new())];
        let request =
            SendCallsRequest::new(Address::zero(), 1, &calls, Atomicity::Required, None);
        let wire = serde_json::to_value(&request).unwrap();
        assert!(wire.get("id").is_none());
        assert_eq!(wire["atomicRequired"], true);
    }

    #[test]
    fn test_parse_submission_shapes() {
        let id = parse_submission(json!({ "id": "0x01", "capabilities": {} })).unwrap();
        assert_eq!(id, BatchId::from("0x01"));

        let id = parse_submission(json!("0x02")).unwrap();
        assert_eq!(id, BatchId::from("0x02"));

        assert!(matches!(
            parse_submission(json!({ "id": "" })),
            Err(BatchError::MalformedResponse(_))
        ));
        assert!(matches!(
            parse_submission(json!({ "id": 7 })),
            Err(BatchError::MalformedResponse(_))
        ));
    }

    #[test]
    fn test_parse_chain_id() {
        assert_eq!(parse_chain_id("0x1"), Some(1));
        assert_eq!(parse_chain_id("0xa4ec"), Some(42220));
        assert_eq!(parse_chain_id("1"), None);
        assert_eq!(parse_chain_id("0x"), None);
        assert_eq!(parse_chain_id("0xzz"), None);
    }

    #[test]
    fn test_random_ids_are_distinct() {
        let a = BatchId::random();
        let b = BatchId::random();
        assert_ne!(a, b);
        assert!(a.as_str().starts_with("0x"));
        assert_eq!(a.as_str().len(), 34);
    }
}
