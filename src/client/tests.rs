use super::*;
use crate::error::BatchError;
use crate::protocol::{Atomicity, BatchState, Call, CallOutcome, SendCallsRequest};
use crate::session::LocalSession;
use crate::transport::{MockWalletTransport, TransportError};

use async_trait::async_trait;
use ethers::types::Bytes;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::Notify;
use tokio_test::{assert_err, assert_ok};

const CHAIN: u64 = 8453;

fn account() -> Address {
    Address::repeat_byte(0x51)
}

fn connected_session() -> Arc<LocalSession> {
    let session = Arc::new(LocalSession::new(vec![1, CHAIN]));
    session.connect(account(), CHAIN).unwrap();
    session
}

fn two_calls(atomicity: Atomicity) -> BatchRequest {
    BatchRequest::new(account(), CHAIN, atomicity).calls([
        Call::new(Address::repeat_byte(0x01), Bytes::from(vec![0xa9, 0x05, 0x9c, 0xbb])),
        Call::new(Address::repeat_byte(0x02), Bytes::from(vec![0x09, 0x5e, 0xa7, 0xb3])),
    ])
}

fn receipt(status: &str) -> Value {
    json!({
        "logs": [{
            "address": format!("0x{}", "01".repeat(20)),
            "topics": [format!("0x{}", "ee".repeat(32))],
            "data": "0x"
        }],
        "status": status,
        "blockHash": format!("0x{}", "11".repeat(32)),
        "blockNumber": "0x1b4",
        "gasUsed": "0xa410",
        "transactionHash": format!("0x{}", "22".repeat(32))
    })
}

fn status(id: &BatchId, code: u16, receipts: Vec<Value>) -> Value {
    json!({
        "version": "2.0.0",
        "id": id.as_str(),
        "chainId": "0x2105",
        "status": code,
        "atomic": false,
        "receipts": receipts
    })
}

/// Wallet whose calls block until the test releases them
#[derive(Default)]
struct GatedWallet {
    capability_fetches: AtomicUsize,
    submissions: AtomicUsize,
    entered: Notify,
    release: Notify,
}

#[async_trait]
impl WalletTransport for GatedWallet {
    async fn request_capabilities(&self, _account: Address) -> Result<Value, TransportError> {
        self.capability_fetches.fetch_add(1, Ordering::SeqCst);
        self.entered.notify_one();
        self.release.notified().await;
        Ok(json!({ "0x2105": { "atomic": { "status": "supported" } } }))
    }

    async fn request_batch_submission(
        &self,
        _request: &SendCallsRequest,
    ) -> Result<Value, TransportError> {
        let n = self.submissions.fetch_add(1, Ordering::SeqCst);
        self.entered.notify_one();
        self.release.notified().await;
        Ok(json!({ "id": format!("0x{:02x}", n + 1) }))
    }

    async fn request_batch_status(&self, id: &BatchId) -> Result<Value, TransportError> {
        self.release.notified().await;
        Ok(status(id, 200, vec![receipt("0x1"), receipt("0x1")]))
    }
}

#[tokio::test]
async fn test_reconnect_forces_exactly_one_refetch() {
    let mut transport = MockWalletTransport::new();
    transport
        .expect_request_capabilities()
        .times(2)
        .returning(|_| Ok(json!({ "0x2105": { "atomic": { "status": "ready" } } })));
    let session = connected_session();
    let client = BatchClient::new(session.clone(), Arc::new(transport));

    assert_ok!(client.get_capabilities(account()).await);
    assert_ok!(client.get_capabilities(account()).await);

    session.disconnect();
    assert!(matches!(
        client.get_capabilities(account()).await,
        Err(BatchError::NotConnected)
    ));

    session.connect(account(), CHAIN).unwrap();
    let set = assert_ok!(client.get_capabilities(account()).await);
    assert!(set.supports_atomic(CHAIN));
    assert_ok!(client.get_capabilities(account()).await);
}

#[tokio::test]
async fn test_required_batch_on_unsupported_chain_never_submits() {
    let mut transport = MockWalletTransport::new();
    transport
        .expect_request_capabilities()
        .times(1)
        .returning(|_| Ok(json!({ "0x2105": { "atomic": { "status": "unsupported" } } })));
    transport.expect_request_batch_submission().never();
    let client = BatchClient::new(connected_session(), Arc::new(transport));

    let err = assert_err!(client.submit(two_calls(Atomicity::Required)).await);
    assert!(matches!(err, BatchError::AtomicityUnsupported { chain_id: CHAIN, .. }));
    assert!(client.tracked_batches().is_empty());
}

#[tokio::test]
async fn test_optional_batch_partial_revert() {
    let mut transport = MockWalletTransport::new();
    transport
        .expect_request_batch_submission()
        .times(1)
        .returning(|_| Ok(json!({ "id": "0x5792" })));
    transport
        .expect_request_batch_status()
        .times(1)
        .returning(|id| Ok(status(id, 600, vec![receipt("0x1"), receipt("0x0")])));
    let client = BatchClient::new(connected_session(), Arc::new(transport));

    let id = assert_ok!(client.submit(two_calls(Atomicity::Optional)).await);
    let record = assert_ok!(client.get_status(&id).await);

    assert_eq!(record.state, BatchState::PartiallyFailed);
    assert_eq!(record.status_code, Some(600));
    assert_eq!(
        record.call_outcomes,
        vec![CallOutcome::Succeeded, CallOutcome::Reverted]
    );
    assert_eq!(record.receipts.len(), 2);
    assert_eq!(record.receipts[0].logs.len(), 1);
}

#[tokio::test]
async fn test_terminal_status_is_served_from_memory() {
    let mut transport = MockWalletTransport::new();
    transport
        .expect_request_batch_submission()
        .times(1)
        .returning(|_| Ok(json!("0x77")));
    transport
        .expect_request_batch_status()
        .times(1)
        .returning(|id| Ok(status(id, 500, vec![receipt("0x0"), receipt("0x0")])));
    let session = connected_session();
    let client = BatchClient::new(session.clone(), Arc::new(transport));

    let id = assert_ok!(client.submit(two_calls(Atomicity::Optional)).await);
    let first = assert_ok!(client.get_status(&id).await);
    assert_eq!(first.state, BatchState::Failed);

    // Still answered after the account goes away
    session.disconnect();
    for _ in 0..3 {
        assert_eq!(assert_ok!(client.get_status(&id).await), first);
    }
}

#[tokio::test]
async fn test_unknown_identifier_fails() {
    let mut transport = MockWalletTransport::new();
    transport.expect_request_batch_status().never();
    let client = BatchClient::new(connected_session(), Arc::new(transport));

    let id = BatchId::from("0xdeadbeef");
    match client.get_status(&id).await {
        Err(BatchError::UnknownBatchIdentifier { id: missing }) => assert_eq!(missing, id),
        other => panic!("unexpected result: {other:?}"),
    }
    assert!(client.last_known_status(&id).is_none());
}

#[tokio::test]
async fn test_concurrent_submissions_for_one_account() {
    let wallet = Arc::new(GatedWallet::default());
    let client = Arc::new(BatchClient::new(connected_session(), wallet.clone()));

    let first = {
        let client = client.clone();
        tokio::spawn(async move { client.submit(two_calls(Atomicity::Optional)).await })
    };
    wallet.entered.notified().await;

    let err = assert_err!(client.submit(two_calls(Atomicity::Optional)).await);
    assert!(matches!(err, BatchError::ConcurrentOperation { .. }));
    assert!(err.is_retryable());

    wallet.release.notify_one();
    let id = assert_ok!(first.await.unwrap());

    assert_eq!(wallet.submissions.load(Ordering::SeqCst), 1);
    assert_eq!(client.tracked_batches(), vec![id]);
}

#[tokio::test]
async fn test_concurrent_capability_fetches_are_coalesced() {
    let wallet = Arc::new(GatedWallet::default());
    let client = Arc::new(BatchClient::new(connected_session(), wallet.clone()));

    let spawn_fetch = |client: Arc<BatchClient>| {
        tokio::spawn(async move { client.get_capabilities(account()).await })
    };
    let first = spawn_fetch(client.clone());
    wallet.entered.notified().await;
    let second = spawn_fetch(client.clone());
    tokio::task::yield_now().await;

    wallet.release.notify_one();
    let a = assert_ok!(first.await.unwrap());
    let b = assert_ok!(second.await.unwrap());

    assert!(Arc::ptr_eq(&a, &b));
    assert_eq!(wallet.capability_fetches.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_transport_failure_keeps_pending_record() {
    let mut transport = MockWalletTransport::new();
    let mut seq = mockall::Sequence::new();
    transport
        .expect_request_batch_submission()
        .times(1)
        .returning(|_| Ok(json!({ "id": "0x0100" })));
    transport
        .expect_request_batch_status()
        .times(1)
        .in_sequence(&mut seq)
        .returning(|id| Ok(status(id, 100, Vec::new())));
    transport
        .expect_request_batch_status()
        .times(1)
        .in_sequence(&mut seq)
        .returning(|_| Err(TransportError::Connection("connection reset".to_string())));
    let client = BatchClient::new(connected_session(), Arc::new(transport));

    let id = assert_ok!(client.submit(two_calls(Atomicity::Optional)).await);
    let pending = assert_ok!(client.get_status(&id).await);
    assert_eq!(pending.state, BatchState::Pending);

    let err = assert_err!(client.get_status(&id).await);
    assert!(matches!(err, BatchError::Transport(TransportError::Connection(_))));
    assert_eq!(client.last_known_status(&id), Some(pending));
}

#[tokio::test]
async fn test_capabilities_fetched_for_stale_session_are_discarded() {
    let session = connected_session();
    let switcher = session.clone();

    let mut transport = MockWalletTransport::new();
    let mut seq = mockall::Sequence::new();
    transport
        .expect_request_capabilities()
        .times(1)
        .in_sequence(&mut seq)
        .returning(move |_| {
            switcher.disconnect();
            switcher.connect(account(), CHAIN).unwrap();
            Ok(json!({ "0x2105": { "atomic": { "status": "unsupported" } } }))
        });
    transport
        .expect_request_capabilities()
        .times(1)
        .in_sequence(&mut seq)
        .returning(|_| Ok(json!({ "0x2105": { "atomic": { "status": "supported" } } })));
    let client = BatchClient::new(session, Arc::new(transport));

    let err = assert_err!(client.get_capabilities(account()).await);
    assert!(matches!(err, BatchError::SessionChanged { .. }));

    let set = assert_ok!(client.get_capabilities(account()).await);
    assert!(set.supports_atomic(CHAIN));
}

#[tokio::test]
async fn test_discard_and_resubmit() {
    let mut transport = MockWalletTransport::new();
    transport
        .expect_request_batch_submission()
        .times(2)
        .returning(|req| Ok(json!({ "id": req.id.as_ref().unwrap().as_str() })));
    let client = BatchClient::new(connected_session(), Arc::new(transport));

    let correlation = BatchId::random();
    let request = two_calls(Atomicity::Optional).correlation_id(correlation.clone());

    let id = assert_ok!(client.submit(request.clone()).await);
    assert_eq!(id, correlation);
    assert_eq!(client.current_account(), Some(account()));

    let discarded = client.discard(&id).unwrap();
    assert_eq!(discarded.state, BatchState::Submitted);
    assert!(client.tracked_batches().is_empty());

    assert_ok!(client.submit(request).await);
    assert_eq!(client.tracked_batches(), vec![correlation]);
}

#[tokio::test]
async fn test_cancelled_status_query_leaves_record_untouched() {
    let wallet = Arc::new(GatedWallet::default());
    let client = BatchClient::new(connected_session(), wallet.clone());

    wallet.release.notify_one();
    let id = assert_ok!(client.submit(two_calls(Atomicity::Optional)).await);
    let before = client.last_known_status(&id).unwrap();

    let timed_out = tokio::time::timeout(Duration::from_millis(20), client.get_status(&id)).await;
    assert!(timed_out.is_err());

    tokio::select! {
        result = client.wait_for_completion(&id, Duration::from_millis(5)) => {
            panic!("wait finished without a wallet answer: {result:?}")
        }
        _ = tokio::time::sleep(Duration::from_millis(30)) => {}
    }

    let after = client.last_known_status(&id).unwrap();
    assert_eq!(after, before);
    assert_eq!(after.state, BatchState::Submitted);
    assert_eq!(after.polls, 0);

    // The next query completes normally
    wallet.release.notify_one();
    let record = assert_ok!(client.get_status(&id).await);
    assert_eq!(record.state, BatchState::Confirmed);
}

fn interrupted_status_query(interrupt: impl Fn(&LocalSession) + Send + 'static) -> BatchClient {
    let session = connected_session();
    let switcher = session.clone();

    let mut transport = MockWalletTransport::new();
    transport
        .expect_request_batch_submission()
        .times(1)
        .returning(|_| Ok(json!({ "id": "0x0200" })));
    transport
        .expect_request_batch_status()
        .times(1)
        .returning(move |id| {
            interrupt(&*switcher);
            Ok(status(id, 200, vec![receipt("0x1"), receipt("0x1")]))
        });
    BatchClient::new(session, Arc::new(transport))
}

#[tokio::test]
async fn test_account_switch_during_status_query_discards_result() {
    let client = interrupted_status_query(|session| {
        session.switch_account(Address::repeat_byte(0x52)).unwrap();
    });

    let id = assert_ok!(client.submit(two_calls(Atomicity::Optional)).await);
    let before = client.last_known_status(&id).unwrap();

    let err = assert_err!(client.get_status(&id).await);
    assert!(matches!(err, BatchError::SessionChanged { .. }));
    assert_eq!(client.last_known_status(&id), Some(before));
}

#[tokio::test]
async fn test_reconnect_during_status_query_discards_result() {
    let client = interrupted_status_query(|session| {
        session.disconnect();
        session.connect(account(), CHAIN).unwrap();
    });

    let id = assert_ok!(client.submit(two_calls(Atomicity::Optional)).await);
    let before = client.last_known_status(&id).unwrap();

    // Same account again, but the binding the query started under is gone
    let err = assert_err!(client.get_status(&id).await);
    assert!(matches!(err, BatchError::SessionChanged { .. }));
    assert_eq!(client.last_known_status(&id), Some(before));
}
