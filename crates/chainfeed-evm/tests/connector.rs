//! Connector scenarios against scripted collaborators.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::sync::{mpsc, Notify};
use tokio_util::sync::CancellationToken;

use chainfeed_core::error::ConnectorError;
use chainfeed_core::source::BlockSource;
use chainfeed_core::state::{ConnectorState, SubscriptionState};
use chainfeed_core::store::CursorStore;
use chainfeed_core::types::Block;
use chainfeed_evm::fetcher::parse_hex_u64;
use chainfeed_evm::{Connector, ConnectorConfig, HeadChannel};
use chainfeed_rpc::error::TransportError;
use chainfeed_rpc::push::{Inbound, PushSink};
use chainfeed_rpc::request::JsonRpcRequest;
use chainfeed_storage::{FaultPoint, InMemoryCursorStore};

const LIMIT: Duration = Duration::from_secs(5);

// ─── Block source ─────────────────────────────────────────────────────────────

#[derive(Default)]
struct SourceInner {
    height: AtomicU64,
    missing: Mutex<HashSet<u64>>,
    no_latest: AtomicBool,
    latest_block_calls: AtomicUsize,
    fetched: Mutex<Vec<u64>>,
    height_queried: Notify,
}

#[derive(Clone, Default)]
struct MockSource(Arc<SourceInner>);

impl MockSource {
    fn at(height: u64) -> Self {
        let src = Self::default();
        src.set_height(height);
        src
    }

    fn set_height(&self, h: u64) {
        self.0.height.store(h, Ordering::SeqCst);
    }

    fn payload(n: u64) -> Value {
        json!({ "number": format!("{n:#x}"), "hash": format!("0x{n:064x}") })
    }

    async fn next_height_query(&self) {
        tokio::time::timeout(LIMIT, self.0.height_queried.notified())
            .await
            .expect("connector never queried the head height");
    }
}

#[async_trait]
impl BlockSource for MockSource {
    async fn latest_height(&self) -> Result<u64, ConnectorError> {
        self.0.height_queried.notify_one();
        Ok(self.0.height.load(Ordering::SeqCst))
    }

    async fn block(&self, number: u64) -> Result<Option<Block>, ConnectorError> {
        self.0.fetched.lock().unwrap().push(number);
        if self.0.missing.lock().unwrap().contains(&number)
            || number > self.0.height.load(Ordering::SeqCst)
        {
            return Ok(None);
        }
        Ok(Some(Block::new(number, Self::payload(number))))
    }

    async fn latest_block(&self) -> Result<Option<Block>, ConnectorError> {
        self.0.latest_block_calls.fetch_add(1, Ordering::SeqCst);
        if self.0.no_latest.load(Ordering::SeqCst) {
            return Ok(None);
        }
        let h = self.0.height.load(Ordering::SeqCst);
        Ok(Some(Block::new(h, Self::payload(h))))
    }
}

// ─── Push transport ──────────────────────────────────────────────────────────

#[derive(Clone, Copy)]
enum SubscribeReply {
    Ack,
    HeadInstead,
    Silent,
}

struct MockSink {
    sent: Arc<Mutex<Vec<JsonRpcRequest>>>,
    inbound: mpsc::UnboundedSender<Inbound>,
    on_subscribe: SubscribeReply,
    ack_unsubscribe: bool,
}

#[async_trait]
impl PushSink for MockSink {
    async fn send(&self, req: JsonRpcRequest) -> Result<(), TransportError> {
        let reply = match (req.method.as_str(), self.on_subscribe) {
            ("eth_subscribe", SubscribeReply::Ack) => {
                Some(json!({"jsonrpc": "2.0", "result": "0xsub", "id": 1}))
            }
            ("eth_subscribe", SubscribeReply::HeadInstead) => Some(head_frame(1)),
            ("eth_unsubscribe", _) if self.ack_unsubscribe => {
                Some(json!({"jsonrpc": "2.0", "result": true, "id": 2}))
            }
            ("eth_chainId", _) => Some(json!({"jsonrpc": "2.0", "result": "0x1", "id": 3})),
            _ => None,
        };
        self.sent.lock().unwrap().push(req);
        if let Some(frame) = reply {
            let _ = self.inbound.send(Inbound::Frame(frame));
        }
        Ok(())
    }
}

fn head_frame(number: u64) -> Value {
    json!({
        "jsonrpc": "2.0",
        "method": "eth_subscription",
        "params": {"subscription": "0xsub", "result": {"number": format!("{number:#x}")}}
    })
}

// ─── Harness ─────────────────────────────────────────────────────────────────

struct Harness {
    source: MockSource,
    store: InMemoryCursorStore,
    sent: Arc<Mutex<Vec<JsonRpcRequest>>>,
    inbound: mpsc::UnboundedSender<Inbound>,
    connector: Connector<MockSource, InMemoryCursorStore, MockSink>,
}

fn harness(source: MockSource, on_subscribe: SubscribeReply, ack_unsubscribe: bool) -> Harness {
    let store = InMemoryCursorStore::new("1");
    let (tx, rx) = mpsc::unbounded_channel();
    let sent = Arc::new(Mutex::new(Vec::new()));
    let sink = MockSink {
        sent: Arc::clone(&sent),
        inbound: tx.clone(),
        on_subscribe,
        ack_unsubscribe,
    };
    let config = ConnectorConfig::builder()
        .chain_id("1")
        .unsubscribe_grace(Duration::from_millis(100))
        .build();
    let connector = Connector::new(
        config,
        source.clone(),
        store.clone(),
        HeadChannel::new(sink, rx),
    );
    Harness {
        source,
        store,
        sent,
        inbound: tx,
        connector,
    }
}

fn count(sent: &Mutex<Vec<JsonRpcRequest>>, method: &str) -> usize {
    sent.lock().unwrap().iter().filter(|r| r.method == method).count()
}

async fn logged_numbers(store: &InMemoryCursorStore) -> Vec<u64> {
    store
        .entries_after(0, 1_000)
        .await
        .unwrap()
        .iter()
        .map(|e| {
            let v: Value = serde_json::from_str(&e.data).unwrap();
            parse_hex_u64(v["number"].as_str().unwrap()).unwrap()
        })
        .collect()
}

type RunOutcome = (
    Result<(), ConnectorError>,
    Connector<MockSource, InMemoryCursorStore, MockSink>,
);

fn spawn_run(
    mut connector: Connector<MockSource, InMemoryCursorStore, MockSink>,
    cancel: CancellationToken,
) -> tokio::task::JoinHandle<RunOutcome> {
    tokio::spawn(async move {
        let result = connector.run(cancel).await;
        (result, connector)
    })
}

// ─── Scenarios ───────────────────────────────────────────────────────────────

#[tokio::test]
async fn bootstraps_then_drains_backlog_after_one_wakeup() {
    let h = harness(MockSource::at(100), SubscribeReply::Ack, true);
    let cancel = CancellationToken::new();
    let task = spawn_run(h.connector, cancel.clone());

    // Bootstrapped at 100, now waiting for a head.
    h.source.next_height_query().await;
    assert_eq!(h.store.cursor().await.unwrap(), Some(100));
    assert_eq!(logged_numbers(&h.store).await, vec![100]);

    h.source.set_height(103);
    h.inbound.send(Inbound::Frame(head_frame(103))).unwrap();

    // One wakeup is enough: 101..=103 are drained, then it waits again.
    tokio::time::timeout(LIMIT, async {
        while h.store.cursor().await.unwrap() != Some(103) {
            h.source.next_height_query().await;
        }
    })
    .await
    .expect("backlog not drained");

    assert_eq!(logged_numbers(&h.store).await, vec![100, 101, 102, 103]);
    assert_eq!(*h.source.0.fetched.lock().unwrap(), vec![101, 102, 103]);

    cancel.cancel();
    let (result, connector) = tokio::time::timeout(LIMIT, task).await.unwrap().unwrap();
    result.unwrap();
    assert_eq!(connector.state(), ConnectorState::Stopped);
    assert_eq!(h.store.cursor().await.unwrap(), Some(103));
}

#[tokio::test]
async fn cancellation_while_waiting_unsubscribes_once() {
    let h = harness(MockSource::at(100), SubscribeReply::Ack, true);
    let cancel = CancellationToken::new();
    let task = spawn_run(h.connector, cancel.clone());

    h.source.next_height_query().await;
    cancel.cancel();
    cancel.cancel();

    let (result, connector) = tokio::time::timeout(LIMIT, task).await.unwrap().unwrap();
    assert!(result.is_ok());
    assert_eq!(connector.state(), ConnectorState::Stopped);
    assert_eq!(connector.head().state(), SubscriptionState::Unsubscribed);
    assert_eq!(count(&h.sent, "eth_subscribe"), 1);
    assert_eq!(count(&h.sent, "eth_unsubscribe"), 1);
}

#[tokio::test]
async fn stored_cursor_skips_bootstrap() {
    let h = harness(MockSource::at(100), SubscribeReply::Ack, true);
    h.store
        .save(&[Block::new(100, MockSource::payload(100))])
        .await
        .unwrap();

    let cancel = CancellationToken::new();
    let task = spawn_run(h.connector, cancel.clone());
    h.source.next_height_query().await;
    cancel.cancel();
    tokio::time::timeout(LIMIT, task).await.unwrap().unwrap().0.unwrap();

    assert_eq!(h.source.0.latest_block_calls.load(Ordering::SeqCst), 0);
    assert_eq!(h.store.log_len().await.unwrap(), 1);
    assert_eq!(h.store.cursor().await.unwrap(), Some(100));
}

#[tokio::test]
async fn resumes_where_it_stopped() {
    let h = harness(MockSource::at(105), SubscribeReply::Ack, true);
    h.store
        .save(&[Block::new(102, MockSource::payload(102))])
        .await
        .unwrap();

    let cancel = CancellationToken::new();
    let task = spawn_run(h.connector, cancel.clone());
    tokio::time::timeout(LIMIT, async {
        while h.store.cursor().await.unwrap() != Some(105) {
            h.source.next_height_query().await;
        }
    })
    .await
    .unwrap();
    cancel.cancel();
    tokio::time::timeout(LIMIT, task).await.unwrap().unwrap().0.unwrap();

    assert_eq!(logged_numbers(&h.store).await, vec![102, 103, 104, 105]);
}

#[tokio::test]
async fn missing_block_is_fatal_and_still_unsubscribes() {
    let source = MockSource::at(102);
    source.0.missing.lock().unwrap().insert(101);
    let mut h = harness(source, SubscribeReply::Ack, true);
    h.store
        .save(&[Block::new(100, MockSource::payload(100))])
        .await
        .unwrap();

    let err = h.connector.run(CancellationToken::new()).await.unwrap_err();
    assert_eq!(err, ConnectorError::MissingBlock { number: 101 });
    assert_eq!(h.connector.state(), ConnectorState::Failed);
    assert_eq!(count(&h.sent, "eth_unsubscribe"), 1);
    assert_eq!(h.store.cursor().await.unwrap(), Some(100));
}

#[tokio::test]
async fn bootstrap_failure_is_fatal() {
    let source = MockSource::at(100);
    source.0.no_latest.store(true, Ordering::SeqCst);
    let mut h = harness(source, SubscribeReply::Ack, true);

    let err = h.connector.run(CancellationToken::new()).await.unwrap_err();
    assert!(matches!(err, ConnectorError::Bootstrap(_)));
    assert_eq!(h.store.cursor().await.unwrap(), None);
    assert_eq!(h.store.log_len().await.unwrap(), 0);
    assert_eq!(count(&h.sent, "eth_unsubscribe"), 1);
}

#[tokio::test]
async fn storage_failure_is_fatal_without_partial_write() {
    let mut h = harness(MockSource::at(101), SubscribeReply::Ack, true);
    h.store
        .save(&[Block::new(100, MockSource::payload(100))])
        .await
        .unwrap();
    h.store.inject_fault(FaultPoint::MidAppend);

    let err = h.connector.run(CancellationToken::new()).await.unwrap_err();
    assert!(matches!(err, ConnectorError::Storage(_)));
    assert_eq!(h.store.cursor().await.unwrap(), Some(100));
    assert_eq!(logged_numbers(&h.store).await, vec![100]);
}

#[tokio::test]
async fn frame_before_subscribe_ack_is_protocol_error() {
    let mut h = harness(MockSource::at(100), SubscribeReply::HeadInstead, true);

    let err = h.connector.run(CancellationToken::new()).await.unwrap_err();
    assert!(err.is_protocol());
    assert_eq!(h.connector.state(), ConnectorState::Failed);
    // Never subscribed, so nothing to unsubscribe.
    assert_eq!(count(&h.sent, "eth_unsubscribe"), 0);
    assert_eq!(h.store.cursor().await.unwrap(), None);
}

#[tokio::test]
async fn transport_error_while_waiting_is_fatal() {
    let h = harness(MockSource::at(100), SubscribeReply::Ack, true);
    let task = spawn_run(h.connector, CancellationToken::new());

    h.source.next_height_query().await;
    h.inbound
        .send(Inbound::Error(TransportError::WebSocket("connection reset".into())))
        .unwrap();

    let (result, connector) = tokio::time::timeout(LIMIT, task).await.unwrap().unwrap();
    assert!(matches!(result, Err(ConnectorError::Transport(_))));
    assert_eq!(connector.state(), ConnectorState::Failed);
}

#[tokio::test]
async fn cancel_before_subscribe_ack_stops_cleanly() {
    let h = harness(MockSource::at(100), SubscribeReply::Silent, true);
    let cancel = CancellationToken::new();
    let task = spawn_run(h.connector, cancel.clone());

    tokio::task::yield_now().await;
    cancel.cancel();

    let (result, connector) = tokio::time::timeout(LIMIT, task).await.unwrap().unwrap();
    result.unwrap();
    assert_eq!(connector.state(), ConnectorState::Stopped);
    assert_eq!(count(&h.sent, "eth_unsubscribe"), 0);
    assert_eq!(h.store.cursor().await.unwrap(), None);
}

#[tokio::test]
async fn unanswered_unsubscribe_is_bounded_by_grace() {
    let h = harness(MockSource::at(100), SubscribeReply::Ack, false);
    let cancel = CancellationToken::new();
    let task = spawn_run(h.connector, cancel.clone());

    h.source.next_height_query().await;
    cancel.cancel();

    let (result, connector) = tokio::time::timeout(LIMIT, task).await.unwrap().unwrap();
    result.unwrap();
    assert_eq!(count(&h.sent, "eth_unsubscribe"), 1);
    assert_eq!(connector.head().state(), SubscriptionState::UnsubscribePending);
}

#[tokio::test]
async fn cursor_at_numeric_limit_fails_instead_of_wrapping() {
    let mut h = harness(MockSource::at(100), SubscribeReply::Ack, true);
    h.store
        .save(&[Block::new(u64::MAX, MockSource::payload(u64::MAX))])
        .await
        .unwrap();

    let err = tokio::time::timeout(LIMIT, h.connector.run(CancellationToken::new()))
        .await
        .expect("run did not finish")
        .unwrap_err();
    assert!(matches!(err, ConnectorError::Invariant(_)));
    assert!(err.is_bug());
    assert_eq!(h.connector.state(), ConnectorState::Failed);
    assert!(h.source.0.fetched.lock().unwrap().is_empty());
    assert_eq!(h.store.cursor().await.unwrap(), Some(u64::MAX));
    assert_eq!(count(&h.sent, "eth_unsubscribe"), 1);
}
