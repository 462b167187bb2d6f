//! In-memory test harness.
//!
//! Everything the crate talks to is behind a trait (`ChainReader`,
//! `SyncSubmitter`, `TransactionSigner`, `Connector`), so the tests swap in
//! scripted doubles instead of running a node:
//!
//! - `MockChain`: nonce and balance source with injectable latency and failure
//! - `MockSubmitter`: replays scripted receipts or RPC errors
//! - `MockSigner`: records what it was asked to sign, can be told to refuse
//! - `MockWsServer` / `MockConnector` / `MockSocket`: channel-backed sockets
//!   driven from the test like a node would
//!
//! # Example
//!
//! ```ignore
//! let (connector, mut server) = MockWsServer::new();
//! let manager = SubscriptionManager::new("ws://mock", config, registry, connector);
//! manager.connect();
//!
//! let mut socket = server.accept().await;
//! let request = socket.next_request().await;
//! socket.ack(request_id(&request), "0xsub");
//! ```

mod scenario;

pub use scenario::*;

use std::{
    collections::VecDeque,
    sync::{
        atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};

use alloy::{
    primitives::{address, keccak256, Address, Bytes, LogData, B256, U256},
    rpc::{json_rpc::ErrorPayload, types::Log},
    sol,
    sol_types::SolEvent,
    transports::{RpcError, TransportErrorKind, TransportResult},
};
use async_trait::async_trait;
use futures::{channel::mpsc as channel, SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::{sync::mpsc, time::Instant};

use crate::ext::{
    AbiRegistry, ChainReader, Connector, ContractDescriptor, RawLog, ReceiptStatus, SignError,
    StatusNotice, StatusSink, SyncReceipt, SyncSubmitter, TransactionSigner, UnsignedTx,
    WsConnection, WsError,
};

/// How long harness helpers wait before declaring a test hung.
pub const HARNESS_TIMEOUT: Duration = Duration::from_secs(30);

// ============================================================================
// Fixtures
// ============================================================================

/// Address the token fixture is registered under.
pub const TOKEN: Address = address!("0xaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa");

/// A minimal token ABI: one indexed event, one anonymous event, one function.
pub const TOKEN_ABI: &str = r#"[
  {
    "type": "event",
    "name": "Transfer",
    "anonymous": false,
    "inputs": [
      {"name": "from", "type": "address", "indexed": true},
      {"name": "to", "type": "address", "indexed": true},
      {"name": "amount", "type": "uint256", "indexed": false}
    ]
  },
  {
    "type": "event",
    "name": "Hidden",
    "anonymous": true,
    "inputs": [
      {"name": "value", "type": "uint256", "indexed": false}
    ]
  },
  {
    "type": "function",
    "name": "transfer",
    "stateMutability": "nonpayable",
    "inputs": [
      {"name": "to", "type": "address"},
      {"name": "amount", "type": "uint256"}
    ],
    "outputs": [{"name": "", "type": "bool"}]
  }
]"#;

sol! {
    event Transfer(address indexed from, address indexed to, uint256 amount);
}

/// Registry holding only the token fixture at `TOKEN`.
pub fn token_registry() -> AbiRegistry {
    let token = ContractDescriptor::from_artifact_json(TOKEN, TOKEN_ABI)
        .expect("token fixture ABI parses")
        .with_name("Token");
    AbiRegistry::new().with_contract(token)
}

/// An encoded `Transfer` log emitted by `contract`. The transaction hash is
/// derived from the transfer so distinct transfers get distinct hashes.
pub fn transfer_log(contract: Address, from: Address, to: Address, amount: u64) -> RawLog {
    let encoded = Transfer {
        from,
        to,
        amount: U256::from(amount),
    }
    .encode_log_data();
    let transaction_hash =
        keccak256([from.as_slice(), to.as_slice(), &amount.to_be_bytes()[..]].concat());

    RawLog {
        address: contract,
        topics: encoded.topics().to_vec(),
        data: encoded.data,
        transaction_hash: Some(transaction_hash),
        block_number: Some(1),
        log_index: Some(0),
        timestamp: None,
    }
}

/// The same log in RPC receipt form.
pub fn rpc_log(raw: &RawLog) -> Log {
    Log {
        inner: alloy::primitives::Log {
            address: raw.address,
            data: LogData::new_unchecked(raw.topics.clone(), raw.data.clone()),
        },
        block_hash: None,
        block_number: raw.block_number,
        block_timestamp: raw.timestamp,
        transaction_hash: raw.transaction_hash,
        transaction_index: None,
        log_index: raw.log_index,
        removed: false,
    }
}

/// `{"receipts": [...]}` mini-block carrying one receipt per log.
pub fn mini_block(block_number: u64, logs: &[RawLog]) -> Value {
    let receipts: Vec<Value> = logs
        .iter()
        .map(|log| {
            json!({
                "transactionHash": log.transaction_hash,
                "logs": [log],
            })
        })
        .collect();
    json!({
        "block_number": block_number,
        "block_timestamp": 1_700_000_000u64 + block_number,
        "receipts": receipts,
    })
}

pub fn rpc_error(message: &str, data: Option<Bytes>) -> RpcError<TransportErrorKind> {
    RpcError::ErrorResp(ErrorPayload {
        code: -32000,
        message: message.to_string().into(),
        data: data.and_then(|d| serde_json::value::to_raw_value(&d).ok()),
    })
}

// ============================================================================
// MockChain
// ============================================================================

/// Account state as the network sees it.
#[derive(Debug)]
pub struct MockChain {
    nonce: AtomicU64,
    balance: Mutex<U256>,
    delay: Mutex<Option<Duration>>,
    failing: AtomicBool,
    calls: AtomicUsize,
}

impl MockChain {
    pub fn new(nonce: u64) -> Arc<Self> {
        Arc::new(Self {
            nonce: AtomicU64::new(nonce),
            balance: Mutex::new(U256::ZERO),
            delay: Mutex::new(None),
            failing: AtomicBool::new(false),
            calls: AtomicUsize::new(0),
        })
    }

    pub fn set_nonce(&self, nonce: u64) {
        self.nonce.store(nonce, Ordering::SeqCst);
    }

    pub fn set_balance(&self, balance: U256) {
        *self.balance.lock().unwrap() = balance;
    }

    /// Latency added to every transaction count read.
    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock().unwrap() = Some(delay);
    }

    /// Make every read fail with a connection error.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Number of transaction count reads so far.
    pub fn count_calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ChainReader for MockChain {
    async fn transaction_count(&self, _address: Address) -> TransportResult<u64> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let delay = *self.delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.failing.load(Ordering::SeqCst) {
            return Err(TransportErrorKind::custom_str("connection refused"));
        }
        Ok(self.nonce.load(Ordering::SeqCst))
    }

    async fn balance(&self, _address: Address) -> TransportResult<U256> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(TransportErrorKind::custom_str("connection refused"));
        }
        Ok(*self.balance.lock().unwrap())
    }
}

// ============================================================================
// MockSubmitter
// ============================================================================

/// Scripted response to one submission.
#[derive(Debug, Clone)]
pub enum Scripted {
    Receipt {
        status: ReceiptStatus,
        logs: Vec<RawLog>,
    },
    /// JSON-RPC error response, optionally with revert data.
    RpcError {
        message: String,
        data: Option<Bytes>,
    },
    /// Transport-level failure, no response.
    Network(String),
}

impl Scripted {
    pub fn success() -> Self {
        Scripted::Receipt {
            status: ReceiptStatus::Success,
            logs: Vec::new(),
        }
    }

    pub fn success_with_logs(logs: Vec<RawLog>) -> Self {
        Scripted::Receipt {
            status: ReceiptStatus::Success,
            logs,
        }
    }

    /// Included on chain with a failed status.
    pub fn reverted() -> Self {
        Scripted::Receipt {
            status: ReceiptStatus::Failure,
            logs: Vec::new(),
        }
    }

    pub fn rpc_error(message: impl Into<String>) -> Self {
        Scripted::RpcError {
            message: message.into(),
            data: None,
        }
    }

    pub fn rpc_revert(message: impl Into<String>, data: Bytes) -> Self {
        Scripted::RpcError {
            message: message.into(),
            data: Some(data),
        }
    }

    pub fn network(message: impl Into<String>) -> Self {
        Scripted::Network(message.into())
    }
}

/// Synchronous submission endpoint that answers from a script. An empty
/// script settles successfully.
#[derive(Debug, Default)]
pub struct MockSubmitter {
    script: Mutex<VecDeque<Scripted>>,
    submitted: Mutex<Vec<Bytes>>,
    block: AtomicU64,
}

impl MockSubmitter {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn push(&self, response: Scripted) {
        self.script.lock().unwrap().push_back(response);
    }

    /// Raw transactions received, in order.
    pub fn submitted(&self) -> Vec<Bytes> {
        self.submitted.lock().unwrap().clone()
    }
}

#[async_trait]
impl SyncSubmitter for MockSubmitter {
    async fn send_raw_transaction_sync(&self, raw: Bytes) -> TransportResult<SyncReceipt> {
        let transaction_hash: B256 = keccak256(&raw);
        self.submitted.lock().unwrap().push(raw);
        let response = self
            .script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(Scripted::success);

        match response {
            Scripted::Receipt { status, logs } => {
                let block_number = self.block.fetch_add(1, Ordering::SeqCst) + 1;
                Ok(SyncReceipt {
                    transaction_hash,
                    block_number,
                    gas_used: 21_000,
                    status,
                    logs: logs.iter().map(rpc_log).collect(),
                })
            }
            Scripted::RpcError { message, data } => Err(rpc_error(&message, data)),
            Scripted::Network(message) => Err(TransportErrorKind::custom_str(&message)),
        }
    }
}

// ============================================================================
// MockSigner
// ============================================================================

/// Signs by encoding the nonce. Every request is recorded, including refused
/// ones.
#[derive(Debug)]
pub struct MockSigner {
    address: Address,
    reject: AtomicBool,
    requests: Mutex<Vec<UnsignedTx>>,
}

impl MockSigner {
    pub fn new(address: Address) -> Arc<Self> {
        Arc::new(Self {
            address,
            reject: AtomicBool::new(false),
            requests: Mutex::new(Vec::new()),
        })
    }

    /// Refuse every request as if the user declined.
    pub fn set_rejecting(&self, reject: bool) {
        self.reject.store(reject, Ordering::SeqCst);
    }

    pub fn requests(&self) -> Vec<UnsignedTx> {
        self.requests.lock().unwrap().clone()
    }

    pub fn last_request(&self) -> Option<UnsignedTx> {
        self.requests.lock().unwrap().last().cloned()
    }
}

#[async_trait]
impl TransactionSigner for MockSigner {
    fn address(&self) -> Address {
        self.address
    }

    async fn sign_transaction(&self, tx: &UnsignedTx) -> Result<Bytes, SignError> {
        self.requests.lock().unwrap().push(tx.clone());
        if self.reject.load(Ordering::SeqCst) {
            return Err(SignError::Rejected("User rejected the request".to_string()));
        }
        let mut raw = tx.from.to_vec();
        raw.extend_from_slice(&tx.nonce.to_be_bytes());
        Ok(raw.into())
    }
}

// ============================================================================
// RecordingStatusSink
// ============================================================================

#[derive(Debug, Default)]
pub struct RecordingStatusSink {
    notices: Mutex<Vec<StatusNotice>>,
}

impl RecordingStatusSink {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn notices(&self) -> Vec<StatusNotice> {
        self.notices.lock().unwrap().clone()
    }

    pub fn last(&self) -> Option<StatusNotice> {
        self.notices.lock().unwrap().last().cloned()
    }
}

impl StatusSink for RecordingStatusSink {
    fn publish(&self, notice: StatusNotice) {
        self.notices.lock().unwrap().push(notice);
    }
}

// ============================================================================
// Mock WebSocket server
// ============================================================================

/// Connector half of the mock server: every successful connect hands the
/// server end of a fresh socket to `MockWsServer::accept`.
#[derive(Debug)]
pub struct MockConnector {
    sockets: mpsc::UnboundedSender<MockSocket>,
    refuse: AtomicBool,
    attempts: Mutex<Vec<Instant>>,
}

impl MockConnector {
    /// Fail every connect until switched back.
    pub fn refuse_connections(&self, refuse: bool) {
        self.refuse.store(refuse, Ordering::SeqCst);
    }

    /// Time of every connect attempt, successful or not.
    pub fn attempts(&self) -> Vec<Instant> {
        self.attempts.lock().unwrap().clone()
    }
}

#[async_trait]
impl Connector for MockConnector {
    async fn connect(&self, _url: &str) -> Result<WsConnection, WsError> {
        self.attempts.lock().unwrap().push(Instant::now());
        if self.refuse.load(Ordering::SeqCst) {
            return Err(WsError::Connect("connection refused".to_string()));
        }

        let (outbound_tx, outbound_rx) = channel::unbounded::<String>();
        let (inbound_tx, inbound_rx) = channel::unbounded::<Result<String, WsError>>();
        let socket = MockSocket {
            outbound: outbound_rx,
            inbound: inbound_tx,
        };
        if self.sockets.send(socket).is_err() {
            return Err(WsError::Connect("server gone".to_string()));
        }

        Ok(WsConnection {
            sink: Box::pin(outbound_tx.sink_map_err(|e| WsError::Socket(e.to_string()))),
            stream: Box::pin(inbound_rx),
        })
    }
}

/// Server side: accepts the sockets the connector opens.
#[derive(Debug)]
pub struct MockWsServer {
    sockets: mpsc::UnboundedReceiver<MockSocket>,
}

impl MockWsServer {
    pub fn new() -> (Arc<MockConnector>, MockWsServer) {
        let (tx, rx) = mpsc::unbounded_channel();
        let connector = Arc::new(MockConnector {
            sockets: tx,
            refuse: AtomicBool::new(false),
            attempts: Mutex::new(Vec::new()),
        });
        (connector, MockWsServer { sockets: rx })
    }

    /// Next opened socket.
    pub async fn accept(&mut self) -> MockSocket {
        tokio::time::timeout(HARNESS_TIMEOUT, self.sockets.recv())
            .await
            .expect("timed out waiting for a connection")
            .expect("connector dropped")
    }

    /// Socket opened since the last call, if any.
    pub fn try_accept(&mut self) -> Option<MockSocket> {
        self.sockets.try_recv().ok()
    }
}

/// Server end of one connection.
#[derive(Debug)]
pub struct MockSocket {
    outbound: channel::UnboundedReceiver<String>,
    inbound: channel::UnboundedSender<Result<String, WsError>>,
}

impl MockSocket {
    /// Next frame the client sent, parsed.
    pub async fn next_request(&mut self) -> Value {
        let frame = tokio::time::timeout(HARNESS_TIMEOUT, self.outbound.next())
            .await
            .expect("timed out waiting for a request")
            .expect("client closed the socket");
        serde_json::from_str(&frame).expect("client sent invalid JSON")
    }

    /// `None` once the client has closed its end.
    pub async fn next_request_or_close(&mut self) -> Option<Value> {
        let frame = tokio::time::timeout(HARNESS_TIMEOUT, self.outbound.next())
            .await
            .expect("timed out waiting for a request")?;
        serde_json::from_str(&frame).ok()
    }

    /// A frame the client has already sent, without waiting.
    pub fn try_next_request(&mut self) -> Option<Value> {
        let frame = self.outbound.try_next().ok().flatten()?;
        serde_json::from_str(&frame).ok()
    }

    /// Read `count` subscribe requests and acknowledge each with
    /// `{prefix}-{request id}`. Returns `(request, subscription id)` pairs.
    pub async fn ack_subscriptions(&mut self, count: usize, prefix: &str) -> Vec<(Value, String)> {
        let mut acked = Vec::with_capacity(count);
        for _ in 0..count {
            let request = self.next_request().await;
            assert_eq!(request["method"], "eth_subscribe", "{request}");
            let id = request_id(&request);
            let subscription = format!("{prefix}-{id}");
            self.ack(id, &subscription);
            acked.push((request, subscription));
        }
        acked
    }

    pub fn send(&self, frame: Value) {
        let _ = self.inbound.unbounded_send(Ok(frame.to_string()));
    }

    pub fn send_text(&self, text: &str) {
        let _ = self.inbound.unbounded_send(Ok(text.to_string()));
    }

    pub fn ack(&self, id: u64, subscription: &str) {
        self.send(json!({"jsonrpc": "2.0", "id": id, "result": subscription}));
    }

    pub fn reject(&self, id: u64, code: i64, message: &str) {
        self.send(json!({
            "jsonrpc": "2.0",
            "id": id,
            "error": {"code": code, "message": message}
        }));
    }

    pub fn notify(&self, subscription: &str, result: Value) {
        self.send(json!({
            "jsonrpc": "2.0",
            "method": "eth_subscription",
            "params": {"subscription": subscription, "result": result}
        }));
    }

    /// Close from the server side.
    pub fn close(self, reason: &str) {
        let _ = self
            .inbound
            .unbounded_send(Err(WsError::Closed(reason.to_string())));
    }
}

pub fn request_id(request: &Value) -> u64 {
    request["id"].as_u64().expect("request carries a numeric id")
}

/// Subscription id a `(request, subscription)` list assigned to `format`'s
/// request, where format is `"logs"` or `"miniBlocks"`.
pub fn subscription_for<'a>(acked: &'a [(Value, String)], format: &str) -> &'a str {
    acked
        .iter()
        .find(|(request, _)| request["params"][0] == format)
        .map(|(_, subscription)| subscription.as_str())
        .expect("no subscription for format")
}
