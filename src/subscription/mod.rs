//! Realtime log subscriptions over one WebSocket.
//!
//! `SubscriptionManager` is a handle to a single background task that owns
//! the socket and every subscription record. Callers register watches
//! (contract + callback); the task subscribes each watch in every configured
//! notification format, decodes inbound logs against the ABI registry and
//! hands the resulting `DecodedEvent`s to the watch's callback.
//!
//! ## Connection lifecycle
//!
//! ```text
//!   Disconnected ──connect()──► Connecting ──open──► Subscribing ──acks──► Active
//!        ▲                          ▲                      │                 │
//!        │                          │                close/error       close/error
//!        │                          │                      ▼                 ▼
//!        │                          └──── delay ──── ReconnectPending ◄──────┘
//!        │                                                 │
//!        └──────────── attempts exhausted ─────────────────┘
//! ```
//!
//! `disconnect()` returns to `Disconnected` from any state and clears every
//! watch and record; nothing reconnects until `connect()` is called again.
//!
//! ## Delivery
//!
//! At-least-once, best effort. Every watch is subscribed through both the
//! per-log and the mini-block format, so the same log is normally delivered
//! twice. Consumers that care dedupe on `(transactionHash, logIndex)`, see
//! `EventDeduplicator`.

mod actor;
mod protocol;
mod transport;

use std::{
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};

use alloy::primitives::Address;
use serde::Deserialize;
use tokio::{
    sync::{broadcast, mpsc, oneshot, watch},
    task::JoinHandle,
};

pub use protocol::{
    batch_logs, parse_inbound, subscribe_request, unsubscribe_request, Inbound,
    SubscriptionFormat,
};
pub use transport::{Connector, TungsteniteConnector, WsConnection, WsError, WsSink, WsStream};

use crate::ext::{AbiRegistry, DecodedEvent, EventDecoder};
use actor::{Command, SubscriptionActor};

// ============================================================================
// Configuration
// ============================================================================

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SubscriptionConfig {
    /// First reconnect delay; doubles with every consecutive failure
    pub base_delay_ms: u64,
    /// Reconnect attempts before giving up
    pub max_reconnect_attempts: u32,
    /// Notification formats requested for every watched contract
    pub formats: Vec<SubscriptionFormat>,
}

impl Default for SubscriptionConfig {
    fn default() -> Self {
        Self {
            base_delay_ms: 1_000,
            max_reconnect_attempts: 5,
            formats: vec![SubscriptionFormat::Logs, SubscriptionFormat::MiniBlocks],
        }
    }
}

impl SubscriptionConfig {
    pub fn with_base_delay(mut self, delay: Duration) -> Self {
        self.base_delay_ms = delay.as_millis() as u64;
        self
    }

    pub fn with_max_reconnect_attempts(mut self, attempts: u32) -> Self {
        self.max_reconnect_attempts = attempts;
        self
    }

    pub fn with_formats(mut self, formats: Vec<SubscriptionFormat>) -> Self {
        self.formats = formats;
        self
    }

    pub fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }
}

// ============================================================================
// Observable state
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    /// Socket open, some subscribe requests not yet acknowledged.
    Subscribing,
    /// Socket open, every subscribe request acknowledged.
    Active,
    /// Waiting `delay` before reconnect attempt number `attempt`.
    ReconnectPending { attempt: u32, delay: Duration },
}

impl ConnectionState {
    pub fn is_connected(&self) -> bool {
        matches!(self, ConnectionState::Subscribing | ConnectionState::Active)
    }
}

/// Lifecycle notifications.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionEvent {
    Connected,
    Disconnected { reason: String },
    Reconnecting { attempt: u32, delay: Duration },
    /// Automatic reconnection stopped. Call `connect()` to try again.
    ReconnectExhausted { attempts: u32 },
    /// The node refused a request. `contract` is set when the error belonged
    /// to a subscribe request, which is then dropped.
    SubscriptionError {
        contract: Option<Address>,
        code: i64,
        message: String,
    },
}

/// Point-in-time view of the actor's bookkeeping.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionSnapshot {
    pub state: ConnectionState,
    pub watches: usize,
    pub pending: usize,
    /// `(subscription id, contract)` of every acknowledged subscription
    pub active: Vec<(String, Address)>,
    /// Frames waiting for the socket to open
    pub queued: usize,
    pub reconnect_attempt: u32,
}

/// Identifies one registered watch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WatchId(pub u64);

pub type EventCallback = Arc<dyn Fn(DecodedEvent) + Send + Sync>;

// ============================================================================
// SubscriptionManager
// ============================================================================

/// Handle to the subscription task. Dropping it stops the task.
pub struct SubscriptionManager {
    commands: mpsc::UnboundedSender<Command>,
    state: watch::Receiver<ConnectionState>,
    events: broadcast::Sender<ConnectionEvent>,
    next_watch: AtomicU64,
    task: JoinHandle<()>,
}

impl std::fmt::Debug for SubscriptionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriptionManager")
            .field("state", &*self.state.borrow())
            .finish_non_exhaustive()
    }
}

impl SubscriptionManager {
    /// Spawn the subscription task. Starts disconnected; call `connect()`.
    /// Must be called within a tokio runtime.
    pub fn new(
        url: impl Into<String>,
        config: SubscriptionConfig,
        registry: Arc<AbiRegistry>,
        connector: Arc<dyn Connector>,
    ) -> Self {
        let (commands, command_rx) = mpsc::unbounded_channel();
        let (state_tx, state) = watch::channel(ConnectionState::Disconnected);
        let (events, _) = broadcast::channel(64);

        let actor = SubscriptionActor::new(
            url.into(),
            config,
            EventDecoder::new(registry),
            connector,
            command_rx,
            state_tx,
            events.clone(),
        );
        let task = tokio::spawn(actor.run());

        Self {
            commands,
            state,
            events,
            next_watch: AtomicU64::new(1),
            task,
        }
    }

    /// Same as `new` with the tungstenite connector.
    pub fn with_tungstenite(
        url: impl Into<String>,
        config: SubscriptionConfig,
        registry: Arc<AbiRegistry>,
    ) -> Self {
        Self::new(url, config, registry, Arc::new(TungsteniteConnector))
    }

    fn send(&self, command: Command) {
        if self.commands.send(command).is_err() {
            tracing::warn!("subscription task is gone, command dropped");
        }
    }

    /// Open the socket. No-op unless disconnected.
    pub fn connect(&self) {
        self.send(Command::Connect);
    }

    /// Deliver every log from `contract` to `callback`.
    ///
    /// Subscribe requests are sent right away when the socket is open and
    /// queued for the next open otherwise.
    pub fn subscribe<F>(&self, contract: Address, callback: F) -> WatchId
    where
        F: Fn(DecodedEvent) + Send + Sync + 'static,
    {
        let id = WatchId(self.next_watch.fetch_add(1, Ordering::Relaxed));
        self.send(Command::Watch {
            id,
            contract,
            callback: Arc::new(callback),
        });
        id
    }

    /// Like `subscribe`, delivering into a channel.
    pub fn subscribe_channel(
        &self,
        contract: Address,
    ) -> (WatchId, mpsc::UnboundedReceiver<DecodedEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = self.subscribe(contract, move |event| {
            let _ = tx.send(event);
        });
        (id, rx)
    }

    /// Drop every watch on `contract` and unsubscribe its active records.
    pub fn unsubscribe(&self, contract: Address) {
        self.send(Command::Unwatch { contract });
    }

    /// Close the socket and clear all watches and records. Automatic
    /// reconnection stops.
    pub async fn disconnect(&self) {
        let (done, wait) = oneshot::channel();
        self.send(Command::Disconnect { done });
        let _ = wait.await;
    }

    /// `None` if the task has stopped.
    pub async fn snapshot(&self) -> Option<SubscriptionSnapshot> {
        let (reply, wait) = oneshot::channel();
        self.send(Command::Snapshot { reply });
        wait.await.ok()
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    pub fn is_connected(&self) -> bool {
        self.state().is_connected()
    }

    /// Receiver that observes every state change.
    pub fn state_changes(&self) -> watch::Receiver<ConnectionState> {
        self.state.clone()
    }

    pub fn events(&self) -> broadcast::Receiver<ConnectionEvent> {
        self.events.subscribe()
    }
}

impl Drop for SubscriptionManager {
    fn drop(&mut self) {
        self.task.abort();
    }
}
