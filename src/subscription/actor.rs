//! The task behind `SubscriptionManager`.
//!
//! All socket and subscription state is owned here and only touched from
//! this task, so none of it is locked. The task moves between phases:
//!
//! - `Idle`: no socket, waiting for `connect()`
//! - `Connecting`: connect in flight
//! - `Connected`: socket open, frames flowing
//! - `Backoff`: waiting out the reconnect delay
//!
//! Outbound frames always go through `outbox`; it is flushed whenever the
//! socket is open, so requests made while disconnected are sent on the next
//! open instead of being lost.

use std::{
    collections::{HashMap, HashSet, VecDeque},
    panic::{catch_unwind, AssertUnwindSafe},
    sync::Arc,
    time::Duration,
};

use alloy::primitives::Address;
use futures::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tracing::{debug, error, info, trace, warn};

use super::{
    protocol::{self, Inbound, SubscriptionFormat},
    ConnectionEvent, ConnectionState, Connector, EventCallback, SubscriptionConfig,
    SubscriptionSnapshot, WatchId, WsConnection, WsSink,
};
use crate::ext::{backoff_duration, DecodedEvent, EventDecoder};

pub(super) enum Command {
    Connect,
    Watch {
        id: WatchId,
        contract: Address,
        callback: EventCallback,
    },
    Unwatch {
        contract: Address,
    },
    Disconnect {
        done: oneshot::Sender<()>,
    },
    Snapshot {
        reply: oneshot::Sender<SubscriptionSnapshot>,
    },
}

enum Phase {
    Idle,
    Connecting,
    Connected(WsConnection),
    Backoff(Duration),
    Shutdown,
}

struct Watch {
    id: WatchId,
    contract: Address,
    callback: EventCallback,
}

/// One subscribe request, pending until acknowledged, then active under the
/// server-assigned id.
#[derive(Debug, Clone)]
struct SubscriptionRecord {
    request_id: u64,
    watch: WatchId,
    contract: Address,
    format: SubscriptionFormat,
}

pub(super) struct SubscriptionActor {
    url: String,
    config: SubscriptionConfig,
    decoder: EventDecoder,
    connector: Arc<dyn Connector>,
    commands: mpsc::UnboundedReceiver<Command>,
    state: watch::Sender<ConnectionState>,
    events: broadcast::Sender<ConnectionEvent>,

    watches: Vec<Watch>,
    /// request id → record awaiting acknowledgement
    pending: HashMap<u64, SubscriptionRecord>,
    /// subscription id → acknowledged record
    active: HashMap<String, SubscriptionRecord>,
    /// request ids of unsubscribe requests in flight
    unsubscribing: HashSet<u64>,
    outbox: VecDeque<String>,
    next_request_id: u64,
    attempt: u32,
}

impl SubscriptionActor {
    pub(super) fn new(
        url: String,
        config: SubscriptionConfig,
        decoder: EventDecoder,
        connector: Arc<dyn Connector>,
        commands: mpsc::UnboundedReceiver<Command>,
        state: watch::Sender<ConnectionState>,
        events: broadcast::Sender<ConnectionEvent>,
    ) -> Self {
        Self {
            url,
            config,
            decoder,
            connector,
            commands,
            state,
            events,
            watches: Vec::new(),
            pending: HashMap::new(),
            active: HashMap::new(),
            unsubscribing: HashSet::new(),
            outbox: VecDeque::new(),
            next_request_id: 1,
            attempt: 0,
        }
    }

    pub(super) async fn run(mut self) {
        let mut phase = Phase::Idle;
        loop {
            phase = match phase {
                Phase::Idle => self.idle().await,
                Phase::Connecting => self.connecting().await,
                Phase::Connected(connection) => self.connected(connection).await,
                Phase::Backoff(delay) => self.backoff(delay).await,
                Phase::Shutdown => break,
            };
        }
        debug!(url = %self.url, "subscription task stopped");
    }

    // ========================================================================
    // Phases
    // ========================================================================

    async fn idle(&mut self) -> Phase {
        self.set_state(ConnectionState::Disconnected);
        loop {
            match self.commands.recv().await {
                None => return Phase::Shutdown,
                Some(Command::Connect) => {
                    self.attempt = 0;
                    return Phase::Connecting;
                }
                Some(command) => {
                    if let Some(next) = self.handle_command(command) {
                        return next;
                    }
                }
            }
        }
    }

    async fn connecting(&mut self) -> Phase {
        self.set_state(ConnectionState::Connecting);
        info!(url = %self.url, attempt = self.attempt, "connecting");

        let connector = Arc::clone(&self.connector);
        let url = self.url.clone();
        let connect = async move { connector.connect(&url).await };
        tokio::pin!(connect);

        loop {
            tokio::select! {
                result = &mut connect => {
                    return match result {
                        Ok(connection) => Phase::Connected(connection),
                        Err(e) => {
                            warn!(url = %self.url, error = %e, "connect failed");
                            self.emit(ConnectionEvent::Disconnected { reason: e.to_string() });
                            self.schedule_reconnect()
                        }
                    };
                }
                command = self.commands.recv() => match command {
                    None => return Phase::Shutdown,
                    Some(command) => {
                        if let Some(next) = self.handle_command(command) {
                            return next;
                        }
                    }
                },
            }
        }
    }

    async fn connected(&mut self, mut connection: WsConnection) -> Phase {
        self.attempt = 0;
        info!(url = %self.url, watches = self.watches.len(), "connected");
        self.emit(ConnectionEvent::Connected);
        self.subscribe_unrecorded();

        loop {
            if let Err(e) = self.flush(&mut connection.sink).await {
                return self.connection_lost(e.to_string());
            }
            self.refresh_connected_state();

            tokio::select! {
                frame = connection.stream.next() => match frame {
                    Some(Ok(text)) => self.handle_frame(&text),
                    Some(Err(e)) => return self.connection_lost(e.to_string()),
                    None => return self.connection_lost("stream ended".to_string()),
                },
                command = self.commands.recv() => match command {
                    None => {
                        let _ = connection.sink.close().await;
                        return Phase::Shutdown;
                    }
                    Some(command) => {
                        if let Some(next) = self.handle_command(command) {
                            let _ = connection.sink.close().await;
                            return next;
                        }
                    }
                },
            }
        }
    }

    async fn backoff(&mut self, delay: Duration) -> Phase {
        let sleep = tokio::time::sleep(delay);
        tokio::pin!(sleep);

        loop {
            tokio::select! {
                _ = &mut sleep => return Phase::Connecting,
                command = self.commands.recv() => match command {
                    None => return Phase::Shutdown,
                    Some(command) => {
                        if let Some(next) = self.handle_command(command) {
                            return next;
                        }
                    }
                },
            }
        }
    }

    // ========================================================================
    // Transitions
    // ========================================================================

    /// Socket gone: every server-assigned id is now meaningless.
    fn connection_lost(&mut self, reason: String) -> Phase {
        warn!(url = %self.url, %reason, "connection lost");
        self.clear_records();
        self.emit(ConnectionEvent::Disconnected { reason });
        self.schedule_reconnect()
    }

    fn schedule_reconnect(&mut self) -> Phase {
        if self.attempt >= self.config.max_reconnect_attempts {
            error!(
                url = %self.url,
                attempts = self.attempt,
                "reconnect attempts exhausted, giving up"
            );
            self.emit(ConnectionEvent::ReconnectExhausted {
                attempts: self.attempt,
            });
            return Phase::Idle;
        }

        let delay = backoff_duration(self.attempt, self.config.base_delay());
        self.attempt += 1;
        info!(
            url = %self.url,
            attempt = self.attempt,
            delay_ms = delay.as_millis() as u64,
            "scheduling reconnect"
        );
        self.set_state(ConnectionState::ReconnectPending {
            attempt: self.attempt,
            delay,
        });
        self.emit(ConnectionEvent::Reconnecting {
            attempt: self.attempt,
            delay,
        });
        Phase::Backoff(delay)
    }

    fn clear_records(&mut self) {
        self.pending.clear();
        self.active.clear();
        self.unsubscribing.clear();
        self.outbox.clear();
    }

    // ========================================================================
    // Commands
    // ========================================================================

    /// Handle a command; `Some` switches phase.
    fn handle_command(&mut self, command: Command) -> Option<Phase> {
        match command {
            Command::Connect => {
                trace!("connect requested while not idle, ignoring");
                None
            }
            Command::Watch {
                id,
                contract,
                callback,
            } => {
                if !self.decoder.registry().contains(&contract) {
                    warn!(%contract, "watching contract with no registered ABI");
                }
                self.watches.push(Watch {
                    id,
                    contract,
                    callback,
                });
                self.subscribe_watch(id, contract);
                None
            }
            Command::Unwatch { contract } => {
                self.unwatch(contract);
                None
            }
            Command::Disconnect { done } => {
                info!(url = %self.url, "disconnect requested");
                self.watches.clear();
                self.clear_records();
                self.attempt = 0;
                self.set_state(ConnectionState::Disconnected);
                let _ = done.send(());
                Some(Phase::Idle)
            }
            Command::Snapshot { reply } => {
                let _ = reply.send(self.snapshot());
                None
            }
        }
    }

    fn unwatch(&mut self, contract: Address) {
        let removed: HashSet<WatchId> = self
            .watches
            .iter()
            .filter(|w| w.contract == contract)
            .map(|w| w.id)
            .collect();
        if removed.is_empty() {
            return;
        }
        self.watches.retain(|w| !removed.contains(&w.id));

        let stale: Vec<String> = self
            .active
            .iter()
            .filter(|(_, record)| removed.contains(&record.watch))
            .map(|(subscription, _)| subscription.clone())
            .collect();
        for subscription in stale {
            self.active.remove(&subscription);
            self.send_unsubscribe(&subscription);
        }
        // Pending records stay until acknowledged; the ack finds no watch
        // and unsubscribes.
        info!(%contract, watches = removed.len(), "unwatched contract");
    }

    // ========================================================================
    // Outbound
    // ========================================================================

    fn next_id(&mut self) -> u64 {
        let id = self.next_request_id;
        self.next_request_id += 1;
        id
    }

    fn subscribe_watch(&mut self, watch: WatchId, contract: Address) {
        for format in self.config.formats.clone() {
            let request_id = self.next_id();
            self.pending.insert(
                request_id,
                SubscriptionRecord {
                    request_id,
                    watch,
                    contract,
                    format,
                },
            );
            self.outbox
                .push_back(protocol::subscribe_request(request_id, format, contract));
            debug!(%contract, request_id, ?format, "queued subscribe request");
        }
    }

    /// Subscribe every watch that has no pending or active record.
    fn subscribe_unrecorded(&mut self) {
        let recorded: HashSet<WatchId> = self
            .pending
            .values()
            .chain(self.active.values())
            .map(|record| record.watch)
            .collect();
        let missing: Vec<(WatchId, Address)> = self
            .watches
            .iter()
            .filter(|w| !recorded.contains(&w.id))
            .map(|w| (w.id, w.contract))
            .collect();
        for (watch, contract) in missing {
            self.subscribe_watch(watch, contract);
        }
    }

    fn send_unsubscribe(&mut self, subscription: &str) {
        let request_id = self.next_id();
        self.unsubscribing.insert(request_id);
        self.outbox
            .push_back(protocol::unsubscribe_request(request_id, subscription));
        debug!(subscription, request_id, "queued unsubscribe request");
    }

    async fn flush(&mut self, sink: &mut WsSink) -> Result<(), super::WsError> {
        while let Some(frame) = self.outbox.pop_front() {
            trace!(%frame, "send");
            sink.send(frame).await?;
        }
        Ok(())
    }

    // ========================================================================
    // Inbound
    // ========================================================================

    fn handle_frame(&mut self, text: &str) {
        match protocol::parse_inbound(text) {
            Inbound::Response { id, result } => self.handle_response(id, result),
            Inbound::Error { id, code, message } => {
                let record = id.and_then(|id| self.pending.remove(&id));
                if let Some(id) = id {
                    self.unsubscribing.remove(&id);
                }
                warn!(
                    request_id = ?id,
                    code,
                    %message,
                    contract = ?record.as_ref().map(|r| r.contract),
                    "subscription error"
                );
                self.emit(ConnectionEvent::SubscriptionError {
                    contract: record.map(|r| r.contract),
                    code,
                    message,
                });
            }
            Inbound::Notification {
                subscription,
                result,
            } => self.handle_notification(&subscription, &result),
            Inbound::Other => trace!(%text, "ignoring frame"),
            Inbound::Malformed(e) => warn!(error = %e, "malformed frame"),
        }
    }

    fn handle_response(&mut self, id: u64, result: Value) {
        if self.unsubscribing.remove(&id) {
            debug!(request_id = id, %result, "unsubscribed");
            return;
        }
        let Some(record) = self.pending.remove(&id) else {
            trace!(request_id = id, "response for unknown request");
            return;
        };
        let Some(subscription) = protocol::subscription_key(&result) else {
            warn!(request_id = id, %result, "subscribe acknowledged without an id");
            return;
        };

        if !self.watches.iter().any(|w| w.id == record.watch) {
            debug!(%subscription, "acknowledged after unwatch, unsubscribing");
            self.send_unsubscribe(&subscription);
            return;
        }
        debug!(
            contract = %record.contract,
            request_id = record.request_id,
            format = ?record.format,
            %subscription,
            "subscription active"
        );
        self.active.insert(subscription, record);
    }

    fn handle_notification(&mut self, subscription: &str, result: &Value) {
        let Some(record) = self.active.get(subscription) else {
            trace!(subscription, "notification for unknown subscription");
            return;
        };
        let Some(watch) = self.watches.iter().find(|w| w.id == record.watch) else {
            return;
        };

        match protocol::batch_logs(result, record.contract) {
            Some(logs) => {
                trace!(subscription, logs = logs.len(), "batch notification");
                for log in &logs {
                    deliver(watch, subscription, self.decoder.decode(log));
                }
            }
            None => deliver(watch, subscription, self.decoder.decode_json(result)),
        }
    }

    // ========================================================================
    // Observability
    // ========================================================================

    fn set_state(&self, state: ConnectionState) {
        self.state.send_if_modified(|current| {
            if *current == state {
                return false;
            }
            trace!(from = ?*current, to = ?state, "connection state");
            *current = state;
            true
        });
    }

    fn refresh_connected_state(&self) {
        if self.pending.is_empty() {
            self.set_state(ConnectionState::Active);
        } else {
            self.set_state(ConnectionState::Subscribing);
        }
    }

    fn emit(&self, event: ConnectionEvent) {
        // No receivers is fine.
        let _ = self.events.send(event);
    }

    fn snapshot(&self) -> SubscriptionSnapshot {
        let mut active: Vec<(String, Address)> = self
            .active
            .iter()
            .map(|(subscription, record)| (subscription.clone(), record.contract))
            .collect();
        active.sort();
        SubscriptionSnapshot {
            state: *self.state.borrow(),
            watches: self.watches.len(),
            pending: self.pending.len(),
            active,
            queued: self.outbox.len(),
            reconnect_attempt: self.attempt,
        }
    }
}

/// Run a watch callback. A panicking callback is logged and the event
/// dropped; the connection and the other watches carry on.
fn deliver(watch: &Watch, subscription: &str, event: DecodedEvent) {
    let outcome = catch_unwind(AssertUnwindSafe(|| (watch.callback)(event)));
    if let Err(panic) = outcome {
        let reason = panic
            .downcast_ref::<&str>()
            .map(|s| s.to_string())
            .or_else(|| panic.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "unknown panic".to_string());
        error!(
            contract = %watch.contract,
            watch = watch.id.0,
            subscription,
            %reason,
            "event callback panicked"
        );
    }
}
