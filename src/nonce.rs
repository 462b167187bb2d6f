//! Optimistic per-account nonce counter.
//!
//! The hot path (`get_nonce`) never touches the network: the counter is
//! seeded once from the confirmed transaction count and then incremented in
//! memory. The network is consulted again only to correct the counter, after
//! a failed submission or, optionally, on a background interval while the
//! account is idle.
//!
//! ## Locking
//!
//! The counter lives behind a `tokio::sync::RwLock`:
//!
//! - issuance takes the read lock and does an atomic `fetch_add`, so any
//!   number of callers can draw nonces concurrently without repeats
//! - correction takes the write lock for the whole network round trip, so a
//!   resync in progress blocks issuance until the new baseline is in place
//!
//! A `dirty` flag records whether anything was issued since the last sync.
//! Failure-triggered resyncs are skipped when it is clear, which collapses
//! several concurrent failures into a single network call.
//!
//! ```text
//!   uninitialized ──initialize()──► ready ──get_nonce()──► ready (dirty)
//!         ▲                           ▲                        │
//!         │ resync failed             └── resync (write lock) ◄┘
//!         └───────────────────────────────────┘
//! ```

use std::{
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc, Mutex as StdMutex, PoisonError, Weak,
    },
    time::Duration,
};

use alloy::{primitives::Address, transports::TransportResult};
use dashmap::DashMap;
use serde::Deserialize;
use tokio::{
    sync::RwLock,
    task::JoinHandle,
    time::MissedTickBehavior,
};
use tracing::{debug, info, trace, warn};

use crate::ext::ChainReader;

// ============================================================================
// Configuration
// ============================================================================

/// Nonce manager settings.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct NonceConfig {
    /// Resync from the network every N seconds while no transaction is in
    /// flight. Disabled when unset.
    pub resync_interval_secs: Option<u64>,
}

impl NonceConfig {
    pub fn with_resync_interval(mut self, interval: Duration) -> Self {
        self.resync_interval_secs = Some(interval.as_secs().max(1));
        self
    }

    pub fn resync_interval(&self) -> Option<Duration> {
        self.resync_interval_secs
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs)
    }
}

// ============================================================================
// Nonce Status (public snapshot)
// ============================================================================

/// Snapshot of a manager's state for monitoring/debugging.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NonceStatus {
    pub address: Address,
    /// Next nonce `get_nonce` would hand out
    pub current_nonce: u64,
    /// Nonces issued whose outcome has not been reported yet
    pub pending_count: u64,
    pub initialized: bool,
    /// Confirmed count seen at the most recent successful sync
    pub last_synced_nonce: Option<u64>,
}

// ============================================================================
// NonceManager
// ============================================================================

#[derive(Debug, Default)]
struct NonceCounter {
    next: AtomicU64,
    dirty: AtomicBool,
    initialized: bool,
    last_synced: Option<u64>,
}

struct NonceInner {
    address: Address,
    reader: Arc<dyn ChainReader>,
    counter: RwLock<NonceCounter>,
    pending: AtomicU64,
}

impl NonceInner {
    /// Overwrite the counter with the confirmed count. Caller holds the
    /// write lock. On failure the counter is marked uninitialized so the
    /// next issuance fetches again instead of trusting a stale value.
    async fn sync_locked(&self, counter: &mut NonceCounter) -> TransportResult<u64> {
        match self.reader.transaction_count(self.address).await {
            Ok(confirmed) => {
                let previous = *counter.next.get_mut();
                *counter.next.get_mut() = confirmed;
                *counter.dirty.get_mut() = false;
                counter.initialized = true;
                counter.last_synced = Some(confirmed);
                debug!(address = %self.address, previous, confirmed, "synced nonce from chain");
                Ok(confirmed)
            }
            Err(e) => {
                counter.initialized = false;
                warn!(address = %self.address, error = %e, "failed to fetch transaction count");
                Err(e)
            }
        }
    }

    async fn proactive_resync(&self) {
        let mut counter = self.counter.write().await;
        if !counter.initialized || self.pending.load(Ordering::SeqCst) > 0 {
            trace!(address = %self.address, "skipping proactive resync");
            return;
        }
        // Errors are logged in sync_locked; the next tick tries again.
        let _ = self.sync_locked(&mut counter).await;
    }
}

/// Hands out nonces for one account.
pub struct NonceManager {
    inner: Arc<NonceInner>,
    poller: StdMutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for NonceManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NonceManager")
            .field("address", &self.inner.address)
            .field("pending", &self.inner.pending.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl NonceManager {
    pub fn new(address: Address, reader: Arc<dyn ChainReader>) -> Self {
        Self {
            inner: Arc::new(NonceInner {
                address,
                reader,
                counter: RwLock::new(NonceCounter::default()),
                pending: AtomicU64::new(0),
            }),
            poller: StdMutex::new(None),
        }
    }

    pub fn address(&self) -> Address {
        self.inner.address
    }

    /// Seed the counter from the confirmed transaction count.
    ///
    /// Idempotent: once initialized, returns the current counter without a
    /// network call.
    pub async fn initialize(&self) -> TransportResult<u64> {
        let mut counter = self.inner.counter.write().await;
        if counter.initialized {
            return Ok(counter.next.load(Ordering::SeqCst));
        }
        let nonce = self.inner.sync_locked(&mut counter).await?;
        info!(address = %self.inner.address, nonce, "nonce manager initialized");
        Ok(nonce)
    }

    /// Take the next nonce.
    ///
    /// Initializes first when needed; otherwise purely in memory. Waits while
    /// a resync holds the counter.
    pub async fn get_nonce(&self) -> TransportResult<u64> {
        loop {
            {
                let counter = self.inner.counter.read().await;
                if counter.initialized {
                    let nonce = counter.next.fetch_add(1, Ordering::SeqCst);
                    counter.dirty.store(true, Ordering::SeqCst);
                    self.inner.pending.fetch_add(1, Ordering::SeqCst);
                    trace!(address = %self.inner.address, nonce, "allocated nonce");
                    return Ok(nonce);
                }
            }
            self.initialize().await?;
        }
    }

    /// Report the outcome of a transaction that used a nonce from this manager.
    ///
    /// Success leaves the counter alone. Failure resyncs from the network
    /// unless another failure already did so and nothing was issued since.
    pub async fn on_transaction_complete(&self, success: bool) -> TransportResult<()> {
        let _ = self
            .inner
            .pending
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        if success {
            return Ok(());
        }

        let mut counter = self.inner.counter.write().await;
        if counter.initialized && !*counter.dirty.get_mut() {
            debug!(address = %self.inner.address, "counter already resynced, skipping");
            return Ok(());
        }
        self.inner.sync_locked(&mut counter).await.map(|_| ())
    }

    /// Resync unconditionally.
    pub async fn resync(&self) -> TransportResult<u64> {
        let mut counter = self.inner.counter.write().await;
        self.inner.sync_locked(&mut counter).await
    }

    pub async fn status(&self) -> NonceStatus {
        let counter = self.inner.counter.read().await;
        NonceStatus {
            address: self.inner.address,
            current_nonce: counter.next.load(Ordering::SeqCst),
            pending_count: self.inner.pending.load(Ordering::SeqCst),
            initialized: counter.initialized,
            last_synced_nonce: counter.last_synced,
        }
    }

    /// Start resyncing every `interval` while no transaction is pending.
    /// Replaces any poller already running. Must be called within a tokio
    /// runtime.
    pub fn start_polling(&self, interval: Duration) {
        let weak: Weak<NonceInner> = Arc::downgrade(&self.inner);
        let address = self.inner.address;
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick completes immediately.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(inner) = weak.upgrade() else {
                    break;
                };
                inner.proactive_resync().await;
            }
            trace!(%address, "nonce poller exited");
        });

        let previous = self
            .poller
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(handle);
        if let Some(previous) = previous {
            previous.abort();
        }
        debug!(%address, interval_ms = interval.as_millis() as u64, "nonce polling started");
    }

    pub fn stop_polling(&self) {
        let handle = self
            .poller
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            handle.abort();
            debug!(address = %self.inner.address, "nonce polling stopped");
        }
    }

    pub fn is_polling(&self) -> bool {
        self.poller
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .is_some_and(|h| !h.is_finished())
    }

    /// Stop polling and forget all local state. The next `get_nonce`
    /// fetches a fresh baseline.
    pub async fn reset(&self) {
        self.stop_polling();
        let mut counter = self.inner.counter.write().await;
        *counter = NonceCounter::default();
        self.inner.pending.store(0, Ordering::SeqCst);
        info!(address = %self.inner.address, "nonce manager reset");
    }
}

impl Drop for NonceManager {
    fn drop(&mut self) {
        if let Some(handle) = self
            .poller
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            handle.abort();
        }
    }
}

// ============================================================================
// NonceManagers
// ============================================================================

/// One `NonceManager` per account, created on first use.
#[derive(Clone)]
pub struct NonceManagers {
    reader: Arc<dyn ChainReader>,
    config: NonceConfig,
    managers: Arc<DashMap<Address, Arc<NonceManager>>>,
}

impl NonceManagers {
    pub fn new(reader: Arc<dyn ChainReader>, config: NonceConfig) -> Self {
        Self {
            reader,
            config,
            managers: Arc::new(DashMap::new()),
        }
    }

    /// Manager for `address`, creating it if needed. A new manager starts
    /// polling when an interval is configured and a runtime is available.
    pub fn for_account(&self, address: Address) -> Arc<NonceManager> {
        let entry = self.managers.entry(address).or_insert_with(|| {
            let manager = NonceManager::new(address, Arc::clone(&self.reader));
            if let Some(interval) = self.config.resync_interval() {
                if tokio::runtime::Handle::try_current().is_ok() {
                    manager.start_polling(interval);
                }
            }
            trace!(%address, "created nonce manager");
            Arc::new(manager)
        });
        Arc::clone(entry.value())
    }

    pub fn get(&self, address: Address) -> Option<Arc<NonceManager>> {
        self.managers.get(&address).map(|m| Arc::clone(m.value()))
    }

    /// Tear down the manager for `address` (logout/disconnect).
    pub async fn remove(&self, address: Address) -> bool {
        match self.managers.remove(&address) {
            Some((_, manager)) => {
                manager.reset().await;
                true
            }
            None => false,
        }
    }

    pub fn len(&self) -> usize {
        self.managers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.managers.is_empty()
    }
}
