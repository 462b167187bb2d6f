//! Consumer-side deduplication.
//!
//! Each watched contract is subscribed through two notification formats, so
//! the same log can arrive twice. Consumers that aggregate events filter on
//! `(transactionHash, logIndex)` with a bounded LRU.

use std::{
    num::NonZeroUsize,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Mutex, PoisonError,
    },
};

use alloy::primitives::B256;
use lru::LruCache;

use crate::ext::DecodedEvent;

pub const DEFAULT_DEDUP_CAPACITY: usize = 10_000;

/// Bounded set of already-seen `(transactionHash, logIndex)` keys.
#[derive(Debug)]
pub struct EventDeduplicator {
    seen: Mutex<LruCache<(B256, u64), ()>>,
    duplicates: AtomicU64,
}

impl Default for EventDeduplicator {
    fn default() -> Self {
        Self::new(DEFAULT_DEDUP_CAPACITY)
    }
}

impl EventDeduplicator {
    /// A capacity of zero is treated as one.
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            seen: Mutex::new(LruCache::new(capacity)),
            duplicates: AtomicU64::new(0),
        }
    }

    /// `true` the first time an event is seen. Events without a transaction
    /// hash or log index cannot be identified and always pass.
    pub fn first_delivery(&self, event: &DecodedEvent) -> bool {
        let Some(key) = event.dedup_key() else {
            return true;
        };
        let mut seen = self.seen.lock().unwrap_or_else(PoisonError::into_inner);
        if seen.put(key, ()).is_some() {
            self.duplicates.fetch_add(1, Ordering::Relaxed);
            tracing::trace!(tx = %key.0, log_index = key.1, "dropped duplicate event");
            return false;
        }
        true
    }

    /// Number of deliveries rejected so far.
    pub fn duplicates(&self) -> u64 {
        self.duplicates.load(Ordering::Relaxed)
    }

    pub fn len(&self) -> usize {
        self.seen.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.seen.lock().unwrap_or_else(PoisonError::into_inner).clear();
    }
}

/// Wrap `callback` so each `(transactionHash, logIndex)` reaches it once.
pub fn dedup_callback<F>(capacity: usize, callback: F) -> impl Fn(DecodedEvent) + Send + Sync + 'static
where
    F: Fn(DecodedEvent) + Send + Sync + 'static,
{
    let dedup = Arc::new(EventDeduplicator::new(capacity));
    move |event: DecodedEvent| {
        if dedup.first_delivery(&event) {
            callback(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ext::decode_log;
    use crate::test_harness::{token_registry, transfer_log, TOKEN};
    use alloy::primitives::Address;

    fn event(tx: u8, log_index: u64) -> DecodedEvent {
        let mut log = transfer_log(TOKEN, Address::ZERO, Address::ZERO, 1);
        log.transaction_hash = Some(B256::repeat_byte(tx));
        log.log_index = Some(log_index);
        decode_log(&token_registry(), &log)
    }

    #[test]
    fn test_drops_repeated_keys() {
        let dedup = EventDeduplicator::new(16);
        assert!(dedup.first_delivery(&event(1, 0)));
        assert!(!dedup.first_delivery(&event(1, 0)));
        assert!(dedup.first_delivery(&event(1, 1)));
        assert!(dedup.first_delivery(&event(2, 0)));
        assert_eq!(dedup.duplicates(), 1);
        assert_eq!(dedup.len(), 3);
    }

    #[test]
    fn test_unidentifiable_events_pass() {
        let dedup = EventDeduplicator::new(16);
        let mut e = event(1, 0);
        e.log_index = None;
        assert!(dedup.first_delivery(&e));
        assert!(dedup.first_delivery(&e));
        assert!(dedup.is_empty());
    }

    #[test]
    fn test_capacity_evicts_oldest() {
        let dedup = EventDeduplicator::new(2);
        assert!(dedup.first_delivery(&event(1, 0)));
        assert!(dedup.first_delivery(&event(2, 0)));
        assert!(dedup.first_delivery(&event(3, 0)));
        // (1, 0) was evicted
        assert!(dedup.first_delivery(&event(1, 0)));
    }

    #[test]
    fn test_dedup_callback() {
        let count = Arc::new(AtomicU64::new(0));
        let counter = Arc::clone(&count);
        let callback = dedup_callback(8, move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        callback(event(1, 0));
        callback(event(1, 0));
        callback(event(1, 2));
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }
}
