//! Recent-delivery cache for webhook idempotency.
//!
//! The platform redelivers webhooks on slow responses, so each delivery is
//! keyed by {conversation, message, event} and dropped when seen recently.
//! The cache is memory-resident and advisory: it is lost on restart, which
//! at worst lets one old delivery through.

use std::collections::HashMap;
use std::time::{Duration, Instant};

/// Default capacity before the cache is cleared wholesale.
pub const DEFAULT_CAPACITY: usize = 1000;

/// Default age after which an entry no longer blocks redelivery.
pub const DEFAULT_TTL: Duration = Duration::from_secs(15 * 60);

/// Identity of one webhook delivery.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DeliveryKey {
    pub conversation_id: i64,
    pub message_id: i64,
    pub event: String,
}

/// Bounded, time-aware cache of recently processed deliveries.
#[derive(Debug)]
pub struct DeliveryCache {
    seen: HashMap<DeliveryKey, Instant>,
    capacity: usize,
    ttl: Duration,
}

impl DeliveryCache {
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        Self {
            seen: HashMap::new(),
            capacity,
            ttl,
        }
    }

    /// Mark a delivery as processed. Returns `false` when the same key was
    /// already marked within the TTL (i.e. this is a repeat).
    pub fn mark(&mut self, key: DeliveryKey) -> bool {
        let now = Instant::now();

        if let Some(at) = self.seen.get(&key) {
            if now.duration_since(*at) < self.ttl {
                return false;
            }
        }

        // Cheap wholesale clear instead of eviction bookkeeping. Worst case
        // one redelivery slips through right after the clear.
        if self.seen.len() >= self.capacity {
            tracing::info!(capacity = self.capacity, "delivery cache full; clearing");
            self.seen.clear();
        }

        self.seen.insert(key, now);
        true
    }

    /// Drop entries older than the TTL.
    pub fn sweep(&mut self) {
        let now = Instant::now();
        let ttl = self.ttl;
        self.seen.retain(|_, at| now.duration_since(*at) < ttl);
    }

    pub fn len(&self) -> usize {
        self.seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }
}

impl Default for DeliveryCache {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY, DEFAULT_TTL)
    }
}
