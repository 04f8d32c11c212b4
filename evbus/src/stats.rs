use std::sync::atomic::{AtomicU64, Ordering};

/// Delivery counters for one bus, as returned by
/// [`EventBus::stats`](crate::EventBus::stats).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BusStats {
    /// Events accepted by the conduit.
    pub published: u64,
    /// Events whose type had no subscription set.
    pub unrouted: u64,
    /// Listener invocations that completed successfully.
    pub delivered: u64,
    /// Listener invocations that returned an error or panicked.
    pub failed: u64,
}

#[derive(Debug, Default)]
pub(crate) struct StatsCounters {
    published: AtomicU64,
    unrouted: AtomicU64,
    delivered: AtomicU64,
    failed: AtomicU64,
}

impl StatsCounters {
    pub(crate) fn record_published(&self) {
        self.published.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_unrouted(&self) {
        self.unrouted.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_delivered(&self) {
        self.delivered.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_failed(&self) {
        self.failed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self) -> BusStats {
        BusStats {
            published: self.published.load(Ordering::Relaxed),
            unrouted: self.unrouted.load(Ordering::Relaxed),
            delivered: self.delivered.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
        }
    }
}
