use std::time::Duration;

use serde::Deserialize;

/// Default maximum concurrent listener invocations.
pub const DEFAULT_MAX_CONCURRENCY: usize = 1024;

/// Event bus settings.
///
/// Deserializable from any serde format; missing keys take their defaults:
///
/// ```yaml
/// buffer_capacity: 64
/// max_concurrency: 256
/// drain_timeout_ms: 5000
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct BusConfig {
    /// Queue size between publishers and the poller. `0` makes every
    /// publish wait until the poller has taken the event.
    pub buffer_capacity: usize,
    /// Ceiling on concurrently running listener invocations. `None` means
    /// unbounded; `Some(0)` is treated as `Some(1)`.
    pub max_concurrency: Option<usize>,
    /// Bound on how long `destruct` waits for in-flight deliveries.
    pub drain_timeout_ms: Option<u64>,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            buffer_capacity: 0,
            max_concurrency: Some(DEFAULT_MAX_CONCURRENCY),
            drain_timeout_ms: None,
        }
    }
}

impl BusConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_buffer_capacity(mut self, capacity: usize) -> Self {
        self.buffer_capacity = capacity;
        self
    }

    pub fn with_max_concurrency(mut self, max_concurrent: usize) -> Self {
        self.max_concurrency = Some(max_concurrent);
        self
    }

    /// Remove the concurrency ceiling.
    ///
    /// WARNING: without a ceiling, publishing faster than listeners complete
    /// grows the number of live tasks without bound.
    pub fn unbounded(mut self) -> Self {
        self.max_concurrency = None;
        self
    }

    pub fn with_drain_timeout(mut self, timeout: Duration) -> Self {
        self.drain_timeout_ms = Some(timeout.as_millis().try_into().unwrap_or(u64::MAX));
        self
    }

    pub fn drain_timeout(&self) -> Option<Duration> {
        self.drain_timeout_ms.map(Duration::from_millis)
    }

    pub(crate) fn effective_concurrency(&self) -> Option<usize> {
        self.max_concurrency.map(|n| n.max(1))
    }
}
