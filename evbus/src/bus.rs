use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::task::TaskTracker;

use crate::config::BusConfig;
use crate::dynamic::DynListener;
use crate::error::BusError;
use crate::event::EventType;
use crate::listener::Listener;
use crate::pipeline::{self, Dispatcher, Envelope};
use crate::registry::{ListenerRegistry, ListenerSet};
use crate::stats::{BusStats, StatsCounters};

/// In-process event bus with typed pub/sub and drain-on-shutdown.
///
/// Events are dispatched by `TypeId`: listeners register for a concrete event
/// type and receive an `Arc<E>` when that type is published. Publishing
/// enqueues the event; a background poller hands each event to a fan-out task
/// that spawns one invocation per listener.
///
/// Every publish and every invocation holds a slot in a pending-operation
/// tracker. [`destruct`](Self::destruct) waits for that tracker to empty,
/// then closes the bus for good.
///
/// `EventBus` is `Clone` and can be shared across threads; clones refer to the
/// same bus. Must be created inside a tokio runtime.
///
/// ```ignore
/// let bus = EventBus::new();
/// bus.subscribe(&on_text)?.subscribe(&on_number)?;
/// bus.publish(String::from("hello")).await?.publish(42i32).await?;
/// bus.destruct().await?;
/// ```
#[derive(Clone)]
pub struct EventBus {
    inner: Arc<Inner>,
}

struct Inner {
    registry: Arc<ListenerRegistry>,
    sender: Mutex<Option<mpsc::Sender<Envelope>>>,
    poller: Mutex<Option<JoinHandle<()>>>,
    tracker: TaskTracker,
    stats: Arc<StatsCounters>,
    config: BusConfig,
    closed: AtomicBool,
}

impl EventBus {
    /// Create a bus with synchronous hand-off: `publish` returns once the
    /// poller has taken the event.
    pub fn new() -> Self {
        Self::with_config(BusConfig::default())
    }

    /// Create a bus whose queue holds up to `capacity` events.
    ///
    /// `publish` suspends while the queue is full. A capacity of `0` is the
    /// same as [`EventBus::new`].
    pub fn buffered(capacity: usize) -> Self {
        Self::with_config(BusConfig::default().with_buffer_capacity(capacity))
    }

    /// Create a bus from a full [`BusConfig`].
    pub fn with_config(config: BusConfig) -> Self {
        let (tx, rx) = mpsc::channel(config.buffer_capacity.max(1));
        let registry = Arc::new(ListenerRegistry::new());
        let tracker = TaskTracker::new();
        let stats = Arc::new(StatsCounters::default());

        let dispatcher = Dispatcher::new(
            registry.clone(),
            tracker.clone(),
            config.effective_concurrency(),
            stats.clone(),
        );
        let poller = tokio::spawn(dispatcher.run_poller(rx));

        Self {
            inner: Arc::new(Inner {
                registry,
                sender: Mutex::new(Some(tx)),
                poller: Mutex::new(Some(poller)),
                tracker,
                stats,
                config,
                closed: AtomicBool::new(false),
            }),
        }
    }

    /// Subscribe `listener` to events of type `E`.
    ///
    /// Subscribing the same handle twice registers it twice.
    pub fn subscribe<E: Send + Sync + 'static>(
        &self,
        listener: &Listener<E>,
    ) -> Result<&Self, BusError> {
        self.ensure_open()?;
        self.inner.registry.add(listener.erase());
        Ok(self)
    }

    /// Subscribe several listeners of the same type, in order.
    pub fn subscribe_all<'a, E, I>(&self, listeners: I) -> Result<&Self, BusError>
    where
        E: Send + Sync + 'static,
        I: IntoIterator<Item = &'a Listener<E>>,
    {
        for listener in listeners {
            self.subscribe(listener)?;
        }
        Ok(self)
    }

    /// Subscribe a runtime-shaped listener.
    ///
    /// Fails with [`BusError::InvalidListenerShape`] unless its signature is
    /// one parameter and no results; nothing is registered in that case.
    pub fn subscribe_dyn(&self, listener: &DynListener) -> Result<&Self, BusError> {
        self.ensure_open()?;
        let erased = listener.erase()?;
        self.inner.registry.add(erased);
        Ok(self)
    }

    /// Remove one registration of `listener`. Unknown handles are ignored.
    pub fn unsubscribe<E: Send + Sync + 'static>(&self, listener: &Listener<E>) -> &Self {
        self.inner
            .registry
            .remove(listener.event_type(), listener.id());
        self
    }

    pub fn unsubscribe_all<'a, E, I>(&self, listeners: I) -> &Self
    where
        E: Send + Sync + 'static,
        I: IntoIterator<Item = &'a Listener<E>>,
    {
        for listener in listeners {
            self.unsubscribe(listener);
        }
        self
    }

    pub fn unsubscribe_dyn(&self, listener: &DynListener) -> &Self {
        match listener.event_type() {
            Ok(event_type) => {
                self.inner.registry.remove(event_type, listener.id());
            }
            Err(error) => {
                tracing::debug!(
                    listener = %listener.id(),
                    error = %error,
                    "Ignoring unsubscribe of malformed listener"
                );
            }
        }
        self
    }

    /// Remove every subscription.
    pub fn clear(&self) -> &Self {
        self.inner.registry.clear();
        self
    }

    /// Number of listeners registered for `E`, or `None` if nothing was ever
    /// subscribed to that exact type.
    pub fn listener_count<E: 'static>(&self) -> Option<usize> {
        self.inner.registry.listener_count(EventType::of::<E>())
    }

    /// Snapshot of the listeners registered for `E`, in subscription order.
    ///
    /// `None` if nothing was ever subscribed to that exact type.
    pub fn listeners<E: 'static>(&self) -> Option<ListenerSet> {
        self.inner.registry.get(EventType::of::<E>())
    }

    /// Publish `event` to every listener of its type.
    ///
    /// Returns once the event is queued (or, with no buffer, once the poller
    /// has taken it). Delivery happens in the background; use
    /// [`destruct`](Self::destruct) or [`publish_and_wait`](Self::publish_and_wait)
    /// to wait for it.
    pub async fn publish<E: Send + Sync + 'static>(&self, event: E) -> Result<&Self, BusError> {
        let envelope = Envelope::new(event, self.inner.tracker.token());
        self.send(envelope).await?;
        Ok(self)
    }

    /// Publish `event` and wait until every listener it reached has finished.
    ///
    /// Called from a listener, the nested fan-out is not held back by
    /// `max_concurrency`. This covers code polled by the listener's own
    /// future, not tasks it spawns.
    pub async fn publish_and_wait<E: Send + Sync + 'static>(
        &self,
        event: E,
    ) -> Result<&Self, BusError> {
        let completion = TaskTracker::new();
        let mut envelope =
            Envelope::new(event, self.inner.tracker.token()).with_completion(completion.token());
        if pipeline::in_listener() {
            envelope = envelope.nested();
        }
        self.send(envelope).await?;
        completion.close();
        completion.wait().await;
        Ok(self)
    }

    async fn send(&self, envelope: Envelope) -> Result<(), BusError> {
        let sender = self.sender()?;
        let (envelope, received) = if self.inner.config.buffer_capacity == 0 {
            let (ack, received) = oneshot::channel();
            (envelope.with_handoff(ack), Some(received))
        } else {
            (envelope, None)
        };

        // A rejected envelope drops its token, releasing the pending slot.
        sender.send(envelope).await.map_err(|_| BusError::Closed)?;
        self.inner.stats.record_published();

        if let Some(received) = received {
            received.await.map_err(|_| BusError::Closed)?;
        }
        Ok(())
    }

    /// Wait for every in-flight delivery, then close the bus.
    ///
    /// Bounded by [`BusConfig::drain_timeout`] when set. After a successful
    /// call, `publish` and `subscribe` fail with [`BusError::Closed`] and so
    /// does a second `destruct`.
    pub async fn destruct(&self) -> Result<(), BusError> {
        match self.inner.config.drain_timeout() {
            Some(timeout) => self.destruct_timeout(timeout).await,
            None => {
                self.ensure_open()?;
                self.drain().await;
                self.close().await
            }
        }
    }

    /// Like [`destruct`](Self::destruct), giving up after `timeout`.
    ///
    /// On [`BusError::DrainTimeout`] the bus stays open and the call may be
    /// retried.
    pub async fn destruct_timeout(&self, timeout: Duration) -> Result<(), BusError> {
        self.ensure_open()?;
        if tokio::time::timeout(timeout, self.drain()).await.is_err() {
            self.inner.tracker.reopen();
            let pending = self.pending();
            tracing::warn!(pending, ?timeout, "Event bus drain timed out");
            return Err(BusError::DrainTimeout { pending });
        }
        self.close().await
    }

    async fn drain(&self) {
        tracing::info!(pending = self.pending(), "Draining event bus");
        self.inner.tracker.close();
        self.inner.tracker.wait().await;
    }

    async fn close(&self) -> Result<(), BusError> {
        if self.inner.closed.swap(true, Ordering::SeqCst) {
            return Err(BusError::Closed);
        }
        drop(lock(&self.inner.sender).take());

        let poller = lock(&self.inner.poller).take();
        if let Some(poller) = poller {
            if let Err(e) = poller.await {
                tracing::error!(error = %e, "Event bus poller terminated abnormally");
            }
        }
        // Publishes that raced the close are still delivered before returning.
        self.inner.tracker.wait().await;
        tracing::info!("Event bus closed");
        Ok(())
    }

    /// Current number of pending operations (queued events, running fan-outs
    /// and running listener invocations).
    pub fn pending(&self) -> usize {
        self.inner.tracker.len()
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    pub fn stats(&self) -> BusStats {
        self.inner.stats.snapshot()
    }

    pub fn config(&self) -> &BusConfig {
        &self.inner.config
    }

    fn ensure_open(&self) -> Result<(), BusError> {
        if self.is_closed() {
            return Err(BusError::Closed);
        }
        Ok(())
    }

    fn sender(&self) -> Result<mpsc::Sender<Envelope>, BusError> {
        lock(&self.inner.sender).clone().ok_or(BusError::Closed)
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
