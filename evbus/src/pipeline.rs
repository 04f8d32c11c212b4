//! Delivery pipeline: poller, fan-out and listener invocation.
//!
//! ```text
//! publish ──► conduit ──► poller ──► alert_listeners ──► invoke (per listener)
//!   +1 token              (FIFO)      drops token: -1      tracked task: +1 / -1
//! ```
//!
//! The poller never waits for delivery: every received event gets its own
//! fan-out task, and every listener its own invocation task.
//!
//! Fan-out of an event published with `publish_and_wait` from inside a
//! running listener does not take a permit; the caller holds one while it
//! waits.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures_util::FutureExt;
use tokio::sync::{mpsc, oneshot, OwnedSemaphorePermit, Semaphore};
use tokio_util::task::task_tracker::TaskTrackerToken;
use tokio_util::task::TaskTracker;

use crate::error::ListenerError;
use crate::event::EventType;
use crate::listener::ErasedListener;
use crate::registry::ListenerRegistry;
use crate::stats::StatsCounters;

tokio::task_local! {
    static IN_LISTENER: ();
}

/// Whether the current task is polling a listener invocation.
pub(crate) fn in_listener() -> bool {
    IN_LISTENER.try_with(|_| ()).is_ok()
}

/// A published event on its way to the poller.
pub(crate) struct Envelope {
    event_type: EventType,
    event: Arc<dyn Any + Send + Sync>,
    /// Pending-operation slot taken at publish time.
    token: TaskTrackerToken,
    /// Signalled once the poller has received the event (synchronous hand-off).
    handoff: Option<oneshot::Sender<()>>,
    /// Slot in a per-publish tracker, for `publish_and_wait`.
    completion: Option<TaskTrackerToken>,
    /// Published and awaited by a running listener; skips the ceiling.
    nested: bool,
}

impl Envelope {
    pub(crate) fn new<E: Send + Sync + 'static>(event: E, token: TaskTrackerToken) -> Self {
        Self {
            event_type: EventType::of::<E>(),
            event: Arc::new(event),
            token,
            handoff: None,
            completion: None,
            nested: false,
        }
    }

    pub(crate) fn with_handoff(mut self, handoff: oneshot::Sender<()>) -> Self {
        self.handoff = Some(handoff);
        self
    }

    pub(crate) fn with_completion(mut self, completion: TaskTrackerToken) -> Self {
        self.completion = Some(completion);
        self
    }

    pub(crate) fn nested(mut self) -> Self {
        self.nested = true;
        self
    }
}

/// Everything fan-out needs, shared by the poller and every fan-out task.
#[derive(Clone)]
pub(crate) struct Dispatcher {
    registry: Arc<ListenerRegistry>,
    tracker: TaskTracker,
    semaphore: Option<Arc<Semaphore>>,
    stats: Arc<StatsCounters>,
}

impl Dispatcher {
    pub(crate) fn new(
        registry: Arc<ListenerRegistry>,
        tracker: TaskTracker,
        max_concurrency: Option<usize>,
        stats: Arc<StatsCounters>,
    ) -> Self {
        Self {
            registry,
            tracker,
            semaphore: max_concurrency.map(|n| Arc::new(Semaphore::new(n))),
            stats,
        }
    }

    /// Receive events until every sender is gone and the queue is empty.
    pub(crate) async fn run_poller(self, mut rx: mpsc::Receiver<Envelope>) {
        tracing::info!("Event bus poller started");
        while let Some(mut envelope) = rx.recv().await {
            if let Some(handoff) = envelope.handoff.take() {
                let _ = handoff.send(());
            }
            let dispatcher = self.clone();
            tokio::spawn(dispatcher.alert_listeners(envelope));
        }
        tracing::info!("Event bus poller stopped");
    }

    /// Spawn one invocation per listener subscribed to the event's type.
    async fn alert_listeners(self, envelope: Envelope) {
        let Envelope {
            event_type,
            event,
            token,
            completion,
            nested,
            ..
        } = envelope;

        match self.registry.get(event_type) {
            Some(set) => {
                for listener in set.values() {
                    let permit = match &self.semaphore {
                        // Fan-out waits here when the ceiling is reached; the
                        // poller keeps receiving.
                        Some(sem) if !nested => sem.clone().acquire_owned().await.ok(),
                        _ => None,
                    };
                    let done = completion.as_ref().map(|c| c.task_tracker().token());
                    self.tracker.spawn(invoke(
                        listener.clone(),
                        event.clone(),
                        self.stats.clone(),
                        permit,
                        done,
                    ));
                }
            }
            None => {
                tracing::debug!(event = %event_type, "No listeners for event type");
                self.stats.record_unrouted();
            }
        }

        drop(completion);
        drop(token);
    }
}

async fn invoke(
    listener: ErasedListener,
    event: Arc<dyn Any + Send + Sync>,
    stats: Arc<StatsCounters>,
    permit: Option<OwnedSemaphorePermit>,
    done: Option<TaskTrackerToken>,
) {
    let event_type = listener.event_type();
    let id = listener.id();

    let outcome = AssertUnwindSafe(IN_LISTENER.scope((), listener.invoke(event)))
        .catch_unwind()
        .await
        .unwrap_or_else(|payload| Err(ListenerError::from_panic(payload)));

    match outcome {
        Ok(()) => stats.record_delivered(),
        Err(error) => {
            tracing::error!(
                event = %event_type,
                listener = %id,
                error = %error,
                "Listener invocation failed"
            );
            stats.record_failed();
        }
    }

    drop(permit);
    drop(done);
}
