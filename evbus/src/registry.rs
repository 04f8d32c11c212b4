use dashmap::DashMap;

use crate::event::EventType;
use crate::listener::{ErasedListener, ListenerId};

/// The listeners subscribed to one event type.
///
/// Adding the same handle twice keeps two entries, and each entry is invoked
/// once per event. [`remove`](Self::remove) drops the first matching entry.
#[derive(Clone, Debug, Default)]
pub struct ListenerSet {
    listeners: Vec<ErasedListener>,
}

impl ListenerSet {
    pub(crate) fn add(&mut self, listener: ErasedListener) -> &mut Self {
        self.listeners.push(listener);
        self
    }

    /// Remove one entry with the given id. Returns `false` if there was none.
    pub(crate) fn remove(&mut self, id: ListenerId) -> bool {
        match self.listeners.iter().position(|l| l.id() == id) {
            Some(index) => {
                self.listeners.remove(index);
                true
            }
            None => false,
        }
    }

    pub fn values(&self) -> &[ErasedListener] {
        &self.listeners
    }

    pub fn is_empty(&self) -> bool {
        self.listeners.is_empty()
    }

    pub fn len(&self) -> usize {
        self.listeners.len()
    }
}

/// Subscriptions keyed by event type.
///
/// Safe to mutate from any thread while the pipeline reads it. Sets are
/// created on first subscribe and are kept, possibly empty, after their last
/// listener is removed.
#[derive(Debug, Default)]
pub(crate) struct ListenerRegistry {
    sets: DashMap<EventType, ListenerSet>,
}

impl ListenerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, listener: ErasedListener) {
        let event_type = listener.event_type();
        self.sets.entry(event_type).or_default().add(listener);
        tracing::debug!(event = %event_type, "Listener subscribed");
    }

    /// Remove one registration of `id` for `event_type`.
    ///
    /// Unknown types and unknown handles are ignored.
    pub fn remove(&self, event_type: EventType, id: ListenerId) -> bool {
        let removed = self
            .sets
            .get_mut(&event_type)
            .map(|mut set| set.remove(id))
            .unwrap_or(false);
        if !removed {
            tracing::debug!(
                event = %event_type,
                listener = %id,
                "Listener not subscribed, nothing to remove"
            );
        }
        removed
    }

    /// Snapshot of the listeners for `event_type`.
    ///
    /// `None` means nothing was ever subscribed to that exact type.
    pub fn get(&self, event_type: EventType) -> Option<ListenerSet> {
        self.sets.get(&event_type).map(|set| set.value().clone())
    }

    pub fn listener_count(&self, event_type: EventType) -> Option<usize> {
        self.sets.get(&event_type).map(|set| set.len())
    }

    pub fn clear(&self) {
        self.sets.clear();
    }
}
