//! In-process typed event bus.
//!
//! Listeners subscribe to a concrete event type; publishing an event of that
//! type invokes every subscribed listener asynchronously, each in its own
//! task. A pending-operation tracker counts queued events and running
//! invocations so that [`EventBus::destruct`] can drain the bus before
//! closing it.
//!
//! ```ignore
//! use evbus::prelude::*;
//! use std::sync::Arc;
//!
//! let greet = Listener::from_fn(|name: &String| tracing::info!(%name, "hello"));
//! let count = Listener::new(|n: Arc<i32>| async move { tracing::info!(n = *n, "got") });
//!
//! let bus = EventBus::new();
//! bus.subscribe(&greet)?.subscribe(&count)?;
//! bus.publish(String::from("world")).await?.publish(42).await?;
//! bus.destruct().await?;
//! ```

mod bus;
mod config;
mod dynamic;
mod error;
mod event;
mod listener;
mod pipeline;
mod registry;
mod stats;

pub use bus::EventBus;
pub use config::{BusConfig, DEFAULT_MAX_CONCURRENCY};
pub use dynamic::{DynArgs, DynListener, Signature};
pub use error::{BusError, ListenerError};
pub use event::EventType;
pub use listener::{ErasedListener, Listener, ListenerId, ListenerOutcome};
pub use registry::ListenerSet;
pub use stats::BusStats;

pub mod prelude {
    //! Re-exports of the most commonly used event types.
    pub use crate::{BusConfig, BusError, EventBus, Listener};
}
