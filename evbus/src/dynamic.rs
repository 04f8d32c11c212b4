//! Listeners whose shape is only known at runtime.
//!
//! Typed [`Listener`](crate::Listener)s are checked by the compiler. A
//! [`DynListener`] instead carries a [`Signature`] describing its parameters
//! and results, as a scripting host or plugin loader would report them. The
//! bus validates that signature when the listener is subscribed and rejects
//! anything that is not a one-parameter procedure.

use std::any::Any;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use futures_util::future::{BoxFuture, FutureExt};

use crate::error::{BusError, ListenerError};
use crate::event::EventType;
use crate::listener::{ErasedListener, Invoke, ListenerId, ListenerOutcome};

/// Arguments passed to a [`DynListener`].
pub type DynArgs = Vec<Arc<dyn Any + Send + Sync>>;

type DynCall = Arc<dyn Fn(DynArgs) -> BoxFuture<'static, Result<(), ListenerError>> + Send + Sync>;

/// Parameter and result types of a runtime-shaped callable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Signature {
    params: Vec<EventType>,
    results: Vec<EventType>,
}

impl Signature {
    pub fn new(params: Vec<EventType>, results: Vec<EventType>) -> Self {
        Self { params, results }
    }

    /// A procedure taking one `E` and returning nothing.
    pub fn procedure<E: 'static>() -> Self {
        Self::new(vec![EventType::of::<E>()], Vec::new())
    }

    pub fn params(&self) -> &[EventType] {
        &self.params
    }

    pub fn results(&self) -> &[EventType] {
        &self.results
    }

    /// The accepted event type, if this signature is a unary procedure.
    pub fn event_type(&self) -> Result<EventType, BusError> {
        match (self.params.as_slice(), self.results.is_empty()) {
            ([event_type], true) => Ok(*event_type),
            _ => Err(BusError::InvalidListenerShape {
                params: self.params.len(),
                results: self.results.len(),
            }),
        }
    }
}

/// A listener described by a runtime [`Signature`].
#[derive(Clone)]
pub struct DynListener {
    signature: Signature,
    call: DynCall,
}

impl DynListener {
    /// Wrap `call`, which receives one argument per declared parameter.
    ///
    /// Construction never fails; the shape is checked by
    /// [`EventBus::subscribe_dyn`](crate::EventBus::subscribe_dyn).
    pub fn new<F, Fut>(signature: Signature, call: F) -> Self
    where
        F: Fn(DynArgs) -> Fut + Send + Sync + 'static,
        Fut: Future + Send + 'static,
        Fut::Output: ListenerOutcome,
    {
        Self {
            signature,
            call: Arc::new(move |args: DynArgs| {
                call(args).map(ListenerOutcome::into_result).boxed()
            }),
        }
    }

    pub fn id(&self) -> ListenerId {
        ListenerId::of(&self.call)
    }

    pub fn signature(&self) -> &Signature {
        &self.signature
    }

    pub fn event_type(&self) -> Result<EventType, BusError> {
        self.signature.event_type()
    }

    pub(crate) fn erase(&self) -> Result<ErasedListener, BusError> {
        let event_type = self.event_type()?;
        let call = self.call.clone();
        let invoke: Invoke = Arc::new(move |event: Arc<dyn Any + Send + Sync>| {
            if (*event).type_id() != event_type.id() {
                return futures_util::future::ready(Err(ListenerError::TypeMismatch {
                    expected: event_type.name(),
                }))
                .boxed();
            }
            call(vec![event])
        });
        Ok(ErasedListener::new(self.id(), event_type, invoke))
    }
}

impl fmt::Debug for DynListener {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DynListener")
            .field("id", &self.id())
            .field("signature", &self.signature)
            .finish()
    }
}
