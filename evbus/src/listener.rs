use std::any::{type_name, Any};
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use futures_util::future::{ready, BoxFuture, FutureExt};

use crate::error::ListenerError;
use crate::event::EventType;

/// Type-erased invocation stored in the registry.
pub(crate) type Invoke = Arc<
    dyn Fn(Arc<dyn Any + Send + Sync>) -> BoxFuture<'static, Result<(), ListenerError>>
        + Send
        + Sync,
>;

type TypedInvoke<E> =
    Arc<dyn Fn(Arc<E>) -> BoxFuture<'static, Result<(), ListenerError>> + Send + Sync>;

/// Identity of a listener handle.
///
/// Two handles have the same id only if one was cloned from the other.
/// Closures with identical code and captures still get distinct ids.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(usize);

impl ListenerId {
    pub(crate) fn of<T: ?Sized>(inner: &Arc<T>) -> Self {
        ListenerId(Arc::as_ptr(inner) as *const () as usize)
    }
}

impl fmt::Display for ListenerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "listener#{:x}", self.0)
    }
}

/// Return values a listener may produce.
///
/// `()` always succeeds. `Result<(), E>` reports `Err` as a
/// [`ListenerError::Failed`], which the pipeline logs.
pub trait ListenerOutcome: Send + 'static {
    fn into_result(self) -> Result<(), ListenerError>;
}

impl ListenerOutcome for () {
    fn into_result(self) -> Result<(), ListenerError> {
        Ok(())
    }
}

impl<D: fmt::Display + Send + 'static> ListenerOutcome for Result<(), D> {
    fn into_result(self) -> Result<(), ListenerError> {
        self.map_err(|e| ListenerError::Failed(e.to_string()))
    }
}

/// Handle to a listener for events of type `E`.
///
/// The handle is what gets subscribed and unsubscribed. Clones share the same
/// [`ListenerId`], so keep a clone around to unsubscribe later.
///
/// ```ignore
/// let on_signup = Listener::new(|event: Arc<UserCreated>| async move {
///     tracing::info!(user = %event.name, "welcome");
/// });
/// bus.subscribe(&on_signup)?;
/// // ...
/// bus.unsubscribe(&on_signup);
/// ```
pub struct Listener<E> {
    inner: TypedInvoke<E>,
}

impl<E: Send + Sync + 'static> Listener<E> {
    /// Wrap an async function taking `Arc<E>`.
    pub fn new<F, Fut>(listener: F) -> Self
    where
        F: Fn(Arc<E>) -> Fut + Send + Sync + 'static,
        Fut: Future + Send + 'static,
        Fut::Output: ListenerOutcome,
    {
        Self {
            inner: Arc::new(move |event: Arc<E>| {
                listener(event).map(ListenerOutcome::into_result).boxed()
            }),
        }
    }

    /// Wrap a synchronous function taking `&E`.
    pub fn from_fn<F, R>(listener: F) -> Self
    where
        F: Fn(&E) -> R + Send + Sync + 'static,
        R: ListenerOutcome,
    {
        Self::new(move |event: Arc<E>| ready(listener(&*event)))
    }

    pub fn id(&self) -> ListenerId {
        ListenerId::of(&self.inner)
    }

    pub fn event_type(&self) -> EventType {
        EventType::of::<E>()
    }

    pub(crate) fn erase(&self) -> ErasedListener {
        let typed = self.inner.clone();
        let invoke: Invoke = Arc::new(move |event: Arc<dyn Any + Send + Sync>| {
            match event.downcast::<E>() {
                Ok(event) => typed(event),
                Err(_) => ready(Err(ListenerError::TypeMismatch {
                    expected: type_name::<E>(),
                }))
                .boxed(),
            }
        });
        ErasedListener::new(self.id(), self.event_type(), invoke)
    }
}

impl<E> Clone for Listener<E> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<E> fmt::Debug for Listener<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Listener")
            .field("id", &ListenerId::of(&self.inner))
            .field("event_type", &type_name::<E>())
            .finish()
    }
}

/// A registry entry: a listener with its event type erased.
#[derive(Clone)]
pub struct ErasedListener {
    id: ListenerId,
    event_type: EventType,
    invoke: Invoke,
}

impl ErasedListener {
    pub(crate) fn new(id: ListenerId, event_type: EventType, invoke: Invoke) -> Self {
        Self {
            id,
            event_type,
            invoke,
        }
    }

    pub fn id(&self) -> ListenerId {
        self.id
    }

    pub fn event_type(&self) -> EventType {
        self.event_type
    }

    /// Call the listener with `event`.
    ///
    /// An event of the wrong type resolves to [`ListenerError::TypeMismatch`].
    pub fn invoke(
        &self,
        event: Arc<dyn Any + Send + Sync>,
    ) -> BoxFuture<'static, Result<(), ListenerError>> {
        (self.invoke)(event)
    }
}

impl fmt::Debug for ErasedListener {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ErasedListener")
            .field("id", &self.id)
            .field("event_type", &self.event_type)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Ping(usize);

    #[test]
    fn test_clone_keeps_identity() {
        let a = Listener::from_fn(|_: &Ping| {});
        let b = a.clone();
        let c = Listener::from_fn(|_: &Ping| {});
        assert_eq!(a.id(), b.id());
        assert_ne!(a.id(), c.id());
        assert_eq!(a.erase().id(), a.id());
    }

    #[tokio::test]
    async fn test_erased_invoke() {
        let seen = Arc::new(AtomicUsize::new(0));
        let s = seen.clone();
        let listener = Listener::new(move |event: Arc<Ping>| {
            let s = s.clone();
            async move {
                s.fetch_add(event.0, Ordering::SeqCst);
            }
        });

        let erased = listener.erase();
        assert_eq!(erased.event_type(), EventType::of::<Ping>());
        assert_eq!(erased.invoke(Arc::new(Ping(7))).await, Ok(()));
        assert_eq!(seen.load(Ordering::SeqCst), 7);
    }

    #[tokio::test]
    async fn test_erased_invoke_wrong_type() {
        let erased = Listener::from_fn(|_: &Ping| {}).erase();
        let result = erased.invoke(Arc::new("not a ping")).await;
        assert!(matches!(result, Err(ListenerError::TypeMismatch { .. })));
    }

    #[tokio::test]
    async fn test_result_outcome() {
        let erased = Listener::from_fn(|_: &Ping| Err::<(), _>("disk full")).erase();
        let result = erased.invoke(Arc::new(Ping(1))).await;
        assert_eq!(result, Err(ListenerError::Failed("disk full".into())));
    }
}
