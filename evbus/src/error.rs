use std::fmt;

/// Errors returned by [`EventBus`](crate::EventBus) operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BusError {
    /// A runtime-shaped listener is not a unary procedure.
    InvalidListenerShape { params: usize, results: usize },
    /// The bus has been destructed; it cannot be used again.
    Closed,
    /// Draining did not finish in time. The bus stays open.
    DrainTimeout { pending: usize },
}

impl fmt::Display for BusError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BusError::InvalidListenerShape { params, results } => write!(
                f,
                "Invalid listener shape: expected 1 parameter and no results, got {params} parameter(s) and {results} result(s)"
            ),
            BusError::Closed => write!(f, "Event bus is closed"),
            BusError::DrainTimeout { pending } => {
                write!(f, "Event bus drain timed out with {pending} pending operation(s)")
            }
        }
    }
}

impl std::error::Error for BusError {}

/// Failure of a single listener invocation.
///
/// These never escape the invocation task: the pipeline logs them and keeps
/// delivering to every other listener.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ListenerError {
    /// The listener returned an error.
    Failed(String),
    /// The listener panicked.
    Panicked(String),
    /// The event handed to the listener was not of the type it accepts.
    TypeMismatch { expected: &'static str },
}

impl ListenerError {
    pub(crate) fn from_panic(payload: Box<dyn std::any::Any + Send>) -> Self {
        let message = if let Some(s) = payload.downcast_ref::<&'static str>() {
            (*s).to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "non-string panic payload".to_string()
        };
        ListenerError::Panicked(message)
    }
}

impl fmt::Display for ListenerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ListenerError::Failed(msg) => write!(f, "Listener failed: {msg}"),
            ListenerError::Panicked(msg) => write!(f, "Listener panicked: {msg}"),
            ListenerError::TypeMismatch { expected } => {
                write!(f, "Listener expected an event of type {expected}")
            }
        }
    }
}

impl std::error::Error for ListenerError {}
