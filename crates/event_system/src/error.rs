//! Error types for event and hook dispatch.

use crate::events::EventName;

/// Errors that can occur while dispatching an event to a handler.
///
/// None of these ever reach the caller of [`EventBus::emit`](crate::EventBus::emit);
/// they are routed to the bus fault channel instead.
#[derive(Debug, thiserror::Error)]
pub enum EventError {
    /// The handler was invoked with a payload of another event
    #[error("Payload mismatch: handler expects {expected}, received {received}")]
    PayloadMismatch {
        expected: EventName,
        received: EventName,
    },
    /// Handler execution failed with a plain message
    #[error("Handler execution error: {0}")]
    HandlerExecution(String),
    /// Handler execution failed with an underlying error
    #[error("Handler failed: {0}")]
    Handler(#[source] Box<dyn std::error::Error + Send + Sync>),
    /// Handler panicked, either in its synchronous part or while being polled
    #[error("Handler panicked: {0}")]
    HandlerPanicked(String),
    /// `emit` was called outside of a tokio runtime
    #[error("No tokio runtime available to run the handler")]
    NoRuntime,
}

impl EventError {
    /// Wraps any error raised inside a handler.
    pub fn handler<E>(error: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        EventError::Handler(Box::new(error))
    }
}

/// Errors raised by the hook bus.
#[derive(Debug, thiserror::Error)]
pub enum HookError {
    /// Registering one more handler would exceed the chain bound
    #[error("Hook chain '{hook}' is full ({limit} handlers)")]
    ChainFull { hook: &'static str, limit: usize },
    /// A handler in the chain failed
    #[error("Hook '{hook}' handler '{handler}' failed: {source}")]
    Handler {
        hook: &'static str,
        handler: String,
        #[source]
        source: EventError,
    },
    /// Two hook types share a name but not an input type
    #[error("Hook '{hook}' was registered with a different input type")]
    InputMismatch { hook: &'static str },
}

/// Extracts a readable message from a panic payload.
pub(crate) fn panic_message(panic: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
