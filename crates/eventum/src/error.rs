//! Error types for the event bus.

use thiserror::Error;

/// Errors produced while subscribing, dispatching, or inside listeners.
#[derive(Debug, Error)]
pub enum EventError {
    /// A type-parameterized event type was used without a type parameter.
    ///
    /// Raised at subscribe time when registering a plain subscription for a
    /// type whose [`Event::requires_type_param`](crate::Event::requires_type_param)
    /// is true, and at dispatch time when such an instance reports no
    /// parameter.
    #[error("no type parameter available for event type {type_name}")]
    UnresolvableType {
        /// Fully-qualified name of the offending event type.
        type_name: &'static str,
    },

    /// A listener returned an error during dispatch.
    ///
    /// Listeners produce this variant themselves to signal failure; the
    /// dispatch loop records it and keeps going.
    #[error("listener execution error: {0}")]
    ListenerExecution(String),

    /// An event could not be projected to the view a listener registered for.
    ///
    /// Indicates a mis-declared ancestry: a projection in the chain between
    /// the concrete event type and the registered ancestor did not apply.
    #[error("event view did not match expected type {expected}")]
    ProjectionFailed {
        /// Name of the type the listener registered for.
        expected: &'static str,
    },

    /// Aggregate failure summary produced by
    /// [`DispatchOutcome::into_result`](crate::DispatchOutcome::into_result).
    #[error("{failed} listener(s) failed while dispatching {event} ({delivered} delivered)")]
    DispatchFailed {
        /// Name of the dispatched event type.
        event: &'static str,
        /// Number of listeners that ran to completion.
        delivered: usize,
        /// Number of listeners that returned an error.
        failed: usize,
    },
}

impl EventError {
    /// Shorthand for a [`EventError::ListenerExecution`] failure.
    pub fn listener<M: Into<String>>(message: M) -> Self {
        EventError::ListenerExecution(message.into())
    }
}
