//! # Dispatcher
//!
//! Synchronous dispatch loop: takes the ordered snapshot for the event's
//! concrete type, applies per-subscription gates (liveness, cancellation
//! acceptance, type-parameter match, filter), projects the event into each
//! listener's registered view, and invokes the listener. Failures are
//! isolated per listener: they are recorded in the [`DispatchOutcome`] and
//! reported to the [`ErrorSink`], and never stop the loop.
//!
//! No table guard is held across a listener invocation, so listeners may
//! re-enter the bus freely (subscribe, unsubscribe, dispatch).

use crate::config::EventBusConfig;
use crate::error::EventError;
use crate::event::Event;
use crate::registry::TypeKeyRegistry;
use crate::stats::EventBusStats;
use crate::subscription::SubscriptionTable;
use std::any::Any;
use std::fmt::{self, Debug};
use std::sync::Arc;
use tracing::{debug, error, warn};

/// Pluggable receiver for dispatch-time failures.
///
/// The sink sees every failure as it happens, in dispatch order, before the
/// aggregate [`DispatchOutcome`] is returned to the caller.
pub trait ErrorSink: Send + Sync + Debug {
    /// A listener returned an error. The dispatch loop continues.
    fn listener_failed(&self, event: &'static str, listener: &str, error: &EventError);

    /// The dispatch itself failed before or around listener invocation
    /// (unresolvable type parameter, mis-declared ancestry).
    fn dispatch_failed(&self, event: &'static str, error: &EventError);
}

/// Default sink: structured `tracing` error records.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingErrorSink;

impl ErrorSink for TracingErrorSink {
    fn listener_failed(&self, event: &'static str, listener: &str, error: &EventError) {
        error!(event, listener, %error, "listener failed during dispatch");
    }

    fn dispatch_failed(&self, event: &'static str, error: &EventError) {
        error!(event, %error, "dispatch failed");
    }
}

/// One recorded listener failure.
#[derive(Debug)]
pub struct ListenerFailure {
    /// Label of the failing listener.
    pub listener: String,
    /// The error it returned.
    pub error: EventError,
}

/// What a dispatch actually did: how many listeners ran, how many were
/// skipped by a gate, and which ones failed.
#[derive(Debug)]
pub struct DispatchOutcome {
    event: &'static str,
    delivered: usize,
    skipped: usize,
    failures: Vec<ListenerFailure>,
    unresolved: Option<EventError>,
}

impl DispatchOutcome {
    pub(crate) fn new(event: &'static str) -> Self {
        Self {
            event,
            delivered: 0,
            skipped: 0,
            failures: Vec::new(),
            unresolved: None,
        }
    }

    /// Name of the dispatched event type.
    pub fn event(&self) -> &'static str {
        self.event
    }

    /// Number of listeners that ran to completion.
    pub fn delivered(&self) -> usize {
        self.delivered
    }

    /// Number of snapshot entries skipped by a gate (retired, cancelled
    /// opt-out, parameter mismatch, or filter rejection).
    pub fn skipped(&self) -> usize {
        self.skipped
    }

    /// Whether any listener ran.
    pub fn any_delivered(&self) -> bool {
        self.delivered > 0
    }

    /// Per-listener failures, in dispatch order.
    pub fn failures(&self) -> &[ListenerFailure] {
        &self.failures
    }

    /// The resolution error, if the event's type key could not be resolved
    /// (in which case no listener was invoked).
    pub fn unresolved(&self) -> Option<&EventError> {
        self.unresolved.as_ref()
    }

    /// Whether the dispatch completed without any failure.
    pub fn was_successful(&self) -> bool {
        self.failures.is_empty() && self.unresolved.is_none()
    }

    /// Collapses the outcome into a `Result`, keeping the delivered count.
    /// Individual failures are summarized as
    /// [`EventError::DispatchFailed`]; inspect [`failures`](Self::failures)
    /// first if the detail matters.
    pub fn into_result(self) -> Result<usize, EventError> {
        if let Some(error) = self.unresolved {
            return Err(error);
        }
        if self.failures.is_empty() {
            Ok(self.delivered)
        } else {
            Err(EventError::DispatchFailed {
                event: self.event,
                delivered: self.delivered,
                failed: self.failures.len(),
            })
        }
    }
}

/// Snapshot-driven synchronous dispatcher.
pub(crate) struct Dispatcher {
    sink: Arc<dyn ErrorSink>,
}

impl Dispatcher {
    pub fn new(sink: Arc<dyn ErrorSink>) -> Self {
        Self { sink }
    }

    pub fn dispatch<E: Event>(
        &self,
        registry: &TypeKeyRegistry,
        table: &SubscriptionTable,
        stats: &EventBusStats,
        config: &EventBusConfig,
        event: &E,
    ) -> DispatchOutcome {
        let event_name = std::any::type_name::<E>();
        let mut outcome = DispatchOutcome::new(event_name);

        let instance_param = match registry.instance_key(event) {
            Ok(key) => key.type_param(),
            Err(err) => {
                self.sink.dispatch_failed(event_name, &err);
                outcome.unresolved = Some(err);
                stats.record(&outcome);
                return outcome;
            }
        };

        let snapshot = table.snapshot_for::<E>(registry);
        if snapshot.is_empty() {
            if config.warn_on_unhandled {
                warn!(event = event_name, "dispatched event with no subscribers");
            }
            stats.record(&outcome);
            return outcome;
        }

        let cancel = event.cancel_state();
        for entry in snapshot.iter() {
            let sub = entry.sub.as_ref();
            if !sub.is_active() {
                outcome.skipped += 1;
                continue;
            }
            // Cancellation is re-checked per listener: an earlier listener
            // may have cancelled (or un-cancelled) the event mid-dispatch.
            if let Some(state) = cancel {
                if state.is_cancelled() && !sub.receive_cancelled {
                    outcome.skipped += 1;
                    continue;
                }
            }
            if let Some(required) = sub.param {
                if instance_param != Some(required) {
                    outcome.skipped += 1;
                    continue;
                }
            }

            let mut view: &dyn Any = event;
            let mut projected = true;
            for step in entry.path.iter() {
                match (step.as_ref())(view) {
                    Some(next) => view = next,
                    None => {
                        let err = EventError::ProjectionFailed {
                            expected: sub.event_type.name(),
                        };
                        self.sink.dispatch_failed(event_name, &err);
                        outcome.failures.push(ListenerFailure {
                            listener: sub.label.clone(),
                            error: err,
                        });
                        projected = false;
                        break;
                    }
                }
            }
            if !projected {
                continue;
            }

            if let Some(filter) = &sub.filter {
                if !filter(view) {
                    outcome.skipped += 1;
                    continue;
                }
            }

            match (sub.handler)(view) {
                Ok(()) => outcome.delivered += 1,
                Err(error) => {
                    self.sink.listener_failed(event_name, &sub.label, &error);
                    outcome.failures.push(ListenerFailure {
                        listener: sub.label.clone(),
                        error,
                    });
                }
            }
        }

        if config.log_dispatches {
            debug!(
                event = event_name,
                delivered = outcome.delivered,
                skipped = outcome.skipped,
                failed = outcome.failures.len(),
                "dispatch complete"
            );
        }
        stats.record(&outcome);
        outcome
    }
}

impl Debug for Dispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dispatcher").field("sink", &self.sink).finish()
    }
}
