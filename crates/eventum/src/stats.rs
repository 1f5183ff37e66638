//! Statistics tracking for the event bus.

use crate::dispatch::DispatchOutcome;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

/// Internal atomic counters, updated once per dispatch.
#[derive(Debug, Default)]
pub(crate) struct EventBusStats {
    events_dispatched: AtomicU64,
    listeners_invoked: AtomicU64,
    listener_failures: AtomicU64,
}

impl EventBusStats {
    pub fn record(&self, outcome: &DispatchOutcome) {
        self.events_dispatched.fetch_add(1, Ordering::Relaxed);
        self.listeners_invoked
            .fetch_add(outcome.delivered() as u64, Ordering::Relaxed);
        self.listener_failures
            .fetch_add(outcome.failures().len() as u64, Ordering::Relaxed);
    }

    pub fn snapshot(
        &self,
        total_subscriptions: usize,
        registered_types: usize,
    ) -> EventBusStatsSnapshot {
        EventBusStatsSnapshot {
            events_dispatched: self.events_dispatched.load(Ordering::Relaxed),
            listeners_invoked: self.listeners_invoked.load(Ordering::Relaxed),
            listener_failures: self.listener_failures.load(Ordering::Relaxed),
            total_subscriptions,
            registered_types,
        }
    }
}

/// Point-in-time view of bus activity, suitable for monitoring exports.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct EventBusStatsSnapshot {
    /// Total number of dispatches since the bus was created.
    pub events_dispatched: u64,
    /// Total number of successful listener invocations.
    pub listeners_invoked: u64,
    /// Total number of listener failures.
    pub listener_failures: u64,
    /// Currently registered subscriptions.
    pub total_subscriptions: usize,
    /// Distinct event types with at least one subscription.
    pub registered_types: usize,
}
