//! Event bus configuration.

/// Tunables for an [`EventBus`](crate::EventBus).
///
/// The defaults suit most uses; construct with struct-update syntax to
/// override individual fields:
///
/// ```rust
/// use eventum::{EventBus, EventBusConfig};
///
/// let bus = EventBus::with_config(EventBusConfig {
///     warn_on_unhandled: true,
///     ..EventBusConfig::default()
/// });
/// ```
#[derive(Debug, Clone)]
pub struct EventBusConfig {
    /// Pre-sized capacity of the subscription table, in distinct event
    /// types. Purely a reallocation hint.
    pub initial_type_capacity: usize,
    /// Emit a `tracing` warning when an event is dispatched and no
    /// subscriber matches it. Useful while wiring a system up.
    pub warn_on_unhandled: bool,
    /// Emit a debug-level record for every completed dispatch.
    pub log_dispatches: bool,
}

impl Default for EventBusConfig {
    fn default() -> Self {
        Self {
            initial_type_capacity: 64,
            warn_on_unhandled: false,
            log_dispatches: false,
        }
    }
}

impl EventBusConfig {
    /// The default configuration.
    pub fn new() -> Self {
        Self::default()
    }
}
