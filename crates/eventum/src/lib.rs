//! # Eventum
//!
//! A synchronous, thread-safe, typed in-process event bus: publishers
//! dispatch strongly-typed event values, listeners subscribe to event
//! types with a priority, an optional filter, and an optional owning
//! group, and every dispatch invokes the applicable listeners exactly
//! once, in deterministic order, on the calling thread.
//!
//! ## Core Features
//!
//! - **Typed dispatch**: listeners receive `&E` for the event type they
//!   registered for; no string keys and no downcasting in user code
//! - **Ancestor dispatch**: events declare ancestor types; listeners of an
//!   ancestor see every descendant event through its declared projection
//! - **Deterministic ordering**: priority (highest first), then
//!   registration order
//! - **Failure isolation**: a failing listener never stops the dispatch
//!   loop; failures are reported to a pluggable error sink and collected
//!   in the returned [`DispatchOutcome`]
//! - **Consume semantics**: cancellable events skip listeners that opted
//!   out of cancelled events
//! - **Listener groups**: install a whole set of listeners under one
//!   [`OwnerId`] and remove them as a unit, plugin-style
//! - **Concurrency**: lock-free snapshot reads; subscribe, unsubscribe and
//!   dispatch freely from multiple threads or from inside listeners
//!
//! ## Quick Start
//!
//! ```rust
//! use eventum::{impl_event, EventBus, EventError, Priority};
//!
//! #[derive(Debug)]
//! struct EntityEvent {
//!     entity: u64,
//! }
//! impl_event!(EntityEvent);
//!
//! #[derive(Debug)]
//! struct EntitySpawned {
//!     base: EntityEvent,
//!     archetype: String,
//! }
//! impl_event!(EntitySpawned => EntityEvent { |e| &e.base });
//!
//! let bus = EventBus::new();
//!
//! // Sees every EntityEvent descendant, through its EntityEvent view.
//! bus.subscribe(|event: &EntityEvent| {
//!     println!("entity {} did something", event.entity);
//!     Ok(())
//! })?;
//!
//! // Runs first, and only for spawns.
//! bus.subscribe_with(Priority::EARLY, |event: &EntitySpawned| {
//!     println!("spawned a {}", event.archetype);
//!     Ok(())
//! })?;
//!
//! let outcome = bus.dispatch(&EntitySpawned {
//!     base: EntityEvent { entity: 42 },
//!     archetype: "asteroid".into(),
//! });
//! assert_eq!(outcome.delivered(), 2);
//! # Ok::<(), EventError>(())
//! ```
//!
//! ## Architecture
//!
//! - [`event`]: the [`Event`] trait, [`EventType`] routing keys, ancestry
//!   declarations, and [`CancelState`]
//! - [`subscription`]: priorities, subscription identities, owner groups,
//!   and the generation-stamped snapshot table
//! - [`dispatch`]: the synchronous dispatch loop, [`ErrorSink`], and
//!   [`DispatchOutcome`]
//! - [`bus`]: the [`EventBus`] facade and [`ListenerGroup`] lifecycle
//! - [`config`] / [`stats`]: tunables and activity counters

pub mod bus;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod event;
pub mod macros;
pub mod stats;
pub mod subscription;

mod registry;

#[cfg(test)]
mod tests;

pub use bus::{EventBus, GroupRegistrar, ListenerGroup, SubscribeOptions};
pub use config::EventBusConfig;
pub use dispatch::{DispatchOutcome, ErrorSink, ListenerFailure, TracingErrorSink};
pub use error::EventError;
pub use event::{Ancestor, AncestorList, CancelState, Event, EventType, Projection};
pub use stats::EventBusStatsSnapshot;
pub use subscription::{OwnerId, Priority, SubscriptionId, SubscriptionInfo};

/// Crate version, for diagnostics.
pub const EVENTUM_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Creates a shared event bus with default configuration, ready to hand to
/// multiple subsystems.
pub fn create_event_bus() -> std::sync::Arc<EventBus> {
    std::sync::Arc::new(EventBus::new())
}
