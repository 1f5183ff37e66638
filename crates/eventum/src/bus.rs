//! # Bus Facade
//!
//! [`EventBus`] ties the type key registry, the subscription table, and the
//! dispatcher together behind the public API: typed subscribe variants,
//! unsubscription by id / predicate / owner, synchronous dispatch, and the
//! [`ListenerGroup`] lifecycle for installing a whole set of listeners
//! under one owner.
//!
//! ## Quick Start
//!
//! ```rust
//! use eventum::{impl_event, EventBus, EventError};
//!
//! #[derive(Debug)]
//! struct PlayerJoined {
//!     name: String,
//! }
//! impl_event!(PlayerJoined);
//!
//! let bus = EventBus::new();
//! bus.subscribe(|event: &PlayerJoined| {
//!     println!("welcome, {}", event.name);
//!     Ok(())
//! })?;
//!
//! let outcome = bus.dispatch(&PlayerJoined { name: "alice".into() });
//! assert!(outcome.any_delivered());
//! # Ok::<(), EventError>(())
//! ```

use crate::config::EventBusConfig;
use crate::dispatch::{DispatchOutcome, Dispatcher, ErrorSink, TracingErrorSink};
use crate::error::EventError;
use crate::event::{short_name, Event, EventType};
use crate::registry::TypeKeyRegistry;
use crate::stats::{EventBusStats, EventBusStatsSnapshot};
use crate::subscription::{
    ErasedFilter, ErasedHandler, OwnerId, Priority, Subscription, SubscriptionId,
    SubscriptionInfo, SubscriptionTable,
};
use std::any::{Any, TypeId};
use std::fmt::{self, Debug};
use std::sync::Arc;
use tracing::debug;

/// Per-subscription options beyond the handler itself.
#[derive(Debug, Clone, Copy)]
pub struct SubscribeOptions {
    /// Invocation priority. Defaults to [`Priority::NORMAL`].
    pub priority: Priority,
    /// Whether the listener still runs while the event is cancelled.
    /// Defaults to `true`, matching listeners that want the final say.
    pub receive_cancelled: bool,
    /// Owner group tag. Defaults to `None`; [`EventBus::install`] fills it.
    pub owner: Option<OwnerId>,
}

impl Default for SubscribeOptions {
    fn default() -> Self {
        Self {
            priority: Priority::NORMAL,
            receive_cancelled: true,
            owner: None,
        }
    }
}

impl SubscribeOptions {
    /// Options with everything default except the priority.
    pub fn at(priority: Priority) -> Self {
        Self {
            priority,
            ..Self::default()
        }
    }
}

/// A named set of listeners installed and removed as a unit: the shape a
/// plugin's handlers take.
pub trait ListenerGroup: Send + Sync {
    /// Group name, for diagnostics.
    fn name(&self) -> &str;

    /// Registers the group's listeners. A returned error aborts the
    /// install and rolls back everything registered so far.
    fn attach(&self, registrar: &mut GroupRegistrar<'_>) -> Result<(), EventError>;
}

/// Registration handle passed to [`ListenerGroup::attach`]; every
/// subscription made through it is tagged with the group's owner.
pub struct GroupRegistrar<'bus> {
    bus: &'bus EventBus,
    owner: OwnerId,
}

impl GroupRegistrar<'_> {
    /// The owner token the installed subscriptions are tagged with.
    pub fn owner(&self) -> OwnerId {
        self.owner
    }

    /// Group-tagged [`EventBus::subscribe`].
    pub fn subscribe<E, F>(&mut self, handler: F) -> Result<SubscriptionId, EventError>
    where
        E: Event,
        F: Fn(&E) -> Result<(), EventError> + Send + Sync + 'static,
    {
        self.subscribe_with_opts(SubscribeOptions::default(), handler)
    }

    /// Group-tagged [`EventBus::subscribe_with`].
    pub fn subscribe_with<E, F>(
        &mut self,
        priority: Priority,
        handler: F,
    ) -> Result<SubscriptionId, EventError>
    where
        E: Event,
        F: Fn(&E) -> Result<(), EventError> + Send + Sync + 'static,
    {
        self.subscribe_with_opts(SubscribeOptions::at(priority), handler)
    }

    /// Group-tagged [`EventBus::subscribe_with_opts`].
    pub fn subscribe_with_opts<E, F>(
        &mut self,
        opts: SubscribeOptions,
        handler: F,
    ) -> Result<SubscriptionId, EventError>
    where
        E: Event,
        F: Fn(&E) -> Result<(), EventError> + Send + Sync + 'static,
    {
        let opts = SubscribeOptions {
            owner: Some(self.owner),
            ..opts
        };
        self.bus
            .subscribe_entry::<E>(opts, None, None, erase_handler(handler))
    }

    /// Group-tagged [`EventBus::subscribe_filtered`].
    pub fn subscribe_filtered<E, P, F>(
        &mut self,
        priority: Priority,
        predicate: P,
        handler: F,
    ) -> Result<SubscriptionId, EventError>
    where
        E: Event,
        P: Fn(&E) -> bool + Send + Sync + 'static,
        F: Fn(&E) -> Result<(), EventError> + Send + Sync + 'static,
    {
        let opts = SubscribeOptions {
            owner: Some(self.owner),
            ..SubscribeOptions::at(priority)
        };
        self.bus.subscribe_entry::<E>(
            opts,
            None,
            Some(erase_filter(predicate)),
            erase_handler(handler),
        )
    }

    /// Group-tagged [`EventBus::subscribe_parameterized`].
    pub fn subscribe_parameterized<E, T, F>(
        &mut self,
        priority: Priority,
        handler: F,
    ) -> Result<SubscriptionId, EventError>
    where
        E: Event,
        T: Any,
        F: Fn(&E) -> Result<(), EventError> + Send + Sync + 'static,
    {
        let opts = SubscribeOptions {
            owner: Some(self.owner),
            ..SubscribeOptions::at(priority)
        };
        self.bus.subscribe_entry::<E>(
            opts,
            Some(TypeId::of::<T>()),
            None,
            erase_handler(handler),
        )
    }
}

/// Synchronous, thread-safe, typed in-process event bus.
///
/// All operations take `&self`; the bus is safe to share across threads
/// (wrap it in an `Arc`) and safe to re-enter from inside listeners.
pub struct EventBus {
    registry: TypeKeyRegistry,
    table: SubscriptionTable,
    dispatcher: Dispatcher,
    stats: EventBusStats,
    config: EventBusConfig,
}

impl EventBus {
    /// A bus with default configuration and the tracing error sink.
    pub fn new() -> Self {
        Self::with_config(EventBusConfig::default())
    }

    /// A bus with custom configuration and the tracing error sink.
    pub fn with_config(config: EventBusConfig) -> Self {
        Self::with_error_sink(config, Arc::new(TracingErrorSink))
    }

    /// A bus with custom configuration and error sink.
    pub fn with_error_sink(config: EventBusConfig, sink: Arc<dyn ErrorSink>) -> Self {
        Self {
            registry: TypeKeyRegistry::new(),
            table: SubscriptionTable::with_capacity(config.initial_type_capacity),
            dispatcher: Dispatcher::new(sink),
            stats: EventBusStats::default(),
            config,
        }
    }

    /// Registers a listener for `E` at [`Priority::NORMAL`].
    ///
    /// The listener also runs for events that declare `E` as an ancestor;
    /// it always receives the `E` view it registered for.
    ///
    /// Fails with [`EventError::UnresolvableType`] when `E` requires a
    /// type parameter; use [`subscribe_parameterized`](Self::subscribe_parameterized)
    /// for those.
    pub fn subscribe<E, F>(&self, handler: F) -> Result<SubscriptionId, EventError>
    where
        E: Event,
        F: Fn(&E) -> Result<(), EventError> + Send + Sync + 'static,
    {
        self.subscribe_with_opts(SubscribeOptions::default(), handler)
    }

    /// Registers a listener for `E` at an explicit priority.
    pub fn subscribe_with<E, F>(
        &self,
        priority: Priority,
        handler: F,
    ) -> Result<SubscriptionId, EventError>
    where
        E: Event,
        F: Fn(&E) -> Result<(), EventError> + Send + Sync + 'static,
    {
        self.subscribe_with_opts(SubscribeOptions::at(priority), handler)
    }

    /// Registers a listener with full per-subscription options.
    pub fn subscribe_with_opts<E, F>(
        &self,
        opts: SubscribeOptions,
        handler: F,
    ) -> Result<SubscriptionId, EventError>
    where
        E: Event,
        F: Fn(&E) -> Result<(), EventError> + Send + Sync + 'static,
    {
        self.subscribe_entry::<E>(opts, None, None, erase_handler(handler))
    }

    /// Registers a listener gated by a filter predicate: the listener only
    /// runs for instances the predicate accepts; rejected instances count
    /// as skipped, not failed.
    pub fn subscribe_filtered<E, P, F>(
        &self,
        priority: Priority,
        predicate: P,
        handler: F,
    ) -> Result<SubscriptionId, EventError>
    where
        E: Event,
        P: Fn(&E) -> bool + Send + Sync + 'static,
        F: Fn(&E) -> Result<(), EventError> + Send + Sync + 'static,
    {
        self.subscribe_entry::<E>(
            SubscribeOptions::at(priority),
            None,
            Some(erase_filter(predicate)),
            erase_handler(handler),
        )
    }

    /// Registers a listener for the parameterized family `E` carrying type
    /// parameter `T`: it only runs for instances whose
    /// [`type_param`](Event::type_param) is `T`.
    pub fn subscribe_parameterized<E, T, F>(
        &self,
        priority: Priority,
        handler: F,
    ) -> Result<SubscriptionId, EventError>
    where
        E: Event,
        T: Any,
        F: Fn(&E) -> Result<(), EventError> + Send + Sync + 'static,
    {
        self.subscribe_entry::<E>(
            SubscribeOptions::at(priority),
            Some(TypeId::of::<T>()),
            None,
            erase_handler(handler),
        )
    }

    fn subscribe_entry<E: Event>(
        &self,
        opts: SubscribeOptions,
        param: Option<TypeId>,
        filter: Option<ErasedFilter>,
        handler: ErasedHandler,
    ) -> Result<SubscriptionId, EventError> {
        if E::requires_type_param() && param.is_none() {
            return Err(EventError::UnresolvableType {
                type_name: std::any::type_name::<E>(),
            });
        }
        let id = self.table.next_id();
        let event_type = EventType::of::<E>().keyed(param);
        let label = format!("{}#{}", short_name(event_type.name()), id.value());
        self.table.insert(Subscription::new(
            id,
            event_type,
            opts.priority,
            opts.owner,
            label,
            opts.receive_cancelled,
            param,
            filter,
            handler,
        ));
        Ok(id)
    }

    /// Removes one subscription. Returns whether it existed. If a dispatch
    /// is in flight and has not reached the listener yet, the listener
    /// will not run in it.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.table.remove(id)
    }

    /// Removes every subscription whose metadata matches the predicate.
    /// Returns how many were removed.
    pub fn unsubscribe_matching<P>(&self, predicate: P) -> usize
    where
        P: Fn(&SubscriptionInfo) -> bool,
    {
        self.table.remove_matching(predicate)
    }

    /// Removes every subscription belonging to an owner group.
    pub fn unsubscribe_all(&self, owner: OwnerId) -> usize {
        self.table.remove_owned(owner)
    }

    /// Removes every subscription on the bus.
    pub fn clear(&self) -> usize {
        self.table.clear()
    }

    /// Dispatches an event synchronously on the calling thread, invoking
    /// every applicable listener exactly once in priority order. Listener
    /// failures are isolated and collected in the returned outcome.
    pub fn dispatch<E: Event>(&self, event: &E) -> DispatchOutcome {
        self.dispatcher
            .dispatch(&self.registry, &self.table, &self.stats, &self.config, event)
    }

    /// Whether any current subscription would be considered for an event
    /// of type `E` (including subscriptions to `E`'s ancestors).
    pub fn has_subscribers<E: Event>(&self) -> bool {
        !self.table.snapshot_for::<E>(&self.registry).is_empty()
    }

    /// Number of live subscriptions.
    pub fn subscription_count(&self) -> usize {
        self.table.subscription_count()
    }

    /// Point-in-time activity counters.
    pub fn stats(&self) -> EventBusStatsSnapshot {
        self.stats
            .snapshot(self.table.subscription_count(), self.table.type_count())
    }

    /// Installs a listener group: allocates an owner token, runs the
    /// group's [`attach`](ListenerGroup::attach), and tags every
    /// subscription it makes. On error the partial install is rolled back
    /// and the error returned.
    pub fn install(&self, group: &dyn ListenerGroup) -> Result<OwnerId, EventError> {
        let owner = OwnerId::new();
        let mut registrar = GroupRegistrar { bus: self, owner };
        match group.attach(&mut registrar) {
            Ok(()) => {
                debug!(group = group.name(), %owner, "listener group installed");
                Ok(owner)
            }
            Err(error) => {
                let rolled_back = self.table.remove_owned(owner);
                debug!(
                    group = group.name(),
                    rolled_back, "listener group install failed, rolled back"
                );
                Err(error)
            }
        }
    }

    /// Removes everything a group install registered. Returns how many
    /// subscriptions were removed.
    pub fn uninstall(&self, owner: OwnerId) -> usize {
        let removed = self.table.remove_owned(owner);
        debug!(%owner, removed, "listener group uninstalled");
        removed
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBus")
            .field("table", &self.table)
            .field("registry", &self.registry)
            .field("config", &self.config)
            .finish()
    }
}

fn erase_handler<E, F>(handler: F) -> ErasedHandler
where
    E: Event,
    F: Fn(&E) -> Result<(), EventError> + Send + Sync + 'static,
{
    Box::new(move |view: &dyn Any| match view.downcast_ref::<E>() {
        Some(event) => handler(event),
        None => Err(EventError::ProjectionFailed {
            expected: std::any::type_name::<E>(),
        }),
    })
}

fn erase_filter<E, P>(predicate: P) -> ErasedFilter
where
    E: Event,
    P: Fn(&E) -> bool + Send + Sync + 'static,
{
    Box::new(move |view: &dyn Any| {
        view.downcast_ref::<E>()
            .map(&predicate)
            .unwrap_or(false)
    })
}
