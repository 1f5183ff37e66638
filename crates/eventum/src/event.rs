//! # Event Model
//!
//! Defines what it means to be an event: the [`Event`] trait, the
//! [`EventType`] identity key used for routing, explicit ancestry
//! declarations for supertype-style dispatch, and the [`CancelState`]
//! consume flag for cancellable events.
//!
//! ## Ancestry
//!
//! Rust has no subtype relation between concrete types, so an event that
//! should also reach listeners of a broader type declares that relation
//! explicitly: each [`Ancestor`] pairs the ancestor's [`EventType`] with a
//! projection from the concrete event to the ancestor's view. Ancestries
//! compose: an ancestor's own ancestors are walked transitively when the
//! dispatch closure for a concrete type is built.
//!
//! ```rust
//! use eventum::impl_event;
//!
//! #[derive(Debug)]
//! struct EntityEvent { entity: u64 }
//! impl_event!(EntityEvent);
//!
//! #[derive(Debug)]
//! struct EntitySpawned { base: EntityEvent, archetype: String }
//! impl_event!(EntitySpawned => EntityEvent { |e| &e.base });
//! ```

use smallvec::SmallVec;
use std::any::{Any, TypeId};
use std::fmt::{self, Debug};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Direct-ancestor declarations for one event type.
pub type AncestorList = SmallVec<[Ancestor; 2]>;

/// Type-erased projection from a concrete event reference to the reference
/// of one of its declared ancestor types.
///
/// Returns `None` when the input is not the type the projection was built
/// for, which the dispatcher surfaces as a mis-declared ancestry.
pub type Projection = Arc<dyn for<'a> Fn(&'a dyn Any) -> Option<&'a dyn Any> + Send + Sync>;

/// Identity key for a dispatchable event type.
///
/// Derived from the event's `TypeId` plus an optional type-parameter id for
/// runtime-parameterized event families. Immutable and cheap to copy; used
/// as the routing key throughout the subscription table.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct EventType {
    id: TypeId,
    name: &'static str,
    param: Option<TypeId>,
}

impl EventType {
    /// The key for a plain (non-parameterized) event type.
    pub fn of<E: Event>() -> Self {
        Self {
            id: TypeId::of::<E>(),
            name: std::any::type_name::<E>(),
            param: None,
        }
    }

    /// The key for a parameterized event type, carrying `P` as its
    /// type parameter.
    pub fn parameterized<E: Event, P: Any>() -> Self {
        Self {
            id: TypeId::of::<E>(),
            name: std::any::type_name::<E>(),
            param: Some(TypeId::of::<P>()),
        }
    }

    pub(crate) fn keyed(self, param: Option<TypeId>) -> Self {
        Self { param, ..self }
    }

    /// The `TypeId` of the event type itself.
    pub fn id(&self) -> TypeId {
        self.id
    }

    /// Fully-qualified name of the event type.
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// The type parameter, if this key addresses a parameterized family.
    pub fn type_param(&self) -> Option<TypeId> {
        self.param
    }
}

impl Debug for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.param {
            Some(_) => write!(f, "EventType({}<param>)", self.name),
            None => write!(f, "EventType({})", self.name),
        }
    }
}

/// One declared ancestor of an event type: the ancestor's key, the
/// projection into its view, and a hook expanding the ancestor's own
/// ancestors for transitive closure walks.
pub struct Ancestor {
    pub(crate) key: EventType,
    pub(crate) project: Projection,
    pub(crate) expand: fn() -> AncestorList,
}

impl Ancestor {
    /// Declares `Sup` as a direct ancestor of `Sub`, reachable through
    /// `project` (typically a field borrow such as `|e| &e.base`).
    pub fn to<Sub, Sup>(project: fn(&Sub) -> &Sup) -> Self
    where
        Sub: Event,
        Sup: Event,
    {
        Self {
            key: EventType::of::<Sup>(),
            project: Arc::new(move |any: &dyn Any| {
                any.downcast_ref::<Sub>().map(|sub| project(sub) as &dyn Any)
            }),
            expand: Sup::ancestors,
        }
    }
}

impl Debug for Ancestor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Ancestor").field("key", &self.key).finish()
    }
}

/// Trait implemented by every dispatchable event.
///
/// Most implementations are generated by [`impl_event!`](crate::impl_event):
/// plain events override nothing, events with declared ancestors override
/// [`ancestors`](Event::ancestors), cancellable events override
/// [`cancel_state`](Event::cancel_state), and runtime-parameterized event
/// families override [`requires_type_param`](Event::requires_type_param) and
/// [`type_param`](Event::type_param).
pub trait Event: Send + Sync + Debug + 'static {
    /// Direct ancestors of this event type, in declaration order.
    fn ancestors() -> AncestorList
    where
        Self: Sized,
    {
        AncestorList::new()
    }

    /// Whether instances of this type must report a type parameter to be
    /// routable. Subscribing to such a type without naming a parameter
    /// fails fast with [`EventError::UnresolvableType`](crate::EventError::UnresolvableType).
    fn requires_type_param() -> bool
    where
        Self: Sized,
    {
        false
    }

    /// The type parameter carried by this instance, for parameterized
    /// event families (e.g. the concrete type inside an erased payload).
    fn type_param(&self) -> Option<TypeId> {
        None
    }

    /// The cancel state of this instance, if the event supports consume
    /// semantics.
    fn cancel_state(&self) -> Option<&CancelState> {
        None
    }
}

/// Atomic cancelled flag giving an event "consume" semantics.
///
/// A listener may cancel the event mid-dispatch; subscriptions registered
/// with `receive_cancelled = false` are then skipped while the flag is set.
/// The flag can also be cleared again, restoring delivery to everyone.
#[derive(Debug, Default)]
pub struct CancelState {
    cancelled: AtomicBool,
}

impl CancelState {
    /// A fresh, not-cancelled state.
    pub fn new() -> Self {
        Self::default()
    }

    /// Marks the event as cancelled.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    /// Sets or clears the cancelled flag.
    pub fn set_cancelled(&self, cancelled: bool) {
        self.cancelled.store(cancelled, Ordering::Release);
    }

    /// Whether the event is currently cancelled.
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }
}

/// Last path segment of a fully-qualified type name, for compact labels.
pub(crate) fn short_name(full: &'static str) -> &'static str {
    full.rsplit("::").next().unwrap_or(full)
}
