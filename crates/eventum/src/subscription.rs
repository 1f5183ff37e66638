//! # Subscription Table
//!
//! Storage for listener registrations: priorities, identities, owner
//! groups, and the lock-free snapshot machinery the dispatcher reads from.
//!
//! Registrations live in per-type lanes inside a [`DashMap`]; every
//! mutation bumps a global generation counter, invalidating the cached
//! per-concrete-type dispatch snapshots. Readers never block on writers:
//! a snapshot is an immutable `Arc<[..]>` slice, rebuilt lazily when its
//! generation stamp is stale.

use crate::error::EventError;
use crate::event::{Event, EventType, Projection};
use crate::registry::TypeKeyRegistry;
use dashmap::DashMap;
use std::any::{Any, TypeId};
use std::fmt::{self, Debug};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

/// Listener invocation priority. Higher priorities run first; ties break
/// by registration order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Priority(i32);

impl Priority {
    /// Runs before everything else.
    pub const FIRST: Priority = Priority(200);
    /// Runs early, after [`Priority::FIRST`].
    pub const EARLY: Priority = Priority(100);
    /// Default priority.
    pub const NORMAL: Priority = Priority(0);
    /// Runs late, before [`Priority::LAST`].
    pub const LATE: Priority = Priority(-100);
    /// Runs after everything else.
    pub const LAST: Priority = Priority(-200);

    /// A custom priority level.
    pub const fn new(value: i32) -> Self {
        Priority(value)
    }

    /// The raw priority value.
    pub const fn value(self) -> i32 {
        self.0
    }
}

impl Default for Priority {
    fn default() -> Self {
        Priority::NORMAL
    }
}

/// Identity of a single subscription. Doubles as the registration sequence
/// number used for deterministic ordering ties.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SubscriptionId(u64);

impl SubscriptionId {
    /// The raw sequence value.
    pub fn value(self) -> u64 {
        self.0
    }
}

/// Token identifying a group of subscriptions installed and removed as a
/// unit (e.g. everything one plugin registered).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct OwnerId(Uuid);

impl OwnerId {
    /// A fresh, unique owner token.
    pub fn new() -> Self {
        OwnerId(Uuid::new_v4())
    }
}

impl Default for OwnerId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for OwnerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

pub(crate) type ErasedHandler =
    Box<dyn for<'a> Fn(&'a dyn Any) -> Result<(), EventError> + Send + Sync>;
pub(crate) type ErasedFilter = Box<dyn for<'a> Fn(&'a dyn Any) -> bool + Send + Sync>;

/// A single listener registration.
pub(crate) struct Subscription {
    pub id: SubscriptionId,
    pub event_type: EventType,
    pub priority: Priority,
    pub owner: Option<OwnerId>,
    pub label: String,
    pub receive_cancelled: bool,
    pub param: Option<TypeId>,
    active: AtomicBool,
    pub filter: Option<ErasedFilter>,
    pub handler: ErasedHandler,
}

impl Subscription {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        id: SubscriptionId,
        event_type: EventType,
        priority: Priority,
        owner: Option<OwnerId>,
        label: String,
        receive_cancelled: bool,
        param: Option<TypeId>,
        filter: Option<ErasedFilter>,
        handler: ErasedHandler,
    ) -> Self {
        Self {
            id,
            event_type,
            priority,
            owner,
            label,
            receive_cancelled,
            param,
            active: AtomicBool::new(true),
            filter,
            handler,
        }
    }

    /// Whether this subscription is still live. Retired subscriptions are
    /// skipped by in-flight dispatches that snapshotted them.
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    fn retire(&self) {
        self.active.store(false, Ordering::Release);
    }

    /// Immutable metadata view, used by predicate-based unsubscription.
    pub fn info(&self) -> SubscriptionInfo {
        SubscriptionInfo {
            id: self.id,
            event_type: self.event_type,
            priority: self.priority,
            owner: self.owner,
            label: self.label.clone(),
        }
    }
}

impl Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("event_type", &self.event_type)
            .field("priority", &self.priority)
            .field("owner", &self.owner)
            .field("label", &self.label)
            .field("active", &self.is_active())
            .finish()
    }
}

/// Metadata describing one subscription, exposed to removal predicates and
/// introspection.
#[derive(Debug, Clone)]
pub struct SubscriptionInfo {
    /// Subscription identity.
    pub id: SubscriptionId,
    /// The event type the listener registered for.
    pub event_type: EventType,
    /// Invocation priority.
    pub priority: Priority,
    /// Owning group, if installed through one.
    pub owner: Option<OwnerId>,
    /// Diagnostic label.
    pub label: String,
}

/// One entry of a dispatch snapshot: the subscription plus the projection
/// path from the concrete event type to the subscription's registered view.
pub(crate) struct DispatchEntry {
    pub sub: Arc<Subscription>,
    pub path: Arc<[Projection]>,
}

struct Snapshot {
    generation: u64,
    entries: Arc<[DispatchEntry]>,
}

/// Mapping from event type to registered subscriptions, with cached merged
/// dispatch snapshots per concrete event type.
pub(crate) struct SubscriptionTable {
    lanes: DashMap<TypeId, Vec<Arc<Subscription>>>,
    index: DashMap<SubscriptionId, TypeId>,
    snapshots: DashMap<TypeId, Snapshot>,
    generation: AtomicU64,
    seq: AtomicU64,
}

impl SubscriptionTable {
    pub fn with_capacity(types: usize) -> Self {
        Self {
            lanes: DashMap::with_capacity(types),
            index: DashMap::new(),
            snapshots: DashMap::with_capacity(types),
            generation: AtomicU64::new(0),
            seq: AtomicU64::new(1),
        }
    }

    /// Allocates the next subscription id / ordering sequence number.
    pub fn next_id(&self) -> SubscriptionId {
        SubscriptionId(self.seq.fetch_add(1, Ordering::Relaxed))
    }

    fn bump_generation(&self) {
        self.generation.fetch_add(1, Ordering::Release);
    }

    pub fn insert(&self, sub: Subscription) -> SubscriptionId {
        let id = sub.id;
        let type_id = sub.event_type.id();
        debug!(listener = %sub.label, event = sub.event_type.name(), "subscription registered");
        self.index.insert(id, type_id);
        self.lanes.entry(type_id).or_default().push(Arc::new(sub));
        self.bump_generation();
        id
    }

    /// Removes one subscription by id, retiring it so an in-flight dispatch
    /// that already snapshotted it skips it.
    pub fn remove(&self, id: SubscriptionId) -> bool {
        let Some((_, type_id)) = self.index.remove(&id) else {
            return false;
        };
        let mut removed = false;
        if let Some(mut lane) = self.lanes.get_mut(&type_id) {
            lane.retain(|sub| {
                if sub.id == id {
                    sub.retire();
                    removed = true;
                    false
                } else {
                    true
                }
            });
        }
        self.lanes.remove_if(&type_id, |_, lane| lane.is_empty());
        if removed {
            self.bump_generation();
        }
        removed
    }

    /// Removes every subscription whose metadata matches `predicate`.
    /// Returns how many were removed.
    pub fn remove_matching<P>(&self, predicate: P) -> usize
    where
        P: Fn(&SubscriptionInfo) -> bool,
    {
        let mut removed = 0;
        let mut emptied: Vec<TypeId> = Vec::new();
        for mut lane in self.lanes.iter_mut() {
            lane.value_mut().retain(|sub| {
                if predicate(&sub.info()) {
                    sub.retire();
                    self.index.remove(&sub.id);
                    removed += 1;
                    false
                } else {
                    true
                }
            });
            if lane.value().is_empty() {
                emptied.push(*lane.key());
            }
        }
        for type_id in emptied {
            self.lanes.remove_if(&type_id, |_, lane| lane.is_empty());
        }
        if removed > 0 {
            self.bump_generation();
        }
        removed
    }

    /// Removes every subscription belonging to `owner`.
    pub fn remove_owned(&self, owner: OwnerId) -> usize {
        self.remove_matching(|info| info.owner == Some(owner))
    }

    /// Removes every subscription. Not atomic with respect to concurrent
    /// subscribes; a registration racing the clear may survive it.
    pub fn clear(&self) -> usize {
        let mut removed = 0;
        for lane in self.lanes.iter() {
            for sub in lane.value() {
                sub.retire();
                removed += 1;
            }
        }
        self.lanes.clear();
        self.index.clear();
        self.bump_generation();
        removed
    }

    pub fn subscription_count(&self) -> usize {
        self.index.len()
    }

    pub fn type_count(&self) -> usize {
        self.lanes.len()
    }

    /// The merged, ordered dispatch snapshot for concrete event type `E`:
    /// subscriptions for `E` and every ancestor key, sorted by priority
    /// (highest first) then registration order, as an immutable slice.
    pub fn snapshot_for<E: Event>(&self, registry: &TypeKeyRegistry) -> Arc<[DispatchEntry]> {
        let type_id = TypeId::of::<E>();
        let generation = self.generation.load(Ordering::Acquire);
        if let Some(hit) = self.snapshots.get(&type_id) {
            if hit.generation == generation {
                return hit.entries.clone();
            }
        }

        let closure = registry.closure::<E>();
        let mut entries: Vec<DispatchEntry> = Vec::new();
        for resolved in closure.iter() {
            if let Some(lane) = self.lanes.get(&resolved.key.id()) {
                for sub in lane.iter() {
                    entries.push(DispatchEntry {
                        sub: sub.clone(),
                        path: resolved.path.clone(),
                    });
                }
            }
        }
        entries.sort_by(|a, b| {
            b.sub
                .priority
                .cmp(&a.sub.priority)
                .then_with(|| a.sub.id.cmp(&b.sub.id))
        });
        let entries: Arc<[DispatchEntry]> = entries.into();
        self.snapshots.insert(
            type_id,
            Snapshot {
                generation,
                entries: entries.clone(),
            },
        );
        entries
    }
}

impl Debug for SubscriptionTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscriptionTable")
            .field("subscriptions", &self.subscription_count())
            .field("types", &self.type_count())
            .finish()
    }
}
