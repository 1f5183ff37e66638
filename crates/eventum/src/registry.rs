//! Type key registry: resolves and caches the dispatch closure of each
//! concrete event type.
//!
//! The closure of a type is the type itself plus every declared ancestor,
//! walked breadth-first in declaration order with order-preserving
//! deduplication. Each entry carries the composed projection path from the
//! concrete event to that ancestor's view. Closures are immutable per type
//! and cached for the lifetime of the registry.

use crate::error::EventError;
use crate::event::{Ancestor, Event, EventType, Projection};
use dashmap::DashMap;
use std::any::TypeId;
use std::collections::VecDeque;
use std::fmt::{self, Debug};
use std::sync::Arc;

/// One resolved dispatch key for a concrete event type: the key itself and
/// the projection path leading to its view. The path is empty for the
/// concrete type's own entry.
pub(crate) struct ResolvedKey {
    pub key: EventType,
    pub path: Arc<[Projection]>,
}

impl Debug for ResolvedKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResolvedKey")
            .field("key", &self.key)
            .field("depth", &self.path.len())
            .finish()
    }
}

/// Per-type dispatch closure cache.
pub(crate) struct TypeKeyRegistry {
    closures: DashMap<TypeId, Arc<[ResolvedKey]>>,
}

impl TypeKeyRegistry {
    pub fn new() -> Self {
        Self {
            closures: DashMap::new(),
        }
    }

    /// Resolves the routing key of a single event instance, failing when a
    /// parameterized type reports no parameter.
    pub fn instance_key<E: Event>(&self, event: &E) -> Result<EventType, EventError> {
        if E::requires_type_param() {
            match event.type_param() {
                Some(param) => Ok(EventType::of::<E>().keyed(Some(param))),
                None => Err(EventError::UnresolvableType {
                    type_name: std::any::type_name::<E>(),
                }),
            }
        } else {
            Ok(EventType::of::<E>())
        }
    }

    /// The cached dispatch closure for `E`: `E` first, then ancestors in
    /// breadth-first declaration order, deduplicated by `TypeId`.
    pub fn closure<E: Event>(&self) -> Arc<[ResolvedKey]> {
        let type_id = TypeId::of::<E>();
        if let Some(hit) = self.closures.get(&type_id) {
            return hit.clone();
        }
        let computed = Self::compute::<E>();
        self.closures
            .entry(type_id)
            .or_insert(computed)
            .clone()
    }

    fn compute<E: Event>() -> Arc<[ResolvedKey]> {
        let mut keys: Vec<ResolvedKey> = vec![ResolvedKey {
            key: EventType::of::<E>(),
            path: Vec::new().into(),
        }];
        // Order-preserving dedup: first reachable path to an ancestor wins.
        let mut seen: Vec<TypeId> = vec![TypeId::of::<E>()];
        let mut work: VecDeque<(Ancestor, Vec<Projection>)> = E::ancestors()
            .into_iter()
            .map(|ancestor| (ancestor, Vec::new()))
            .collect();
        while let Some((ancestor, prefix)) = work.pop_front() {
            if seen.contains(&ancestor.key.id()) {
                continue;
            }
            seen.push(ancestor.key.id());
            let mut path = prefix;
            path.push(ancestor.project.clone());
            keys.push(ResolvedKey {
                key: ancestor.key,
                path: path.clone().into(),
            });
            for next in (ancestor.expand)() {
                work.push_back((next, path.clone()));
            }
        }
        keys.into()
    }
}

impl Debug for TypeKeyRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TypeKeyRegistry")
            .field("cached_types", &self.closures.len())
            .finish()
    }
}
