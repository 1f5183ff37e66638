//! Convenience macros for declaring events.
//!
//! [`impl_event!`](crate::impl_event) removes the boilerplate of
//! implementing [`Event`](crate::Event) for the common shapes: plain
//! events, events with declared ancestors, and cancellable events.
//! Parameterized event families (overriding
//! [`requires_type_param`](crate::Event::requires_type_param)) are rare
//! enough to implement by hand.

/// Implements [`Event`](crate::Event) for a type.
///
/// # Usage
///
/// ```rust
/// use eventum::{impl_event, CancelState};
///
/// // Plain event.
/// #[derive(Debug)]
/// struct Tick {
///     frame: u64,
/// }
/// impl_event!(Tick);
///
/// // Event with ancestors: listeners of `Tick` also see `FixedTick`s,
/// // through the `|e| &e.tick` projection.
/// #[derive(Debug)]
/// struct FixedTick {
///     tick: Tick,
///     step: f32,
/// }
/// impl_event!(FixedTick => Tick { |e| &e.tick });
///
/// // Cancellable event.
/// #[derive(Debug, Default)]
/// struct ChatMessage {
///     cancel: CancelState,
/// }
/// impl_event!(ChatMessage: cancellable(cancel));
/// ```
///
/// Ancestors are listed in declaration order; each takes the projection
/// from the event to the ancestor's embedded view. The `cancellable`
/// marker and the ancestor list can be combined:
///
/// ```rust,ignore
/// impl_event!(Damage: cancellable(cancel) => EntityEvent { |e| &e.base });
/// ```
#[macro_export]
macro_rules! impl_event {
    ($event:ty) => {
        impl $crate::Event for $event {}
    };
    ($event:ty : cancellable($field:ident)) => {
        impl $crate::Event for $event {
            fn cancel_state(&self) -> Option<&$crate::CancelState> {
                Some(&self.$field)
            }
        }
    };
    ($event:ty => $($ancestor:ty { |$ev:ident| $proj:expr }),+ $(,)?) => {
        impl $crate::Event for $event {
            fn ancestors() -> $crate::AncestorList {
                let mut list = $crate::AncestorList::new();
                $(
                    list.push($crate::Ancestor::to::<$event, $ancestor>(
                        |$ev: &$event| $proj,
                    ));
                )+
                list
            }
        }
    };
    ($event:ty : cancellable($field:ident) => $($ancestor:ty { |$ev:ident| $proj:expr }),+ $(,)?) => {
        impl $crate::Event for $event {
            fn ancestors() -> $crate::AncestorList {
                let mut list = $crate::AncestorList::new();
                $(
                    list.push($crate::Ancestor::to::<$event, $ancestor>(
                        |$ev: &$event| $proj,
                    ));
                )+
                list
            }

            fn cancel_state(&self) -> Option<&$crate::CancelState> {
                Some(&self.$field)
            }
        }
    };
}
