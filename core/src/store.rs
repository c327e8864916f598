//! Stores - read-side state slices.
//!
//! A store owns a [`StoreCore`] holding its current state, its change
//! channel and its own dispatch stream. The [`Store`] trait supplies the
//! behaviour around it: `receive_payload` is the write-phase hook,
//! `get_state` the side-effect free read, and `set_state` the only way a
//! store should replace its state.
//!
//! # Example
//!
//! ```
//! use oneway_core::payload::{DomainPayload, Payload};
//! use oneway_core::meta::PayloadMeta;
//! use oneway_core::store::{Store, StoreCore};
//!
//! #[derive(Debug, Clone)]
//! enum CounterPayload {
//!     Increment,
//! }
//!
//! impl DomainPayload for CounterPayload {
//!     fn payload_type(&self) -> &str {
//!         "counter/increment"
//!     }
//! }
//!
//! #[derive(Debug, Clone, PartialEq)]
//! struct Count {
//!     count: i64,
//! }
//!
//! struct CounterStore {
//!     core: StoreCore<CounterPayload, Count>,
//! }
//!
//! impl Store<CounterPayload> for CounterStore {
//!     type State = Count;
//!
//!     fn core(&self) -> &StoreCore<CounterPayload, Count> {
//!         &self.core
//!     }
//!
//!     fn receive_payload(&self, payload: &Payload<CounterPayload>, _meta: &PayloadMeta) {
//!         if let Payload::User(CounterPayload::Increment) = payload {
//!             self.update_state(|state| Count { count: state.count + 1 });
//!         }
//!     }
//! }
//!
//! let store = CounterStore {
//!     core: StoreCore::new("CounterStore", Count { count: 0 }),
//! };
//! store.receive_payload(
//!     &Payload::User(CounterPayload::Increment),
//!     &PayloadMeta::untrusted(chrono::Utc::now()),
//! );
//! assert_eq!(store.get_state().count, 1);
//! ```

use crate::channel::{EventChannel, Subscription};
use crate::dispatcher::Dispatcher;
use crate::meta::{PayloadMeta, StoreId};
use crate::payload::{DomainPayload, Payload};
use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::Rc;

/// State storage, change channel and dispatch stream of one store
pub struct StoreCore<P, S> {
    id: StoreId,
    name: String,
    state: RefCell<Rc<S>>,
    changes: EventChannel<()>,
    dispatches: Dispatcher<P>,
    released: Cell<bool>,
}

impl<P: DomainPayload, S: 'static> StoreCore<P, S> {
    /// Create a core holding `initial` state
    #[must_use]
    pub fn new(name: impl Into<String>, initial: S) -> Self {
        Self {
            id: StoreId::next(),
            name: name.into(),
            state: RefCell::new(Rc::new(initial)),
            changes: EventChannel::new(),
            dispatches: Dispatcher::new(),
            released: Cell::new(false),
        }
    }

    /// Store identity
    #[must_use]
    pub const fn id(&self) -> StoreId {
        self.id
    }

    /// Store name
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Current state
    #[must_use]
    pub fn state(&self) -> Rc<S> {
        Rc::clone(&self.state.borrow())
    }

    /// Replace the state without notifying anyone.
    ///
    /// Prefer [`Store::set_state`], which applies `should_state_update` and
    /// emits the change.
    pub fn replace_state(&self, next: S) {
        *self.state.borrow_mut() = Rc::new(next);
    }

    /// Notify change subscribers
    pub fn emit_change(&self) {
        if self.released.get() {
            return;
        }
        self.changes.emit(&());
    }

    /// Subscribe to change notifications
    pub fn on_change(&self, handler: impl Fn() + 'static) -> Subscription {
        self.changes.subscribe(move |()| handler())
    }

    /// Subscribe to the untrusted payloads delivered to this store
    pub fn on_dispatch(
        &self,
        handler: impl Fn(&Payload<P>, &PayloadMeta) + 'static,
    ) -> Subscription {
        self.dispatches.on_dispatch(handler)
    }

    /// Deliver a payload to this store's dispatch stream
    pub fn deliver(&self, payload: &Payload<P>, meta: &PayloadMeta) {
        if self.released.get() {
            return;
        }
        self.dispatches
            .dispatch_with_meta(payload.clone(), meta.clone());
    }

    /// Drop every subscriber. Further changes are not announced.
    pub fn release(&self) {
        self.released.set(true);
        self.changes.clear();
        self.dispatches.clear();
    }

    /// Whether [`release`](Self::release) was called
    #[must_use]
    pub fn is_released(&self) -> bool {
        self.released.get()
    }
}

impl<P, S: fmt::Debug> fmt::Debug for StoreCore<P, S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoreCore")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("state", &self.state.borrow())
            .finish_non_exhaustive()
    }
}

/// A read-side state slice
pub trait Store<P: DomainPayload>: 'static {
    /// The state this store exposes
    type State: fmt::Debug + PartialEq + 'static;

    /// The store's core
    fn core(&self) -> &StoreCore<P, Self::State>;

    /// Display name
    fn name(&self) -> &str {
        self.core().name()
    }

    /// Current state. Must be free of side effects.
    fn get_state(&self) -> Rc<Self::State> {
        self.core().state()
    }

    /// Write-phase hook, called for every committed payload in commit order
    fn receive_payload(&self, _payload: &Payload<P>, _meta: &PayloadMeta) {}

    /// Whether moving from `prev` to `next` is a change.
    ///
    /// Defaults to value inequality, so equal states never count as a change.
    fn should_state_update(&self, prev: &Self::State, next: &Self::State) -> bool {
        prev != next
    }

    /// Replace the state and emit a change when `should_state_update` agrees.
    ///
    /// Returns whether the state was replaced.
    fn set_state(&self, next: Self::State) -> bool
    where
        Self: Sized,
    {
        let prev = self.core().state();
        if !self.should_state_update(&prev, &next) {
            return false;
        }
        self.core().replace_state(next);
        self.core().emit_change();
        true
    }

    /// Derive the next state from the current one, then [`set_state`](Self::set_state)
    fn update_state<F>(&self, update: F) -> bool
    where
        Self: Sized,
        F: FnOnce(&Self::State) -> Self::State,
    {
        let next = update(&self.core().state());
        self.set_state(next)
    }

    /// Announce a change without going through `set_state`
    fn emit_change(&self) {
        self.core().emit_change();
    }

    /// Subscribe to change notifications
    fn on_change(&self, handler: impl Fn() + 'static) -> Subscription
    where
        Self: Sized,
    {
        self.core().on_change(handler)
    }

    /// Drop every subscriber of this store
    fn release(&self) {
        self.core().release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[derive(Debug, Clone)]
    struct Noop;

    impl DomainPayload for Noop {
        fn payload_type(&self) -> &str {
            "noop"
        }
    }

    #[derive(Debug, Clone, PartialEq)]
    struct Pair {
        a: i32,
    }

    struct PairStore {
        core: StoreCore<Noop, Pair>,
    }

    impl Store<Noop> for PairStore {
        type State = Pair;

        fn core(&self) -> &StoreCore<Noop, Pair> {
            &self.core
        }
    }

    fn pair_store() -> PairStore {
        PairStore {
            core: StoreCore::new("PairStore", Pair { a: 0 }),
        }
    }

    fn count_changes(store: &PairStore) -> Rc<Cell<usize>> {
        let changes = Rc::new(Cell::new(0));
        let counter = Rc::clone(&changes);
        let _ = store.on_change(move || counter.set(counter.get() + 1));
        changes
    }

    #[test]
    fn equal_state_is_not_a_change() {
        let store = pair_store();
        let changes = count_changes(&store);

        assert!(store.set_state(Pair { a: 1 }));
        assert!(!store.set_state(Pair { a: 1 }));

        assert_eq!(changes.get(), 1);
        assert_eq!(*store.get_state(), Pair { a: 1 });
    }

    #[test]
    fn emit_change_after_release_is_silent() {
        let store = pair_store();
        let changes = count_changes(&store);

        store.release();
        store.emit_change();
        assert_eq!(changes.get(), 0);
        assert!(store.core().is_released());
    }

    #[test]
    fn deliver_reaches_dispatch_subscribers() {
        let store = pair_store();
        let seen = Rc::new(Cell::new(0));
        let counter = Rc::clone(&seen);
        let _ = store
            .core()
            .on_dispatch(move |_, meta| {
                assert!(!meta.is_trusted());
                counter.set(counter.get() + 1);
            });

        store.core().deliver(
            &Payload::User(Noop),
            &PayloadMeta::untrusted(chrono::Utc::now()),
        );
        assert_eq!(seen.get(), 1);
    }

    proptest! {
        #[test]
        fn set_state_changes_iff_values_differ(first in -50i32..50, second in -50i32..50) {
            let store = pair_store();
            let changes = count_changes(&store);

            store.set_state(Pair { a: first });
            let before = changes.get();
            let replaced = store.set_state(Pair { a: second });

            prop_assert_eq!(replaced, first != second);
            prop_assert_eq!(changes.get() - before, usize::from(first != second));
        }
    }
}
