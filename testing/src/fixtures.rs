//! Fixture stores.

use oneway_core::meta::PayloadMeta;
use oneway_core::payload::{DomainPayload, Payload};
use oneway_core::store::{Store, StoreCore};
use std::cell::Cell;
use std::fmt;
use std::rc::Rc;

type Reducer<P, S> = Box<dyn Fn(&S, &Payload<P>) -> Option<S>>;

/// A store whose state is driven by a reducer closure.
///
/// The reducer sees every payload of the write phase; returning `Some`
/// replaces the state (and announces a change if it differs).
///
/// ```
/// use oneway_core::prelude::*;
/// use oneway_testing::ReducerStore;
///
/// #[derive(Debug, Clone)]
/// struct Add(i32);
///
/// impl DomainPayload for Add {
///     fn payload_type(&self) -> &str {
///         "add"
///     }
/// }
///
/// let store = ReducerStore::new("Sum", 0, |sum, payload: &Payload<Add>| {
///     payload.as_user().map(|Add(n)| sum + n)
/// });
/// store.receive_payload(&Payload::User(Add(2)), &PayloadMeta::untrusted(chrono::Utc::now()));
/// assert_eq!(*store.get_state(), 2);
/// assert_eq!(store.received(), 1);
/// ```
pub struct ReducerStore<P, S> {
    core: StoreCore<P, S>,
    reducer: Reducer<P, S>,
    received: Cell<usize>,
}

impl<P: DomainPayload, S: fmt::Debug + PartialEq + 'static> ReducerStore<P, S> {
    /// A store named `name` starting from `initial`
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        initial: S,
        reducer: impl Fn(&S, &Payload<P>) -> Option<S> + 'static,
    ) -> Rc<Self> {
        Rc::new(Self {
            core: StoreCore::new(name, initial),
            reducer: Box::new(reducer),
            received: Cell::new(0),
        })
    }

    /// Payloads seen by `receive_payload`
    #[must_use]
    pub fn received(&self) -> usize {
        self.received.get()
    }
}

impl<P: DomainPayload, S: fmt::Debug + PartialEq + 'static> Store<P> for ReducerStore<P, S> {
    type State = S;

    fn core(&self) -> &StoreCore<P, S> {
        &self.core
    }

    fn receive_payload(&self, payload: &Payload<P>, _meta: &PayloadMeta) {
        self.received.set(self.received.get() + 1);
        let next = (self.reducer)(&self.get_state(), payload);
        if let Some(next) = next {
            self.set_state(next);
        }
    }
}

impl<P, S: fmt::Debug> fmt::Debug for ReducerStore<P, S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReducerStore")
            .field("core", &self.core)
            .field("received", &self.received.get())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone)]
    struct Reset;

    impl DomainPayload for Reset {
        fn payload_type(&self) -> &str {
            "reset"
        }
    }

    #[test]
    fn lifecycle_payloads_reach_the_reducer() {
        let store = ReducerStore::new("Seen", Vec::<String>::new(), |seen, payload: &Payload<Reset>| {
            let mut next = seen.clone();
            next.push(payload.payload_type().to_string());
            Some(next)
        });

        store.receive_payload(
            &Payload::Completed { value: None },
            &PayloadMeta::trusted(chrono::Utc::now()),
        );
        assert_eq!(*store.get_state(), vec!["oneway/completed".to_string()]);
    }
}
