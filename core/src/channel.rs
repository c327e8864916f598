//! Private event channels.
//!
//! Every component that publishes events (dispatchers, stores, store groups)
//! owns an [`EventChannel`] and exposes only the subscribe method it needs.
//! There is no shared emitter base type.
//!
//! Channels are single-threaded: handlers are `Rc<dyn Fn>` and emission
//! snapshots the handler list first, so a handler may subscribe, unsubscribe
//! or emit re-entrantly without a `RefCell` borrow conflict.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::{Rc, Weak};

type Handler<E> = Rc<dyn Fn(&E)>;

struct Slot<E: ?Sized> {
    id: u64,
    handler: Handler<E>,
}

struct Inner<E: ?Sized> {
    next_id: Cell<u64>,
    slots: RefCell<Vec<Slot<E>>>,
}

/// An ordered list of handlers that receive `&E` on every [`emit`](Self::emit).
pub struct EventChannel<E: ?Sized> {
    inner: Rc<Inner<E>>,
}

impl<E: ?Sized + 'static> EventChannel<E> {
    /// Create an empty channel
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Rc::new(Inner {
                next_id: Cell::new(0),
                slots: RefCell::new(Vec::new()),
            }),
        }
    }

    /// Register a handler. Handlers run in registration order.
    pub fn subscribe(&self, handler: impl Fn(&E) + 'static) -> Subscription {
        let id = self.inner.next_id.get();
        self.inner.next_id.set(id + 1);
        self.inner.slots.borrow_mut().push(Slot {
            id,
            handler: Rc::new(handler),
        });

        let weak: Weak<Inner<E>> = Rc::downgrade(&self.inner);
        Subscription::new(move || {
            if let Some(inner) = weak.upgrade() {
                inner.slots.borrow_mut().retain(|slot| slot.id != id);
            }
        })
    }

    /// Deliver `event` to every handler registered at the time of the call
    pub fn emit(&self, event: &E) {
        let handlers: Vec<Handler<E>> = self
            .inner
            .slots
            .borrow()
            .iter()
            .map(|slot| Rc::clone(&slot.handler))
            .collect();

        for handler in handlers {
            handler(event);
        }
    }

    /// Drop every handler
    pub fn clear(&self) {
        self.inner.slots.borrow_mut().clear();
    }

    /// Number of registered handlers
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.slots.borrow().len()
    }

    /// Whether no handler is registered
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<E: ?Sized + 'static> Default for EventChannel<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E: ?Sized> fmt::Debug for EventChannel<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventChannel")
            .field("handlers", &self.inner.slots.borrow().len())
            .finish()
    }
}

/// Handle returned by every `on_*` registration.
///
/// Dropping a `Subscription` keeps the handler registered; call
/// [`unsubscribe`](Self::unsubscribe) to remove it. Unsubscribing twice (or
/// after the owning channel is gone) is a no-op.
pub struct Subscription {
    teardown: Option<Box<dyn FnOnce()>>,
}

impl Subscription {
    /// Wrap an arbitrary teardown closure
    #[must_use]
    pub fn new(teardown: impl FnOnce() + 'static) -> Self {
        Self {
            teardown: Some(Box::new(teardown)),
        }
    }

    /// A subscription with nothing to tear down
    #[must_use]
    pub const fn noop() -> Self {
        Self { teardown: None }
    }

    /// Combine several subscriptions into one
    #[must_use]
    pub fn merge(subscriptions: Vec<Self>) -> Self {
        Self::new(move || {
            for subscription in subscriptions {
                subscription.unsubscribe();
            }
        })
    }

    /// Remove the handler
    pub fn unsubscribe(mut self) {
        if let Some(teardown) = self.teardown.take() {
            teardown();
        }
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.teardown.is_some())
            .finish()
    }
}
