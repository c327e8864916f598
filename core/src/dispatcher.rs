//! The dispatcher - a typed pub/sub bus for `(payload, meta)` pairs.
//!
//! # Example
//!
//! ```
//! use oneway_core::dispatcher::Dispatcher;
//! use oneway_core::payload::{DomainPayload, Payload};
//! use std::cell::RefCell;
//! use std::rc::Rc;
//!
//! #[derive(Debug, Clone)]
//! struct Ping;
//!
//! impl DomainPayload for Ping {
//!     fn payload_type(&self) -> &str {
//!         "ping"
//!     }
//! }
//!
//! let source = Dispatcher::<Ping>::new();
//! let target = Dispatcher::<Ping>::new();
//! let seen = Rc::new(RefCell::new(Vec::new()));
//!
//! let log = Rc::clone(&seen);
//! let _subscription = target.on_dispatch(move |payload, meta| {
//!     log.borrow_mut().push((payload.payload_type().to_string(), meta.is_trusted()));
//! });
//!
//! let pipe = source.pipe(&target);
//! source.dispatch(Payload::User(Ping));
//! pipe.unsubscribe();
//! source.dispatch(Payload::User(Ping));
//!
//! assert_eq!(*seen.borrow(), vec![("ping".to_string(), false)]);
//! ```

use crate::channel::{EventChannel, Subscription};
use crate::environment::{Clock, SystemClock};
use crate::meta::{DispatcherId, PayloadMeta};
use crate::payload::{DomainPayload, Payload};
use std::fmt;
use std::rc::Rc;

/// A dispatched payload together with its meta
#[derive(Debug, Clone)]
pub struct Envelope<P> {
    /// The payload
    pub payload: Payload<P>,
    /// Meta describing the dispatch
    pub meta: PayloadMeta,
}

/// Typed pub/sub bus.
///
/// Cloning a `Dispatcher` yields another handle to the same bus.
pub struct Dispatcher<P> {
    id: DispatcherId,
    clock: Rc<dyn Clock>,
    channel: Rc<EventChannel<Envelope<P>>>,
}

impl<P: DomainPayload> Dispatcher<P> {
    /// Create a dispatcher stamping meta with the system clock
    #[must_use]
    pub fn new() -> Self {
        Self::with_clock(Rc::new(SystemClock))
    }

    /// Create a dispatcher stamping meta with `clock`
    #[must_use]
    pub fn with_clock(clock: Rc<dyn Clock>) -> Self {
        Self {
            id: DispatcherId::next(),
            clock,
            channel: Rc::new(EventChannel::new()),
        }
    }

    /// Identity of this bus
    #[must_use]
    pub const fn id(&self) -> DispatcherId {
        self.id
    }

    /// Clock used for meta timestamps
    #[must_use]
    pub fn clock(&self) -> Rc<dyn Clock> {
        Rc::clone(&self.clock)
    }

    /// Subscribe to every dispatched payload
    pub fn on_dispatch(&self, handler: impl Fn(&Payload<P>, &PayloadMeta) + 'static) -> Subscription {
        self.channel
            .subscribe(move |envelope: &Envelope<P>| handler(&envelope.payload, &envelope.meta))
    }

    /// Dispatch a payload with fresh untrusted meta attributed to this dispatcher
    ///
    /// # Panics
    ///
    /// In development builds, panics if the payload type is empty.
    pub fn dispatch(&self, payload: Payload<P>) {
        let meta = PayloadMeta::untrusted(self.clock.now()).with_dispatcher(self.id);
        self.dispatch_with_meta(payload, meta);
    }

    /// Dispatch a payload with explicit meta, which is forwarded unchanged
    ///
    /// # Panics
    ///
    /// In development builds, panics if the payload type is empty.
    pub fn dispatch_with_meta(&self, payload: Payload<P>, meta: PayloadMeta) {
        debug_assert!(
            !payload.payload_type().is_empty(),
            "dispatched payload must have a non-empty type: {payload:?}"
        );
        tracing::trace!(
            dispatcher = %self.id,
            payload_type = payload.payload_type(),
            trusted = meta.is_trusted(),
            "Dispatching payload"
        );
        self.channel.emit(&Envelope { payload, meta });
    }

    /// Forward everything dispatched on `self` to `target`, meta unchanged.
    ///
    /// Unsubscribing the returned handle tears the delegation down.
    pub fn pipe(&self, target: &Self) -> Subscription {
        let target = target.clone();
        self.channel.subscribe(move |envelope: &Envelope<P>| {
            target.dispatch_with_meta(envelope.payload.clone(), envelope.meta.clone());
        })
    }

    /// Number of handlers currently subscribed
    #[must_use]
    pub fn listener_count(&self) -> usize {
        self.channel.len()
    }

    /// Remove every handler
    pub fn clear(&self) {
        self.channel.clear();
    }
}

impl<P: DomainPayload> Default for Dispatcher<P> {
    fn default() -> Self {
        Self::new()
    }
}

impl<P> Clone for Dispatcher<P> {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            clock: Rc::clone(&self.clock),
            channel: Rc::clone(&self.channel),
        }
    }
}

impl<P> fmt::Debug for Dispatcher<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dispatcher")
            .field("id", &self.id)
            .field("channel", &self.channel)
            .finish_non_exhaustive()
    }
}
