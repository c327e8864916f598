//! Payloads - the messages that travel through a [`Dispatcher`](crate::dispatcher::Dispatcher).
//!
//! A payload is either a domain payload (`Payload::User`) dispatched by a use
//! case, or one of the lifecycle payloads the runtime generates around every
//! execution. Lifecycle payloads always travel with trusted meta.
//!
//! # Example
//!
//! ```
//! use oneway_core::payload::{DomainPayload, Payload};
//!
//! #[derive(Debug, Clone, PartialEq)]
//! enum TodoPayload {
//!     Added { title: String },
//!     Cleared,
//! }
//!
//! impl DomainPayload for TodoPayload {
//!     fn payload_type(&self) -> &str {
//!         match self {
//!             TodoPayload::Added { .. } => "todo/added",
//!             TodoPayload::Cleared => "todo/cleared",
//!         }
//!     }
//! }
//!
//! let payload = Payload::User(TodoPayload::Cleared);
//! assert_eq!(payload.payload_type(), "todo/cleared");
//! assert_eq!(payload.kind(), oneway_core::payload::PayloadKind::User);
//! ```

use crate::error::UseCaseError;
use crate::meta::StoreRef;
use std::any::Any;
use std::fmt;
use std::rc::Rc;

/// Type identifiers of the lifecycle payloads
pub mod types {
    /// A use case is about to run
    pub const WILL_EXECUTED: &str = "oneway/will-executed";
    /// `execute` returned (possibly with a pending result)
    pub const DID_EXECUTED: &str = "oneway/did-executed";
    /// The run settled
    pub const COMPLETED: &str = "oneway/completed";
    /// The run failed or called `throw_error`
    pub const ERROR: &str = "oneway/error";
    /// `should_execute` declined the run
    pub const WILL_NOT_EXECUTED: &str = "oneway/will-not-executed";
    /// A transaction opened
    pub const TRANSACTION_BEGAN: &str = "oneway/transaction-began";
    /// A transaction closed
    pub const TRANSACTION_ENDED: &str = "oneway/transaction-ended";
    /// The store group emitted a change
    pub const STORE_CHANGED: &str = "oneway/store-changed";
}

/// A domain payload dispatched by application use cases.
///
/// `payload_type` is the routing identifier. It must be non-empty; the
/// dispatcher asserts this in development builds.
pub trait DomainPayload: Clone + fmt::Debug + 'static {
    /// Routing identifier of this payload
    fn payload_type(&self) -> &str;
}

/// An opaque, cheaply clonable value carried by lifecycle payloads
/// (execution arguments and results).
///
/// The value keeps its `Debug` rendering so loggers can print it without
/// knowing its type, and can be recovered with [`downcast_ref`](Self::downcast_ref).
#[derive(Clone)]
pub struct AnyValue {
    value: Rc<dyn Any>,
    debug: fn(&(dyn Any + 'static), &mut fmt::Formatter<'_>) -> fmt::Result,
}

fn debug_as<T: fmt::Debug + 'static>(
    value: &(dyn Any + 'static),
    f: &mut fmt::Formatter<'_>,
) -> fmt::Result {
    match value.downcast_ref::<T>() {
        Some(value) => fmt::Debug::fmt(value, f),
        None => f.write_str("<value>"),
    }
}

impl AnyValue {
    /// Wrap a value
    #[must_use]
    pub fn new<T: fmt::Debug + 'static>(value: T) -> Self {
        Self {
            value: Rc::new(value),
            debug: debug_as::<T>,
        }
    }

    /// Wrap an already shared value without copying it
    #[must_use]
    pub fn from_rc<T: fmt::Debug + 'static>(value: Rc<T>) -> Self {
        Self {
            value,
            debug: debug_as::<T>,
        }
    }

    /// Borrow the value as `T` if it has that type
    #[must_use]
    pub fn downcast_ref<T: 'static>(&self) -> Option<&T> {
        self.value.downcast_ref::<T>()
    }

    /// Share the value as `Rc<T>` if it has that type
    #[must_use]
    pub fn downcast_rc<T: 'static>(&self) -> Option<Rc<T>> {
        Rc::clone(&self.value).downcast::<T>().ok()
    }

    /// Whether both handles point at the same value
    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.value, &other.value)
    }

    /// Whether the value has type `T`
    #[must_use]
    pub fn is<T: 'static>(&self) -> bool {
        self.value.is::<T>()
    }
}

impl fmt::Debug for AnyValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        (self.debug)(&*self.value, f)
    }
}

/// Classification used by the store group and the lifecycle observers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PayloadKind {
    /// Domain payload
    User,
    /// [`Payload::WillExecuted`]
    WillExecuted,
    /// [`Payload::DidExecuted`]
    DidExecuted,
    /// [`Payload::Completed`]
    Completed,
    /// [`Payload::Error`]
    Error,
    /// [`Payload::WillNotExecuted`]
    WillNotExecuted,
    /// [`Payload::TransactionBegan`]
    TransactionBegan,
    /// [`Payload::TransactionEnded`]
    TransactionEnded,
    /// [`Payload::StoreChanged`]
    StoreChanged,
}

/// Everything that can be dispatched
#[derive(Clone)]
pub enum Payload<P> {
    /// A domain payload
    User(P),

    /// Emitted before `execute` is invoked
    WillExecuted {
        /// Arguments the use case runs with
        args: AnyValue,
    },

    /// Emitted right after `execute` returned
    DidExecuted {
        /// The value, when the run already settled successfully
        value: Option<AnyValue>,
    },

    /// Emitted once the run settled
    Completed {
        /// The resolved value; `None` when the run failed
        value: Option<AnyValue>,
    },

    /// A use case failed or called `throw_error`
    Error {
        /// The error
        error: UseCaseError,
    },

    /// `should_execute` returned `false`
    WillNotExecuted {
        /// Arguments the use case would have run with
        args: AnyValue,
    },

    /// A transaction opened
    TransactionBegan {
        /// Transaction name
        name: String,
    },

    /// A transaction closed
    TransactionEnded {
        /// Transaction name
        name: String,
    },

    /// The store group emitted a change
    StoreChanged {
        /// Stores whose state changed, in registration order
        stores: Vec<StoreRef>,
    },
}

impl<P: DomainPayload> Payload<P> {
    /// Routing identifier
    #[must_use]
    pub fn payload_type(&self) -> &str {
        match self {
            Self::User(payload) => payload.payload_type(),
            Self::WillExecuted { .. } => types::WILL_EXECUTED,
            Self::DidExecuted { .. } => types::DID_EXECUTED,
            Self::Completed { .. } => types::COMPLETED,
            Self::Error { .. } => types::ERROR,
            Self::WillNotExecuted { .. } => types::WILL_NOT_EXECUTED,
            Self::TransactionBegan { .. } => types::TRANSACTION_BEGAN,
            Self::TransactionEnded { .. } => types::TRANSACTION_ENDED,
            Self::StoreChanged { .. } => types::STORE_CHANGED,
        }
    }
}

impl<P> Payload<P> {
    /// Classify the payload
    #[must_use]
    pub const fn kind(&self) -> PayloadKind {
        match self {
            Self::User(_) => PayloadKind::User,
            Self::WillExecuted { .. } => PayloadKind::WillExecuted,
            Self::DidExecuted { .. } => PayloadKind::DidExecuted,
            Self::Completed { .. } => PayloadKind::Completed,
            Self::Error { .. } => PayloadKind::Error,
            Self::WillNotExecuted { .. } => PayloadKind::WillNotExecuted,
            Self::TransactionBegan { .. } => PayloadKind::TransactionBegan,
            Self::TransactionEnded { .. } => PayloadKind::TransactionEnded,
            Self::StoreChanged { .. } => PayloadKind::StoreChanged,
        }
    }

    /// The domain payload, if this is one
    #[must_use]
    pub const fn as_user(&self) -> Option<&P> {
        match self {
            Self::User(payload) => Some(payload),
            _ => None,
        }
    }

    /// Whether the runtime generates this kind of payload
    #[must_use]
    pub const fn is_lifecycle(&self) -> bool {
        !matches!(self, Self::User(_))
    }
}

impl<P: fmt::Debug> fmt::Debug for Payload<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::User(payload) => f.debug_tuple("User").field(payload).finish(),
            Self::WillExecuted { args } => {
                f.debug_struct("WillExecuted").field("args", args).finish()
            },
            Self::DidExecuted { value } => {
                f.debug_struct("DidExecuted").field("value", value).finish()
            },
            Self::Completed { value } => f.debug_struct("Completed").field("value", value).finish(),
            Self::Error { error } => f.debug_struct("Error").field("error", error).finish(),
            Self::WillNotExecuted { args } => {
                f.debug_struct("WillNotExecuted").field("args", args).finish()
            },
            Self::TransactionBegan { name } => {
                f.debug_struct("TransactionBegan").field("name", name).finish()
            },
            Self::TransactionEnded { name } => {
                f.debug_struct("TransactionEnded").field("name", name).finish()
            },
            Self::StoreChanged { stores } => {
                f.debug_struct("StoreChanged").field("stores", stores).finish()
            },
        }
    }
}
