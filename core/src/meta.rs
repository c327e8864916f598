//! Payload meta - who dispatched a payload, on whose behalf, and when.
//!
//! A fresh [`PayloadMeta`] accompanies every dispatch. Lifecycle payloads
//! produced by the runtime carry *trusted* meta; payloads dispatched by
//! application code carry *untrusted* meta.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

macro_rules! sequential_id {
    ($(#[$doc:meta])* $name:ident, $counter:ident) => {
        $(#[$doc])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        pub struct $name(u64);

        static $counter: AtomicU64 = AtomicU64::new(1);

        impl $name {
            /// Allocate the next process-unique id
            #[must_use]
            pub fn next() -> Self {
                Self($counter.fetch_add(1, Ordering::Relaxed))
            }

            /// Raw numeric value
            #[must_use]
            pub const fn get(self) -> u64 {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

sequential_id!(
    /// Identity of a use case instance
    UseCaseId,
    NEXT_USE_CASE_ID
);
sequential_id!(
    /// Identity of one execution (one executor)
    ExecutionId,
    NEXT_EXECUTION_ID
);
sequential_id!(
    /// Identity of a dispatcher
    DispatcherId,
    NEXT_DISPATCHER_ID
);
sequential_id!(
    /// Identity of a store
    StoreId,
    NEXT_STORE_ID
);
sequential_id!(
    /// Identity of a transaction
    TransactionId,
    NEXT_TRANSACTION_ID
);

/// Names a use case instance inside payload meta
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UseCaseDescriptor {
    /// Instance identity
    pub id: UseCaseId,
    /// Display name
    pub name: String,
    /// The execution that produced the payload
    pub execution: ExecutionId,
}

impl fmt::Display for UseCaseDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.name, self.id)
    }
}

/// Names a transaction inside payload meta
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TransactionDescriptor {
    /// Transaction identity
    pub id: TransactionId,
    /// Name given to `Context::transaction`
    pub name: String,
}

/// Names a store in change notifications
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StoreRef {
    /// Store identity
    pub id: StoreId,
    /// Store name
    pub name: String,
    /// Key of the store inside the composite group state
    pub state_name: String,
}

impl fmt::Display for StoreRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name, self.state_name)
    }
}

/// Immutable description of a single dispatch
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PayloadMeta {
    use_case: Option<UseCaseDescriptor>,
    parent_use_case: Option<UseCaseDescriptor>,
    dispatcher: Option<DispatcherId>,
    transaction: Option<TransactionDescriptor>,
    timestamp: DateTime<Utc>,
    is_trusted: bool,
    is_use_case_finished: bool,
}

impl PayloadMeta {
    /// Meta for a payload dispatched by application code
    #[must_use]
    pub const fn untrusted(timestamp: DateTime<Utc>) -> Self {
        Self {
            use_case: None,
            parent_use_case: None,
            dispatcher: None,
            transaction: None,
            timestamp,
            is_trusted: false,
            is_use_case_finished: false,
        }
    }

    /// Meta for a lifecycle payload generated by the runtime
    #[must_use]
    pub const fn trusted(timestamp: DateTime<Utc>) -> Self {
        Self {
            use_case: None,
            parent_use_case: None,
            dispatcher: None,
            transaction: None,
            timestamp,
            is_trusted: true,
            is_use_case_finished: false,
        }
    }

    /// Attribute the payload to a use case
    #[must_use]
    pub fn with_use_case(mut self, use_case: UseCaseDescriptor) -> Self {
        self.use_case = Some(use_case);
        self
    }

    /// Record the parent of the originating use case
    #[must_use]
    pub fn with_parent_use_case(mut self, parent: Option<UseCaseDescriptor>) -> Self {
        self.parent_use_case = parent;
        self
    }

    /// Record the dispatcher the payload entered through
    #[must_use]
    pub fn with_dispatcher(mut self, dispatcher: DispatcherId) -> Self {
        self.dispatcher = Some(dispatcher);
        self
    }

    /// Attribute the payload to a transaction
    #[must_use]
    pub fn with_transaction(mut self, transaction: Option<TransactionDescriptor>) -> Self {
        self.transaction = transaction;
        self
    }

    /// Mark whether the originating run has fully finished
    #[must_use]
    pub fn finished(mut self, is_use_case_finished: bool) -> Self {
        self.is_use_case_finished = is_use_case_finished;
        self
    }

    /// Originating use case
    #[must_use]
    pub const fn use_case(&self) -> Option<&UseCaseDescriptor> {
        self.use_case.as_ref()
    }

    /// Parent of the originating use case
    #[must_use]
    pub const fn parent_use_case(&self) -> Option<&UseCaseDescriptor> {
        self.parent_use_case.as_ref()
    }

    /// Dispatcher the payload entered through
    #[must_use]
    pub const fn dispatcher(&self) -> Option<DispatcherId> {
        self.dispatcher
    }

    /// Enclosing transaction
    #[must_use]
    pub const fn transaction(&self) -> Option<&TransactionDescriptor> {
        self.transaction.as_ref()
    }

    /// When the payload was dispatched
    #[must_use]
    pub const fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    /// Whether the runtime generated the payload
    #[must_use]
    pub const fn is_trusted(&self) -> bool {
        self.is_trusted
    }

    /// Whether the originating run had fully finished at dispatch time
    #[must_use]
    pub const fn is_use_case_finished(&self) -> bool {
        self.is_use_case_finished
    }
}
