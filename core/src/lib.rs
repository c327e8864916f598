//! # Oneway Core
//!
//! Core types for the Oneway unidirectional-dataflow runtime.
//!
//! This crate provides the building blocks the runtime wires together:
//!
//! - **Payload**: the typed, immutable messages travelling through the system
//! - **Payload meta**: who dispatched a payload, on whose behalf, and when
//! - **Dispatcher**: a typed pub/sub bus with one-directional pipes
//! - **Store**: a read-side state slice with change detection
//! - **Environment**: injected dependencies (the clock)
//!
//! Execution (use cases, executors, the store group and units of work) lives
//! in `oneway-runtime`.
//!
//! ## Threading
//!
//! Everything here is single-threaded. Handlers are `Rc`-shared closures and
//! nothing is `Send`; run the runtime on a current-thread executor.
//!
//! ## Example
//!
//! ```
//! use oneway_core::prelude::*;
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
//! let dispatcher = Dispatcher::<Ping>::new();
//! let subscription = dispatcher.on_dispatch(|payload, meta| {
//!     assert_eq!(payload.payload_type(), "ping");
//!     assert!(!meta.is_trusted());
//! });
//! dispatcher.dispatch(Payload::User(Ping));
//! subscription.unsubscribe();
//! ```

pub mod channel;
pub mod dispatcher;
pub mod error;
pub mod meta;
pub mod payload;
pub mod store;
pub mod warning;

/// Commonly used types
pub mod prelude {
    pub use crate::channel::Subscription;
    pub use crate::dispatcher::{Dispatcher, Envelope};
    pub use crate::environment::{Clock, SystemClock};
    pub use crate::error::{DomainError, UseCaseError};
    pub use crate::meta::{
        PayloadMeta, StoreId, StoreRef, TransactionDescriptor, UseCaseDescriptor, UseCaseId,
    };
    pub use crate::payload::{AnyValue, DomainPayload, Payload, PayloadKind};
    pub use crate::store::{Store, StoreCore};
}

/// Environment traits - injected dependencies
pub mod environment {
    use chrono::{DateTime, Utc};

    /// Clock trait - abstracts time operations for testability
    ///
    /// Every [`PayloadMeta`](crate::meta::PayloadMeta) is stamped with the
    /// clock of the dispatcher that created it.
    ///
    /// # Examples
    ///
    /// ```
    /// use chrono::{DateTime, Utc};
    /// use oneway_core::environment::Clock;
    ///
    /// // Test - fixed time for deterministic tests
    /// struct FixedClock {
    ///     time: DateTime<Utc>,
    /// }
    ///
    /// impl Clock for FixedClock {
    ///     fn now(&self) -> DateTime<Utc> {
    ///         self.time
    ///     }
    /// }
    /// ```
    pub trait Clock {
        /// Get the current time
        fn now(&self) -> DateTime<Utc>;
    }

    /// Production clock reading the system time
    #[derive(Debug, Clone, Copy, Default)]
    pub struct SystemClock;

    impl Clock for SystemClock {
        fn now(&self) -> DateTime<Utc> {
            Utc::now()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::environment::{Clock, SystemClock};

    #[test]
    fn system_clock_moves_forward() {
        let clock = SystemClock;
        let first = clock.now();
        let second = clock.now();
        assert!(second >= first);
    }
}
