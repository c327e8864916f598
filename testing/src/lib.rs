//! # Oneway Testing
//!
//! Testing utilities and helpers for the Oneway dataflow runtime.
//!
//! This crate provides:
//! - Mock implementations of environment traits
//! - Recorders for dispatched payloads and store group changes
//! - Capture of runtime warnings
//! - A reducer-backed fixture store
//! - A fluent harness for use case tests
//! - Property-based testing strategies
//!
//! ## Example
//!
//! ```
//! use oneway_core::prelude::*;
//! use oneway_runtime::prelude::*;
//! use oneway_testing::{PayloadRecorder, ReducerStore};
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
//! # tokio_test::block_on(async {
//! let pings = ReducerStore::new("Pings", 0_u32, |count, payload: &Payload<Ping>| {
//!     payload.as_user().map(|_| count + 1)
//! });
//! let group = StoreGroup::builder().store("pings", pings).build()?;
//! let context = Context::with_store(group);
//! let recorder = PayloadRecorder::attach(context.dispatcher());
//!
//! let ping = FnUseCase::named("Ping", |ctx: UseCaseContext<Ping>, (): ()| {
//!     ctx.dispatch(Ping);
//!     UseCaseOutcome::done()
//! });
//! context.use_case(ping).execute(()).await?;
//!
//! assert_eq!(
//!     recorder.trace(),
//!     vec!["Ping:will", "Ping:ping", "store-changed", "Ping:did", "Ping:complete"]
//! );
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! # }).ok();
//! ```

use chrono::{DateTime, Utc};
use oneway_core::environment::Clock;

pub mod fixtures;
pub mod logs;
pub mod recorder;
pub mod use_case_test;

/// Mock implementations of environment traits
pub mod mocks {
    use super::{Clock, DateTime, Utc};
    use std::rc::Rc;

    /// Fixed clock for deterministic tests
    ///
    /// Always returns the same time, making payload meta reproducible.
    ///
    /// # Example
    ///
    /// ```
    /// use oneway_testing::mocks::FixedClock;
    /// use oneway_core::environment::Clock;
    /// use chrono::Utc;
    ///
    /// let clock = FixedClock::new(Utc::now());
    /// let time1 = clock.now();
    /// let time2 = clock.now();
    /// assert_eq!(time1, time2); // Always the same!
    /// ```
    #[derive(Debug, Clone)]
    pub struct FixedClock {
        time: DateTime<Utc>,
    }

    impl FixedClock {
        /// Create a new fixed clock with the given time
        #[must_use]
        pub const fn new(time: DateTime<Utc>) -> Self {
            Self { time }
        }
    }

    impl Clock for FixedClock {
        fn now(&self) -> DateTime<Utc> {
            self.time
        }
    }

    /// Create a default fixed clock for tests (2025-01-01 00:00:00 UTC)
    ///
    /// # Panics
    ///
    /// This function will panic if the hardcoded timestamp fails to parse,
    /// which should never happen in practice.
    #[must_use]
    #[allow(clippy::expect_used)]
    pub fn test_clock() -> FixedClock {
        FixedClock::new(
            DateTime::parse_from_rfc3339("2025-01-01T00:00:00Z")
                .expect("hardcoded timestamp should always parse")
                .with_timezone(&Utc),
        )
    }

    /// [`test_clock`] in the shape dispatchers take
    #[must_use]
    pub fn shared_test_clock() -> Rc<dyn Clock> {
        Rc::new(test_clock())
    }
}

/// Property-based testing utilities
pub mod properties {
    use proptest::prelude::*;

    /// Indices of a non-repeating, ordered selection out of `stores` stores
    pub fn store_selection(stores: usize) -> impl Strategy<Value = Vec<usize>> {
        proptest::sample::subsequence((0..stores).collect::<Vec<_>>(), 0..=stores)
    }

    /// Small increments, including zero (a no-op for most reducers)
    pub fn increments() -> impl Strategy<Value = Vec<i64>> {
        proptest::collection::vec(0_i64..5, 1..8)
    }
}

// Re-export commonly used items
pub use fixtures::ReducerStore;
pub use logs::LogCapture;
pub use mocks::{FixedClock, shared_test_clock, test_clock};
pub use recorder::{ChangeRecorder, PayloadRecorder, RecordedPayload};
pub use use_case_test::{UseCaseTest, assertions};
