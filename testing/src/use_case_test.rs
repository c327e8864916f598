//! Ergonomic testing utilities for use cases
//!
//! This module provides a fluent API for testing use cases with readable
//! Given-When-Then syntax.

#![allow(clippy::module_name_repetitions)] // UseCaseTest is the natural name

use crate::recorder::{ChangeRecorder, PayloadRecorder, RecordedPayload};
use oneway_core::error::UseCaseError;
use oneway_core::payload::DomainPayload;
use oneway_runtime::context::Context;
use oneway_runtime::store_group::GroupState;
use oneway_runtime::use_case::UseCase;

/// Type alias for result assertion functions
type ResultAssertion = Box<dyn FnOnce(&Result<(), UseCaseError>)>;

/// Type alias for state assertion functions
type StateAssertion = Box<dyn FnOnce(&GroupState)>;

/// Type alias for payload assertion functions
type PayloadAssertion = Box<dyn FnOnce(&[RecordedPayload])>;

/// Type alias for change assertion functions
type ChangeAssertion = Box<dyn FnOnce(&[Vec<String>])>;

/// Fluent API for testing use cases with Given-When-Then syntax
///
/// # Example
///
/// ```
/// use oneway_core::prelude::*;
/// use oneway_runtime::prelude::*;
/// use oneway_testing::{ReducerStore, UseCaseTest, assertions};
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
/// # tokio_test::block_on(async {
/// let sum = ReducerStore::new("Sum", 0, |sum, payload: &Payload<Add>| {
///     payload.as_user().map(|Add(n)| sum + n)
/// });
/// let context = Context::with_store(StoreGroup::builder().store("sum", sum).build()?);
///
/// let add = FnUseCase::named("Add", |ctx: UseCaseContext<Add>, n: i32| {
///     ctx.dispatch(Add(n));
///     UseCaseOutcome::done()
/// });
///
/// UseCaseTest::new(add)
///     .given_context(context)
///     .when_executed_with(3)
///     .then_result(|result| assert!(result.is_ok()))
///     .then_state(|state| assert_eq!(state.get::<i32>("sum").as_deref(), Some(&3)))
///     .then_payloads(|payloads| assertions::assert_lifecycle(payloads, "Add"))
///     .then_changes(|changes| assertions::assert_single_change(changes, &["sum"]))
///     .run()
///     .await;
/// # Ok::<(), Box<dyn std::error::Error>>(())
/// # }).ok();
/// ```
pub struct UseCaseTest<P: DomainPayload, U: UseCase<P>> {
    use_case: U,
    context: Option<Context<P>>,
    args: Option<U::Args>,
    result_assertions: Vec<ResultAssertion>,
    state_assertions: Vec<StateAssertion>,
    payload_assertions: Vec<PayloadAssertion>,
    change_assertions: Vec<ChangeAssertion>,
}

impl<P: DomainPayload, U: UseCase<P>> UseCaseTest<P, U> {
    /// Create a new use case test
    #[must_use]
    pub const fn new(use_case: U) -> Self {
        Self {
            use_case,
            context: None,
            args: None,
            result_assertions: Vec::new(),
            state_assertions: Vec::new(),
            payload_assertions: Vec::new(),
            change_assertions: Vec::new(),
        }
    }

    /// Set the context the use case runs in (Given)
    #[must_use]
    pub fn given_context(mut self, context: Context<P>) -> Self {
        self.context = Some(context);
        self
    }

    /// Set the arguments to execute with (When)
    #[must_use]
    pub fn when_executed_with(mut self, args: U::Args) -> Self {
        self.args = Some(args);
        self
    }

    /// Add an assertion about what `execute` returned (Then)
    #[must_use]
    pub fn then_result<F>(mut self, assertion: F) -> Self
    where
        F: FnOnce(&Result<(), UseCaseError>) + 'static,
    {
        self.result_assertions.push(Box::new(assertion));
        self
    }

    /// Add an assertion about the resulting composite state (Then)
    #[must_use]
    pub fn then_state<F>(mut self, assertion: F) -> Self
    where
        F: FnOnce(&GroupState) + 'static,
    {
        self.state_assertions.push(Box::new(assertion));
        self
    }

    /// Add an assertion about the payloads reaching the root dispatcher (Then)
    #[must_use]
    pub fn then_payloads<F>(mut self, assertion: F) -> Self
    where
        F: FnOnce(&[RecordedPayload]) + 'static,
    {
        self.payload_assertions.push(Box::new(assertion));
        self
    }

    /// Add an assertion about the change notifications, as state names (Then)
    #[must_use]
    pub fn then_changes<F>(mut self, assertion: F) -> Self
    where
        F: FnOnce(&[Vec<String>]) + 'static,
    {
        self.change_assertions.push(Box::new(assertion));
        self
    }

    /// Run the use case and execute all assertions
    ///
    /// # Panics
    ///
    /// Panics if the context or the arguments are not set, or if any
    /// assertion fails.
    #[allow(clippy::panic)] // Test code can panic
    #[allow(clippy::expect_used)] // Test code can use expect
    pub async fn run(self) {
        let context = self
            .context
            .expect("Context must be set with given_context()");

        let args = self
            .args
            .expect("Arguments must be set with when_executed_with()");

        let payloads = PayloadRecorder::attach(context.dispatcher());
        let changes = ChangeRecorder::attach(&context);

        // Execute use case
        let result = context.use_case(self.use_case).execute(args).await;

        // Run result assertions
        for assertion in self.result_assertions {
            assertion(&result);
        }

        // Run state assertions
        let state = context.get_state();
        for assertion in self.state_assertions {
            assertion(&state);
        }

        // Run payload assertions
        let recorded = payloads.payloads();
        for assertion in self.payload_assertions {
            assertion(&recorded);
        }

        // Run change assertions
        let emissions = changes.emissions();
        for assertion in self.change_assertions {
            assertion(&emissions);
        }
    }
}

/// Helper assertions for recorded payloads and changes
pub mod assertions {
    use crate::recorder::RecordedPayload;
    use oneway_core::payload::PayloadKind;

    /// Assert the exact trace of recorded payloads
    ///
    /// # Panics
    ///
    /// Panics if the trace differs from `expected`.
    #[allow(clippy::panic)] // Test assertion
    pub fn assert_trace(payloads: &[RecordedPayload], expected: &[&str]) {
        let trace: Vec<&str> = payloads.iter().map(|seen| seen.entry.as_str()).collect();
        assert_eq!(trace, expected, "Unexpected payload trace");
    }

    /// Assert that `use_case` went through will-execute, did-execute and
    /// completed exactly once each, in that order, and dispatched nothing
    /// after completing
    ///
    /// # Panics
    ///
    /// Panics if the lifecycle of `use_case` is incomplete or out of order.
    #[allow(clippy::panic)] // Test assertion
    pub fn assert_lifecycle(payloads: &[RecordedPayload], use_case: &str) {
        let own: Vec<&RecordedPayload> = payloads
            .iter()
            .filter(|seen| {
                seen.meta
                    .use_case()
                    .is_some_and(|descriptor| descriptor.name == use_case)
            })
            .collect();
        let position = |kind: PayloadKind| {
            let matching: Vec<usize> = own
                .iter()
                .enumerate()
                .filter(|(_, seen)| seen.kind == kind)
                .map(|(index, _)| index)
                .collect();
            assert_eq!(
                matching.len(),
                1,
                "Expected exactly one {kind:?} for {use_case}, found {}",
                matching.len()
            );
            matching[0]
        };

        let will = position(PayloadKind::WillExecuted);
        let did = position(PayloadKind::DidExecuted);
        let complete = position(PayloadKind::Completed);
        assert!(
            will < did && did < complete,
            "{use_case} lifecycle out of order: will={will} did={did} complete={complete}"
        );
        assert_eq!(
            complete,
            own.len() - 1,
            "{use_case} dispatched after completing"
        );
    }

    /// Assert that no change was announced
    ///
    /// # Panics
    ///
    /// Panics if any change notification was recorded.
    #[allow(clippy::panic)] // Test assertion
    pub fn assert_no_changes(changes: &[Vec<String>]) {
        assert!(
            changes.is_empty(),
            "Expected no changes, but found {}: {:?}",
            changes.len(),
            changes
        );
    }

    /// Assert exactly one change notification naming `expected`, in order
    ///
    /// # Panics
    ///
    /// Panics if the number of notifications or the named stores differ.
    #[allow(clippy::panic)] // Test assertion
    pub fn assert_single_change(changes: &[Vec<String>], expected: &[&str]) {
        assert_eq!(
            changes.len(),
            1,
            "Expected one change, but found {}: {:?}",
            changes.len(),
            changes
        );
        assert_eq!(changes[0], expected, "Unexpected stores in the change");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::ReducerStore;
    use oneway_core::payload::{Payload, PayloadKind};
    use oneway_runtime::store_group::StoreGroup;
    use oneway_runtime::use_case::{FnUseCase, UseCaseContext, UseCaseOutcome};

    #[derive(Clone, Debug)]
    enum TestPayload {
        Increment,
        Decrement,
    }

    impl DomainPayload for TestPayload {
        fn payload_type(&self) -> &str {
            match self {
                Self::Increment => "increment",
                Self::Decrement => "decrement",
            }
        }
    }

    fn context() -> Context<TestPayload> {
        let count = ReducerStore::new("Count", 0_i32, |count, payload: &Payload<TestPayload>| {
            match payload.as_user()? {
                TestPayload::Increment => Some(count + 1),
                TestPayload::Decrement => Some(count - 1),
            }
        });
        match StoreGroup::builder().store("count", count).build() {
            Ok(group) => Context::with_store(group),
            Err(error) => unreachable!("{error}"),
        }
    }

    fn send(
        payload: TestPayload,
    ) -> FnUseCase<(), impl Fn(UseCaseContext<TestPayload>, ()) -> UseCaseOutcome<'static>> {
        FnUseCase::named("Send", move |ctx: UseCaseContext<TestPayload>, (): ()| {
            ctx.dispatch(payload.clone());
            UseCaseOutcome::done()
        })
    }

    #[tokio::test]
    async fn test_use_case_test_increment() {
        UseCaseTest::new(send(TestPayload::Increment))
            .given_context(context())
            .when_executed_with(())
            .then_state(|state| {
                assert_eq!(state.get::<i32>("count").as_deref(), Some(&1));
            })
            .then_changes(|changes| {
                assertions::assert_single_change(changes, &["count"]);
            })
            .run()
            .await;
    }

    #[tokio::test]
    async fn test_use_case_test_decrement() {
        UseCaseTest::new(send(TestPayload::Decrement))
            .given_context(context())
            .when_executed_with(())
            .then_state(|state| {
                assert_eq!(state.get::<i32>("count").as_deref(), Some(&-1));
            })
            .then_payloads(|payloads| {
                assertions::assert_lifecycle(payloads, "Send");
                assert_eq!(
                    payloads.iter().filter(|seen| seen.kind == PayloadKind::User).count(),
                    1
                );
            })
            .run()
            .await;
    }

    #[tokio::test]
    async fn test_use_case_test_failure() {
        let fail = FnUseCase::named("Fail", |_ctx: UseCaseContext<TestPayload>, (): ()| {
            UseCaseOutcome::fail(UseCaseError::domain("nope"))
        });
        UseCaseTest::new(fail)
            .given_context(context())
            .when_executed_with(())
            .then_result(|result| assert!(result.is_err()))
            .then_changes(assertions::assert_no_changes)
            .run()
            .await;
    }

    #[test]
    fn test_assertions_trace() {
        assertions::assert_trace(&[], &[]);
        assertions::assert_no_changes(&[]);
    }
}
