//! # Counter Demo
//!
//! A counter built on Oneway's unidirectional flow:
//!
//! - Use cases dispatch [`CounterPayload`]s
//! - [`CounterStore`] and [`HistoryStore`] fold committed payloads into state
//! - The store group announces one change per settled run
//! - Transactions batch several runs into a single change
//!
//! ## Example
//!
//! ```
//! use counter::{CounterApp, Increment};
//! use oneway_testing::shared_test_clock;
//!
//! # tokio_test::block_on(async {
//! let app = CounterApp::new(shared_test_clock()).expect("valid stores");
//! app.context().use_case(Increment).execute(2).await.expect("increment");
//! assert_eq!(app.count(), 2);
//! # });
//! ```

use chrono::{DateTime, Utc};
use oneway_core::prelude::*;
use oneway_runtime::prelude::*;
use std::rc::Rc;
use std::time::Duration;
use thiserror::Error;

/// State name of the counter store
pub const COUNTER: &str = "counter";
/// State name of the history store
pub const HISTORY: &str = "history";

// ============================================================================
// Payloads
// ============================================================================

/// Facts dispatched by the counter's use cases
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CounterPayload {
    /// The count went up
    Incremented {
        /// Amount added
        by: i64,
    },
    /// The count went down
    Decremented {
        /// Amount subtracted
        by: i64,
    },
    /// The count went back to zero
    Reset,
}

impl DomainPayload for CounterPayload {
    fn payload_type(&self) -> &str {
        match self {
            Self::Incremented { .. } => "counter/incremented",
            Self::Decremented { .. } => "counter/decremented",
            Self::Reset => "counter/reset",
        }
    }
}

/// Failures raised by counter use cases
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CounterError {
    /// Decrementing would take the count below zero
    #[error("cannot decrement {by} from {count}")]
    Underflow {
        /// Count at the time of the attempt
        count: i64,
        /// Requested amount
        by: i64,
    },
}

// ============================================================================
// Stores
// ============================================================================

/// Counter state
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CounterState {
    /// Current count value
    pub count: i64,
}

/// Holds the current count
pub struct CounterStore {
    core: StoreCore<CounterPayload, CounterState>,
}

impl CounterStore {
    /// A counter starting at zero
    #[must_use]
    pub fn new() -> Rc<Self> {
        Rc::new(Self {
            core: StoreCore::new("CounterStore", CounterState::default()),
        })
    }
}

impl Store<CounterPayload> for CounterStore {
    type State = CounterState;

    fn core(&self) -> &StoreCore<CounterPayload, CounterState> {
        &self.core
    }

    fn receive_payload(&self, payload: &Payload<CounterPayload>, _meta: &PayloadMeta) {
        let Some(payload) = payload.as_user() else {
            return;
        };
        self.update_state(|state| match payload {
            CounterPayload::Incremented { by } => CounterState {
                count: state.count + by,
            },
            CounterPayload::Decremented { by } => CounterState {
                count: state.count - by,
            },
            CounterPayload::Reset => CounterState::default(),
        });
    }
}

/// One line of the counter's history
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryEntry {
    /// Payload type, or `error` for a failed run
    pub kind: String,
    /// Use case that produced it
    pub use_case: Option<String>,
    /// When it was dispatched
    pub at: DateTime<Utc>,
}

/// Records every counter payload and every failure
pub struct HistoryStore {
    core: StoreCore<CounterPayload, Vec<HistoryEntry>>,
}

impl HistoryStore {
    /// An empty history
    #[must_use]
    pub fn new() -> Rc<Self> {
        Rc::new(Self {
            core: StoreCore::new("HistoryStore", Vec::new()),
        })
    }
}

impl Store<CounterPayload> for HistoryStore {
    type State = Vec<HistoryEntry>;

    fn core(&self) -> &StoreCore<CounterPayload, Vec<HistoryEntry>> {
        &self.core
    }

    fn receive_payload(&self, payload: &Payload<CounterPayload>, meta: &PayloadMeta) {
        let kind = match payload {
            Payload::User(payload) => payload.payload_type(),
            Payload::Error { .. } => "error",
            _ => return,
        };
        let entry = HistoryEntry {
            kind: kind.to_string(),
            use_case: meta.use_case().map(|descriptor| descriptor.name.to_string()),
            at: meta.timestamp(),
        };
        self.update_state(|history| {
            let mut next = history.clone();
            next.push(entry);
            next
        });
    }
}

// ============================================================================
// Use Cases
// ============================================================================

/// Add to the count. Zero is declined; negative amounts are invalid.
pub struct Increment;

impl UseCase<CounterPayload> for Increment {
    type Args = i64;

    fn should_execute(&self, by: &i64) -> Result<bool, UseCaseError> {
        if *by < 0 {
            return Err(UseCaseError::invalid_usage(format!(
                "increment by a negative amount ({by})"
            )));
        }
        Ok(*by > 0)
    }

    fn execute<'a>(&'a self, ctx: UseCaseContext<CounterPayload>, by: i64) -> UseCaseOutcome<'a> {
        ctx.dispatch(CounterPayload::Incremented { by });
        UseCaseOutcome::value(by)
    }
}

/// Subtract from the count, failing instead of going below zero
pub struct Decrement {
    counter: Rc<CounterStore>,
}

impl Decrement {
    /// Check against `counter` before decrementing
    #[must_use]
    pub const fn new(counter: Rc<CounterStore>) -> Self {
        Self { counter }
    }
}

impl UseCase<CounterPayload> for Decrement {
    type Args = i64;

    fn execute<'a>(&'a self, ctx: UseCaseContext<CounterPayload>, by: i64) -> UseCaseOutcome<'a> {
        let count = self.counter.get_state().count;
        if count < by {
            return UseCaseOutcome::fail(DomainError::new(CounterError::Underflow { count, by }));
        }
        ctx.dispatch(CounterPayload::Decremented { by });
        UseCaseOutcome::done()
    }
}

/// Back to zero
pub struct Reset;

impl UseCase<CounterPayload> for Reset {
    type Args = ();

    fn execute<'a>(&'a self, ctx: UseCaseContext<CounterPayload>, (): ()) -> UseCaseOutcome<'a> {
        ctx.dispatch(CounterPayload::Reset);
        UseCaseOutcome::done()
    }
}

/// Increment once the delay elapsed
pub struct IncrementLater {
    delay: Duration,
}

impl IncrementLater {
    /// Wait `delay` before incrementing
    #[must_use]
    pub const fn new(delay: Duration) -> Self {
        Self { delay }
    }
}

impl UseCase<CounterPayload> for IncrementLater {
    type Args = i64;

    fn execute<'a>(&'a self, ctx: UseCaseContext<CounterPayload>, by: i64) -> UseCaseOutcome<'a> {
        UseCaseOutcome::pending(async move {
            tokio::time::sleep(self.delay).await;
            ctx.dispatch(CounterPayload::Incremented { by });
            Ok(None)
        })
    }
}

/// Increment by one, `times` times, through nested [`Increment`] runs
pub struct IncrementMany;

impl UseCase<CounterPayload> for IncrementMany {
    type Args = u32;

    fn execute<'a>(&'a self, ctx: UseCaseContext<CounterPayload>, times: u32) -> UseCaseOutcome<'a> {
        UseCaseOutcome::pending(async move {
            for _ in 0..times {
                ctx.use_case(Increment).execute(1).await?;
            }
            Ok(Some(AnyValue::new(times)))
        })
    }
}

// ============================================================================
// Application
// ============================================================================

/// A context wired to the counter and history stores
pub struct CounterApp {
    context: Context<CounterPayload>,
    counter: Rc<CounterStore>,
}

impl CounterApp {
    /// Build the app with the default configuration
    ///
    /// # Errors
    ///
    /// Returns [`ContextError`] if the store group cannot be built.
    pub fn new(clock: Rc<dyn Clock>) -> Result<Self, ContextError> {
        Self::with_config(clock, ContextConfig::default())
    }

    /// Build the app with `config`
    ///
    /// # Errors
    ///
    /// Returns [`ContextError`] if the store group cannot be built.
    pub fn with_config(clock: Rc<dyn Clock>, config: ContextConfig) -> Result<Self, ContextError> {
        let counter = CounterStore::new();
        let group = StoreGroup::builder()
            .store(COUNTER, Rc::clone(&counter))
            .store(HISTORY, HistoryStore::new())
            .build()?;
        let context = Context::new(Dispatcher::with_clock(clock), group, config);
        tracing::info!("Counter app ready");
        Ok(Self { context, counter })
    }

    /// The context runs go through
    #[must_use]
    pub const fn context(&self) -> &Context<CounterPayload> {
        &self.context
    }

    /// A decrement use case bound to this app's counter
    #[must_use]
    pub fn decrement(&self) -> Decrement {
        Decrement::new(Rc::clone(&self.counter))
    }

    /// Count as last announced by the store group
    #[must_use]
    pub fn count(&self) -> i64 {
        self.context
            .get_state()
            .get::<CounterState>(COUNTER)
            .map_or(0, |state| state.count)
    }

    /// History as last announced by the store group
    #[must_use]
    pub fn history(&self) -> Vec<HistoryEntry> {
        self.context
            .get_state()
            .get::<Vec<HistoryEntry>>(HISTORY)
            .map(|history| history.as_ref().clone())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)] // Test code can use unwrap

    use super::*;
    use oneway_testing::{ChangeRecorder, shared_test_clock, test_clock};

    fn app() -> CounterApp {
        CounterApp::new(shared_test_clock()).unwrap()
    }

    #[tokio::test]
    async fn increment_updates_both_stores_in_one_change() {
        let app = app();
        let changes = ChangeRecorder::attach(app.context());

        app.context().use_case(Increment).execute(3).await.unwrap();

        assert_eq!(app.count(), 3);
        assert_eq!(
            changes.emissions(),
            vec![vec![COUNTER.to_string(), HISTORY.to_string()]]
        );
        assert_eq!(
            app.history(),
            vec![HistoryEntry {
                kind: "counter/incremented".to_string(),
                use_case: Some("Increment".to_string()),
                at: test_clock().now(),
            }]
        );
    }

    #[tokio::test]
    async fn zero_increment_is_declined() {
        let app = app();
        let changes = ChangeRecorder::attach(app.context());

        app.context().use_case(Increment).execute(0).await.unwrap();

        assert_eq!(changes.count(), 0);
    }

    #[tokio::test]
    async fn negative_increment_is_invalid() {
        let app = app();
        let error = app.context().use_case(Increment).execute(-1).await.unwrap_err();
        assert!(matches!(error, UseCaseError::InvalidUsage(_)));
    }

    #[tokio::test]
    async fn underflow_is_recorded_as_error() {
        let app = app();
        let error = app.context().use_case(app.decrement()).execute(1).await.unwrap_err();

        assert_eq!(
            error.as_domain().unwrap().downcast_ref::<CounterError>(),
            Some(&CounterError::Underflow { count: 0, by: 1 })
        );
        assert_eq!(app.count(), 0);
        assert_eq!(app.history()[0].kind, "error");
    }

    #[test]
    fn duplicate_state_names_are_rejected() {
        let result = StoreGroup::<CounterPayload>::builder()
            .store(COUNTER, CounterStore::new())
            .store(COUNTER, CounterStore::new())
            .build();
        assert!(matches!(result, Err(ContextError::DuplicateStateName(_))));
    }
}
