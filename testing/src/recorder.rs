//! Recorders for payloads and store group changes.
//!
//! A recorder subscribes on creation and keeps everything it observed until
//! dropped. [`PayloadRecorder::trace`] renders what was seen as short,
//! comparable strings:
//!
//! | payload            | trace entry              |
//! |--------------------|--------------------------|
//! | will-execute       | `UseCase:will`           |
//! | did-execute        | `UseCase:did`            |
//! | completed          | `UseCase:complete`       |
//! | error              | `UseCase:error`          |
//! | will-not-execute   | `UseCase:will-not`       |
//! | domain payload     | `UseCase:<payload type>` |
//! | transaction began  | `begin:<name>`           |
//! | transaction ended  | `end:<name>`             |
//! | store changed      | `store-changed`          |

use oneway_core::channel::Subscription;
use oneway_core::dispatcher::Dispatcher;
use oneway_core::meta::{PayloadMeta, StoreRef};
use oneway_core::payload::{DomainPayload, Payload, PayloadKind};
use oneway_runtime::context::Context;
use oneway_runtime::executor::UseCaseExecutor;
use oneway_runtime::use_case::UseCase;
use std::cell::RefCell;
use std::rc::Rc;

/// One observed dispatch
#[derive(Debug, Clone)]
pub struct RecordedPayload {
    /// Routing identifier
    pub payload_type: String,
    /// Classification
    pub kind: PayloadKind,
    /// Meta it was dispatched with
    pub meta: PayloadMeta,
    /// Trace entry, see the module documentation
    pub entry: String,
}

impl RecordedPayload {
    fn new<P: DomainPayload>(payload: &Payload<P>, meta: &PayloadMeta) -> Self {
        let use_case = meta.use_case().map_or("", |use_case| use_case.name.as_str());
        let entry = match payload {
            Payload::WillExecuted { .. } => format!("{use_case}:will"),
            Payload::DidExecuted { .. } => format!("{use_case}:did"),
            Payload::Completed { .. } => format!("{use_case}:complete"),
            Payload::Error { .. } => format!("{use_case}:error"),
            Payload::WillNotExecuted { .. } => format!("{use_case}:will-not"),
            Payload::User(user) if use_case.is_empty() => user.payload_type().to_string(),
            Payload::User(user) => format!("{use_case}:{}", user.payload_type()),
            Payload::TransactionBegan { name } => format!("begin:{name}"),
            Payload::TransactionEnded { name } => format!("end:{name}"),
            Payload::StoreChanged { .. } => "store-changed".to_string(),
        };
        Self {
            payload_type: payload.payload_type().to_string(),
            kind: payload.kind(),
            meta: meta.clone(),
            entry,
        }
    }
}

/// Records every payload reaching a dispatcher or an executor
#[derive(Debug)]
pub struct PayloadRecorder {
    seen: Rc<RefCell<Vec<RecordedPayload>>>,
    subscription: Option<Subscription>,
}

impl PayloadRecorder {
    /// Record everything dispatched on `dispatcher`
    #[must_use]
    pub fn attach<P: DomainPayload>(dispatcher: &Dispatcher<P>) -> Self {
        let seen = Rc::new(RefCell::new(Vec::new()));
        let log = Rc::clone(&seen);
        let subscription = dispatcher.on_dispatch(move |payload, meta| {
            log.borrow_mut().push(RecordedPayload::new(payload, meta));
        });
        Self {
            seen,
            subscription: Some(subscription),
        }
    }

    /// Record the payloads of one run and its nested runs
    #[must_use]
    pub fn attach_executor<P: DomainPayload, U: UseCase<P>>(executor: &UseCaseExecutor<P, U>) -> Self {
        let seen = Rc::new(RefCell::new(Vec::new()));
        let log = Rc::clone(&seen);
        let subscription = executor.on_dispatch(move |payload, meta| {
            log.borrow_mut().push(RecordedPayload::new(payload, meta));
        });
        Self {
            seen,
            subscription: Some(subscription),
        }
    }

    /// Everything recorded so far
    #[must_use]
    pub fn payloads(&self) -> Vec<RecordedPayload> {
        self.seen.borrow().clone()
    }

    /// Trace entries, in dispatch order
    #[must_use]
    pub fn trace(&self) -> Vec<String> {
        self.seen.borrow().iter().map(|seen| seen.entry.clone()).collect()
    }

    /// Payload types, in dispatch order
    #[must_use]
    pub fn types(&self) -> Vec<String> {
        self.seen
            .borrow()
            .iter()
            .map(|seen| seen.payload_type.clone())
            .collect()
    }

    /// Recorded payloads of `kind`
    #[must_use]
    pub fn of_kind(&self, kind: PayloadKind) -> Vec<RecordedPayload> {
        self.seen
            .borrow()
            .iter()
            .filter(|seen| seen.kind == kind)
            .cloned()
            .collect()
    }

    /// Number of recorded payloads of `kind`
    #[must_use]
    pub fn count(&self, kind: PayloadKind) -> usize {
        self.seen.borrow().iter().filter(|seen| seen.kind == kind).count()
    }

    /// Forget everything recorded so far
    pub fn clear(&self) {
        self.seen.borrow_mut().clear();
    }

    /// Stop recording; what was recorded stays available
    pub fn detach(&mut self) {
        if let Some(subscription) = self.subscription.take() {
            subscription.unsubscribe();
        }
    }
}

/// Records the stores named by every change notification
#[derive(Debug)]
pub struct ChangeRecorder {
    emissions: Rc<RefCell<Vec<Vec<StoreRef>>>>,
    _subscription: Subscription,
}

impl ChangeRecorder {
    /// Record the changes announced by `context`
    #[must_use]
    pub fn attach<P: DomainPayload>(context: &Context<P>) -> Self {
        let emissions = Rc::new(RefCell::new(Vec::new()));
        let log = Rc::clone(&emissions);
        let subscription = context.on_change(move |stores| log.borrow_mut().push(stores.to_vec()));
        Self {
            emissions,
            _subscription: subscription,
        }
    }

    /// Number of notifications
    #[must_use]
    pub fn count(&self) -> usize {
        self.emissions.borrow().len()
    }

    /// State names of each notification, in order
    #[must_use]
    pub fn emissions(&self) -> Vec<Vec<String>> {
        self.emissions
            .borrow()
            .iter()
            .map(|stores| stores.iter().map(|store| store.state_name.clone()).collect())
            .collect()
    }

    /// Stores named by the latest notification
    #[must_use]
    pub fn last(&self) -> Option<Vec<StoreRef>> {
        self.emissions.borrow().last().cloned()
    }

    /// Forget every recorded notification
    pub fn clear(&self) {
        self.emissions.borrow_mut().clear();
    }
}
