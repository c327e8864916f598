//! Use case execution.
//!
//! A [`UseCaseExecutor`] drives exactly one run of one use case:
//!
//! ```text
//! Created -> WillExecute -> Executing -> DidExecute -> (await) -> Completed -> Released
//! Created -> WillNotExecute -> Released          (should_execute returned false)
//! ```
//!
//! Every payload of a run travels through its [`ExecutionLink`]: first to the
//! run's own listeners, then to the listeners of each ancestor run, then to
//! the bus shared by every run of the same unit of work. Ancestors are found
//! through explicit parent links, so nesting depth never grows a chain of
//! pipes.

use crate::metrics::UseCaseMetrics;
use crate::use_case::{UseCase, UseCaseContext, UseCaseInstance, UseCaseOutcome, UseCaseResult};
use futures::future::LocalBoxFuture;
use oneway_core::channel::Subscription;
use oneway_core::dispatcher::Dispatcher;
use oneway_core::environment::Clock;
use oneway_core::error::UseCaseError;
use oneway_core::meta::{ExecutionId, PayloadMeta, TransactionDescriptor, UseCaseDescriptor, UseCaseId};
use oneway_core::payload::{AnyValue, DomainPayload, Payload};
use oneway_core::warning::Warning;
use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;
use std::task::Poll;
use std::time::Instant;
use tracing::debug;

/// Use case instances with a run in flight, owned by a context
#[derive(Debug, Default)]
pub struct UseCaseInstanceMap {
    runs: RefCell<HashMap<UseCaseId, usize>>,
}

impl UseCaseInstanceMap {
    /// Create an empty map
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a run of `id`. Returns whether another run was already in flight.
    pub fn register(&self, id: UseCaseId) -> bool {
        let mut runs = self.runs.borrow_mut();
        let count = runs.entry(id).or_insert(0);
        *count += 1;
        *count > 1
    }

    /// Forget one run of `id`
    pub fn unregister(&self, id: UseCaseId) {
        let mut runs = self.runs.borrow_mut();
        if let Some(count) = runs.get_mut(&id) {
            *count -= 1;
            if *count == 0 {
                runs.remove(&id);
            }
        }
    }

    /// Whether `id` has a run in flight
    #[must_use]
    pub fn is_in_flight(&self, id: UseCaseId) -> bool {
        self.runs.borrow().contains_key(&id)
    }

    /// Number of instances with a run in flight
    #[must_use]
    pub fn len(&self) -> usize {
        self.runs.borrow().len()
    }

    /// Whether nothing is in flight
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.runs.borrow().is_empty()
    }
}

/// The bus shared by every run of one unit of work.
///
/// The scope stays open while any run created in it is unreleased; the
/// close handlers run when the last one leaves.
pub(crate) struct ExecutionScope<P> {
    bus: Dispatcher<P>,
    transaction: Option<TransactionDescriptor>,
    instances: Rc<UseCaseInstanceMap>,
    active: Cell<usize>,
    closed: Cell<bool>,
    close_handlers: RefCell<Vec<Box<dyn FnOnce()>>>,
}

impl<P: DomainPayload> ExecutionScope<P> {
    pub(crate) fn new(
        clock: Rc<dyn Clock>,
        instances: Rc<UseCaseInstanceMap>,
        transaction: Option<TransactionDescriptor>,
    ) -> Rc<Self> {
        Rc::new(Self {
            bus: Dispatcher::with_clock(clock),
            transaction,
            instances,
            active: Cell::new(0),
            closed: Cell::new(false),
            close_handlers: RefCell::new(Vec::new()),
        })
    }

    pub(crate) const fn bus(&self) -> &Dispatcher<P> {
        &self.bus
    }

    pub(crate) fn on_close(&self, handler: impl FnOnce() + 'static) {
        self.close_handlers.borrow_mut().push(Box::new(handler));
    }

    pub(crate) fn enter(&self) {
        self.active.set(self.active.get() + 1);
    }

    pub(crate) fn leave(&self) {
        let active = self.active.get().saturating_sub(1);
        self.active.set(active);
        if active == 0 && !self.closed.replace(true) {
            let handlers = std::mem::take(&mut *self.close_handlers.borrow_mut());
            for handler in handlers {
                handler();
            }
        }
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed.get()
    }
}

/// One node of the execution tree
pub(crate) struct ExecutionLink<P> {
    descriptor: UseCaseDescriptor,
    parent: Option<Rc<ExecutionLink<P>>>,
    scope: Rc<ExecutionScope<P>>,
    listeners: Dispatcher<P>,
    released: Cell<bool>,
    error_dispatched: Cell<bool>,
    warned_released_parent: Cell<bool>,
}

impl<P> ExecutionLink<P> {
    pub(crate) const fn descriptor(&self) -> &UseCaseDescriptor {
        &self.descriptor
    }

    pub(crate) fn is_released(&self) -> bool {
        self.released.get()
    }
}

impl<P: DomainPayload> ExecutionLink<P> {
    pub(crate) fn now(&self) -> chrono::DateTime<chrono::Utc> {
        self.listeners.clock().now()
    }

    /// Attribute `base` to this run
    pub(crate) fn meta(&self, base: PayloadMeta) -> PayloadMeta {
        base.with_use_case(self.descriptor.clone())
            .with_parent_use_case(self.parent.as_ref().map(|parent| parent.descriptor.clone()))
            .with_dispatcher(self.listeners.id())
            .with_transaction(self.scope.transaction.clone())
    }

    fn lifecycle_meta(&self, finished: bool) -> PayloadMeta {
        self.meta(PayloadMeta::trusted(self.now())).finished(finished)
    }

    pub(crate) fn throw_error(&self, error: UseCaseError) {
        self.error_dispatched.set(true);
        let meta = self.lifecycle_meta(false);
        self.dispatch(Payload::Error { error }, meta);
    }

    /// Own listeners, then every live ancestor, then the shared bus
    pub(crate) fn dispatch(&self, payload: Payload<P>, meta: PayloadMeta) {
        if self.scope.is_closed() {
            Warning::DispatchAfterScopeClosed {
                use_case: self.descriptor.to_string(),
                payload_type: payload.payload_type().to_string(),
            }
            .report();
            return;
        }

        self.listeners.dispatch_with_meta(payload.clone(), meta.clone());

        let mut ancestor = self.parent.as_deref();
        while let Some(link) = ancestor {
            if link.is_released() {
                if !self.warned_released_parent.replace(true) {
                    Warning::ReleasedParent {
                        use_case: self.descriptor.to_string(),
                        parent: link.descriptor.to_string(),
                    }
                    .report();
                }
                break;
            }
            link.listeners.dispatch_with_meta(payload.clone(), meta.clone());
            ancestor = link.parent.as_deref();
        }

        self.scope.bus.dispatch_with_meta(payload, meta);
    }
}

/// Drives one run of one use case.
///
/// Created by [`Context::use_case`](crate::context::Context::use_case),
/// [`TransactionContext::use_case`](crate::context::TransactionContext::use_case)
/// or, for nested runs, [`UseCaseContext::use_case`].
pub struct UseCaseExecutor<P: DomainPayload, U: UseCase<P>> {
    instance: UseCaseInstance<U>,
    link: Rc<ExecutionLink<P>>,
    started: Cell<bool>,
    registered: Cell<bool>,
    completed: Cell<bool>,
}

impl<P: DomainPayload, U: UseCase<P>> UseCaseExecutor<P, U> {
    pub(crate) fn root(instance: UseCaseInstance<U>, scope: Rc<ExecutionScope<P>>) -> Self {
        Self::with_link(instance, scope, None)
    }

    pub(crate) fn child(instance: UseCaseInstance<U>, parent: &Rc<ExecutionLink<P>>) -> Self {
        Self::with_link(instance, Rc::clone(&parent.scope), Some(Rc::clone(parent)))
    }

    fn with_link(
        instance: UseCaseInstance<U>,
        scope: Rc<ExecutionScope<P>>,
        parent: Option<Rc<ExecutionLink<P>>>,
    ) -> Self {
        let descriptor = UseCaseDescriptor {
            id: instance.id(),
            name: instance.get().name().into_owned(),
            execution: ExecutionId::next(),
        };
        scope.enter();
        let listeners = Dispatcher::with_clock(scope.bus().clock());
        Self {
            instance,
            link: Rc::new(ExecutionLink {
                descriptor,
                parent,
                scope,
                listeners,
                released: Cell::new(false),
                error_dispatched: Cell::new(false),
                warned_released_parent: Cell::new(false),
            }),
            started: Cell::new(false),
            registered: Cell::new(false),
            completed: Cell::new(false),
        }
    }

    /// The run this executor drives
    #[must_use]
    pub fn descriptor(&self) -> &UseCaseDescriptor {
        self.link.descriptor()
    }

    /// Observe every payload of this run and of its nested runs, in dispatch order
    pub fn on_dispatch(
        &self,
        handler: impl Fn(&Payload<P>, &PayloadMeta) + 'static,
    ) -> Subscription {
        self.link.listeners.on_dispatch(handler)
    }

    /// Observe errors raised by this run or its nested runs
    pub fn on_error(&self, handler: impl Fn(&UseCaseError, &PayloadMeta) + 'static) -> Subscription {
        self.link.listeners.on_dispatch(move |payload, meta| {
            if let Payload::Error { error } = payload {
                handler(error, meta);
            }
        })
    }

    /// Run the use case.
    ///
    /// Resolves once the run settled and its completion payload was
    /// dispatched. Calling `execute` again on the same executor only reports
    /// a warning.
    ///
    /// # Errors
    ///
    /// Returns the error the use case failed with (after it was dispatched
    /// as an error payload), or the error `should_execute` returned.
    #[tracing::instrument(name = "use_case", skip_all, fields(use_case = %self.link.descriptor()))]
    pub async fn execute(&self, args: U::Args) -> Result<(), UseCaseError> {
        if self.started.replace(true) {
            Warning::DuplicateExecution {
                use_case: self.link.descriptor().to_string(),
            }
            .report();
            return Ok(());
        }

        let result = self.run(args).await;
        self.release();
        result
    }

    async fn run(&self, args: U::Args) -> Result<(), UseCaseError> {
        let link = &self.link;
        let use_case = self.instance.get();

        match use_case.should_execute(&args) {
            Ok(true) => {},
            Ok(false) => {
                debug!("Use case declined to execute");
                UseCaseMetrics::record_skipped();
                link.dispatch(
                    Payload::WillNotExecuted {
                        args: AnyValue::new(args),
                    },
                    link.lifecycle_meta(false),
                );
                return Ok(());
            },
            Err(error) => {
                debug!(%error, "should_execute failed");
                return Err(error);
            },
        }

        if link.scope.instances.register(self.instance.id()) {
            Warning::ConcurrentInstanceExecution {
                use_case: link.descriptor().to_string(),
            }
            .report();
        }
        self.registered.set(true);
        UseCaseMetrics::record_start();
        let started_at = Instant::now();

        debug!("Will execute");
        link.dispatch(
            Payload::WillExecuted {
                args: AnyValue::new(args.clone()),
            },
            link.lifecycle_meta(false),
        );

        let outcome = use_case.execute(UseCaseContext::new(Rc::clone(link)), args);
        let result = match settle_now(outcome).await {
            Ok(result) => {
                if let Err(error) = &result {
                    self.throw_once(error);
                }
                debug!("Did execute, finished");
                link.dispatch(
                    Payload::DidExecuted {
                        value: result.as_ref().ok().cloned().flatten(),
                    },
                    link.lifecycle_meta(true),
                );
                result
            },
            Err(pending) => {
                debug!("Did execute, pending");
                link.dispatch(Payload::DidExecuted { value: None }, link.lifecycle_meta(false));
                let result = pending.await;
                if let Err(error) = &result {
                    self.throw_once(error);
                }
                result
            },
        };

        let value = result.as_ref().ok().cloned().flatten();
        debug!(failed = result.is_err(), "Completed");
        link.dispatch(Payload::Completed { value }, link.lifecycle_meta(true));
        self.finish();

        UseCaseMetrics::record_completion(started_at.elapsed());
        if result.is_err() {
            UseCaseMetrics::record_failure();
        }
        result.map(|_| ())
    }

    fn throw_once(&self, error: &UseCaseError) {
        if !self.link.error_dispatched.get() {
            self.link.throw_error(error.clone());
        }
    }

    fn finish(&self) {
        self.completed.set(true);
        if self.registered.replace(false) {
            self.link.scope.instances.unregister(self.instance.id());
        }
    }

    /// Tear down this run's listeners. Safe to call any number of times.
    ///
    /// Releasing a run that started but never completed (its future was
    /// dropped) dispatches a completion without value so the store group
    /// stops waiting for it.
    pub fn release(&self) {
        if self.link.is_released() {
            return;
        }
        if self.registered.get() && !self.completed.get() {
            debug!(use_case = %self.link.descriptor(), "Releasing an unfinished run");
            self.link.dispatch(Payload::Completed { value: None }, self.link.lifecycle_meta(true));
            self.finish();
        }
        self.link.released.set(true);
        self.link.listeners.clear();
        self.link.scope.leave();
    }

    /// Whether [`release`](Self::release) already ran
    #[must_use]
    pub fn is_released(&self) -> bool {
        self.link.is_released()
    }
}

impl<P: DomainPayload, U: UseCase<P>> Drop for UseCaseExecutor<P, U> {
    fn drop(&mut self) {
        self.release();
    }
}

impl<P: DomainPayload, U: UseCase<P>> fmt::Debug for UseCaseExecutor<P, U> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UseCaseExecutor")
            .field("use_case", self.link.descriptor())
            .field("started", &self.started.get())
            .field("released", &self.link.is_released())
            .finish_non_exhaustive()
    }
}

/// `Ok` with the result if the outcome settles on its first poll, else the
/// still pending future
async fn settle_now<'a>(
    outcome: UseCaseOutcome<'a>,
) -> Result<UseCaseResult, LocalBoxFuture<'a, UseCaseResult>> {
    match outcome {
        UseCaseOutcome::Sync(result) => Ok(result),
        UseCaseOutcome::Pending(mut future) => match futures::poll!(future.as_mut()) {
            Poll::Ready(result) => Ok(result),
            Poll::Pending => Err(future),
        },
    }
}
