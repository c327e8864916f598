//! The context - composition root of an application.
//!
//! A [`Context`] binds a root [`Dispatcher`] to a store group. It creates
//! executors for use cases (each in its own auto-commit unit of work),
//! runs transactions, exposes the composite state and lets observers follow
//! every run.
//!
//! Payload flow for `context.use_case(u).execute(args)`:
//!
//! ```text
//! run -> execution scope bus -> unit of work -> store group (write/read phase)
//!                            \-> root dispatcher -> observers
//! ```

use crate::config::ContextConfig;
use crate::executor::{ExecutionScope, UseCaseExecutor, UseCaseInstanceMap};
use crate::store_group::{GroupState, StoreGroupLike};
use crate::unit_of_work::{CommitMode, UnitOfWork};
use crate::use_case::{UseCase, UseCaseInstance};
use oneway_core::channel::Subscription;
use oneway_core::dispatcher::Dispatcher;
use oneway_core::error::UseCaseError;
use oneway_core::meta::{PayloadMeta, StoreRef, TransactionDescriptor, TransactionId};
use oneway_core::payload::{AnyValue, DomainPayload, Payload};
use std::cell::{Cell, RefCell};
use std::fmt;
use std::future::Future;
use std::rc::Rc;
use tracing::Instrument;

struct ContextInner<P: DomainPayload> {
    dispatcher: Dispatcher<P>,
    group: Rc<dyn StoreGroupLike<P>>,
    instances: Rc<UseCaseInstanceMap>,
    config: ContextConfig,
    subscriptions: RefCell<Vec<Subscription>>,
    released: Cell<bool>,
}

/// Composition root: dispatcher, store group and use case execution
///
/// Cloning yields another handle to the same context.
///
/// # Example
///
/// ```
/// use oneway_core::prelude::*;
/// use oneway_runtime::prelude::*;
/// use std::rc::Rc;
///
/// #[derive(Debug, Clone)]
/// struct Inc;
///
/// impl DomainPayload for Inc {
///     fn payload_type(&self) -> &str {
///         "inc"
///     }
/// }
///
/// struct CountStore {
///     core: StoreCore<Inc, i64>,
/// }
///
/// impl Store<Inc> for CountStore {
///     type State = i64;
///
///     fn core(&self) -> &StoreCore<Inc, i64> {
///         &self.core
///     }
///
///     fn receive_payload(&self, payload: &Payload<Inc>, _meta: &PayloadMeta) {
///         if payload.as_user().is_some() {
///             self.update_state(|count| count + 1);
///         }
///     }
/// }
///
/// struct Increment;
///
/// impl UseCase<Inc> for Increment {
///     type Args = ();
///
///     fn execute<'a>(&'a self, ctx: UseCaseContext<Inc>, (): ()) -> UseCaseOutcome<'a> {
///         ctx.dispatch(Inc);
///         UseCaseOutcome::done()
///     }
/// }
///
/// # tokio_test::block_on(async {
/// let store = Rc::new(CountStore { core: StoreCore::new("CountStore", 0) });
/// let group = StoreGroup::builder().store("count", store).build()?;
/// let context = Context::with_store(group);
///
/// context.use_case(Increment).execute(()).await?;
/// assert_eq!(context.get_state().get::<i64>("count").as_deref(), Some(&1));
/// # Ok::<(), Box<dyn std::error::Error>>(())
/// # }).ok();
/// ```
pub struct Context<P: DomainPayload> {
    inner: Rc<ContextInner<P>>,
}

impl<P: DomainPayload> Context<P> {
    /// Bind `dispatcher` and `store`
    #[must_use]
    pub fn new(
        dispatcher: Dispatcher<P>,
        store: impl StoreGroupLike<P> + 'static,
        config: ContextConfig,
    ) -> Self {
        let group: Rc<dyn StoreGroupLike<P>> = Rc::new(store);
        group.apply_config(&config);

        let announce = dispatcher.clone();
        let broadcast = group.on_change(Box::new(move |stores: &[StoreRef]| {
            let meta = PayloadMeta::trusted(announce.clock().now()).with_dispatcher(announce.id());
            announce.dispatch_with_meta(
                Payload::StoreChanged {
                    stores: stores.to_vec(),
                },
                meta,
            );
        }));

        tracing::debug!(strict = config.strict, "Context created");
        Self {
            inner: Rc::new(ContextInner {
                dispatcher,
                group,
                instances: Rc::new(UseCaseInstanceMap::new()),
                config,
                subscriptions: RefCell::new(vec![broadcast]),
                released: Cell::new(false),
            }),
        }
    }

    /// Bind `store` to a fresh dispatcher with the default configuration
    #[must_use]
    pub fn with_store(store: impl StoreGroupLike<P> + 'static) -> Self {
        Self::new(Dispatcher::new(), store, ContextConfig::default())
    }

    /// Prepare a run of `use_case` in its own auto-commit unit of work
    #[must_use]
    pub fn use_case<U: UseCase<P>>(&self, use_case: U) -> UseCaseExecutor<P, U> {
        self.use_case_shared(&UseCaseInstance::new(use_case))
    }

    /// Prepare a run of a shared use case instance
    #[must_use]
    pub fn use_case_shared<U: UseCase<P>>(
        &self,
        instance: &UseCaseInstance<U>,
    ) -> UseCaseExecutor<P, U> {
        let scope = ExecutionScope::new(
            self.inner.dispatcher.clock(),
            Rc::clone(&self.inner.instances),
            None,
        );
        let unit = UnitOfWork::new(Rc::clone(&self.inner.group), CommitMode::AutoCommit);
        let to_unit = unit.open(scope.bus());
        let to_root = scope.bus().pipe(&self.inner.dispatcher);
        scope.on_close(move || {
            to_unit.unsubscribe();
            to_root.unsubscribe();
            unit.release();
        });
        UseCaseExecutor::root(instance.clone(), scope)
    }

    /// Run `committer` inside a transaction.
    ///
    /// Use cases started through the [`TransactionContext`] queue their
    /// payloads; only [`TransactionContext::commit`] hands them to the store
    /// group, and the group announces the accumulated changes once, when the
    /// transaction ends. Payloads never committed are discarded.
    ///
    /// Resolves with whatever `committer` resolves with. If the returned
    /// future is dropped early the transaction is still flushed and ended.
    pub async fn transaction<F, Fut, T>(&self, name: impl Into<String>, committer: F) -> T
    where
        F: FnOnce(TransactionContext<P>) -> Fut,
        Fut: Future<Output = T>,
    {
        let descriptor = TransactionDescriptor {
            id: TransactionId::next(),
            name: name.into(),
        };
        let span = tracing::debug_span!(
            "transaction",
            name = %descriptor.name,
            id = %descriptor.id
        );

        let unit = UnitOfWork::for_transaction(
            Rc::clone(&self.inner.group),
            descriptor.clone(),
            self.inner.dispatcher.clone(),
        );
        let scope = ExecutionScope::new(
            self.inner.dispatcher.clock(),
            Rc::clone(&self.inner.instances),
            Some(descriptor.clone()),
        );
        let to_unit = unit.open(scope.bus());
        let to_root = scope.bus().pipe(&self.inner.dispatcher);
        {
            let unit = Rc::clone(&unit);
            scope.on_close(move || {
                to_unit.unsubscribe();
                to_root.unsubscribe();
                unit.release();
            });
        }

        scope.enter();
        span.in_scope(|| unit.begin_transaction());
        let guard = TransactionGuard {
            unit: Rc::clone(&unit),
            scope: Rc::clone(&scope),
            finished: false,
        };

        let tx = TransactionContext {
            inner: Rc::new(TransactionInner {
                descriptor,
                unit,
                scope,
            }),
        };
        let output = committer(tx).instrument(span.clone()).await;
        span.in_scope(|| guard.finish());
        output
    }

    /// Current composite state
    #[must_use]
    pub fn get_state(&self) -> GroupState {
        self.inner.group.get_state()
    }

    /// Subscribe to store group changes
    pub fn on_change(&self, handler: impl Fn(&[StoreRef]) + 'static) -> Subscription {
        self.inner.group.on_change(Box::new(handler))
    }

    /// Observe every will-execute payload
    pub fn on_will_execute_each_use_case(
        &self,
        handler: impl Fn(&AnyValue, &PayloadMeta) + 'static,
    ) -> Subscription {
        self.inner.dispatcher.on_dispatch(move |payload, meta| {
            if let Payload::WillExecuted { args } = payload {
                handler(args, meta);
            }
        })
    }

    /// Observe every did-execute payload
    pub fn on_did_execute_each_use_case(
        &self,
        handler: impl Fn(Option<&AnyValue>, &PayloadMeta) + 'static,
    ) -> Subscription {
        self.inner.dispatcher.on_dispatch(move |payload, meta| {
            if let Payload::DidExecuted { value } = payload {
                handler(value.as_ref(), meta);
            }
        })
    }

    /// Observe every completion payload
    pub fn on_complete_each_use_case(
        &self,
        handler: impl Fn(Option<&AnyValue>, &PayloadMeta) + 'static,
    ) -> Subscription {
        self.inner.dispatcher.on_dispatch(move |payload, meta| {
            if let Payload::Completed { value } = payload {
                handler(value.as_ref(), meta);
            }
        })
    }

    /// Observe every run declined by `should_execute`
    pub fn on_will_not_execute_each_use_case(
        &self,
        handler: impl Fn(&AnyValue, &PayloadMeta) + 'static,
    ) -> Subscription {
        self.inner.dispatcher.on_dispatch(move |payload, meta| {
            if let Payload::WillNotExecuted { args } = payload {
                handler(args, meta);
            }
        })
    }

    /// Observe every error payload
    pub fn on_error_dispatch(
        &self,
        handler: impl Fn(&UseCaseError, &PayloadMeta) + 'static,
    ) -> Subscription {
        self.inner.dispatcher.on_dispatch(move |payload, meta| {
            if let Payload::Error { error } = payload {
                handler(error, meta);
            }
        })
    }

    /// Observe domain payloads dispatched by use cases
    pub fn on_dispatch(&self, handler: impl Fn(&P, &PayloadMeta) + 'static) -> Subscription {
        self.inner.dispatcher.on_dispatch(move |payload, meta| {
            if let (Some(payload), false) = (payload.as_user(), meta.is_trusted()) {
                handler(payload, meta);
            }
        })
    }

    /// The root dispatcher every run is piped to
    #[must_use]
    pub fn dispatcher(&self) -> &Dispatcher<P> {
        &self.inner.dispatcher
    }

    /// The configuration the context was created with
    #[must_use]
    pub fn config(&self) -> &ContextConfig {
        &self.inner.config
    }

    /// Number of use case instances with a run in flight
    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.inner.instances.len()
    }

    /// Release the store group and drop every observer
    pub fn release(&self) {
        if self.inner.released.replace(true) {
            return;
        }
        for subscription in std::mem::take(&mut *self.inner.subscriptions.borrow_mut()) {
            subscription.unsubscribe();
        }
        self.inner.group.release();
        self.inner.dispatcher.clear();
        tracing::debug!("Context released");
    }
}

impl<P: DomainPayload> Clone for Context<P> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<P: DomainPayload> fmt::Debug for Context<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("dispatcher", &self.inner.dispatcher)
            .field("state", &self.get_state())
            .field("config", &self.inner.config)
            .finish_non_exhaustive()
    }
}

struct TransactionInner<P: DomainPayload> {
    descriptor: TransactionDescriptor,
    unit: Rc<UnitOfWork<P>>,
    scope: Rc<ExecutionScope<P>>,
}

/// Handle passed to a transaction's committer
///
/// Cloning is cheap; a clone may be moved into nested futures.
pub struct TransactionContext<P: DomainPayload> {
    inner: Rc<TransactionInner<P>>,
}

impl<P: DomainPayload> TransactionContext<P> {
    /// Prepare a run whose payloads wait for [`commit`](Self::commit)
    #[must_use]
    pub fn use_case<U: UseCase<P>>(&self, use_case: U) -> UseCaseExecutor<P, U> {
        self.use_case_shared(&UseCaseInstance::new(use_case))
    }

    /// Prepare a run of a shared use case instance
    #[must_use]
    pub fn use_case_shared<U: UseCase<P>>(
        &self,
        instance: &UseCaseInstance<U>,
    ) -> UseCaseExecutor<P, U> {
        UseCaseExecutor::root(instance.clone(), Rc::clone(&self.inner.scope))
    }

    /// Hand every queued payload to the store group, in dispatch order.
    ///
    /// Returns how many payloads were committed.
    pub fn commit(&self) -> usize {
        let committed = self.inner.unit.commit();
        tracing::debug!(committed, "Transaction committed");
        committed
    }

    /// Payloads queued since the last commit
    #[must_use]
    pub fn pending(&self) -> usize {
        self.inner.unit.pending()
    }

    /// The transaction
    #[must_use]
    pub fn descriptor(&self) -> &TransactionDescriptor {
        &self.inner.descriptor
    }
}

impl<P: DomainPayload> Clone for TransactionContext<P> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<P: DomainPayload> fmt::Debug for TransactionContext<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransactionContext")
            .field("transaction", &self.inner.descriptor)
            .field("unit", &self.inner.unit)
            .finish_non_exhaustive()
    }
}

/// Ends a transaction even when its future is dropped
struct TransactionGuard<P: DomainPayload> {
    unit: Rc<UnitOfWork<P>>,
    scope: Rc<ExecutionScope<P>>,
    finished: bool,
}

impl<P: DomainPayload> TransactionGuard<P> {
    fn finish(mut self) {
        self.finished = true;
        self.unit.end_transaction();
        self.unit.release();
        self.scope.leave();
    }
}

impl<P: DomainPayload> Drop for TransactionGuard<P> {
    fn drop(&mut self) {
        if !self.finished {
            self.unit.release();
            self.scope.leave();
        }
    }
}
