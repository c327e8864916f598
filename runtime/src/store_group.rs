//! Store groups - the reconciliation engine.
//!
//! A [`StoreGroup`] aggregates named stores into one composite
//! [`GroupState`]. Every committed payload runs through two phases:
//!
//! 1. **Write phase**: each store, in registration order, receives the
//!    payload through `receive_payload`.
//! 2. **Read phase**: each store's `get_state` is compared with the cached
//!    state; changed stores replace their cache entry.
//!
//! A change is announced once per execution cycle: while any use case run
//! is pending (started but not finished) or a transaction is open, read
//! phases are deferred and store signals are only recorded. The emission
//! lists exactly the stores that changed, in registration order.
//!
//! # Example
//!
//! ```
//! use oneway_core::prelude::*;
//! use oneway_runtime::store_group::StoreGroup;
//! use std::rc::Rc;
//!
//! #[derive(Debug, Clone)]
//! struct Inc;
//!
//! impl DomainPayload for Inc {
//!     fn payload_type(&self) -> &str {
//!         "inc"
//!     }
//! }
//!
//! struct CountStore {
//!     core: StoreCore<Inc, i64>,
//! }
//!
//! impl Store<Inc> for CountStore {
//!     type State = i64;
//!
//!     fn core(&self) -> &StoreCore<Inc, i64> {
//!         &self.core
//!     }
//!
//!     fn receive_payload(&self, payload: &Payload<Inc>, _meta: &PayloadMeta) {
//!         if payload.as_user().is_some() {
//!             self.update_state(|count| count + 1);
//!         }
//!     }
//! }
//!
//! let store = Rc::new(CountStore { core: StoreCore::new("CountStore", 0) });
//! let group = StoreGroup::builder().store("count", Rc::clone(&store)).build()?;
//!
//! group.commit(&Payload::User(Inc), &PayloadMeta::untrusted(chrono::Utc::now()));
//! assert_eq!(group.get_state().get::<i64>("count").as_deref(), Some(&1));
//! # Ok::<(), oneway_runtime::error::ContextError>(())
//! ```

use crate::config::{ContextConfig, DEFAULT_MAX_RECONCILE_PASSES};
use crate::error::ContextError;
use crate::metrics::StoreGroupMetrics;
use oneway_core::channel::{EventChannel, Subscription};
use oneway_core::meta::{ExecutionId, PayloadMeta, StoreRef, TransactionId};
use oneway_core::payload::{AnyValue, DomainPayload, Payload, PayloadKind};
use oneway_core::store::Store;
use oneway_core::warning::Warning;
use smallvec::SmallVec;
use std::cell::{Cell, RefCell};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::rc::{Rc, Weak};
use tracing::{debug, trace};

/// What a context needs from its store: commit payloads, expose a
/// composite state and announce changes.
pub trait StoreGroupLike<P: DomainPayload> {
    /// Apply one committed payload
    fn commit(&self, payload: &Payload<P>, meta: &PayloadMeta);

    /// Current composite state
    fn get_state(&self) -> GroupState;

    /// Subscribe to change notifications. The handler receives the changed
    /// stores in registration order.
    fn on_change(&self, handler: Box<dyn Fn(&[StoreRef])>) -> Subscription;

    /// Adopt context-wide settings
    fn apply_config(&self, _config: &ContextConfig) {}

    /// Drop every subscriber
    fn release(&self) {}
}

/// The composite state of a store group: one entry per state name, in
/// registration order.
///
/// Two `GroupState`s are equal when every entry holds the very same state
/// value, which is how the group tells whether anything changed.
#[derive(Clone, Default)]
pub struct GroupState {
    entries: Rc<Vec<(String, AnyValue)>>,
}

impl GroupState {
    fn new(entries: Vec<(String, AnyValue)>) -> Self {
        Self {
            entries: Rc::new(entries),
        }
    }

    /// The state registered under `name`, if it has type `S`
    #[must_use]
    pub fn get<S: 'static>(&self, name: &str) -> Option<Rc<S>> {
        self.get_any(name).and_then(AnyValue::downcast_rc::<S>)
    }

    /// The state registered under `name`
    #[must_use]
    pub fn get_any(&self, name: &str) -> Option<&AnyValue> {
        self.entries
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value)
    }

    /// State names in registration order
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(key, _)| key.as_str())
    }

    /// `(state name, state)` pairs in registration order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &AnyValue)> {
        self.entries.iter().map(|(key, value)| (key.as_str(), value))
    }

    /// Number of entries
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the group has no stores
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl PartialEq for GroupState {
    fn eq(&self, other: &Self) -> bool {
        self.entries.len() == other.entries.len()
            && self
                .entries
                .iter()
                .zip(other.entries.iter())
                .all(|((a_key, a), (b_key, b))| a_key == b_key && a.ptr_eq(b))
    }
}

impl fmt::Debug for GroupState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map().entries(self.iter()).finish()
    }
}

/// A registered store with its type erased
trait StoreEntry<P> {
    fn reference(&self) -> &StoreRef;
    fn receive_payload(&self, payload: &Payload<P>, meta: &PayloadMeta);
    fn deliver(&self, payload: &Payload<P>, meta: &PayloadMeta);
    fn snapshot(&self) -> AnyValue;
    fn should_update(&self, prev: &AnyValue, next: &AnyValue) -> bool;
    fn subscribe(&self, handler: Box<dyn Fn()>) -> Subscription;
    fn release(&self);
}

struct Registered<S> {
    store: Rc<S>,
    reference: StoreRef,
}

impl<P: DomainPayload, S: Store<P>> StoreEntry<P> for Registered<S> {
    fn reference(&self) -> &StoreRef {
        &self.reference
    }

    fn receive_payload(&self, payload: &Payload<P>, meta: &PayloadMeta) {
        self.store.receive_payload(payload, meta);
    }

    fn deliver(&self, payload: &Payload<P>, meta: &PayloadMeta) {
        self.store.core().deliver(payload, meta);
    }

    fn snapshot(&self) -> AnyValue {
        AnyValue::from_rc(self.store.get_state())
    }

    fn should_update(&self, prev: &AnyValue, next: &AnyValue) -> bool {
        if prev.ptr_eq(next) {
            return false;
        }
        match (prev.downcast_ref::<S::State>(), next.downcast_ref::<S::State>()) {
            (Some(prev), Some(next)) => self.store.should_state_update(prev, next),
            _ => true,
        }
    }

    fn subscribe(&self, handler: Box<dyn Fn()>) -> Subscription {
        self.store.core().on_change(move || handler())
    }

    fn release(&self) {
        self.store.release();
    }
}

/// In-flight runs, keyed by execution, with the transaction they run in
#[derive(Debug, Default)]
struct ExecutionTracker {
    working: HashMap<ExecutionId, Option<TransactionId>>,
    finished: HashSet<ExecutionId>,
    open_transactions: usize,
}

impl ExecutionTracker {
    /// A run started but has not finished
    fn has_pending(&self) -> bool {
        self.working.keys().any(|id| !self.finished.contains(id))
    }

    /// Forget runs of an ended transaction whose completion was never
    /// committed. Returns how many were dropped.
    fn forget_transaction(&mut self, transaction: TransactionId) -> usize {
        let stale: Vec<ExecutionId> = self
            .working
            .iter()
            .filter(|(_, owner)| **owner == Some(transaction))
            .map(|(id, _)| *id)
            .collect();
        for id in &stale {
            self.working.remove(id);
            self.finished.remove(id);
        }
        stale.len()
    }

    fn is_idle(&self) -> bool {
        self.open_transactions == 0 && !self.has_pending()
    }
}

/// What a committed payload asks of the group
enum Step {
    Skip,
    Write,
    Reconcile,
}

/// Builder for [`StoreGroup`]
pub struct StoreGroupBuilder<P> {
    entries: Vec<Box<dyn StoreEntry<P>>>,
    error: Option<ContextError>,
    strict: bool,
    max_reconcile_passes: usize,
}

impl<P: DomainPayload> StoreGroupBuilder<P> {
    /// Register `store` under `state_name`
    #[must_use]
    pub fn store<S: Store<P>>(mut self, state_name: impl Into<String>, store: Rc<S>) -> Self {
        let state_name = state_name.into();
        if self.error.is_none() {
            if state_name.is_empty() {
                self.error = Some(ContextError::EmptyStateName);
            } else if self
                .entries
                .iter()
                .any(|entry| entry.reference().state_name == state_name)
            {
                self.error = Some(ContextError::DuplicateStateName(state_name.clone()));
            }
        }
        let reference = StoreRef {
            id: store.core().id(),
            name: store.name().to_string(),
            state_name,
        };
        self.entries.push(Box::new(Registered { store, reference }));
        self
    }

    /// Enable the development checks
    #[must_use]
    pub const fn strict(mut self, strict: bool) -> Self {
        self.strict = strict;
        self
    }

    /// Bound the follow-up read phases of one reconciliation
    #[must_use]
    pub const fn max_reconcile_passes(mut self, passes: usize) -> Self {
        self.max_reconcile_passes = passes;
        self
    }

    /// Build the group
    ///
    /// # Errors
    ///
    /// Returns [`ContextError::DuplicateStateName`] or
    /// [`ContextError::EmptyStateName`] for an invalid registration.
    pub fn build(self) -> Result<StoreGroup<P>, ContextError> {
        if let Some(error) = self.error {
            return Err(error);
        }

        let cache: Vec<AnyValue> = self.entries.iter().map(|entry| entry.snapshot()).collect();
        let state = GroupState::new(
            self.entries
                .iter()
                .zip(&cache)
                .map(|(entry, value)| (entry.reference().state_name.clone(), value.clone()))
                .collect(),
        );

        let inner = Rc::new(GroupInner {
            entries: self.entries,
            cache: RefCell::new(cache),
            state: RefCell::new(state),
            changes: EventChannel::new(),
            tracker: RefCell::new(ExecutionTracker::default()),
            signaled: RefCell::new(SmallVec::new()),
            receiving: Cell::new(None),
            reconciling: Cell::new(false),
            rerun: Cell::new(false),
            strict: Cell::new(self.strict),
            max_passes: Cell::new(self.max_reconcile_passes),
            subscriptions: RefCell::new(Vec::new()),
            released: Cell::new(false),
        });

        let subscriptions = inner
            .entries
            .iter()
            .enumerate()
            .map(|(index, entry)| {
                let weak: Weak<GroupInner<P>> = Rc::downgrade(&inner);
                entry.subscribe(Box::new(move || {
                    if let Some(group) = weak.upgrade() {
                        group.on_store_signal(index);
                    }
                }))
            })
            .collect();
        *inner.subscriptions.borrow_mut() = subscriptions;

        Ok(StoreGroup { inner })
    }
}

struct GroupInner<P> {
    entries: Vec<Box<dyn StoreEntry<P>>>,
    cache: RefCell<Vec<AnyValue>>,
    state: RefCell<GroupState>,
    changes: EventChannel<[StoreRef]>,
    tracker: RefCell<ExecutionTracker>,
    signaled: RefCell<SmallVec<[usize; 8]>>,
    receiving: Cell<Option<usize>>,
    reconciling: Cell<bool>,
    rerun: Cell<bool>,
    strict: Cell<bool>,
    max_passes: Cell<usize>,
    subscriptions: RefCell<Vec<Subscription>>,
    released: Cell<bool>,
}

impl<P: DomainPayload> GroupInner<P> {
    fn commit(&self, payload: &Payload<P>, meta: &PayloadMeta) {
        if self.released.get() {
            return;
        }
        StoreGroupMetrics::record_commit();
        let execution = meta.use_case().map(|use_case| use_case.execution);

        let step = {
            let mut tracker = self.tracker.borrow_mut();
            match payload.kind() {
                PayloadKind::WillExecuted => {
                    if let Some(id) = execution {
                        tracker
                            .working
                            .insert(id, meta.transaction().map(|transaction| transaction.id));
                    }
                    Step::Skip
                },
                PayloadKind::DidExecuted => {
                    if let (Some(id), true) = (execution, meta.is_use_case_finished()) {
                        tracker.finished.insert(id);
                    }
                    Step::Write
                },
                PayloadKind::Completed => match execution {
                    Some(id) => {
                        tracker.working.remove(&id);
                        // Already reconciled at its finished did-execute
                        if tracker.finished.remove(&id) {
                            Step::Skip
                        } else {
                            Step::Write
                        }
                    },
                    None => Step::Write,
                },
                PayloadKind::User | PayloadKind::Error => Step::Write,
                PayloadKind::TransactionBegan => {
                    tracker.open_transactions += 1;
                    Step::Skip
                },
                PayloadKind::TransactionEnded => {
                    tracker.open_transactions = tracker.open_transactions.saturating_sub(1);
                    if let Some(transaction) = meta.transaction() {
                        let forgotten = tracker.forget_transaction(transaction.id);
                        if forgotten > 0 {
                            debug!(
                                transaction = %transaction.name,
                                runs = forgotten,
                                "Dropped runs whose completion was never committed"
                            );
                        }
                    }
                    Step::Reconcile
                },
                PayloadKind::WillNotExecuted | PayloadKind::StoreChanged => Step::Skip,
            }
        };

        match step {
            Step::Write => {
                self.write_phase(payload, meta);
                self.reconcile_if_idle();
            },
            Step::Reconcile => self.reconcile_if_idle(),
            Step::Skip => {},
        }
    }

    fn write_phase(&self, payload: &Payload<P>, meta: &PayloadMeta) {
        trace!(payload_type = payload.payload_type(), "Write phase");
        let untrusted = !meta.is_trusted();
        for (index, entry) in self.entries.iter().enumerate() {
            let outer = self.receiving.replace(Some(index));
            entry.receive_payload(payload, meta);
            if untrusted {
                entry.deliver(payload, meta);
            }
            self.receiving.set(outer);
        }
    }

    fn on_store_signal(&self, index: usize) {
        if self.released.get() {
            return;
        }
        if self.strict.get() && self.receiving.get() != Some(index) {
            if let Some(entry) = self.entries.get(index) {
                Warning::MutationOutsideReceivePayload {
                    store: entry.reference().name.clone(),
                }
                .report();
            }
        }
        {
            let mut signaled = self.signaled.borrow_mut();
            if !signaled.contains(&index) {
                signaled.push(index);
            }
        }
        // Inside a write phase the commit itself reconciles afterwards
        if self.receiving.get().is_none() {
            self.reconcile_if_idle();
        }
    }

    fn reconcile_if_idle(&self) {
        let idle = self.tracker.borrow().is_idle();
        if idle {
            self.reconcile();
        }
    }

    fn reconcile(&self) {
        if self.reconciling.replace(true) {
            self.rerun.set(true);
            return;
        }

        let max_passes = self.max_passes.get().max(1);
        let mut passes = 0;
        loop {
            self.rerun.set(false);
            passes += 1;

            let changed = self.read_phase();
            if !changed.is_empty() {
                self.emit(&changed);
            }

            if !self.rerun.get() || !self.tracker.borrow().is_idle() {
                break;
            }
            if passes >= max_passes {
                Warning::ReconcilePassesExhausted { passes }.report();
                break;
            }
        }
        self.reconciling.set(false);
    }

    fn read_phase(&self) -> SmallVec<[usize; 8]> {
        trace!("Read phase");
        let signaled = std::mem::take(&mut *self.signaled.borrow_mut());
        let mut changed = SmallVec::new();

        for (index, entry) in self.entries.iter().enumerate() {
            let next = entry.snapshot();
            let Some(prev) = self.cache.borrow().get(index).cloned() else {
                continue;
            };
            if entry.should_update(&prev, &next) {
                if let Some(slot) = self.cache.borrow_mut().get_mut(index) {
                    *slot = next;
                }
                changed.push(index);
            } else if self.strict.get() && signaled.contains(&index) {
                Warning::UnchangedStateEmitted {
                    store: entry.reference().name.clone(),
                }
                .report();
            }
        }

        if !changed.is_empty() {
            let state = GroupState::new(
                self.entries
                    .iter()
                    .zip(self.cache.borrow().iter())
                    .map(|(entry, value)| (entry.reference().state_name.clone(), value.clone()))
                    .collect(),
            );
            *self.state.borrow_mut() = state;
        }
        changed
    }

    fn emit(&self, changed: &[usize]) {
        let stores: Vec<StoreRef> = changed
            .iter()
            .filter_map(|&index| self.entries.get(index))
            .map(|entry| entry.reference().clone())
            .collect();
        debug!(
            stores = ?stores.iter().map(|store| store.state_name.as_str()).collect::<Vec<_>>(),
            "Store group changed"
        );
        StoreGroupMetrics::record_change();
        self.changes.emit(stores.as_slice());
    }

    fn release(&self) {
        if self.released.replace(true) {
            return;
        }
        for subscription in std::mem::take(&mut *self.subscriptions.borrow_mut()) {
            subscription.unsubscribe();
        }
        self.changes.clear();
        for entry in &self.entries {
            entry.release();
        }
    }
}

/// Aggregates named stores into one composite state
///
/// Cloning yields another handle to the same group.
pub struct StoreGroup<P> {
    inner: Rc<GroupInner<P>>,
}

impl<P: DomainPayload> StoreGroup<P> {
    /// Start registering stores
    #[must_use]
    pub const fn builder() -> StoreGroupBuilder<P> {
        StoreGroupBuilder {
            entries: Vec::new(),
            error: None,
            strict: false,
            max_reconcile_passes: DEFAULT_MAX_RECONCILE_PASSES,
        }
    }

    /// Apply one payload: write phase, then a read phase unless a use case
    /// is pending or a transaction is open
    pub fn commit(&self, payload: &Payload<P>, meta: &PayloadMeta) {
        self.inner.commit(payload, meta);
    }

    /// Current composite state
    #[must_use]
    pub fn get_state(&self) -> GroupState {
        self.inner.state.borrow().clone()
    }

    /// Subscribe to change notifications
    pub fn on_change(&self, handler: impl Fn(&[StoreRef]) + 'static) -> Subscription {
        self.inner.changes.subscribe(handler)
    }

    /// Enable the development checks
    pub fn use_strict(&self) {
        self.inner.strict.set(true);
    }

    /// Whether the development checks are on
    #[must_use]
    pub fn is_strict(&self) -> bool {
        self.inner.strict.get()
    }

    /// Registered stores in registration order
    pub fn stores(&self) -> impl Iterator<Item = &StoreRef> {
        self.inner.entries.iter().map(|entry| entry.reference())
    }

    /// Whether a run is in flight or a transaction is open
    #[must_use]
    pub fn is_working(&self) -> bool {
        !self.inner.tracker.borrow().is_idle()
    }

    /// Drop every subscriber and release the stores
    pub fn release(&self) {
        self.inner.release();
    }
}

impl<P> Clone for StoreGroup<P> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<P: DomainPayload> StoreGroupLike<P> for StoreGroup<P> {
    fn commit(&self, payload: &Payload<P>, meta: &PayloadMeta) {
        self.inner.commit(payload, meta);
    }

    fn get_state(&self) -> GroupState {
        Self::get_state(self)
    }

    fn on_change(&self, handler: Box<dyn Fn(&[StoreRef])>) -> Subscription {
        self.inner.changes.subscribe(move |stores: &[StoreRef]| handler(stores))
    }

    fn apply_config(&self, config: &ContextConfig) {
        if config.strict {
            self.use_strict();
        }
        if let Some(passes) = config.max_reconcile_passes {
            self.inner.max_passes.set(passes);
        }
    }

    fn release(&self) {
        self.inner.release();
    }
}

impl<P> fmt::Debug for StoreGroup<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoreGroup")
            .field("state", &self.inner.state.borrow())
            .field("tracker", &self.inner.tracker.borrow())
            .finish_non_exhaustive()
    }
}
