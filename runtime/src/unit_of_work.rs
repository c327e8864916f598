//! Units of work - ordered batches of payloads committed to a store group.
//!
//! Payloads dispatched by the runs of one unit of work are queued as
//! *commitments*. In [`CommitMode::AutoCommit`] every commitment is flushed
//! as soon as it arrives; in [`CommitMode::Manual`] (transactions) they
//! wait for an explicit [`UnitOfWork::commit`]. Either way the store group
//! sees them in dispatch order.

use crate::metrics::TransactionMetrics;
use crate::store_group::StoreGroupLike;
use oneway_core::channel::Subscription;
use oneway_core::dispatcher::{Dispatcher, Envelope};
use oneway_core::meta::{PayloadMeta, TransactionDescriptor};
use oneway_core::payload::{DomainPayload, Payload};
use oneway_core::warning::Warning;
use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::fmt;
use std::rc::Rc;
use tracing::debug;

/// When commitments reach the store group
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitMode {
    /// Flush on every commitment
    AutoCommit,
    /// Flush on [`UnitOfWork::commit`] only
    Manual,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TransactionState {
    None,
    Began,
    Ended,
}

/// A transaction whose begin and end markers go to the store group and
/// are announced on a dispatcher
struct Transaction<P> {
    descriptor: TransactionDescriptor,
    announce: Dispatcher<P>,
    state: Cell<TransactionState>,
}

/// An ordered queue of commitments bound to one store group
pub struct UnitOfWork<P: DomainPayload> {
    group: Rc<dyn StoreGroupLike<P>>,
    mode: CommitMode,
    queue: RefCell<VecDeque<Envelope<P>>>,
    draining: Cell<bool>,
    transaction: Option<Transaction<P>>,
    released: Cell<bool>,
}

impl<P: DomainPayload> UnitOfWork<P> {
    /// A unit of work without transaction markers
    #[must_use]
    pub fn new(group: Rc<dyn StoreGroupLike<P>>, mode: CommitMode) -> Rc<Self> {
        Rc::new(Self {
            group,
            mode,
            queue: RefCell::new(VecDeque::new()),
            draining: Cell::new(false),
            transaction: None,
            released: Cell::new(false),
        })
    }

    /// A manual unit of work for a transaction. Its markers are committed
    /// to the group and then dispatched on `announce`.
    #[must_use]
    pub fn for_transaction(
        group: Rc<dyn StoreGroupLike<P>>,
        descriptor: TransactionDescriptor,
        announce: Dispatcher<P>,
    ) -> Rc<Self> {
        Rc::new(Self {
            group,
            mode: CommitMode::Manual,
            queue: RefCell::new(VecDeque::new()),
            draining: Cell::new(false),
            transaction: Some(Transaction {
                descriptor,
                announce,
                state: Cell::new(TransactionState::None),
            }),
            released: Cell::new(false),
        })
    }

    /// Queue everything dispatched on `bus`
    pub fn open(self: &Rc<Self>, bus: &Dispatcher<P>) -> Subscription {
        let unit = Rc::clone(self);
        bus.on_dispatch(move |payload, meta| unit.add_commitment(payload.clone(), meta.clone()))
    }

    /// Queue one commitment; auto-commit units flush right away
    pub fn add_commitment(&self, payload: Payload<P>, meta: PayloadMeta) {
        if self.released.get() {
            Warning::CommitmentAfterRelease {
                payload_type: payload.payload_type().to_string(),
            }
            .report();
            return;
        }
        self.queue.borrow_mut().push_back(Envelope { payload, meta });
        if self.mode == CommitMode::AutoCommit {
            self.commit();
        }
    }

    /// Flush the queue to the store group in dispatch order.
    ///
    /// Returns how many commitments were flushed. Commitments added while
    /// flushing are flushed by the same call.
    pub fn commit(&self) -> usize {
        if self.draining.replace(true) {
            return 0;
        }
        let mut committed = 0;
        loop {
            let next = self.queue.borrow_mut().pop_front();
            let Some(Envelope { payload, meta }) = next else {
                break;
            };
            self.group.commit(&payload, &meta);
            committed += 1;
        }
        self.draining.set(false);
        committed
    }

    /// Number of queued commitments
    #[must_use]
    pub fn pending(&self) -> usize {
        self.queue.borrow().len()
    }

    /// Open the transaction: the group stops announcing changes until it ends
    pub fn begin_transaction(&self) {
        let Some(transaction) = &self.transaction else {
            return;
        };
        if transaction.state.get() != TransactionState::None {
            return;
        }
        transaction.state.set(TransactionState::Began);
        TransactionMetrics::record_begin();
        debug!(transaction = %transaction.descriptor.name, "Transaction began");
        self.deliver_marker(
            transaction,
            Payload::TransactionBegan {
                name: transaction.descriptor.name.clone(),
            },
        );
    }

    /// Close the transaction. Commitments that were never committed are
    /// discarded.
    pub fn end_transaction(&self) {
        let Some(transaction) = &self.transaction else {
            return;
        };
        if transaction.state.get() != TransactionState::Began {
            return;
        }
        transaction.state.set(TransactionState::Ended);

        let discarded = std::mem::take(&mut *self.queue.borrow_mut()).len();
        if discarded > 0 {
            TransactionMetrics::record_discarded(discarded);
            Warning::UncommittedPayloadsDiscarded {
                transaction: transaction.descriptor.name.clone(),
                count: discarded,
            }
            .report();
        }

        debug!(transaction = %transaction.descriptor.name, "Transaction ended");
        self.deliver_marker(
            transaction,
            Payload::TransactionEnded {
                name: transaction.descriptor.name.clone(),
            },
        );
    }

    fn deliver_marker(&self, transaction: &Transaction<P>, payload: Payload<P>) {
        let meta = PayloadMeta::trusted(transaction.announce.clock().now())
            .with_dispatcher(transaction.announce.id())
            .with_transaction(Some(transaction.descriptor.clone()));
        self.group.commit(&payload, &meta);
        transaction.announce.dispatch_with_meta(payload, meta);
    }

    /// Stop accepting commitments.
    ///
    /// A transaction that began but never ended is flushed and ended here.
    pub fn release(&self) {
        if self.released.get() {
            return;
        }
        let open = self
            .transaction
            .as_ref()
            .is_some_and(|transaction| transaction.state.get() == TransactionState::Began);
        if open {
            self.commit();
            self.end_transaction();
        }
        self.released.set(true);
    }

    /// Whether [`release`](Self::release) already ran
    #[must_use]
    pub fn is_released(&self) -> bool {
        self.released.get()
    }
}

impl<P: DomainPayload> fmt::Debug for UnitOfWork<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UnitOfWork")
            .field("mode", &self.mode)
            .field("pending", &self.pending())
            .field("released", &self.released.get())
            .finish_non_exhaustive()
    }
}
