//! Integration tests for transactions
//!
//! Batching into one change, explicit commits, discarded payloads and
//! transactions abandoned mid-flight.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)] // Test code can use unwrap/expect/panic

use oneway_core::prelude::*;
use oneway_runtime::prelude::*;
use oneway_testing::{ChangeRecorder, LogCapture, PayloadRecorder, ReducerStore};
use std::rc::Rc;
use std::time::Duration;

// ============================================================================
// Test Fixtures
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
struct Deposit {
    account: &'static str,
    amount: i64,
}

impl DomainPayload for Deposit {
    fn payload_type(&self) -> &str {
        "deposit"
    }
}

const ACCOUNTS: [&str; 3] = ["checking", "savings", "brokerage"];

fn account(name: &'static str) -> Rc<ReducerStore<Deposit, i64>> {
    ReducerStore::new(name, 0, move |balance, payload: &Payload<Deposit>| {
        payload
            .as_user()
            .filter(|deposit| deposit.account == name)
            .map(|deposit| balance + deposit.amount)
    })
}

fn context() -> Context<Deposit> {
    let mut builder = StoreGroup::builder();
    for name in ACCOUNTS {
        builder = builder.store(name, account(name));
    }
    Context::with_store(builder.build().unwrap())
}

fn balance(context: &Context<Deposit>, name: &str) -> i64 {
    *context.get_state().get::<i64>(name).unwrap()
}

struct MakeDeposit;

impl UseCase<Deposit> for MakeDeposit {
    type Args = Deposit;

    fn execute<'a>(&'a self, ctx: UseCaseContext<Deposit>, deposit: Deposit) -> UseCaseOutcome<'a> {
        ctx.dispatch(deposit);
        UseCaseOutcome::done()
    }
}

/// Deposits after yielding to the scheduler
struct SlowDeposit;

impl UseCase<Deposit> for SlowDeposit {
    type Args = Deposit;

    fn execute<'a>(&'a self, ctx: UseCaseContext<Deposit>, deposit: Deposit) -> UseCaseOutcome<'a> {
        UseCaseOutcome::pending(async move {
            tokio::task::yield_now().await;
            ctx.dispatch(deposit);
            Ok(None)
        })
    }
}

/// Deposits after a timer fires, so it stays pending across polls
struct LateDeposit;

impl UseCase<Deposit> for LateDeposit {
    type Args = Deposit;

    fn execute<'a>(&'a self, ctx: UseCaseContext<Deposit>, deposit: Deposit) -> UseCaseOutcome<'a> {
        UseCaseOutcome::pending(async move {
            tokio::time::sleep(Duration::from_millis(5)).await;
            ctx.dispatch(deposit);
            Ok(None)
        })
    }
}

const fn deposit(account: &'static str, amount: i64) -> Deposit {
    Deposit { account, amount }
}

// ============================================================================
// Batching
// ============================================================================

#[tokio::test]
async fn transaction_announces_all_changes_once() {
    let context = context();
    let changes = ChangeRecorder::attach(&context);

    let committed = context
        .transaction("payday", |tx| async move {
            for name in ACCOUNTS {
                tx.use_case(MakeDeposit).execute(deposit(name, 10)).await.unwrap();
            }
            tx.commit()
        })
        .await;

    assert_eq!(committed, 12);
    assert_eq!(
        changes.emissions(),
        vec![ACCOUNTS.iter().map(ToString::to_string).collect::<Vec<_>>()]
    );
    for name in ACCOUNTS {
        assert_eq!(balance(&context, name), 10);
    }
}

#[tokio::test]
async fn plain_runs_announce_each_change() {
    let context = context();
    let changes = ChangeRecorder::attach(&context);

    for name in ACCOUNTS {
        context.use_case(MakeDeposit).execute(deposit(name, 10)).await.unwrap();
    }

    assert_eq!(
        changes.emissions(),
        ACCOUNTS
            .iter()
            .map(|name| vec![(*name).to_string()])
            .collect::<Vec<_>>()
    );
}

#[tokio::test]
async fn nothing_reaches_stores_before_commit() {
    let context = context();

    context
        .transaction("staged", |tx| {
            let context = context.clone();
            async move {
                tx.use_case(SlowDeposit)
                    .execute(deposit("savings", 5))
                    .await
                    .unwrap();
                assert_eq!(tx.pending(), 4);
                assert_eq!(balance(&context, "savings"), 0);

                assert_eq!(tx.commit(), 4);
                assert_eq!(tx.pending(), 0);
                // Written, but the read phase waits for the transaction to end
                assert_eq!(balance(&context, "savings"), 0);
            }
        })
        .await;

    assert_eq!(balance(&context, "savings"), 5);
}

#[tokio::test]
async fn commits_replay_in_dispatch_order() {
    let history = ReducerStore::new("History", Vec::new(), |history: &Vec<i64>, payload: &Payload<Deposit>| {
        payload.as_user().map(|deposit| {
            let mut next = history.clone();
            next.push(deposit.amount);
            next
        })
    });
    let context = Context::with_store(
        StoreGroup::builder()
            .store("history", history)
            .build()
            .unwrap(),
    );

    context
        .transaction("ordered", |tx| async move {
            let amounts = [3, 1, 2];
            for amount in amounts {
                tx.use_case(MakeDeposit)
                    .execute(deposit("checking", amount))
                    .await
                    .unwrap();
            }
            tx.commit();
        })
        .await;

    assert_eq!(
        context.get_state().get::<Vec<i64>>("history").as_deref(),
        Some(&vec![3, 1, 2])
    );
}

#[tokio::test]
async fn runs_outside_an_open_transaction_wait_for_it() {
    let context = context();
    let changes = ChangeRecorder::attach(&context);

    context
        .transaction("long", |tx| {
            let context = context.clone();
            async move {
                context
                    .use_case(MakeDeposit)
                    .execute(deposit("checking", 1))
                    .await
                    .unwrap();
                // Written, but not read while the transaction is open
                assert_eq!(balance(&context, "checking"), 0);

                tx.use_case(MakeDeposit)
                    .execute(deposit("savings", 1))
                    .await
                    .unwrap();
                tx.commit();
            }
        })
        .await;

    assert_eq!(
        changes.emissions(),
        vec![vec!["checking".to_string(), "savings".to_string()]]
    );
}

// ============================================================================
// Markers and meta
// ============================================================================

#[tokio::test]
async fn markers_frame_the_transaction() {
    let context = context();
    let recorder = PayloadRecorder::attach(context.dispatcher());

    context
        .transaction("framed", |tx| async move {
            tx.use_case(MakeDeposit)
                .execute(deposit("checking", 1))
                .await
                .unwrap();
            tx.commit();
        })
        .await;

    let trace = recorder.trace();
    assert_eq!(trace.first().map(String::as_str), Some("begin:framed"));
    assert_eq!(trace.last().map(String::as_str), Some("end:framed"));

    let payloads = recorder.payloads();
    let transaction = payloads[0].meta.transaction().unwrap().clone();
    assert_eq!(transaction.name, "framed");
    assert!(
        payloads
            .iter()
            .filter(|seen| seen.kind != PayloadKind::StoreChanged)
            .all(|seen| seen.meta.transaction() == Some(&transaction))
    );
}

// ============================================================================
// Discarding and abandonment
// ============================================================================

#[tokio::test]
async fn uncommitted_payloads_are_discarded() {
    let context = context();
    let changes = ChangeRecorder::attach(&context);
    let logs = LogCapture::start();

    context
        .transaction("half", |tx| async move {
            tx.use_case(MakeDeposit)
                .execute(deposit("checking", 7))
                .await
                .unwrap();
            tx.commit();
            tx.use_case(MakeDeposit)
                .execute(deposit("savings", 7))
                .await
                .unwrap();
        })
        .await;

    assert_eq!(balance(&context, "checking"), 7);
    assert_eq!(balance(&context, "savings"), 0);
    assert_eq!(changes.emissions(), vec![vec!["checking".to_string()]]);
    #[cfg(debug_assertions)]
    {
        assert_eq!(logs.warning_count("uncommitted_payloads_discarded"), 1);
        assert!(logs.warnings()[0].contains("4 uncommitted"));
    }
    drop(logs);
}

#[tokio::test]
async fn dropped_transaction_is_flushed_and_ended() {
    let context = context();
    let changes = ChangeRecorder::attach(&context);
    let recorder = PayloadRecorder::attach(context.dispatcher());

    {
        let mut transaction = Box::pin(context.transaction("abandoned", |tx| async move {
            tx.use_case(MakeDeposit)
                .execute(deposit("brokerage", 9))
                .await
                .unwrap();
            futures::future::pending::<()>().await;
        }));
        assert!(futures::poll!(&mut transaction).is_pending());
        assert_eq!(changes.count(), 0);
    }

    assert_eq!(balance(&context, "brokerage"), 9);
    assert_eq!(changes.emissions(), vec![vec!["brokerage".to_string()]]);
    assert_eq!(recorder.trace().last().map(String::as_str), Some("end:abandoned"));
}

#[tokio::test]
async fn runs_still_pending_at_commit_do_not_block_later_changes() {
    let context = context();
    let changes = ChangeRecorder::attach(&context);

    context
        .transaction("early-commit", |tx| async move {
            let executor = tx.use_case(LateDeposit);
            let mut run = Box::pin(executor.execute(deposit("savings", 1)));
            assert!(futures::poll!(&mut run).is_pending());

            // Will-execute and the unfinished did-execute
            assert_eq!(tx.commit(), 2);
            run.await.unwrap();
            assert_eq!(tx.pending(), 2);
        })
        .await;

    assert_eq!(changes.count(), 0);
    assert_eq!(balance(&context, "savings"), 0);

    context
        .use_case(MakeDeposit)
        .execute(deposit("checking", 10))
        .await
        .unwrap();

    assert_eq!(changes.emissions(), vec![vec!["checking".to_string()]]);
    assert_eq!(balance(&context, "checking"), 10);
}
