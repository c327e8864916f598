//! Store group and execution benchmarks
//!
//! - Write/read phase cost per committed payload as the number of stores grows
//! - Full use case run through a context (lifecycle + unit of work + group)
//! - Transactions batching several runs into one change
//!
//! Run with: `cargo bench`

#![allow(missing_docs)] // Benchmarks don't need extensive docs
#![allow(clippy::expect_used)] // Benchmarks can use expect for setup

use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};
use oneway_core::prelude::*;
use oneway_runtime::prelude::*;
use std::rc::Rc;

#[derive(Clone, Debug)]
struct Bump(usize);

impl DomainPayload for Bump {
    fn payload_type(&self) -> &str {
        "bump"
    }
}

struct SlotStore {
    core: StoreCore<Bump, u64>,
    index: usize,
}

impl Store<Bump> for SlotStore {
    type State = u64;

    fn core(&self) -> &StoreCore<Bump, u64> {
        &self.core
    }

    fn receive_payload(&self, payload: &Payload<Bump>, _meta: &PayloadMeta) {
        if let Some(Bump(target)) = payload.as_user() {
            if *target == self.index {
                self.update_state(|value| value + 1);
            }
        }
    }
}

fn group(stores: usize) -> StoreGroup<Bump> {
    let mut builder = StoreGroup::builder();
    for index in 0..stores {
        builder = builder.store(
            format!("slot{index}"),
            Rc::new(SlotStore {
                core: StoreCore::new(format!("Slot{index}"), 0),
                index,
            }),
        );
    }
    builder.build().expect("valid store names")
}

struct BumpUseCase;

impl UseCase<Bump> for BumpUseCase {
    type Args = usize;

    fn execute<'a>(&'a self, ctx: UseCaseContext<Bump>, target: usize) -> UseCaseOutcome<'a> {
        ctx.dispatch(Bump(target));
        UseCaseOutcome::done()
    }
}

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .expect("Failed to build runtime")
}

/// Benchmark one committed payload against groups of growing size
fn benchmark_commit(c: &mut Criterion) {
    let mut bench = c.benchmark_group("store_group_commit");
    bench.throughput(Throughput::Elements(1));

    for stores in [1, 8, 32] {
        let group = group(stores);
        let meta = PayloadMeta::untrusted(chrono::Utc::now());
        bench.bench_with_input(BenchmarkId::from_parameter(stores), &stores, |b, &stores| {
            let mut next = 0;
            b.iter(|| {
                next = (next + 1) % stores;
                group.commit(black_box(&Payload::User(Bump(next))), &meta);
            });
        });
    }

    bench.finish();
}

/// Benchmark a complete synchronous use case run
fn benchmark_use_case(c: &mut Criterion) {
    let mut bench = c.benchmark_group("use_case");
    bench.throughput(Throughput::Elements(1));
    let runtime = runtime();

    bench.bench_function("execute_sync", |b| {
        let context = Context::with_store(group(8));
        b.iter(|| {
            runtime.block_on(async {
                let _ = context.use_case(BumpUseCase).execute(black_box(3)).await;
            });
        });
    });

    bench.bench_function("execute_shared_instance", |b| {
        let context = Context::with_store(group(8));
        let instance = UseCaseInstance::new(BumpUseCase);
        b.iter(|| {
            runtime.block_on(async {
                let _ = context.use_case_shared(&instance).execute(black_box(5)).await;
            });
        });
    });

    bench.finish();
}

/// Benchmark transactions batching several runs
fn benchmark_transaction(c: &mut Criterion) {
    let mut bench = c.benchmark_group("transaction");
    bench.throughput(Throughput::Elements(10));
    let runtime = runtime();

    bench.bench_function("ten_runs_one_commit", |b| {
        let context = Context::with_store(group(8));
        b.iter(|| {
            runtime.block_on(context.transaction("bench", |tx| async move {
                for target in 0..10 {
                    let _ = tx.use_case(BumpUseCase).execute(target % 8).await;
                }
                tx.commit()
            }))
        });
    });

    bench.finish();
}

criterion_group!(
    benches,
    benchmark_commit,
    benchmark_use_case,
    benchmark_transaction,
);
criterion_main!(benches);
