//! Counter demo binary
//!
//! Runs a few use cases against the counter and prints the store group's
//! announcements, the final history and the collected metrics.

use counter::{CounterApp, Increment, IncrementLater, IncrementMany, Reset};
use oneway_core::prelude::*;
use oneway_runtime::metrics::MetricsRecorder;
use oneway_runtime::prelude::*;
use std::rc::Rc;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "counter=info,oneway_runtime=debug,oneway::warning=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let mut metrics = MetricsRecorder::new();
    metrics.install()?;

    // Contexts are single-threaded
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;
    runtime.block_on(run())?;

    if let Some(text) = metrics.render() {
        println!("\n=== Metrics ===\n{text}");
    }
    Ok(())
}

/// Use case errors share their domain error through an `Rc`
fn failed(error: UseCaseError) -> anyhow::Error {
    anyhow::anyhow!("use case failed: {error}")
}

async fn run() -> anyhow::Result<()> {
    println!("=== Counter Demo: Oneway ===\n");

    let app = CounterApp::with_config(Rc::new(SystemClock), ContextConfig::default().with_strict(true))?;
    let context = app.context();

    let _ = context.on_change(|stores| {
        let names: Vec<&str> = stores.iter().map(|store| store.state_name.as_str()).collect();
        println!("  changed: {names:?}");
    });
    let _ = context.on_error_dispatch(|error, meta| {
        let use_case = meta.use_case().map(ToString::to_string).unwrap_or_default();
        println!("  error from {use_case}: {error}");
    });

    println!(">>> Increment by 2");
    context.use_case(Increment).execute(2).await.map_err(failed)?;
    println!("Count: {}", app.count());

    println!("\n>>> Increment by 1 after 10ms");
    context
        .use_case(IncrementLater::new(Duration::from_millis(10)))
        .execute(1)
        .await
        .map_err(failed)?;
    println!("Count: {}", app.count());

    println!("\n>>> Increment one at a time, 3 times (nested runs)");
    context.use_case(IncrementMany).execute(3).await.map_err(failed)?;
    println!("Count: {}", app.count());

    println!("\n>>> Decrement by 100");
    if let Err(error) = context.use_case(app.decrement()).execute(100).await {
        println!("Rejected: {error}");
    }
    println!("Count: {}", app.count());

    println!("\n>>> Reset then increment by 5, in one transaction");
    let committed = context
        .transaction("reset-and-seed", |tx| async move {
            tx.use_case(Reset).execute(()).await?;
            tx.use_case(Increment).execute(5).await?;
            Ok::<_, UseCaseError>(tx.commit())
        })
        .await
        .map_err(failed)?;
    println!("Committed {committed} payloads");
    println!("Count: {}", app.count());

    println!("\n=== History ===");
    for entry in app.history() {
        println!(
            "  {} {:<22} {}",
            entry.at.format("%H:%M:%S%.3f"),
            entry.kind,
            entry.use_case.unwrap_or_default()
        );
    }

    tracing::info!(count = app.count(), "Demo finished");

    context.release();
    Ok(())
}
