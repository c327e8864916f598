//! Metrics for use case execution and store reconciliation.
//!
//! Counters and histograms go through the `metrics` facade, so they cost
//! nothing until a recorder is installed. [`MetricsRecorder`] installs a
//! Prometheus recorder and renders its text exposition on demand; serving it
//! over HTTP is left to the application.
//!
//! # Example
//!
//! ```rust,no_run
//! use oneway_runtime::metrics::MetricsRecorder;
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let mut recorder = MetricsRecorder::new();
//! recorder.install()?;
//!
//! // ... run use cases ...
//!
//! if let Some(text) = recorder.render() {
//!     println!("{text}");
//! }
//! # Ok(())
//! # }
//! ```

use metrics::{describe_counter, describe_histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use std::time::Duration;
use thiserror::Error;

pub use metrics::{counter, histogram};

/// Errors from metrics operations.
#[derive(Error, Debug)]
pub enum MetricsError {
    /// Failed to build metrics exporter
    #[error("Failed to build metrics exporter: {0}")]
    Build(String),
    /// Failed to install metrics exporter
    #[error("Failed to install metrics exporter: {0}")]
    Install(String),
}

/// Process-wide Prometheus recorder.
#[derive(Default)]
pub struct MetricsRecorder {
    handle: Option<PrometheusHandle>,
}

impl MetricsRecorder {
    /// Create a recorder that is not installed yet.
    #[must_use]
    pub const fn new() -> Self {
        Self { handle: None }
    }

    /// Describe every metric and install the Prometheus recorder.
    ///
    /// # Errors
    ///
    /// Returns error if the exporter cannot be built or installed. A recorder
    /// that is already installed (common in tests) is not an error.
    pub fn install(&mut self) -> Result<(), MetricsError> {
        register_metrics();

        let builder = PrometheusBuilder::new()
            .set_buckets_for_metric(
                Matcher::Suffix("duration_seconds".to_string()),
                &[
                    0.000_01, 0.000_05, 0.000_1, 0.000_5, 0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0,
                ],
            )
            .map_err(|e| MetricsError::Build(e.to_string()))?;

        match builder.install_recorder() {
            Ok(handle) => {
                self.handle = Some(handle);
                tracing::info!("Metrics recorder installed");
                Ok(())
            },
            Err(e) => {
                let err_msg = e.to_string();
                if err_msg.contains("already initialized") {
                    tracing::warn!("Metrics recorder already initialized, skipping re-initialization");
                    Ok(())
                } else {
                    Err(MetricsError::Install(err_msg))
                }
            },
        }
    }

    /// Get the metrics handle for rendering.
    #[must_use]
    pub const fn handle(&self) -> Option<&PrometheusHandle> {
        self.handle.as_ref()
    }

    /// Render current metrics in Prometheus text format.
    ///
    /// Returns `None` if this recorder was not the one installed.
    #[must_use]
    pub fn render(&self) -> Option<String> {
        self.handle.as_ref().map(PrometheusHandle::render)
    }
}

/// Register all metric descriptions.
pub fn register_metrics() {
    // Use case metrics
    describe_counter!(
        "oneway_use_case_executed_total",
        "Total number of use case runs that started"
    );
    describe_counter!(
        "oneway_use_case_failed_total",
        "Total number of use case runs that failed"
    );
    describe_counter!(
        "oneway_use_case_skipped_total",
        "Total number of use case runs declined by should_execute"
    );
    describe_histogram!(
        "oneway_use_case_duration_seconds",
        "Time from will-execute to completion"
    );

    // Store group metrics
    describe_counter!(
        "oneway_store_group_commits_total",
        "Total number of payloads committed to store groups"
    );
    describe_counter!(
        "oneway_store_group_changes_total",
        "Total number of store group change notifications"
    );

    // Transaction metrics
    describe_counter!(
        "oneway_transactions_total",
        "Total number of transactions started"
    );
    describe_counter!(
        "oneway_transaction_discarded_payloads_total",
        "Total number of payloads discarded because they were never committed"
    );
}

/// Use case metrics recorder.
pub struct UseCaseMetrics;

impl UseCaseMetrics {
    /// Record a started run.
    pub fn record_start() {
        counter!("oneway_use_case_executed_total").increment(1);
    }

    /// Record a settled run.
    pub fn record_completion(duration: Duration) {
        histogram!("oneway_use_case_duration_seconds").record(duration.as_secs_f64());
    }

    /// Record a failed run.
    pub fn record_failure() {
        counter!("oneway_use_case_failed_total").increment(1);
    }

    /// Record a run declined by `should_execute`.
    pub fn record_skipped() {
        counter!("oneway_use_case_skipped_total").increment(1);
    }
}

/// Store group metrics recorder.
pub struct StoreGroupMetrics;

impl StoreGroupMetrics {
    /// Record a committed payload.
    pub fn record_commit() {
        counter!("oneway_store_group_commits_total").increment(1);
    }

    /// Record a change notification.
    pub fn record_change() {
        counter!("oneway_store_group_changes_total").increment(1);
    }
}

/// Transaction metrics recorder.
pub struct TransactionMetrics;

impl TransactionMetrics {
    /// Record a started transaction.
    pub fn record_begin() {
        counter!("oneway_transactions_total").increment(1);
    }

    /// Record payloads discarded at the end of a transaction.
    pub fn record_discarded(count: usize) {
        counter!("oneway_transaction_discarded_payloads_total").increment(count as u64);
    }
}
