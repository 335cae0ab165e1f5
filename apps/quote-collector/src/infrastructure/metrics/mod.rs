//! Prometheus Metrics Module
//!
//! Exposes collector metrics in Prometheus format.
//!
//! # Metrics
//!
//! - `quote_collector_cycles_total{outcome}`: cycles by success/failure
//! - `quote_collector_cycle_errors_total{stage}`: failed cycles by stage
//! - `quote_collector_source_failures_total{source,kind}`: per-source failures
//! - `quote_collector_rows_persisted_total`: rows appended to the sink
//! - `quote_collector_cycle_duration_seconds`: cycle wall time
//!
//! Recording is a no-op until [`init_metrics`] installs a recorder.

use std::net::{Ipv4Addr, SocketAddr};
use std::sync::OnceLock;
use std::time::Duration;

use metrics::{counter, describe_counter, describe_histogram, histogram};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};

// =============================================================================
// Recorder Installation
// =============================================================================

static INSTALLED: OnceLock<()> = OnceLock::new();

/// Install the Prometheus recorder and serve `/metrics` on `port`.
///
/// Port `0` disables the exporter. Must be called from within a tokio
/// runtime. Subsequent calls are no-ops.
pub fn init_metrics(port: u16) -> Result<(), BuildError> {
    if port == 0 || INSTALLED.get().is_some() {
        return Ok(());
    }

    PrometheusBuilder::new()
        .with_http_listener(SocketAddr::from((Ipv4Addr::UNSPECIFIED, port)))
        .install()?;

    register_metrics();
    let _ = INSTALLED.set(());
    tracing::info!(port, "Prometheus exporter listening");
    Ok(())
}

fn register_metrics() {
    describe_counter!(
        "quote_collector_cycles_total",
        "Collection cycles run, by outcome"
    );
    describe_counter!(
        "quote_collector_cycle_errors_total",
        "Failed collection cycles, by failing stage"
    );
    describe_counter!(
        "quote_collector_source_failures_total",
        "Quote source failures, by source and kind"
    );
    describe_counter!(
        "quote_collector_rows_persisted_total",
        "Quote rows appended to the sink"
    );
    describe_histogram!(
        "quote_collector_cycle_duration_seconds",
        "Wall time of a collection cycle"
    );
}

// =============================================================================
// Metric Recording Functions
// =============================================================================

const fn outcome_label(success: bool) -> &'static str {
    if success { "success" } else { "failure" }
}

/// Record a finished cycle.
pub fn record_cycle(success: bool, duration: Duration) {
    let outcome = outcome_label(success);
    counter!("quote_collector_cycles_total", "outcome" => outcome).increment(1);
    histogram!("quote_collector_cycle_duration_seconds", "outcome" => outcome)
        .record(duration.as_secs_f64());
}

/// Record the stage at which a cycle failed.
pub fn record_cycle_error(stage: &'static str) {
    counter!("quote_collector_cycle_errors_total", "stage" => stage).increment(1);
}

/// Record a source failure.
pub fn record_source_failure(source: &str, kind: &'static str) {
    counter!(
        "quote_collector_source_failures_total",
        "source" => source.to_string(),
        "kind" => kind
    )
    .increment(1);
}

/// Record rows appended to the sink.
pub fn record_rows_persisted(rows: usize) {
    counter!("quote_collector_rows_persisted_total").increment(rows as u64);
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn outcome_labels() {
        assert_eq!(outcome_label(true), "success");
        assert_eq!(outcome_label(false), "failure");
    }

    #[test]
    fn disabled_port_installs_nothing() {
        assert!(init_metrics(0).is_ok());
        assert!(INSTALLED.get().is_none());
    }

    #[test]
    fn recording_without_recorder_is_noop() {
        record_cycle(true, Duration::from_millis(250));
        record_cycle_error("sink");
        record_source_failure("coinbase", "unavailable");
        record_rows_persisted(5);
    }
}
