//! Collection Loop
//!
//! Runs collection cycles forever (or until stopped), one at a time:
//!
//! ```text
//!   ┌──────── Idle (sleep interval) ◄──────┐
//!   │                                      │ always, success or failure
//!   └─► Running: fetch → normalize → assemble → append
//! ```
//!
//! Every failure inside a cycle (upstream, normalization, assembly, sink, or
//! a panicking adapter) is logged and counted and never escapes `run`. The
//! sleep is measured from the end of one cycle to the start of the next, so
//! a slow cycle pushes the schedule out rather than overlapping it.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use crate::application::ports::{QuoteSink, QuoteSource, SinkError, SourceError};
use crate::domain::batch::{AssemblyError, AssemblyPolicy, BatchAssembler, SourceOutcome};
use crate::domain::errors::SourceFailure;
use crate::domain::normalize::Normalizer;
use crate::infrastructure::metrics;

/// Scheduling and isolation settings for the loop.
#[derive(Debug, Clone)]
pub struct LoopSettings {
    /// Sleep between the end of one cycle and the start of the next.
    pub interval: Duration,
    /// Per-source fetch timeout.
    pub fetch_timeout: Duration,
    /// Stop after this many cycles (`None` = run until cancelled).
    pub max_cycles: Option<u64>,
    /// How a failed source affects the batch.
    pub policy: AssemblyPolicy,
}

impl Default for LoopSettings {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(60),
            fetch_timeout: Duration::from_secs(10),
            max_cycles: None,
            policy: AssemblyPolicy::AllOrNothing,
        }
    }
}

/// Per-source result within a cycle report.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceStatus {
    /// The source produced `records` normalized records.
    Collected {
        /// Record count.
        records: usize,
    },
    /// The source failed.
    Failed {
        /// Failure label (`unavailable`, `malformed`, `malformed_response`).
        kind: &'static str,
        /// Error details.
        message: String,
    },
}

impl SourceStatus {
    fn from_outcome(outcome: &SourceOutcome) -> Self {
        match &outcome.result {
            Ok(records) => Self::Collected {
                records: records.len(),
            },
            Err(failure) => Self::Failed {
                kind: failure.kind(),
                message: failure.to_string(),
            },
        }
    }
}

/// Summary of a successful cycle.
#[derive(Debug, Clone)]
pub struct CycleReport {
    /// 1-based cycle number.
    pub cycle: u64,
    /// Status of every source, in configured order.
    pub sources: Vec<(String, SourceStatus)>,
    /// Rows appended to the sink.
    pub rows_written: usize,
    /// Wall time spent in the cycle.
    pub duration: Duration,
}

impl CycleReport {
    /// Sources that failed but did not block the batch.
    #[must_use]
    pub fn skipped_sources(&self) -> usize {
        self.sources
            .iter()
            .filter(|(_, status)| matches!(status, SourceStatus::Failed { .. }))
            .count()
    }
}

/// Why a cycle persisted nothing (or only part of its batch).
#[derive(Debug, thiserror::Error)]
pub enum CycleError {
    /// Batch assembly refused the cycle's outcomes.
    #[error("batch assembly failed: {0}")]
    Assembly(#[from] AssemblyError),

    /// The sink rejected the batch.
    #[error(transparent)]
    Sink(#[from] SinkError),

    /// An adapter panicked during the cycle.
    #[error("cycle panicked: {0}")]
    Panicked(String),
}

impl CycleError {
    const fn stage(&self) -> &'static str {
        match self {
            Self::Assembly(_) => "assembly",
            Self::Sink(_) => "sink",
            Self::Panicked(_) => "panic",
        }
    }
}

/// Totals returned when the loop stops.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoopSummary {
    /// Cycles run.
    pub cycles: u64,
    /// Cycles that persisted their batch.
    pub succeeded: u64,
    /// Cycles that failed at any stage.
    pub failed: u64,
}

/// Periodic fetch → normalize → assemble → persist driver.
pub struct CollectionLoop {
    sources: Vec<Arc<dyn QuoteSource>>,
    sink: Arc<dyn QuoteSink>,
    normalizer: Normalizer,
    assembler: BatchAssembler,
    settings: LoopSettings,
    cycles_started: u64,
}

impl std::fmt::Debug for CollectionLoop {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CollectionLoop")
            .field(
                "sources",
                &self.sources.iter().map(|s| s.name()).collect::<Vec<_>>(),
            )
            .field("settings", &self.settings)
            .field("cycles_started", &self.cycles_started)
            .finish_non_exhaustive()
    }
}

impl CollectionLoop {
    /// Create a loop over `sources`, in the order they will be fetched.
    #[must_use]
    pub fn new(
        sources: Vec<Arc<dyn QuoteSource>>,
        sink: Arc<dyn QuoteSink>,
        normalizer: Normalizer,
        settings: LoopSettings,
    ) -> Self {
        Self {
            sources,
            sink,
            normalizer,
            assembler: BatchAssembler::new(settings.policy),
            settings,
            cycles_started: 0,
        }
    }

    /// Run cycles until `shutdown` is cancelled or `max_cycles` is reached.
    ///
    /// Never returns early because of a cycle failure. A cycle already in
    /// flight when `shutdown` fires is allowed to finish.
    pub async fn run(&mut self, shutdown: CancellationToken) -> LoopSummary {
        let mut summary = LoopSummary::default();

        tracing::info!(
            sources = self.sources.len(),
            interval_secs = self.settings.interval.as_secs_f64(),
            policy = self.settings.policy.as_str(),
            "Collection loop started"
        );

        loop {
            if shutdown.is_cancelled() {
                break;
            }

            let started = Instant::now();
            let result = AssertUnwindSafe(self.run_cycle())
                .catch_unwind()
                .await
                .unwrap_or_else(|payload| Err(CycleError::Panicked(panic_message(&*payload))));
            let elapsed = started.elapsed();

            summary.cycles += 1;
            match result {
                Ok(report) => {
                    summary.succeeded += 1;
                    metrics::record_cycle(true, elapsed);
                    tracing::info!(
                        cycle = report.cycle,
                        rows = report.rows_written,
                        skipped_sources = report.skipped_sources(),
                        duration_ms = elapsed.as_millis(),
                        "Quotes persisted"
                    );
                }
                Err(e) => {
                    summary.failed += 1;
                    metrics::record_cycle(false, elapsed);
                    metrics::record_cycle_error(e.stage());
                    tracing::error!(
                        cycle = self.cycles_started,
                        stage = e.stage(),
                        error = %e,
                        duration_ms = elapsed.as_millis(),
                        "Cycle failed"
                    );
                }
            }

            if self
                .settings
                .max_cycles
                .is_some_and(|max| summary.cycles >= max)
            {
                tracing::info!(cycles = summary.cycles, "Cycle limit reached");
                break;
            }

            tokio::select! {
                () = shutdown.cancelled() => break,
                () = tokio::time::sleep(self.settings.interval) => {}
            }
        }

        tracing::info!(
            cycles = summary.cycles,
            succeeded = summary.succeeded,
            failed = summary.failed,
            "Collection loop stopped"
        );
        summary
    }

    /// Run exactly one cycle and report its result.
    pub async fn run_cycle(&mut self) -> Result<CycleReport, CycleError> {
        self.cycles_started += 1;
        let cycle = self.cycles_started;
        self.execute_cycle(cycle)
            .instrument(tracing::info_span!("cycle", cycle))
            .await
    }

    async fn execute_cycle(&self, cycle: u64) -> Result<CycleReport, CycleError> {
        let started = Instant::now();

        let mut outcomes = Vec::with_capacity(self.sources.len());
        for source in &self.sources {
            outcomes.push(self.collect_from(source.as_ref()).await);
        }

        let sources: Vec<(String, SourceStatus)> = outcomes
            .iter()
            .map(|o| (o.source.clone(), SourceStatus::from_outcome(o)))
            .collect();

        // Failed sources were already logged by `collect_from`.
        let assembly = self.assembler.assemble(outcomes)?;

        let rows_written = match self.sink.append(&assembly.batch).await {
            Ok(rows) => rows,
            Err(e) => {
                metrics::record_rows_persisted(e.rows_written());
                return Err(e.into());
            }
        };
        metrics::record_rows_persisted(rows_written);

        Ok(CycleReport {
            cycle,
            sources,
            rows_written,
            duration: started.elapsed(),
        })
    }

    /// Fetch and normalize one source, bounding the fetch by the timeout.
    async fn collect_from(&self, source: &dyn QuoteSource) -> SourceOutcome {
        let name = source.name().to_string();
        let timeout = self.settings.fetch_timeout;

        let fetched = tokio::time::timeout(timeout, source.fetch(timeout))
            .await
            .unwrap_or_else(|_| {
                Err(SourceError::unavailable(
                    &name,
                    format!("timed out after {}ms", timeout.as_millis()),
                ))
            });

        let result = fetched.map_err(SourceFailure::from).and_then(|raw| {
            self.normalizer
                .normalize(&name, source.price_domain(), &raw)
                .map_err(SourceFailure::from)
        });

        match &result {
            Ok(records) => {
                tracing::debug!(source = %name, records = records.len(), "Source collected");
            }
            Err(failure) => {
                metrics::record_source_failure(&name, failure.kind());
                tracing::warn!(source = %name, error = %failure, "Source failed");
            }
        }

        SourceOutcome {
            source: name,
            result,
        }
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| (*s).to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic payload".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::ports::MockQuoteSink;
    use crate::domain::clock::FixedClock;
    use crate::domain::normalize::{RawQuote, RawResponse};
    use async_trait::async_trait;
    use chrono::{TimeZone, Utc};

    struct StaticSource {
        name: &'static str,
        response: Result<RawResponse, SourceError>,
    }

    #[async_trait]
    impl QuoteSource for StaticSource {
        fn name(&self) -> &str {
            self.name
        }

        async fn fetch(&self, _timeout: Duration) -> Result<RawResponse, SourceError> {
            self.response.clone()
        }
    }

    struct HangingSource;

    #[async_trait]
    impl QuoteSource for HangingSource {
        fn name(&self) -> &str {
            "hanging"
        }

        async fn fetch(&self, _timeout: Duration) -> Result<RawResponse, SourceError> {
            std::future::pending().await
        }
    }

    struct PanickingSource;

    #[async_trait]
    impl QuoteSource for PanickingSource {
        fn name(&self) -> &str {
            "panicking"
        }

        async fn fetch(&self, _timeout: Duration) -> Result<RawResponse, SourceError> {
            panic!("adapter bug")
        }
    }

    fn ok_source(name: &'static str, instruments: &[&str]) -> Arc<dyn QuoteSource> {
        Arc::new(StaticSource {
            name,
            response: Ok(RawResponse::Many(
                instruments
                    .iter()
                    .map(|i| RawQuote::new(*i, "10.5", "USD"))
                    .collect(),
            )),
        })
    }

    fn failing_source(name: &'static str) -> Arc<dyn QuoteSource> {
        Arc::new(StaticSource {
            name,
            response: Err(SourceError::unavailable(name, "HTTP 503")),
        })
    }

    fn normalizer() -> Normalizer {
        Normalizer::new(Arc::new(FixedClock::new(
            Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap(),
        )))
    }

    fn collection_loop(
        sources: Vec<Arc<dyn QuoteSource>>,
        sink: MockQuoteSink,
        settings: LoopSettings,
    ) -> CollectionLoop {
        CollectionLoop::new(sources, Arc::new(sink), normalizer(), settings)
    }

    #[tokio::test]
    async fn cycle_appends_sources_in_order() {
        let mut sink = MockQuoteSink::new();
        sink.expect_append()
            .withf(|batch| {
                let instruments: Vec<&str> =
                    batch.records().iter().map(|r| r.instrument()).collect();
                instruments == ["A1", "A2", "B1"]
            })
            .times(1)
            .returning(|batch| Ok(batch.len()));

        let mut collector = collection_loop(
            vec![ok_source("a", &["A1", "A2"]), ok_source("b", &["B1"])],
            sink,
            LoopSettings::default(),
        );

        let report = collector.run_cycle().await.unwrap();
        assert_eq!(report.cycle, 1);
        assert_eq!(report.rows_written, 3);
        assert_eq!(report.skipped_sources(), 0);
        assert_eq!(
            report.sources,
            vec![
                ("a".to_string(), SourceStatus::Collected { records: 2 }),
                ("b".to_string(), SourceStatus::Collected { records: 1 }),
            ]
        );
    }

    #[tokio::test]
    async fn failed_source_skips_sink_under_all_or_nothing() {
        let mut sink = MockQuoteSink::new();
        sink.expect_append().times(0);

        let mut collector = collection_loop(
            vec![ok_source("a", &["A1", "A2"]), failing_source("b")],
            sink,
            LoopSettings::default(),
        );

        let err = collector.run_cycle().await.unwrap_err();
        assert!(matches!(
            err,
            CycleError::Assembly(AssemblyError::SourceFailed { .. })
        ));
    }

    #[tokio::test]
    async fn failed_source_tolerated_under_per_source() {
        let mut sink = MockQuoteSink::new();
        sink.expect_append()
            .withf(|batch| batch.len() == 2 && batch.sources() == ["a"])
            .times(1)
            .returning(|batch| Ok(batch.len()));

        let settings = LoopSettings {
            policy: AssemblyPolicy::PerSource,
            ..LoopSettings::default()
        };
        let mut collector = collection_loop(
            vec![ok_source("a", &["A1", "A2"]), failing_source("b")],
            sink,
            settings,
        );

        let report = collector.run_cycle().await.unwrap();
        assert_eq!(report.rows_written, 2);
        assert_eq!(report.skipped_sources(), 1);
        assert!(matches!(
            report.sources[1].1,
            SourceStatus::Failed {
                kind: "unavailable",
                ..
            }
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn hanging_source_times_out_as_unavailable() {
        let mut sink = MockQuoteSink::new();
        sink.expect_append()
            .times(1)
            .returning(|batch| Ok(batch.len()));

        let settings = LoopSettings {
            policy: AssemblyPolicy::PerSource,
            fetch_timeout: Duration::from_secs(5),
            ..LoopSettings::default()
        };
        let mut collector = collection_loop(
            vec![Arc::new(HangingSource), ok_source("a", &["A1"])],
            sink,
            settings,
        );

        let report = collector.run_cycle().await.unwrap();
        match &report.sources[0].1 {
            SourceStatus::Failed { kind, message } => {
                assert_eq!(*kind, "unavailable");
                assert!(message.contains("timed out after 5000ms"));
            }
            other => panic!("expected timeout failure, got {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn sink_failures_never_stop_the_loop() {
        let mut sink = MockQuoteSink::new();
        sink.expect_append()
            .times(3)
            .returning(|_| Err(SinkError::Connection("connection refused".to_string())));

        let settings = LoopSettings {
            max_cycles: Some(3),
            ..LoopSettings::default()
        };
        let mut collector = collection_loop(vec![ok_source("a", &["A1"])], sink, settings);

        let summary = collector.run(CancellationToken::new()).await;
        assert_eq!(
            summary,
            LoopSummary {
                cycles: 3,
                succeeded: 0,
                failed: 3,
            }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn panicking_source_is_contained() {
        let mut sink = MockQuoteSink::new();
        sink.expect_append().times(0);

        let settings = LoopSettings {
            max_cycles: Some(2),
            ..LoopSettings::default()
        };
        let mut collector = collection_loop(vec![Arc::new(PanickingSource)], sink, settings);

        let summary = collector.run(CancellationToken::new()).await;
        assert_eq!(summary.cycles, 2);
        assert_eq!(summary.failed, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_during_sleep_stops_promptly() {
        let mut sink = MockQuoteSink::new();
        sink.expect_append()
            .times(1)
            .returning(|batch| Ok(batch.len()));

        let mut collector = collection_loop(
            vec![ok_source("a", &["A1"])],
            sink,
            LoopSettings::default(),
        );

        let shutdown = CancellationToken::new();
        let canceller = shutdown.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(5)).await;
            canceller.cancel();
        });

        let started = Instant::now();
        let summary = collector.run(shutdown).await;

        assert_eq!(summary.cycles, 1);
        assert_eq!(summary.succeeded, 1);
        assert!(started.elapsed() < Duration::from_secs(60));
    }

    #[tokio::test]
    async fn cancelled_before_start_runs_nothing() {
        let mut sink = MockQuoteSink::new();
        sink.expect_append().times(0);

        let mut collector = collection_loop(
            vec![ok_source("a", &["A1"])],
            sink,
            LoopSettings::default(),
        );

        let shutdown = CancellationToken::new();
        shutdown.cancel();
        assert_eq!(collector.run(shutdown).await, LoopSummary::default());
    }

    #[test]
    fn panic_message_extraction() {
        let payload: Box<dyn std::any::Any + Send> = Box::new("static message");
        assert_eq!(panic_message(&*payload), "static message");

        let payload: Box<dyn std::any::Any + Send> = Box::new(String::from("owned message"));
        assert_eq!(panic_message(&*payload), "owned message");

        let payload: Box<dyn std::any::Any + Send> = Box::new(42_u8);
        assert_eq!(panic_message(&*payload), "unknown panic payload");
    }
}
