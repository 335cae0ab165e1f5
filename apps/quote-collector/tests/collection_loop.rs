//! Collection Loop Integration Tests
//!
//! Drives the loop end to end with in-process sources and the in-memory
//! sink. Time is paused so multi-cycle runs finish instantly.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use parking_lot::Mutex;
use rust_decimal::Decimal;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use quote_collector::{
    AssemblyError, AssemblyPolicy, CollectionLoop, CycleError, FixedClock, InMemoryQuoteSink,
    LoopSettings, LoopSummary, Normalizer, PriceDomain, QuoteBatch, QuoteSink, QuoteSource,
    RawQuote, RawResponse, SinkError, SourceError, SourceStatus,
};

// =============================================================================
// Fakes
// =============================================================================

struct FakeSource {
    name: &'static str,
    domain: PriceDomain,
    response: Result<RawResponse, SourceError>,
}

impl FakeSource {
    fn spot(name: &'static str, instrument: &str, price: &str, unit: &str) -> Arc<dyn QuoteSource> {
        Arc::new(Self {
            name,
            domain: PriceDomain::NonNegative,
            response: Ok(RawResponse::Single(RawQuote::new(instrument, price, unit))),
        })
    }

    fn many(name: &'static str, quotes: Vec<RawQuote>) -> Arc<dyn QuoteSource> {
        Arc::new(Self {
            name,
            domain: PriceDomain::Signed,
            response: Ok(RawResponse::Many(quotes)),
        })
    }

    fn down(name: &'static str) -> Arc<dyn QuoteSource> {
        Arc::new(Self {
            name,
            domain: PriceDomain::NonNegative,
            response: Err(SourceError::unavailable(name, "HTTP 503 Service Unavailable")),
        })
    }
}

#[async_trait]
impl QuoteSource for FakeSource {
    fn name(&self) -> &str {
        self.name
    }

    fn price_domain(&self) -> PriceDomain {
        self.domain
    }

    async fn fetch(&self, _timeout: Duration) -> Result<RawResponse, SourceError> {
        self.response.clone()
    }
}

/// Formatted log output, captured for the current thread.
#[derive(Clone, Default)]
struct CapturedLogs(Arc<Mutex<Vec<u8>>>);

impl CapturedLogs {
    fn install(&self) -> tracing::subscriber::DefaultGuard {
        let writer = self.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_writer(move || writer.clone())
            .with_ansi(false)
            .without_time()
            .with_max_level(tracing::Level::DEBUG)
            .finish();
        tracing::subscriber::set_default(subscriber)
    }

    fn lines_containing(&self, needle: &str) -> Vec<String> {
        String::from_utf8_lossy(&self.0.lock())
            .lines()
            .filter(|line| line.contains(needle))
            .map(str::to_string)
            .collect()
    }
}

impl std::io::Write for CapturedLogs {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

/// Sink that takes `delay` per append and records when each call ran.
struct SlowSink {
    delay: Duration,
    calls: Mutex<Vec<(Instant, Instant)>>,
    in_flight: Mutex<usize>,
    max_in_flight: Mutex<usize>,
}

impl SlowSink {
    fn new(delay: Duration) -> Self {
        Self {
            delay,
            calls: Mutex::new(Vec::new()),
            in_flight: Mutex::new(0),
            max_in_flight: Mutex::new(0),
        }
    }
}

#[async_trait]
impl QuoteSink for SlowSink {
    async fn append(&self, batch: &QuoteBatch) -> Result<usize, SinkError> {
        let start = Instant::now();
        {
            let mut in_flight = self.in_flight.lock();
            *in_flight += 1;
            let mut max = self.max_in_flight.lock();
            *max = (*max).max(*in_flight);
        }

        tokio::time::sleep(self.delay).await;

        *self.in_flight.lock() -= 1;
        self.calls.lock().push((start, Instant::now()));
        Ok(batch.len())
    }
}

// =============================================================================
// Helpers
// =============================================================================

fn observed_at() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 15, 14, 30, 0).unwrap()
}

fn normalizer() -> Normalizer {
    Normalizer::new(Arc::new(FixedClock::new(observed_at())))
}

fn settings(max_cycles: u64, policy: AssemblyPolicy) -> LoopSettings {
    LoopSettings {
        interval: Duration::from_secs(60),
        fetch_timeout: Duration::from_secs(10),
        max_cycles: Some(max_cycles),
        policy,
    }
}

fn commodities() -> Arc<dyn QuoteSource> {
    FakeSource::many(
        "commodities",
        vec![
            RawQuote::new("XAU", "2000", "USD"),
            RawQuote::new("WTIOIL", "-37.63", "USD"),
        ],
    )
}

// =============================================================================
// Tests
// =============================================================================

#[tokio::test(start_paused = true)]
async fn persists_spot_quote_end_to_end() {
    let sink = Arc::new(InMemoryQuoteSink::new());
    let mut collector = CollectionLoop::new(
        vec![FakeSource::spot("coinbase", "BTC", "65000.12", "USD")],
        sink.clone(),
        normalizer(),
        settings(1, AssemblyPolicy::AllOrNothing),
    );

    let summary = collector.run(CancellationToken::new()).await;

    assert_eq!(
        summary,
        LoopSummary {
            cycles: 1,
            succeeded: 1,
            failed: 0
        }
    );
    let records = sink.records();
    assert_eq!(records.len(), 1);
    let btc = &records[0];
    assert_eq!(btc.source(), "coinbase");
    assert_eq!(btc.instrument(), "BTC");
    assert_eq!(btc.price(), Decimal::from_str("65000.12").unwrap());
    assert_eq!(btc.unit(), "USD");
    assert_eq!(btc.collected_at(), observed_at());
}

#[tokio::test(start_paused = true)]
async fn records_keep_source_order_across_cycles() {
    let sink = Arc::new(InMemoryQuoteSink::new());
    let mut collector = CollectionLoop::new(
        vec![FakeSource::spot("coinbase", "BTC", "65000.12", "USD"), commodities()],
        sink.clone(),
        normalizer(),
        settings(2, AssemblyPolicy::AllOrNothing),
    );

    let summary = collector.run(CancellationToken::new()).await;

    assert_eq!(summary.succeeded, 2);
    let instruments: Vec<String> = sink
        .records()
        .iter()
        .map(|r| r.instrument().to_string())
        .collect();
    assert_eq!(
        instruments,
        vec!["BTC", "XAU", "WTIOIL", "BTC", "XAU", "WTIOIL"]
    );
    assert_eq!(sink.append_calls(), 2);
}

#[tokio::test(start_paused = true)]
async fn failing_sink_does_not_stop_the_loop() {
    let sink = Arc::new(InMemoryQuoteSink::fail_after(0));
    let mut collector = CollectionLoop::new(
        vec![FakeSource::spot("coinbase", "BTC", "65000.12", "USD")],
        sink.clone(),
        normalizer(),
        settings(3, AssemblyPolicy::AllOrNothing),
    );

    let summary = collector.run(CancellationToken::new()).await;

    assert_eq!(
        summary,
        LoopSummary {
            cycles: 3,
            succeeded: 0,
            failed: 3
        }
    );
    assert_eq!(sink.append_calls(), 3);
    assert!(sink.is_empty());
}

#[tokio::test(start_paused = true)]
async fn partial_sink_write_reports_rows_written() {
    let sink = Arc::new(InMemoryQuoteSink::fail_after(2));
    let mut collector = CollectionLoop::new(
        vec![FakeSource::spot("coinbase", "BTC", "65000.12", "USD"), commodities()],
        sink.clone(),
        normalizer(),
        settings(1, AssemblyPolicy::AllOrNothing),
    );

    let err = collector.run_cycle().await.unwrap_err();

    match err {
        CycleError::Sink(SinkError::Write { rows_written, .. }) => assert_eq!(rows_written, 2),
        other => panic!("expected sink write error, got {other:?}"),
    }
    assert_eq!(sink.len(), 2);
}

#[tokio::test(start_paused = true)]
async fn failed_source_blocks_batch_by_default() {
    let sink = Arc::new(InMemoryQuoteSink::new());
    let mut collector = CollectionLoop::new(
        vec![
            FakeSource::spot("coinbase", "BTC", "65000.12", "USD"),
            FakeSource::down("commodities"),
        ],
        sink.clone(),
        normalizer(),
        settings(1, AssemblyPolicy::AllOrNothing),
    );

    let err = collector.run_cycle().await.unwrap_err();

    match err {
        CycleError::Assembly(AssemblyError::SourceFailed { failures }) => {
            assert_eq!(failures.len(), 1);
            assert_eq!(failures[0].source, "commodities");
        }
        other => panic!("expected assembly failure, got {other:?}"),
    }
    assert!(sink.is_empty());
    assert_eq!(sink.append_calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn per_source_policy_persists_healthy_sources() {
    let sink = Arc::new(InMemoryQuoteSink::new());
    let mut collector = CollectionLoop::new(
        vec![
            FakeSource::spot("coinbase", "BTC", "65000.12", "USD"),
            FakeSource::down("commodities"),
        ],
        sink.clone(),
        normalizer(),
        settings(1, AssemblyPolicy::PerSource),
    );

    let report = collector.run_cycle().await.unwrap();

    assert_eq!(report.rows_written, 1);
    assert_eq!(report.sources.len(), 2);
    assert_eq!(report.sources[0], ("coinbase".to_string(), SourceStatus::Collected { records: 1 }));
    assert!(matches!(
        &report.sources[1],
        (name, SourceStatus::Failed { kind: "unavailable", .. }) if name == "commodities"
    ));
    assert_eq!(sink.records()[0].instrument(), "BTC");
}

#[tokio::test(start_paused = true)]
async fn malformed_entry_fails_its_whole_source() {
    let sink = Arc::new(InMemoryQuoteSink::new());
    let bad_commodities = FakeSource::many(
        "commodities",
        vec![
            RawQuote::new("XAU", "2000", "USD"),
            RawQuote::new("XAG", serde_json::Value::Null, "USD"),
        ],
    );
    let mut collector = CollectionLoop::new(
        vec![FakeSource::spot("coinbase", "BTC", "65000.12", "USD"), bad_commodities],
        sink.clone(),
        normalizer(),
        settings(1, AssemblyPolicy::PerSource),
    );

    let report = collector.run_cycle().await.unwrap();

    assert_eq!(report.rows_written, 1);
    assert!(matches!(
        report.sources[1].1,
        SourceStatus::Failed { kind: "malformed_response", .. }
    ));
    assert!(sink.records().iter().all(|r| r.source() == "coinbase"));
}

#[tokio::test(start_paused = true)]
async fn negative_price_rejected_for_spot_source() {
    let sink = Arc::new(InMemoryQuoteSink::new());
    let mut collector = CollectionLoop::new(
        vec![FakeSource::spot("coinbase", "BTC", "-1", "USD")],
        sink.clone(),
        normalizer(),
        settings(1, AssemblyPolicy::AllOrNothing),
    );

    assert!(collector.run_cycle().await.is_err());
    assert!(sink.is_empty());
}

#[tokio::test(start_paused = true)]
async fn cycles_never_overlap() {
    let sink = Arc::new(SlowSink::new(Duration::from_secs(90)));
    let interval = Duration::from_secs(60);
    let mut collector = CollectionLoop::new(
        vec![FakeSource::spot("coinbase", "BTC", "65000.12", "USD")],
        sink.clone(),
        normalizer(),
        LoopSettings {
            interval,
            ..settings(3, AssemblyPolicy::AllOrNothing)
        },
    );

    let summary = collector.run(CancellationToken::new()).await;

    assert_eq!(summary.succeeded, 3);
    assert_eq!(*sink.max_in_flight.lock(), 1);

    let calls = sink.calls.lock().clone();
    assert_eq!(calls.len(), 3);
    for pair in calls.windows(2) {
        let (_, previous_end) = pair[0];
        let (next_start, _) = pair[1];
        assert!(
            next_start >= previous_end + interval,
            "next cycle started before the interval elapsed"
        );
    }
}

#[tokio::test(start_paused = true)]
async fn cancellation_during_sleep_stops_promptly() {
    let sink = Arc::new(InMemoryQuoteSink::new());
    let mut collector = CollectionLoop::new(
        vec![FakeSource::spot("coinbase", "BTC", "65000.12", "USD")],
        sink.clone(),
        normalizer(),
        LoopSettings {
            interval: Duration::from_secs(3600),
            max_cycles: None,
            ..LoopSettings::default()
        },
    );

    let token = CancellationToken::new();
    let handle = tokio::spawn({
        let token = token.clone();
        async move { collector.run(token).await }
    });

    tokio::time::sleep(Duration::from_secs(5)).await;
    let cancelled_at = Instant::now();
    token.cancel();

    let summary = handle.await.unwrap();

    assert_eq!(summary.cycles, 1);
    assert!(cancelled_at.elapsed() < Duration::from_secs(1));
    assert_eq!(sink.len(), 1);
}

#[tokio::test(start_paused = true)]
async fn every_failed_cycle_logs_an_error() {
    let logs = CapturedLogs::default();
    let _guard = logs.install();
    let mut collector = CollectionLoop::new(
        vec![FakeSource::spot("coinbase", "BTC", "65000.12", "USD")],
        Arc::new(InMemoryQuoteSink::fail_after(0)),
        normalizer(),
        settings(3, AssemblyPolicy::AllOrNothing),
    );

    let summary = collector.run(CancellationToken::new()).await;

    assert_eq!(summary.failed, 3);
    let failed = logs.lines_containing("Cycle failed");
    assert_eq!(failed.len(), 3, "{failed:#?}");
    assert!(failed.iter().all(|line| line.contains("ERROR") && line.contains("stage=")));
    assert!(logs.lines_containing("Quotes persisted").is_empty());
}

#[tokio::test(start_paused = true)]
async fn every_persisted_cycle_logs_rows() {
    let logs = CapturedLogs::default();
    let _guard = logs.install();
    let mut collector = CollectionLoop::new(
        vec![FakeSource::spot("coinbase", "BTC", "65000.12", "USD"), commodities()],
        Arc::new(InMemoryQuoteSink::new()),
        normalizer(),
        settings(2, AssemblyPolicy::AllOrNothing),
    );

    let summary = collector.run(CancellationToken::new()).await;

    assert_eq!(summary.succeeded, 2);
    let persisted = logs.lines_containing("Quotes persisted");
    assert_eq!(persisted.len(), 2, "{persisted:#?}");
    assert!(persisted.iter().all(|line| line.contains("INFO") && line.contains("rows=3")));
    assert!(logs.lines_containing("Cycle failed").is_empty());
}

#[tokio::test(start_paused = true)]
async fn skipped_source_warns_once_per_cycle() {
    let logs = CapturedLogs::default();
    let _guard = logs.install();
    let mut collector = CollectionLoop::new(
        vec![
            FakeSource::spot("coinbase", "BTC", "65000.12", "USD"),
            FakeSource::down("commodities"),
        ],
        Arc::new(InMemoryQuoteSink::new()),
        normalizer(),
        settings(1, AssemblyPolicy::PerSource),
    );

    let summary = collector.run(CancellationToken::new()).await;

    assert_eq!(summary.succeeded, 1);
    let warnings = logs.lines_containing("WARN");
    assert_eq!(warnings.len(), 1, "{warnings:#?}");
    assert!(warnings[0].contains("source=commodities"));
    assert!(warnings[0].contains("HTTP 503"));

    let persisted = logs.lines_containing("Quotes persisted");
    assert_eq!(persisted.len(), 1);
    assert!(persisted[0].contains("skipped_sources=1"));
}
