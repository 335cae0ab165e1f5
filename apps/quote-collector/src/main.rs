//! Quote Collector Binary
//!
//! Starts the periodic quote collection loop.
//!
//! # Usage
//!
//! ```bash
//! cargo run --bin quote-collector
//! ```
//!
//! # Environment Variables
//!
//! ## Database
//! - `DB_USER`, `DB_PASSWORD`, `DB_HOST`, `DB_PORT`, `DB_NAME`: connection parts
//!   (defaults: postgres / postgres / localhost / 5432 / meubanco)
//! - `DATABASE_URL`: full connection URL, overrides the parts above
//! - `QUOTES_TABLE`: target table (default: cotacoes)
//!
//! ## Collection
//! - `SLEEP_SECONDS`: pause between cycles (default: 60)
//! - `FETCH_TIMEOUT_SECS`: per-source timeout (default: 10)
//! - `COLLECTOR_MAX_CYCLES`: stop after N cycles, 0 = forever (default: 0)
//! - `FAILURE_POLICY`: all_or_nothing | per_source (default: all_or_nothing)
//!
//! ## Sources
//! - `CRYPTO_PAIR`: Coinbase pair (default: BTC-USD)
//! - `COMMODITIES_API_KEY`: enables the commodities source
//! - `COMMODITY_SYMBOLS`: comma separated (default: XAU,XAG,WTIOIL,BRENTOIL)
//! - `COMMODITY_BASE`: quote currency (default: USD)
//!
//! ## Observability
//! - `METRICS_PORT`: Prometheus port, 0 = disabled (default: 0)
//! - `OTEL_ENABLED`: Enable OpenTelemetry export (default: false)
//! - `RUST_LOG`: Log level (default: info)

use std::sync::Arc;

use anyhow::Context;
use quote_collector::infrastructure::sources::http_client;
use quote_collector::infrastructure::telemetry;
use quote_collector::{
    CoinbaseSpotSource, CollectionLoop, CollectorConfig, CommoditiesSource, Normalizer,
    PostgresQuoteSink, QuoteSource, SystemClock, init_metrics,
};
use tokio::signal;
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Another dependency may have installed one already.
    let _ = rustls::crypto::ring::default_provider().install_default();

    load_dotenv();

    let telemetry_guard = telemetry::init();

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        otlp_export = telemetry_guard.exporting(),
        "Starting quote collector"
    );

    let config = CollectorConfig::from_env().context("invalid configuration")?;
    log_config(&config);

    init_metrics(config.observability.metrics_port)
        .context("failed to start Prometheus exporter")?;

    let sink = PostgresQuoteSink::new(&config.database).context("invalid database settings")?;
    let sources = build_sources(&config)?;
    let normalizer = Normalizer::new(Arc::new(SystemClock::new()));

    let mut collector = CollectionLoop::new(
        sources,
        Arc::new(sink),
        normalizer,
        config.collection.clone(),
    );

    let shutdown_token = CancellationToken::new();
    tokio::spawn(await_shutdown(shutdown_token.clone()));

    let summary = collector.run(shutdown_token).await;

    tracing::info!(
        cycles = summary.cycles,
        succeeded = summary.succeeded,
        failed = summary.failed,
        "Quote collector stopped"
    );
    Ok(())
}

/// Build the configured sources in collection order.
fn build_sources(config: &CollectorConfig) -> anyhow::Result<Vec<Arc<dyn QuoteSource>>> {
    let client = http_client().context("failed to build HTTP client")?;
    let settings = &config.sources;

    let mut sources: Vec<Arc<dyn QuoteSource>> = vec![Arc::new(CoinbaseSpotSource::new(
        client.clone(),
        &settings.coinbase_api_url,
        &settings.crypto_pair,
    ))];

    match settings.commodities_api_key() {
        Some(key) => sources.push(Arc::new(CommoditiesSource::new(
            client,
            &settings.commodities_api_url,
            key,
            settings.commodity_base.clone(),
            settings.commodity_symbols.clone(),
        ))),
        None => tracing::warn!("COMMODITIES_API_KEY not set, commodities source disabled"),
    }

    Ok(sources)
}

/// Load .env file from current directory or any ancestor directory.
fn load_dotenv() {
    if dotenvy::dotenv().is_ok() {
        return;
    }

    if let Ok(cwd) = std::env::current_dir() {
        let mut dir = cwd.as_path();
        while let Some(parent) = dir.parent() {
            let env_path = parent.join(".env");
            if env_path.exists() {
                let _ = dotenvy::from_path(&env_path);
                return;
            }
            dir = parent;
        }
    }
}

/// Log the parsed configuration.
fn log_config(config: &CollectorConfig) {
    tracing::info!(
        database = %config.database.redacted_url(),
        table = %config.database.table,
        interval_secs = config.collection.interval.as_secs(),
        fetch_timeout_secs = config.collection.fetch_timeout.as_secs(),
        max_cycles = ?config.collection.max_cycles,
        policy = config.collection.policy.as_str(),
        "Configuration loaded"
    );
    tracing::debug!(
        crypto_pair = %config.sources.crypto_pair,
        coinbase_url = %config.sources.coinbase_api_url,
        commodities_url = %config.sources.commodities_api_url,
        symbols = ?config.sources.commodity_symbols,
        "Source endpoints"
    );
}

/// Wait for shutdown signal (SIGTERM or SIGINT).
async fn await_shutdown(shutdown_token: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Ctrl+C handler unavailable");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "SIGTERM handler unavailable");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received Ctrl+C, stopping after the current cycle");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, stopping after the current cycle");
        }
    }

    shutdown_token.cancel();
}
