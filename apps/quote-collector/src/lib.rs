#![cfg_attr(
    test,
    allow(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::float_cmp,
        clippy::too_many_lines,
        clippy::needless_pass_by_value,
        clippy::items_after_statements
    )
)]

//! Quote Collector - Periodic Market Quote Recorder
//!
//! Polls external quote providers (a crypto spot price and a basket of
//! commodities) on a fixed interval, normalizes the responses into uniform
//! rows and appends them to a relational table.
//!
//! # Layers (inside → outside)
//!
//! - **Domain**: Quote records, normalization, batch assembly
//!   - `quote`: `QuoteRecord` and `QuoteBatch`
//!   - `normalize`: raw provider payloads → `QuoteRecord`s
//!   - `batch`: per-source outcomes → one batch per cycle
//!   - `clock`: observation timestamps
//!
//! - **Application**: Ports and the collection loop
//!   - `ports`: `QuoteSource` and `QuoteSink` contracts
//!   - `services`: the collection loop
//!
//! - **Infrastructure**: Adapters and ambient concerns
//!   - `sources`: Coinbase and commodities HTTP adapters
//!   - `persistence`: PostgreSQL and in-memory sinks
//!   - `config`: environment-driven settings
//!   - `metrics`, `telemetry`: observability
//!
//! # Data Flow
//!
//! ```text
//! Coinbase ────┐
//!              ├──► Normalizer ──► Batch Assembler ──► Sink (PostgreSQL)
//! Commodities ─┘
//!        ▲                                               │
//!        └──────────── sleep(SLEEP_SECONDS) ◄────────────┘
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]

// =============================================================================
// Module Declarations
// =============================================================================

/// Domain layer - Quote types and pure transformations.
pub mod domain;

/// Application layer - Ports and the collection loop.
pub mod application;

/// Infrastructure layer - Adapters and external integrations.
pub mod infrastructure;

// =============================================================================
// Re-exports
// =============================================================================

// Domain types
pub use domain::batch::{
    Assembly, AssemblyError, AssemblyPolicy, BatchAssembler, FailedSource, SourceOutcome,
};
pub use domain::clock::{Clock, FixedClock, SystemClock};
pub use domain::errors::{SourceError, SourceFailure};
pub use domain::normalize::{NormalizeError, Normalizer, PriceDomain, RawQuote, RawResponse};
pub use domain::quote::{QuoteBatch, QuoteRecord};

// Application
pub use application::ports::{QuoteSink, QuoteSource, SinkError};
pub use application::services::{
    CollectionLoop, CycleError, CycleReport, LoopSettings, LoopSummary, SourceStatus,
};

// Infrastructure config
pub use infrastructure::config::{
    CollectorConfig, ConfigError, DatabaseSettings, ObservabilitySettings, SourceSettings,
};

// Adapters
pub use infrastructure::persistence::{InMemoryQuoteSink, PostgresQuoteSink};
pub use infrastructure::sources::{CoinbaseSpotSource, CommoditiesSource};

// Observability
pub use infrastructure::metrics::init_metrics;
pub use infrastructure::telemetry::{TelemetryConfig, TelemetryGuard, init as init_telemetry};
