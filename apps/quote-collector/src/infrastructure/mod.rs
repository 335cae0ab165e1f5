//! Infrastructure Layer - Adapters and external integrations.
//!
//! This layer contains the concrete implementations of the port interfaces
//! defined in the application layer, plus configuration and observability.

/// Environment-driven configuration.
pub mod config;

/// Prometheus metrics instrumentation.
pub mod metrics;

/// Quote sink adapters (PostgreSQL, in-memory).
pub mod persistence;

/// Quote source adapters (Coinbase, commodities).
pub mod sources;

/// Tracing subscriber and optional OpenTelemetry export.
pub mod telemetry;
