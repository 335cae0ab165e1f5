//! Port Interfaces
//!
//! Contracts between the collection loop and the outside world, following the
//! Hexagonal Architecture pattern.
//!
//! ## Driven Ports (Outbound)
//!
//! - `QuoteSource`: a provider of current quotes for one or more instruments
//! - `QuoteSink`: append-only storage for quote batches

mod quote_sink_port;
mod quote_source_port;

pub use crate::domain::errors::SourceError;
pub use quote_sink_port::{QuoteSink, SinkError};
pub use quote_source_port::QuoteSource;

#[cfg(test)]
pub use quote_sink_port::MockQuoteSink;
