//! Quote Sink Adapters

mod in_memory;
mod postgres;

pub use in_memory::InMemoryQuoteSink;
pub use postgres::PostgresQuoteSink;
