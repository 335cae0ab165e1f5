//! Quote Source Adapters
//!
//! HTTP implementations of [`QuoteSource`](crate::application::ports::QuoteSource).
//! Both providers wrap their payload in a `{"data": ...}` envelope.

mod coinbase;
mod commodities;
mod http;

pub use coinbase::CoinbaseSpotSource;
pub use commodities::CommoditiesSource;
pub use http::http_client;
