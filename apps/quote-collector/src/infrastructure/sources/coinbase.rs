//! Coinbase spot price source.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde_json::{Map, Value};

use super::http::{data_envelope, get_json};
use crate::application::ports::QuoteSource;
use crate::domain::errors::SourceError;
use crate::domain::normalize::{RawQuote, RawResponse};

/// Fetches `GET {base}/prices/{pair}/spot`.
#[derive(Debug, Clone)]
pub struct CoinbaseSpotSource {
    client: Client,
    url: String,
}

impl CoinbaseSpotSource {
    /// Source name used in logs, metrics and the `source` column.
    pub const NAME: &'static str = "coinbase";

    /// Create a source for `pair` (e.g. `BTC-USD`) against `base_url`.
    #[must_use]
    pub fn new(client: Client, base_url: &str, pair: &str) -> Self {
        Self {
            client,
            url: format!("{}/prices/{pair}/spot", base_url.trim_end_matches('/')),
        }
    }

    /// Request URL.
    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl QuoteSource for CoinbaseSpotSource {
    fn name(&self) -> &str {
        Self::NAME
    }

    async fn fetch(&self, timeout: Duration) -> Result<RawResponse, SourceError> {
        let body = get_json(&self.client, Self::NAME, &self.url, &[], timeout).await?;
        let data = data_envelope(Self::NAME, body)?;
        Ok(spot_quote(data))
    }
}

fn spot_quote(mut data: Map<String, Value>) -> RawResponse {
    let mut take = |key: &str| data.remove(key).unwrap_or(Value::Null);
    RawResponse::Single(RawQuote {
        instrument: take("base"),
        price: take("amount"),
        unit: take("currency"),
    })
}
