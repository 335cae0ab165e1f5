//! Commodities API source.
//!
//! The provider returns rates as units of commodity per one unit of the base
//! currency (`XAU: 0.0005` means one USD buys 0.0005 oz of gold). Each rate
//! is inverted so the stored price is base currency per commodity unit.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use rust_decimal::Decimal;
use serde_json::{Map, Value};

use super::http::{data_envelope, get_json};
use crate::application::ports::QuoteSource;
use crate::domain::errors::SourceError;
use crate::domain::normalize::{PriceDomain, RawQuote, RawResponse, parse_decimal};

/// Fetches `GET {base}/latest?access_key=..&base=..&symbols=..`.
#[derive(Clone)]
pub struct CommoditiesSource {
    client: Client,
    url: String,
    api_key: String,
    base: String,
    symbols: Vec<String>,
}

impl std::fmt::Debug for CommoditiesSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommoditiesSource")
            .field("url", &self.url)
            .field("api_key", &"[REDACTED]")
            .field("base", &self.base)
            .field("symbols", &self.symbols)
            .finish_non_exhaustive()
    }
}

impl CommoditiesSource {
    /// Source name used in logs, metrics and the `source` column.
    pub const NAME: &'static str = "commodities";

    /// Create a source requesting `symbols` priced in `base`.
    #[must_use]
    pub fn new(
        client: Client,
        base_url: &str,
        api_key: impl Into<String>,
        base: impl Into<String>,
        symbols: Vec<String>,
    ) -> Self {
        Self {
            client,
            url: format!("{}/latest", base_url.trim_end_matches('/')),
            api_key: api_key.into(),
            base: base.into(),
            symbols,
        }
    }
}

#[async_trait]
impl QuoteSource for CommoditiesSource {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn price_domain(&self) -> PriceDomain {
        PriceDomain::Signed
    }

    async fn fetch(&self, timeout: Duration) -> Result<RawResponse, SourceError> {
        let symbols = self.symbols.join(",");
        let query = [
            ("access_key", self.api_key.as_str()),
            ("base", self.base.as_str()),
            ("symbols", symbols.as_str()),
        ];
        let body = get_json(&self.client, Self::NAME, &self.url, &query, timeout).await?;
        let data = data_envelope(Self::NAME, body)?;
        rates_to_quotes(data, &self.symbols)
    }
}

fn rates_to_quotes(
    mut data: Map<String, Value>,
    symbols: &[String],
) -> Result<RawResponse, SourceError> {
    if data.get("success") == Some(&Value::Bool(false)) {
        return Err(SourceError::unavailable(
            CommoditiesSource::NAME,
            provider_error(data.get("error")),
        ));
    }

    let unit = data.remove("base").unwrap_or(Value::Null);
    let rates = match data.remove("rates") {
        Some(Value::Object(rates)) => rates,
        Some(_) => {
            return Err(SourceError::malformed(
                CommoditiesSource::NAME,
                "`rates` is not an object",
            ));
        }
        None => {
            return Err(SourceError::malformed(
                CommoditiesSource::NAME,
                "missing `rates`",
            ));
        }
    };

    let quotes = symbols
        .iter()
        .map(|symbol| RawQuote {
            instrument: Value::String(symbol.clone()),
            price: rates.get(symbol).map_or(Value::Null, invert_rate),
            unit: unit.clone(),
        })
        .collect();

    Ok(RawResponse::Many(quotes))
}

/// `1 / rate`, rendered as a decimal string.
///
/// Rates that are not numeric pass through untouched and a zero rate becomes
/// `"1/0"`; both fail price coercion downstream with a descriptive reason.
fn invert_rate(rate: &Value) -> Value {
    let parsed = match rate {
        Value::Number(n) => parse_decimal(&n.to_string()),
        Value::String(s) => parse_decimal(s.trim()),
        _ => None,
    };
    let Some(rate_value) = parsed else {
        return rate.clone();
    };
    match Decimal::ONE.checked_div(rate_value) {
        Some(price) => Value::String(price.normalize().to_string()),
        None => Value::String(format!("1/{rate_value}")),
    }
}

fn provider_error(error: Option<&Value>) -> String {
    let detail = match error {
        Some(Value::Object(obj)) => obj
            .get("info")
            .or_else(|| obj.get("message"))
            .or_else(|| obj.get("type"))
            .map(|v| v.as_str().map_or_else(|| v.to_string(), ToString::to_string)),
        Some(Value::String(s)) => Some(s.clone()),
        Some(other) if !other.is_null() => Some(other.to_string()),
        _ => None,
    };
    detail.map_or_else(
        || "provider reported failure".to_string(),
        |d| format!("provider reported failure: {d}"),
    )
}
