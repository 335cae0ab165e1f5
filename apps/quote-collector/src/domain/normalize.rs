//! Record Normalizer
//!
//! Converts provider payloads into [`QuoteRecord`]s. Source adapters only
//! unwrap their provider envelope into [`RawQuote`]s with untyped fields;
//! every type coercion and validation happens here so that all sources share
//! one definition of a well-formed row.
//!
//! A response is normalized all-or-nothing: one bad entry fails the whole
//! response and no records are returned.

use std::sync::Arc;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::clock::Clock;
use super::quote::QuoteRecord;

/// Whether an instrument may legitimately quote below zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PriceDomain {
    /// Spot prices in a currency; negatives are malformed.
    #[default]
    NonNegative,
    /// Instruments such as commodity futures that can trade below zero.
    Signed,
}

/// One quote as delivered by a provider, before coercion.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct RawQuote {
    /// Instrument identifier; must be a non-empty string.
    #[serde(default)]
    pub instrument: Value,
    /// Price; a JSON number or a numeric string.
    #[serde(default)]
    pub price: Value,
    /// Quote unit; must be a non-empty string.
    #[serde(default)]
    pub unit: Value,
}

impl RawQuote {
    /// Convenience constructor.
    #[must_use]
    pub fn new(
        instrument: impl Into<Value>,
        price: impl Into<Value>,
        unit: impl Into<Value>,
    ) -> Self {
        Self {
            instrument: instrument.into(),
            price: price.into(),
            unit: unit.into(),
        }
    }
}

/// Shape of a provider response.
#[derive(Debug, Clone, PartialEq)]
pub enum RawResponse {
    /// Single-instrument source (e.g. a spot price endpoint).
    Single(RawQuote),
    /// Multi-instrument source.
    Many(Vec<RawQuote>),
}

impl RawResponse {
    /// All raw quotes in delivery order.
    #[must_use]
    pub fn quotes(&self) -> &[RawQuote] {
        match self {
            Self::Single(quote) => std::slice::from_ref(quote),
            Self::Many(quotes) => quotes,
        }
    }
}

/// Normalization failure.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum NormalizeError {
    /// A required field is absent or cannot be coerced to its type.
    #[error("malformed response: entry {index} field `{field}` {reason}")]
    MalformedResponse {
        /// Position of the offending entry within the response.
        index: usize,
        /// Field name.
        field: &'static str,
        /// What was wrong with it.
        reason: String,
    },
}

/// Shapes raw responses into quote records stamped with the clock's time.
#[derive(Clone)]
pub struct Normalizer {
    clock: Arc<dyn Clock>,
}

impl std::fmt::Debug for Normalizer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Normalizer").finish_non_exhaustive()
    }
}

impl Normalizer {
    /// Create a normalizer reading observation time from `clock`.
    #[must_use]
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self { clock }
    }

    /// Normalize one response from `source`.
    ///
    /// All records share a single `collected_at`, read once per call.
    pub fn normalize(
        &self,
        source: &str,
        domain: PriceDomain,
        raw: &RawResponse,
    ) -> Result<Vec<QuoteRecord>, NormalizeError> {
        let collected_at = self.clock.now();
        raw.quotes()
            .iter()
            .enumerate()
            .map(|(index, quote)| {
                let instrument = coerce_text(index, "instrument", &quote.instrument)?;
                let price = coerce_price(index, domain, &quote.price)?;
                let unit = coerce_text(index, "unit", &quote.unit)?;
                Ok(QuoteRecord::new(
                    sanitize(source),
                    instrument,
                    price,
                    unit,
                    collected_at,
                ))
            })
            .collect()
    }
}

/// Strip NUL characters (rejected by PostgreSQL `TEXT`) and trim whitespace.
fn sanitize(text: &str) -> String {
    text.replace('\0', "").trim().to_string()
}

fn malformed(index: usize, field: &'static str, reason: impl Into<String>) -> NormalizeError {
    NormalizeError::MalformedResponse {
        index,
        field,
        reason: reason.into(),
    }
}

fn coerce_text(index: usize, field: &'static str, value: &Value) -> Result<String, NormalizeError> {
    match value {
        Value::String(text) => {
            let cleaned = sanitize(text);
            if cleaned.is_empty() {
                Err(malformed(index, field, "is empty"))
            } else {
                Ok(cleaned)
            }
        }
        Value::Null => Err(malformed(index, field, "is missing")),
        other => Err(malformed(
            index,
            field,
            format!("must be a string, got {}", json_kind(other)),
        )),
    }
}

fn coerce_price(
    index: usize,
    domain: PriceDomain,
    value: &Value,
) -> Result<Decimal, NormalizeError> {
    let price = match value {
        Value::String(text) => parse_decimal(text.trim()),
        Value::Number(number) => parse_decimal(&number.to_string()),
        Value::Null => return Err(malformed(index, "price", "is missing")),
        other => {
            return Err(malformed(
                index,
                "price",
                format!("must be numeric, got {}", json_kind(other)),
            ));
        }
    }
    .ok_or_else(|| malformed(index, "price", format!("is not a number: {value}")))?;

    if domain == PriceDomain::NonNegative && price.is_sign_negative() && !price.is_zero() {
        return Err(malformed(
            index,
            "price",
            format!("must be non-negative, got {price}"),
        ));
    }

    Ok(price)
}

/// Parse plain or scientific decimal text without rounding.
///
/// Digit separators are rejected, as is any value needing more than 28
/// fractional digits or 96 bits of mantissa.
pub(crate) fn parse_decimal(text: &str) -> Option<Decimal> {
    if text.contains('_') {
        return None;
    }
    let Some((mantissa, exponent)) = text.split_once(['e', 'E']) else {
        return Decimal::from_str_exact(text).ok();
    };

    let mantissa = Decimal::from_str_exact(mantissa).ok()?.normalize();
    let exponent: i64 = exponent.parse().ok()?;
    let scale = i64::from(mantissa.scale()).checked_sub(exponent)?;
    if scale >= 0 {
        return Decimal::try_from_i128_with_scale(mantissa.mantissa(), u32::try_from(scale).ok()?)
            .ok();
    }
    let factor = 10_i128.checked_pow(u32::try_from(-scale).ok()?)?;
    Decimal::try_from_i128_with_scale(mantissa.mantissa().checked_mul(factor)?, 0).ok()
}

const fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
