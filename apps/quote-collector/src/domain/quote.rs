//! Quote Records
//!
//! A [`QuoteRecord`] is one observation of one instrument. Records are built
//! by the normalizer and never modified afterwards; the store is append-only.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;

/// One price observation.
///
/// Serializable for logging and export only; records are never rebuilt from
/// external data without going through the normalizer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QuoteRecord {
    source: String,
    instrument: String,
    price: Decimal,
    unit: String,
    collected_at: DateTime<Utc>,
}

impl QuoteRecord {
    /// Build a record. Callers are expected to have validated the fields;
    /// the normalizer is the only production constructor.
    #[must_use]
    pub(crate) const fn new(
        source: String,
        instrument: String,
        price: Decimal,
        unit: String,
        collected_at: DateTime<Utc>,
    ) -> Self {
        Self {
            source,
            instrument,
            price,
            unit,
            collected_at,
        }
    }

    /// Name of the source that produced this record.
    #[must_use]
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Instrument identifier (e.g. `BTC`, `XAU`).
    #[must_use]
    pub fn instrument(&self) -> &str {
        &self.instrument
    }

    /// Observed price.
    #[must_use]
    pub const fn price(&self) -> Decimal {
        self.price
    }

    /// Quote unit, usually the settlement currency.
    #[must_use]
    pub fn unit(&self) -> &str {
        &self.unit
    }

    /// Time of collection.
    #[must_use]
    pub const fn collected_at(&self) -> DateTime<Utc> {
        self.collected_at
    }
}

/// Records produced by a single collection cycle.
///
/// Never empty: the batch assembler refuses to build an empty batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuoteBatch {
    records: Vec<QuoteRecord>,
}

impl QuoteBatch {
    /// Wrap records into a batch. Returns `None` when `records` is empty.
    #[must_use]
    pub fn new(records: Vec<QuoteRecord>) -> Option<Self> {
        if records.is_empty() {
            None
        } else {
            Some(Self { records })
        }
    }

    /// Records in assembly order.
    #[must_use]
    pub fn records(&self) -> &[QuoteRecord] {
        &self.records
    }

    /// Number of records.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Always `false`; present for API symmetry with `len`.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Distinct source names in first-appearance order.
    #[must_use]
    pub fn sources(&self) -> Vec<&str> {
        let mut seen: Vec<&str> = Vec::new();
        for record in &self.records {
            if !seen.contains(&record.source()) {
                seen.push(record.source());
            }
        }
        seen
    }
}
