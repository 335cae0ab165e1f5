//! Quote Source Port (Driven Port)
//!
//! Interface for fetching current quotes from an external provider.

use std::time::Duration;

use async_trait::async_trait;

use crate::domain::errors::SourceError;
use crate::domain::normalize::{PriceDomain, RawResponse};

/// Port for a quote provider.
///
/// Implementations unwrap their provider's envelope into a [`RawResponse`]
/// and leave field coercion to the normalizer. They must honour `timeout`
/// and report its expiry as [`SourceError::Unavailable`].
#[async_trait]
pub trait QuoteSource: Send + Sync {
    /// Stable name, persisted alongside each record.
    fn name(&self) -> &str;

    /// Whether this source's instruments may quote below zero.
    fn price_domain(&self) -> PriceDomain {
        PriceDomain::NonNegative
    }

    /// Fetch the current quote(s).
    async fn fetch(&self, timeout: Duration) -> Result<RawResponse, SourceError>;
}
