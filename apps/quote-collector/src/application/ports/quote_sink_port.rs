//! Quote Sink Port (Driven Port)
//!
//! Interface for appending quote batches to durable storage.

use async_trait::async_trait;

use crate::domain::quote::QuoteBatch;

/// Persistence failure.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SinkError {
    /// Could not obtain a connection.
    #[error("sink connection error: {0}")]
    Connection(String),

    /// A write failed after `rows_written` rows were appended.
    #[error("sink write failed after {rows_written} row(s): {message}")]
    Write {
        /// Rows already appended before the failure; they are not rolled back.
        rows_written: usize,
        /// Error details.
        message: String,
    },
}

impl SinkError {
    /// Rows that made it into storage before the failure.
    #[must_use]
    pub const fn rows_written(&self) -> usize {
        match self {
            Self::Connection(_) => 0,
            Self::Write { rows_written, .. } => *rows_written,
        }
    }
}

/// Port for append-only quote storage.
///
/// Appends are row-wise and at-least-once: a failure midway leaves earlier
/// rows in place, and a retried cycle may write duplicates.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait QuoteSink: Send + Sync {
    /// Append every record of `batch`, returning the number of rows written.
    async fn append(&self, batch: &QuoteBatch) -> Result<usize, SinkError>;
}
