//! In-memory quote sink for tests and dry runs.

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::application::ports::{QuoteSink, SinkError};
use crate::domain::quote::{QuoteBatch, QuoteRecord};

/// Sink that keeps appended records in a `Vec`.
#[derive(Debug, Default)]
pub struct InMemoryQuoteSink {
    state: Mutex<State>,
}

#[derive(Debug, Default)]
struct State {
    records: Vec<QuoteRecord>,
    appends: usize,
    fail_after: Option<usize>,
}

impl InMemoryQuoteSink {
    /// Create an empty sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a sink that accepts `rows` rows in total and fails every write
    /// after that.
    #[must_use]
    pub fn fail_after(rows: usize) -> Self {
        Self {
            state: Mutex::new(State {
                fail_after: Some(rows),
                ..State::default()
            }),
        }
    }

    /// Snapshot of every record appended so far.
    #[must_use]
    pub fn records(&self) -> Vec<QuoteRecord> {
        self.state.lock().records.clone()
    }

    /// Number of stored rows.
    #[must_use]
    pub fn len(&self) -> usize {
        self.state.lock().records.len()
    }

    /// Whether no rows have been stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.state.lock().records.is_empty()
    }

    /// Number of `append` calls, successful or not.
    #[must_use]
    pub fn append_calls(&self) -> usize {
        self.state.lock().appends
    }
}

#[async_trait]
impl QuoteSink for InMemoryQuoteSink {
    async fn append(&self, batch: &QuoteBatch) -> Result<usize, SinkError> {
        let mut state = self.state.lock();
        state.appends += 1;

        let mut rows_written = 0;
        for record in batch.records() {
            if state.fail_after.is_some_and(|limit| state.records.len() >= limit) {
                return Err(SinkError::Write {
                    rows_written,
                    message: "in-memory sink capacity reached".to_string(),
                });
            }
            state.records.push(record.clone());
            rows_written += 1;
        }
        Ok(rows_written)
    }
}
