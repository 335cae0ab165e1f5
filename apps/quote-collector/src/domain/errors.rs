//! Upstream failure taxonomy shared by the ports and the batch assembler.

use super::normalize::NormalizeError;

/// Failure fetching from a quote provider.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SourceError {
    /// Network failure, non-success status, or timeout.
    #[error("source {source_name} unavailable: {message}")]
    Unavailable {
        /// Source name.
        source_name: String,
        /// Error details.
        message: String,
    },

    /// Body is not JSON or lacks the provider envelope.
    #[error("source {source_name} returned a malformed payload: {message}")]
    Malformed {
        /// Source name.
        source_name: String,
        /// Error details.
        message: String,
    },
}

impl SourceError {
    /// Build an `Unavailable` error.
    #[must_use]
    pub fn unavailable(source_name: &str, message: impl Into<String>) -> Self {
        Self::Unavailable {
            source_name: source_name.to_string(),
            message: message.into(),
        }
    }

    /// Build a `Malformed` error.
    #[must_use]
    pub fn malformed(source_name: &str, message: impl Into<String>) -> Self {
        Self::Malformed {
            source_name: source_name.to_string(),
            message: message.into(),
        }
    }

    /// Short label used for metrics.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Unavailable { .. } => "unavailable",
            Self::Malformed { .. } => "malformed",
        }
    }
}

/// Why one source contributed no records to a cycle.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SourceFailure {
    /// The fetch itself failed.
    #[error(transparent)]
    Fetch(#[from] SourceError),

    /// The payload arrived but could not be normalized.
    #[error(transparent)]
    Normalize(#[from] NormalizeError),
}

impl SourceFailure {
    /// Short label used for metrics.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Fetch(err) => err.kind(),
            Self::Normalize(_) => "malformed_response",
        }
    }
}
