//! Batch Assembler
//!
//! Merges the per-source outcomes of one cycle into a single [`QuoteBatch`].
//!
//! Two policies exist:
//!
//! - [`AssemblyPolicy::AllOrNothing`] (default): any failed source fails the
//!   whole cycle and nothing is forwarded to the sink, even records from
//!   sources that succeeded.
//! - [`AssemblyPolicy::PerSource`]: healthy sources are forwarded and failed
//!   ones are reported alongside the batch.

use super::errors::SourceFailure;
use super::quote::{QuoteBatch, QuoteRecord};

/// How a failed source affects the rest of the cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AssemblyPolicy {
    /// One failure drops the whole batch.
    #[default]
    AllOrNothing,
    /// Each source stands on its own.
    PerSource,
}

impl AssemblyPolicy {
    /// Parse a policy name; `None` when unrecognized.
    #[must_use]
    pub fn from_str_case_insensitive(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().replace('-', "_").as_str() {
            "all_or_nothing" => Some(Self::AllOrNothing),
            "per_source" => Some(Self::PerSource),
            _ => None,
        }
    }

    /// Policy name as accepted by `FAILURE_POLICY`.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::AllOrNothing => "all_or_nothing",
            Self::PerSource => "per_source",
        }
    }
}

/// Fetch+normalize result for one source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceOutcome {
    /// Source name.
    pub source: String,
    /// Records, or why there are none.
    pub result: Result<Vec<QuoteRecord>, SourceFailure>,
}

impl SourceOutcome {
    /// Successful outcome.
    #[must_use]
    pub fn ok(source: impl Into<String>, records: Vec<QuoteRecord>) -> Self {
        Self {
            source: source.into(),
            result: Ok(records),
        }
    }

    /// Failed outcome.
    #[must_use]
    pub fn failed(source: impl Into<String>, failure: impl Into<SourceFailure>) -> Self {
        Self {
            source: source.into(),
            result: Err(failure.into()),
        }
    }
}

/// A source that contributed nothing this cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailedSource {
    /// Source name.
    pub source: String,
    /// Failure cause.
    pub failure: SourceFailure,
}

/// Successful assembly.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Assembly {
    /// Records to persist.
    pub batch: QuoteBatch,
    /// Sources skipped under [`AssemblyPolicy::PerSource`]. Always empty
    /// under [`AssemblyPolicy::AllOrNothing`].
    pub skipped: Vec<FailedSource>,
}

/// Assembly failure.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AssemblyError {
    /// At least one source failed and the policy does not tolerate it.
    #[error("{} source(s) failed: {}", .failures.len(), describe(.failures))]
    SourceFailed {
        /// Every failed source, in source order.
        failures: Vec<FailedSource>,
    },

    /// No source produced any record.
    #[error("no records collected")]
    Empty,
}

fn describe(failures: &[FailedSource]) -> String {
    failures
        .iter()
        .map(|f| format!("{} ({})", f.source, f.failure))
        .collect::<Vec<_>>()
        .join("; ")
}

/// Merges per-source outcomes according to an [`AssemblyPolicy`].
#[derive(Debug, Clone, Copy, Default)]
pub struct BatchAssembler {
    policy: AssemblyPolicy,
}

impl BatchAssembler {
    /// Create an assembler with the given policy.
    #[must_use]
    pub const fn new(policy: AssemblyPolicy) -> Self {
        Self { policy }
    }

    /// Concatenate outcomes in order into one batch.
    pub fn assemble(&self, outcomes: Vec<SourceOutcome>) -> Result<Assembly, AssemblyError> {
        let mut records = Vec::new();
        let mut failures = Vec::new();

        for outcome in outcomes {
            match outcome.result {
                Ok(mut batch) => records.append(&mut batch),
                Err(failure) => failures.push(FailedSource {
                    source: outcome.source,
                    failure,
                }),
            }
        }

        if self.policy == AssemblyPolicy::AllOrNothing && !failures.is_empty() {
            return Err(AssemblyError::SourceFailed { failures });
        }

        match QuoteBatch::new(records) {
            Some(batch) => Ok(Assembly {
                batch,
                skipped: failures,
            }),
            None if failures.is_empty() => Err(AssemblyError::Empty),
            None => Err(AssemblyError::SourceFailed { failures }),
        }
    }
}
