//! Domain Layer - Quote types and pure transformations.
//!
//! Nothing in this layer performs I/O. The only ambient input is the
//! [`clock::Clock`] used to stamp observations.

/// Batch assembly across sources for one cycle.
pub mod batch;

/// Observation timestamps.
pub mod clock;

/// Upstream failure taxonomy.
pub mod errors;

/// Raw provider payloads → quote records.
pub mod normalize;

/// Quote records and batches.
pub mod quote;
