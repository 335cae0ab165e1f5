//! Application Layer - Ports and the collection loop.
//!
//! This layer contains the port interfaces that adapters implement and the
//! service that drives periodic collection through them.

/// Port interfaces for quote providers and the persistence sink.
pub mod ports;

/// Application services (the collection loop).
pub mod services;
