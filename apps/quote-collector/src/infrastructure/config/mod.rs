//! Configuration Module
//!
//! Configuration loading for the collector, built once at startup and passed
//! by value into the components that need it.

mod settings;

pub use settings::{
    CollectorConfig, ConfigError, DatabaseSettings, ObservabilitySettings, SourceSettings,
};
