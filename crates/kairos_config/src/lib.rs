//! Parsing and validation of `kairos.toml` run configuration files.
//!
//! This crate reads the run configuration and produces a strongly-typed
//! [`SimConfig`] holding the simulation limits and scheduler tuning knobs.

#![warn(missing_docs)]

pub mod error;
pub mod loader;
pub mod types;

pub use error::ConfigError;
pub use loader::{load_config, load_config_from_str, CONFIG_FILE_NAME};
pub use types::*;
