//! Configuration file loading and validation.

use crate::error::ConfigError;
use crate::types::SimConfig;
use std::path::Path;

/// File name looked up by [`load_config`].
pub const CONFIG_FILE_NAME: &str = "kairos.toml";

/// Loads and validates a `kairos.toml` configuration from a run directory.
pub fn load_config(run_dir: &Path) -> Result<SimConfig, ConfigError> {
    let config_path = run_dir.join(CONFIG_FILE_NAME);
    let content = std::fs::read_to_string(&config_path)?;
    load_config_from_str(&content)
}

/// Parses and validates a `kairos.toml` configuration from a string.
pub fn load_config_from_str(content: &str) -> Result<SimConfig, ConfigError> {
    let config: SimConfig =
        toml::from_str(content).map_err(|e| ConfigError::ParseError(e.to_string()))?;
    validate_config(&config)?;
    Ok(config)
}

/// Validates that required fields are present and values are consistent.
fn validate_config(config: &SimConfig) -> Result<(), ConfigError> {
    if config.simulation.name.is_empty() {
        return Err(ConfigError::MissingField("simulation.name".to_string()));
    }
    if config.scheduler.max_rounds_per_instant == 0 {
        return Err(ConfigError::ValidationError(
            "scheduler.max_rounds_per_instant must be greater than zero".to_string(),
        ));
    }
    Ok(())
}
